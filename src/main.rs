use anyhow::Context;
use clap::Parser;
use phylo_scrape::utils::{logger, validation::Validate};
use phylo_scrape::{
    DataScrapePipeline, LocalStorage, ScrapeConfig, ScrapeEngine, ScrapeError, DEFAULT_CONFIG_FILE,
};
use std::path::Path;

#[derive(Parser, Debug)]
#[command(name = "phylo-scrape")]
#[command(about = "Extend a published phylogeny with newly found sequences")]
struct Args {
    /// Path to the configuration file (TOML)
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: String,

    /// Override [study].study_id
    #[arg(long)]
    study_id: Option<String>,

    /// Override [study].tree_id
    #[arg(long)]
    tree_id: Option<String>,

    /// Override [study].workdir
    #[arg(short, long)]
    workdir: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    monitor: Option<bool>,

    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Show what would be fetched and run without doing it
    #[arg(long)]
    dry_run: bool,
}

fn load_config(args: &Args) -> anyhow::Result<ScrapeConfig> {
    // 設定檔不存在時使用預設值 (ot_350 / Tr53297)
    let mut config = if Path::new(&args.config).exists() {
        ScrapeConfig::from_file(&args.config)
            .with_context(|| format!("failed to load config file '{}'", args.config))?
    } else {
        ScrapeConfig::default()
    };

    // 應用命令列覆蓋設定
    if let Some(study_id) = &args.study_id {
        config.study.study_id = study_id.clone();
    }
    if let Some(tree_id) = &args.tree_id {
        config.study.tree_id = tree_id.clone();
    }
    if let Some(workdir) = &args.workdir {
        config.study.workdir = workdir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let loaded = load_config(&args);

    // 初始化日誌，設定檔的 log_level 次於 --verbose
    if args.json_logs {
        logger::init_json_logger();
    } else {
        let level = loaded.as_ref().ok().and_then(|config| config.log_level());
        logger::init_cli_logger_with_level(args.verbose, level);
    }

    tracing::info!("🚀 Starting phylo-scrape");
    tracing::info!("📁 Loading configuration from: {}", args.config);
    if !Path::new(&args.config).exists() {
        tracing::warn!("⚠️ Config file {} not found; using defaults", args.config);
    }

    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {:#}", e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    tracing::info!("✅ Configuration loaded and validated successfully");
    if args.verbose {
        tracing::debug!("Config: {:?}", config);
    }

    display_config_summary(&config, &args);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No requests or tools will be run");
        perform_dry_run(&config);
        return Ok(());
    }

    // 決定監控設定
    let monitor_enabled = args.monitor.unwrap_or_else(|| config.monitoring_enabled());
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    // 創建存儲和管道
    let storage = LocalStorage::new(config.workdir());
    let pipeline = match DataScrapePipeline::new(storage, config) {
        Ok(pipeline) => pipeline,
        Err(e) => exit_with(&e),
    };
    let engine = ScrapeEngine::new_with_monitoring(pipeline, monitor_enabled);

    match engine.run().await {
        Ok(report) => {
            tracing::info!("✅ Scrape completed successfully!");
            println!("✅ Scrape completed successfully!");
            println!("🌳 Original tree ({} taxa): {}", report.original_taxa, report.original_export);
            println!("🌳 Updated tree ({} taxa): {}", report.final_taxa, report.updated_export);
            println!("📁 Checkpoint: {}", report.checkpoint);
        }
        Err(e) => exit_with(&e),
    }

    Ok(())
}

fn exit_with(e: &ScrapeError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Scrape failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    // 輸出用戶友好的錯誤信息
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    std::process::exit(e.severity().exit_code())
}

fn display_config_summary(config: &ScrapeConfig, args: &Args) {
    println!("📋 Configuration Summary:");
    println!("  Study: {} / tree {}", config.study.study_id, config.study.tree_id);
    println!("  Workdir: {}", config.workdir());
    println!("  Labels: {}", config.study.label);
    println!(
        "  Search: {} against {} (e-value < {})",
        config.blast.program, config.blast.database, config.blast.e_value_thresh
    );
    println!(
        "  Tools: {} / {} ({})",
        config.tools.aligner, config.tools.tree_builder, config.tools.model
    );

    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }

    println!();
}

fn perform_dry_run(config: &ScrapeConfig) {
    let tag = config.run_tag();
    println!("🔍 Dry Run Analysis:");
    println!();

    println!("📡 Remote services:");
    println!(
        "  Study: {}/study/{}?output_nexml2json=1.2.1",
        config.phylesystem.api_base.trim_end_matches('/'),
        config.study.study_id
    );
    println!(
        "  Alignment: {}/study/TB2:S<deposit>?format=nexus",
        config.treebase.phylows_base.trim_end_matches('/')
    );
    println!("  Sequence search: {}", config.blast.url_base);
    match &config.blast.email {
        Some(email) => println!("  Contact: {}", email),
        None => println!("  ⚠️ No [blast].email set; the NCBI search requires a contact address"),
    }
    println!(
        "  Cached searches younger than {} days are reused",
        config.blast.delay_days
    );

    println!();
    println!("🧬 Taxonomy:");
    match config.taxonomy.ott_ncbi.as_deref() {
        Some(path) if Path::new(path).exists() => println!("  Mapping file: {}", path),
        Some(path) => println!("  ⚠️ Mapping file {} not found; NCBI names will be used", path),
        None => println!("  No mapping file; NCBI names will be used"),
    }

    println!();
    println!("💾 Outputs in {}:", config.workdir());
    println!("  {}_original (+ .fas)", tag);
    println!("  {}_updated_norepeats (+ .fas)", tag);
    println!("  aln_{0}.fas, queries_{0}.fas, start_{0}.tre, blast/*.json", tag);
    println!("  att_checkpoint.json");
}
