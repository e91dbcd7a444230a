use crate::config::scrape_config::ToolsConfig;
use crate::domain::ports::{Aligner, TreeEstimator, TreeSearchRequest};
use crate::utils::error::{Result, ScrapeError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use tokio::process::Command;

/// Runs `program` with `args`; stdout on success, stderr in the error otherwise.
async fn run_tool(program: &str, args: &[OsString]) -> Result<String> {
    tracing::debug!("Running {} {:?}", program, args);

    let output = Command::new(program).args(args).output().await.map_err(|e| {
        ScrapeError::tool(program, format!("could not be started: {}", e))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ScrapeError::tool(
            program,
            format!("exited with {}: {}", output.status, stderr.trim()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Adds sequences to a fixed alignment with `mafft --add --keeplength`.
pub struct MafftAligner {
    program: String,
    threads: usize,
}

impl MafftAligner {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            program: config.aligner.clone(),
            threads: config.threads,
        }
    }

    fn arguments(&self, alignment: &Path, queries: &Path) -> Vec<OsString> {
        vec![
            "--add".into(),
            queries.into(),
            "--keeplength".into(),
            "--thread".into(),
            self.threads.to_string().into(),
            "--quiet".into(),
            alignment.into(),
        ]
    }
}

#[async_trait]
impl Aligner for MafftAligner {
    async fn add_to_alignment(&self, alignment: &Path, queries: &Path) -> Result<String> {
        tracing::info!("🧬 Aligning {} into {}", queries.display(), alignment.display());
        let merged = run_tool(&self.program, &self.arguments(alignment, queries)).await?;
        if merged.trim().is_empty() {
            return Err(ScrapeError::tool(&self.program, "produced an empty alignment"));
        }
        Ok(merged)
    }
}

/// Maximum-likelihood search with RAxML.
pub struct RaxmlEstimator {
    program: String,
    model: String,
    seed: u64,
    threads: usize,
}

impl RaxmlEstimator {
    pub fn new(config: &ToolsConfig) -> Self {
        Self {
            program: config.tree_builder.clone(),
            model: config.model.clone(),
            seed: config.seed,
            threads: config.threads,
        }
    }

    fn arguments(&self, request: &TreeSearchRequest<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-m".into(),
            self.model.clone().into(),
            "-s".into(),
            request.alignment.into(),
            "-n".into(),
            request.run_name.into(),
            "-p".into(),
            self.seed.to_string().into(),
            "-w".into(),
            request.workdir.into(),
        ];

        // 新增的類群不在起始樹中，只能當作拓撲限制
        args.push(if request.partial_starting_tree { "-g" } else { "-t" }.into());
        args.push(request.starting_tree.into());

        // 單執行緒版本的 raxmlHPC 不接受 -T
        if self.threads > 1 {
            args.push("-T".into());
            args.push(self.threads.to_string().into());
        }
        args
    }
}

#[async_trait]
impl TreeEstimator for RaxmlEstimator {
    async fn estimate(&self, request: TreeSearchRequest<'_>) -> Result<String> {
        // RAxML 拒絕覆寫同名結果
        let info_file = request.workdir.join(format!("RAxML_info.{}", request.run_name));
        if info_file.exists() {
            tracing::warn!("⚠️ Removing previous RAxML run {}", request.run_name);
            for prefix in ["info", "log", "result", "bestTree", "parsimonyTree"] {
                let stale = request.workdir.join(format!("RAxML_{}.{}", prefix, request.run_name));
                if stale.exists() {
                    tokio::fs::remove_file(&stale).await?;
                }
            }
        }

        tracing::info!("🌲 Estimating tree {} with {}", request.run_name, self.program);
        run_tool(&self.program, &self.arguments(&request)).await?;

        let best_tree = request
            .workdir
            .join(format!("RAxML_bestTree.{}", request.run_name));
        let newick = tokio::fs::read_to_string(&best_tree).await.map_err(|e| {
            ScrapeError::tool(
                &self.program,
                format!("no best tree at {}: {}", best_tree.display(), e),
            )
        })?;
        Ok(newick)
    }
}
