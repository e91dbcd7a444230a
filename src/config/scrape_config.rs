use crate::domain::model::LabelKey;
use crate::utils::error::{Result, ScrapeError};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 預設設定檔名稱
pub const DEFAULT_CONFIG_FILE: &str = "aws.config";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default)]
    pub study: StudyConfig,
    #[serde(default)]
    pub phylesystem: PhylesystemConfig,
    #[serde(default)]
    pub treebase: TreebaseConfig,
    #[serde(default)]
    pub blast: BlastConfig,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub study_id: String,
    pub tree_id: String,
    pub workdir: String,
    /// OTU annotation used for exported tip labels.
    pub label: String,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            study_id: "ot_350".to_string(),
            tree_id: "Tr53297".to_string(),
            workdir: "scrape_ot_350".to_string(),
            label: "^ot:ottTaxonName".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhylesystemConfig {
    pub api_base: String,
    pub timeout_seconds: Option<u64>,
}

impl Default for PhylesystemConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.opentreeoflife.org/v3".to_string(),
            timeout_seconds: Some(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TreebaseConfig {
    pub phylows_base: String,
    pub timeout_seconds: Option<u64>,
}

impl Default for TreebaseConfig {
    fn default() -> Self {
        Self {
            phylows_base: "http://purl.org/phylo/treebase/phylows".to_string(),
            timeout_seconds: Some(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlastConfig {
    pub url_base: String,
    /// Contact address sent with every request, as NCBI asks for.
    pub email: Option<String>,
    pub program: String,
    pub database: String,
    pub e_value_thresh: f64,
    pub hitlist_size: usize,
    pub poll_interval_seconds: u64,
    pub max_polls: u32,
    /// Cached searches younger than this are reused.
    pub delay_days: i64,
    pub timeout_seconds: Option<u64>,
}

impl Default for BlastConfig {
    fn default() -> Self {
        Self {
            url_base: "https://blast.ncbi.nlm.nih.gov/Blast.cgi".to_string(),
            email: None,
            program: "blastn".to_string(),
            database: "nt".to_string(),
            e_value_thresh: 0.001,
            hitlist_size: 10,
            poll_interval_seconds: 60,
            max_polls: 120,
            delay_days: 90,
            timeout_seconds: Some(120),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Minimum new-sequence length as a fraction of the average length.
    pub seq_len_perc: f64,
    /// Maximum new-sequence length as a multiple of the average length.
    pub max_len_perc: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            seq_len_perc: 0.75,
            max_len_perc: 1.5,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaxonomyConfig {
    /// CSV/TSV with `ott_id,ncbi_id,name` rows.
    pub ott_ncbi: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub aligner: String,
    pub tree_builder: String,
    pub model: String,
    pub seed: u64,
    pub threads: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            aligner: "mafft".to_string(),
            tree_builder: "raxmlHPC".to_string(),
            model: "GTRCAT".to_string(),
            seed: 1,
            threads: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
}

impl ScrapeConfig {
    /// 從設定檔載入
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析設定
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| ScrapeError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${ENTREZ_EMAIL})
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}").map_err(|e| ScrapeError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn label_key(&self) -> Result<LabelKey> {
        self.study
            .label
            .parse()
            .map_err(|reason| ScrapeError::InvalidConfigValueError {
                field: "study.label".to_string(),
                value: self.study.label.clone(),
                reason,
            })
    }

    /// 輸出檔名前綴，例如 ot_350Tr53297
    pub fn run_tag(&self) -> String {
        format!("{}{}", self.study.study_id, self.study.tree_id)
    }

    pub fn workdir(&self) -> &str {
        &self.study.workdir
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.monitoring.as_ref().and_then(|m| m.log_level.as_deref())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_non_empty_string("study.study_id", &self.study.study_id)?;
        validation::validate_non_empty_string("study.tree_id", &self.study.tree_id)?;
        validation::validate_path("study.workdir", &self.study.workdir)?;
        self.label_key()?;

        validation::validate_url("phylesystem.api_base", &self.phylesystem.api_base)?;
        validation::validate_url("treebase.phylows_base", &self.treebase.phylows_base)?;
        validation::validate_url("blast.url_base", &self.blast.url_base)?;

        if let Some(email) = &self.blast.email {
            validation::validate_email("blast.email", email)?;
        }
        validation::validate_non_empty_string("blast.program", &self.blast.program)?;
        validation::validate_non_empty_string("blast.database", &self.blast.database)?;
        validation::validate_range("blast.e_value_thresh", self.blast.e_value_thresh, 0.0, 10.0)?;
        validation::validate_positive_number("blast.hitlist_size", self.blast.hitlist_size, 1)?;
        validation::validate_positive_number("blast.max_polls", self.blast.max_polls as usize, 1)?;
        if self.blast.delay_days < 0 {
            return Err(ScrapeError::InvalidConfigValueError {
                field: "blast.delay_days".to_string(),
                value: self.blast.delay_days.to_string(),
                reason: "Value cannot be negative".to_string(),
            });
        }

        validation::validate_range("filter.seq_len_perc", self.filter.seq_len_perc, 0.0, 1.0)?;
        validation::validate_range("filter.max_len_perc", self.filter.max_len_perc, 1.0, 100.0)?;

        if let Some(path) = &self.taxonomy.ott_ncbi {
            validation::validate_path("taxonomy.ott_ncbi", path)?;
            validation::validate_file_extensions(
                "taxonomy.ott_ncbi",
                std::slice::from_ref(path),
                &["csv", "tsv"],
            )?;
        }

        validation::validate_non_empty_string("tools.aligner", &self.tools.aligner)?;
        validation::validate_non_empty_string("tools.tree_builder", &self.tools.tree_builder)?;
        validation::validate_positive_number("tools.threads", self.tools.threads, 1)?;

        Ok(())
    }
}

impl Validate for ScrapeConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
