use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("{format} parse error: {message}")]
    ParseError { format: String, message: String },

    #[error("{service} returned an error: {message}")]
    ServiceError { service: String, message: String },

    #[error("External tool '{tool}' failed: {message}")]
    ToolError { tool: String, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },

    #[error("Validation error: {message}")]
    ValidationError { message: String },
}

/// 錯誤分類，用於日誌與退出碼
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Network,
    Configuration,
    Data,
    ExternalTool,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit code for a failed run. Never zero.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2,   // 遠端服務錯誤
            ErrorSeverity::High => 1,     // 處理錯誤
            ErrorSeverity::Critical => 3, // 系統錯誤
        }
    }
}

impl ScrapeError {
    pub fn parse(format: &str, message: impl Into<String>) -> Self {
        ScrapeError::ParseError {
            format: format.to_string(),
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        ScrapeError::ProcessingError {
            message: message.into(),
        }
    }

    pub fn service(service: &str, message: impl Into<String>) -> Self {
        ScrapeError::ServiceError {
            service: service.to_string(),
            message: message.into(),
        }
    }

    pub fn tool(tool: &str, message: impl Into<String>) -> Self {
        ScrapeError::ToolError {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ScrapeError::ApiError(_) | ScrapeError::ServiceError { .. } => ErrorCategory::Network,
            ScrapeError::ConfigError { .. }
            | ScrapeError::ConfigValidationError { .. }
            | ScrapeError::InvalidConfigValueError { .. }
            | ScrapeError::MissingConfigError { .. } => ErrorCategory::Configuration,
            ScrapeError::CsvError(_)
            | ScrapeError::SerializationError(_)
            | ScrapeError::ParseError { .. }
            | ScrapeError::ProcessingError { .. }
            | ScrapeError::ValidationError { .. } => ErrorCategory::Data,
            ScrapeError::ToolError { .. } => ErrorCategory::ExternalTool,
            ScrapeError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Network => ErrorSeverity::Medium,
            ErrorCategory::Configuration | ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::ExternalTool => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Network => {
                "Check network connectivity and the service URLs in the config, then re-run; cached search results are reused"
            }
            ErrorCategory::Configuration => {
                "Review the config file (default aws.config) and the command line overrides"
            }
            ErrorCategory::Data => {
                "Inspect the study/tree ids and the downloaded data in the working directory"
            }
            ErrorCategory::ExternalTool => {
                "Make sure the aligner and tree builder from [tools] are installed and on PATH"
            }
            ErrorCategory::System => "Check permissions and free space in the working directory",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            ScrapeError::ApiError(e) if e.is_timeout() => {
                "A remote service did not answer in time".to_string()
            }
            ScrapeError::ApiError(_) => "Could not reach a remote data service".to_string(),
            ScrapeError::MissingConfigError { field } => {
                format!("Configuration value '{}' is required", field)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
