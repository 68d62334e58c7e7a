use thiserror::Error;

use crate::services::rule_reader::RuleReaderError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Rule service error: {0}")]
    Backend(#[from] RuleReaderError),

    #[error("Rule service not configured")]
    ServiceNotConfigured,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Loader produced no value for {0} cache")]
    EmptyLoad(&'static str),
}

impl CacheError {
    /// True when the failure came from the backing rule service
    pub fn is_backend(&self) -> bool {
        matches!(self, CacheError::Backend(_))
    }
}

impl From<garde::Report> for CacheError {
    fn from(report: garde::Report) -> Self {
        CacheError::Config(report.to_string())
    }
}

impl From<figment::Error> for CacheError {
    fn from(err: figment::Error) -> Self {
        CacheError::Config(err.to_string())
    }
}
