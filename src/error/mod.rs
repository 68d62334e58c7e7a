pub mod types;

pub use types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rule_reader::RuleReaderError;

    #[test]
    fn test_error_display_messages() {
        let err = CacheError::Config("max_entries must be positive".to_string());
        assert_eq!(err.to_string(), "Configuration error: max_entries must be positive");

        let err = CacheError::ServiceNotConfigured;
        assert_eq!(err.to_string(), "Rule service not configured");

        let err = CacheError::EmptyLoad("rules");
        assert_eq!(err.to_string(), "Loader produced no value for rules cache");
    }

    #[test]
    fn test_backend_error_conversion() {
        let err: CacheError = RuleReaderError::Timeout.into();
        assert!(err.is_backend());
        assert_eq!(err.to_string(), "Rule service error: Rule service request timed out");

        assert!(!CacheError::ServiceNotConfigured.is_backend());
    }

    #[test]
    fn test_all_error_variants_exist() {
        let _backend = CacheError::Backend(RuleReaderError::Internal("test".to_string()));
        let _unconfigured = CacheError::ServiceNotConfigured;
        let _config = CacheError::Config("test".to_string());
        let _empty = CacheError::EmptyLoad("test");
    }
}
