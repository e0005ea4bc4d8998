//! Configuration module for a trawl session
//!
//! This module provides the `TrawlConfig` struct and its type-safe builder
//! with validation and sensible defaults.

// Sub-modules
pub mod builder;
pub mod getters;
pub mod methods;
pub mod types;

// Re-exports for public API
pub use builder::{TrawlConfigBuilder, WithStartUrl, WithStorageDir};
pub use types::TrawlConfig;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_builder_normalizes_start_url() {
        let config = TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("example.com/docs")
            .build()
            .expect("valid config");
        assert_eq!(config.start_url(), "https://example.com/docs");
        assert_eq!(
            config.snapshot_path(),
            Some(std::path::PathBuf::from("/tmp/trawl/.trawl-snapshot.json"))
        );
    }

    #[test]
    fn test_builder_rejects_bad_roster() {
        let err = TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://example.com")
            .workers(2, 0, 0)
            .build();
        assert!(err.is_err());

        let ok = TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://example.com")
            .workers(0, 0, 1)
            .build();
        assert!(ok.is_ok());
    }

    #[test]
    fn test_excluded_patterns_are_globs() {
        let config = TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://example.com")
            .excluded_patterns(vec!["https://example.com/private/*".to_string()])
            .build()
            .expect("valid config");
        let patterns = config.excluded_patterns_compiled();
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].is_match("https://example.com/private/a.html"));
        assert!(!patterns[0].is_match("https://exampleXcom/private/a.html"));
    }

    #[test]
    fn test_durations_and_toggles() {
        let config = TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://example.com")
            .time_limit_secs(90)
            .snapshot_interval_secs(0)
            .snapshots(false)
            .build()
            .expect("valid config");
        assert_eq!(config.time_limit(), Some(Duration::from_secs(90)));
        assert_eq!(config.snapshot_interval(), None);
        assert_eq!(config.snapshot_path(), None);
    }

    #[test]
    fn test_serde_roundtrip_recompiles_patterns() {
        let config = TrawlConfig::builder()
            .storage_dir("/tmp/trawl")
            .start_url("https://example.com")
            .excluded_patterns(vec!["*.zip".to_string()])
            .build()
            .expect("valid config");
        let json = serde_json::to_string(&config).expect("serialize");
        let mut back: TrawlConfig = serde_json::from_str(&json).expect("deserialize");
        assert!(back.excluded_patterns_compiled().is_empty());
        back.compile_excluded_patterns().expect("recompile");
        assert!(back.excluded_patterns_compiled()[0].is_match("https://example.com/a.zip"));
    }
}
