//! Runtime configuration for mcat-ingest
//!
//! The TOML schema and file discovery live in `mcat_common::config`. This
//! module layers the command-line/environment tier on top and derives the
//! engine's policy types from the resolved values.

use mcat_common::config::{ProviderConfig, RetryConfig, TomlConfig};
use std::path::PathBuf;
use std::time::Duration;

use crate::services::TmdbConfig;
use crate::utils::RetryPolicy;

/// Values from the command line (or their `MCAT_*` environment fallbacks)
///
/// `None`/empty means "not given", leaving the TOML or default value in place.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub workers: Option<usize>,
    pub roots: Vec<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub api_key: Option<String>,
    pub log_level: Option<String>,
}

impl Overrides {
    pub fn apply(self, config: &mut TomlConfig) {
        if let Some(workers) = self.workers {
            config.workers.count = workers;
        }
        if !self.roots.is_empty() {
            config.library.roots = self.roots;
        }
        if let Some(output_dir) = self.output_dir {
            config.library.output_dir = output_dir;
        }
        if let Some(key) = self.api_key.filter(|k| !k.trim().is_empty()) {
            config.provider.api_key = Some(key);
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
    }
}

pub fn retry_policy(config: &RetryConfig) -> RetryPolicy {
    RetryPolicy::new(config.max_attempts, config.initial_backoff())
}

/// Provider client settings, or `None` when no API key is configured
pub fn tmdb_config(provider: &ProviderConfig) -> Option<TmdbConfig> {
    let api_key = provider
        .api_key
        .as_deref()
        .map(str::trim)
        .filter(|k| !k.is_empty())?;

    Some(TmdbConfig {
        base_url: provider.base_url.clone(),
        api_key: api_key.to_string(),
        requests_per_second: provider.requests_per_second,
        timeout: Duration::from_secs(provider.timeout_secs),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_win_over_toml() {
        let mut config: TomlConfig = toml::from_str(
            r#"
            [workers]
            count = 2

            [library]
            roots = ["/srv/movies"]
            output_dir = "/srv/out"

            [provider]
            api_key = "from-file"
            "#,
        )
        .unwrap();

        Overrides {
            workers: Some(8),
            roots: vec![PathBuf::from("/mnt/incoming")],
            output_dir: None,
            api_key: Some("from-env".to_string()),
            log_level: None,
        }
        .apply(&mut config);

        assert_eq!(config.workers.count, 8);
        assert_eq!(config.library.roots, vec![PathBuf::from("/mnt/incoming")]);
        assert_eq!(config.library.output_dir, PathBuf::from("/srv/out"));
        assert_eq!(config.provider.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn test_empty_overrides_keep_toml_values() {
        let mut config = TomlConfig::default();
        config.provider.api_key = Some("kept".to_string());
        let before = config.clone();

        Overrides {
            api_key: Some("   ".to_string()),
            ..Overrides::default()
        }
        .apply(&mut config);

        assert_eq!(config, before);
    }

    #[test]
    fn test_tmdb_config_requires_key() {
        let mut provider = ProviderConfig::default();
        assert!(tmdb_config(&provider).is_none());

        provider.api_key = Some(" abc123 ".to_string());
        let tmdb = tmdb_config(&provider).unwrap();
        assert_eq!(tmdb.api_key, "abc123");
        assert_eq!(tmdb.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let policy = retry_policy(&RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 250,
        });
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_millis(250));
    }
}
