//! Process-wide engine configuration
//!
//! Everything here is read-only once the engine is built. The compiler log
//! patterns live here rather than in the orchestrator because they track
//! the installed toolchain version, not the engine's logic.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Wall-clock bound for one compiler pass
pub const DEFAULT_COMPILE_TIMEOUT_SECS: u64 = 120;
/// Wall-clock bound for one bibliography processor run
pub const DEFAULT_BIBLIOGRAPHY_TIMEOUT_SECS: u64 = 30;
/// Wall-clock bound for downloading one remote asset
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;
/// Wall-clock bound for a `--version` probe
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;
/// Total compiler passes, including the first one
pub const DEFAULT_MAX_PASSES: u32 = 3;
/// Largest remote asset accepted (25 MiB)
pub const DEFAULT_MAX_ASSET_BYTES: u64 = 25 * 1024 * 1024;

/// Substrings searched for in compiler output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPatterns {
    /// The compiler asks for another run
    pub rerun_requests: Vec<String>,
    /// A `\ref`-style reference could not be resolved
    pub undefined_references: Vec<String>,
    /// A citation could not be resolved, or a bibliography tool must run
    pub undefined_citations: Vec<String>,
}

impl Default for LogPatterns {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            rerun_requests: owned(&[
                "Rerun to get",
                "Label(s) may have changed",
                "Please rerun LaTeX",
                "Rerun LaTeX",
            ]),
            undefined_references: owned(&[
                "LaTeX Warning: Reference",
                "There were undefined references",
            ]),
            undefined_citations: owned(&[
                "LaTeX Warning: Citation",
                "Package natbib Warning: Citation",
                "There were undefined citations",
                "Please (re)run Biber",
                "Please (re)run BibTeX",
            ]),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub compile_timeout_secs: u64,
    pub bibliography_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    pub probe_timeout_secs: u64,
    /// Upper bound on compiler passes per request
    pub max_passes: u32,
    pub max_asset_bytes: u64,
    /// Bibliography processors, tried in order until one succeeds
    pub bibliography_processors: Vec<String>,
    /// Parent directory for per-request scratch trees (system temp dir if unset)
    #[serde(default)]
    pub scratch_root: Option<PathBuf>,
    #[serde(default)]
    pub log_patterns: LogPatterns,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compile_timeout_secs: DEFAULT_COMPILE_TIMEOUT_SECS,
            bibliography_timeout_secs: DEFAULT_BIBLIOGRAPHY_TIMEOUT_SECS,
            fetch_timeout_secs: DEFAULT_FETCH_TIMEOUT_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            max_passes: DEFAULT_MAX_PASSES,
            max_asset_bytes: DEFAULT_MAX_ASSET_BYTES,
            bibliography_processors: vec!["biber".to_string(), "bibtex".to_string()],
            scratch_root: None,
            log_patterns: LogPatterns::default(),
        }
    }
}

impl EngineConfig {
    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn bibliography_timeout(&self) -> Duration {
        Duration::from_secs(self.bibliography_timeout_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    /// Check the configuration for values the orchestrator cannot work with
    pub fn validate(&self) -> Result<(), EngineError> {
        // A bibliography run is only useful if a later pass can fold it in.
        if self.max_passes < 2 {
            return Err(EngineError::Config(format!(
                "max_passes must be at least 2, got {}",
                self.max_passes
            )));
        }

        let timeouts = [
            ("compile_timeout_secs", self.compile_timeout_secs),
            ("bibliography_timeout_secs", self.bibliography_timeout_secs),
            ("fetch_timeout_secs", self.fetch_timeout_secs),
            ("probe_timeout_secs", self.probe_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(EngineError::Config(format!("{} must be non-zero", name)));
            }
        }

        if self.bibliography_processors.is_empty() {
            return Err(EngineError::Config(
                "at least one bibliography processor is required".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.compile_timeout(), Duration::from_secs(120));
        assert_eq!(config.bibliography_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_passes, 3);
    }

    #[test]
    fn test_single_pass_budget_rejected() {
        let config = EngineConfig {
            max_passes: 1,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig {
            bibliography_timeout_secs: 0,
            ..EngineConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("bibliography_timeout_secs"));
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let json = serde_json::to_string(&EngineConfig::default()).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.log_patterns, LogPatterns::default());
        assert_eq!(parsed.bibliography_processors, vec!["biber", "bibtex"]);
    }
}
