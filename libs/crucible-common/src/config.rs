// Engine configuration
// Passed explicitly into the compilation manager and orchestrator; never read globally.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// How reference and solution outputs are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonMode {
    /// Byte-for-byte equality
    Exact,
    /// Leading and trailing whitespace ignored
    #[default]
    Trimmed,
    /// Whitespace-separated token sequences must match
    Tokens,
}

impl fmt::Display for ComparisonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonMode::Exact => "exact",
            ComparisonMode::Trimmed => "trimmed",
            ComparisonMode::Tokens => "tokens",
        };
        f.write_str(s)
    }
}

impl FromStr for ComparisonMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" | "bytes" => Ok(ComparisonMode::Exact),
            "trimmed" | "trim" => Ok(ComparisonMode::Trimmed),
            "tokens" | "tokenized" | "whitespace" => Ok(ComparisonMode::Tokens),
            other => Err(format!("unknown comparison mode: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Wall-clock limit for solution and reference stages
    pub time_limit_ms: u64,
    pub generator_timeout_ms: u64,
    pub validator_timeout_ms: u64,
    pub compile_timeout_ms: u64,
    /// Per-stream capture bound; extra bytes are drained and dropped
    pub output_limit_bytes: usize,
    /// Maximum test cases in flight
    pub workers: usize,
    pub comparison: ComparisonMode,
    /// Address-space limit for stage processes
    pub memory_limit_mb: Option<u64>,
    /// Root of the artifact cache
    pub cache_dir: PathBuf,
    /// When set, case inputs and solution outputs are written here
    pub io_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            time_limit_ms: 5_000,
            generator_timeout_ms: 10_000,
            validator_timeout_ms: 10_000,
            compile_timeout_ms: 60_000,
            output_limit_bytes: 16 * 1024 * 1024,
            workers: default_workers(),
            comparison: ComparisonMode::default(),
            memory_limit_mb: None,
            cache_dir: std::env::temp_dir().join("crucible-cache"),
            io_dir: None,
        }
    }
}

/// CPU cores - 1, at least 1, at most 8
pub fn default_workers() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.saturating_sub(1).clamp(1, 8)
}

impl EngineConfig {
    /// Defaults overridden by `CRUCIBLE_*` environment variables.
    /// Unparseable values are logged and ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_parse("CRUCIBLE_TIME_LIMIT_MS") {
            config.time_limit_ms = v;
        }
        if let Some(v) = env_parse("CRUCIBLE_GENERATOR_TIMEOUT_MS") {
            config.generator_timeout_ms = v;
        }
        if let Some(v) = env_parse("CRUCIBLE_VALIDATOR_TIMEOUT_MS") {
            config.validator_timeout_ms = v;
        }
        if let Some(v) = env_parse("CRUCIBLE_COMPILE_TIMEOUT_MS") {
            config.compile_timeout_ms = v;
        }
        if let Some(v) = env_parse("CRUCIBLE_OUTPUT_LIMIT_BYTES") {
            config.output_limit_bytes = v;
        }
        if let Some(v) = env_parse::<usize>("CRUCIBLE_WORKERS") {
            config.workers = v.max(1);
        }
        if let Some(v) = env_parse("CRUCIBLE_COMPARISON") {
            config.comparison = v;
        }
        if let Some(v) = env_parse("CRUCIBLE_MEMORY_LIMIT_MB") {
            config.memory_limit_mb = Some(v);
        }
        if let Ok(dir) = std::env::var("CRUCIBLE_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("CRUCIBLE_IO_DIR") {
            config.io_dir = Some(PathBuf::from(dir));
        }

        config
    }

    pub fn time_limit(&self) -> Duration {
        Duration::from_millis(self.time_limit_ms)
    }

    pub fn generator_timeout(&self) -> Duration {
        Duration::from_millis(self.generator_timeout_ms)
    }

    pub fn validator_timeout(&self) -> Duration {
        Duration::from_millis(self.validator_timeout_ms)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = key, value = %raw, "Ignoring invalid configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.time_limit(), Duration::from_secs(5));
        assert_eq!(config.comparison, ComparisonMode::Trimmed);
        assert!(config.workers >= 1 && config.workers <= 8);
        assert!(config.memory_limit_mb.is_none());
        assert!(config.io_dir.is_none());
    }

    #[test]
    fn test_comparison_mode_parse() {
        assert_eq!("exact".parse::<ComparisonMode>().unwrap(), ComparisonMode::Exact);
        assert_eq!("Tokens".parse::<ComparisonMode>().unwrap(), ComparisonMode::Tokens);
        assert!("fuzzy".parse::<ComparisonMode>().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"time_limit_ms": 250, "comparison": "tokens"}"#).unwrap();
        assert_eq!(config.time_limit_ms, 250);
        assert_eq!(config.comparison, ComparisonMode::Tokens);
        assert_eq!(config.generator_timeout_ms, 10_000);
    }
}
