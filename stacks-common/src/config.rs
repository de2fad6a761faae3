//! Configuration loading
//!
//! Bootstrap configuration comes from a TOML file; every section has built-in
//! defaults so a missing file (or a partial one) still yields a usable config.
//!
//! Config file resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `STACKS_CONFIG` environment variable
//! 3. `{config_dir}/stacks/config.toml`
//! 4. Built-in defaults

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "STACKS_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StacksConfig {
    /// SQLite database file
    pub database_path: PathBuf,
    pub roots: RootsConfig,
    pub workers: WorkersConfig,
    pub retry: RetryConfig,
    pub checksum: ChecksumConfig,
    pub transcode: TranscodeConfig,
    pub validator: ValidatorConfig,
    pub placement: PlacementConfig,
    pub scan: ScanConfig,
    pub quarantine: QuarantineConfig,
    pub logging: LoggingConfig,
}

impl Default for StacksConfig {
    fn default() -> Self {
        let data_root = default_data_root();
        Self {
            database_path: data_root.join("stacks.db"),
            roots: RootsConfig::under(&data_root),
            workers: WorkersConfig::default(),
            retry: RetryConfig::default(),
            checksum: ChecksumConfig::default(),
            transcode: TranscodeConfig::default(),
            validator: ValidatorConfig::default(),
            placement: PlacementConfig::default(),
            scan: ScanConfig::default(),
            quarantine: QuarantineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Per-stage directory roots
///
/// Production roots are not configured here: they come from `libraries` rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RootsConfig {
    pub inbound: PathBuf,
    pub staging: PathBuf,
    pub quarantine: PathBuf,
    pub transcode_cache: PathBuf,
}

impl RootsConfig {
    /// Standard layout below a single data folder
    pub fn under(root: &Path) -> Self {
        Self {
            inbound: root.join("inbound"),
            staging: root.join("staging"),
            quarantine: root.join("quarantine"),
            transcode_cache: root.join("transcode-cache"),
        }
    }
}

impl Default for RootsConfig {
    fn default() -> Self {
        Self::under(&default_data_root())
    }
}

/// Per-stage concurrency
///
/// Validation is cheap, encoding is process-heavy: each stage gets its own limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkersConfig {
    pub scan: usize,
    pub ingest: usize,
    pub promote: usize,
    pub transcode: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            scan: 4,
            ingest: 4,
            promote: 2,
            transcode: 2,
        }
    }
}

/// Retry policy for transient failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
        }
    }
}

/// Content hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    /// Collision resistant, the default
    #[default]
    Sha256,
    /// Fast, non-cryptographic. Digests are not comparable with SHA-256 ones.
    Crc32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChecksumConfig {
    pub algorithm: ChecksumAlgorithm,
    /// Cache entries older than this are swept regardless of validity
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            algorithm: ChecksumAlgorithm::Sha256,
            ttl_secs: 3600,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscodeConfig {
    /// Byte budget of the rendition cache
    pub cache_max_bytes: u64,
    /// Wall-clock limit for one encoder run
    pub encoder_timeout_secs: u64,
    pub ffmpeg_path: PathBuf,
    pub sweep_interval_secs: u64,
}

impl Default for TranscodeConfig {
    fn default() -> Self {
        Self {
            cache_max_bytes: 2 * 1024 * 1024 * 1024,
            encoder_timeout_secs: 300,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            sweep_interval_secs: 600,
        }
    }
}

/// Validator bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub max_file_size_bytes: u64,
    /// Lowercase extensions without the dot
    pub allowed_extensions: Vec<String>,
    pub min_bitrate_kbps: u32,
    /// Applies to lossy formats only; lossless bitrate is unconstrained
    pub max_lossy_bitrate_kbps: u32,
    pub min_duration_secs: f64,
    pub max_duration_secs: f64,
    pub min_sample_rate: u32,
    pub max_sample_rate: u32,
    pub min_channels: u8,
    pub max_channels: u8,
    pub max_artwork_bytes: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 2 * 1024 * 1024 * 1024,
            allowed_extensions: ["mp3", "flac", "ogg", "oga", "opus", "m4a", "aac", "wav", "aiff", "aif", "wv"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            min_bitrate_kbps: 64,
            max_lossy_bitrate_kbps: 330,
            min_duration_secs: 1.0,
            max_duration_secs: 4.0 * 3600.0,
            min_sample_rate: 8000,
            max_sample_rate: 192_000,
            min_channels: 1,
            max_channels: 8,
            max_artwork_bytes: 10 * 1024 * 1024,
        }
    }
}

/// Fallback placement strategy when no explicit or range rule matches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlacementStrategyKind {
    #[default]
    ConsistentHash,
    RoundRobin,
    FirstCharModulo,
    LeastSize,
    FirstAvailable,
}

/// Alphabetic range rule: codes whose first character is in `start..=end` go to `library`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeRule {
    pub start: char,
    pub end: char,
    pub library: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub strategy: PlacementStrategyKind,
    pub hash_salt: String,
    /// Directory code → library name
    pub explicit: BTreeMap<String, String>,
    pub ranges: Vec<RangeRule>,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            strategy: PlacementStrategyKind::ConsistentHash,
            hash_salt: "stacks".to_string(),
            explicit: BTreeMap::new(),
            ranges: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Stop discovering after this many files
    pub max_files: Option<usize>,
    /// Capacity of the walker → worker path channel
    pub channel_buffer: usize,
    pub ignore_patterns: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            max_files: None,
            channel_buffer: 256,
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    pub max_path_len: usize,
    pub cleanup_max_age_days: u32,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            max_path_len: 4096,
            cleanup_max_age_days: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl StacksConfig {
    /// Parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: StacksConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the config file and load it, or fall back to defaults
    pub fn resolve(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) => Self::load(&path),
            None => {
                debug!("No config file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject inverted or zero bounds
    pub fn validate(&self) -> Result<()> {
        let v = &self.validator;
        if v.min_duration_secs > v.max_duration_secs {
            return Err(Error::Config("validator.min_duration_secs exceeds max_duration_secs".into()));
        }
        if v.min_sample_rate > v.max_sample_rate {
            return Err(Error::Config("validator.min_sample_rate exceeds max_sample_rate".into()));
        }
        if v.min_channels > v.max_channels {
            return Err(Error::Config("validator.min_channels exceeds max_channels".into()));
        }
        if v.min_bitrate_kbps > v.max_lossy_bitrate_kbps {
            return Err(Error::Config(
                "validator.min_bitrate_kbps exceeds max_lossy_bitrate_kbps".into(),
            ));
        }
        for rule in &self.placement.ranges {
            if rule.start.to_ascii_uppercase() > rule.end.to_ascii_uppercase() {
                return Err(Error::Config(format!(
                    "placement range {}-{} is inverted",
                    rule.start, rule.end
                )));
            }
        }
        let w = &self.workers;
        if w.scan == 0 || w.ingest == 0 || w.promote == 0 || w.transcode == 0 {
            return Err(Error::Config("worker counts must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Find the config file following the priority order in the module docs
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("stacks").join("config.toml"))
        .filter(|p| p.exists())
}

/// OS-dependent default data folder
fn default_data_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("stacks"))
        .unwrap_or_else(|| PathBuf::from("./stacks_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StacksConfig::from_toml_str(
            r#"
            [transcode]
            cache_max_bytes = 1048576

            [placement]
            strategy = "round_robin"
            "#,
        )
        .unwrap();

        assert_eq!(config.transcode.cache_max_bytes, 1_048_576);
        assert_eq!(config.transcode.encoder_timeout_secs, 300);
        assert_eq!(config.placement.strategy, PlacementStrategyKind::RoundRobin);
        assert_eq!(config.checksum.algorithm, ChecksumAlgorithm::Sha256);
        assert!(config.validator.allowed_extensions.contains(&"flac".to_string()));
    }

    #[test]
    fn test_placement_rules_parse() {
        let config = StacksConfig::from_toml_str(
            r#"
            [placement]
            hash_salt = "pepper"
            explicit = { BEA = "pool-b" }
            ranges = [ { start = "A", end = "C", library = "pool-a" } ]
            "#,
        )
        .unwrap();

        assert_eq!(config.placement.explicit.get("BEA").map(String::as_str), Some("pool-b"));
        assert_eq!(config.placement.ranges[0].start, 'A');
        assert_eq!(config.placement.ranges[0].library, "pool-a");
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        let result = StacksConfig::from_toml_str(
            r#"
            [validator]
            min_channels = 4
            max_channels = 2
            "#,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = StacksConfig::from_toml_str(
            r#"
            [placement]
            strategy = "random"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_cli_path_wins() {
        let path = Path::new("/tmp/explicit.toml");
        assert_eq!(resolve_config_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database_path = \"/tmp/x.db\"\n[workers]\ningest = 8\n").unwrap();

        let config = StacksConfig::load(&path).unwrap();
        assert_eq!(config.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(config.workers.ingest, 8);
        assert_eq!(config.workers.promote, 2);
    }
}
