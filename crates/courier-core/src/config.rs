use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{CourierError, CourierResult};

/// Largest incremental MAC chunk any reader will buffer (16 MiB).
pub const MAX_INCREMENTAL_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// Top-level configuration (loaded from courier.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    pub logging: LoggingConfig,
    pub attachment: AttachmentConfig,
    pub envelope: EnvelopeConfig,
}

impl CourierConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error: defaults are returned and a warning is
    /// logged. A file that exists but fails to parse is an error.
    pub fn load(path: &Path) -> CourierResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| CourierError::Config(format!("parsing {}: {e}", path.display())))
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> CourierResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| CourierError::Config(e.to_string()))?;
        config.attachment.validate()?;
        config.envelope.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Attachment stream cipher tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentConfig {
    /// Read buffer used when pulling ciphertext from the source (default: 8 KiB)
    pub read_buffer_size: usize,
    /// Produce an incremental MAC digest when encrypting uploads
    pub incremental_mac: bool,
    /// Smallest incremental MAC chunk (default: 64 KiB)
    pub min_chunk_size: usize,
    /// Largest incremental MAC chunk (default: 2 MiB)
    pub max_chunk_size: usize,
    /// Target size of the whole incremental digest (default: 8 KiB)
    pub target_digest_size: usize,
    /// Pad plaintext to a size bucket before encrypting uploads
    pub pad_uploads: bool,
}

impl Default for AttachmentConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: 8 * 1024,
            incremental_mac: true,
            min_chunk_size: 64 * 1024,
            max_chunk_size: 2 * 1024 * 1024,
            target_digest_size: 8 * 1024,
            pad_uploads: true,
        }
    }
}

impl AttachmentConfig {
    fn validate(&self) -> CourierResult<()> {
        if self.read_buffer_size == 0 {
            return Err(CourierError::Config(
                "attachment.read_buffer_size must be non-zero".into(),
            ));
        }
        if self.min_chunk_size == 0 || self.min_chunk_size > self.max_chunk_size {
            return Err(CourierError::Config(format!(
                "attachment chunk bounds invalid: min {} max {}",
                self.min_chunk_size, self.max_chunk_size
            )));
        }
        if self.max_chunk_size > MAX_INCREMENTAL_CHUNK_SIZE {
            return Err(CourierError::Config(format!(
                "attachment.max_chunk_size {} above limit {MAX_INCREMENTAL_CHUNK_SIZE}",
                self.max_chunk_size
            )));
        }
        if self.target_digest_size < 32 {
            return Err(CourierError::Config(
                "attachment.target_digest_size must hold at least one MAC".into(),
            ));
        }
        Ok(())
    }
}

/// Envelope transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    /// Transport padding block size in bytes (default: 160)
    pub padding_block_size: usize,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            padding_block_size: 160,
        }
    }
}

impl EnvelopeConfig {
    fn validate(&self) -> CourierResult<()> {
        if self.padding_block_size == 0 {
            return Err(CourierError::Config(
                "envelope.padding_block_size must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[logging]
level = "debug"
format = "json"

[attachment]
read_buffer_size = 4096
incremental_mac = false
min_chunk_size = 32768
max_chunk_size = 1048576
target_digest_size = 4096
pad_uploads = false

[envelope]
padding_block_size = 80
"#;
        let config = CourierConfig::from_toml(toml_str).unwrap();

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.attachment.read_buffer_size, 4096);
        assert!(!config.attachment.incremental_mac);
        assert_eq!(config.attachment.min_chunk_size, 32768);
        assert_eq!(config.attachment.max_chunk_size, 1048576);
        assert!(!config.attachment.pad_uploads);
        assert_eq!(config.envelope.padding_block_size, 80);
    }

    #[test]
    fn test_parse_defaults() {
        let config = CourierConfig::from_toml("").unwrap();

        assert_eq!(config.logging.level, "info");
        assert_eq!(config.logging.format, "text");
        assert_eq!(config.attachment.read_buffer_size, 8 * 1024);
        assert!(config.attachment.incremental_mac);
        assert_eq!(config.attachment.min_chunk_size, 64 * 1024);
        assert_eq!(config.envelope.padding_block_size, 160);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[attachment]
min_chunk_size = 131072
"#;
        let config = CourierConfig::from_toml(toml_str).unwrap();

        // Overridden
        assert_eq!(config.attachment.min_chunk_size, 131072);
        // Defaults
        assert_eq!(config.attachment.max_chunk_size, 2 * 1024 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_inverted_chunk_bounds() {
        let toml_str = r#"
[attachment]
min_chunk_size = 4194304
max_chunk_size = 65536
"#;
        let err = CourierConfig::from_toml(toml_str).unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
    }

    #[test]
    fn test_rejects_chunk_size_above_reader_limit() {
        let toml_str = format!(
            "[attachment]\nmax_chunk_size = {}\n",
            MAX_INCREMENTAL_CHUNK_SIZE + 1
        );
        let err = CourierConfig::from_toml(&toml_str).unwrap_err();
        assert!(err.to_string().contains("max_chunk_size"));
    }

    #[test]
    fn test_rejects_zero_padding_block() {
        let err = CourierConfig::from_toml("[envelope]\npadding_block_size = 0\n").unwrap_err();
        assert!(matches!(err, CourierError::Config(_)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = CourierConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.envelope.padding_block_size, 160);
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("courier.toml");
        std::fs::write(&path, "[logging]\nlevel = \"trace\"\n").unwrap();

        let config = CourierConfig::load(&path).unwrap();
        assert_eq!(config.logging.level, "trace");
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = CourierConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed = CourierConfig::from_toml(&toml_str).unwrap();

        assert_eq!(config.logging.level, parsed.logging.level);
        assert_eq!(
            config.attachment.max_chunk_size,
            parsed.attachment.max_chunk_size
        );
        assert_eq!(
            config.envelope.padding_block_size,
            parsed.envelope.padding_block_size
        );
    }
}
