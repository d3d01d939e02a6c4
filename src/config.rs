use serde::{Deserialize, Serialize};
use std::path::Path;
use stratadb_core::params::{NANOS_PER_DAY, NANOS_PER_HOUR, NANOS_PER_MINUTE, NANOS_PER_SECOND};
use stratadb_core::{DatabaseParams, Result, StrataError, POINT_SIZE};

/// Human-editable database parameters as stored in `params.json`. Durations
/// are strings like `"1h"`, `"60s"`, `"10ms"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub duration: String,
    pub retention: String,
    pub resolution: String,

    /// Byte size of segment files.
    #[serde(default = "default_segment_size")]
    pub segment_size: u64,

    pub max_ro_epochs: u64,
    pub max_rw_epochs: u64,
}

fn default_segment_size() -> u64 {
    16 * 1024 * 1024 // 16MB
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            duration: "1h".to_string(),
            retention: "7d".to_string(),
            resolution: "1m".to_string(),
            segment_size: default_segment_size(),
            max_ro_epochs: 2,
            max_rw_epochs: 2,
        }
    }
}

impl DatabaseConfig {
    /// Load configuration from a file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve duration strings into validated engine parameters.
    pub fn to_params(&self) -> Result<DatabaseParams> {
        let params = DatabaseParams {
            duration: parse_duration(&self.duration)?,
            retention: parse_duration(&self.retention)?,
            resolution: parse_duration(&self.resolution)?,
            payload_size: POINT_SIZE as u64,
            segment_size: self.segment_size,
            max_ro_epochs: self.max_ro_epochs,
            max_rw_epochs: self.max_rw_epochs,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Parse a duration string like `"1h"`, `"90s"` or `"250ms"` into
/// nanoseconds. Units: `ns`, `us`, `ms`, `s`, `m`, `h`, `d`.
pub fn parse_duration(text: &str) -> Result<i64> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| StrataError::InvalidOptions(format!("duration {:?} has no unit", text)))?;
    let (value, unit) = text.split_at(split);
    let value: i64 = value
        .parse()
        .map_err(|_| StrataError::InvalidOptions(format!("bad duration value {:?}", text)))?;
    let scale = match unit {
        "ns" => 1,
        "us" => 1_000,
        "ms" => 1_000_000,
        "s" => NANOS_PER_SECOND,
        "m" => NANOS_PER_MINUTE,
        "h" => NANOS_PER_HOUR,
        "d" => NANOS_PER_DAY,
        _ => {
            return Err(StrataError::InvalidOptions(format!(
                "unknown duration unit {:?}",
                unit
            )))
        }
    };
    Ok(value * scale)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10ns").unwrap(), 10);
        assert_eq!(parse_duration("250ms").unwrap(), 250_000_000);
        assert_eq!(parse_duration("60s").unwrap(), 60 * NANOS_PER_SECOND);
        assert_eq!(parse_duration("1h").unwrap(), NANOS_PER_HOUR);
        assert_eq!(parse_duration("7d").unwrap(), 7 * NANOS_PER_DAY);

        assert!(parse_duration("1x").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10").is_err());
    }

    #[test]
    fn test_default_config_resolves() {
        let params = DatabaseConfig::default().to_params().unwrap();
        assert_eq!(params.duration, NANOS_PER_HOUR);
        assert_eq!(params.record_len(), 60);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("params.json");

        let config = DatabaseConfig {
            duration: "10s".to_string(),
            retention: "40s".to_string(),
            resolution: "1s".to_string(),
            ..DatabaseConfig::default()
        };
        config.to_file(&path).unwrap();

        let loaded = DatabaseConfig::from_file(&path).unwrap();
        assert_eq!(loaded.duration, "10s");
        assert_eq!(loaded.to_params().unwrap().record_len(), 10);
    }

    #[test]
    fn test_inconsistent_durations_rejected() {
        let config = DatabaseConfig {
            duration: "10s".to_string(),
            retention: "15s".to_string(), // not a multiple of duration
            resolution: "1s".to_string(),
            ..DatabaseConfig::default()
        };
        assert!(config.to_params().is_err());
    }
}
