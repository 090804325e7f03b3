//! Parser and driver settings

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::core::command::{CommandKind, CommandSpec, DEFAULT_MAX_RESPONSE_LEN, DEFAULT_POLL_INTERVAL_MS};
use crate::core::driver::Route;
use crate::core::error::ConfigError;
use crate::core::parser::{ParticleLayout, RecordRole};
use crate::core::stream::{RecognizerSpec, TextRecognizer, DEFAULT_MAX_PENDING};

/// Record parser configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Recognizers, in registration order
    pub recognizers: Vec<RecognizerSpec<RecordRole>>,
    /// Header keys that must all be seen before metadata is emitted
    #[serde(default)]
    pub required_header_keys: Vec<String>,
    /// Bytes read from the source per refill
    #[serde(default = "default_read_size")]
    pub read_size: usize,
    /// Unmatched bytes held before they are flushed as non-data
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// Particle layout for delimited text records
    #[serde(default)]
    pub particles: Option<ParticleLayout>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            recognizers: Vec::new(),
            required_header_keys: Vec::new(),
            read_size: default_read_size(),
            max_pending: default_max_pending(),
            particles: None,
        }
    }
}

impl ParserConfig {
    /// Load from a TOML or YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.read_size == 0 {
            return Err(ConfigError::InvalidValue("read_size must be greater than 0".into()));
        }
        if self.max_pending == 0 {
            return Err(ConfigError::InvalidValue("max_pending must be greater than 0".into()));
        }

        let has_role = |role: RecordRole| self.recognizers.iter().any(|r| *r.role() == role);
        if !has_role(RecordRole::Data) {
            return Err(ConfigError::MissingRecognizer("data".into()));
        }
        if !self.required_header_keys.is_empty() && !has_role(RecordRole::Header) {
            return Err(ConfigError::MissingRecognizer("header".into()));
        }

        for spec in &self.recognizers {
            spec.build()?;
            if let RecognizerSpec::Text { name, pattern, role: RecordRole::Header } = spec {
                if TextRecognizer::new(name, pattern)?.group_count() < 2 {
                    return Err(ConfigError::InvalidValue(format!(
                        "header recognizer `{name}` needs a key group and a value group"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Command definitions, one per command the state machine issues
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandTable {
    /// Status query
    #[serde(default)]
    pub status: Option<CommandSpec>,
    /// Start streaming
    #[serde(default)]
    pub data_on: Option<CommandSpec>,
    /// Stop streaming
    #[serde(default)]
    pub data_off: Option<CommandSpec>,
    /// Start leveling
    #[serde(default)]
    pub level_on: Option<CommandSpec>,
    /// Stop leveling
    #[serde(default)]
    pub level_off: Option<CommandSpec>,
}

impl CommandTable {
    /// Definition for a command
    pub fn get(&self, kind: CommandKind) -> Option<&CommandSpec> {
        match kind {
            CommandKind::Status => self.status.as_ref(),
            CommandKind::DataOn => self.data_on.as_ref(),
            CommandKind::DataOff => self.data_off.as_ref(),
            CommandKind::LevelOn => self.level_on.as_ref(),
            CommandKind::LevelOff => self.level_off.as_ref(),
        }
    }
}

/// Instrument driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Inbound recognizers with their routes, in registration order
    pub recognizers: Vec<RecognizerSpec<Route>>,
    /// Command definitions
    #[serde(default)]
    pub commands: CommandTable,
    /// Leveling deadline in milliseconds
    #[serde(default)]
    pub leveling_timeout_ms: u64,
    /// Response poll interval in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Regex over the status reply that means the device is streaming
    #[serde(default)]
    pub autosample_pattern: Option<String>,
    /// Ceiling on buffered response bytes
    #[serde(default = "default_max_response_len")]
    pub max_response_len: usize,
    /// Unmatched inbound bytes held before they are flushed
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            recognizers: Vec::new(),
            commands: CommandTable::default(),
            leveling_timeout_ms: 0,
            poll_interval_ms: default_poll_interval_ms(),
            autosample_pattern: None,
            max_response_len: default_max_response_len(),
            max_pending: default_max_pending(),
        }
    }
}

impl DriverConfig {
    /// Load from a TOML or YAML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        for kind in CommandKind::ALL {
            let spec = self
                .commands
                .get(kind)
                .ok_or_else(|| ConfigError::MissingCommand(kind.name().into()))?;
            spec.compile(kind.name())?;
        }
        if self.leveling_timeout_ms == 0 {
            return Err(ConfigError::MissingTimeout("leveling_timeout_ms".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue("poll_interval_ms must be greater than 0".into()));
        }
        if !self.recognizers.iter().any(|r| *r.role() == Route::Response) {
            return Err(ConfigError::MissingRecognizer("response".into()));
        }
        for spec in &self.recognizers {
            spec.build()?;
        }
        if let Some(pattern) = &self.autosample_pattern {
            regex::bytes::Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                name: "autosample_pattern".into(),
                source,
            })?;
        }
        Ok(())
    }
}

/// Save a configuration as TOML
pub fn save_toml<T: Serialize>(config: &T, path: &Path) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config).map_err(|e| ConfigError::Parse(e.to_string()))?;
    std::fs::write(path, content)?;
    Ok(())
}

fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml" | "yml") => Ok(serde_yaml::from_str(&content)?),
        _ => Ok(toml::from_str(&content)?),
    }
}

fn default_read_size() -> usize {
    4096
}

fn default_max_pending() -> usize {
    DEFAULT_MAX_PENDING
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_response_len() -> usize {
    DEFAULT_MAX_RESPONSE_LEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::state_machine::ProtocolEvent;
    use std::io::Write;

    const DRIVER_TOML: &str = r#"
leveling_timeout_ms = 5000
autosample_pattern = "DATA_ON"

[[recognizers]]
kind = "text"
name = "leveled"
pattern = '(?m)^Leveled!\r?\n'
role = { event = "leveling_complete" }

[[recognizers]]
kind = "binary"
name = "accel"
tag = 0xCB
frame_len = 45
role = "sample"

[[recognizers]]
kind = "text"
name = "line"
pattern = '(?m)^[^\r\n]*\r?\n'
role = "response"

[commands.status]
command = "STATUS\r\n"
expected = 'DATA_(ON|OFF)'
timeout_ms = 1000

[commands.data_on]
command = "DATA_ON\r\n"
expected = 'DATA_ON\r?\n'
timeout_ms = 1000

[commands.data_off]
command = "DATA_OFF\r\n"
expected = 'DATA_OFF\r?\n'
timeout_ms = 1000

[commands.level_on]
command = "LEVEL_ON\r\n"
expected = 'LEVEL_ON\r?\n'
timeout_ms = 1000
write_delay_ms = 5

[commands.level_off]
command = "LEVEL_OFF\r\n"
expected = 'LEVEL_OFF\r?\n'
timeout_ms = 1000
"#;

    #[test]
    fn test_driver_config_from_toml() {
        let config = DriverConfig::from_toml_str(DRIVER_TOML).unwrap();
        assert_eq!(config.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(config.recognizers.len(), 3);
        assert_eq!(*config.recognizers[0].role(), Route::Event(ProtocolEvent::LevelingComplete));
        assert_eq!(*config.recognizers[1].role(), Route::Sample);
        assert_eq!(config.commands.level_on.as_ref().map(|c| c.write_delay_ms), Some(5));
    }

    #[test]
    fn test_driver_config_missing_command() {
        let content = DRIVER_TOML.replace("[commands.level_off]", "[commands.unused]");
        let err = toml::from_str::<DriverConfig>(&content)
            .map_err(ConfigError::from)
            .and_then(|c| c.validate().map(|_| c));
        assert!(matches!(err, Err(ConfigError::MissingCommand(name)) if name == "level_off"));
    }

    #[test]
    fn test_driver_config_missing_leveling_timeout() {
        let content = DRIVER_TOML.replace("leveling_timeout_ms = 5000", "");
        let err = DriverConfig::from_toml_str(&content).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTimeout(_)));
    }

    #[test]
    fn test_parser_config_requires_header_recognizer() {
        let config = ParserConfig {
            recognizers: vec![RecognizerSpec::Text {
                name: "data".into(),
                pattern: r"(?m)^(\d+)\n".into(),
                role: RecordRole::Data,
            }],
            required_header_keys: vec!["Source File".into()],
            ..ParserConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::MissingRecognizer(r)) if r == "header"));
    }

    #[test]
    fn test_parser_config_header_groups() {
        let config = ParserConfig {
            recognizers: vec![
                RecognizerSpec::Text {
                    name: "header".into(),
                    pattern: r"(?m)^([^:\n]*):.*\n".into(),
                    role: RecordRole::Header,
                },
                RecognizerSpec::Text { name: "data".into(), pattern: r"\d+\n".into(), role: RecordRole::Data },
            ],
            ..ParserConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_parser_config_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "recognizers:\n  - kind: binary\n    name: accel\n    tag: 203\n    frame_len: 45\n    checksum: crc16_ccitt\n    role: data\nread_size: 512\n"
        )
        .unwrap();

        let config = ParserConfig::load(file.path()).unwrap();
        assert_eq!(config.read_size, 512);
        assert!(config.particles.is_none());
        assert!(matches!(
            config.recognizers[0],
            RecognizerSpec::Binary { tag: 0xCB, frame_len: 45, .. }
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("driver.toml");
        let config = DriverConfig::from_toml_str(DRIVER_TOML).unwrap();
        save_toml(&config, &path).unwrap();
        let reloaded = DriverConfig::load(&path).unwrap();
        assert_eq!(reloaded.leveling_timeout_ms, 5000);
        assert_eq!(reloaded.recognizers.len(), 3);
    }

    #[test]
    fn test_invalid_pattern() {
        let content = DRIVER_TOML.replace("autosample_pattern = \"DATA_ON\"", "autosample_pattern = \"(\"");
        assert!(matches!(
            DriverConfig::from_toml_str(&content),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
