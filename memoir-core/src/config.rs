//! Configuration
//!
//! [`MemoConfig`] is the per-function configuration snapshot. A handle keeps
//! its own copy, so changing one function's settings never affects another.
//! [`EngineSettings`] carries process-level defaults and is always passed
//! explicitly; there is no global configuration.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::codec::CodecSelector;
use crate::entry::ArtifactRole;
use crate::error::ConfigError;
use crate::expiry::ExpiryMode;
use crate::identity::sanitize_segment;

// ============================================================================
// WRITE MODE
// ============================================================================

/// What happens to an existing artifact when a new one is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Replace it.
    #[default]
    Overwrite,
    /// Archive it under a timestamped name and keep it in the history.
    Append,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overwrite => f.write_str("overwrite"),
            Self::Append => f.write_str("append"),
        }
    }
}

impl FromStr for WriteMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "overwrite" | "remove" => Ok(Self::Overwrite),
            "append" => Ok(Self::Append),
            other => Err(ConfigError::InvalidValue {
                field: "write_mode".to_string(),
                value: other.to_string(),
                reason: "expected overwrite or append".to_string(),
            }),
        }
    }
}

// ============================================================================
// MEMO CONFIG
// ============================================================================

/// Per-function memoization settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoConfig {
    /// When stored results stop being served.
    pub expiry: ExpiryMode,
    /// Codec for the input snapshot artifact.
    pub input_codec: CodecSelector,
    /// Codec for return values.
    pub output_codec: CodecSelector,
    /// Keyword arguments left out of the cache key.
    pub non_hashable_kwargs: BTreeSet<String>,
    pub write_mode: WriteMode,
    /// Optional path segment(s) placed before the function directory.
    pub prefix: Option<String>,
    /// Raise decode failures instead of treating them as a miss.
    pub surface_deserialization_errors: bool,
    /// Store a snapshot of the arguments next to every entry.
    pub persist_inputs: bool,
}

impl Default for MemoConfig {
    fn default() -> Self {
        Self {
            expiry: ExpiryMode::Never,
            input_codec: CodecSelector::Json,
            output_codec: CodecSelector::Auto,
            non_hashable_kwargs: BTreeSet::new(),
            write_mode: WriteMode::Overwrite,
            prefix: None,
            surface_deserialization_errors: false,
            persist_inputs: true,
        }
    }
}

impl MemoConfig {
    pub fn with_expiry(mut self, expiry: ExpiryMode) -> Self {
        self.expiry = expiry;
        self
    }

    pub fn with_ttl(self, ttl: Duration) -> Self {
        self.with_expiry(ExpiryMode::Ttl(ttl))
    }

    pub fn with_input_codec(mut self, codec: CodecSelector) -> Self {
        self.input_codec = codec;
        self
    }

    pub fn with_output_codec(mut self, codec: CodecSelector) -> Self {
        self.output_codec = codec;
        self
    }

    pub fn with_non_hashable_kwargs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.non_hashable_kwargs = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_write_mode(mut self, mode: WriteMode) -> Self {
        self.write_mode = mode;
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_surface_deserialization_errors(mut self, surface: bool) -> Self {
        self.surface_deserialization_errors = surface;
        self
    }

    pub fn with_persist_inputs(mut self, persist: bool) -> Self {
        self.persist_inputs = persist;
        self
    }

    /// Codec selector for an artifact role. Failures are always JSON so they
    /// stay readable by every process.
    pub fn codec_for(&self, role: ArtifactRole) -> CodecSelector {
        match role {
            ArtifactRole::Input => self.input_codec,
            ArtifactRole::Output => self.output_codec,
            ArtifactRole::Exception => CodecSelector::Json,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let ExpiryMode::Ttl(ttl) = self.expiry {
            if ttl.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "expiry".to_string(),
                    value: "ttl:0".to_string(),
                    reason: "ttl must be positive".to_string(),
                });
            }
        }

        if let Some(prefix) = &self.prefix {
            for segment in prefix.split('/') {
                if segment.is_empty() || segment == "." || segment == ".." {
                    return Err(ConfigError::InvalidValue {
                        field: "prefix".to_string(),
                        value: prefix.clone(),
                        reason: "segments must be non-empty and not . or ..".to_string(),
                    });
                }
                if sanitize_segment(segment) != segment {
                    return Err(ConfigError::InvalidValue {
                        field: "prefix".to_string(),
                        value: prefix.clone(),
                        reason: format!("segment {segment:?} contains unsupported characters"),
                    });
                }
            }
        }

        if let Some(name) = self.non_hashable_kwargs.iter().find(|n| n.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "non_hashable_kwargs".to_string(),
                value: format!("{name:?}"),
                reason: "excluded names must be non-empty".to_string(),
            });
        }

        Ok(())
    }
}

// ============================================================================
// ENGINE SETTINGS
// ============================================================================

/// Default storage location: a `memoir` directory under the system temp dir.
pub const DEFAULT_STORAGE_LOCATION: &str = "temp://";

/// Process-level settings: where artifacts live and the default config of
/// every function bound to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub storage_location: String,
    pub defaults: MemoConfig,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            storage_location: DEFAULT_STORAGE_LOCATION.to_string(),
            defaults: MemoConfig::default(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSettings {
    storage_location: Option<String>,
    prefix: Option<String>,
    ttl_secs: Option<u64>,
    expiry: Option<String>,
    write_mode: Option<String>,
    input_codec: Option<String>,
    output_codec: Option<String>,
    non_hashable_kwargs: Option<Vec<String>>,
    surface_deserialization_errors: Option<bool>,
    persist_inputs: Option<bool>,
}

impl EngineSettings {
    /// Create settings from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `MEMOIR_STORAGE_LOCATION`: `memory://`, `temp://`, `file:///path`,
    ///   `lmdb:///path` or a bare path (default: `temp://`)
    /// - `MEMOIR_PREFIX`: Path segment before every function directory (default: none)
    /// - `MEMOIR_TTL_SECS`: Shorthand for `MEMOIR_EXPIRY_MODE=ttl:<secs>`
    /// - `MEMOIR_EXPIRY_MODE`: `never`, `ttl:<secs>`, `hourly`, `daily`,
    ///   `weekly`, `monthly` or `until:<rfc3339>` (default: never)
    /// - `MEMOIR_WRITE_MODE`: `overwrite` or `append` (default: overwrite)
    /// - `MEMOIR_OUTPUT_CODEC`: `auto`, `json`, `bincode` or `columnar` (default: auto)
    /// - `MEMOIR_INPUT_CODEC`: same choices (default: json)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let defaults = MemoConfig::default();

        let storage_location = std::env::var("MEMOIR_STORAGE_LOCATION")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_STORAGE_LOCATION.to_string());

        let prefix = std::env::var("MEMOIR_PREFIX")
            .ok()
            .map(|s| s.trim_matches('/').to_string())
            .filter(|s| !s.is_empty());

        let ttl = std::env::var("MEMOIR_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(|secs| ExpiryMode::Ttl(Duration::from_secs(secs)));

        let expiry = std::env::var("MEMOIR_EXPIRY_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .or(ttl)
            .unwrap_or(defaults.expiry);

        let write_mode = std::env::var("MEMOIR_WRITE_MODE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.write_mode);

        let output_codec = std::env::var("MEMOIR_OUTPUT_CODEC")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.output_codec);

        let input_codec = std::env::var("MEMOIR_INPUT_CODEC")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.input_codec);

        Self {
            storage_location,
            defaults: MemoConfig {
                expiry,
                input_codec,
                output_codec,
                write_mode,
                prefix,
                ..defaults
            },
        }
    }

    /// Parse settings from a TOML document. Unlike [`from_env`](Self::from_env),
    /// invalid values are errors.
    ///
    /// ```toml
    /// storage_location = "file:///var/cache/memoir"
    /// expiry = "daily"
    /// write_mode = "append"
    /// non_hashable_kwargs = ["session"]
    /// ```
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigError> {
        let raw: RawSettings = toml::from_str(document).map_err(|e| ConfigError::InvalidValue {
            field: "settings".to_string(),
            value: "<toml>".to_string(),
            reason: e.to_string(),
        })?;

        let mut defaults = MemoConfig::default();
        if let Some(secs) = raw.ttl_secs {
            defaults.expiry = ExpiryMode::Ttl(Duration::from_secs(secs));
        }
        if let Some(expiry) = raw.expiry {
            defaults.expiry = expiry.parse()?;
        }
        if let Some(mode) = raw.write_mode {
            defaults.write_mode = mode.parse()?;
        }
        if let Some(codec) = raw.input_codec {
            defaults.input_codec = codec.parse()?;
        }
        if let Some(codec) = raw.output_codec {
            defaults.output_codec = codec.parse()?;
        }
        if let Some(names) = raw.non_hashable_kwargs {
            defaults.non_hashable_kwargs = names.into_iter().collect();
        }
        if let Some(surface) = raw.surface_deserialization_errors {
            defaults.surface_deserialization_errors = surface;
        }
        if let Some(persist) = raw.persist_inputs {
            defaults.persist_inputs = persist;
        }
        defaults.prefix = raw.prefix;
        defaults.validate()?;

        Ok(Self {
            storage_location: raw
                .storage_location
                .unwrap_or_else(|| DEFAULT_STORAGE_LOCATION.to_string()),
            defaults,
        })
    }

    /// Read and parse a TOML settings file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let document = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
            field: "settings".to_string(),
            value: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&document)
    }

    pub fn with_storage_location(mut self, location: impl Into<String>) -> Self {
        self.storage_location = location.into();
        self
    }

    pub fn with_defaults(mut self, defaults: MemoConfig) -> Self {
        self.defaults = defaults;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::Period;

    #[test]
    fn test_default_config_is_valid() {
        let config = MemoConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.expiry, ExpiryMode::Never);
        assert!(config.persist_inputs);
        assert!(!config.surface_deserialization_errors);
    }

    #[test]
    fn test_builder() {
        let config = MemoConfig::default()
            .with_ttl(Duration::from_secs(30))
            .with_write_mode(WriteMode::Append)
            .with_prefix("team/pricing")
            .with_non_hashable_kwargs(["session", "conn"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.write_mode, WriteMode::Append);
        assert!(config.non_hashable_kwargs.contains("conn"));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = MemoConfig::default()
            .with_ttl(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "expiry"));
    }

    #[test]
    fn test_bad_prefixes_rejected() {
        for prefix in ["", "a//b", "../escape", "has space", "/abs"] {
            let result = MemoConfig::default().with_prefix(prefix).validate();
            assert!(result.is_err(), "prefix {prefix:?} should be rejected");
        }
    }

    #[test]
    fn test_empty_excluded_name_rejected() {
        let result = MemoConfig::default()
            .with_non_hashable_kwargs([" "])
            .validate();
        assert!(result.is_err());
    }

    #[test]
    fn test_exceptions_always_json() {
        let config = MemoConfig::default().with_output_codec(CodecSelector::Bincode);
        assert_eq!(config.codec_for(ArtifactRole::Exception), CodecSelector::Json);
        assert_eq!(config.codec_for(ArtifactRole::Output), CodecSelector::Bincode);
    }

    #[test]
    fn test_settings_from_toml() {
        let settings = EngineSettings::from_toml_str(
            r#"
            storage_location = "memory://"
            prefix = "nightly"
            expiry = "daily"
            write_mode = "append"
            output_codec = "bincode"
            non_hashable_kwargs = ["session"]
            "#,
        )
        .unwrap();
        assert_eq!(settings.storage_location, "memory://");
        assert_eq!(settings.defaults.prefix.as_deref(), Some("nightly"));
        assert_eq!(settings.defaults.expiry, ExpiryMode::Periodic(Period::Daily));
        assert_eq!(settings.defaults.write_mode, WriteMode::Append);
        assert_eq!(settings.defaults.output_codec, CodecSelector::Bincode);
        assert!(settings.defaults.non_hashable_kwargs.contains("session"));
    }

    #[test]
    fn test_settings_from_toml_ttl_shorthand() {
        let settings = EngineSettings::from_toml_str("ttl_secs = 120").unwrap();
        assert_eq!(settings.storage_location, DEFAULT_STORAGE_LOCATION);
        assert_eq!(
            settings.defaults.expiry,
            ExpiryMode::Ttl(Duration::from_secs(120))
        );
    }

    #[test]
    fn test_settings_from_toml_rejects_invalid() {
        assert!(EngineSettings::from_toml_str("write_mode = \"sideways\"").is_err());
        assert!(EngineSettings::from_toml_str("ttl_secs = 0").is_err());
        assert!(EngineSettings::from_toml_str("unknown_key = 1").is_err());
    }

    #[test]
    fn test_write_mode_parse() {
        assert_eq!("Append".parse::<WriteMode>().unwrap(), WriteMode::Append);
        assert_eq!("remove".parse::<WriteMode>().unwrap(), WriteMode::Overwrite);
        assert!("keep".parse::<WriteMode>().is_err());
    }
}
