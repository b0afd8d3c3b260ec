//! Configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env
//! vars, then extracts a typed [`Settings`] struct covering every knob the
//! engine honors. Provides helpers to expand `~` and `${VAR}` and to resolve
//! relative paths against a known base directory.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::types::Strategy;
use crate::{Error, Result};

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_"));

        Ok(Self { figment })
    }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("failed to get '{}': {}", key, e)))
    }

    /// Extract and validate the full typed settings.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

/// Typed view of the merged configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingSettings,
    pub search: SearchSettings,
    pub embedding: EmbeddingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub docs_dir: String,
    pub index_dir: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingSettings {
    pub max_tokens: usize,
    pub overlap_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub top_k: usize,
    pub strategy: Strategy,
    pub alpha: f32,
}

/// Which embedding provider to use. `provider = "none"` skips the semantic
/// index entirely and the engine runs lexical-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub dimension: usize,
    pub command: String,
    pub timeout_ms: u64,
    pub batch_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data: DataSettings::default(),
            chunking: ChunkingSettings::default(),
            search: SearchSettings::default(),
            embedding: EmbeddingSettings::default(),
        }
    }
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { docs_dir: "./docs".to_string(), index_dir: "./index".to_string() }
    }
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self { max_tokens: 500, overlap_tokens: 50 }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { top_k: 5, strategy: Strategy::Auto, alpha: 0.6 }
    }
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "hash".to_string(),
            dimension: 384,
            command: String::new(),
            timeout_ms: 30_000,
            batch_size: 32,
        }
    }
}

impl Settings {
    /// Reject bad knob combinations before any work begins.
    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_tokens == 0 {
            return Err(Error::InvalidConfig("chunking.max_tokens must be > 0".into()));
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            return Err(Error::InvalidConfig(format!(
                "chunking.overlap_tokens ({}) must be < chunking.max_tokens ({})",
                self.chunking.overlap_tokens, self.chunking.max_tokens
            )));
        }
        if self.search.top_k == 0 {
            return Err(Error::InvalidConfig("search.top_k must be >= 1".into()));
        }
        if !(0.0..=1.0).contains(&self.search.alpha) {
            return Err(Error::InvalidConfig(format!(
                "search.alpha ({}) must be within [0.0, 1.0]",
                self.search.alpha
            )));
        }
        match self.embedding.provider.as_str() {
            "hash" | "none" => {}
            "command" => {
                if self.embedding.command.trim().is_empty() {
                    return Err(Error::InvalidConfig(
                        "embedding.command must be set when embedding.provider = \"command\"".into(),
                    ));
                }
            }
            other => {
                return Err(Error::InvalidConfig(format!(
                    "unknown embedding.provider '{}' (expected hash|command|none)",
                    other
                )));
            }
        }
        if self.embedding.provider != "none" && self.embedding.dimension == 0 {
            return Err(Error::InvalidConfig("embedding.dimension must be > 0".into()));
        }
        Ok(())
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after
/// expansion. If `p` is absolute, it's returned as-is.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() {
        p
    } else {
        base.join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_validate() {
        Settings::default().validate().expect("defaults are valid");
    }

    #[test]
    fn overlap_must_stay_below_max_tokens() {
        let mut s = Settings::default();
        s.chunking.overlap_tokens = s.chunking.max_tokens;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn alpha_outside_unit_interval_is_rejected() {
        let mut s = Settings::default();
        s.search.alpha = 1.5;
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn command_provider_requires_command() {
        let mut s = Settings::default();
        s.embedding.provider = "command".to_string();
        assert!(matches!(s.validate(), Err(Error::InvalidConfig(_))));
        s.embedding.command = "embed-server --stdin".to_string();
        s.validate().expect("command provider with command is valid");
    }

    #[test]
    fn expand_path_keeps_plain_relative_paths() {
        assert_eq!(expand_path("docs/guide"), PathBuf::from("docs/guide"));
    }
}
