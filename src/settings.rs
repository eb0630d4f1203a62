//! Typed settings resolved from `config.redb` and the environment.
//!
//! Everything is stored as strings; parsing and validation happen here so a
//! bad value is rejected both when it is set and when it is loaded.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use crate::{
    chunking::{ChunkingConfig, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE},
    config_db::ConfigDb,
    embedding::{
        DEFAULT_BATCH_SIZE,
        DEFAULT_HASHING_DIMENSION,
        Embedder,
        EmbedderAdapter,
        HashingEmbedder,
    },
    error::{Error, Result},
    generation::{
        DEFAULT_MAX_CONTEXT_CHARS,
        DEFAULT_PROMPT_TEMPLATE,
        GenerationConfig,
        PromptTemplate,
    },
    generator::{
        API_KEY_ENV_VAR,
        CommandGenerator,
        DEFAULT_GENERATOR_COMMAND,
        DEFAULT_GENERATOR_MODEL,
        DEFAULT_GENERATOR_URL,
        Generator,
        HttpGenerator,
    },
    model_manager::{DEFAULT_MODEL_ID, MODEL_ENV_VAR, ModelManager},
};

/// Overrides the `embedder` setting.
pub const EMBEDDER_ENV_VAR: &str = "DOCWHISPER_EMBEDDER";

/// Default number of chunks retrieved per question.
pub const DEFAULT_TOP_K: usize = 3;

/// Every key accepted by `config set`.
pub const KEYS: &[&str] = &[
    "embedder",
    "model",
    "hashing_dimension",
    "batch_size",
    "chunk_size",
    "chunk_overlap",
    "top_k",
    "max_context_chars",
    "prompt_template",
    "generator",
    "generator_command",
    "generator_url",
    "generator_model",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedderKind {
    Colbert,
    Hashing,
}

impl EmbedderKind {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "colbert" => Ok(Self::Colbert),
            "hashing" => Ok(Self::Hashing),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected colbert or hashing)"
            ))),
        }
    }
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Colbert => write!(f, "colbert"),
            Self::Hashing => write!(f, "hashing"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeneratorKind {
    Command,
    Http,
}

impl GeneratorKind {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "command" => Ok(Self::Command),
            "http" => Ok(Self::Http),
            other => Err(Error::Config(format!(
                "unknown generator '{other}' (expected command or http)"
            ))),
        }
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Http => write!(f, "http"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub embedder: EmbedderKind,
    pub model: String,
    pub hashing_dimension: usize,
    pub batch_size: usize,
    pub chunking: ChunkingConfig,
    pub top_k: usize,
    pub generation: GenerationConfig,
    pub generator: GeneratorKind,
    pub generator_command: String,
    pub generator_url: String,
    pub generator_model: String,
    /// Bearer token for the HTTP generator, only ever read from the
    /// environment.
    pub api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            embedder: EmbedderKind::Colbert,
            model: DEFAULT_MODEL_ID.to_string(),
            hashing_dimension: DEFAULT_HASHING_DIMENSION,
            batch_size: DEFAULT_BATCH_SIZE,
            chunking: ChunkingConfig::new(
                DEFAULT_CHUNK_SIZE,
                DEFAULT_CHUNK_OVERLAP,
            ),
            top_k: DEFAULT_TOP_K,
            generation: GenerationConfig {
                template: PromptTemplate::default(),
                max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
            },
            generator: GeneratorKind::Command,
            generator_command: DEFAULT_GENERATOR_COMMAND.to_string(),
            generator_url: DEFAULT_GENERATOR_URL.to_string(),
            generator_model: DEFAULT_GENERATOR_MODEL.to_string(),
            api_key: None,
        }
    }
}

fn parse_count(key: &str, value: &str) -> Result<usize> {
    value.trim().parse().map_err(|_| {
        Error::Config(format!(
            "{key} must be a non-negative integer, got '{value}'"
        ))
    })
}

fn parse_positive(key: &str, value: &str) -> Result<usize> {
    match parse_count(key, value)? {
        0 => Err(Error::Config(format!("{key} must be greater than zero"))),
        n => Ok(n),
    }
}

fn unknown_key(key: &str) -> Error {
    Error::Config(format!(
        "unknown setting '{key}' (known: {})",
        KEYS.join(", ")
    ))
}

fn check_key(key: &str) -> Result<()> {
    if KEYS.contains(&key) {
        Ok(())
    } else {
        Err(unknown_key(key))
    }
}

impl Settings {
    /// Stored settings on top of the defaults, then environment overrides.
    pub fn load(config_db: &ConfigDb) -> Result<Self> {
        let mut settings = Self::from_pairs(config_db.list_settings()?)?;
        settings.apply_env(|name| std::env::var(name).ok())?;
        debug!(
            embedder = %settings.embedder,
            generator = %settings.generator,
            "settings loaded"
        );
        Ok(settings)
    }

    /// Build settings from stored `(key, value)` pairs over the defaults.
    pub fn from_pairs(
        pairs: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut settings = Self::default();
        for (key, value) in pairs {
            settings.apply(&key, &value)?;
        }
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `DOCWHISPER_MODEL`, `DOCWHISPER_EMBEDDER` and
    /// `DOCWHISPER_API_KEY` as returned by `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(model) = lookup(MODEL_ENV_VAR) {
            self.model = model;
        }
        if let Some(embedder) = lookup(EMBEDDER_ENV_VAR) {
            self.embedder = EmbedderKind::parse(&embedder)?;
        }
        if let Some(key) = lookup(API_KEY_ENV_VAR).filter(|k| !k.is_empty()) {
            self.api_key = Some(key);
        }
        Ok(())
    }

    /// Set one key from its string form. Cross-field constraints are
    /// checked by [`validate`](Self::validate).
    pub fn apply(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "embedder" => self.embedder = EmbedderKind::parse(value)?,
            "model" => self.model = value.to_string(),
            "hashing_dimension" => {
                self.hashing_dimension = parse_positive(key, value)?;
            }
            "batch_size" => self.batch_size = parse_positive(key, value)?,
            "chunk_size" => {
                self.chunking.chunk_size = parse_positive(key, value)?;
            }
            "chunk_overlap" => {
                self.chunking.overlap = parse_count(key, value)?;
            }
            "top_k" => self.top_k = parse_positive(key, value)?,
            "max_context_chars" => {
                self.generation.max_context_chars =
                    parse_positive(key, value)?;
            }
            "prompt_template" => {
                self.generation.template = PromptTemplate::new(value)?;
            }
            "generator" => self.generator = GeneratorKind::parse(value)?,
            "generator_command" => {
                CommandGenerator::new(value)?;
                self.generator_command = value.to_string();
            }
            "generator_url" => self.generator_url = value.to_string(),
            "generator_model" => self.generator_model = value.to_string(),
            other => return Err(unknown_key(other)),
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()
    }

    /// Effective value of every key, in [`KEYS`] order.
    pub fn values(&self) -> Vec<(&'static str, String)> {
        vec![
            ("embedder", self.embedder.to_string()),
            ("model", self.model.clone()),
            ("hashing_dimension", self.hashing_dimension.to_string()),
            ("batch_size", self.batch_size.to_string()),
            ("chunk_size", self.chunking.chunk_size.to_string()),
            ("chunk_overlap", self.chunking.overlap.to_string()),
            ("top_k", self.top_k.to_string()),
            (
                "max_context_chars",
                self.generation.max_context_chars.to_string(),
            ),
            (
                "prompt_template",
                self.generation.template.as_str().to_string(),
            ),
            ("generator", self.generator.to_string()),
            ("generator_command", self.generator_command.clone()),
            ("generator_url", self.generator_url.clone()),
            ("generator_model", self.generator_model.clone()),
        ]
    }

    /// The configured embedder, wrapped in its validating adapter.
    pub fn build_embedder(&self) -> Result<EmbedderAdapter<Box<dyn Embedder>>> {
        let embedder: Box<dyn Embedder> = match self.embedder {
            EmbedderKind::Colbert => {
                Box::new(ModelManager::with_model_id(self.model.clone()))
            }
            EmbedderKind::Hashing => {
                Box::new(HashingEmbedder::new(self.hashing_dimension))
            }
        };
        EmbedderAdapter::new(embedder, self.batch_size)
    }

    pub fn build_generator(&self) -> Result<Box<dyn Generator>> {
        Ok(match self.generator {
            GeneratorKind::Command => {
                Box::new(CommandGenerator::new(&self.generator_command)?)
            }
            GeneratorKind::Http => Box::new(HttpGenerator::new(
                &self.generator_url,
                &self.generator_model,
                self.api_key.clone(),
            )?),
        })
    }
}

/// Validate and persist one setting.
///
/// The new value is checked together with the already stored ones, so
/// e.g. an overlap that is not smaller than the chunk size is refused.
pub fn set_setting(config_db: &ConfigDb, key: &str, value: &str) -> Result<()> {
    check_key(key)?;
    let mut pairs = config_db.list_settings()?;
    pairs.retain(|(k, _)| k != key);
    pairs.push((key.to_string(), value.to_string()));
    Settings::from_pairs(pairs)?;
    config_db.set_setting(key, value)
}

/// Remove a stored setting so its default applies again.
pub fn unset_setting(config_db: &ConfigDb, key: &str) -> Result<bool> {
    check_key(key)?;
    if config_db.get_setting(key)?.is_none() {
        return Ok(false);
    }
    let mut pairs = config_db.list_settings()?;
    pairs.retain(|(k, _)| k != key);
    Settings::from_pairs(pairs)?;
    config_db.remove_setting(key)
}
