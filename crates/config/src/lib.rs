//! Configuration loading, validation, and management for mcbridge.
//!
//! Loads configuration from `config/agent.toml` (or the path given with
//! `--config` / `MCBRIDGE_CONFIG`) with environment variable overrides.
//! Validates everything at startup and reports every missing or invalid field
//! at once; the bridge never starts half-configured.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default location of the config file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/agent.toml";

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Game server connection (required fields live here)
    #[serde(default)]
    pub minecraft: MinecraftConfig,

    /// Agent naming
    #[serde(default)]
    pub agent: AgentConfig,

    /// Reasoning engine process
    #[serde(default)]
    pub engine: EngineConfig,

    /// Quiet-period batching and idle ticks
    #[serde(default)]
    pub batching: BatchingConfig,

    /// Which batches warrant a turn
    #[serde(default)]
    pub relevance: RelevanceConfig,

    /// Game reconnect backoff
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Raw event feed
    #[serde(default)]
    pub feed: FeedConfig,

    /// System instruction sources
    #[serde(default)]
    pub instructions: InstructionsConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Capability providers, keyed by provider id
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
}

/// Redact a secret-ish string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MinecraftConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default = "default_mc_port")]
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Authentication mode; omit for offline-mode servers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,

    /// Server install directory, for providers that read server files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_root: Option<String>,
}

fn default_mc_port() -> u16 {
    25565
}

impl Default for MinecraftConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: default_mc_port(),
            username: None,
            version: None,
            auth: None,
            server_root: None,
        }
    }
}

impl std::fmt::Debug for MinecraftConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinecraftConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &redact(&self.username))
            .field("version", &self.version)
            .field("auth", &self.auth)
            .field("server_root", &self.server_root)
            .finish()
    }
}

impl MinecraftConfig {
    /// Environment handed to the game provider process.
    pub fn provider_env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        if let Some(host) = &self.host {
            env.insert("MC_HOST".into(), host.clone());
        }
        env.insert("MC_PORT".into(), self.port.to_string());
        if let Some(username) = &self.username {
            env.insert("MC_USERNAME".into(), username.clone());
        }
        if let Some(version) = &self.version {
            env.insert("MC_VERSION".into(), version.clone());
        }
        if let Some(auth) = &self.auth {
            env.insert("MC_AUTH".into(), auth.clone());
        }
        if let Some(root) = &self.server_root {
            env.insert("MC_SERVER_ROOT".into(), root.clone());
        }
        env
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Name players use to address the agent; defaults to the game username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Other names that count as mentions and as self-authored chat
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Engine bridge executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_model")]
    pub model: String,

    /// Hard limit for one reasoning turn
    #[serde(default = "default_turn_timeout")]
    pub turn_timeout_secs: u64,

    /// Prompt for the first turn after the session starts; empty disables it
    #[serde(default = "default_startup_prompt")]
    pub startup_prompt: String,
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".into()
}
fn default_turn_timeout() -> u64 {
    300
}
fn default_startup_prompt() -> String {
    concat!(
        "You are now connected to the Minecraft server. ",
        "You are ready to assist players. When players mention your name in chat, ",
        "respond helpfully using the chat tool."
    )
    .into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: vec![],
            env: BTreeMap::new(),
            model: default_model(),
            turn_timeout_secs: default_turn_timeout(),
            startup_prompt: default_startup_prompt(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchingConfig {
    /// Quiet period before buffered events are released
    #[serde(default = "default_batch_delay")]
    pub message_batch_delay_ms: u64,

    /// Idle period before an autonomous turn; 0 disables idle turns
    #[serde(default = "default_idle_tick")]
    pub idle_tick_secs: u64,
}

fn default_batch_delay() -> u64 {
    3000
}
fn default_idle_tick() -> u64 {
    300
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            message_batch_delay_ms: default_batch_delay(),
            idle_tick_secs: default_idle_tick(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceMode {
    /// Only batches whose chat mentions the agent
    #[default]
    Mention,
    /// Every batch
    Always,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelevanceConfig {
    #[serde(default)]
    pub policy: RelevanceMode,

    #[serde(default)]
    pub case_sensitive: bool,

    /// Require the name to stand alone rather than inside a longer word
    #[serde(default)]
    pub whole_word: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_multiplier")]
    pub backoff_multiplier: f64,

    /// How long one connect attempt may take before it counts as failed.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}
fn default_initial_delay() -> u64 {
    5000
}
fn default_max_delay() -> u64 {
    300_000
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_connect_timeout() -> u64 {
    30_000
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_multiplier(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    /// Run a command and read its stdout; rerun when it exits
    #[default]
    Command,
    /// Follow a growing log file
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default)]
    pub kind: FeedKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Pause before reopening a feed that ended or failed
    #[serde(default = "default_reopen_delay")]
    pub reopen_delay_ms: u64,

    /// File feed: how often to check for new lines at EOF
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_reopen_delay() -> u64 {
    1000
}
fn default_poll_interval() -> u64 {
    250
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: FeedKind::Command,
            command: None,
            args: vec![],
            path: None,
            reopen_delay_ms: default_reopen_delay(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionsConfig {
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("agent/prompts")
}
fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}

impl Default for InstructionsConfig {
    fn default() -> Self {
        Self {
            prompts_dir: default_prompts_dir(),
            docs_dir: default_docs_dir(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also append logs to this file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,

    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// A provider that fails to start is skipped instead of aborting startup
    #[serde(default)]
    pub optional: bool,

    /// This provider owns the game connection and receives `MC_*` env
    #[serde(default)]
    pub game: bool,

    /// Operation that (re)establishes the game connection
    #[serde(default = "default_connect_operation")]
    pub connect_operation: String,

    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

fn default_connect_operation() -> String {
    "connect".into()
}
fn default_handshake_timeout() -> u64 {
    10
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: vec![],
            env: BTreeMap::new(),
            optional: false,
            game: false,
            connect_operation: default_connect_operation(),
            handshake_timeout_secs: default_handshake_timeout(),
        }
    }
}

impl AppConfig {
    /// Resolve the config path: explicit argument, then `MCBRIDGE_CONFIG`,
    /// then [`DEFAULT_CONFIG_PATH`].
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        std::env::var("MCBRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load, apply environment overrides, and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::read(explicit)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and apply environment overrides without validating, so callers
    /// can report every problem themselves.
    ///
    /// Environment overrides:
    /// - `MCBRIDGE_AGENT_NAME` replaces `agent.name`
    /// - `MCBRIDGE_ENGINE_MODEL` replaces `engine.model`
    pub fn read(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = Self::resolve_path(explicit);
        let mut config = Self::read_from(&path)?;

        if let Ok(name) = std::env::var("MCBRIDGE_AGENT_NAME") {
            config.agent.name = Some(name);
        }
        if let Ok(model) = std::env::var("MCBRIDGE_ENGINE_MODEL") {
            config.engine.model = model;
        }
        Ok(config)
    }

    /// Load and validate a specific file, without environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read_from(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Paths of required fields that are absent or blank.
    pub fn missing_fields(&self) -> Vec<String> {
        fn blank(v: &Option<String>) -> bool {
            v.as_deref().is_none_or(|s| s.trim().is_empty())
        }

        let mut missing = Vec::new();
        if blank(&self.minecraft.host) {
            missing.push("minecraft.host".to_string());
        }
        if blank(&self.minecraft.username) {
            missing.push("minecraft.username".to_string());
        }
        if blank(&self.minecraft.version) {
            missing.push("minecraft.version".to_string());
        }
        if blank(&self.engine.command) {
            missing.push("engine.command".to_string());
        }
        match self.feed.kind {
            FeedKind::Command if blank(&self.feed.command) => {
                missing.push("feed.command".to_string())
            }
            FeedKind::File if self.feed.path.is_none() => missing.push("feed.path".to_string()),
            _ => {}
        }
        for (id, provider) in &self.providers {
            if blank(&provider.command) {
                missing.push(format!("providers.{id}.command"));
            }
        }
        missing
    }

    /// Values present but unusable.
    pub fn invalid_fields(&self) -> Vec<String> {
        let mut invalid = Vec::new();
        if self.batching.message_batch_delay_ms == 0 {
            invalid.push("batching.message_batch_delay_ms must be > 0".to_string());
        }
        if self.engine.turn_timeout_secs == 0 {
            invalid.push("engine.turn_timeout_secs must be > 0".to_string());
        }
        if self.reconnect.connect_timeout_ms == 0 {
            invalid.push("reconnect.connect_timeout_ms must be > 0".to_string());
        }
        if self.reconnect.initial_delay_ms == 0 {
            invalid.push("reconnect.initial_delay_ms must be > 0".to_string());
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            invalid.push("reconnect.max_delay_ms must be >= reconnect.initial_delay_ms".to_string());
        }
        let multiplier = self.reconnect.backoff_multiplier;
        if multiplier.is_nan() || multiplier < 1.0 {
            invalid.push("reconnect.backoff_multiplier must be >= 1.0".to_string());
        }
        let game_providers = self.providers.values().filter(|p| p.game).count();
        if game_providers > 1 {
            invalid.push("providers: at most one provider may set game = true".to_string());
        }
        invalid
    }

    /// Validate the configuration, reporting every violation together.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let missing = self.missing_fields();
        let invalid = self.invalid_fields();
        match (missing.is_empty(), invalid.is_empty()) {
            (true, true) => Ok(()),
            (false, true) => Err(ConfigError::MissingFields(missing)),
            (true, false) => Err(ConfigError::ValidationError(invalid.join("; "))),
            (false, false) => Err(ConfigError::Violations { missing, invalid }),
        }
    }

    /// Name used for mentions and the self-authored filter.
    pub fn agent_name(&self) -> String {
        self.agent
            .name
            .clone()
            .or_else(|| self.minecraft.username.clone())
            .unwrap_or_else(|| "Bot".into())
    }

    /// Every name the agent goes by, deduplicated case-insensitively.
    pub fn self_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let candidates = std::iter::once(self.agent_name())
            .chain(self.minecraft.username.clone())
            .chain(self.agent.aliases.iter().cloned());
        for name in candidates {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
        }
        names
    }

    /// The provider that owns the game connection, if any.
    pub fn game_provider(&self) -> Option<(&str, &ProviderConfig)> {
        self.providers
            .iter()
            .find(|(_, p)| p.game)
            .map(|(id, p)| (id.as_str(), p))
    }

    /// A starter config for `mcbridge init`.
    pub fn template() -> Self {
        let mut providers = BTreeMap::new();
        providers.insert(
            "minecraft".to_string(),
            ProviderConfig {
                command: Some("node".into()),
                args: vec!["minecraft-mcp/src/index.js".into()],
                game: true,
                ..ProviderConfig::default()
            },
        );
        providers.insert(
            "admin".to_string(),
            ProviderConfig {
                command: Some("node".into()),
                args: vec!["server-admin-mcp/src/index.js".into()],
                optional: true,
                ..ProviderConfig::default()
            },
        );
        providers.insert(
            "memory".to_string(),
            ProviderConfig {
                command: Some("node".into()),
                args: vec!["memory-mcp/src/index.js".into()],
                optional: true,
                ..ProviderConfig::default()
            },
        );

        Self {
            minecraft: MinecraftConfig {
                host: Some("localhost".into()),
                username: Some("Bot".into()),
                version: Some("1.21.8".into()),
                ..MinecraftConfig::default()
            },
            engine: EngineConfig {
                command: Some("mcbridge-engine".into()),
                ..EngineConfig::default()
            },
            feed: FeedConfig {
                command: Some("./chat-poll.sh".into()),
                ..FeedConfig::default()
            },
            logging: LoggingConfig {
                file: Some(PathBuf::from("data/agent.log")),
                json: false,
            },
            providers,
            ..Self::default()
        }
    }

    /// Render the starter config as TOML.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::template()).unwrap_or_default()
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No config file at {path} (run `mcbridge init` to create one)")]
    NotFound { path: PathBuf },

    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration incomplete, missing: {}", .0.join(", "))]
    MissingFields(Vec<String>),

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    #[error(
        "Configuration incomplete, missing: {}; invalid: {}",
        .missing.join(", "),
        .invalid.join("; ")
    )]
    Violations {
        missing: Vec<String>,
        invalid: Vec<String>,
    },
}
