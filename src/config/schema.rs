use crate::sessions::UpdateMode;
use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
#[cfg(unix)]
use tokio::fs::File;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

const CONFIG_FILE_NAME: &str = "config.toml";

// ── Top-level config ──────────────────────────────────────────────

/// Top-level sessionkeeper configuration, loaded from `config.toml`.
///
/// Resolution order: `SESSIONKEEPER_CONFIG_DIR` env → `~/.sessionkeeper/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml - computed from home, not serialized
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Session store and update protocol settings (`[sessions]`).
    #[serde(default)]
    pub sessions: SessionsConfig,

    /// Built-in agent settings (`[agent]`).
    #[serde(default)]
    pub agent: AgentConfig,

    /// Telemetry backend for swallowed session failures (`[observability]`).
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ── Sessions ──────────────────────────────────────────────────────

/// Session configuration (`[sessions]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionsConfig {
    /// Application name used as the first part of every session identity. Default: `"Session Bot"`.
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Write protection for history appends and state merges:
    /// `"legacy"` (unprotected, can lose concurrent writes), `"locked"`, or `"optimistic"`.
    /// Default: `"locked"`.
    #[serde(default)]
    pub update_mode: UpdateMode,
    /// Attempts per update in optimistic mode before giving up. Default: `8`.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_app_name() -> String {
    "Session Bot".into()
}

fn default_max_retries() -> u32 {
    8
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            update_mode: UpdateMode::default(),
            max_retries: default_max_retries(),
        }
    }
}

// ── Agent ─────────────────────────────────────────────────────────

/// Built-in agent configuration (`[agent]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AgentConfig {
    /// Author name recorded on agent responses. Default: `"qa_agent"`.
    #[serde(default = "default_agent_name")]
    pub name: String,
}

fn default_agent_name() -> String {
    "qa_agent".into()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
        }
    }
}

// ── Observability ─────────────────────────────────────────────────

/// Observability backend configuration (`[observability]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObservabilityConfig {
    /// "log" | "none"
    #[serde(default = "default_observability_backend")]
    pub backend: String,
}

fn default_observability_backend() -> String {
    "log".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            backend: default_observability_backend(),
        }
    }
}

// ── Config impl ──────────────────────────────────────────────────

impl Default for Config {
    fn default() -> Self {
        let home =
            UserDirs::new().map_or_else(|| PathBuf::from("."), |u| u.home_dir().to_path_buf());

        Self {
            config_path: home.join(".sessionkeeper").join(CONFIG_FILE_NAME),
            sessions: SessionsConfig::default(),
            agent: AgentConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

fn default_config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("SESSIONKEEPER_CONFIG_DIR") {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".sessionkeeper"))
}

impl Config {
    pub async fn load_or_init() -> Result<Self> {
        let config_dir = default_config_dir()?;
        Self::load_or_init_in(&config_dir).await
    }

    /// Load `config.toml` from `config_dir`, writing defaults first if it does not exist.
    pub async fn load_or_init_in(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(config_dir).await.with_context(|| {
            format!("Failed to create config directory: {}", config_dir.display())
        })?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;
            config
        } else {
            let contents = fs::read_to_string(&config_path)
                .await
                .context("Failed to read config file")?;
            let mut config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            // Set computed paths that are skipped during serialization
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            update_mode = %config.sessions.update_mode,
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    /// Validate configuration values that would cause runtime failures.
    pub fn validate(&self) -> Result<()> {
        if self.sessions.app_name.trim().is_empty() {
            anyhow::bail!("sessions.app_name must not be empty");
        }
        if self.sessions.max_retries == 0 {
            anyhow::bail!("sessions.max_retries must be greater than 0");
        }
        if self.agent.name.trim().is_empty() {
            anyhow::bail!("agent.name must not be empty");
        }
        match self.observability.backend.trim().to_ascii_lowercase().as_str() {
            "log" | "none" => Ok(()),
            other => anyhow::bail!(
                "observability.backend '{other}' is not supported; expected log or none"
            ),
        }
    }

    /// Apply environment variable overrides to config
    pub fn apply_env_overrides(&mut self) {
        if let Ok(app_name) = std::env::var("SESSIONKEEPER_APP_NAME") {
            if !app_name.is_empty() {
                self.sessions.app_name = app_name;
            }
        }

        // Unparseable modes are ignored with a warning rather than failing startup.
        if let Ok(mode) = std::env::var("SESSIONKEEPER_UPDATE_MODE") {
            match mode.parse::<UpdateMode>() {
                Ok(mode) => self.sessions.update_mode = mode,
                Err(e) => tracing::warn!("Ignoring SESSIONKEEPER_UPDATE_MODE: {e}"),
            }
        }

        if let Ok(retries) = std::env::var("SESSIONKEEPER_MAX_RETRIES") {
            if let Ok(retries) = retries.trim().parse::<u32>() {
                if retries > 0 {
                    self.sessions.max_retries = retries;
                }
            }
        }

        if let Ok(name) = std::env::var("SESSIONKEEPER_AGENT_NAME") {
            if !name.is_empty() {
                self.agent.name = name;
            }
        }

        if let Ok(backend) = std::env::var("SESSIONKEEPER_OBSERVABILITY") {
            if !backend.is_empty() {
                self.observability.backend = backend;
            }
        }
    }

    /// Persist to `config_path`. The file is replaced by rename, so readers
    /// see either the old or the new contents.
    pub async fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        let dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let staged = dir.join(format!(".{CONFIG_FILE_NAME}.{}", uuid::Uuid::new_v4().simple()));
        if let Err(e) = stage_and_swap(&staged, &self.config_path, contents.as_bytes()).await {
            let _ = fs::remove_file(&staged).await;
            return Err(e);
        }

        #[cfg(unix)]
        fsync(dir)
            .await
            .with_context(|| format!("Failed to fsync config directory: {}", dir.display()))?;
        Ok(())
    }
}

async fn stage_and_swap(staged: &Path, target: &Path, contents: &[u8]) -> Result<()> {
    let mut file = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(staged)
        .await
        .with_context(|| format!("Failed to stage config at {}", staged.display()))?;
    file.write_all(contents)
        .await
        .context("Failed to write staged config")?;
    file.sync_all()
        .await
        .context("Failed to fsync staged config")?;
    drop(file);

    fs::rename(staged, target)
        .await
        .with_context(|| format!("Failed to replace {}", target.display()))
}

#[cfg(unix)]
async fn fsync(path: &Path) -> std::io::Result<()> {
    File::open(path).await?.sync_all().await
}
