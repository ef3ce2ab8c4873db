use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::KalpanaError;
use crate::ipc::DEFAULT_MAX_FRAME_BYTES;

pub const DEV_SOCKET_PATH: &str = "/tmp/kalpana-core.sock";
pub const PROD_SOCKET_PATH: &str = "/run/kalpana/core.sock";
pub const PROD_PID_PATH: &str = "/run/kalpana/core.pid";
pub const PROD_ROOT: &str = "/kalpana";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorityMode {
    Development,
    Production,
}

impl AuthorityMode {
    /// `KALPANA_DEV_MODE=1` (or unset) selects development mode.
    pub fn from_env() -> Self {
        match std::env::var("KALPANA_DEV_MODE") {
            Ok(value) if value.trim() != "1" => AuthorityMode::Production,
            _ => AuthorityMode::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorityMode::Development => "development",
            AuthorityMode::Production => "production",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub authority: AuthorityConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorityConfig {
    pub mode: AuthorityMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    pub socket: PathBuf,
    pub audit_log: PathBuf,
    pub policy_dir: PathBuf,
    pub pid_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub max_connections: usize,
    pub frame_timeout_ms: u64,
    pub max_frame_bytes: usize,
    /// Permission bits applied to the socket file (decimal in TOML, 432 = 0o660).
    pub socket_mode: u32,
    pub socket_group: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 64,
            frame_timeout_ms: 5_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            socket_mode: 0o660,
            socket_group: None,
        }
    }
}

/// Extra entries merged into the built-in trusted process and protected path sets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    pub trusted_processes: Vec<String>,
    pub protected_paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub config_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn default_config(mode: AuthorityMode, paths: &ConfigPaths) -> Self {
        let paths = match mode {
            AuthorityMode::Development => PathsConfig {
                socket: PathBuf::from(DEV_SOCKET_PATH),
                audit_log: paths.data_dir.join("logs").join("core.log"),
                policy_dir: paths.data_dir.join("policy"),
                pid_file: paths.data_dir.join("core.pid"),
            },
            AuthorityMode::Production => PathsConfig {
                socket: PathBuf::from(PROD_SOCKET_PATH),
                audit_log: Path::new(PROD_ROOT).join("audit").join("core.log"),
                policy_dir: Path::new(PROD_ROOT).join("policy"),
                pid_file: PathBuf::from(PROD_PID_PATH),
            },
        };
        Self {
            authority: AuthorityConfig { mode },
            paths,
            server: ServerConfig::default(),
            policy: PolicyConfig::default(),
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        let output = toml::to_string_pretty(self).context("render config TOML")?;
        Ok(output)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("read config at {}", path.display()))?;
        Self::from_toml_str(&contents)
    }

    /// Loads the config file if it exists, otherwise the defaults for `mode`.
    pub fn load_or_default(paths: &ConfigPaths, mode: AuthorityMode) -> Result<Self> {
        if paths.config_path.exists() {
            return Self::load(&paths.config_path);
        }
        Ok(Self::default_config(mode, paths))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {}", parent.display()))?;
        }
        let contents = self.to_toml_string()?;
        fs::write(path, contents).with_context(|| format!("write config at {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), KalpanaError> {
        if self.server.max_connections == 0 {
            return Err(KalpanaError::InvalidConfig("server.max_connections must be at least 1".to_string()));
        }
        if self.server.max_frame_bytes == 0 {
            return Err(KalpanaError::InvalidConfig("server.max_frame_bytes must be at least 1".to_string()));
        }
        if self.server.frame_timeout_ms == 0 {
            return Err(KalpanaError::InvalidConfig("server.frame_timeout_ms must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Socket path, honoring the `KALPANA_SOCKET` override.
    pub fn socket_path(&self) -> PathBuf {
        match std::env::var("KALPANA_SOCKET") {
            Ok(value) => PathBuf::from(value),
            Err(_) => self.paths.socket.clone(),
        }
    }

    /// PID file path, honoring the `KALPANA_PID` override.
    pub fn pid_path(&self) -> PathBuf {
        match std::env::var("KALPANA_PID") {
            Ok(value) => PathBuf::from(value),
            Err(_) => self.paths.pid_file.clone(),
        }
    }
}

impl ConfigPaths {
    pub fn resolve() -> Result<Self> {
        let project_dirs = ProjectDirs::from("org", "kalpana", "kalpana")
            .ok_or_else(|| anyhow::anyhow!("unable to determine project directories"))?;
        let config_path = match std::env::var("KALPANA_CONFIG") {
            Ok(value) => PathBuf::from(value),
            Err(_) => project_dirs.config_dir().join("core.toml"),
        };
        Ok(Self {
            config_path,
            data_dir: project_dirs.data_dir().to_path_buf(),
        })
    }
}
