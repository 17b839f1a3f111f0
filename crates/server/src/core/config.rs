//! Chat server configuration

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::core::auth::AuthManager;
use crate::directory::DirectoryStore;
use crate::live::{EventRouter, LiveHub};

/// Lowest bcrypt cost the hasher accepts; used for throwaway accounts
pub const TEST_HASH_COST: u32 = 4;

/// Configuration for the Parley chat server
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Data root (accounts database, directory snapshot)
    pub data_dir: PathBuf,
    /// Address the HTTP/WebSocket listener binds to
    pub bind_addr: SocketAddr,
    /// Outbound events buffered per live connection before dropping
    pub send_queue_capacity: usize,
    /// Ping interval on live connections
    pub heartbeat_interval_secs: u64,
    /// Bearer session lifetime
    pub session_ttl_days: i64,
    /// bcrypt work factor for password hashes
    pub hash_cost: u32,
    /// Snapshot the directory to disk after each mutation
    pub persist: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: parley_common::parley_root(),
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            send_queue_capacity: 256,
            heartbeat_interval_secs: 25,
            session_ttl_days: 7,
            hash_cost: bcrypt::DEFAULT_COST,
            persist: true,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PARLEY_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(addr) = env_parse::<SocketAddr>("PARLEY_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(capacity) = env_parse::<usize>("PARLEY_SEND_QUEUE") {
            config.send_queue_capacity = capacity.max(1);
        }
        if let Some(secs) = env_parse::<u64>("PARLEY_HEARTBEAT_SECS") {
            config.heartbeat_interval_secs = secs.max(1);
        }
        if std::env::var("PARLEY_EPHEMERAL").is_ok() {
            config.persist = false;
        }
        config
    }

    /// Create config with custom base directory
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: base_dir.into(),
            ..Self::default()
        }
    }

    /// Never zero; a zero period would panic the ping timer.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn users_db_path(&self) -> PathBuf {
        parley_common::users_db_path(&self.data_dir)
    }

    pub fn directory_path(&self) -> PathBuf {
        parley_common::directory_snapshot_path(&self.data_dir)
    }

    /// Ensure all directories exist
    pub async fn ensure_dirs(&self) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.data_dir).await?;
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// App state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: ServerConfig,
    pub auth: Arc<AuthManager>,
    pub directory: Arc<DirectoryStore>,
    pub hub: Arc<LiveHub>,
    pub router: Arc<EventRouter>,
}

impl AppState {
    /// Open the on-disk stores described by `config`
    pub async fn open(config: ServerConfig) -> anyhow::Result<Self> {
        config.ensure_dirs().await?;
        let auth = AuthManager::open(&config.users_db_path(), &config).await?;
        let directory = if config.persist {
            DirectoryStore::open(config.directory_path()).await?
        } else {
            DirectoryStore::in_memory()
        };
        Ok(Self::from_parts(config, Arc::new(auth), Arc::new(directory)))
    }

    /// Wire the live layer around already-open stores
    pub fn from_parts(
        config: ServerConfig,
        auth: Arc<AuthManager>,
        directory: Arc<DirectoryStore>,
    ) -> Self {
        let hub = Arc::new(LiveHub::new(config.send_queue_capacity.max(1)));
        let router = Arc::new(EventRouter::new(hub.clone(), directory.clone(), auth.clone()));
        Self {
            config,
            auth,
            directory,
            hub,
            router,
        }
    }

    /// Fully in-memory state (tests, `PARLEY_EPHEMERAL`)
    pub async fn ephemeral() -> anyhow::Result<Self> {
        let config = ServerConfig {
            persist: false,
            hash_cost: TEST_HASH_COST,
            ..ServerConfig::default()
        };
        let auth = AuthManager::in_memory(config.hash_cost).await?;
        Ok(Self::from_parts(
            config,
            Arc::new(auth),
            Arc::new(DirectoryStore::in_memory()),
        ))
    }
}
