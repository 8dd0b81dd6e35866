//! Server configuration from environment variables, plus the optional JSON
//! seed file that provisions users and groups at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::TokenDirectory;
use crate::connection::ConnectionOptions;
use crate::groups::GroupDirectory;
use campuschat_proto::Identity;

const DEFAULT_ADDR: &str = "0.0.0.0:9010";
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: String,
    pub auth_timeout: Duration,
    pub membership_recheck: Option<Duration>,
    pub seed_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
            membership_recheck: None,
            seed_path: None,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(addr) = std::env::var("CAMPUSCHAT_ADDR") {
            config.addr = addr;
        }
        if let Some(secs) = env_u64("CAMPUSCHAT_AUTH_TIMEOUT_SECS") {
            config.auth_timeout = Duration::from_secs(secs.max(1));
        }
        if let Some(secs) = env_u64("CAMPUSCHAT_MEMBERSHIP_RECHECK_SECS") {
            // 0 keeps the default accepted-staleness behavior
            config.membership_recheck = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Ok(path) = std::env::var("CAMPUSCHAT_SEED") {
            config.seed_path = Some(PathBuf::from(path));
        }
        config
    }

    pub fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            auth_timeout: self.auth_timeout,
            membership_recheck: self.membership_recheck,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    match std::env::var(key) {
        Ok(value) => match value.parse() {
            Ok(parsed) => Some(parsed),
            Err(_) => {
                warn!(key, value, "ignoring unparseable environment variable");
                None
            }
        },
        Err(_) => None,
    }
}

#[derive(Debug, Error)]
pub enum SeedError {
    #[error("failed to read seed file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse seed file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct SeedUser {
    token: String,
    user_id: String,
    name: String,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct SeedGroup {
    group_id: String,
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    max_capacity: Option<usize>,
}

/// Startup provisioning for the in-memory directories. In a deployment
/// fronted by the real user directory and group service this is unused.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    users: Vec<SeedUser>,
    #[serde(default)]
    groups: Vec<SeedGroup>,
}

impl Seed {
    pub fn load(path: &Path) -> Result<Self, SeedError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn apply(&self, tokens: &TokenDirectory, groups: &GroupDirectory) {
        for user in &self.users {
            let identity = Identity {
                user_id: user.user_id.clone(),
                display_name: user.name.clone(),
            };
            match user.expires_at {
                Some(expires_at) => tokens.issue_expiring(&user.token, identity, expires_at),
                None => tokens.issue(&user.token, identity),
            }
        }
        for group in &self.groups {
            groups.create(&group.group_id, group.max_capacity);
            for member in &group.members {
                if let Err(e) = groups.add_member(&group.group_id, member) {
                    warn!(group = %group.group_id, member = %member, error = %e, "skipping seed member");
                }
            }
        }
        info!(
            users = self.users.len(),
            groups = self.groups.len(),
            "seed applied"
        );
    }
}
