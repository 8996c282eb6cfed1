/// User profiles: the `profileInfo` lookup consulted when rosters and joins
/// are relayed, plus the local store behind the profile-update endpoint.
///
/// Lookups are async and fallible. A failed lookup drops the event that
/// triggered it, so providers should fail rather than guess.
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Public profile of one nick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub nick: String,
    #[serde(default)]
    pub bio: String,
    #[serde(default)]
    pub contact: String,
    pub picture: String,
}

impl Profile {
    /// Profile for a nick nobody has registered.
    pub fn placeholder(nick: &str, picture: &str) -> Self {
        Self {
            nick: nick.to_string(),
            bio: String::new(),
            contact: String::new(),
            picture: picture.to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile backend unavailable: {0}")]
    Unavailable(String),
    #[error("profile store I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("profile store format: {0}")]
    Format(#[from] serde_json::Error),
}

/// Source of profile information.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    /// Profiles for the given nicks, in request order. Unknown nicks are
    /// omitted from the result.
    async fn profile_info(&self, nicks: &[String]) -> Result<Vec<Profile>, ProfileError>;
}

/// Profile store: in-memory map with optional JSON persistence.
///
/// Persistence writes `{data_dir}/profiles.json` to a temporary file and
/// renames it into place.
#[derive(Debug)]
pub struct ProfileStore {
    profiles: RwLock<HashMap<String, Profile>>,
    persist_path: Option<PathBuf>,
    /// Held across one file write; snapshots reach disk in update order.
    writing: Mutex<()>,
}

impl Default for ProfileStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileStore {
    /// Empty store, no persistence.
    pub fn new() -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            persist_path: None,
            writing: Mutex::new(()),
        }
    }

    /// Load `{data_dir}/profiles.json`, or start empty if it is missing or
    /// unreadable.
    pub fn load_or_create(data_dir: &Path) -> Self {
        let path = data_dir.join("profiles.json");
        let mut profiles = HashMap::new();

        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(json) => match serde_json::from_str::<Vec<Profile>>(&json) {
                    Ok(list) => {
                        for p in list {
                            profiles.insert(p.nick.clone(), p);
                        }
                        info!(count = profiles.len(), "loaded user profiles");
                    }
                    Err(e) => warn!("failed to parse {}: {e}", path.display()),
                },
                Err(e) => warn!("failed to read {}: {e}", path.display()),
            }
        }

        Self {
            profiles: RwLock::new(profiles),
            persist_path: Some(path),
            writing: Mutex::new(()),
        }
    }

    pub async fn get(&self, nick: &str) -> Option<Profile> {
        self.profiles.read().await.get(nick).cloned()
    }

    /// Insert or replace a profile and persist the store.
    pub async fn put(&self, profile: Profile) -> Result<(), ProfileError> {
        let Some(path) = &self.persist_path else {
            self.profiles.write().await.insert(profile.nick.clone(), profile);
            return Ok(());
        };
        let (json, _writing) = {
            let mut profiles = self.profiles.write().await;
            profiles.insert(profile.nick.clone(), profile);
            // Lock the file before releasing the map.
            (snapshot(&profiles)?, self.writing.lock().await)
        };
        write_atomic(path, json).await
    }

    pub async fn len(&self) -> usize {
        self.profiles.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.profiles.read().await.is_empty()
    }

}

fn snapshot(profiles: &HashMap<String, Profile>) -> Result<String, ProfileError> {
    let mut list: Vec<&Profile> = profiles.values().collect();
    list.sort_by(|a, b| a.nick.cmp(&b.nick));
    Ok(serde_json::to_string_pretty(&list)?)
}

async fn write_atomic(path: &Path, json: String) -> Result<(), ProfileError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl ProfileProvider for ProfileStore {
    async fn profile_info(&self, nicks: &[String]) -> Result<Vec<Profile>, ProfileError> {
        let profiles = self.profiles.read().await;
        Ok(nicks.iter().filter_map(|n| profiles.get(n).cloned()).collect())
    }
}
