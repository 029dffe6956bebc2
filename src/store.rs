//! Profile store: durable rating/streak state keyed by user and mode.

use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::domain::{Mode, SkillProfile};
use crate::error::StoreError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileKey {
  pub user: String,
  pub mode: Mode,
}

impl ProfileKey {
  pub fn new(user: impl Into<String>, mode: Mode) -> Self {
    Self { user: user.into(), mode }
  }
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
  /// `None` means the profile was never written.
  async fn read(&self, key: &ProfileKey) -> Result<Option<SkillProfile>, StoreError>;
  async fn write(&self, key: &ProfileKey, profile: &SkillProfile) -> Result<(), StoreError>;
}

/// In-process store; contents die with the process.
#[derive(Default)]
pub struct MemoryProfileStore {
  profiles: RwLock<HashMap<ProfileKey, SkillProfile>>,
}

impl MemoryProfileStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
  async fn read(&self, key: &ProfileKey) -> Result<Option<SkillProfile>, StoreError> {
    Ok(self.profiles.read().await.get(key).copied())
  }

  async fn write(&self, key: &ProfileKey, profile: &SkillProfile) -> Result<(), StoreError> {
    self.profiles.write().await.insert(key.clone(), *profile);
    Ok(())
  }
}

/// One JSON document per user holding a profile per mode.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UserDocument {
  #[serde(default)]
  translation: Option<SkillProfile>,
  #[serde(default)]
  listening: Option<SkillProfile>,
}

impl UserDocument {
  fn slot(&mut self, mode: Mode) -> &mut Option<SkillProfile> {
    match mode {
      Mode::Translation => &mut self.translation,
      Mode::Listening => &mut self.listening,
    }
  }
}

pub struct JsonFileProfileStore {
  dir: PathBuf,
  // Serializes read-modify-write of user documents.
  lock: tokio::sync::Mutex<()>,
}

impl JsonFileProfileStore {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into(), lock: tokio::sync::Mutex::new(()) }
  }

  fn path_for(&self, user: &str) -> PathBuf {
    self.dir.join(format!("{}.json", sanitize_user(user)))
  }

  async fn load(&self, user: &str) -> Result<UserDocument, StoreError> {
    match tokio::fs::read_to_string(self.path_for(user)).await {
      Ok(s) => Ok(serde_json::from_str(&s)?),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(UserDocument::default()),
      Err(e) => Err(e.into()),
    }
  }
}

#[async_trait]
impl ProfileStore for JsonFileProfileStore {
  #[instrument(level = "debug", skip(self), fields(user = %key.user, mode = %key.mode))]
  async fn read(&self, key: &ProfileKey) -> Result<Option<SkillProfile>, StoreError> {
    let _guard = self.lock.lock().await;
    let mut doc = self.load(&key.user).await?;
    Ok(*doc.slot(key.mode))
  }

  #[instrument(level = "debug", skip(self, profile), fields(user = %key.user, mode = %key.mode, rating = profile.rating))]
  async fn write(&self, key: &ProfileKey, profile: &SkillProfile) -> Result<(), StoreError> {
    let _guard = self.lock.lock().await;
    let mut doc = self.load(&key.user).await?;
    *doc.slot(key.mode) = Some(*profile);
    tokio::fs::create_dir_all(&self.dir).await?;
    let path = self.path_for(&key.user);
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec_pretty(&doc)?).await?;
    tokio::fs::rename(&tmp, &path).await?;
    debug!(target: "drill_gauntlet", path = %path.display(), "Profile written");
    Ok(())
  }
}

/// Keep `[A-Za-z0-9_-]`, replace the rest; empty ids become "anonymous".
pub fn sanitize_user(user: &str) -> String {
  let cleaned: String = user
    .chars()
    .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
    .collect();
  if cleaned.is_empty() { "anonymous".into() } else { cleaned }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn memory_store_round_trip() {
    let store = MemoryProfileStore::new();
    let key = ProfileKey::new("ana", Mode::Listening);
    assert_eq!(store.read(&key).await.unwrap(), None);
    let p = SkillProfile { rating: 1300, streak: 2, max_rating: 1310 };
    store.write(&key, &p).await.unwrap();
    assert_eq!(store.read(&key).await.unwrap(), Some(p));
    assert_eq!(store.read(&ProfileKey::new("ana", Mode::Translation)).await.unwrap(), None);
  }

  #[tokio::test]
  async fn file_store_keeps_modes_apart() {
    let dir = std::env::temp_dir().join(format!("drill-gauntlet-{}", uuid::Uuid::new_v4()));
    let store = JsonFileProfileStore::new(&dir);
    let t = ProfileKey::new("bo/../b", Mode::Translation);
    let l = ProfileKey::new("bo/../b", Mode::Listening);
    assert_eq!(store.read(&t).await.unwrap(), None);

    store.write(&t, &SkillProfile::starting_at(600)).await.unwrap();
    store.write(&l, &SkillProfile { rating: 1250, streak: 1, max_rating: 1250 }).await.unwrap();

    let fresh = JsonFileProfileStore::new(&dir);
    assert_eq!(fresh.read(&t).await.unwrap(), Some(SkillProfile::starting_at(600)));
    assert_eq!(fresh.read(&l).await.unwrap().map(|p| p.rating), Some(1250));
    assert!(dir.join("bo____b.json").exists());
    let _ = std::fs::remove_dir_all(&dir);
  }

  #[test]
  fn user_ids_are_sanitized() {
    assert_eq!(sanitize_user("a-b_C9"), "a-b_C9");
    assert_eq!(sanitize_user("../etc"), "___etc");
    assert_eq!(sanitize_user(""), "anonymous");
  }
}
