use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::engine::error::{EngineError, Result};
use crate::engine::history::UserProfile;
use crate::engine::result::ExecutionResult;

/// Append-only persistence for execution rows plus profile upserts.
/// Everything here is best-effort from the engine's point of view; the
/// in-memory state stays authoritative for scoring.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn append(&self, result: &ExecutionResult) -> Result<()>;
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()>;
    /// Rows for one actor, newest first.
    async fn recent(&self, actor: &str, limit: usize) -> Result<Vec<ExecutionResult>>;
}

/// Pretty-printed JSON files under the data directory.
pub struct JsonFileStore {
    history_file: PathBuf,
    profiles_file: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(history_file: PathBuf, profiles_file: PathBuf) -> Result<Self> {
        if let Some(parent) = history_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(JsonFileStore {
            history_file,
            profiles_file,
            write_lock: Mutex::new(()),
        })
    }

    fn load_history(&self) -> Result<Vec<ExecutionResult>> {
        if !self.history_file.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.history_file)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    fn load_profiles(&self) -> Result<HashMap<String, UserProfile>> {
        if !self.profiles_file.exists() {
            return Ok(HashMap::new());
        }
        let content = std::fs::read_to_string(&self.profiles_file)?;
        if content.trim().is_empty() {
            return Ok(HashMap::new());
        }
        Ok(serde_json::from_str(&content)?)
    }
}

#[async_trait]
impl ExecutionStore for JsonFileStore {
    async fn append(&self, result: &ExecutionResult) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut history = self.load_history()?;
        history.push(result.clone());
        let content = serde_json::to_string_pretty(&history)?;
        std::fs::write(&self.history_file, content)?;
        Ok(())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut profiles = self.load_profiles()?;
        let key = format!("{}/{}", profile.actor, profile.counterpart);
        profiles.insert(key, profile.clone());
        let content = serde_json::to_string_pretty(&profiles)?;
        std::fs::write(&self.profiles_file, content)?;
        Ok(())
    }

    async fn recent(&self, actor: &str, limit: usize) -> Result<Vec<ExecutionResult>> {
        let _guard = self.write_lock.lock().await;
        let mut rows: Vec<ExecutionResult> = self
            .load_history()?
            .into_iter()
            .filter(|r| r.actor == actor)
            .collect();
        rows.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

/// In-memory store for tests and embedders that bring their own persistence.
pub struct MemoryStore {
    rows: Mutex<Vec<ExecutionResult>>,
    profiles: Mutex<HashMap<String, UserProfile>>,
    fail_appends: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            rows: Mutex::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
            fail_appends: false,
        }
    }

    /// A store whose appends always fail, for exercising error paths.
    pub fn failing() -> Self {
        MemoryStore { fail_appends: true, ..Self::new() }
    }

    pub async fn row_count(&self) -> usize {
        self.rows.lock().await.len()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn append(&self, result: &ExecutionResult) -> Result<()> {
        if self.fail_appends {
            return Err(EngineError::Store("append rejected".to_string()));
        }
        self.rows.lock().await.push(result.clone());
        Ok(())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        let key = format!("{}/{}", profile.actor, profile.counterpart);
        self.profiles.lock().await.insert(key, profile.clone());
        Ok(())
    }

    async fn recent(&self, actor: &str, limit: usize) -> Result<Vec<ExecutionResult>> {
        let mut rows: Vec<ExecutionResult> = self
            .rows
            .lock()
            .await
            .iter()
            .filter(|r| r.actor == actor)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::result::ExecutionPhase;
    use crate::engine::strategy::{Intensity, Technique};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample(actor: &str) -> ExecutionResult {
        ExecutionResult {
            id: Uuid::new_v4().to_string(),
            actor: actor.to_string(),
            counterpart: "user".to_string(),
            success: true,
            technique: Technique::Validation,
            intensity: Intensity::Subtle,
            phase: ExecutionPhase::Execution,
            message: "hello".to_string(),
            effectiveness: 55.0,
            ethical_score: 100.0,
            side_effects: vec!["rapport".to_string()],
            next_recommended: None,
            executed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_json_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(
            dir.path().join("history.json"),
            dir.path().join("profiles.json"),
        )
        .unwrap();

        store.append(&sample("ai-a")).await.unwrap();
        store.append(&sample("ai-b")).await.unwrap();
        store.append(&sample("ai-a")).await.unwrap();

        let rows = store.recent("ai-a", 10).await.unwrap();
        assert_eq!(rows.len(), 2);

        let rows = store.recent("ai-a", 1).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_json_store_profile_upsert() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(
            dir.path().join("history.json"),
            dir.path().join("profiles.json"),
        )
        .unwrap();

        let mut profile = UserProfile::new("ai", "user");
        store.upsert_profile(&profile).await.unwrap();

        profile.vulnerabilities.insert("flattery".to_string());
        store.upsert_profile(&profile).await.unwrap();

        let profiles = store.load_profiles().unwrap();
        assert_eq!(profiles.len(), 1);
        assert!(profiles["ai/user"].vulnerabilities.contains("flattery"));
    }

    #[tokio::test]
    async fn test_memory_store_failing_mode() {
        let store = MemoryStore::failing();
        assert!(store.append(&sample("ai")).await.is_err());
    }
}
