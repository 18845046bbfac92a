//! 运行状态持久化
//!
//! StateStore 按 run id 读写 AgentState 快照，用于运行中的崩溃恢复 / 续跑，不是永久历史。
//! 不同 run id 之间可以并发读写；同一 run id 要求写后读一致。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::AgentState;

/// 以 run id 为键的状态存储
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, run_id: &str) -> anyhow::Result<Option<AgentState>>;
    async fn save(&self, run_id: &str, state: &AgentState) -> anyhow::Result<()>;
    async fn clear(&self, run_id: &str) -> anyhow::Result<()>;
}

/// 进程内存储
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, AgentState>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self, run_id: &str) -> anyhow::Result<Option<AgentState>> {
        Ok(self.states.read().await.get(run_id).cloned())
    }

    async fn save(&self, run_id: &str, state: &AgentState) -> anyhow::Result<()> {
        self.states
            .write()
            .await
            .insert(run_id.to_string(), state.clone());
        Ok(())
    }

    async fn clear(&self, run_id: &str) -> anyhow::Result<()> {
        self.states.write().await.remove(run_id);
        Ok(())
    }
}

/// 文件存储：每个 run id 一个 JSON 文件（{dir}/{run_id}.json）
#[derive(Debug)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn path_for(&self, run_id: &str) -> PathBuf {
        // run id 只允许作为文件名，不允许路径分隔
        let safe: String = run_id
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    /// 文件不存在时返回 None
    async fn load(&self, run_id: &str) -> anyhow::Result<Option<AgentState>> {
        let path = self.path_for(run_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(Some(serde_json::from_str(&data)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 父目录不存在时自动创建
    async fn save(&self, run_id: &str, state: &AgentState) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let data = serde_json::to_string_pretty(state)?;
        tokio::fs::write(self.path_for(run_id), data).await?;
        Ok(())
    }

    async fn clear(&self, run_id: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_file(self.path_for(run_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Budget, Goal, StateManager};

    fn state() -> AgentState {
        StateManager::default().create_initial_state(Goal::new("persist me"), Budget::default())
    }

    #[tokio::test]
    async fn test_in_memory_round_trip_and_clear() {
        let store = InMemoryStateStore::new();
        let s = state();
        store.save("run-1", &s).await.unwrap();
        assert_eq!(store.load("run-1").await.unwrap(), Some(s));
        assert!(store.load("run-2").await.unwrap().is_none());
        store.clear("run-1").await.unwrap();
        assert!(store.load("run-1").await.unwrap().is_none());
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn test_file_store_persists_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("runs"));
        let s = state();
        store.save("abc", &s).await.unwrap();
        assert!(dir.path().join("runs").join("abc.json").exists());
        assert_eq!(store.load("abc").await.unwrap(), Some(s));
        store.clear("abc").await.unwrap();
        assert!(store.load("abc").await.unwrap().is_none());
        // 重复清理不报错
        store.clear("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_sanitizes_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path());
        store.save("../escape", &state()).await.unwrap();
        assert!(dir.path().join("___escape.json").exists());
    }

    #[tokio::test]
    async fn test_concurrent_distinct_runs() {
        let store = std::sync::Arc::new(InMemoryStateStore::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let id = format!("run-{i}");
                store.save(&id, &state()).await.unwrap();
                store.load(&id).await.unwrap().is_some()
            }));
        }
        for h in handles {
            assert!(h.await.unwrap());
        }
        assert_eq!(store.len().await, 8);
    }
}
