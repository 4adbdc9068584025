/// Run store: execution id -> latest serialized context

use futures::future::BoxFuture;
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::runtime::context::ExecutionSnapshot;

pub trait RunStore: Send + Sync {
    /// Insert or replace the snapshot of a run
    fn save(&self, snapshot: ExecutionSnapshot) -> BoxFuture<'_, ()>;

    fn get<'a>(&'a self, execution_id: &'a str) -> BoxFuture<'a, Option<ExecutionSnapshot>>;

    /// All stored runs, most recently started first
    fn list(&self) -> BoxFuture<'_, Vec<ExecutionSnapshot>>;
}

/// Process-lifetime store; concurrent runs insert and read independently
#[derive(Debug, Default)]
pub struct InMemoryRunStore {
    runs: RwLock<HashMap<String, ExecutionSnapshot>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunStore for InMemoryRunStore {
    fn save(&self, snapshot: ExecutionSnapshot) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut runs = self.runs.write().await;
            runs.insert(snapshot.execution_id.clone(), snapshot);
        })
    }

    fn get<'a>(&'a self, execution_id: &'a str) -> BoxFuture<'a, Option<ExecutionSnapshot>> {
        Box::pin(async move { self.runs.read().await.get(execution_id).cloned() })
    }

    fn list(&self) -> BoxFuture<'_, Vec<ExecutionSnapshot>> {
        Box::pin(async move {
            let runs = self.runs.read().await;
            let mut snapshots: Vec<ExecutionSnapshot> = runs.values().cloned().collect();
            // rfc3339 timestamps in UTC sort lexically
            snapshots.sort_by(|a, b| b.start_time.cmp(&a.start_time));
            snapshots
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::context::{ExecutionContext, RunStatus};

    #[tokio::test]
    async fn test_save_replaces_previous_snapshot() {
        let store = InMemoryRunStore::new();
        let mut ctx = ExecutionContext::new("wf", "exec-1");
        store.save(ctx.snapshot()).await;
        assert_eq!(store.get("exec-1").await.unwrap().status, RunStatus::Running);

        ctx.complete(RunStatus::Completed);
        store.save(ctx.snapshot()).await;
        assert_eq!(store.get("exec-1").await.unwrap().status, RunStatus::Completed);
        assert_eq!(store.list().await.len(), 1);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_runs() {
        let store = std::sync::Arc::new(InMemoryRunStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store.save(ExecutionContext::new("wf", format!("exec-{}", i)).snapshot()).await;
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.list().await.len(), 8);
    }
}
