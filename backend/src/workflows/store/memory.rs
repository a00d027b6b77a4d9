// In-memory workflow store backing the engine and sweep tests

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use marketplace_shared::{LastError, TransitionLogEntry, Workflow};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use uuid::Uuid;

use super::{LockedWorkflow, StoreError, StoreResult, WorkflowStore};

#[derive(Debug, Default)]
struct Tables {
    workflows: HashMap<Uuid, Workflow>,
    by_order: HashMap<Uuid, Uuid>,
    transitions: Vec<TransitionLogEntry>,
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryWorkflowStore {
    tables: Arc<RwLock<Tables>>,
    row_locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn row_lock(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.row_locks
            .lock()
            .await
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn select<F>(&self, predicate: F) -> Vec<Workflow>
    where
        F: Fn(&Workflow) -> bool,
    {
        self.tables
            .read()
            .await
            .workflows
            .values()
            .filter(|w| predicate(w))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn insert(&self, workflow: &Workflow, entry: &TransitionLogEntry) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.by_order.contains_key(&workflow.order_id) {
            return Err(StoreError::Duplicate(workflow.order_id));
        }
        tables.by_order.insert(workflow.order_id, workflow.id);
        tables.workflows.insert(workflow.id, workflow.clone());
        tables.transitions.push(entry.clone());
        Ok(())
    }

    async fn find(&self, id: Uuid) -> StoreResult<Option<Workflow>> {
        Ok(self.tables.read().await.workflows.get(&id).cloned())
    }

    async fn find_by_order(&self, order_id: Uuid) -> StoreResult<Option<Workflow>> {
        let tables = self.tables.read().await;
        Ok(tables
            .by_order
            .get(&order_id)
            .and_then(|id| tables.workflows.get(id))
            .cloned())
    }

    async fn lock(&self, id: Uuid) -> StoreResult<Option<Box<dyn LockedWorkflow>>> {
        let guard = self.row_lock(id).await.lock_owned().await;

        // Read only after the lock is held so the handle sees the latest commit.
        let Some(workflow) = self.find(id).await? else {
            return Ok(None);
        };

        Ok(Some(Box::new(InMemoryLockedWorkflow {
            tables: self.tables.clone(),
            guard: Some(guard),
            workflow,
            dirty: false,
            staged_entries: Vec::new(),
        })))
    }

    async fn history(&self, workflow_id: Uuid) -> StoreResult<Vec<TransitionLogEntry>> {
        let mut entries: Vec<TransitionLogEntry> = self
            .tables
            .read()
            .await
            .transitions
            .iter()
            .filter(|entry| entry.workflow_id == workflow_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        entries.sort_by_key(|entry| entry.transitioned_at);
        Ok(entries)
    }

    async fn sla_breach_candidates(&self, now: DateTime<Utc>) -> StoreResult<Vec<Workflow>> {
        let mut candidates = self
            .select(|w| {
                w.sla_breached_at(now) && !w.escalation_required && !w.current_state.is_terminal()
            })
            .await;
        candidates.sort_by_key(|w| (w.priority, w.sla_deadline));
        Ok(candidates)
    }

    async fn automation_candidates(&self) -> StoreResult<Vec<Workflow>> {
        let mut candidates = self
            .select(|w| w.automation_config.pending.is_some() && !w.current_state.is_terminal())
            .await;
        candidates.sort_by_key(|w| w.automation_config.pending.as_ref().map(|p| p.due_at));
        Ok(candidates)
    }

    async fn escalated(&self) -> StoreResult<Vec<Workflow>> {
        let mut escalated = self.select(|w| w.escalation_required).await;
        escalated.sort_by_key(|w| (w.priority, w.escalation_date));
        Ok(escalated)
    }

    async fn record_error(&self, id: Uuid, error: &LastError) -> StoreResult<()> {
        // Waits behind any open handle on the row, like the UPDATE it stands in for.
        let _guard = self.row_lock(id).await.lock_owned().await;
        if let Some(workflow) = self.tables.write().await.workflows.get_mut(&id) {
            workflow.record_error(error.clone());
        }
        Ok(())
    }
}

struct InMemoryLockedWorkflow {
    tables: Arc<RwLock<Tables>>,
    guard: Option<OwnedMutexGuard<()>>,
    workflow: Workflow,
    dirty: bool,
    staged_entries: Vec<TransitionLogEntry>,
}

#[async_trait]
impl LockedWorkflow for InMemoryLockedWorkflow {
    fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    async fn save(&mut self, workflow: &Workflow) -> StoreResult<()> {
        if self.guard.is_none() {
            return Err(StoreError::Released);
        }
        self.workflow = workflow.clone();
        self.dirty = true;
        Ok(())
    }

    async fn append(&mut self, entry: &TransitionLogEntry) -> StoreResult<()> {
        if self.guard.is_none() {
            return Err(StoreError::Released);
        }
        self.staged_entries.push(entry.clone());
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let guard = self.guard.take().ok_or(StoreError::Released)?;
        {
            let mut tables = self.tables.write().await;
            if self.dirty {
                tables.workflows.insert(self.workflow.id, self.workflow.clone());
            }
            tables.transitions.append(&mut self.staged_entries);
        }
        drop(guard);
        Ok(())
    }
}
