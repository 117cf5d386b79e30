use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{ExecutionFilter, ExecutionRepository, RepositoryError};
use crate::model::{BatchExecution, Execution};

/// In-memory execution storage
#[derive(Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<DashMap<Uuid, Execution>>,
    batches: Arc<DashMap<Uuid, BatchExecution>>,
}

impl InMemoryExecutionRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions
    pub fn execution_count(&self) -> usize {
        self.executions.len()
    }

    /// Number of stored batches
    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn insert_batch(
        &self,
        batch: &BatchExecution,
        executions: &[Execution],
    ) -> Result<(), RepositoryError> {
        if self.batches.contains_key(&batch.id) {
            return Err(RepositoryError::Conflict(format!("batch {}", batch.id)));
        }
        if let Some(existing) = executions
            .iter()
            .find(|e| self.executions.contains_key(&e.id))
        {
            return Err(RepositoryError::Conflict(format!(
                "execution {}",
                existing.id
            )));
        }

        for execution in executions {
            self.executions.insert(execution.id, execution.clone());
        }
        self.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        match self.executions.entry(execution.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(RepositoryError::Conflict(
                format!("execution {}", execution.id),
            )),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(execution.clone());
                Ok(())
            }
        }
    }

    async fn get_execution(&self, id: Uuid) -> Result<Option<Execution>, RepositoryError> {
        Ok(self.executions.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update_execution(&self, execution: &Execution) -> Result<(), RepositoryError> {
        match self.executions.get_mut(&execution.id) {
            Some(mut entry) => {
                *entry = execution.clone();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!(
                "execution {}",
                execution.id
            ))),
        }
    }

    async fn list_executions(
        &self,
        filter: &ExecutionFilter,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let mut matching: Vec<Execution> = self
            .executions
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();

        matching.sort_by(|a, b| b.enqueued_at.cmp(&a.enqueued_at));
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        Ok(matching)
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<BatchExecution>, RepositoryError> {
        Ok(self.batches.get(&id).map(|entry| entry.value().clone()))
    }

    async fn list_batch_executions(
        &self,
        batch_id: Uuid,
    ) -> Result<Vec<Execution>, RepositoryError> {
        let execution_ids = self
            .batches
            .get(&batch_id)
            .map(|entry| entry.value().execution_ids.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("batch {}", batch_id)))?;

        let mut members = Vec::with_capacity(execution_ids.len());
        for id in execution_ids {
            let execution = self
                .executions
                .get(&id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| {
                    RepositoryError::Storage(format!(
                        "batch {} references missing execution {}",
                        batch_id, id
                    ))
                })?;
            members.push(execution);
        }
        members.sort_by_key(|e| e.batch_position);
        Ok(members)
    }

    async fn mark_batch_cancel_requested(
        &self,
        batch_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut batch = self
            .batches
            .get_mut(&batch_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("batch {}", batch_id)))?;
        batch.cancel_requested_at.get_or_insert(at);
        Ok(())
    }

    async fn list_batches(
        &self,
        user_id: Option<&str>,
        limit: Option<usize>,
    ) -> Result<Vec<BatchExecution>, RepositoryError> {
        let mut batches: Vec<BatchExecution> = self
            .batches
            .iter()
            .filter(|entry| user_id.map_or(true, |u| entry.value().user_id == u))
            .map(|entry| entry.value().clone())
            .collect();

        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            batches.truncate(limit);
        }
        Ok(batches)
    }
}
