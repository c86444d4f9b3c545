use crate::application::store_selector::StoreTransition;
use crate::domain::models::{MigrationRecordError, MigrationResult, MigrationStatus, Todo};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::RecordStore;
use scopeguard::guard;
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("a migration is already in progress")]
    AlreadyRunning,
    #[error(transparent)]
    Store(#[from] InfraError),
}

pub struct MigrationEngine {
    local: Arc<dyn RecordStore>,
    remote: Arc<dyn RecordStore>,
    retry_policy: RetryPolicy,
    running: AtomicBool,
    status: Mutex<MigrationStatus>,
    last_result: Mutex<Option<MigrationResult>>,
}

impl MigrationEngine {
    pub fn new(local: Arc<dyn RecordStore>, remote: Arc<dyn RecordStore>) -> Self {
        Self {
            local,
            remote,
            retry_policy: RetryPolicy::default(),
            running: AtomicBool::new(false),
            status: Mutex::new(MigrationStatus::Idle),
            last_result: Mutex::new(None),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn status(&self) -> MigrationStatus {
        self.status
            .lock()
            .map(|status| *status)
            .unwrap_or(MigrationStatus::Idle)
    }

    pub fn last_result(&self) -> Option<MigrationResult> {
        self.last_result
            .lock()
            .ok()
            .and_then(|result| result.clone())
    }

    pub async fn migrate_local_todos(&self) -> Result<MigrationResult, MigrationError> {
        self.run(None).await
    }

    pub async fn retry_migration(&self) -> Result<MigrationResult, MigrationError> {
        self.run(None).await
    }

    /// Retries only the ids that failed last time and still exist locally.
    /// Without a previous run this is a full pass; a clean previous run is returned as is.
    pub async fn retry_failed_only(&self) -> Result<MigrationResult, MigrationError> {
        let Some(previous) = self.last_result() else {
            return self.run(None).await;
        };
        if previous.error_count == 0 {
            return Ok(previous);
        }
        self.run(Some(previous.failed_ids().into_iter().collect())).await
    }

    pub async fn migrate_on_upgrade(
        &self,
        transition: StoreTransition,
    ) -> Result<Option<MigrationResult>, MigrationError> {
        if transition.is_upgrade() {
            return self.run(None).await.map(Some);
        }
        Ok(None)
    }

    async fn run(&self, only: Option<HashSet<String>>) -> Result<MigrationResult, MigrationError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("migration requested while another run is active");
            return Err(MigrationError::AlreadyRunning);
        }
        let _running = guard((), |_| self.running.store(false, Ordering::SeqCst));

        self.set_status(MigrationStatus::InProgress);
        let outcome = self.migrate(only).await;
        match &outcome {
            Ok(result) => {
                self.set_status(result.status);
                if let Ok(mut last_result) = self.last_result.lock() {
                    *last_result = Some(result.clone());
                }
                info!(
                    status = ?result.status,
                    migrated = result.migrated_count,
                    total = result.total_count,
                    errors = result.error_count,
                    "{}",
                    result.message
                );
            }
            Err(error) => {
                self.set_status(MigrationStatus::Failed);
                warn!(%error, "migration could not read local todos");
            }
        }
        outcome
    }

    async fn migrate(&self, only: Option<HashSet<String>>) -> Result<MigrationResult, MigrationError> {
        let mut todos = self.local.list_todos().await?;
        if let Some(only) = &only {
            todos.retain(|todo| only.contains(&todo.id));
        }
        if todos.is_empty() {
            return Ok(MigrationResult::from_counts(0, Vec::new()));
        }

        let remote_ids = match self
            .with_retry(|| self.remote.list_todos())
            .await
        {
            Ok(remote) => remote.into_iter().map(|todo| todo.id).collect::<HashSet<_>>(),
            Err(error) => {
                // Without a presence index no record can be placed safely.
                let message = error.to_string();
                let errors = todos
                    .iter()
                    .map(|todo| MigrationRecordError {
                        record_id: todo.id.clone(),
                        error: message.clone(),
                    })
                    .collect::<Vec<_>>();
                return Ok(MigrationResult::from_counts(todos.len(), errors));
            }
        };

        let mut errors = Vec::new();
        for todo in &todos {
            if let Err(error) = self.migrate_one(todo, remote_ids.contains(&todo.id)).await {
                warn!(todo_id = %todo.id, %error, "failed to migrate todo");
                errors.push(MigrationRecordError {
                    record_id: todo.id.clone(),
                    error: error.to_string(),
                });
            }
        }

        Ok(MigrationResult::from_counts(todos.len(), errors))
    }

    async fn migrate_one(&self, todo: &Todo, exists_remotely: bool) -> Result<(), InfraError> {
        if exists_remotely {
            let patch = todo.to_full_patch();
            return self
                .with_retry(|| self.remote.update_todo(&todo.id, &patch))
                .await;
        }

        self.with_retry(|| self.remote.create_todo(todo.to_new_todo()))
            .await?;
        if todo.is_completed {
            let patch = todo.completion_patch();
            self.with_retry(|| self.remote.update_todo(&todo.id, &patch))
                .await?;
        }
        Ok(())
    }

    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if error.is_transient() && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn set_status(&self, status: MigrationStatus) {
        if let Ok(mut current) = self.status.lock() {
            *current = status;
        }
    }
}
