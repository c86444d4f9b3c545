use crate::domain::models::{NewTodo, SessionRecord, Settings, Todo, TodoPatch};
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Local,
    Remote,
}

impl StoreKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    async fn list_todos(&self) -> Result<Vec<Todo>, InfraError>;

    async fn get_todo(&self, id: &str) -> Result<Option<Todo>, InfraError>;

    async fn create_todo(&self, fields: NewTodo) -> Result<String, InfraError>;

    async fn update_todo(&self, id: &str, patch: &TodoPatch) -> Result<(), InfraError>;

    async fn delete_todo(&self, id: &str) -> Result<(), InfraError>;

    async fn toggle_todo(&self, id: &str) -> Result<Todo, InfraError> {
        let mut todo = self
            .get_todo(id)
            .await?
            .ok_or_else(|| InfraError::NotFound(format!("todo {id}")))?;
        let patch = TodoPatch::toggled(&todo, Utc::now());
        self.update_todo(id, &patch).await?;
        todo.apply_patch(&patch);
        Ok(todo)
    }

    async fn record_session(&self, record: &SessionRecord) -> Result<(), InfraError>;

    async fn list_sessions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>, InfraError>;

    async fn load_settings(&self) -> Result<Option<Settings>, InfraError>;

    async fn save_settings(&self, settings: &Settings) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LocalExport {
    pub schema: u8,
    pub exported_at: DateTime<Utc>,
    pub todos: Vec<Todo>,
    pub sessions: Vec<SessionRecord>,
    pub settings: Option<Settings>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub todos: usize,
    pub sessions: usize,
    pub settings: bool,
}

#[async_trait]
pub trait ExtendedLocalStore: RecordStore {
    async fn export_data(&self) -> Result<LocalExport, InfraError>;

    async fn import_data(&self, export: LocalExport) -> Result<ImportSummary, InfraError>;

    async fn reset_all(&self) -> Result<(), InfraError>;

    async fn export_json(&self) -> Result<String, InfraError> {
        let export = self.export_data().await?;
        Ok(serde_json::to_string_pretty(&export)?)
    }

    async fn import_json(&self, raw: &str) -> Result<ImportSummary, InfraError> {
        let export: LocalExport = serde_json::from_str(raw)?;
        if export.schema != 1 {
            return Err(InfraError::InvalidInput(format!(
                "unsupported export schema {}",
                export.schema
            )));
        }
        for todo in &export.todos {
            todo.validate().map_err(InfraError::InvalidInput)?;
        }
        self.import_data(export).await
    }
}

pub(crate) fn require_id(id: &str, field_name: &str) -> Result<String, InfraError> {
    let normalized = id.trim();
    if normalized.is_empty() {
        return Err(InfraError::InvalidInput(format!(
            "{field_name} must not be empty"
        )));
    }
    Ok(normalized.to_string())
}
