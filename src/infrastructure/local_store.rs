use crate::domain::models::{NewTodo, SessionRecord, Settings, TimerPhase, Todo, TodoPatch, TodoPriority};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::{
    next_id, require_id, ExtendedLocalStore, ImportSummary, LocalExport, RecordStore, StoreKind,
};
use crate::infrastructure::storage::{format_timestamp, parse_timestamp, with_connection};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TODO_COLUMNS: &str = "id, title, description, is_completed, created_at, completed_at,
     category, priority, estimated_minutes";

#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    db_path: PathBuf,
}

impl SqliteRecordStore {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }
}

fn priority_to_str(priority: TodoPriority) -> &'static str {
    match priority {
        TodoPriority::Low => "low",
        TodoPriority::Medium => "medium",
        TodoPriority::High => "high",
    }
}

fn priority_from_str(value: &str) -> Result<TodoPriority, InfraError> {
    match value {
        "low" => Ok(TodoPriority::Low),
        "medium" => Ok(TodoPriority::Medium),
        "high" => Ok(TodoPriority::High),
        other => Err(InfraError::InvalidInput(format!("unknown todo priority '{other}'"))),
    }
}

fn phase_from_str(value: &str) -> Result<TimerPhase, InfraError> {
    match value {
        "focus" => Ok(TimerPhase::Focus),
        "shortBreak" => Ok(TimerPhase::ShortBreak),
        "longBreak" => Ok(TimerPhase::LongBreak),
        other => Err(InfraError::InvalidInput(format!("unknown session phase '{other}'"))),
    }
}

struct TodoRow {
    id: String,
    title: String,
    description: String,
    is_completed: bool,
    created_at: String,
    completed_at: Option<String>,
    category: Option<String>,
    priority: Option<String>,
    estimated_minutes: Option<u32>,
}

impl TodoRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            is_completed: row.get(3)?,
            created_at: row.get(4)?,
            completed_at: row.get(5)?,
            category: row.get(6)?,
            priority: row.get(7)?,
            estimated_minutes: row.get(8)?,
        })
    }

    fn into_todo(self) -> Result<Todo, InfraError> {
        Ok(Todo {
            created_at: parse_timestamp(&self.created_at, "todos.created_at")?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(|value| parse_timestamp(value, "todos.completed_at"))
                .transpose()?,
            priority: self.priority.as_deref().map(priority_from_str).transpose()?,
            id: self.id,
            title: self.title,
            description: self.description,
            is_completed: self.is_completed,
            category: self.category,
            estimated_minutes: self.estimated_minutes,
        })
    }
}

fn select_todo(connection: &Connection, id: &str) -> Result<Option<Todo>, InfraError> {
    let row = connection
        .query_row(
            &format!("SELECT {TODO_COLUMNS} FROM todos WHERE id = ?1"),
            params![id],
            TodoRow::from_row,
        )
        .optional()?;
    row.map(TodoRow::into_todo).transpose()
}

fn select_todos(connection: &Connection) -> Result<Vec<Todo>, InfraError> {
    let mut statement =
        connection.prepare(&format!("SELECT {TODO_COLUMNS} FROM todos ORDER BY created_at, id"))?;
    let rows = statement
        .query_map([], TodoRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(TodoRow::into_todo).collect()
}

fn upsert_todo(connection: &Connection, todo: &Todo) -> Result<(), InfraError> {
    connection.execute(
        "INSERT INTO todos (id, title, description, is_completed, created_at, completed_at,
                            category, priority, estimated_minutes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(id) DO UPDATE SET
           title = excluded.title,
           description = excluded.description,
           is_completed = excluded.is_completed,
           created_at = excluded.created_at,
           completed_at = excluded.completed_at,
           category = excluded.category,
           priority = excluded.priority,
           estimated_minutes = excluded.estimated_minutes",
        params![
            todo.id,
            todo.title,
            todo.description,
            todo.is_completed,
            format_timestamp(todo.created_at),
            todo.completed_at.map(format_timestamp),
            todo.category,
            todo.priority.map(priority_to_str),
            todo.estimated_minutes,
        ],
    )?;
    Ok(())
}

fn insert_session(connection: &Connection, record: &SessionRecord) -> Result<(), InfraError> {
    connection.execute(
        "INSERT OR REPLACE INTO sessions (id, phase, duration_seconds, completed_at, todo_id, todo_title)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.phase.as_str(),
            record.duration_seconds,
            format_timestamp(record.completed_at),
            record.todo_id,
            record.todo_title,
        ],
    )?;
    Ok(())
}

fn select_sessions(
    connection: &Connection,
    since: Option<DateTime<Utc>>,
) -> Result<Vec<SessionRecord>, InfraError> {
    let since = since.map(format_timestamp).unwrap_or_default();
    let mut statement = connection.prepare(
        "SELECT id, phase, duration_seconds, completed_at, todo_id, todo_title
         FROM sessions WHERE completed_at >= ?1 ORDER BY completed_at, id",
    )?;
    let rows = statement
        .query_map(params![since], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, phase, duration_seconds, completed_at, todo_id, todo_title)| {
            Ok(SessionRecord {
                id,
                phase: phase_from_str(&phase)?,
                duration_seconds,
                completed_at: parse_timestamp(&completed_at, "sessions.completed_at")?,
                todo_id,
                todo_title,
            })
        })
        .collect()
}

fn select_settings(connection: &Connection) -> Result<Option<Settings>, InfraError> {
    let payload: Option<String> = connection
        .query_row("SELECT payload FROM settings WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    payload
        .map(|raw| serde_json::from_str(&raw).map_err(InfraError::from))
        .transpose()
}

fn write_settings(connection: &Connection, settings: &Settings) -> Result<(), InfraError> {
    connection.execute(
        "INSERT INTO settings (id, payload, updated_at)
         VALUES (1, ?1, ?2)
         ON CONFLICT(id) DO UPDATE SET
           payload = excluded.payload,
           updated_at = excluded.updated_at",
        params![serde_json::to_string(settings)?, format_timestamp(Utc::now())],
    )?;
    Ok(())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Local
    }

    async fn list_todos(&self) -> Result<Vec<Todo>, InfraError> {
        with_connection(&self.db_path, |connection| select_todos(connection)).await
    }

    async fn get_todo(&self, id: &str) -> Result<Option<Todo>, InfraError> {
        let id = require_id(id, "todo.id")?;
        with_connection(&self.db_path, move |connection| select_todo(connection, &id)).await
    }

    async fn create_todo(&self, fields: NewTodo) -> Result<String, InfraError> {
        fields.validate().map_err(InfraError::InvalidInput)?;
        let id = fields.id.clone().unwrap_or_else(|| next_id("todo"));
        let todo = fields.into_todo(id.clone(), Utc::now());
        with_connection(&self.db_path, move |connection| {
            if select_todo(connection, &todo.id)?.is_some() {
                return Err(InfraError::InvalidInput(format!("todo {} already exists", todo.id)));
            }
            upsert_todo(connection, &todo)
        })
        .await?;
        Ok(id)
    }

    async fn update_todo(&self, id: &str, patch: &TodoPatch) -> Result<(), InfraError> {
        let id = require_id(id, "todo.id")?;
        patch.validate().map_err(InfraError::InvalidInput)?;
        let patch = patch.clone();
        with_connection(&self.db_path, move |connection| {
            let transaction = connection.transaction()?;
            let mut todo = select_todo(&transaction, &id)?
                .ok_or_else(|| InfraError::NotFound(format!("todo {id}")))?;
            todo.apply_patch(&patch);
            upsert_todo(&transaction, &todo)?;
            transaction.commit()?;
            Ok(())
        })
        .await
    }

    async fn delete_todo(&self, id: &str) -> Result<(), InfraError> {
        let id = require_id(id, "todo.id")?;
        with_connection(&self.db_path, move |connection| {
            let removed = connection.execute("DELETE FROM todos WHERE id = ?1", params![id])?;
            if removed == 0 {
                return Err(InfraError::NotFound(format!("todo {id}")));
            }
            Ok(())
        })
        .await
    }

    async fn record_session(&self, record: &SessionRecord) -> Result<(), InfraError> {
        record.validate().map_err(InfraError::InvalidInput)?;
        let record = record.clone();
        with_connection(&self.db_path, move |connection| insert_session(connection, &record)).await
    }

    async fn list_sessions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>, InfraError> {
        with_connection(&self.db_path, move |connection| select_sessions(connection, since)).await
    }

    async fn load_settings(&self) -> Result<Option<Settings>, InfraError> {
        with_connection(&self.db_path, |connection| select_settings(connection)).await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidInput)?;
        let settings = settings.clone();
        with_connection(&self.db_path, move |connection| write_settings(connection, &settings)).await
    }
}

#[async_trait]
impl ExtendedLocalStore for SqliteRecordStore {
    async fn export_data(&self) -> Result<LocalExport, InfraError> {
        with_connection(&self.db_path, |connection| {
            Ok(LocalExport {
                schema: 1,
                exported_at: Utc::now(),
                todos: select_todos(connection)?,
                sessions: select_sessions(connection, None)?,
                settings: select_settings(connection)?,
            })
        })
        .await
    }

    async fn import_data(&self, export: LocalExport) -> Result<ImportSummary, InfraError> {
        with_connection(&self.db_path, move |connection| {
            let transaction = connection.transaction()?;
            for todo in &export.todos {
                upsert_todo(&transaction, todo)?;
            }
            for record in &export.sessions {
                insert_session(&transaction, record)?;
            }
            if let Some(settings) = &export.settings {
                write_settings(&transaction, settings)?;
            }
            transaction.commit()?;
            Ok(ImportSummary {
                todos: export.todos.len(),
                sessions: export.sessions.len(),
                settings: export.settings.is_some(),
            })
        })
        .await
    }

    async fn reset_all(&self) -> Result<(), InfraError> {
        with_connection(&self.db_path, |connection| {
            connection.execute_batch(
                "BEGIN;
                 DELETE FROM todos;
                 DELETE FROM sessions;
                 DELETE FROM settings;
                 COMMIT;",
            )?;
            Ok(())
        })
        .await
    }
}

#[derive(Debug, Default)]
struct InMemoryState {
    todos: Vec<Todo>,
    sessions: Vec<SessionRecord>,
    settings: Option<Settings>,
}

#[derive(Debug)]
pub struct InMemoryRecordStore {
    kind: StoreKind,
    state: Mutex<InMemoryState>,
}

impl Default for InMemoryRecordStore {
    fn default() -> Self {
        Self::with_kind(StoreKind::Local)
    }
}

impl InMemoryRecordStore {
    pub fn with_kind(kind: StoreKind) -> Self {
        Self {
            kind,
            state: Mutex::new(InMemoryState::default()),
        }
    }

    pub fn with_todos(kind: StoreKind, todos: Vec<Todo>) -> Self {
        Self {
            kind,
            state: Mutex::new(InMemoryState {
                todos,
                ..InMemoryState::default()
            }),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, InMemoryState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("record store lock poisoned: {error}")))
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    fn kind(&self) -> StoreKind {
        self.kind
    }

    async fn list_todos(&self) -> Result<Vec<Todo>, InfraError> {
        let mut todos = self.lock()?.todos.clone();
        todos.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then_with(|| left.id.cmp(&right.id))
        });
        Ok(todos)
    }

    async fn get_todo(&self, id: &str) -> Result<Option<Todo>, InfraError> {
        let id = require_id(id, "todo.id")?;
        Ok(self.lock()?.todos.iter().find(|todo| todo.id == id).cloned())
    }

    async fn create_todo(&self, fields: NewTodo) -> Result<String, InfraError> {
        fields.validate().map_err(InfraError::InvalidInput)?;
        let id = fields.id.clone().unwrap_or_else(|| next_id("todo"));
        let mut state = self.lock()?;
        if state.todos.iter().any(|todo| todo.id == id) {
            return Err(InfraError::InvalidInput(format!("todo {id} already exists")));
        }
        state.todos.push(fields.into_todo(id.clone(), Utc::now()));
        Ok(id)
    }

    async fn update_todo(&self, id: &str, patch: &TodoPatch) -> Result<(), InfraError> {
        let id = require_id(id, "todo.id")?;
        patch.validate().map_err(InfraError::InvalidInput)?;
        let mut state = self.lock()?;
        let todo = state
            .todos
            .iter_mut()
            .find(|todo| todo.id == id)
            .ok_or_else(|| InfraError::NotFound(format!("todo {id}")))?;
        todo.apply_patch(patch);
        Ok(())
    }

    async fn delete_todo(&self, id: &str) -> Result<(), InfraError> {
        let id = require_id(id, "todo.id")?;
        let mut state = self.lock()?;
        let before = state.todos.len();
        state.todos.retain(|todo| todo.id != id);
        if state.todos.len() == before {
            return Err(InfraError::NotFound(format!("todo {id}")));
        }
        Ok(())
    }

    async fn record_session(&self, record: &SessionRecord) -> Result<(), InfraError> {
        record.validate().map_err(InfraError::InvalidInput)?;
        let mut state = self.lock()?;
        state.sessions.retain(|existing| existing.id != record.id);
        state.sessions.push(record.clone());
        Ok(())
    }

    async fn list_sessions(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SessionRecord>, InfraError> {
        let mut sessions = self
            .lock()?
            .sessions
            .iter()
            .filter(|record| since.is_none_or(|since| record.completed_at >= since))
            .cloned()
            .collect::<Vec<_>>();
        sessions.sort_by(|left, right| left.completed_at.cmp(&right.completed_at));
        Ok(sessions)
    }

    async fn load_settings(&self) -> Result<Option<Settings>, InfraError> {
        Ok(self.lock()?.settings.clone())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), InfraError> {
        settings.validate().map_err(InfraError::InvalidInput)?;
        self.lock()?.settings = Some(settings.clone());
        Ok(())
    }
}

#[async_trait]
impl ExtendedLocalStore for InMemoryRecordStore {
    async fn export_data(&self) -> Result<LocalExport, InfraError> {
        let state = self.lock()?;
        Ok(LocalExport {
            schema: 1,
            exported_at: Utc::now(),
            todos: state.todos.clone(),
            sessions: state.sessions.clone(),
            settings: state.settings.clone(),
        })
    }

    async fn import_data(&self, export: LocalExport) -> Result<ImportSummary, InfraError> {
        let mut state = self.lock()?;
        for todo in &export.todos {
            state.todos.retain(|existing| existing.id != todo.id);
            state.todos.push(todo.clone());
        }
        for record in &export.sessions {
            state.sessions.retain(|existing| existing.id != record.id);
            state.sessions.push(record.clone());
        }
        if let Some(settings) = &export.settings {
            state.settings = Some(settings.clone());
        }
        Ok(ImportSummary {
            todos: export.todos.len(),
            sessions: export.sessions.len(),
            settings: export.settings.is_some(),
        })
    }

    async fn reset_all(&self) -> Result<(), InfraError> {
        *self.lock()? = InMemoryState::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::storage::initialize_database;
    use tempfile::TempDir;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sqlite_store() -> (TempDir, SqliteRecordStore) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("focusdo.sqlite");
        initialize_database(&db_path).expect("init db");
        (dir, SqliteRecordStore::new(db_path))
    }

    fn sample_new_todo(id: &str) -> NewTodo {
        NewTodo {
            id: Some(id.to_string()),
            title: format!("Task {id}"),
            description: "details".to_string(),
            created_at: Some(fixed_time("2026-02-16T08:00:00Z")),
            category: Some("work".to_string()),
            priority: Some(TodoPriority::Medium),
            estimated_minutes: Some(25),
        }
    }

    fn sample_record(id: &str, completed_at: &str) -> SessionRecord {
        SessionRecord {
            id: id.to_string(),
            phase: TimerPhase::Focus,
            duration_seconds: 1500,
            completed_at: fixed_time(completed_at),
            todo_id: Some("todo-1".to_string()),
            todo_title: Some("Task todo-1".to_string()),
        }
    }

    #[tokio::test]
    async fn sqlite_store_round_trips_todo_lifecycle() {
        let (_dir, store) = sqlite_store();

        let id = store.create_todo(sample_new_todo("todo-1")).await.expect("create");
        assert_eq!(id, "todo-1");

        let toggled = store.toggle_todo(&id).await.expect("toggle");
        assert!(toggled.is_completed);
        let stored = store.get_todo(&id).await.expect("get").expect("exists");
        assert_eq!(stored, toggled);
        assert_eq!(stored.priority, Some(TodoPriority::Medium));

        store
            .update_todo(
                &id,
                &TodoPatch {
                    category: Some(None),
                    ..TodoPatch::default()
                },
            )
            .await
            .expect("clear category");
        let stored = store.get_todo(&id).await.expect("get").expect("exists");
        assert!(stored.category.is_none());

        store.delete_todo(&id).await.expect("delete");
        assert!(store.list_todos().await.expect("list").is_empty());
        assert!(matches!(
            store.delete_todo(&id).await,
            Err(InfraError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn sqlite_store_rejects_duplicate_ids() {
        let (_dir, store) = sqlite_store();
        store.create_todo(sample_new_todo("todo-1")).await.expect("create");

        let duplicate = store.create_todo(sample_new_todo("todo-1")).await;
        assert!(matches!(duplicate, Err(InfraError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn sqlite_store_filters_sessions_by_since() {
        let (_dir, store) = sqlite_store();
        store
            .record_session(&sample_record("s-1", "2026-02-15T23:00:00Z"))
            .await
            .expect("record");
        store
            .record_session(&sample_record("s-2", "2026-02-16T09:00:00Z"))
            .await
            .expect("record");

        let all = store.list_sessions(None).await.expect("list");
        assert_eq!(all.len(), 2);

        let today = store
            .list_sessions(Some(fixed_time("2026-02-16T00:00:00Z")))
            .await
            .expect("list");
        assert_eq!(today.len(), 1);
        assert_eq!(today[0].id, "s-2");
    }

    #[tokio::test]
    async fn sqlite_store_persists_settings() {
        let (_dir, store) = sqlite_store();
        assert!(store.load_settings().await.expect("load").is_none());

        let settings = Settings {
            focus_minutes: 50,
            ..Settings::default()
        };
        store.save_settings(&settings).await.expect("save");
        assert_eq!(store.load_settings().await.expect("load"), Some(settings));
    }

    #[tokio::test]
    async fn export_then_import_into_fresh_store_restores_data() {
        let (_dir, source) = sqlite_store();
        source.create_todo(sample_new_todo("todo-1")).await.expect("create");
        source.toggle_todo("todo-1").await.expect("toggle");
        source
            .record_session(&sample_record("s-1", "2026-02-16T09:00:00Z"))
            .await
            .expect("record");
        source.save_settings(&Settings::default()).await.expect("save");

        let raw = source.export_json().await.expect("export");

        let (_other_dir, target) = sqlite_store();
        let summary = target.import_json(&raw).await.expect("import");
        assert_eq!(
            summary,
            ImportSummary {
                todos: 1,
                sessions: 1,
                settings: true
            }
        );
        assert_eq!(
            target.list_todos().await.expect("list"),
            source.list_todos().await.expect("list")
        );

        target.reset_all().await.expect("reset");
        assert!(target.list_todos().await.expect("list").is_empty());
        assert!(target.load_settings().await.expect("load").is_none());
    }

    #[tokio::test]
    async fn import_rejects_unknown_schema() {
        let store = InMemoryRecordStore::default();
        let raw = r#"{"schema":2,"exported_at":"2026-02-16T08:00:00Z","todos":[],"sessions":[],"settings":null}"#;
        assert!(matches!(
            store.import_json(raw).await,
            Err(InfraError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn in_memory_store_matches_sqlite_semantics() {
        let store = InMemoryRecordStore::with_kind(StoreKind::Remote);
        assert_eq!(store.kind(), StoreKind::Remote);

        let generated = store.create_todo(NewTodo::titled("  Plan day ")).await.expect("create");
        let todo = store.get_todo(&generated).await.expect("get").expect("exists");
        assert_eq!(todo.title, "Plan day");
        assert!(!todo.is_completed);

        assert!(matches!(
            store.update_todo("missing", &TodoPatch::default()).await,
            Err(InfraError::NotFound(_))
        ));
        assert!(matches!(
            store.create_todo(NewTodo::titled("   ")).await,
            Err(InfraError::InvalidInput(_))
        ));
    }
}
