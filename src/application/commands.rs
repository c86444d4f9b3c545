use crate::application::bootstrap::bootstrap_workspace;
use crate::application::lifecycle::{ForegroundOutcome, LifecycleController};
use crate::application::migration::{MigrationEngine, MigrationError};
use crate::application::store_selector::{AuthState, StoreSelector};
use crate::application::timer_service::TimerService;
use crate::domain::models::{
    AuthSession, MigrationResult, NewTodo, PhaseCompleted, Settings, TimerPhase, TimerSession,
    Todo, TodoPatch,
};
use crate::domain::timer::{TimerConfig, TimerMachine, Transition};
use crate::infrastructure::config::{
    load_remote_config, read_timer_settings, read_timezone, save_timer_settings, RemoteConfig,
};
use crate::infrastructure::credential_store::{CredentialStore, KeyringCredentialStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::kv_store::SqliteKeyValueStore;
use crate::infrastructure::local_store::SqliteRecordStore;
use crate::infrastructure::logging::{CommandLevel, CommandLog};
use crate::infrastructure::notification::{InMemoryNotificationScheduler, SilentMetronome};
use crate::infrastructure::record_store::{ExtendedLocalStore, ImportSummary, StoreKind};
use crate::infrastructure::remote_store::RestRecordStore;
use chrono::{DateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    remote_config: RemoteConfig,
    timezone: Tz,
    credentials: Arc<dyn CredentialStore>,
    selector: Arc<StoreSelector>,
    timer: Arc<TimerService>,
    lifecycle: LifecycleController,
    migration: MigrationEngine,
    command_log: CommandLog,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_credentials(workspace_root, Arc::new(KeyringCredentialStore::default()))
    }

    pub fn with_credentials(
        workspace_root: PathBuf,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config_dir = bootstrap.config_dir;
        let remote_config = load_remote_config(&config_dir)?;
        let timezone = parse_timezone(read_timezone(&config_dir)?.as_deref())?;
        let settings = read_timer_settings(&config_dir)?;

        let local = Arc::new(SqliteRecordStore::new(&bootstrap.database_path));
        let remote = Arc::new(RestRecordStore::new(
            remote_config.clone(),
            Arc::clone(&credentials),
        ));
        let selector = Arc::new(StoreSelector::new(local, remote));
        let notifications = Arc::new(InMemoryNotificationScheduler::default());

        let timer = Arc::new(TimerService::new(
            TimerMachine::new(TimerConfig::from(&settings)),
            Arc::clone(&selector),
            notifications.clone(),
            Arc::new(SilentMetronome::default()),
        ));
        timer.apply_settings(&settings)?;

        let lifecycle = LifecycleController::new(
            Arc::clone(&timer),
            Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path)),
            notifications,
        );
        let migration = MigrationEngine::new(selector.local(), selector.remote());

        Ok(Self {
            config_dir,
            database_path: bootstrap.database_path,
            remote_config,
            timezone,
            credentials,
            selector,
            timer,
            lifecycle,
            migration,
            command_log: CommandLog::new(&bootstrap.logs_dir),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn active_store(&self) -> StoreKind {
        self.selector.active_kind()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.command_log.append(CommandLevel::Info, command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.command_log.append(CommandLevel::Error, command, message);
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerStateResponse {
    pub session: TimerSession,
    pub completed: Option<PhaseCompleted>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthStateResponse {
    pub active_store: StoreKind,
    pub migration: Option<MigrationResult>,
    pub migration_error: Option<String>,
}

pub async fn list_todos_impl(state: &AppState) -> Result<Vec<Todo>, InfraError> {
    state.selector.active().list_todos().await
}

pub async fn create_todo_impl(state: &AppState, fields: NewTodo) -> Result<Todo, InfraError> {
    fields.validate().map_err(InfraError::InvalidInput)?;
    let store = state.selector.active();
    let id = store.create_todo(fields).await?;
    let created = store
        .get_todo(&id)
        .await?
        .ok_or_else(|| InfraError::NotFound(format!("todo {id}")))?;

    state.log_info(
        "create_todo",
        &format!("created todo_id={id} store={}", store.kind().as_str()),
    );
    Ok(created)
}

pub async fn update_todo_impl(
    state: &AppState,
    todo_id: String,
    patch: TodoPatch,
) -> Result<Todo, InfraError> {
    let todo_id = required_id(&todo_id, "todo_id")?;
    if patch.is_empty() {
        return Err(InfraError::InvalidInput("patch must change at least one field".to_string()));
    }
    patch.validate().map_err(InfraError::InvalidInput)?;

    let store = state.selector.active();
    store.update_todo(&todo_id, &patch).await?;
    let updated = store
        .get_todo(&todo_id)
        .await?
        .ok_or_else(|| InfraError::NotFound(format!("todo {todo_id}")))?;

    if let Some(title) = &patch.title {
        let session = state.timer.state()?;
        if session.bound_todo_id.as_deref() == Some(todo_id.as_str()) {
            state.timer.bind_todo(&todo_id, title)?;
        }
    }

    state.log_info("update_todo", &format!("updated todo_id={todo_id}"));
    Ok(updated)
}

pub async fn toggle_todo_impl(state: &AppState, todo_id: String) -> Result<Todo, InfraError> {
    let todo_id = required_id(&todo_id, "todo_id")?;
    let toggled = state.selector.active().toggle_todo(&todo_id).await?;
    state.log_info(
        "toggle_todo",
        &format!("todo_id={todo_id} is_completed={}", toggled.is_completed),
    );
    Ok(toggled)
}

pub async fn delete_todo_impl(state: &AppState, todo_id: String) -> Result<bool, InfraError> {
    let todo_id = required_id(&todo_id, "todo_id")?;
    match state.selector.active().delete_todo(&todo_id).await {
        Ok(()) => {}
        Err(InfraError::NotFound(_)) => return Ok(false),
        Err(error) => return Err(error),
    }

    if state.timer.state()?.bound_todo_id.as_deref() == Some(todo_id.as_str()) {
        state.timer.unbind_todo()?;
    }
    state.log_info("delete_todo", &format!("deleted todo_id={todo_id}"));
    Ok(true)
}

pub fn get_timer_state_impl(state: &AppState) -> Result<TimerSession, InfraError> {
    state.timer.state()
}

pub fn start_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let transition = state.timer.start()?;
    timer_response(state, "start_timer", transition)
}

pub fn pause_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let transition = state.timer.pause()?;
    timer_response(state, "pause_timer", transition)
}

pub async fn reset_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let transition = state.timer.reset()?;
    state.lifecycle.on_reset().await;
    timer_response(state, "reset_timer", transition)
}

pub fn complete_phase_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let transition = state.timer.complete()?;
    timer_response(state, "complete_phase", transition)
}

pub async fn bind_todo_impl(
    state: &AppState,
    todo_id: Option<String>,
) -> Result<TimerSession, InfraError> {
    let Some(todo_id) = todo_id else {
        return state.timer.unbind_todo();
    };
    let todo_id = required_id(&todo_id, "todo_id")?;
    let todo = state
        .selector
        .active()
        .get_todo(&todo_id)
        .await?
        .ok_or_else(|| InfraError::NotFound(format!("todo {todo_id}")))?;
    state.timer.bind_todo(&todo.id, &todo.title)
}

pub async fn app_backgrounded_impl(state: &AppState) -> Result<bool, InfraError> {
    let written = state.lifecycle.on_background(Utc::now()).await;
    if written {
        state.log_info("app_backgrounded", "background snapshot written");
    }
    Ok(written)
}

pub async fn app_foregrounded_impl(state: &AppState) -> Result<ForegroundOutcome, InfraError> {
    let outcome = state.lifecycle.on_foreground(Utc::now()).await;
    match &outcome {
        ForegroundOutcome::NothingToRestore => {}
        ForegroundOutcome::Resumed { remaining_seconds } => state.log_info(
            "app_foregrounded",
            &format!("resumed timer remaining_seconds={remaining_seconds}"),
        ),
        ForegroundOutcome::CompletedWhileAway(event) => state.log_info(
            "app_foregrounded",
            &format!("phase {} completed while away", event.phase.as_str()),
        ),
    }
    Ok(outcome)
}

pub async fn set_auth_state_impl(
    state: &AppState,
    auth_state: AuthState,
    session: Option<AuthSession>,
) -> Result<AuthStateResponse, InfraError> {
    match &session {
        Some(session) => state.credentials.save_session(session)?,
        None if !auth_state.is_authenticated => state.credentials.delete_session()?,
        None => {}
    }
    if auth_state.is_authenticated && auth_state.is_pro && !state.remote_config.is_configured() {
        return Err(InfraError::InvalidConfig(
            "remote store is not configured; set FOCUSDO_REMOTE_URL and FOCUSDO_REMOTE_ANON_KEY"
                .to_string(),
        ));
    }

    let transition = state.selector.update_auth_state(auth_state)?;

    // the selection has already switched, so failures below are reported, not raised
    let (migration, migration_error) = match state.migration.migrate_on_upgrade(transition).await {
        Ok(result) => (result, None),
        Err(error) => {
            state.log_error("set_auth_state", &format!("migration did not run: {error}"));
            (None, Some(error.to_string()))
        }
    };

    if transition.previous != transition.current {
        let applied = load_settings(state)
            .await
            .and_then(|settings| state.timer.apply_settings(&settings));
        if let Err(error) = applied {
            state.log_error(
                "set_auth_state",
                &format!("kept previous timer settings: {error}"),
            );
        }
    }

    state.log_info(
        "set_auth_state",
        &format!(
            "active_store={} migrated={}",
            transition.current.as_str(),
            migration
                .as_ref()
                .map(|result| result.message.as_str())
                .unwrap_or("n/a")
        ),
    );
    Ok(AuthStateResponse {
        active_store: transition.current,
        migration,
        migration_error,
    })
}

pub async fn migrate_local_todos_impl(state: &AppState) -> Result<MigrationResult, InfraError> {
    let result = state
        .migration
        .migrate_local_todos()
        .await
        .map_err(migration_error)?;
    state.log_info("migrate_local_todos", &result.message);
    Ok(result)
}

pub async fn retry_migration_impl(
    state: &AppState,
    failed_only: bool,
) -> Result<MigrationResult, InfraError> {
    let result = if failed_only {
        state.migration.retry_failed_only().await
    } else {
        state.migration.retry_migration().await
    }
    .map_err(migration_error)?;
    state.log_info("retry_migration", &result.message);
    Ok(result)
}

pub fn last_migration_result_impl(state: &AppState) -> Option<MigrationResult> {
    state.migration.last_result()
}

pub async fn get_settings_impl(state: &AppState) -> Result<Settings, InfraError> {
    load_settings(state).await
}

pub async fn update_settings_impl(
    state: &AppState,
    settings: Settings,
) -> Result<Settings, InfraError> {
    settings.validate().map_err(InfraError::InvalidInput)?;
    let store = state.selector.active();
    store.save_settings(&settings).await?;
    if store.kind() == StoreKind::Local {
        save_timer_settings(&state.config_dir, &settings)?;
    }
    state.timer.apply_settings(&settings)?;
    state.log_info(
        "update_settings",
        &format!("focus_minutes={} store={}", settings.focus_minutes, store.kind().as_str()),
    );
    Ok(settings)
}

pub async fn today_focus_count_impl(state: &AppState) -> Result<u32, InfraError> {
    let since = start_of_day(Utc::now(), state.timezone);
    let sessions = state.selector.active().list_sessions(Some(since)).await?;
    let count = sessions
        .iter()
        .filter(|record| record.phase == TimerPhase::Focus)
        .count();
    Ok(u32::try_from(count).unwrap_or(u32::MAX))
}

pub async fn export_local_data_impl(state: &AppState) -> Result<String, InfraError> {
    let raw = extended_store(state)?.export_json().await?;
    state.log_info("export_local_data", "exported local data");
    Ok(raw)
}

pub async fn import_local_data_impl(
    state: &AppState,
    raw: String,
) -> Result<ImportSummary, InfraError> {
    let summary = extended_store(state)?.import_json(&raw).await?;
    state.log_info(
        "import_local_data",
        &format!("imported todos={} sessions={}", summary.todos, summary.sessions),
    );
    Ok(summary)
}

pub async fn reset_local_data_impl(state: &AppState) -> Result<(), InfraError> {
    extended_store(state)?.reset_all().await?;
    state.timer.reset()?;
    state.lifecycle.on_reset().await;
    state.log_info("reset_local_data", "local data cleared");
    Ok(())
}

fn extended_store(state: &AppState) -> Result<Arc<dyn ExtendedLocalStore>, InfraError> {
    state.selector.extended().ok_or_else(|| {
        InfraError::Unsupported("export, import and reset are only available for local data".to_string())
    })
}

async fn load_settings(state: &AppState) -> Result<Settings, InfraError> {
    match state.selector.active().load_settings().await? {
        Some(settings) => Ok(settings),
        None => read_timer_settings(&state.config_dir),
    }
}

fn timer_response(
    state: &AppState,
    command: &str,
    transition: Transition,
) -> Result<TimerStateResponse, InfraError> {
    let session = state.timer.state()?;
    if !transition.is_ignored() {
        state.log_info(
            command,
            &format!(
                "status={} phase={} time_left={}",
                session.status.as_str(),
                session.phase.as_str(),
                session.time_left_seconds
            ),
        );
    }
    Ok(TimerStateResponse {
        session,
        completed: match transition {
            Transition::PhaseCompleted(event) => Some(event),
            Transition::Applied | Transition::Ignored => None,
        },
    })
}

fn migration_error(error: MigrationError) -> InfraError {
    match error {
        MigrationError::Store(error) => error,
        MigrationError::AlreadyRunning => InfraError::InvalidInput(error.to_string()),
    }
}

fn required_id(value: &str, field_name: &str) -> Result<String, InfraError> {
    let normalized = value.trim();
    if normalized.is_empty() {
        return Err(InfraError::InvalidInput(format!("{field_name} must not be empty")));
    }
    Ok(normalized.to_string())
}

fn parse_timezone(value: Option<&str>) -> Result<Tz, InfraError> {
    let Some(value) = value else {
        return Ok(Tz::UTC);
    };
    value
        .parse::<Tz>()
        .map_err(|error| InfraError::InvalidConfig(format!("invalid timezone '{value}': {error}")))
}

fn start_of_day(now: DateTime<Utc>, timezone: Tz) -> DateTime<Utc> {
    let local_midnight = now
        .with_timezone(&timezone)
        .date_naive()
        .and_time(NaiveTime::MIN);
    timezone
        .from_local_datetime(&local_midnight)
        .earliest()
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or(now)
}
