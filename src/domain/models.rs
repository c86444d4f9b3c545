use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TodoPriority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub description: String,
    pub is_completed: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TodoPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
}

impl Todo {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "todo.id")?;
        validate_non_empty(&self.title, "todo.title")?;
        match (self.is_completed, self.completed_at) {
            (false, Some(_)) => {
                return Err("todo.completed_at must be empty while not completed".to_string());
            }
            (_, Some(completed_at)) if completed_at < self.created_at => {
                return Err("todo.completed_at must be >= todo.created_at".to_string());
            }
            _ => {}
        }
        Ok(())
    }

    pub fn to_new_todo(&self) -> NewTodo {
        NewTodo {
            id: Some(self.id.clone()),
            title: self.title.clone(),
            description: self.description.clone(),
            created_at: Some(self.created_at),
            category: self.category.clone(),
            priority: self.priority,
            estimated_minutes: self.estimated_minutes,
        }
    }

    pub fn completion_patch(&self) -> TodoPatch {
        TodoPatch {
            is_completed: Some(self.is_completed),
            completed_at: Some(self.completed_at),
            ..TodoPatch::default()
        }
    }

    pub fn to_full_patch(&self) -> TodoPatch {
        TodoPatch {
            title: Some(self.title.clone()),
            description: Some(self.description.clone()),
            is_completed: Some(self.is_completed),
            completed_at: Some(self.completed_at),
            category: Some(self.category.clone()),
            priority: Some(self.priority),
            estimated_minutes: Some(self.estimated_minutes),
        }
    }

    pub fn apply_patch(&mut self, patch: &TodoPatch) {
        if let Some(title) = &patch.title {
            self.title = title.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(is_completed) = patch.is_completed {
            self.is_completed = is_completed;
        }
        if let Some(completed_at) = patch.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(category) = &patch.category {
            self.category = category.clone();
        }
        if let Some(priority) = patch.priority {
            self.priority = priority;
        }
        if let Some(estimated_minutes) = patch.estimated_minutes {
            self.estimated_minutes = estimated_minutes;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTodo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<TodoPriority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_minutes: Option<u32>,
}

impl NewTodo {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
            description: String::new(),
            created_at: None,
            category: None,
            priority: None,
            estimated_minutes: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "todo.title")?;
        if let Some(id) = self.id.as_deref() {
            validate_non_empty(id, "todo.id")?;
        }
        Ok(())
    }

    pub fn into_todo(self, id: String, now: DateTime<Utc>) -> Todo {
        Todo {
            id,
            title: self.title.trim().to_string(),
            description: self.description,
            is_completed: false,
            created_at: self.created_at.unwrap_or(now),
            completed_at: None,
            category: self.category,
            priority: self.priority,
            estimated_minutes: self.estimated_minutes,
        }
    }
}

/// Partial update. `Some(None)` clears an optional field.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TodoPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub is_completed: Option<bool>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub category: Option<Option<String>>,
    pub priority: Option<Option<TodoPriority>>,
    pub estimated_minutes: Option<Option<u32>>,
}

impl TodoPatch {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = self.title.as_deref() {
            validate_non_empty(title, "todo.title")?;
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self == &TodoPatch::default()
    }

    pub fn toggled(todo: &Todo, now: DateTime<Utc>) -> Self {
        let is_completed = !todo.is_completed;
        Self {
            is_completed: Some(is_completed),
            completed_at: Some(is_completed.then_some(now)),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TimerPhase {
    Focus,
    ShortBreak,
    LongBreak,
}

impl TimerPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Focus => "focus",
            Self::ShortBreak => "shortBreak",
            Self::LongBreak => "longBreak",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TimerStatus {
    Idle,
    Running,
    Paused,
    Completed,
}

impl TimerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerSession {
    pub status: TimerStatus,
    pub phase: TimerPhase,
    pub time_left_seconds: u32,
    pub initial_duration_seconds: u32,
    pub session_started_at: Option<DateTime<Utc>>,
    pub current_session_index: u32,
    pub total_sessions_planned: u32,
    pub bound_todo_id: Option<String>,
    pub bound_todo_title: Option<String>,
}

impl TimerSession {
    pub fn validate(&self) -> Result<(), String> {
        if self.time_left_seconds > self.initial_duration_seconds {
            return Err(
                "timer.time_left_seconds must be <= timer.initial_duration_seconds".to_string(),
            );
        }
        match self.status {
            TimerStatus::Running if self.session_started_at.is_none() => {
                Err("timer.session_started_at is required while running".to_string())
            }
            TimerStatus::Idle if self.session_started_at.is_some() => {
                Err("timer.session_started_at must be empty while idle".to_string())
            }
            TimerStatus::Idle if self.time_left_seconds != self.initial_duration_seconds => Err(
                "timer.time_left_seconds must equal the initial duration while idle".to_string(),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackgroundSnapshot {
    #[serde(flatten)]
    pub session: TimerSession,
    pub backgrounded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCompleted {
    pub phase: TimerPhase,
    pub session_index: u32,
    pub duration_seconds: u32,
    pub bound_todo_id: Option<String>,
    pub bound_todo_title: Option<String>,
    pub play_sound: bool,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub phase: TimerPhase,
    pub duration_seconds: u32,
    pub completed_at: DateTime<Utc>,
    pub todo_id: Option<String>,
    pub todo_title: Option<String>,
}

impl SessionRecord {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "session.id")?;
        if self.duration_seconds == 0 {
            return Err("session.duration_seconds must be > 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub focus_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub long_break_interval: u32,
    pub sessions_planned: u32,
    pub auto_continue: bool,
    pub sound_enabled: bool,
    pub metronome_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            focus_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            long_break_interval: 4,
            sessions_planned: 4,
            auto_continue: false,
            sound_enabled: true,
            metronome_enabled: false,
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), String> {
        if self.focus_minutes == 0 {
            return Err("settings.focus_minutes must be > 0".to_string());
        }
        if self.short_break_minutes == 0 {
            return Err("settings.short_break_minutes must be > 0".to_string());
        }
        if self.long_break_minutes == 0 {
            return Err("settings.long_break_minutes must be > 0".to_string());
        }
        if self.long_break_interval == 0 {
            return Err("settings.long_break_interval must be > 0".to_string());
        }
        Ok(())
    }

    pub fn phase_duration_seconds(&self, phase: TimerPhase) -> u32 {
        let minutes = match phase {
            TimerPhase::Focus => self.focus_minutes,
            TimerPhase::ShortBreak => self.short_break_minutes,
            TimerPhase::LongBreak => self.long_break_minutes,
        };
        minutes.saturating_mul(60)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Idle,
    InProgress,
    Completed,
    PartialSuccess,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRecordError {
    pub record_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub status: MigrationStatus,
    pub success: bool,
    pub migrated_count: usize,
    pub total_count: usize,
    pub error_count: usize,
    pub errors: Vec<MigrationRecordError>,
    pub message: String,
}

impl MigrationResult {
    pub fn from_counts(total_count: usize, errors: Vec<MigrationRecordError>) -> Self {
        let error_count = errors.len();
        let migrated_count = total_count.saturating_sub(error_count);
        let status = if error_count == 0 {
            MigrationStatus::Completed
        } else if error_count >= total_count {
            MigrationStatus::Failed
        } else {
            MigrationStatus::PartialSuccess
        };
        Self {
            status,
            success: status == MigrationStatus::Completed,
            migrated_count,
            total_count,
            error_count,
            errors,
            message: migration_message(status, migrated_count, total_count, error_count),
        }
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.errors.iter().map(|error| error.record_id.clone()).collect()
    }
}

fn migration_message(
    status: MigrationStatus,
    migrated_count: usize,
    total_count: usize,
    error_count: usize,
) -> String {
    match status {
        MigrationStatus::Completed if total_count == 0 => "No local todos to migrate".to_string(),
        MigrationStatus::Completed => format!("Migrated all {total_count} todos to the cloud"),
        MigrationStatus::PartialSuccess => format!(
            "Migrated {migrated_count} of {total_count} todos, {error_count} failed"
        ),
        MigrationStatus::Failed => format!("Migration failed for all {total_count} todos"),
        MigrationStatus::Idle | MigrationStatus::InProgress => String::new(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthSession {
    pub access_token: String,
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_todo() -> Todo {
        Todo {
            id: "todo-1".to_string(),
            title: "Write tests".to_string(),
            description: "for domain models".to_string(),
            is_completed: false,
            created_at: fixed_time("2026-02-16T08:00:00Z"),
            completed_at: None,
            category: Some("work".to_string()),
            priority: Some(TodoPriority::High),
            estimated_minutes: Some(50),
        }
    }

    fn sample_session() -> TimerSession {
        TimerSession {
            status: TimerStatus::Running,
            phase: TimerPhase::Focus,
            time_left_seconds: 200,
            initial_duration_seconds: 1500,
            session_started_at: Some(fixed_time("2026-02-16T09:00:00Z")),
            current_session_index: 1,
            total_sessions_planned: 4,
            bound_todo_id: Some("todo-1".to_string()),
            bound_todo_title: Some("Write tests".to_string()),
        }
    }

    #[test]
    fn todo_validate_rejects_empty_title() {
        let mut todo = sample_todo();
        todo.title = "   ".to_string();
        assert!(todo.validate().is_err());
    }

    #[test]
    fn todo_validate_rejects_completion_time_on_open_todo() {
        let mut todo = sample_todo();
        todo.completed_at = Some(fixed_time("2026-02-16T09:00:00Z"));
        assert!(todo.validate().is_err());
    }

    #[test]
    fn new_todo_never_carries_completion_fields() {
        let mut todo = sample_todo();
        todo.is_completed = true;
        todo.completed_at = Some(fixed_time("2026-02-16T09:00:00Z"));

        let created = todo.to_new_todo().into_todo(todo.id.clone(), Utc::now());

        assert!(!created.is_completed);
        assert!(created.completed_at.is_none());
        assert_eq!(created.created_at, todo.created_at);
    }

    #[test]
    fn toggled_patch_sets_and_clears_completion() {
        let now = fixed_time("2026-02-16T10:00:00Z");
        let mut todo = sample_todo();

        todo.apply_patch(&TodoPatch::toggled(&todo, now));
        assert!(todo.is_completed);
        assert_eq!(todo.completed_at, Some(now));

        todo.apply_patch(&TodoPatch::toggled(&todo, now));
        assert!(!todo.is_completed);
        assert!(todo.completed_at.is_none());
    }

    #[test]
    fn timer_session_validate_enforces_status_invariants() {
        assert!(sample_session().validate().is_ok());

        let mut running = sample_session();
        running.session_started_at = None;
        assert!(running.validate().is_err());

        let mut idle = sample_session();
        idle.status = TimerStatus::Idle;
        idle.session_started_at = None;
        assert!(idle.validate().is_err());
        idle.time_left_seconds = idle.initial_duration_seconds;
        assert!(idle.validate().is_ok());
    }

    #[test]
    fn background_snapshot_uses_flat_camel_case_json() {
        let snapshot = BackgroundSnapshot {
            session: sample_session(),
            backgrounded_at: fixed_time("2026-02-16T09:05:00Z"),
        };

        let value = serde_json::to_value(&snapshot).expect("serialize snapshot");
        assert_eq!(value["timeLeftSeconds"], 200);
        assert_eq!(value["phase"], "focus");
        assert_eq!(value["status"], "running");
        assert!(value.get("backgroundedAt").is_some());

        let parsed: BackgroundSnapshot = serde_json::from_value(value).expect("deserialize");
        assert_eq!(parsed, snapshot);
    }

    #[test]
    fn settings_validate_rejects_zero_interval() {
        let settings = Settings {
            long_break_interval: 0,
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
        assert_eq!(Settings::default().phase_duration_seconds(TimerPhase::Focus), 1500);
    }

    #[test]
    fn migration_result_messages_follow_counts() {
        let complete = MigrationResult::from_counts(3, Vec::new());
        assert_eq!(complete.status, MigrationStatus::Completed);
        assert!(complete.success);

        let partial = MigrationResult::from_counts(
            10,
            vec![MigrationRecordError {
                record_id: "a".to_string(),
                error: "boom".to_string(),
            }],
        );
        assert_eq!(partial.status, MigrationStatus::PartialSuccess);
        assert_eq!(partial.message, "Migrated 9 of 10 todos, 1 failed");

        let failed = MigrationResult::from_counts(
            1,
            vec![MigrationRecordError {
                record_id: "a".to_string(),
                error: "boom".to_string(),
            }],
        );
        assert_eq!(failed.status, MigrationStatus::Failed);
        assert_eq!(failed.migrated_count, 0);
    }

    // Feature: focusdo, Property 1: migration status is a pure function of the counts
    proptest! {
        #[test]
        fn property1_migration_status_follows_counts(total in 1usize..50, failed_ratio in 0usize..=100) {
            let failed = total * failed_ratio / 100;
            let errors = (0..failed)
                .map(|index| MigrationRecordError {
                    record_id: format!("todo-{index}"),
                    error: "remote rejected".to_string(),
                })
                .collect::<Vec<_>>();

            let result = MigrationResult::from_counts(total, errors);

            prop_assert_eq!(result.migrated_count + result.error_count, total);
            let expected = if failed == 0 {
                MigrationStatus::Completed
            } else if failed == total {
                MigrationStatus::Failed
            } else {
                MigrationStatus::PartialSuccess
            };
            prop_assert_eq!(result.status, expected);
        }
    }
}
