use crate::domain::models::{PhaseCompleted, TimerPhase, TimerSession};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store::next_id;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPayload {
    pub phase: TimerPhase,
    pub session_index: u32,
    pub todo_title: Option<String>,
    pub play_sound: bool,
}

impl NotificationPayload {
    pub fn for_session(session: &TimerSession, play_sound: bool) -> Self {
        Self {
            phase: session.phase,
            session_index: session.current_session_index,
            todo_title: session.bound_todo_title.clone(),
            play_sound,
        }
    }

    pub fn title(&self) -> String {
        match self.phase {
            TimerPhase::Focus => "Focus session complete".to_string(),
            TimerPhase::ShortBreak | TimerPhase::LongBreak => "Break is over".to_string(),
        }
    }

    pub fn body(&self) -> String {
        match (self.phase, self.todo_title.as_deref()) {
            (TimerPhase::Focus, Some(title)) => format!("Nice work on \"{title}\". Time for a break."),
            (TimerPhase::Focus, None) => "Time for a break.".to_string(),
            (_, _) => "Ready for the next focus session?".to_string(),
        }
    }
}

impl From<&PhaseCompleted> for NotificationPayload {
    fn from(event: &PhaseCompleted) -> Self {
        Self {
            phase: event.phase,
            session_index: event.session_index,
            todo_title: event.bound_todo_title.clone(),
            play_sound: event.play_sound,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationHandle(pub String);

#[async_trait]
pub trait NotificationScheduler: Send + Sync {
    async fn schedule_completion(
        &self,
        fires_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<NotificationHandle, InfraError>;

    async fn cancel_pending(&self) -> Result<(), InfraError>;

    async fn notify_now(&self, payload: NotificationPayload) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub handle: NotificationHandle,
    pub fires_at: DateTime<Utc>,
    pub payload: NotificationPayload,
}

#[derive(Debug, Default)]
struct SchedulerState {
    pending: Option<ScheduledNotification>,
    delivered: Vec<NotificationPayload>,
}

#[derive(Debug, Default)]
pub struct InMemoryNotificationScheduler {
    state: Mutex<SchedulerState>,
}

impl InMemoryNotificationScheduler {
    fn lock(&self) -> Result<std::sync::MutexGuard<'_, SchedulerState>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("notification lock poisoned: {error}")))
    }

    pub fn pending(&self) -> Option<ScheduledNotification> {
        self.lock().ok().and_then(|state| state.pending.clone())
    }

    pub fn delivered(&self) -> Vec<NotificationPayload> {
        self.lock()
            .map(|state| state.delivered.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationScheduler for InMemoryNotificationScheduler {
    async fn schedule_completion(
        &self,
        fires_at: DateTime<Utc>,
        payload: NotificationPayload,
    ) -> Result<NotificationHandle, InfraError> {
        let handle = NotificationHandle(next_id("notification"));
        info!(
            fires_at = %fires_at,
            phase = payload.phase.as_str(),
            "scheduled completion notification"
        );
        self.lock()?.pending = Some(ScheduledNotification {
            handle: handle.clone(),
            fires_at,
            payload,
        });
        Ok(handle)
    }

    async fn cancel_pending(&self) -> Result<(), InfraError> {
        if self.lock()?.pending.take().is_some() {
            info!("cancelled pending completion notification");
        }
        Ok(())
    }

    async fn notify_now(&self, payload: NotificationPayload) -> Result<(), InfraError> {
        info!(title = %payload.title(), body = %payload.body(), "completion notification");
        self.lock()?.delivered.push(payload);
        Ok(())
    }
}

pub trait Metronome: Send + Sync {
    fn start(&self);
    fn stop(&self);
    fn is_playing(&self) -> bool;
}

#[derive(Debug, Default)]
pub struct SilentMetronome {
    playing: AtomicBool,
}

impl Metronome for SilentMetronome {
    fn start(&self) {
        if !self.playing.swap(true, Ordering::SeqCst) {
            tracing::debug!("metronome started");
        }
    }

    fn stop(&self) {
        if self.playing.swap(false, Ordering::SeqCst) {
            tracing::debug!("metronome stopped");
        }
    }

    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn payload(phase: TimerPhase) -> NotificationPayload {
        NotificationPayload {
            phase,
            session_index: 1,
            todo_title: Some("Write report".to_string()),
            play_sound: true,
        }
    }

    #[tokio::test]
    async fn scheduling_replaces_the_pending_notification() {
        let scheduler = InMemoryNotificationScheduler::default();
        scheduler
            .schedule_completion(fixed_time("2026-02-16T09:10:00Z"), payload(TimerPhase::Focus))
            .await
            .expect("schedule");
        let second = scheduler
            .schedule_completion(fixed_time("2026-02-16T09:20:00Z"), payload(TimerPhase::Focus))
            .await
            .expect("schedule again");

        let pending = scheduler.pending().expect("pending");
        assert_eq!(pending.handle, second);
        assert_eq!(pending.fires_at, fixed_time("2026-02-16T09:20:00Z"));

        scheduler.cancel_pending().await.expect("cancel");
        scheduler.cancel_pending().await.expect("cancel twice");
        assert!(scheduler.pending().is_none());
    }

    #[test]
    fn payload_text_mentions_bound_todo() {
        assert!(payload(TimerPhase::Focus).body().contains("Write report"));
        assert_eq!(payload(TimerPhase::LongBreak).title(), "Break is over");
    }

    #[test]
    fn silent_metronome_tracks_state() {
        let metronome = SilentMetronome::default();
        metronome.start();
        assert!(metronome.is_playing());
        metronome.stop();
        assert!(!metronome.is_playing());
    }
}
