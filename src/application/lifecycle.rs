use crate::application::timer_service::TimerService;
use crate::domain::models::{BackgroundSnapshot, PhaseCompleted, TimerStatus};
use crate::infrastructure::kv_store::{KeyValueStore, BACKGROUND_SNAPSHOT_KEY};
use crate::infrastructure::notification::{NotificationPayload, NotificationScheduler};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ForegroundOutcome {
    NothingToRestore,
    #[serde(rename_all = "camelCase")]
    Resumed { remaining_seconds: u32 },
    CompletedWhileAway(PhaseCompleted),
}

pub struct LifecycleController {
    timer: Arc<TimerService>,
    snapshots: Arc<dyn KeyValueStore>,
    notifications: Arc<dyn NotificationScheduler>,
}

impl LifecycleController {
    pub fn new(
        timer: Arc<TimerService>,
        snapshots: Arc<dyn KeyValueStore>,
        notifications: Arc<dyn NotificationScheduler>,
    ) -> Self {
        Self {
            timer,
            snapshots,
            notifications,
        }
    }

    /// Returns true when a snapshot was written. The write happens before any await.
    pub async fn on_background(&self, now: DateTime<Utc>) -> bool {
        let session = match self.timer.state() {
            Ok(session) => session,
            Err(error) => {
                warn!(%error, "could not read timer state on background");
                return false;
            }
        };
        if session.status != TimerStatus::Running {
            debug!(status = session.status.as_str(), "timer not running; no snapshot taken");
            return false;
        }
        // a repeated background event must keep the first backgrounded_at
        if !self.timer.is_ticking() && self.has_snapshot() {
            debug!("timer already suspended; keeping existing snapshot");
            return false;
        }

        let fires_at = now + Duration::seconds(i64::from(session.time_left_seconds));
        let payload = NotificationPayload::for_session(&session, self.timer.sound_enabled());
        let snapshot = BackgroundSnapshot {
            session,
            backgrounded_at: now,
        };
        let raw = match serde_json::to_string(&snapshot) {
            Ok(raw) => raw,
            Err(error) => {
                warn!(%error, "failed to serialize background snapshot");
                return false;
            }
        };
        if let Err(error) = self.snapshots.set(BACKGROUND_SNAPSHOT_KEY, &raw) {
            warn!(%error, "failed to persist background snapshot; timer keeps ticking");
            return false;
        }

        self.timer.suspend();
        if let Err(error) = self.notifications.schedule_completion(fires_at, payload).await {
            warn!(%error, "failed to pre-arm completion notification");
        }
        true
    }

    pub async fn on_foreground(&self, now: DateTime<Utc>) -> ForegroundOutcome {
        let Some(snapshot) = self.take_snapshot() else {
            self.resume_stalled_timer().await;
            return ForegroundOutcome::NothingToRestore;
        };

        let elapsed = (now - snapshot.backgrounded_at).num_seconds().max(0);
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
        let remaining = snapshot.session.time_left_seconds.saturating_sub(elapsed);

        if remaining == 0 {
            return match self.timer.complete_restored(snapshot.session) {
                Ok(Some(event)) => {
                    info!(
                        phase = event.phase.as_str(),
                        elapsed, "phase completed while in background"
                    );
                    ForegroundOutcome::CompletedWhileAway(event)
                }
                Ok(None) => ForegroundOutcome::NothingToRestore,
                Err(error) => {
                    warn!(%error, "failed to apply background completion");
                    ForegroundOutcome::NothingToRestore
                }
            };
        }

        let mut session = snapshot.session;
        session.time_left_seconds = remaining;
        if let Err(error) = self.timer.restore(session) {
            warn!(%error, "failed to restore timer from snapshot");
            return ForegroundOutcome::NothingToRestore;
        }
        // the in-app ticker will raise its own completion
        if let Err(error) = self.notifications.cancel_pending().await {
            warn!(%error, "failed to cancel pre-armed notification");
        }
        ForegroundOutcome::Resumed {
            remaining_seconds: remaining,
        }
    }

    pub async fn on_reset(&self) {
        if let Err(error) = self.snapshots.remove(BACKGROUND_SNAPSHOT_KEY) {
            warn!(%error, "failed to delete background snapshot");
        }
        if let Err(error) = self.notifications.cancel_pending().await {
            warn!(%error, "failed to cancel pending notification");
        }
    }

    fn has_snapshot(&self) -> bool {
        matches!(self.snapshots.get(BACKGROUND_SNAPSHOT_KEY), Ok(Some(_)))
    }

    // a suspended timer whose snapshot was lost must not stay frozen in `running`
    async fn resume_stalled_timer(&self) {
        match self.timer.resume_if_stalled() {
            Ok(true) => {
                warn!("background snapshot lost; resuming timer from in-memory state");
                if let Err(error) = self.notifications.cancel_pending().await {
                    warn!(%error, "failed to cancel pre-armed notification");
                }
            }
            Ok(false) => {}
            Err(error) => warn!(%error, "failed to resume suspended timer"),
        }
    }

    fn take_snapshot(&self) -> Option<BackgroundSnapshot> {
        let raw = match self.snapshots.get(BACKGROUND_SNAPSHOT_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(error) => {
                warn!(%error, "failed to read background snapshot");
                return None;
            }
        };
        if let Err(error) = self.snapshots.remove(BACKGROUND_SNAPSHOT_KEY) {
            warn!(%error, "failed to delete background snapshot");
        }

        let snapshot = match serde_json::from_str::<BackgroundSnapshot>(&raw) {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%error, "discarding unreadable background snapshot");
                return None;
            }
        };
        if let Err(error) = snapshot.session.validate() {
            warn!(%error, "discarding invalid background snapshot");
            return None;
        }
        if snapshot.session.status != TimerStatus::Running {
            warn!(status = snapshot.session.status.as_str(), "discarding snapshot of a non-running timer");
            return None;
        }
        Some(snapshot)
    }
}
