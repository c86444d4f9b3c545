use crate::application::store_selector::StoreSelector;
use crate::domain::models::{PhaseCompleted, SessionRecord, Settings, TimerPhase, TimerSession, TimerStatus};
use crate::domain::timer::{TimerConfig, TimerMachine, Transition};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::notification::{Metronome, NotificationPayload, NotificationScheduler};
use crate::infrastructure::record_store::next_id;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

struct CompletionEffects {
    selector: Arc<StoreSelector>,
    notifications: Arc<dyn NotificationScheduler>,
    metronome: Arc<dyn Metronome>,
    metronome_enabled: AtomicBool,
}

impl CompletionEffects {
    fn dispatch(&self, event: &PhaseCompleted, deliver_notification: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime available; skipping phase completion effects");
            return;
        };

        let record = SessionRecord {
            id: next_id("session"),
            phase: event.phase,
            duration_seconds: event.duration_seconds,
            completed_at: event.completed_at,
            todo_id: event.bound_todo_id.clone(),
            todo_title: event.bound_todo_title.clone(),
        };
        let store = self.selector.active();
        runtime.spawn(async move {
            if let Err(error) = store.record_session(&record).await {
                warn!(%error, store = store.kind().as_str(), "failed to record completed session");
            }
        });

        if deliver_notification {
            let notifications = Arc::clone(&self.notifications);
            let payload = NotificationPayload::from(event);
            runtime.spawn(async move {
                if let Err(error) = notifications.notify_now(payload).await {
                    warn!(%error, "failed to deliver completion notification");
                }
            });
        }
    }

    fn sync_metronome(&self, session: &TimerSession) {
        let should_play = self.metronome_enabled.load(Ordering::SeqCst)
            && session.status == TimerStatus::Running
            && session.phase == TimerPhase::Focus;
        if should_play {
            self.metronome.start();
        } else {
            self.metronome.stop();
        }
    }
}

pub struct TimerService {
    machine: Arc<Mutex<TimerMachine>>,
    effects: Arc<CompletionEffects>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
}

impl TimerService {
    pub fn new(
        machine: TimerMachine,
        selector: Arc<StoreSelector>,
        notifications: Arc<dyn NotificationScheduler>,
        metronome: Arc<dyn Metronome>,
    ) -> Self {
        Self {
            machine: Arc::new(Mutex::new(machine)),
            effects: Arc::new(CompletionEffects {
                selector,
                notifications,
                metronome,
                metronome_enabled: AtomicBool::new(false),
            }),
            ticker: Mutex::new(None),
            tick_interval: Duration::from_secs(1),
        }
    }

    pub fn with_tick_interval(mut self, tick_interval: Duration) -> Self {
        self.tick_interval = tick_interval;
        self
    }

    fn lock_machine(&self) -> Result<MutexGuard<'_, TimerMachine>, InfraError> {
        self.machine
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("timer lock poisoned: {error}")))
    }

    pub fn state(&self) -> Result<TimerSession, InfraError> {
        Ok(self.lock_machine()?.session().clone())
    }

    pub fn sound_enabled(&self) -> bool {
        self.lock_machine()
            .map(|machine| machine.config().sound_enabled)
            .unwrap_or(true)
    }

    pub fn start(&self) -> Result<Transition, InfraError> {
        let (transition, session) = {
            let mut machine = self.lock_machine()?;
            (machine.start(), machine.session().clone())
        };
        if !transition.is_ignored() {
            self.spawn_ticker();
        }
        self.effects.sync_metronome(&session);
        Ok(transition)
    }

    pub fn pause(&self) -> Result<Transition, InfraError> {
        let (transition, session) = {
            let mut machine = self.lock_machine()?;
            (machine.pause(), machine.session().clone())
        };
        if !transition.is_ignored() {
            self.stop_ticker();
        }
        self.effects.sync_metronome(&session);
        Ok(transition)
    }

    pub fn reset(&self) -> Result<Transition, InfraError> {
        self.stop_ticker();
        let (transition, session) = {
            let mut machine = self.lock_machine()?;
            (machine.reset(), machine.session().clone())
        };
        self.effects.sync_metronome(&session);
        Ok(transition)
    }

    pub fn complete(&self) -> Result<Transition, InfraError> {
        let (transition, session) = {
            let mut machine = self.lock_machine()?;
            (machine.complete_phase(), machine.session().clone())
        };
        if let Some(event) = transition.completion() {
            self.effects.dispatch(event, true);
            self.follow_status(&session);
        }
        Ok(transition)
    }

    pub fn bind_todo(&self, todo_id: &str, todo_title: &str) -> Result<TimerSession, InfraError> {
        let mut machine = self.lock_machine()?;
        machine.bind_todo(todo_id, todo_title);
        Ok(machine.session().clone())
    }

    pub fn unbind_todo(&self) -> Result<TimerSession, InfraError> {
        let mut machine = self.lock_machine()?;
        machine.unbind_todo();
        Ok(machine.session().clone())
    }

    pub fn apply_settings(&self, settings: &Settings) -> Result<TimerSession, InfraError> {
        self.effects
            .metronome_enabled
            .store(settings.metronome_enabled, Ordering::SeqCst);
        let session = {
            let mut machine = self.lock_machine()?;
            machine.apply_config(TimerConfig::from(settings));
            machine.session().clone()
        };
        self.effects.sync_metronome(&session);
        Ok(session)
    }

    pub fn suspend(&self) {
        self.stop_ticker();
        self.effects.metronome.stop();
    }

    pub fn restore(&self, session: TimerSession) -> Result<TimerSession, InfraError> {
        let restored = {
            let mut machine = self.lock_machine()?;
            machine.restore(session);
            machine.session().clone()
        };
        self.follow_status(&restored);
        Ok(restored)
    }

    /// Completion path for a phase that ran out while the app was away.
    /// The OS already showed the pre-armed notification, so none is delivered here.
    pub fn complete_restored(&self, session: TimerSession) -> Result<Option<PhaseCompleted>, InfraError> {
        let (transition, current) = {
            let mut machine = self.lock_machine()?;
            machine.restore(session);
            (machine.complete_phase(), machine.session().clone())
        };
        let event = match transition {
            Transition::PhaseCompleted(event) => event,
            _ => return Ok(None),
        };
        self.effects.dispatch(&event, false);
        self.follow_status(&current);
        Ok(Some(event))
    }

    pub fn resume_if_stalled(&self) -> Result<bool, InfraError> {
        let session = self.state()?;
        if session.status != TimerStatus::Running || self.is_ticking() {
            return Ok(false);
        }
        self.follow_status(&session);
        Ok(true)
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker
            .lock()
            .ok()
            .and_then(|ticker| ticker.as_ref().map(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    fn follow_status(&self, session: &TimerSession) {
        if session.status == TimerStatus::Running {
            self.spawn_ticker();
        } else {
            self.stop_ticker();
        }
        self.effects.sync_metronome(session);
    }

    fn spawn_ticker(&self) {
        let Ok(mut ticker) = self.ticker.lock() else {
            return;
        };
        if let Some(handle) = ticker.take() {
            handle.abort();
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("no async runtime available; timer will not tick");
            return;
        };

        let machine = Arc::clone(&self.machine);
        let effects = Arc::clone(&self.effects);
        let tick_interval = self.tick_interval;
        *ticker = Some(runtime.spawn(async move {
            let mut interval = time::interval(tick_interval);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            // the first tick resolves immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match tick_once(&machine, &effects) {
                    Transition::Ignored => break,
                    Transition::Applied => {}
                    Transition::PhaseCompleted(_) => {
                        let running = machine
                            .lock()
                            .map(|machine| machine.session().status == TimerStatus::Running)
                            .unwrap_or(false);
                        if !running {
                            break;
                        }
                    }
                }
            }
            debug!("timer ticker stopped");
        }));
    }

    fn stop_ticker(&self) {
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop_ticker();
    }
}

fn tick_once(machine: &Mutex<TimerMachine>, effects: &CompletionEffects) -> Transition {
    let (transition, session) = match machine.lock() {
        Ok(mut machine) => (machine.tick(), machine.session().clone()),
        Err(error) => {
            warn!(%error, "timer lock poisoned; stopping ticks");
            return Transition::Ignored;
        }
    };
    if let Some(event) = transition.completion() {
        effects.dispatch(event, true);
        effects.sync_metronome(&session);
    }
    transition
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::local_store::InMemoryRecordStore;
    use crate::infrastructure::notification::{InMemoryNotificationScheduler, SilentMetronome};
    use crate::infrastructure::record_store::{RecordStore, StoreKind};
    use chrono::{DateTime, Utc};

    struct Harness {
        service: TimerService,
        local: Arc<InMemoryRecordStore>,
        notifications: Arc<InMemoryNotificationScheduler>,
        metronome: Arc<SilentMetronome>,
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-02-16T09:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn short_config(auto_continue: bool) -> TimerConfig {
        TimerConfig {
            focus_seconds: 3,
            short_break_seconds: 2,
            long_break_seconds: 4,
            long_break_interval: 4,
            sessions_planned: 4,
            auto_continue,
            sound_enabled: true,
        }
    }

    fn harness(auto_continue: bool) -> Harness {
        let local = Arc::new(InMemoryRecordStore::default());
        let selector = Arc::new(StoreSelector::new(
            Arc::clone(&local),
            Arc::new(InMemoryRecordStore::with_kind(StoreKind::Remote)),
        ));
        let notifications = Arc::new(InMemoryNotificationScheduler::default());
        let metronome = Arc::new(SilentMetronome::default());
        let machine = TimerMachine::new(short_config(auto_continue)).with_now_provider(Arc::new(fixed_time));
        let service = TimerService::new(machine, selector, notifications.clone(), metronome.clone())
            .with_tick_interval(Duration::from_millis(5));
        Harness {
            service,
            local,
            notifications,
            metronome,
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn ticker_runs_phase_to_completion_and_logs_session() {
        let harness = harness(false);
        harness.service.bind_todo("todo-1", "Write report").expect("bind");
        harness.service.start().expect("start");
        assert!(harness.service.is_ticking());

        wait_until(|| {
            harness
                .service
                .state()
                .map(|session| session.phase == TimerPhase::ShortBreak)
                .unwrap_or(false)
        })
        .await;

        let session = harness.service.state().expect("state");
        assert_eq!(session.status, TimerStatus::Idle);
        assert_eq!(session.current_session_index, 2);

        wait_until(|| !harness.notifications.delivered().is_empty()).await;
        let delivered = harness.notifications.delivered();
        assert_eq!(delivered[0].todo_title.as_deref(), Some("Write report"));

        let mut recorded = Vec::new();
        for _ in 0..100 {
            recorded = harness.local.list_sessions(None).await.expect("sessions");
            if !recorded.is_empty() {
                break;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].phase, TimerPhase::Focus);
        assert_eq!(recorded[0].todo_id.as_deref(), Some("todo-1"));
    }

    #[tokio::test]
    async fn pause_stops_ticking_without_touching_time_left() {
        let harness = harness(false);
        harness.service.start().expect("start");
        harness.service.pause().expect("pause");

        let paused = harness.service.state().expect("state");
        time::sleep(Duration::from_millis(30)).await;

        assert_eq!(harness.service.state().expect("state"), paused);
        assert_eq!(paused.status, TimerStatus::Paused);
        assert_eq!(paused.time_left_seconds, 3);
        assert!(!harness.service.is_ticking());
    }

    #[tokio::test]
    async fn complete_intent_with_auto_continue_keeps_running() {
        let harness = harness(true);
        harness.service.start().expect("start");

        let transition = harness.service.complete().expect("complete");

        assert_eq!(
            transition.completion().map(|event| event.phase),
            Some(TimerPhase::Focus)
        );
        let session = harness.service.state().expect("state");
        assert_eq!(session.phase, TimerPhase::ShortBreak);
        assert_eq!(session.status, TimerStatus::Running);
        assert!(harness.service.is_ticking());
        harness.service.reset().expect("reset");
        assert!(!harness.service.is_ticking());
    }

    #[tokio::test]
    async fn metronome_follows_running_focus_when_enabled() {
        let harness = harness(false);
        harness
            .service
            .apply_settings(&Settings {
                metronome_enabled: true,
                ..Settings::default()
            })
            .expect("settings");
        assert_eq!(
            harness.service.state().expect("state").time_left_seconds,
            1500
        );

        harness.service.start().expect("start");
        assert!(harness.metronome.is_playing());

        harness.service.pause().expect("pause");
        assert!(!harness.metronome.is_playing());

        harness.service.start().expect("resume");
        harness.service.suspend();
        assert!(!harness.metronome.is_playing());
        assert!(!harness.service.is_ticking());
    }

    #[tokio::test]
    async fn ignored_intents_do_not_spawn_a_ticker() {
        let harness = harness(false);
        assert!(harness.service.pause().expect("pause").is_ignored());
        assert!(harness.service.complete().expect("complete").is_ignored());
        assert!(!harness.service.is_ticking());
    }
}
