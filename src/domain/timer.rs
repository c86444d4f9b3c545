use crate::domain::models::{PhaseCompleted, Settings, TimerPhase, TimerSession, TimerStatus};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::debug;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerConfig {
    pub focus_seconds: u32,
    pub short_break_seconds: u32,
    pub long_break_seconds: u32,
    pub long_break_interval: u32,
    pub sessions_planned: u32,
    pub auto_continue: bool,
    pub sound_enabled: bool,
}

impl TimerConfig {
    pub fn duration_for(&self, phase: TimerPhase) -> u32 {
        let seconds = match phase {
            TimerPhase::Focus => self.focus_seconds,
            TimerPhase::ShortBreak => self.short_break_seconds,
            TimerPhase::LongBreak => self.long_break_seconds,
        };
        seconds.max(1)
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for TimerConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            focus_seconds: settings.phase_duration_seconds(TimerPhase::Focus),
            short_break_seconds: settings.phase_duration_seconds(TimerPhase::ShortBreak),
            long_break_seconds: settings.phase_duration_seconds(TimerPhase::LongBreak),
            long_break_interval: settings.long_break_interval.max(1),
            sessions_planned: settings.sessions_planned,
            auto_continue: settings.auto_continue,
            sound_enabled: settings.sound_enabled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Applied,
    Ignored,
    PhaseCompleted(PhaseCompleted),
}

impl Transition {
    pub fn completion(&self) -> Option<&PhaseCompleted> {
        match self {
            Self::PhaseCompleted(event) => Some(event),
            _ => None,
        }
    }

    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::Ignored)
    }
}

pub struct TimerMachine {
    session: TimerSession,
    config: TimerConfig,
    now_provider: NowProvider,
}

impl TimerMachine {
    pub fn new(config: TimerConfig) -> Self {
        let initial = config.duration_for(TimerPhase::Focus);
        Self {
            session: TimerSession {
                status: TimerStatus::Idle,
                phase: TimerPhase::Focus,
                time_left_seconds: initial,
                initial_duration_seconds: initial,
                session_started_at: None,
                current_session_index: 1,
                total_sessions_planned: config.sessions_planned,
                bound_todo_id: None,
                bound_todo_title: None,
            },
            config,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn session(&self) -> &TimerSession {
        &self.session
    }

    pub fn config(&self) -> &TimerConfig {
        &self.config
    }

    pub fn start(&mut self) -> Transition {
        match self.session.status {
            TimerStatus::Idle => {
                self.session.status = TimerStatus::Running;
                self.session.session_started_at = Some((self.now_provider)());
                self.session.time_left_seconds = self.session.initial_duration_seconds;
                Transition::Applied
            }
            TimerStatus::Paused => {
                self.session.status = TimerStatus::Running;
                if self.session.session_started_at.is_none() {
                    self.session.session_started_at = Some((self.now_provider)());
                }
                Transition::Applied
            }
            status => self.ignore("start", status),
        }
    }

    pub fn pause(&mut self) -> Transition {
        match self.session.status {
            TimerStatus::Running => {
                self.session.status = TimerStatus::Paused;
                Transition::Applied
            }
            status => self.ignore("pause", status),
        }
    }

    pub fn tick(&mut self) -> Transition {
        if self.session.status != TimerStatus::Running {
            return self.ignore("tick", self.session.status);
        }

        self.session.time_left_seconds = self.session.time_left_seconds.saturating_sub(1);
        if self.session.time_left_seconds == 0 {
            return Transition::PhaseCompleted(self.finish_phase());
        }
        Transition::Applied
    }

    pub fn complete_phase(&mut self) -> Transition {
        match self.session.status {
            TimerStatus::Running | TimerStatus::Paused => {
                Transition::PhaseCompleted(self.finish_phase())
            }
            status => self.ignore("complete_phase", status),
        }
    }

    pub fn reset(&mut self) -> Transition {
        self.session.status = TimerStatus::Idle;
        self.session.session_started_at = None;
        self.session.time_left_seconds = self.session.initial_duration_seconds;
        self.session.bound_todo_id = None;
        self.session.bound_todo_title = None;
        Transition::Applied
    }

    pub fn bind_todo(&mut self, todo_id: impl Into<String>, todo_title: impl Into<String>) {
        self.session.bound_todo_id = Some(todo_id.into());
        self.session.bound_todo_title = Some(todo_title.into());
    }

    pub fn unbind_todo(&mut self) {
        self.session.bound_todo_id = None;
        self.session.bound_todo_title = None;
    }

    /// New durations take effect immediately only while idle; a running phase keeps its length.
    pub fn apply_config(&mut self, config: TimerConfig) {
        self.config = config;
        self.session.total_sessions_planned = self.config.sessions_planned;
        if self.session.status == TimerStatus::Idle {
            let initial = self.config.duration_for(self.session.phase);
            self.session.initial_duration_seconds = initial;
            self.session.time_left_seconds = initial;
        }
    }

    pub fn restore(&mut self, mut session: TimerSession) {
        session.initial_duration_seconds = session.initial_duration_seconds.max(1);
        session.time_left_seconds = session
            .time_left_seconds
            .min(session.initial_duration_seconds);
        if session.status == TimerStatus::Running && session.session_started_at.is_none() {
            session.session_started_at = Some((self.now_provider)());
        }
        self.session = session;
    }

    fn finish_phase(&mut self) -> PhaseCompleted {
        let now = (self.now_provider)();
        self.session.status = TimerStatus::Completed;
        let completed_phase = self.session.phase;
        let completed_index = self.session.current_session_index;
        let event = PhaseCompleted {
            phase: completed_phase,
            session_index: completed_index,
            duration_seconds: self.session.initial_duration_seconds,
            bound_todo_id: self.session.bound_todo_id.clone(),
            bound_todo_title: self.session.bound_todo_title.clone(),
            play_sound: self.config.sound_enabled,
            completed_at: now,
        };

        let (next_phase, next_index) = next_phase(
            completed_phase,
            completed_index,
            self.config.long_break_interval,
        );
        let initial = self.config.duration_for(next_phase);
        self.session.phase = next_phase;
        self.session.current_session_index = next_index;
        self.session.initial_duration_seconds = initial;
        self.session.time_left_seconds = initial;

        if self.config.auto_continue {
            self.session.status = TimerStatus::Running;
            self.session.session_started_at = Some(now);
        } else {
            self.session.status = TimerStatus::Idle;
            self.session.session_started_at = None;
        }

        event
    }

    fn ignore(&self, intent: &str, status: TimerStatus) -> Transition {
        debug!(intent, status = status.as_str(), "ignoring timer intent in current state");
        Transition::Ignored
    }
}

/// Pomodoro cadence. The index names the focus session of the current cycle:
/// it advances when a focus phase ends and returns to 1 after a long break is chosen.
pub fn next_phase(completed: TimerPhase, session_index: u32, long_break_interval: u32) -> (TimerPhase, u32) {
    match completed {
        TimerPhase::Focus if session_index % long_break_interval.max(1) == 0 => {
            (TimerPhase::LongBreak, 1)
        }
        TimerPhase::Focus => (TimerPhase::ShortBreak, session_index.saturating_add(1)),
        TimerPhase::ShortBreak | TimerPhase::LongBreak => (TimerPhase::Focus, session_index),
    }
}
