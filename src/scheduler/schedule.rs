//! Pure schedule state machine for the harvest orchestrator.
//!
//! Every decision is a function of the current [`ScheduleState`], the wall
//! clock instant and the observed [`Liveness`] of the last harvest run, so the
//! whole cadence can be driven in tests without timers.

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("Active window start hour {start} must be before end hour {end} (max 23)")]
    InvalidWindow { start: u32, end: u32 },
    #[error("{0} must be a positive duration")]
    NonPositive(&'static str),
    #[error("{0} is out of range")]
    OutOfRange(&'static str),
}

/// Daily interval `[start, end)` in which the hourly cadence applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    start: NaiveTime,
    end: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    BeforeWindow,
    InWindow,
    AfterWindow,
}

impl ActiveWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self, ScheduleError> {
        let invalid = ScheduleError::InvalidWindow {
            start: start_hour,
            end: end_hour,
        };
        if start_hour >= end_hour {
            return Err(invalid);
        }
        let start = NaiveTime::from_hms_opt(start_hour, 0, 0).ok_or(invalid.clone())?;
        let end = NaiveTime::from_hms_opt(end_hour, 0, 0).ok_or(invalid)?;
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveTime {
        self.start
    }

    pub fn end(&self) -> NaiveTime {
        self.end
    }

    pub fn classify(&self, now: NaiveTime) -> WindowPosition {
        if now < self.start {
            WindowPosition::BeforeWindow
        } else if now < self.end {
            WindowPosition::InWindow
        } else {
            WindowPosition::AfterWindow
        }
    }
}

impl Default for ActiveWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::MIN + TimeDelta::hours(7),
            end: NaiveTime::MIN + TimeDelta::hours(20),
        }
    }
}

/// The single scheduled job. Daily and hourly cadences cannot coexist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveJob {
    None,
    Daily { at: NaiveTime, next_run: NaiveDateTime },
    Hourly { every: TimeDelta, next_run: NaiveDateTime },
}

impl ActiveJob {
    pub fn next_run(&self) -> Option<NaiveDateTime> {
        match self {
            ActiveJob::None => None,
            ActiveJob::Daily { next_run, .. } | ActiveJob::Hourly { next_run, .. } => Some(*next_run),
        }
    }

    fn daily(at: NaiveTime, now: NaiveDateTime) -> Self {
        ActiveJob::Daily {
            at,
            next_run: next_occurrence(at, now),
        }
    }

    /// Move the next fire strictly past `now` without replaying missed slots.
    fn advanced(self, now: NaiveDateTime) -> Self {
        match self {
            ActiveJob::None => ActiveJob::None,
            ActiveJob::Daily { at, .. } => ActiveJob::daily(at, now),
            ActiveJob::Hourly { every, mut next_run } => {
                while next_run <= now {
                    next_run += every;
                }
                ActiveJob::Hourly { every, next_run }
            }
        }
    }
}

/// First instant strictly after `now` whose time of day is `at`.
fn next_occurrence(at: NaiveTime, now: NaiveDateTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

/// Orchestrator-owned schedule. Rebuilt from policy on every process start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleState {
    active_job: ActiveJob,
    // Daily trigger remembered while the hourly job replaces it.
    daily_anchor: Option<NaiveTime>,
}

impl ScheduleState {
    pub fn new() -> Self {
        Self {
            active_job: ActiveJob::None,
            daily_anchor: None,
        }
    }

    pub fn active_job(&self) -> ActiveJob {
        self.active_job
    }

    pub fn daily_anchor(&self) -> Option<NaiveTime> {
        self.daily_anchor
    }
}

impl Default for ScheduleState {
    fn default() -> Self {
        Self::new()
    }
}

/// What the orchestrator knows about the last launched harvest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Idle,
    Alive,
    /// The liveness check itself failed; treated like a run in flight.
    Unknown,
}

impl Liveness {
    fn blocks_scheduling(self) -> bool {
        !matches!(self, Liveness::Idle)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    InstalledDaily,
    InstalledHourly,
    CancelledHourly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulePolicy {
    pub window: ActiveWindow,
    pub hourly_interval: TimeDelta,
    pub tick: TimeDelta,
    pub safety_margin: TimeDelta,
}

impl SchedulePolicy {
    pub fn new(
        window: ActiveWindow,
        hourly_interval: TimeDelta,
        tick: TimeDelta,
        safety_margin: TimeDelta,
    ) -> Result<Self, ScheduleError> {
        if hourly_interval <= TimeDelta::zero() {
            return Err(ScheduleError::NonPositive("hourly interval"));
        }
        if tick <= TimeDelta::zero() {
            return Err(ScheduleError::NonPositive("tick"));
        }
        if safety_margin < TimeDelta::zero() {
            return Err(ScheduleError::NonPositive("safety margin"));
        }
        Ok(Self {
            window,
            hourly_interval,
            tick,
            safety_margin,
        })
    }
}

impl Default for SchedulePolicy {
    fn default() -> Self {
        Self {
            window: ActiveWindow::default(),
            hourly_interval: TimeDelta::hours(1),
            tick: TimeDelta::seconds(1),
            safety_margin: TimeDelta::seconds(180),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tick {
    pub state: ScheduleState,
    pub position: WindowPosition,
    pub transition: Transition,
    /// A job fired and a harvest run must be launched.
    pub fired: bool,
    /// A job came due while a run was in flight and was skipped.
    pub skipped: bool,
    pub wake_at: NaiveDateTime,
}

/// Evaluate one orchestrator tick.
pub fn tick(
    policy: &SchedulePolicy,
    state: ScheduleState,
    now: NaiveDateTime,
    liveness: Liveness,
) -> Tick {
    let position = policy.window.classify(now.time());
    let busy = liveness.blocks_scheduling();
    let mut state = state;

    let transition = match (state.active_job, position) {
        // Hourly cadence never outlives the window, whether or not a run is in flight.
        (ActiveJob::Hourly { .. }, WindowPosition::BeforeWindow | WindowPosition::AfterWindow) => {
            state.active_job = match state.daily_anchor.take() {
                Some(at) => ActiveJob::daily(at, now),
                None => ActiveJob::None,
            };
            Transition::CancelledHourly
        }
        _ if busy => Transition::Unchanged,
        (ActiveJob::None, _) => {
            state.active_job = ActiveJob::daily(policy.window.start(), now);
            Transition::InstalledDaily
        }
        (ActiveJob::Daily { at, .. }, WindowPosition::InWindow) => {
            state.daily_anchor = Some(at);
            state.active_job = ActiveJob::Hourly {
                every: policy.hourly_interval,
                next_run: now,
            };
            Transition::InstalledHourly
        }
        _ => Transition::Unchanged,
    };

    let mut fired = false;
    let mut skipped = false;
    if let Some(next_run) = state.active_job.next_run() {
        if next_run <= now {
            if busy {
                skipped = true;
            } else {
                fired = true;
            }
            state.active_job = state.active_job.advanced(now);
        }
    }

    let next_tick = now + policy.tick;
    let wake_at = match (state.active_job, position) {
        (ActiveJob::Daily { next_run, .. }, WindowPosition::BeforeWindow | WindowPosition::AfterWindow)
            if !busy && !fired =>
        {
            next_tick.max(next_run - policy.safety_margin)
        }
        _ => next_tick,
    };

    Tick {
        state,
        position,
        transition,
        fired,
        skipped,
        wake_at,
    }
}

/// Human-readable label used in logs, e.g. `daily@07:00` or `hourly/60m`.
pub fn describe(job: &ActiveJob) -> String {
    match job {
        ActiveJob::None => "none".to_string(),
        ActiveJob::Daily { at, .. } => format!("daily@{:02}:{:02}", at.hour(), at.minute()),
        ActiveJob::Hourly { every, .. } => format!("hourly/{}m", every.num_minutes()),
    }
}
