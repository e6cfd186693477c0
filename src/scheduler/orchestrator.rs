use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::{debug, info, instrument, warn};

use crate::scheduler::launcher::JobLauncher;
use crate::scheduler::schedule::{self, Liveness, SchedulePolicy, ScheduleState, Transition};

/// Source of local wall-clock time. The active window is expressed in local
/// hours, so the orchestrator works on naive local instants.
pub trait Clock: Send {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl Clock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Adaptive harvest orchestrator.
///
/// Owns the schedule state, evaluates one tick at a time and launches a
/// harvest run whenever a job fires. Runs are never awaited or cancelled
/// here; the launcher's liveness report is only used to avoid overlap.
pub struct Orchestrator<L, C = LocalClock> {
    policy: SchedulePolicy,
    state: ScheduleState,
    launcher: L,
    clock: C,
    launches: u64,
}

impl<L: JobLauncher, C: Clock> Orchestrator<L, C> {
    pub fn new(policy: SchedulePolicy, launcher: L, clock: C) -> Self {
        Self {
            policy,
            state: ScheduleState::new(),
            launcher,
            clock,
            launches: 0,
        }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn launcher(&self) -> &L {
        &self.launcher
    }

    /// Number of runs launched since start
    pub fn launches(&self) -> u64 {
        self.launches
    }

    /// Run one tick and return the instant at which the next one is due.
    pub fn step(&mut self) -> NaiveDateTime {
        let now = self.clock.now();

        let liveness = match self.launcher.liveness() {
            Ok(true) => Liveness::Alive,
            Ok(false) => Liveness::Idle,
            Err(e) => {
                warn!("Liveness check failed, holding schedule this tick: {}", e);
                Liveness::Unknown
            }
        };

        let tick = schedule::tick(&self.policy, self.state, now, liveness);

        match tick.transition {
            Transition::Unchanged => {}
            Transition::InstalledDaily => info!(
                job = %schedule::describe(&tick.state.active_job()),
                next_run = ?tick.state.active_job().next_run(),
                "Installed daily harvest job"
            ),
            Transition::InstalledHourly => info!(
                job = %schedule::describe(&tick.state.active_job()),
                position = ?tick.position,
                "Installed hourly harvest job"
            ),
            Transition::CancelledHourly => info!(
                position = ?tick.position,
                restored = %schedule::describe(&tick.state.active_job()),
                "Cancelled hourly harvest job"
            ),
        }

        if tick.skipped {
            debug!(?liveness, "Harvest job due but previous run still in flight, skipping");
        }

        if tick.fired {
            self.launches += 1;
            info!(
                launch = self.launches,
                job = %schedule::describe(&tick.state.active_job()),
                "Launching harvest run"
            );
            self.launcher.launch();
        }

        self.state = tick.state;
        tick.wake_at
    }

    /// Drive ticks forever, sleeping until each computed wake-up instant.
    #[instrument(skip(self), fields(tick_secs = self.policy.tick.num_seconds()))]
    pub async fn run(mut self) {
        info!(
            window_start = %self.policy.window.start(),
            window_end = %self.policy.window.end(),
            hourly_minutes = self.policy.hourly_interval.num_minutes(),
            "Harvest orchestrator started"
        );

        loop {
            let wake_at = self.step();
            let sleep_for = (wake_at - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            if sleep_for > Duration::from_secs(60) {
                info!("Nothing scheduled soon, sleeping until {}", wake_at);
            }
            tokio::time::sleep(sleep_for).await;
        }
    }
}
