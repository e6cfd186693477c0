// Multi-day orchestrator simulations on a virtual clock

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Timelike};
use weather_harvest_service::scheduler::{
    ActiveJob, Clock, JobLauncher, LivenessCheckError, Orchestrator, SchedulePolicy,
};

#[derive(Clone)]
struct SimClock(Arc<Mutex<NaiveDateTime>>);

impl SimClock {
    fn starting_at(now: NaiveDateTime) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    fn set(&self, now: NaiveDateTime) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for SimClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap()
    }
}

/// Pretends each run keeps executing for a fixed duration after launch.
struct TimedLauncher {
    clock: SimClock,
    run_time: TimeDelta,
    running_until: Option<NaiveDateTime>,
    launched_at: Vec<NaiveDateTime>,
}

impl TimedLauncher {
    fn new(clock: SimClock, run_time: TimeDelta) -> Self {
        Self {
            clock,
            run_time,
            running_until: None,
            launched_at: Vec::new(),
        }
    }
}

impl JobLauncher for TimedLauncher {
    fn launch(&mut self) {
        let now = self.clock.now();
        assert!(
            self.running_until.map_or(true, |until| now >= until),
            "launched at {} while previous run was still alive",
            now
        );
        self.running_until = Some(now + self.run_time);
        self.launched_at.push(now);
    }

    fn liveness(&mut self) -> Result<bool, LivenessCheckError> {
        let now = self.clock.now();
        Ok(self.running_until.is_some_and(|until| now < until))
    }
}

fn midnight(day: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

/// Step the orchestrator, jumping the clock to every requested wake-up,
/// until `until` is reached. Returns the number of ticks evaluated.
fn simulate(
    orchestrator: &mut Orchestrator<TimedLauncher, SimClock>,
    clock: &SimClock,
    until: NaiveDateTime,
) -> usize {
    let mut ticks = 0;
    loop {
        let now = clock.now();
        if now >= until {
            return ticks;
        }
        let wake_at = orchestrator.step();
        assert!(wake_at > now, "wake-up at {} is not after {}", wake_at, now);
        clock.set(wake_at);
        ticks += 1;
    }
}

fn launches_on(launcher: &TimedLauncher, day: u32) -> Vec<u32> {
    launcher
        .launched_at
        .iter()
        .filter(|at| at.date() == midnight(day).date())
        .map(|at| at.hour())
        .collect()
}

#[test]
fn test_three_days_of_hourly_harvests() {
    let clock = SimClock::starting_at(midnight(10));
    let launcher = TimedLauncher::new(clock.clone(), TimeDelta::minutes(10));
    let mut orchestrator = Orchestrator::new(SchedulePolicy::default(), launcher, clock.clone());

    simulate(&mut orchestrator, &clock, midnight(13));

    let expected: Vec<u32> = (7..20).collect();
    for day in 10..13 {
        assert_eq!(launches_on(orchestrator.launcher(), day), expected, "day {}", day);
    }
    assert_eq!(orchestrator.launches(), 39);

    for at in &orchestrator.launcher().launched_at {
        assert_eq!((at.minute(), at.second()), (0, 0), "off-slot launch at {}", at);
    }
}

#[test]
fn test_long_runs_skip_the_following_slot() {
    let clock = SimClock::starting_at(midnight(10));
    let launcher = TimedLauncher::new(clock.clone(), TimeDelta::minutes(70));
    let mut orchestrator = Orchestrator::new(SchedulePolicy::default(), launcher, clock.clone());

    simulate(&mut orchestrator, &clock, midnight(11));

    // Every other slot lands while the previous run is still alive
    assert_eq!(launches_on(orchestrator.launcher(), 10), vec![7, 9, 11, 13, 15, 17, 19]);
}

#[test]
fn test_sleeps_through_the_night() {
    let clock = SimClock::starting_at(midnight(10));
    let launcher = TimedLauncher::new(clock.clone(), TimeDelta::minutes(10));
    let mut orchestrator = Orchestrator::new(SchedulePolicy::default(), launcher, clock.clone());

    // Midnight to 06:57 is a single jump, then one tick per second to 07:00
    let ticks = simulate(
        &mut orchestrator,
        &clock,
        midnight(10) + TimeDelta::hours(7),
    );
    assert_eq!(ticks, 1 + 180);
    assert!(matches!(orchestrator.state().active_job(), ActiveJob::Daily { .. }));

    // Finish the day; after the window closes the next wake-up is tomorrow's margin
    simulate(&mut orchestrator, &clock, midnight(10) + TimeDelta::hours(20));
    let wake_at = orchestrator.step();
    assert_eq!(
        wake_at,
        midnight(11) + TimeDelta::hours(7) - TimeDelta::seconds(180)
    );
    assert!(matches!(
        orchestrator.state().active_job(),
        ActiveJob::Daily { next_run, .. } if next_run == midnight(11) + TimeDelta::hours(7)
    ));
}

#[test]
fn test_start_inside_window_harvests_immediately() {
    let start = midnight(10) + TimeDelta::minutes(14 * 60 + 25);
    let clock = SimClock::starting_at(start);
    let launcher = TimedLauncher::new(clock.clone(), TimeDelta::minutes(10));
    let mut orchestrator = Orchestrator::new(SchedulePolicy::default(), launcher, clock.clone());

    simulate(&mut orchestrator, &clock, midnight(11));

    // The daily job is installed first; hourly takes over on the next tick
    let launched = &orchestrator.launcher().launched_at;
    assert_eq!(launched.first(), Some(&(start + TimeDelta::seconds(1))));
    let hours: Vec<(u32, u32)> = launched.iter().map(|at| (at.hour(), at.minute())).collect();
    assert_eq!(
        hours,
        vec![(14, 25), (15, 25), (16, 25), (17, 25), (18, 25), (19, 25)]
    );
}
