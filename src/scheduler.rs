pub mod launcher;
pub mod orchestrator;
pub mod schedule;

pub use launcher::{JobLauncher, LivenessCheckError, TaskLauncher};
pub use orchestrator::{Clock, LocalClock, Orchestrator};
pub use schedule::{
    ActiveJob, ActiveWindow, Liveness, ScheduleError, SchedulePolicy, ScheduleState, Tick,
    Transition, WindowPosition,
};
