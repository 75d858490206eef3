//! Demo CLI subcommand: runs the ordering scenarios and prints what ran.
//!
//! Each scenario builds its own [`Scheduler`], drives it to termination and
//! returns the observed lines, so the same code backs the CLI and the tests.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::pipe::{Pipe, PipeConfig, PipeError, Record};
use crate::pool::WorkerError;
use crate::scheduler::{Scheduler, SchedulerConfig, SchedulerError};

/// Scenario names accepted by `demo`.
pub const SCENARIOS: &[&str] = &["priority", "completion", "backpressure", "microtask"];

#[derive(Debug, Error)]
pub enum DemoError {
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Pipe(#[from] PipeError),
}

#[derive(Clone, Default)]
struct Transcript(Rc<RefCell<Vec<String>>>);

impl Transcript {
    fn line(&self, line: impl Into<String>) {
        self.0.borrow_mut().push(line.into());
    }

    fn lines(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

/// Synchronous code, then a priority task, then a zero-delay timer.
pub fn priority_vs_timer(config: &SchedulerConfig) -> Result<Vec<String>, DemoError> {
    let sched = Scheduler::new(config.clone());
    let out = Transcript::default();

    let (s, o) = (sched.clone(), out.clone());
    sched.run_with(move || -> Result<(), SchedulerError> {
        o.line("Start");
        let o2 = o.clone();
        s.schedule_after(0, move || o2.line("Timeout"))?;
        let o3 = o.clone();
        s.schedule_now(move || o3.line("Priority"))?;
        o.line("End");
        Ok(())
    })?;
    Ok(out.lines())
}

/// A completion task schedules a check task and a zero-delay timer; the
/// check runs first because the check phase follows the completion phase.
pub fn completion_ordering(config: &SchedulerConfig) -> Result<Vec<String>, DemoError> {
    let sched = Scheduler::new(config.clone());
    let out = Transcript::default();

    let (s, o) = (sched.clone(), out.clone());
    sched.submit(
        || Ok::<_, String>(21 * 2),
        move |result: Result<i32, WorkerError>| -> Result<(), SchedulerError> {
            match result {
                Ok(value) => o.line(format!("Completion ({value})")),
                Err(e) => o.line(format!("Completion failed: {e}")),
            }
            let o2 = o.clone();
            s.schedule_check(move || o2.line("Check"))?;
            let o3 = o.clone();
            s.schedule_after(0, move || o3.line("Timer"))?;
            Ok(())
        },
    )?;
    sched.run()?;
    Ok(out.lines())
}

/// Five one-unit writes into a pipe with water marks 3 and 1.
pub fn backpressure(config: &SchedulerConfig) -> Result<Vec<String>, DemoError> {
    let sched = Scheduler::new(config.clone());
    let out = Transcript::default();

    let o = out.clone();
    let pipe = Pipe::new(&sched, PipeConfig::new(3, 1), move |chunk: Record<u32>| {
        o.line(format!("deliver {}", chunk.0))
    });
    let (o, p) = (out.clone(), pipe.clone());
    pipe.on_drain(move || o.line(format!("drain (buffered {})", p.buffered_size())));
    let o = out.clone();
    pipe.on_finish(move || o.line("finish"));

    for n in 1..=5 {
        let accepted = pipe.write(Record(n))?;
        out.line(format!("write {n} -> {accepted}"));
    }
    pipe.end()?;
    sched.run()?;
    Ok(out.lines())
}

/// Priority tasks drain before microtasks, and both before timers.
pub fn microtask_ordering(config: &SchedulerConfig) -> Result<Vec<String>, DemoError> {
    let sched = Scheduler::new(config.clone());
    let out = Transcript::default();

    let (s, o) = (sched.clone(), out.clone());
    sched.run_with(move || -> Result<(), SchedulerError> {
        let o1 = o.clone();
        s.schedule_after(0, move || o1.line("timer"))?;
        let (s2, o2) = (s.clone(), o.clone());
        s.queue_microtask(move || -> Result<(), SchedulerError> {
            o2.line("microtask");
            let o3 = o2.clone();
            s2.schedule_now(move || o3.line("priority from microtask"))?;
            Ok(())
        })?;
        let o4 = o.clone();
        s.schedule_now(move || o4.line("priority"))?;
        o.line("sync");
        Ok(())
    })?;
    Ok(out.lines())
}

/// Run one scenario by name.
pub fn run_scenario(name: &str, config: &SchedulerConfig) -> Result<Vec<String>, DemoError> {
    match name {
        "priority" => priority_vs_timer(config),
        "completion" => completion_ordering(config),
        "backpressure" => backpressure(config),
        "microtask" => microtask_ordering(config),
        other => Err(DemoError::UnknownScenario(other.to_string())),
    }
}

/// Run the named scenario (or `all`) and print its transcript.
///
/// Returns 0 on success, 1 on a scenario error, 2 for an unknown name.
pub fn run_demo(name: &str, config: &SchedulerConfig) -> i32 {
    let names: Vec<&str> = if name == "all" { SCENARIOS.to_vec() } else { vec![name] };
    for scenario in names {
        match run_scenario(scenario, config) {
            Ok(lines) => {
                println!("[{scenario}]");
                for line in lines {
                    println!("  {line}");
                }
            }
            Err(DemoError::UnknownScenario(other)) => {
                eprintln!("Unknown scenario: {other} (expected one of: all, {})", SCENARIOS.join(", "));
                return 2;
            }
            Err(e) => {
                eprintln!("Scenario {scenario} failed: {e}");
                return 1;
            }
        }
    }
    0
}
