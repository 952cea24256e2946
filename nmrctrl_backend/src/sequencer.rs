//! # Ordered step sequencer
//!
//! A [`Sequencer`] holds a fixed list of named steps and a cursor (`current_index`). Each
//! [`Sequencer::advance`] runs the step under the cursor against a caller-owned context and moves
//! the cursor on. The sequence never branches or retries.
//!
//! Step results are turned into a tri-state [`StepOutcome`]:
//!
//! - `Success`: the step returned `Ok`, the cursor moves on.
//! - `Recoverable`: a [`StepPolicy::BestEffort`] step failed, the error is reported and the cursor
//!   still moves on.
//! - `Fatal`: a [`StepPolicy::Required`] step failed. The cursor stays put and the sequencer is
//!   halted: every later `advance` reports [`Advance::Halted`] until [`Sequencer::reset`].
//!
//! [`Sequencer::run_until`] drives `advance` in a loop with a settling delay between calls. The
//! delay is delegated to [`SequenceContext::settle`], which may cut it short (e.g. on a stop
//! request) and thereby end the loop.

use std::time::Duration;

use indexmap::IndexMap;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPolicy {
    /// Failure halts the sequence
    Required,
    /// Failure is reported and the sequence continues
    BestEffort,
}

pub type StepFn<C, O> = fn(&mut C) -> Result<O>;

pub struct Step<C, O> {
    pub name: &'static str,
    pub policy: StepPolicy,
    pub run: StepFn<C, O>,
}

impl<C, O> Step<C, O> {
    pub fn required(name: &'static str, run: StepFn<C, O>) -> Self {
        Self {
            name,
            policy: StepPolicy::Required,
            run,
        }
    }

    pub fn best_effort(name: &'static str, run: StepFn<C, O>) -> Self {
        Self {
            name,
            policy: StepPolicy::BestEffort,
            run,
        }
    }
}

/// Hooks the sequencer needs from the state it drives.
pub trait SequenceContext {
    /// Waits `delay` between two automatic steps. Returning `false` aborts the running loop.
    fn settle(&mut self, delay: Duration) -> bool;

    /// Called by [`Sequencer::reset`], typically to release hardware.
    fn on_reset(&mut self) {}
}

#[derive(Debug)]
pub enum StepOutcome<O> {
    Success(O),
    Recoverable(Error),
    Fatal(Error),
}

/// Result of one [`Sequencer::advance`] call
#[derive(Debug)]
pub enum Advance<O> {
    Ran {
        index: usize,
        name: &'static str,
        outcome: StepOutcome<O>,
    },
    /// Cursor is past the last step, nothing was run
    Exhausted,
    /// A required step failed earlier, nothing was run
    Halted { index: usize, name: &'static str },
}

impl<O> Advance<O> {
    /// Whether an automatic run must not continue after this advance
    pub fn ends_run(&self) -> bool {
        !matches!(
            self,
            Advance::Ran {
                outcome: StepOutcome::Success(_) | StepOutcome::Recoverable(_),
                ..
            }
        )
    }
}

pub struct Sequencer<C, O> {
    steps: IndexMap<&'static str, Step<C, O>>,
    current: usize,
    halted: Option<usize>,
}

impl<C: SequenceContext, O> Sequencer<C, O> {
    pub fn new() -> Self {
        Self {
            steps: IndexMap::new(),
            current: 0,
            halted: None,
        }
    }

    /// Appends a step to the end of the sequence.
    ///
    /// # Panics
    ///
    /// If a step with the same name is already declared.
    pub fn add_step(&mut self, step: Step<C, O>) {
        assert!(
            !self.steps.contains_key(step.name),
            "Step {} is already declared",
            step.name
        );
        self.steps.insert(step.name, step);
    }

    pub fn with_steps(steps: impl IntoIterator<Item = Step<C, O>>) -> Self {
        let mut seq = Self::new();
        steps.into_iter().for_each(|step| seq.add_step(step));
        seq
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.keys().copied().collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.steps.get_index_of(name)
    }

    /// Runs the step under the cursor.
    pub fn advance(&mut self, ctx: &mut C) -> Advance<O> {
        if let Some(index) = self.halted {
            let name = self.steps.get_index(index).map_or("", |(name, _)| *name);
            return Advance::Halted { index, name };
        }
        let Some(step) = self.steps.get_index(self.current).map(|(_, step)| step) else {
            log::info!("No further steps");
            return Advance::Exhausted;
        };
        let (index, name, policy, run) = (self.current, step.name, step.policy, step.run);

        log::info!("Executing step {}: {}", index, name);
        let outcome = match run(ctx) {
            Ok(out) => {
                self.current += 1;
                StepOutcome::Success(out)
            }
            Err(err) => match policy {
                StepPolicy::Required => {
                    log::error!("Step {} failed, sequence halted: {}", name, err);
                    self.halted = Some(index);
                    StepOutcome::Fatal(err)
                }
                StepPolicy::BestEffort => {
                    log::warn!("Step {} failed, continuing: {}", name, err);
                    self.current += 1;
                    StepOutcome::Recoverable(err)
                }
            },
        };
        Advance::Ran {
            index,
            name,
            outcome,
        }
    }

    /// Advances until the cursor has moved past step `name`, settling `delay` between calls.
    ///
    /// Stops early on a fatal outcome, when the sequence is exhausted or halted, or when
    /// [`SequenceContext::settle`] is cut short. Every advance is handed to `on_advance`.
    /// Returns the number of `advance` calls made.
    ///
    /// # Errors
    ///
    /// [`Error::StepNotFound`] if `name` is not declared; no step is run in that case.
    pub fn run_until(
        &mut self,
        name: &str,
        ctx: &mut C,
        delay: Duration,
        mut on_advance: impl FnMut(Advance<O>),
    ) -> Result<usize> {
        let target = self.index_of(name).ok_or_else(|| Error::StepNotFound {
            name: name.to_string(),
            declared: self.step_names().iter().map(|s| s.to_string()).collect(),
        })?;

        let mut calls = 0;
        while self.current <= target {
            if calls > 0 && !ctx.settle(delay) {
                log::info!("Run stopped before step {}", self.current);
                break;
            }
            let adv = self.advance(ctx);
            calls += 1;
            let ends_run = adv.ends_run();
            on_advance(adv);
            if ends_run {
                break;
            }
        }
        Ok(calls)
    }

    /// Rewinds the cursor, clears a halt and lets the context release its resources.
    pub fn reset(&mut self, ctx: &mut C) {
        self.current = 0;
        self.halted = None;
        ctx.on_reset();
        log::info!("Sequence reset");
    }
}

impl<C: SequenceContext, O> Default for Sequencer<C, O> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use crate::sequencer::*;

    #[derive(Default)]
    struct Bench {
        ran: Vec<&'static str>,
        settles: usize,
        resets: usize,
        // settle() returns false once this many settles happened
        stop_after: Option<usize>,
    }

    impl SequenceContext for Bench {
        fn settle(&mut self, _delay: Duration) -> bool {
            self.settles += 1;
            self.stop_after.map_or(true, |n| self.settles <= n)
        }

        fn on_reset(&mut self) {
            self.resets += 1;
        }
    }

    macro_rules! ok_step {
        ($name:literal) => {
            Step::<Bench, String>::required($name, |b: &mut Bench| {
                b.ran.push($name);
                Ok(format!("{} done", $name))
            })
        };
    }

    fn failing(b: &mut Bench) -> Result<String> {
        b.ran.push("fail");
        Err(Error::Protocol("boom".to_string()))
    }

    fn seven() -> Sequencer<Bench, String> {
        Sequencer::with_steps([
            ok_step!("a"),
            ok_step!("b"),
            ok_step!("c"),
            ok_step!("d"),
            ok_step!("e"),
            ok_step!("f"),
            ok_step!("g"),
        ])
    }

    #[test]
    fn advance_runs_in_order_then_exhausts() {
        let mut seq = seven();
        let mut bench = Bench::default();
        for i in 0..7 {
            match seq.advance(&mut bench) {
                Advance::Ran {
                    index,
                    outcome: StepOutcome::Success(msg),
                    ..
                } => {
                    assert_eq!(index, i);
                    assert!(msg.ends_with("done"));
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(bench.ran, vec!["a", "b", "c", "d", "e", "f", "g"]);
        assert!(matches!(seq.advance(&mut bench), Advance::Exhausted));
        assert_eq!(seq.current_index(), 7);
        assert_eq!(bench.ran.len(), 7);
    }

    #[test]
    fn index_of_known_and_unknown() {
        let seq = seven();
        assert_eq!(seq.index_of("a"), Some(0));
        assert_eq!(seq.index_of("e"), Some(4));
        assert_eq!(seq.index_of("zzz"), None);
        assert_eq!(seq.len(), 7);
    }

    #[test]
    fn run_until_stops_after_target() {
        let mut seq = seven();
        let mut bench = Bench::default();
        let mut seen = 0;
        let calls = seq
            .run_until("e", &mut bench, Duration::ZERO, |_| seen += 1)
            .unwrap();
        assert_eq!(calls, 5);
        assert_eq!(seen, 5);
        assert_eq!(seq.current_index(), 5);
        // Delay only between calls
        assert_eq!(bench.settles, 4);
    }

    #[test]
    fn run_until_past_target_does_nothing() {
        let mut seq = seven();
        let mut bench = Bench::default();
        seq.run_until("c", &mut bench, Duration::ZERO, |_| {}).unwrap();
        let calls = seq.run_until("b", &mut bench, Duration::ZERO, |_| {}).unwrap();
        assert_eq!(calls, 0);
        assert_eq!(seq.current_index(), 3);
    }

    #[test]
    fn run_until_unknown_name_runs_nothing() {
        let mut seq = seven();
        let mut bench = Bench::default();
        let err = seq
            .run_until("nope", &mut bench, Duration::ZERO, |_| {})
            .unwrap_err();
        match err {
            Error::StepNotFound { name, declared } => {
                assert_eq!(name, "nope");
                assert_eq!(declared.len(), 7);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(bench.ran.is_empty());
        assert_eq!(seq.current_index(), 0);
    }

    #[test]
    fn cancelled_settle_ends_run() {
        let mut seq = seven();
        let mut bench = Bench {
            stop_after: Some(1),
            ..Bench::default()
        };
        let calls = seq.run_until("g", &mut bench, Duration::ZERO, |_| {}).unwrap();
        assert_eq!(calls, 2);
        assert_eq!(bench.ran, vec!["a", "b"]);
    }

    #[test]
    fn required_failure_halts_until_reset() {
        let mut seq = Sequencer::with_steps([
            ok_step!("a"),
            Step::<Bench, String>::required("broken", failing),
            ok_step!("c"),
        ]);
        let mut bench = Bench::default();
        let mut fatal = 0;
        let calls = seq
            .run_until("c", &mut bench, Duration::ZERO, |adv| {
                if let Advance::Ran {
                    outcome: StepOutcome::Fatal(_),
                    ..
                } = adv
                {
                    fatal += 1;
                }
            })
            .unwrap();
        assert_eq!(calls, 2);
        assert_eq!(fatal, 1);
        assert_eq!(seq.current_index(), 1);
        assert!(seq.is_halted());

        match seq.advance(&mut bench) {
            Advance::Halted { index, name } => {
                assert_eq!(index, 1);
                assert_eq!(name, "broken");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(bench.ran, vec!["a", "fail"]);

        seq.reset(&mut bench);
        assert!(!seq.is_halted());
        assert_eq!(seq.current_index(), 0);
        assert_eq!(bench.resets, 1);
    }

    #[test]
    fn best_effort_failure_advances() {
        let mut seq = Sequencer::with_steps([
            ok_step!("a"),
            Step::<Bench, String>::best_effort("flaky", failing),
            ok_step!("c"),
        ]);
        let mut bench = Bench::default();
        let calls = seq.run_until("c", &mut bench, Duration::ZERO, |_| {}).unwrap();
        assert_eq!(calls, 3);
        assert_eq!(bench.ran, vec!["a", "fail", "c"]);
        assert!(!seq.is_halted());
    }

    #[test]
    #[should_panic]
    fn duplicate_step_names_are_rejected() {
        let _seq: Sequencer<Bench, String> = Sequencer::with_steps([ok_step!("a"), ok_step!("a")]);
    }
}
