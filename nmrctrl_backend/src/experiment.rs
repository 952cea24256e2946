//! # Tabletop NMR experiment
//!
//! This module wires the generic [`Sequencer`] to the concrete acquisition workflow. An
//! [`Experiment`] owns a single [`ExperimentState`] (configuration, toolchain, device connector,
//! the open [`DeviceSession`] if any, and the acquisition buffer) and the seven steps that act on it:
//!
//! | # | step                                   | policy      |
//! |---|----------------------------------------|-------------|
//! | 0 | `step_compile_command_list`            | required    |
//! | 1 | `step_setup_serial_connection`         | required    |
//! | 2 | `step_check_device_readiness`          | required    |
//! | 3 | `step_transfer_compiled_program`       | required    |
//! | 4 | `step_start_experiment`                | required    |
//! | 5 | `step_data_acquisition_and_processing` | required    |
//! | 6 | `step_visualize_results`               | best effort |
//!
//! ## Events
//!
//! Progress is published as [`Event`]s on a `crossbeam` channel: a status line per step, every
//! acquired frame as it arrives, the plot data of the last step, and a halt notice when a required
//! step fails. The presentation layer only ever sees these events.
//!
//! ## Cancellation
//!
//! The state holds the receiving end of the worker command mailbox. Delays between automatic
//! steps and the acquisition loop both watch it, so a `Stop` request ends either promptly.
//!
//! ## Device session
//!
//! The setup step opens the session through the [`Connector`]. Opening while a session is still
//! open closes the old one first. The acquisition step moves the session into
//! [`acquisition::acquire`](crate::acquisition::acquire), which closes it on return; a reset
//! closes it as well.

use std::time::Duration;

use crossbeam::channel::Sender;
use pulseprog_backend::PulseFile;

use crate::acquisition::{acquire, AcquisitionBuffer, AcquisitionSettings};
use crate::config::ExperimentConfig;
use crate::error::{Error, Result};
use crate::protocol::{Command, DeviceSession};
use crate::sequencer::{Advance, SequenceContext, Sequencer, Step, StepOutcome};
use crate::toolchain::Toolchain;
use crate::transport::Connector;
use crate::utils::TickTimer;
use crate::visualize::{load_samples, visualize, VisualizationResult};
use crate::worker_cmd_chan::{CmdRecvr, WorkerCmd};

pub const STEP_NAMES: [&str; 7] = [
    "step_compile_command_list",
    "step_setup_serial_connection",
    "step_check_device_readiness",
    "step_transfer_compiled_program",
    "step_start_experiment",
    "step_data_acquisition_and_processing",
    "step_visualize_results",
];

/// Last step of a "run": everything up to and including starting the pulse program
pub const START_STEP: &str = "step_start_experiment";

/// Position of a declared step, `None` if there is no such step.
pub fn step_index(name: &str) -> Option<usize> {
    STEP_NAMES.iter().position(|&n| n == name)
}

/// Notifications from the experiment to the presentation layer
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// Human-readable progress line
    Status(String),
    /// One frame of samples, in arrival order
    SamplesReady(Vec<i16>),
    /// Result of the visualization step
    Plots(VisualizationResult),
    /// A required step failed; nothing runs until reset
    Halted(String),
    /// The worker finished the last request and waits for the next one
    Idle,
}

/// Value returned by a step
#[derive(Clone, Debug, PartialEq)]
pub enum StepOutput {
    Status(String),
    Plots(VisualizationResult),
}

pub struct ExperimentState {
    config: ExperimentConfig,
    toolchain: Box<dyn Toolchain>,
    connector: Box<dyn Connector>,
    session: Option<DeviceSession>,
    buffer: AcquisitionBuffer,
    cmd: CmdRecvr,
    events: Sender<Event>,
}

impl ExperimentState {
    fn session_mut(&mut self) -> Result<&mut DeviceSession> {
        self.session.as_mut().ok_or(Error::NotConnected)
    }

    fn close_session(&mut self) {
        if self.session.take().is_some() {
            log::info!("Device session released");
        }
    }
}

impl SequenceContext for ExperimentState {
    fn settle(&mut self, delay: Duration) -> bool {
        self.cmd.pause(delay)
    }

    fn on_reset(&mut self) {
        self.close_session();
    }
}

fn step_compile_command_list(s: &mut ExperimentState) -> Result<StepOutput> {
    let files = &s.config.files;
    let program = PulseFile::load(&files.program)?;
    log::debug!("Pulse parameters:\n{}", program.params());
    s.toolchain.compile(&files.program, &files.image)?;
    Ok(StepOutput::Status(format!(
        "Compiled {} to {}",
        files.program.display(),
        files.image.display()
    )))
}

fn step_setup_serial_connection(s: &mut ExperimentState) -> Result<StepOutput> {
    if let Some(old) = s.session.take() {
        log::warn!("A serial connection is already open, closing it first");
        drop(old);
    }
    let transport = s.connector.open()?;
    s.session = Some(DeviceSession::new(transport));
    Ok(StepOutput::Status(format!(
        "Serial connection established on {}",
        s.connector.describe()
    )))
}

fn step_check_device_readiness(s: &mut ExperimentState) -> Result<StepOutput> {
    let settle = s.config.serial.settle();
    let reply_timeout = s.config.serial.reply_timeout();
    let session = s.session.as_mut().ok_or(Error::NotConnected)?;
    session.clear_input()?;
    session.send(Command::Query)?;
    if !s.cmd.pause(settle) {
        return Err(Error::Cancelled("device readiness check".to_string()));
    }
    let reply = session.read_line(reply_timeout)?;
    Ok(StepOutput::Status(if reply.is_empty() {
        "No response from device".to_string()
    } else {
        format!("Device response: {}", reply)
    }))
}

fn step_transfer_compiled_program(s: &mut ExperimentState) -> Result<StepOutput> {
    let session = s.session.as_mut().ok_or(Error::NotConnected)?;
    s.toolchain.upload(&s.config.files.image, session)?;
    Ok(StepOutput::Status(format!(
        "Transferred {} to the device",
        s.config.files.image.display()
    )))
}

fn step_start_experiment(s: &mut ExperimentState) -> Result<StepOutput> {
    let reply_timeout = s.config.serial.reply_timeout();
    let session = s.session_mut()?;
    session.send(Command::Go)?;
    let reply = session.read_line(reply_timeout)?;
    Ok(StepOutput::Status(if reply.is_empty() {
        "Experiment started".to_string()
    } else {
        format!("Experiment started: {}", reply)
    }))
}

fn step_data_acquisition_and_processing(s: &mut ExperimentState) -> Result<StepOutput> {
    let session = s.session.take().ok_or(Error::NotConnected)?;
    let settings = AcquisitionSettings::new(&s.config.acquisition, &s.config.files.data);
    let events = s.events.clone();
    let report = acquire(session, &mut s.buffer, &settings, &mut s.cmd, |frame| {
        // A missing listener does not stop the acquisition
        let _ = events.send(Event::SamplesReady(frame.to_vec()));
    })?;
    Ok(StepOutput::Status(report.to_string()))
}

fn step_visualize_results(s: &mut ExperimentState) -> Result<StepOutput> {
    if s.buffer.is_empty() {
        return Err(Error::NoData("the last acquisition collected no samples".to_string()));
    }
    let samples = load_samples(&s.config.files.data)?;
    let result = visualize(&samples, s.config.acquisition.sample_rate_hz)?;
    Ok(StepOutput::Plots(result))
}

fn steps() -> [Step<ExperimentState, StepOutput>; 7] {
    [
        Step::required(STEP_NAMES[0], step_compile_command_list),
        Step::required(STEP_NAMES[1], step_setup_serial_connection),
        Step::required(STEP_NAMES[2], step_check_device_readiness),
        Step::required(STEP_NAMES[3], step_transfer_compiled_program),
        Step::required(STEP_NAMES[4], step_start_experiment),
        Step::required(STEP_NAMES[5], step_data_acquisition_and_processing),
        Step::best_effort(STEP_NAMES[6], step_visualize_results),
    ]
}

/// Turns one advance into events for the presentation layer.
fn publish(events: &Sender<Event>, adv: Advance<StepOutput>) {
    let emit = |event| {
        let _ = events.send(event);
    };
    match adv {
        Advance::Ran { outcome, name, .. } => match outcome {
            StepOutcome::Success(StepOutput::Status(msg)) => emit(Event::Status(msg)),
            StepOutcome::Success(StepOutput::Plots(result)) => {
                emit(Event::Status(result.summary()));
                emit(Event::Plots(result));
            }
            StepOutcome::Recoverable(err) => {
                emit(Event::Status(format!("Step {} failed: {}", name, err)))
            }
            StepOutcome::Fatal(err) => emit(Event::Halted(format!("Step {} failed: {}", name, err))),
        },
        Advance::Exhausted => emit(Event::Status("No further steps".to_string())),
        Advance::Halted { name, .. } => emit(Event::Halted(format!(
            "Sequence halted at {}, reset to continue",
            name
        ))),
    }
}

pub struct Experiment {
    sequencer: Sequencer<ExperimentState, StepOutput>,
    state: ExperimentState,
}

impl Experiment {
    /// Builds the seven-step experiment.
    ///
    /// `cmd` is watched during delays and acquisition; `events` receives progress.
    pub fn new(
        config: ExperimentConfig,
        toolchain: Box<dyn Toolchain>,
        connector: Box<dyn Connector>,
        cmd: CmdRecvr,
        events: Sender<Event>,
    ) -> Self {
        Self {
            sequencer: Sequencer::with_steps(steps()),
            state: ExperimentState {
                config,
                toolchain,
                connector,
                session: None,
                buffer: AcquisitionBuffer::new(),
                cmd,
                events,
            },
        }
    }

    /// Runs the next step and publishes its outcome. Returns `false` if an automatic run should
    /// not continue (halted, exhausted or a required step failed).
    pub fn advance(&mut self) -> bool {
        let mut timer = TickTimer::new();
        let adv = self.sequencer.advance(&mut self.state);
        if let Advance::Ran { name, .. } = &adv {
            timer.tick_log(name);
        }
        let ends_run = adv.ends_run();
        publish(&self.state.events, adv);
        !ends_run
    }

    /// Advances until step `name` has run, waiting the configured step delay between steps.
    pub fn run_until(&mut self, name: &str) -> Result<usize> {
        let events = self.state.events.clone();
        let delay = self.state.config.sequence.step_delay();
        self.sequencer
            .run_until(name, &mut self.state, delay, |adv| publish(&events, adv))
    }

    /// Reset, then run the preparation steps up to and including [`START_STEP`].
    pub fn run_preparation(&mut self) -> Result<usize> {
        self.reset();
        self.run_until(START_STEP)
    }

    /// Reset, then run every step.
    pub fn run_all(&mut self) -> Result<usize> {
        self.reset();
        self.run_until(STEP_NAMES[STEP_NAMES.len() - 1])
    }

    /// Rewinds to the first step and closes the device session if open.
    pub fn reset(&mut self) {
        self.sequencer.reset(&mut self.state);
    }

    pub fn current_index(&self) -> usize {
        self.sequencer.current_index()
    }

    pub fn is_halted(&self) -> bool {
        self.sequencer.is_halted()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.sequencer.index_of(name)
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.sequencer.step_names()
    }

    pub fn is_connected(&self) -> bool {
        self.state.session.is_some()
    }

    pub fn buffer(&self) -> &AcquisitionBuffer {
        &self.state.buffer
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.state.config
    }

    pub fn emit(&self, event: Event) {
        let _ = self.state.events.send(event);
    }

    /// Blocks until the next worker command arrives.
    pub fn next_command(&mut self) -> WorkerCmd {
        self.state.cmd.recv()
    }

    /// Whether a close command has been seen, possibly while a step was running
    pub fn is_closed(&self) -> bool {
        self.state.cmd.is_closed()
    }
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::path::Path;
    use std::thread;
    use std::time::{Duration, Instant};

    use crossbeam::channel::{unbounded, Receiver};

    use crate::experiment::*;
    use crate::transport::MockTransport;
    use crate::worker_cmd_chan::{CmdChan, WorkerCmd};

    struct CopyToolchain;

    impl Toolchain for CopyToolchain {
        fn compile(&self, source: &Path, image: &Path) -> Result<()> {
            fs::copy(source, image)?;
            Ok(())
        }

        fn upload(&self, image: &Path, session: &mut DeviceSession) -> Result<()> {
            session.write_all(&fs::read(image)?)?;
            session.flush()
        }
    }

    fn setup(dir: &Path) -> (Experiment, MockTransport, Receiver<Event>) {
        setup_with(dir, &CmdChan::new())
    }

    fn setup_with(dir: &Path, chan: &CmdChan) -> (Experiment, MockTransport, Receiver<Event>) {
        let mut config = ExperimentConfig::default();
        config.files.program = dir.join("pulse_program.txt");
        config.files.image = dir.join("output.bin");
        config.files.data = dir.join("adc_data.npy");
        config.serial.settle_ms = 0;
        config.serial.reply_timeout_ms = 20;
        config.sequence.step_delay_ms = 0;
        fs::write(&config.files.program, "PULSE_PROGRAM\n%frequency = 1000\n").unwrap();

        let mock = MockTransport::new();
        let (tx, rx) = unbounded();
        let exp = Experiment::new(
            config,
            Box::new(CopyToolchain),
            Box::new(mock.clone()),
            chan.new_recvr(),
            tx,
        );
        (exp, mock, rx)
    }

    #[test]
    fn step_names_are_declared_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (exp, _, _) = setup(dir.path());
        assert_eq!(exp.step_names(), STEP_NAMES.to_vec());
        assert_eq!(step_index("step_start_experiment"), Some(4));
        assert_eq!(exp.index_of("step_visualize_results"), Some(6));
        assert_eq!(step_index("step_bake_cake"), None);
    }

    #[test]
    fn readiness_and_start_write_single_command_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (mut exp, mock, rx) = setup(dir.path());
        mock.reply_to(14, b"READY\n");
        mock.reply_to(9, b"GO\n");

        assert_eq!(exp.run_until("step_check_device_readiness").unwrap(), 3);
        assert_eq!(mock.get_written(), vec![14]);
        let statuses: Vec<Event> = rx.try_iter().collect();
        assert_eq!(
            statuses.last(),
            Some(&Event::Status("Device response: READY".to_string()))
        );

        // Upload streams the compiled image, then GO is a single byte
        exp.advance();
        mock.clear_written();
        exp.advance();
        assert_eq!(mock.get_written(), vec![9]);
        assert_eq!(exp.current_index(), 5);
    }

    #[test]
    fn silent_device_is_reported_not_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut exp, _mock, rx) = setup(dir.path());
        exp.run_until("step_check_device_readiness").unwrap();
        assert!(!exp.is_halted());
        assert_eq!(
            rx.try_iter().last(),
            Some(Event::Status("No response from device".to_string()))
        );
    }

    #[test]
    fn stop_cuts_readiness_settle_short() {
        let dir = tempfile::tempdir().unwrap();
        let chan = CmdChan::new();
        let (mut exp, mock, _rx) = setup_with(dir.path(), &chan);
        exp.state.config.serial.settle_ms = 60_000;
        mock.reply_to(14, b"READY\n");
        step_setup_serial_connection(&mut exp.state).unwrap();

        let stopper = chan.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            stopper.send(WorkerCmd::Stop);
        });
        let start = Instant::now();
        let result = step_check_device_readiness(&mut exp.state);
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert_eq!(mock.get_written(), vec![14]);
    }

    #[test]
    fn visualization_ignores_data_file_when_run_was_empty() {
        let dir = tempfile::tempdir().unwrap();
        let (mut exp, _mock, _rx) = setup(dir.path());
        let mut earlier = AcquisitionBuffer::new();
        earlier.extend(&[111, 222, 333]);
        earlier.persist(&exp.config().files.data).unwrap();

        assert!(matches!(
            step_visualize_results(&mut exp.state),
            Err(Error::NoData(_))
        ));

        exp.state.buffer = earlier;
        match step_visualize_results(&mut exp.state).unwrap() {
            StepOutput::Plots(result) => assert_eq!(result.plots[0].y, vec![111.0, 222.0, 333.0]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn missing_program_halts_at_compile() {
        let dir = tempfile::tempdir().unwrap();
        let (mut exp, _mock, rx) = setup(dir.path());
        fs::remove_file(&exp.config().files.program).unwrap();
        assert!(!exp.advance());
        assert!(exp.is_halted());
        assert_eq!(exp.current_index(), 0);
        assert!(matches!(rx.try_recv(), Ok(Event::Halted(_))));

        assert!(!exp.advance());
        assert!(matches!(rx.try_recv(), Ok(Event::Halted(_))));
    }

    #[test]
    fn second_setup_replaces_session() {
        let dir = tempfile::tempdir().unwrap();
        let (mut exp, mock, _rx) = setup(dir.path());
        exp.advance();
        exp.advance();
        assert_eq!(mock.open_sessions(), 1);

        let mut extra = Sequencer::with_steps([Step::required(
            "again",
            step_setup_serial_connection,
        )]);
        extra.advance(&mut exp.state);
        assert_eq!(mock.open_sessions(), 1);
        assert!(exp.is_connected());

        exp.reset();
        assert_eq!(mock.open_sessions(), 0);
        assert!(!exp.is_connected());
    }

    #[test]
    fn steps_without_session_fail_not_connected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut exp, _mock, _rx) = setup(dir.path());
        for run in [
            step_check_device_readiness,
            step_transfer_compiled_program,
            step_start_experiment,
            step_data_acquisition_and_processing,
        ] {
            assert!(matches!(run(&mut exp.state), Err(Error::NotConnected)));
        }
    }

    #[test]
    fn unknown_target_is_error_and_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut exp, mock, rx) = setup(dir.path());
        assert!(matches!(
            exp.run_until("step_nothing"),
            Err(Error::StepNotFound { .. })
        ));
        assert_eq!(exp.current_index(), 0);
        assert_eq!(mock.open_sessions(), 0);
        assert!(rx.try_recv().is_err());
    }
}
