//! # ADC acquisition over the serial link
//!
//! After the device received `GO` it streams data frames (see [`crate::protocol`]).
//! [`acquire`] collects them into an [`AcquisitionBuffer`] until one of two things happens:
//!
//! - **Inactivity**: no byte arrived for the configured timeout. This is how a run normally
//!   ends, the device simply stops talking.
//! - **Cancellation**: the controller posted [`WorkerCmd::Stop`] or [`WorkerCmd::Close`].
//!
//! Both are normal terminations: whatever was collected is persisted to a `.npy` file, and a run
//! that collected nothing removes the file left by a previous run. Protocol
//! or I/O errors abort the run without persisting. The [`DeviceSession`] is moved into
//! [`acquire`] and is therefore closed on every exit path.
//!
//! The loop runs on the controller worker thread. Each completed frame is handed to a callback
//! so the presentation layer can update while the run is in progress.

use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ndarray::Array1;
use ndarray_npy::write_npy;

use crate::config::AcquisitionConfig;
use crate::error::Result;
use crate::protocol::{DeviceSession, DATA_HEADER};
use crate::worker_cmd_chan::{CmdRecvr, WorkerCmd};

/// Samples of one run, in arrival order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AcquisitionBuffer {
    samples: Vec<i16>,
}

impl AcquisitionBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn extend(&mut self, frame: &[i16]) {
        self.samples.extend_from_slice(frame);
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Writes the samples as a one-dimensional `<i2` NumPy array, replacing `path`.
    pub fn persist(&self, path: &Path) -> Result<()> {
        let array = Array1::from(self.samples.clone());
        write_npy(path, &array)?;
        log::info!("Saved {} samples to {}", self.len(), path.display());
        Ok(())
    }
}

/// Loop timing and output location
#[derive(Clone, Debug)]
pub struct AcquisitionSettings {
    pub inactivity_timeout: Duration,
    pub poll_interval: Duration,
    pub output: PathBuf,
}

impl AcquisitionSettings {
    pub fn new(config: &AcquisitionConfig, output: impl Into<PathBuf>) -> Self {
        Self {
            inactivity_timeout: config.inactivity_timeout(),
            poll_interval: config.poll_interval(),
            output: output.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// Device went quiet for the inactivity timeout
    Inactivity,
    /// Stop or close requested by the controller
    Cancelled,
}

/// Outcome of a completed run
#[derive(Clone, Debug, PartialEq)]
pub struct AcquisitionReport {
    pub frames: usize,
    pub samples: usize,
    pub reason: StopReason,
    /// File written, `None` if nothing was collected
    pub persisted: Option<PathBuf>,
}

impl fmt::Display for AcquisitionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self.reason {
            StopReason::Inactivity => "device went quiet",
            StopReason::Cancelled => "stopped on request",
        };
        match &self.persisted {
            Some(path) => write!(
                f,
                "Acquisition finished ({}): {} samples in {} frame(s) saved to {}. Serial connection closed.",
                reason,
                self.samples,
                self.frames,
                path.display()
            ),
            None => write!(
                f,
                "Acquisition finished ({}): no ADC data to save. Serial connection closed.",
                reason
            ),
        }
    }
}

/// Removes the output of an earlier run so it cannot pass for this one.
fn discard_stale(output: &Path) -> Result<()> {
    match fs::remove_file(output) {
        Ok(()) => {
            log::info!("Removed stale {}", output.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn interrupted(cmd: Option<WorkerCmd>) -> bool {
    match cmd {
        Some(cmd) if cmd.interrupts() => true,
        Some(cmd) => {
            log::warn!("Acquisition running, ignoring {:?}", cmd);
            false
        }
        None => false,
    }
}

/// Runs the acquisition loop on the calling thread.
///
/// `buffer` is cleared first. `on_frame` is called with every decoded frame (including empty
/// ones). The session is consumed and closed when this function returns.
pub fn acquire(
    mut session: DeviceSession,
    buffer: &mut AcquisitionBuffer,
    settings: &AcquisitionSettings,
    cmd: &mut CmdRecvr,
    mut on_frame: impl FnMut(&[i16]),
) -> Result<AcquisitionReport> {
    buffer.clear();
    let mut frames = 0;
    let mut last_data = Instant::now();
    log::info!("Acquiring ADC data...");

    let reason = loop {
        if interrupted(cmd.try_recv()) {
            break StopReason::Cancelled;
        }
        if session.available()? > 0 {
            let line = session.read_line(settings.inactivity_timeout)?;
            last_data = Instant::now();
            if line == DATA_HEADER {
                let frame = session.read_frame(settings.inactivity_timeout)?;
                last_data = Instant::now();
                log::debug!("Frame {}: {} samples", frames, frame.len());
                buffer.extend(&frame);
                frames += 1;
                on_frame(&frame);
            } else {
                log::info!("Device: {}", line);
            }
        } else if last_data.elapsed() > settings.inactivity_timeout {
            log::info!("Timeout: no data for {:?}", settings.inactivity_timeout);
            break StopReason::Inactivity;
        } else if interrupted(cmd.recv_timeout(settings.poll_interval)) {
            break StopReason::Cancelled;
        }
    };
    drop(session);

    let persisted = if buffer.is_empty() {
        log::info!("No ADC data to save");
        discard_stale(&settings.output)?;
        None
    } else {
        buffer.persist(&settings.output)?;
        Some(settings.output.clone())
    };
    Ok(AcquisitionReport {
        frames,
        samples: buffer.len(),
        reason,
        persisted,
    })
}

#[cfg(test)]
mod test {
    use std::thread;

    use ndarray_npy::read_npy;

    use crate::acquisition::*;
    use crate::error::Error;
    use crate::protocol::encode_frame;
    use crate::transport::{Connector, MockTransport};
    use crate::worker_cmd_chan::CmdChan;

    fn settings(dir: &Path) -> AcquisitionSettings {
        AcquisitionSettings {
            inactivity_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            output: dir.join("adc_data.npy"),
        }
    }

    fn session(mock: &MockTransport) -> DeviceSession {
        DeviceSession::new(mock.open().unwrap())
    }

    #[test]
    fn single_frame_is_collected_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let mock = MockTransport::new();
        mock.inject_read(&encode_frame(&[1, -2, 3]));

        let chan = CmdChan::new();
        let mut buffer = AcquisitionBuffer::new();
        let mut seen = Vec::new();
        let report = acquire(session(&mock), &mut buffer, &settings, &mut chan.new_recvr(), |f| {
            seen.push(f.to_vec())
        })
        .unwrap();

        assert_eq!(buffer.samples(), &[1, -2, 3]);
        assert_eq!(seen, vec![vec![1, -2, 3]]);
        assert_eq!(report.reason, StopReason::Inactivity);
        assert_eq!(report.frames, 1);
        assert_eq!(report.persisted.as_deref(), Some(settings.output.as_path()));
        let saved: Array1<i16> = read_npy(&settings.output).unwrap();
        assert_eq!(saved.to_vec(), vec![1, -2, 3]);
        assert_eq!(mock.open_sessions(), 0);
    }

    #[test]
    fn empty_frame_and_chatter_are_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let mock = MockTransport::new();
        mock.inject_read(b"Experiment running\n");
        mock.inject_read(&encode_frame(&[]));
        mock.inject_read(&encode_frame(&[7, 8]));

        let chan = CmdChan::new();
        let mut buffer = AcquisitionBuffer::new();
        let report =
            acquire(session(&mock), &mut buffer, &settings, &mut chan.new_recvr(), |_| {}).unwrap();
        assert_eq!(buffer.samples(), &[7, 8]);
        assert_eq!(report.frames, 2);
    }

    #[test]
    fn silence_ends_without_output() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let mock = MockTransport::new();

        let chan = CmdChan::new();
        let mut buffer = AcquisitionBuffer::new();
        buffer.extend(&[42]);
        let report =
            acquire(session(&mock), &mut buffer, &settings, &mut chan.new_recvr(), |_| {}).unwrap();

        // Buffer is cleared at run start, so nothing is left to persist
        assert!(buffer.is_empty());
        assert_eq!(report.persisted, None);
        assert_eq!(report.reason, StopReason::Inactivity);
        assert!(!settings.output.exists());
        assert_eq!(mock.open_sessions(), 0);
    }

    #[test]
    fn silence_removes_previous_output() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let mut earlier = AcquisitionBuffer::new();
        earlier.extend(&[111, 222, 333]);
        earlier.persist(&settings.output).unwrap();

        let mock = MockTransport::new();
        mock.inject_read(b"Acquisition done\n");
        let chan = CmdChan::new();
        let report =
            acquire(session(&mock), &mut earlier, &settings, &mut chan.new_recvr(), |_| {}).unwrap();

        assert_eq!(report.persisted, None);
        assert_eq!(report.frames, 0);
        assert!(!settings.output.exists());
    }

    #[test]
    fn stop_command_ends_run_and_keeps_samples() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = settings(dir.path());
        settings.inactivity_timeout = Duration::from_secs(30);
        let mock = MockTransport::new();
        mock.inject_read(&encode_frame(&[5, 6]));

        let chan = CmdChan::new();
        let mut recvr = chan.new_recvr();
        let stopper = chan.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            stopper.send(WorkerCmd::Stop);
        });

        let start = Instant::now();
        let mut buffer = AcquisitionBuffer::new();
        let report = acquire(session(&mock), &mut buffer, &settings, &mut recvr, |_| {}).unwrap();
        handle.join().unwrap();

        assert!(start.elapsed() < Duration::from_secs(30));
        assert_eq!(report.reason, StopReason::Cancelled);
        assert_eq!(buffer.samples(), &[5, 6]);
        assert!(settings.output.exists());
    }

    #[test]
    fn truncated_frame_fails_and_closes_session() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let mock = MockTransport::new();
        let mut frame = encode_frame(&[1, 2, 3]);
        frame.truncate(frame.len() - 1);
        mock.inject_read(&frame);

        let chan = CmdChan::new();
        let mut buffer = AcquisitionBuffer::new();
        let result = acquire(session(&mock), &mut buffer, &settings, &mut chan.new_recvr(), |_| {});
        assert!(matches!(result, Err(Error::Protocol(_))));
        assert!(!settings.output.exists());
        assert_eq!(mock.open_sessions(), 0);
    }
}
