//! Wire protocol of the acquisition microcontroller.
//!
//! The host drives the device with single-byte commands ([`Command`]). The device answers
//! commands with a text line and streams ADC data as binary frames:
//!
//! ```text
//! "DAT\n" | count: i32 LE | count x sample: i16 LE
//! ```
//!
//! Any other text line is informational. [`DeviceSession`] owns the open link and provides
//! the line and little-endian primitives the steps and the acquisition reader are built on.

use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::transport::Transport;

/// Text line announcing an ADC data frame
pub const DATA_HEADER: &str = "DAT";

/// Largest sample count accepted in a frame header; larger counts mean the stream is out of sync.
pub const MAX_FRAME_SAMPLES: usize = 1 << 20;

/// Granularity of the busy-wait while bytes are still in flight
const BYTE_POLL: Duration = Duration::from_millis(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Start the uploaded pulse program
    Go = 9,
    /// Readiness check; device answers with a text line
    Query = 14,
}

impl Command {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// An open connection to the device.
///
/// There is a single owner at any time; the link is closed when the session is dropped.
pub struct DeviceSession {
    transport: Box<dyn Transport>,
}

impl DeviceSession {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn send(&mut self, cmd: Command) -> Result<()> {
        log::debug!("-> {:?} ({})", cmd, cmd.code());
        self.transport.write_all(&[cmd.code()])?;
        self.transport.flush()
    }

    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.transport.write_all(data)
    }

    pub fn flush(&mut self) -> Result<()> {
        self.transport.flush()
    }

    pub fn available(&mut self) -> Result<usize> {
        self.transport.available()
    }

    pub fn clear_input(&mut self) -> Result<()> {
        self.transport.clear_input()
    }

    /// Reads up to and excluding `\n`.
    ///
    /// Returns whatever arrived (possibly nothing) if no byte shows up for `timeout`.
    /// The line is decoded lossily and trimmed.
    pub fn read_line(&mut self, timeout: Duration) -> Result<String> {
        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        let mut last_byte = Instant::now();
        loop {
            if self.transport.read(&mut byte)? == 1 {
                if byte[0] == b'\n' {
                    break;
                }
                line.push(byte[0]);
                last_byte = Instant::now();
            } else if last_byte.elapsed() > timeout {
                break;
            } else {
                thread::sleep(BYTE_POLL);
            }
        }
        Ok(String::from_utf8_lossy(&line).trim().to_string())
    }

    /// Fills `buf` completely.
    ///
    /// # Errors
    ///
    /// [`Error::Protocol`] if the device goes quiet for `timeout` before `buf` is full.
    pub fn read_exact(&mut self, buf: &mut [u8], timeout: Duration) -> Result<()> {
        let mut filled = 0;
        let mut last_byte = Instant::now();
        while filled < buf.len() {
            let n = self.transport.read(&mut buf[filled..])?;
            if n > 0 {
                filled += n;
                last_byte = Instant::now();
            } else if last_byte.elapsed() > timeout {
                return Err(Error::Protocol(format!(
                    "frame truncated: got {} of {} bytes before the line went quiet",
                    filled,
                    buf.len()
                )));
            } else {
                thread::sleep(BYTE_POLL);
            }
        }
        Ok(())
    }

    pub fn read_i32_le(&mut self, timeout: Duration) -> Result<i32> {
        let mut raw = [0u8; 4];
        self.read_exact(&mut raw, timeout)?;
        Ok(i32::from_le_bytes(raw))
    }

    /// Reads the payload of a data frame whose header line was already consumed.
    ///
    /// # Errors
    ///
    /// [`Error::Decode`] for a negative sample count or one above [`MAX_FRAME_SAMPLES`],
    /// [`Error::Protocol`] for a short frame.
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Vec<i16>> {
        let count = self.read_i32_le(timeout)?;
        let count = usize::try_from(count)
            .map_err(|_| Error::Decode(format!("negative sample count {}", count)))?;
        if count > MAX_FRAME_SAMPLES {
            return Err(Error::Decode(format!(
                "sample count {} exceeds frame limit {}",
                count, MAX_FRAME_SAMPLES
            )));
        }
        let mut raw = vec![0u8; count * 2];
        self.read_exact(&mut raw, timeout)?;
        Ok(raw
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect())
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        log::info!("Serial connection closed");
    }
}

/// Encodes one data frame as the device sends it.
pub fn encode_frame(samples: &[i16]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(DATA_HEADER.len() + 1 + 4 + samples.len() * 2);
    frame.extend_from_slice(DATA_HEADER.as_bytes());
    frame.push(b'\n');
    frame.extend_from_slice(&(samples.len() as i32).to_le_bytes());
    for sample in samples {
        frame.extend_from_slice(&sample.to_le_bytes());
    }
    frame
}

#[cfg(test)]
mod test {
    use crate::protocol::*;
    use crate::transport::{Connector, MockTransport};

    const QUICK: Duration = Duration::from_millis(20);

    fn session(mock: &MockTransport) -> DeviceSession {
        DeviceSession::new(mock.open().unwrap())
    }

    #[test]
    fn send_writes_single_byte_codes() {
        let mock = MockTransport::new();
        let mut session = session(&mock);
        session.send(Command::Query).unwrap();
        session.send(Command::Go).unwrap();
        assert_eq!(mock.get_written(), vec![14, 9]);
    }

    #[test]
    fn read_line_strips_and_times_out() {
        let mock = MockTransport::new();
        let mut session = session(&mock);
        mock.inject_read(b"READY\r\npartial");
        assert_eq!(session.read_line(QUICK).unwrap(), "READY");
        assert_eq!(session.read_line(QUICK).unwrap(), "partial");
        assert_eq!(session.read_line(QUICK).unwrap(), "");
    }

    #[test]
    fn frame_payload_decodes_signed_samples() {
        let mock = MockTransport::new();
        let mut session = session(&mock);
        let frame = encode_frame(&[1, -2, 3]);
        mock.inject_read(&frame[DATA_HEADER.len() + 1..]);
        assert_eq!(session.read_frame(QUICK).unwrap(), vec![1, -2, 3]);
    }

    #[test]
    fn negative_count_is_decode_error() {
        let mock = MockTransport::new();
        let mut session = session(&mock);
        mock.inject_read(&(-5i32).to_le_bytes());
        assert!(matches!(session.read_frame(QUICK), Err(Error::Decode(_))));
    }

    #[test]
    fn text_in_place_of_count_is_decode_error() {
        let mock = MockTransport::new();
        let mut session = session(&mock);
        // "hell" read as a little-endian count is well above the limit
        mock.inject_read(b"hello world\n");
        assert!(matches!(session.read_frame(QUICK), Err(Error::Decode(_))));

        let mock = MockTransport::new();
        let mut session = self::session(&mock);
        mock.inject_read(&((MAX_FRAME_SAMPLES + 1) as i32).to_le_bytes());
        assert!(matches!(session.read_frame(QUICK), Err(Error::Decode(_))));
    }

    #[test]
    fn short_frame_is_protocol_error() {
        let mock = MockTransport::new();
        let mut session = session(&mock);
        mock.inject_read(&3i32.to_le_bytes());
        mock.inject_read(&1i16.to_le_bytes());
        assert!(matches!(session.read_frame(QUICK), Err(Error::Protocol(_))));
    }

    #[test]
    fn dropping_session_closes_it() {
        let mock = MockTransport::new();
        let session = session(&mock);
        assert_eq!(mock.open_sessions(), 1);
        drop(session);
        assert_eq!(mock.open_sessions(), 0);
    }
}
