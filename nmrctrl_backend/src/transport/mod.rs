//! Transport layer between the controller and the microcontroller

use crate::error::Result;

pub mod mock;
mod serial;
pub use mock::MockTransport;
pub use serial::{SerialConnector, SerialTransport};

/// Byte-level link to the device
pub trait Transport: Send {
    /// Read available data into buffer, returns number of bytes read (0 if none arrived in time)
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write all of `data`
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Flush pending writes (blocking until complete)
    fn flush(&mut self) -> Result<()>;

    /// Number of bytes waiting to be read
    fn available(&mut self) -> Result<usize>;

    /// Discard anything waiting in the input buffer
    fn clear_input(&mut self) -> Result<()>;
}

/// Opens device sessions. Owned by the experiment so that a session can be (re)opened by
/// the setup step and after every reset.
pub trait Connector: Send {
    fn open(&self) -> Result<Box<dyn Transport>>;

    /// Short description for status messages (e.g. the port name)
    fn describe(&self) -> String;
}
