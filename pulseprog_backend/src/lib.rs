//! Pulse-program text model for the tabletop NMR controller.
//!
//! See [`program`] for the file format and [`params`] for the tunable values it carries.

pub mod error;
pub mod params;
pub mod program;
#[cfg(feature = "python")]
pub mod python;

pub use error::*;
pub use params::*;
pub use program::*;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn pulseprog_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<python::PyPulseFile>()?;
    Ok(())
}
