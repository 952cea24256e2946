//! # Tabletop NMR control backend
//!
//! Drives a microcontroller-based NMR spectrometer over a serial link: compiles and uploads the
//! pulse program, starts it, collects ADC frames and computes a spectrum preview.
//!
//! - [`sequencer`]: ordered named steps with halt-on-failure semantics
//! - [`experiment`]: the seven acquisition steps and their shared state
//! - [`acquisition`]: the serial frame reader
//! - [`controller`]: runs an experiment on a worker thread, reports through [`Event`]s
//!
//! The pulse program text model lives in the companion `pulseprog_backend` crate.

pub mod acquisition;
pub mod config;
pub mod controller;
pub mod error;
pub mod experiment;
pub mod protocol;
#[cfg(feature = "python")]
pub mod python;
pub mod sequencer;
pub mod toolchain;
pub mod transport;
pub mod utils;
pub mod visualize;
pub mod worker_cmd_chan;

pub use crate::config::ExperimentConfig;
pub use crate::controller::{Controller, StopHandle};
pub use crate::error::{Error, Result};
pub use crate::experiment::{step_index, Event, Experiment, START_STEP, STEP_NAMES};
pub use crate::toolchain::{ExternalToolchain, Toolchain};
pub use crate::transport::{Connector, MockTransport, SerialConnector};

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn nmrctrl_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    pyo3_log::init();
    m.add_class::<python::PyExperiment>()?;
    m.add_class::<pulseprog_backend::python::PyPulseFile>()?;
    Ok(())
}
