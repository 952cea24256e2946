//! Python bindings for the desktop front end.
//!
//! The GUI owns an `Experiment`, posts requests to it and polls for events from its timer:
//!
//! ```python
//! from nmrctrl_backend import Experiment
//!
//! exp = Experiment("nmr.toml")
//! exp.request_run()
//! for kind, payload in exp.poll_events(timeout_ms=100):
//!     ...
//! ```

use std::time::Duration;

use numpy::PyArray1;
use pyo3::exceptions::{PyIOError, PyKeyError, PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::ExperimentConfig;
use crate::controller::Controller;
use crate::error::Error;
use crate::experiment::{step_index, Event, STEP_NAMES};
use crate::toolchain::ExternalToolchain;
use crate::transport::SerialConnector;
use crate::visualize::VisualizationResult;

impl From<Error> for PyErr {
    fn from(err: Error) -> Self {
        match &err {
            Error::Serial(_) | Error::Io(_) | Error::NpyWrite(_) | Error::NpyRead(_) => {
                PyIOError::new_err(err.to_string())
            }
            Error::StepNotFound { .. } => PyKeyError::new_err(err.to_string()),
            Error::Protocol(_) | Error::Decode(_) | Error::Config(_) | Error::NoData(_) => {
                PyValueError::new_err(err.to_string())
            }
            Error::Program(_) => PyValueError::new_err(err.to_string()),
            Error::NotConnected | Error::Toolchain(_) | Error::Worker(_) | Error::Cancelled(_) => {
                PyRuntimeError::new_err(err.to_string())
            }
        }
    }
}

fn plots_to_py(py: Python<'_>, result: &VisualizationResult) -> PyResult<PyObject> {
    let plots = result
        .plots
        .iter()
        .map(|plot| {
            let dict = PyDict::new(py);
            dict.set_item("x", PyArray1::from_slice(py, &plot.x))?;
            dict.set_item("y", PyArray1::from_slice(py, &plot.y))?;
            dict.set_item("title", &plot.title)?;
            dict.set_item("xlabel", &plot.xlabel)?;
            dict.set_item("ylabel", &plot.ylabel)?;
            Ok(dict.to_object(py))
        })
        .collect::<PyResult<Vec<PyObject>>>()?;

    let dict = PyDict::new(py);
    dict.set_item("plots", plots)?;
    dict.set_item("summary", result.summary())?;
    dict.set_item("min", result.stats.min)?;
    dict.set_item("max", result.stats.max)?;
    dict.set_item("mean", result.stats.mean)?;
    Ok(dict.into())
}

/// `(kind, payload)` tuple for one event
fn event_to_py(py: Python<'_>, event: Event) -> PyResult<PyObject> {
    Ok(match event {
        Event::Status(msg) => ("status", msg).into_py(py),
        Event::SamplesReady(samples) => {
            ("samples", PyArray1::from_vec(py, samples).to_object(py)).into_py(py)
        }
        Event::Plots(result) => ("plots", plots_to_py(py, &result)?).into_py(py),
        Event::Halted(msg) => ("halted", msg).into_py(py),
        Event::Idle => ("idle", py.None()).into_py(py),
    })
}

#[pyclass(name = "Experiment")]
pub struct PyExperiment {
    ctrl: Option<Controller>,
}

impl PyExperiment {
    fn ctrl(&self) -> PyResult<&Controller> {
        self.ctrl
            .as_ref()
            .ok_or_else(|| PyRuntimeError::new_err("Experiment is closed"))
    }
}

#[pymethods]
impl PyExperiment {
    /// Starts the worker with the configuration at `config_path`, or the defaults.
    #[new]
    #[pyo3(signature = (config_path=None))]
    fn new(config_path: Option<&str>) -> PyResult<Self> {
        let config = match config_path {
            Some(path) => ExperimentConfig::load(path)?,
            None => ExperimentConfig::default(),
        };
        let toolchain = Box::new(ExternalToolchain::new(&config.toolchain));
        let connector = Box::new(SerialConnector::new(&config.serial));
        Ok(Self {
            ctrl: Some(Controller::spawn(config, toolchain, connector)?),
        })
    }

    fn request_run(&self) -> PyResult<()> {
        self.ctrl()?.request_run();
        Ok(())
    }

    fn request_step(&self) -> PyResult<()> {
        self.ctrl()?.request_step();
        Ok(())
    }

    fn request_run_all(&self) -> PyResult<()> {
        self.ctrl()?.request_run_all();
        Ok(())
    }

    fn request_reset(&self) -> PyResult<()> {
        self.ctrl()?.request_reset();
        Ok(())
    }

    fn request_stop(&self) -> PyResult<()> {
        self.ctrl()?.request_stop();
        Ok(())
    }

    /// Drains pending events as `(kind, payload)` tuples.
    ///
    /// With `timeout_ms`, waits up to that long for the first event (GIL released).
    #[pyo3(signature = (timeout_ms=None))]
    fn poll_events(&self, py: Python<'_>, timeout_ms: Option<u64>) -> PyResult<Vec<PyObject>> {
        let events = self.ctrl()?.events();
        let mut pending = Vec::new();
        if let Some(ms) = timeout_ms {
            if let Ok(event) =
                py.allow_threads(|| events.recv_timeout(Duration::from_millis(ms)))
            {
                pending.push(event);
            }
        }
        pending.extend(events.try_iter());
        pending
            .into_iter()
            .map(|event| event_to_py(py, event))
            .collect()
    }

    /// Stops the worker and closes the device. Further requests raise `RuntimeError`.
    fn close(&mut self, py: Python<'_>) -> PyResult<()> {
        if let Some(ctrl) = self.ctrl.take() {
            py.allow_threads(|| ctrl.close())?;
        }
        Ok(())
    }

    #[staticmethod]
    fn step_names() -> Vec<&'static str> {
        STEP_NAMES.to_vec()
    }

    /// Position of a step by name, -1 if unknown
    #[staticmethod]
    fn step_index(name: &str) -> i64 {
        step_index(name).map_or(-1, |i| i as i64)
    }
}
