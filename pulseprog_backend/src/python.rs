//! Python view of [`PulseFile`] for the desktop front end.

use pyo3::exceptions::{PyIOError, PyKeyError, PyValueError};
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::error::ProgramError;
use crate::params::*;
use crate::program::*;

impl From<ProgramError> for PyErr {
    fn from(err: ProgramError) -> Self {
        match &err {
            ProgramError::Io { .. } => PyIOError::new_err(err.to_string()),
            ProgramError::Empty(_) | ProgramError::MissingHeader(_) => {
                PyValueError::new_err(err.to_string())
            }
            ProgramError::UnknownParameter(_) => PyKeyError::new_err(err.to_string()),
        }
    }
}

fn value_to_py(py: Python<'_>, value: &ParamValue) -> PyObject {
    match value {
        ParamValue::Int(v) => v.into_py(py),
        ParamValue::Float(v) => v.into_py(py),
        ParamValue::Text(v) => v.into_py(py),
    }
}

#[pyclass(name = "PulseFile")]
pub struct PyPulseFile {
    inner: PulseFile,
}

#[pymethods]
impl PyPulseFile {
    #[new]
    fn new(path: &str) -> PyResult<Self> {
        Ok(Self {
            inner: PulseFile::load(path)?,
        })
    }

    #[getter]
    fn path(&self) -> String {
        self.inner.path().display().to_string()
    }

    #[getter]
    fn content(&self) -> &str {
        self.inner.content()
    }

    /// Parameters as `{file_key: value}`
    fn parameters(&self, py: Python<'_>) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        for (key, value) in self.inner.params().iter() {
            dict.set_item(key.file_key(), value_to_py(py, value))?;
        }
        Ok(dict.into())
    }

    /// Parameters as `{label: value}` for input forms
    fn labelled_parameters(&self, py: Python<'_>) -> PyResult<PyObject> {
        let dict = PyDict::new(py);
        for (key, value) in self.inner.params().iter() {
            dict.set_item(key.label(), value_to_py(py, value))?;
        }
        Ok(dict.into())
    }

    fn set_parameter(&mut self, key: &str, value: &PyAny) -> PyResult<()> {
        let value = if let Ok(v) = value.extract::<i64>() {
            ParamValue::Int(v)
        } else if let Ok(v) = value.extract::<f64>() {
            ParamValue::Float(v)
        } else {
            ParamValue::Text(value.str()?.to_string())
        };
        self.inner.set_param(key, value)?;
        Ok(())
    }

    fn pulses(&self) -> (Vec<u32>, Vec<u32>, Vec<u32>) {
        let params = self.inner.params();
        (
            params.first_pulse.to_vec(),
            params.second_pulse.to_vec(),
            params.read_data.to_vec(),
        )
    }

    fn set_pulses(&mut self, first_pulse: [u32; 3], second_pulse: [u32; 3], read_data: [u32; 3]) {
        let params = self.inner.params_();
        params.first_pulse = first_pulse;
        params.second_pulse = second_pulse;
        params.read_data = read_data;
    }

    fn reset(&mut self) {
        self.inner.params_().reset();
    }

    fn rendered(&self) -> String {
        self.inner.rendered()
    }

    #[pyo3(signature = (path = DEFAULT_PROGRAM_FILE))]
    fn save_as(&mut self, path: &str) -> PyResult<()> {
        self.inner.save_as(path)?;
        Ok(())
    }
}
