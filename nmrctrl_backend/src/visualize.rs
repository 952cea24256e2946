//! Summary statistics and magnitude spectrum of a persisted acquisition.
//!
//! Produces plain plot descriptors; rendering is left to the front end.

use std::path::Path;

use ndarray::Array1;
use ndarray_npy::read_npy;
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::{Error, Result};

/// One line plot: `y` over `x` with labels
#[derive(Clone, Debug, PartialEq)]
pub struct PlotData {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
    pub title: String,
    pub xlabel: String,
    pub ylabel: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleStats {
    pub min: i16,
    pub max: i16,
    pub mean: f64,
}

/// Output of the visualization step: raw trace, spectrum and a text summary
#[derive(Clone, Debug, PartialEq)]
pub struct VisualizationResult {
    pub plots: Vec<PlotData>,
    pub stats: SampleStats,
}

impl VisualizationResult {
    /// Three text lines; the mean always carries a decimal point.
    pub fn summary(&self) -> String {
        let mean = self.stats.mean;
        let mean = if mean.fract() == 0.0 {
            format!("{:.1}", mean)
        } else {
            mean.to_string()
        };
        format!(
            "Min Value: {}\nMax Value: {}\nMean Value: {}",
            self.stats.min, self.stats.max, mean
        )
    }
}

pub fn load_samples(path: &Path) -> Result<Vec<i16>> {
    if !path.exists() {
        return Err(Error::NoData(format!("{} does not exist", path.display())));
    }
    let array: Array1<i16> = read_npy(path)?;
    Ok(array.to_vec())
}

pub fn stats(samples: &[i16]) -> Option<SampleStats> {
    let min = *samples.iter().min()?;
    let max = *samples.iter().max()?;
    let mean = Array1::from_iter(samples.iter().map(|&s| s as f64)).mean()?;
    Some(SampleStats { min, max, mean })
}

/// DFT magnitude of the first `N/2` bins and their frequencies at `sample_rate`.
pub fn magnitude_spectrum(samples: &[i16], sample_rate: f64) -> (Vec<f64>, Vec<f64>) {
    let n = samples.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let mut bins: Vec<Complex<f64>> = samples
        .iter()
        .map(|&s| Complex::new(s as f64, 0.0))
        .collect();
    FftPlanner::<f64>::new().plan_fft_forward(n).process(&mut bins);

    let half = n / 2;
    let freqs = (0..half).map(|k| k as f64 * sample_rate / n as f64).collect();
    let mags = bins[..half].iter().map(|c| c.norm()).collect();
    (freqs, mags)
}

pub fn visualize(samples: &[i16], sample_rate: f64) -> Result<VisualizationResult> {
    let stats = stats(samples).ok_or_else(|| Error::NoData("buffer is empty".to_string()))?;
    let (freqs, mags) = magnitude_spectrum(samples, sample_rate);

    let trace = PlotData {
        x: (0..samples.len()).map(|i| i as f64).collect(),
        y: samples.iter().map(|&s| s as f64).collect(),
        title: "ADC Data".to_string(),
        xlabel: "Measurement No.".to_string(),
        ylabel: "ADC Value".to_string(),
    };
    let spectrum = PlotData {
        x: freqs,
        y: mags,
        title: "Frequency Spectrum".to_string(),
        xlabel: "Frequency (Hz)".to_string(),
        ylabel: "Amplitude".to_string(),
    };
    Ok(VisualizationResult {
        plots: vec![trace, spectrum],
        stats,
    })
}
