use crate::error::AnalysisError;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Estimate heart rate from pulse sensor readings
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// JSON/CSV file with readings, or a directory of such files
    #[arg(help = "JSON/CSV file with readings, or a directory of such files")]
    pub input_path: PathBuf,

    /// Treat the input as CSV regardless of its extension
    #[arg(long)]
    pub csv_input: bool,

    /// IQR multiplier for the outlier bounds (Q1 - f*IQR, Q3 + f*IQR)
    #[arg(long, default_value = "1.5")]
    pub outlier_factor: f64,

    /// Window size (samples) of the moving average
    #[arg(long, default_value = "3")]
    pub smoothing_window: usize,

    /// Sampling rate of the readings in frames per second
    #[arg(long, default_value = "60.0")]
    pub frame_rate: f64,

    /// Smallest wavelet width used by the peak detector
    #[arg(long, default_value = "1")]
    pub min_scale: usize,

    /// Largest wavelet width used by the peak detector (inclusive)
    #[arg(long, default_value = "30")]
    pub max_scale: usize,

    /// Write the JSON result to this file instead of stdout
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// CSV output file prefix for the smoothed series (e.g. /path/to/output/prefix)
    #[arg(long)]
    pub csv_output: Option<String>,
}

/// Fixed parameters of the heart beat pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub outlier_factor: f64,
    pub smoothing_window: usize,
    pub frame_rate: f64,
    pub wavelet_scales: Vec<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            outlier_factor: 1.5,
            smoothing_window: 3,
            frame_rate: 60.0,
            wavelet_scales: (1..=30).collect(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.outlier_factor.is_finite() || self.outlier_factor < 0.0 {
            return Err(AnalysisError::invalid(format!(
                "outlier factor must be a non-negative number, got {}",
                self.outlier_factor
            )));
        }
        if self.smoothing_window == 0 {
            return Err(AnalysisError::invalid("smoothing window must be positive"));
        }
        if !self.frame_rate.is_finite() || self.frame_rate <= 0.0 {
            return Err(AnalysisError::invalid(format!(
                "frame rate must be positive, got {}",
                self.frame_rate
            )));
        }
        if self.wavelet_scales.is_empty() {
            return Err(AnalysisError::invalid("wavelet scale range is empty"));
        }
        if self.wavelet_scales.contains(&0) {
            return Err(AnalysisError::invalid("wavelet scales must be positive"));
        }
        Ok(())
    }
}

impl From<&Args> for PipelineConfig {
    fn from(args: &Args) -> Self {
        Self {
            outlier_factor: args.outlier_factor,
            smoothing_window: args.smoothing_window,
            frame_rate: args.frame_rate,
            wavelet_scales: (args.min_scale..=args.max_scale).collect(),
        }
    }
}
