pub mod config;
pub mod data_loading;
pub mod error;
pub mod heart_analysis;
pub mod output;
pub mod preprocessing;

use serde::{Deserialize, Serialize};

pub use config::PipelineConfig;
pub use error::AnalysisError;
pub use heart_analysis::process;

/// Passthrough fields carried next to a reading's value (e.g. `time`).
pub type Attachments = serde_json::Map<String, serde_json::Value>;

/// One sample of the pulse signal. The position in the input sequence is the
/// time axis; `payload` is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading<P = Attachments> {
    pub value: f64,
    #[serde(flatten)]
    pub payload: P,
}

impl<P: Default> Reading<P> {
    pub fn new(value: f64) -> Self {
        Self {
            value,
            payload: P::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DataStats {
    pub min: f64,
    pub max: f64,
}

/// The externally visible result of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartBeat {
    pub bpm: f64,
    pub data_stats: DataStats,
    pub smoothed_data: Vec<f64>,
}

/// Everything one pipeline run produced, including the intermediate results
/// that are not part of [`HeartBeat`].
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub heart_beat: HeartBeat,
    pub peaks: Vec<usize>,
    pub interval_rates: Vec<f64>,
    pub outliers_replaced: usize,
    pub low_confidence: bool,
}
