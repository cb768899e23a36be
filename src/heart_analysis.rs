use crate::config::PipelineConfig;
use crate::error::AnalysisError;
use crate::preprocessing::{moving_average, quantile_sorted, remove_outliers_iqr};
use crate::{Analysis, DataStats, HeartBeat, Reading};
use log::{debug, trace, warn};
use ndarray::{s, Array1, Array2, ArrayView1};
use std::f64::consts::PI;

/// Ricker (Mexican hat) wavelet of width `a`, sampled at `points` positions
/// around the middle sample.
fn ricker(points: usize, a: f64) -> Array1<f64> {
    let amplitude = 2.0 / ((3.0 * a).sqrt() * PI.powf(0.25));
    let wsq = a * a;
    let center = (points as f64 - 1.0) / 2.0;

    Array1::from_shape_fn(points, |i| {
        let x = i as f64 - center;
        let xsq = x * x;
        amplitude * (1.0 - xsq / wsq) * (-xsq / (2.0 * wsq)).exp()
    })
}

/// Wavelet length for a given width: ten widths on each side plus the centre
/// sample, never longer than the signal. Always odd so the wavelet is centred
/// on a sample.
fn kernel_length(width: usize, signal_len: usize) -> usize {
    let len = (10 * width + 1).min(signal_len);
    if len % 2 == 0 {
        len - 1
    } else {
        len
    }
}

/// Discrete convolution in "same" mode: output has the length of `data`,
/// samples outside the signal count as zero. `kernel` must not be longer than
/// `data`.
fn convolve_same(data: ArrayView1<f64>, kernel: ArrayView1<f64>) -> Array1<f64> {
    let n = data.len();
    let m = kernel.len();
    let offset = (m - 1) / 2;

    Array1::from_shape_fn(n, |i| {
        let t = i + offset;
        let start = (t + 1).saturating_sub(m);
        let end = t.min(n - 1);
        (start..=end).map(|j| data[j] * kernel[t - j]).sum()
    })
}

/// Continuous wavelet transform with the Ricker wavelet, one row per scale.
pub fn cwt(signal: ArrayView1<f64>, scales: &[usize]) -> Array2<f64> {
    let mut matrix = Array2::<f64>::zeros((scales.len(), signal.len()));

    for (mut row, &scale) in matrix.rows_mut().into_iter().zip(scales) {
        // The wavelet is symmetric, so no time reversal is needed
        let wavelet = ricker(kernel_length(scale, signal.len()), scale as f64);
        row.assign(&convolve_same(signal, wavelet.view()));
    }

    matrix
}

/// Strict local maxima; the first and last sample never qualify.
fn local_maxima(row: ArrayView1<f64>) -> Vec<usize> {
    (1..row.len().saturating_sub(1))
        .filter(|&i| row[i] > row[i - 1] && row[i] > row[i + 1])
        .collect()
}

/// A chain of CWT maxima linked across scales, stored as (row, column).
#[derive(Debug, Clone)]
struct RidgeLine {
    points: Vec<(usize, usize)>,
    gap: usize,
}

impl RidgeLine {
    fn new(row: usize, col: usize) -> Self {
        Self {
            points: vec![(row, col)],
            gap: 0,
        }
    }

    fn extend(&mut self, row: usize, col: usize) {
        self.points.push((row, col));
        self.gap = 0;
    }

    fn last_col(&self) -> usize {
        self.points[self.points.len() - 1].1
    }

    /// The point on the smallest scale the ridge reaches.
    fn bottom(&self) -> (usize, usize) {
        self.points
            .iter()
            .copied()
            .min_by_key(|&(row, _)| row)
            .unwrap_or((0, 0))
    }

    fn len(&self) -> usize {
        self.points.len()
    }
}

/// Tuning of the ridge search. `None` fields are derived from the input when
/// the detector runs.
#[derive(Debug, Clone, PartialEq)]
pub struct RidgeParams {
    /// Columns a ridge may move between adjacent scales, as a fraction of the scale.
    pub max_distance_ratio: f64,
    /// Rows a ridge may skip before it is closed. Defaults to the first scale.
    pub gap_thresh: Option<usize>,
    /// Minimum number of rows a ridge must span. Defaults to a quarter of the scales.
    pub min_length: Option<usize>,
    /// Window for the noise estimate. Defaults to a twentieth of the signal.
    pub window_size: Option<usize>,
    pub min_snr: f64,
    /// Percentile of the smallest-scale coefficients used as the noise floor.
    pub noise_perc: f64,
}

impl RidgeParams {
    pub fn validate(&self) -> Result<(), AnalysisError> {
        if !self.max_distance_ratio.is_finite() || self.max_distance_ratio < 0.0 {
            return Err(AnalysisError::invalid(format!(
                "max distance ratio must be a non-negative number, got {}",
                self.max_distance_ratio
            )));
        }
        if !self.min_snr.is_finite() {
            return Err(AnalysisError::invalid(format!(
                "minimum SNR must be finite, got {}",
                self.min_snr
            )));
        }
        if !(0.0..=100.0).contains(&self.noise_perc) {
            return Err(AnalysisError::invalid(format!(
                "noise percentile must be within [0, 100], got {}",
                self.noise_perc
            )));
        }
        Ok(())
    }
}

impl Default for RidgeParams {
    fn default() -> Self {
        Self {
            max_distance_ratio: 0.25,
            gap_thresh: None,
            min_length: None,
            window_size: None,
            min_snr: 1.0,
            noise_perc: 10.0,
        }
    }
}

/// Link maxima of each row into ridge lines, walking from the largest scale
/// that has any maximum down to the smallest.
fn identify_ridge_lines(
    maxima: &[Vec<usize>],
    max_distances: &[f64],
    gap_thresh: usize,
) -> Vec<RidgeLine> {
    let start_row = match maxima.iter().rposition(|row| !row.is_empty()) {
        Some(row) => row,
        None => return Vec::new(),
    };

    let mut active: Vec<RidgeLine> = maxima[start_row]
        .iter()
        .map(|&col| RidgeLine::new(start_row, col))
        .collect();
    let mut finished = Vec::new();

    for row in (0..start_row).rev() {
        for line in active.iter_mut() {
            line.gap += 1;
        }

        // Lines started on this row are not candidates for its other maxima
        let prev_cols: Vec<usize> = active.iter().map(RidgeLine::last_col).collect();

        for &col in &maxima[row] {
            let closest = prev_cols
                .iter()
                .enumerate()
                .map(|(idx, &prev)| (idx, col.abs_diff(prev)))
                .min_by_key(|&(_, diff)| diff);

            match closest {
                Some((idx, diff)) if diff as f64 <= max_distances[row] => {
                    active[idx].extend(row, col)
                }
                _ => active.push(RidgeLine::new(row, col)),
            }
        }

        let (open, closed): (Vec<_>, Vec<_>) =
            active.into_iter().partition(|line| line.gap <= gap_thresh);
        active = open;
        finished.extend(closed);
    }

    finished.extend(active);
    finished
}

/// Per-column noise floor: a low percentile of the absolute smallest-scale
/// coefficients in a window around the column.
fn noise_floor(row: ArrayView1<f64>, window_size: usize, noise_perc: f64) -> Vec<f64> {
    let n = row.len();
    let half_window = window_size / 2;
    let odd = window_size % 2;

    (0..n)
        .map(|i| {
            let start = i.saturating_sub(half_window);
            let end = (i + half_window + odd).min(n);
            let mut window: Vec<f64> = row.slice(s![start..end]).iter().map(|v| v.abs()).collect();
            window.sort_by(|a, b| a.total_cmp(b));
            quantile_sorted(&window, noise_perc / 100.0)
        })
        .collect()
}

/// Detect peaks with the default ridge parameters, see [`detect_peaks_with`].
pub fn detect_peaks(series: &[f64], scales: &[usize]) -> Result<Vec<usize>, AnalysisError> {
    detect_peaks_with(series, scales, &RidgeParams::default())
}

/// Multiscale peak detection: ridges of Ricker CWT maxima that span enough
/// scales and stand out from the local noise floor. Returns strictly
/// increasing indices into `series`.
///
/// This follows `scipy.signal.find_peaks_cwt` but does not reproduce its output
/// exactly. The differences are deliberate:
///
/// - wavelets are `10 * width + 1` samples long, shortened to an odd length
///   when the series is shorter, so every kernel is centred on a sample;
/// - the mean is removed before the transform;
/// - the noise floor is taken over absolute smallest-scale coefficients and
///   the SNR keeps its sign, so troughs never pass as peaks;
/// - a ridge is dropped when the wavelet at its smallest scale reaches past
///   either end of the series. Those coefficients see the zero padding, and
///   any edge dip left by a zero padded smoother, rather than the signal.
pub fn detect_peaks_with(
    series: &[f64],
    scales: &[usize],
    params: &RidgeParams,
) -> Result<Vec<usize>, AnalysisError> {
    if series.is_empty() {
        return Err(AnalysisError::invalid("cannot detect peaks in an empty series"));
    }
    if scales.is_empty() || scales.contains(&0) {
        return Err(AnalysisError::invalid(format!(
            "wavelet scales must be non-empty and positive, got {:?}",
            scales
        )));
    }
    if series.iter().any(|v| !v.is_finite()) {
        return Err(AnalysisError::invalid("series contains non-finite values"));
    }
    params.validate()?;

    let series = ArrayView1::from(series);
    let (min, max) = series
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if series.len() < 3 || max == min {
        debug!(
            "Series of {} samples with range {:.4} has no peaks",
            series.len(),
            max - min
        );
        return Ok(Vec::new());
    }

    let centered = &series - series.mean().unwrap_or(0.0);
    let matrix = cwt(centered.view(), scales);

    let maxima: Vec<Vec<usize>> = matrix.rows().into_iter().map(local_maxima).collect();
    for (scale, row) in scales.iter().zip(&maxima) {
        trace!("scale {}: {} maxima", scale, row.len());
    }

    let max_distances: Vec<f64> = scales
        .iter()
        .map(|&scale| scale as f64 * params.max_distance_ratio)
        .collect();
    let gap_thresh = params.gap_thresh.unwrap_or(scales[0]);
    let ridge_lines = identify_ridge_lines(&maxima, &max_distances, gap_thresh);

    let min_length = params
        .min_length
        .unwrap_or_else(|| (scales.len() as f64 / 4.0).ceil() as usize);
    let window_size = params
        .window_size
        .unwrap_or_else(|| (series.len() as f64 / 20.0).ceil() as usize)
        .max(1);
    let noises = noise_floor(matrix.row(0), window_size, params.noise_perc);

    let n = series.len();
    let total_ridges = ridge_lines.len();
    let mut peaks: Vec<usize> = ridge_lines
        .into_iter()
        .filter(|line| line.len() >= min_length)
        .filter_map(|line| {
            let (row, col) = line.bottom();
            let reach = (kernel_length(scales[row], n) - 1) / 2;
            if col < reach || col + reach >= n {
                trace!(
                    "Dropping ridge at {}: scale {} reaches the edge",
                    col,
                    scales[row]
                );
                return None;
            }
            let coefficient = matrix[[row, col]];
            let noise = noises[col];
            let snr = if noise > 0.0 {
                coefficient / noise
            } else if coefficient > 0.0 {
                f64::INFINITY
            } else {
                f64::NEG_INFINITY
            };
            (snr >= params.min_snr).then_some(col)
        })
        .collect();

    peaks.sort_unstable();
    peaks.dedup();

    debug!(
        "Peak detection - {} ridge lines, {} accepted (min_length: {}, noise window: {})",
        total_ridges,
        peaks.len(),
        min_length,
        window_size
    );

    Ok(peaks)
}

/// Average heart rate and the per-interval rates it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct RateEstimate {
    pub bpm: f64,
    pub rates: Vec<f64>,
}

/// Convert peak positions into the mean of the instantaneous rates between
/// consecutive peaks. Fewer than two peaks yield `bpm = 0`. Zero or
/// non-finite intervals are left out of the average.
pub fn estimate_rate(peaks: &[usize], frame_rate: f64) -> Result<RateEstimate, AnalysisError> {
    if !frame_rate.is_finite() || frame_rate <= 0.0 {
        return Err(AnalysisError::invalid(format!(
            "frame rate must be positive, got {}",
            frame_rate
        )));
    }

    if peaks.len() < 2 {
        return Ok(RateEstimate {
            bpm: 0.0,
            rates: Vec::new(),
        });
    }

    let peak_times: Vec<f64> = peaks.iter().map(|&p| p as f64 / frame_rate).collect();

    let rates: Vec<f64> = peak_times
        .windows(2)
        .filter_map(|w| {
            let interval = w[1] - w[0];
            let rate = 60.0 / interval;
            if interval > 0.0 && rate.is_finite() {
                Some(rate)
            } else {
                debug!("Skipping degenerate interval of {}s", interval);
                None
            }
        })
        .collect();

    let bpm = if rates.is_empty() {
        0.0
    } else {
        rates.iter().sum::<f64>() / rates.len() as f64
    };

    Ok(RateEstimate { bpm, rates })
}

pub fn data_stats(series: &[f64]) -> Result<DataStats, AnalysisError> {
    if series.is_empty() {
        return Err(AnalysisError::invalid("cannot compute stats of an empty series"));
    }
    let min = series.iter().copied().fold(f64::INFINITY, f64::min);
    let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    Ok(DataStats { min, max })
}

/// Run the whole pipeline: outlier filter, smoothing, peak detection and rate
/// estimation.
pub fn process<P: Clone>(
    readings: &[Reading<P>],
    config: &PipelineConfig,
) -> Result<Analysis, AnalysisError> {
    config.validate()?;

    let (cleaned, outliers_replaced) = remove_outliers_iqr(readings, config.outlier_factor)?;
    let cleaned_values: Vec<f64> = cleaned.iter().map(|r| r.value).collect();

    let smoothed = moving_average(&cleaned_values, config.smoothing_window)?;
    let stats = data_stats(&smoothed)?;

    let peaks = detect_peaks(&smoothed, &config.wavelet_scales)?;
    debug!("Detected peaks: {:?}", peaks);

    let estimate = estimate_rate(&peaks, config.frame_rate)?;
    let low_confidence = peaks.len() < 2;
    if low_confidence {
        warn!(
            "Not enough peaks detected to calculate heart rate ({} found)",
            peaks.len()
        );
    }
    for (i, rate) in estimate.rates.iter().enumerate() {
        debug!("Interval {}: {:.2} BPM", i + 1, rate);
    }
    debug!(
        "Detected heart rate: {:.2} BPM from {} readings",
        estimate.bpm,
        readings.len()
    );

    Ok(Analysis {
        heart_beat: HeartBeat {
            bpm: estimate.bpm,
            data_stats: stats,
            smoothed_data: smoothed,
        },
        peaks,
        interval_rates: estimate.rates,
        outliers_replaced,
        low_confidence,
    })
}
