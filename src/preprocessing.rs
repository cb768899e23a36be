use crate::error::AnalysisError;
use crate::Reading;
use log::debug;

/// Quantile with linear interpolation between closest ranks (numpy's default,
/// "R-7"). `sorted` must be non-empty and ascending, `p` in `[0, 1]`.
///
/// Interpolates from the upper neighbour once the fraction reaches one half,
/// like numpy, so results agree to the last bit.
pub fn quantile_sorted(sorted: &[f64], p: f64) -> f64 {
    let h = (sorted.len() - 1) as f64 * p;
    let lo = h.floor() as usize;
    let hi = (lo + 1).min(sorted.len() - 1);
    let t = h - lo as f64;
    let (a, b) = (sorted[lo], sorted[hi]);
    let diff = b - a;
    if t >= 0.5 {
        b - diff * (1.0 - t)
    } else {
        a + diff * t
    }
}

/// Quantile of unsorted data, see [`quantile_sorted`].
pub fn quantile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(quantile_sorted(&sorted, p))
}

/// Pairwise summation with eight partial sums per block of up to 128 values,
/// the order numpy reduces contiguous float arrays in.
fn pairwise_sum(values: &[f64]) -> f64 {
    const BLOCK: usize = 128;
    let n = values.len();

    if n < 8 {
        values.iter().fold(0.0, |acc, v| acc + v)
    } else if n <= BLOCK {
        let mut r = [0.0; 8];
        r.copy_from_slice(&values[..8]);
        let unrolled = n - n % 8;
        for chunk in values[8..unrolled].chunks_exact(8) {
            for (acc, v) in r.iter_mut().zip(chunk) {
                *acc += v;
            }
        }
        let mut sum = ((r[0] + r[1]) + (r[2] + r[3])) + ((r[4] + r[5]) + (r[6] + r[7]));
        for v in &values[unrolled..] {
            sum += v;
        }
        sum
    } else {
        let mut half = n / 2;
        half -= half % 8;
        pairwise_sum(&values[..half]) + pairwise_sum(&values[half..])
    }
}

fn mean(values: &[f64]) -> f64 {
    pairwise_sum(values) / values.len() as f64
}

/// Replace values outside `[Q1 - factor*IQR, Q3 + factor*IQR]` with the mean of
/// all original values. Length, order and payloads are preserved. Returns the
/// cleaned readings and how many were replaced.
pub fn remove_outliers_iqr<P: Clone>(
    readings: &[Reading<P>],
    factor: f64,
) -> Result<(Vec<Reading<P>>, usize), AnalysisError> {
    if readings.is_empty() {
        return Err(AnalysisError::invalid("no readings provided"));
    }
    if !factor.is_finite() || factor < 0.0 {
        return Err(AnalysisError::invalid(format!(
            "outlier factor must be a non-negative number, got {}",
            factor
        )));
    }

    let values: Vec<f64> = readings.iter().map(|r| r.value).collect();
    if let Some(idx) = values.iter().position(|v| !v.is_finite()) {
        return Err(AnalysisError::invalid(format!(
            "reading {} has a non-finite value",
            idx
        )));
    }

    let mut sorted = values.clone();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let q1 = quantile_sorted(&sorted, 0.25);
    let q3 = quantile_sorted(&sorted, 0.75);
    let iqr = q3 - q1;
    let lower_bound = q1 - factor * iqr;
    let upper_bound = q3 + factor * iqr;

    // Mean over the original values, outliers included
    let mean_value = mean(&values);

    debug!(
        "IQR filter - q1: {:.4}, q3: {:.4}, bounds: [{:.4}, {:.4}], mean: {:.4}",
        q1, q3, lower_bound, upper_bound, mean_value
    );

    let mut outliers = 0;
    let cleaned: Vec<Reading<P>> = readings
        .iter()
        .map(|reading| {
            let mut cleaned = reading.clone();
            if !(lower_bound..=upper_bound).contains(&reading.value) {
                cleaned.value = mean_value;
                outliers += 1;
            }
            cleaned
        })
        .collect();

    debug!("Number of outliers replaced: {}", outliers);

    Ok((cleaned, outliers))
}

/// Centered moving average with zero padding at the edges ("same" mode
/// convolution with a box kernel). The output always has the input's length,
/// even when the input is shorter than the window. Edge samples are biased
/// toward zero.
pub fn moving_average(values: &[f64], window: usize) -> Result<Vec<f64>, AnalysisError> {
    if window == 0 {
        return Err(AnalysisError::invalid("window size must be a positive integer"));
    }
    if values.is_empty() {
        return Err(AnalysisError::invalid("no values to smooth"));
    }

    let n = values.len() as isize;
    let offset = ((window - 1) / 2) as isize;
    let weight = 1.0 / window as f64;

    let smoothed = (0..n)
        .map(|i| {
            // Taps cover values[i + offset - window + 1 ..= i + offset]
            let start = (i + offset - window as isize + 1).max(0);
            let end = (i + offset).min(n - 1);
            values[start as usize..=end as usize].iter().sum::<f64>() * weight
        })
        .collect();

    Ok(smoothed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn readings(values: &[f64]) -> Vec<Reading<()>> {
        values.iter().map(|&v| Reading::new(v)).collect()
    }

    fn values<P>(readings: &[Reading<P>]) -> Vec<f64> {
        readings.iter().map(|r| r.value).collect()
    }

    #[test]
    fn test_quantile_linear_interpolation() {
        let data = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile(&data, 0.25).unwrap(), 1.75);
        assert_relative_eq!(quantile(&data, 0.5).unwrap(), 2.5);
        assert_relative_eq!(quantile(&data, 0.75).unwrap(), 3.25);
        assert_relative_eq!(quantile(&[7.0], 0.1).unwrap(), 7.0);
        assert_relative_eq!(quantile(&[4.0, 1.0, 3.0, 2.0, 5.0], 0.1).unwrap(), 1.4);
        assert!(quantile(&[], 0.5).is_none());
    }

    #[test]
    fn test_quantile_upper_half_interpolates_from_above() {
        // a + t * (b - a) would give 0.9999999999999999 and 1.8199999999999998
        assert_eq!(quantile(&[0.1, 1.3], 0.75).unwrap(), 1.0);
        assert_eq!(quantile(&[2.9, 0.2], 0.6).unwrap(), 1.82);
        assert_eq!(quantile(&[0.1, 0.3], 0.9).unwrap(), 0.27999999999999997);
    }

    #[test]
    fn test_pairwise_mean() {
        // a running sum of ten 0.1s drifts to 0.9999999999999999
        assert_eq!(pairwise_sum(&[0.1; 10]), 1.0);
        assert_eq!(mean(&[0.1; 10]), 0.1);
        assert_eq!(pairwise_sum(&[0.1; 200]), 20.0);
        assert_eq!(pairwise_sum(&[0.1; 1000]), 100.00000000000001);
        assert_eq!(pairwise_sum(&[1.5, 2.5]), 4.0);
    }

    #[test]
    fn test_single_spike_is_replaced_by_mean() {
        let input = readings(&[1.0, 1.0, 1.0, 1.0, 100.0, 1.0, 1.0, 1.0]);
        let (cleaned, replaced) = remove_outliers_iqr(&input, 1.5).unwrap();
        assert_eq!(replaced, 1);

        // mean of the original values, not the IQR bound
        let expected_mean = 107.0 / 8.0;
        assert_relative_eq!(cleaned[4].value, expected_mean);
        for (i, r) in cleaned.iter().enumerate() {
            if i != 4 {
                assert_eq!(r.value, 1.0);
            }
        }
    }

    #[test]
    fn test_bounds_are_inclusive() {
        // q1 = 2, q3 = 4, iqr = 2, bounds = [-1, 7]
        let input = readings(&[-1.0, 2.0, 2.0, 3.0, 4.0, 4.0, 7.0]);
        let (cleaned, replaced) = remove_outliers_iqr(&input, 1.5).unwrap();
        assert_eq!(replaced, 0);
        assert_eq!(values(&cleaned), values(&input));
    }

    #[test]
    fn test_cleaning_is_idempotent_without_outliers() {
        let input = readings(&[0.51, 0.53, 0.55, 0.52, 0.5, 0.49, 0.54, 0.56]);
        let (once, _) = remove_outliers_iqr(&input, 1.5).unwrap();
        let (twice, replaced) = remove_outliers_iqr(&once, 1.5).unwrap();
        assert_eq!(replaced, 0);
        assert_eq!(values(&once), values(&input));
        assert_eq!(values(&twice), values(&once));
    }

    #[test]
    fn test_payload_and_length_preserved() {
        let input: Vec<Reading<u64>> = [3.0, 3.0, 250.0, 3.0, 3.0]
            .iter()
            .enumerate()
            .map(|(i, &v)| Reading {
                value: v,
                payload: i as u64 * 16,
            })
            .collect();
        let (cleaned, replaced) = remove_outliers_iqr(&input, 1.5).unwrap();
        assert_eq!(replaced, 1);
        assert_eq!(cleaned.len(), input.len());
        let payloads: Vec<u64> = cleaned.iter().map(|r| r.payload).collect();
        assert_eq!(payloads, vec![0, 16, 32, 48, 64]);
        assert_relative_eq!(cleaned[2].value, 262.0 / 5.0);
    }

    #[test]
    fn test_outlier_filter_rejects_invalid_input() {
        assert!(matches!(
            remove_outliers_iqr::<()>(&[], 1.5),
            Err(AnalysisError::InvalidInput(_))
        ));
        assert!(remove_outliers_iqr(&readings(&[1.0, f64::NAN]), 1.5).is_err());
        assert!(remove_outliers_iqr(&readings(&[1.0, 2.0]), -0.5).is_err());
    }

    #[test]
    fn test_moving_average_same_length_with_zero_padding() {
        let smoothed = moving_average(&[1.0, 2.0, 3.0, 4.0, 5.0], 3).unwrap();
        let expected = [1.0, 2.0, 3.0, 4.0, 3.0];
        assert_eq!(smoothed.len(), 5);
        for (s, e) in smoothed.iter().zip(expected.iter()) {
            assert_relative_eq!(*s, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_moving_average_edges_pulled_toward_zero() {
        let smoothed = moving_average(&[6.0; 6], 3).unwrap();
        assert_relative_eq!(smoothed[0], 4.0, epsilon = 1e-12);
        assert_relative_eq!(smoothed[5], 4.0, epsilon = 1e-12);
        for s in &smoothed[1..5] {
            assert_relative_eq!(*s, 6.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_moving_average_even_window() {
        // window 4 covers [i-2, i+1]
        let smoothed = moving_average(&[4.0, 8.0, 12.0, 16.0], 4).unwrap();
        let expected = [3.0, 6.0, 10.0, 9.0];
        for (s, e) in smoothed.iter().zip(expected.iter()) {
            assert_relative_eq!(*s, *e, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_moving_average_shorter_than_window() {
        let smoothed = moving_average(&[1.0, 2.0], 3).unwrap();
        assert_eq!(smoothed.len(), 2);
        assert_relative_eq!(smoothed[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(smoothed[1], 1.0, epsilon = 1e-12);

        let single = moving_average(&[4.0], 7).unwrap();
        assert_eq!(single.len(), 1);
        assert_relative_eq!(single[0], 4.0 / 7.0, epsilon = 1e-12);
    }

    #[test]
    fn test_moving_average_rejects_zero_window() {
        assert!(matches!(
            moving_average(&[1.0, 2.0], 0),
            Err(AnalysisError::InvalidInput(_))
        ));
        assert!(moving_average(&[], 3).is_err());
    }
}
