use realfft::RealFftPlanner;

use crate::core::profile::SENTINEL;

/// Size threshold (n * m) above which we dispatch to the FFT path.
/// Below this, the naive O(n*m) loop wins due to lower constant overhead.
const FFT_THRESHOLD: usize = 256 * 1024;

/// Compute the sliding dot product between a query `q` and time series `ts`.
///
/// Returns a vector of length `ts.len() - q.len() + 1` where element `i` is
/// `dot(q, ts[i..i+m])`.
///
/// Adaptively dispatches to an FFT-based O(n log n) implementation for large
/// inputs, falling back to the naive O(n*m) loop for small inputs.
pub fn sliding_dot_product(q: &[f64], ts: &[f64]) -> Vec<f64> {
    let m = q.len();
    let n = ts.len();
    assert!(n >= m, "Time series shorter than query");
    if n * m > FFT_THRESHOLD {
        sliding_dot_product_fft(q, ts)
    } else {
        sliding_dot_product_naive(q, ts)
    }
}

/// Naive O(n*m) sliding dot product.
pub fn sliding_dot_product_naive(q: &[f64], ts: &[f64]) -> Vec<f64> {
    let m = q.len();
    assert!(ts.len() >= m, "Time series shorter than query");
    let n_subs = ts.len() - m + 1;

    (0..n_subs)
        .map(|i| q.iter().zip(&ts[i..i + m]).map(|(a, b)| a * b).sum())
        .collect()
}

/// FFT-based O(n log n) sliding dot product via cross-correlation.
///
/// Uses real-to-complex FFT to compute the convolution of the reversed query
/// with the time series, then extracts the dot-product values.
pub fn sliding_dot_product_fft(q: &[f64], ts: &[f64]) -> Vec<f64> {
    let m = q.len();
    let n = ts.len();
    assert!(n >= m, "Time series shorter than query");
    let n_subs = n - m + 1;
    let fft_len = (n + m - 1).next_power_of_two();

    let mut planner = RealFftPlanner::<f64>::new();
    let fft_forward = planner.plan_fft_forward(fft_len);
    let fft_inverse = planner.plan_fft_inverse(fft_len);

    // Reverse query into zero-padded buffer
    let mut q_padded = vec![0.0; fft_len];
    for (dst, &src) in q_padded.iter_mut().zip(q.iter().rev()) {
        *dst = src;
    }

    let mut ts_padded = vec![0.0; fft_len];
    ts_padded[..n].copy_from_slice(ts);

    let mut q_spectrum = fft_forward.make_output_vec();
    let mut ts_spectrum = fft_forward.make_output_vec();
    fft_forward
        .process(&mut q_padded, &mut q_spectrum)
        .expect("buffers are sized by the forward plan");
    fft_forward
        .process(&mut ts_padded, &mut ts_spectrum)
        .expect("buffers are sized by the forward plan");

    for (q_val, ts_val) in q_spectrum.iter_mut().zip(ts_spectrum.iter()) {
        *q_val *= ts_val;
    }

    let mut result = vec![0.0; fft_len];
    fft_inverse
        .process(&mut q_spectrum, &mut result)
        .expect("buffers are sized by the inverse plan");

    // realfft inverse is unnormalized
    let norm = 1.0 / fft_len as f64;

    result[m - 1..m - 1 + n_subs]
        .iter()
        .map(|&x| x * norm)
        .collect()
}

/// Centered moving-average high-pass filter.
///
/// Each value has the mean of `values[i - window/2 ..= i + window/2]`
/// (clamped to the slice) subtracted. This removes slow drift so that sharp
/// self-similarity peaks become comparable across a long trace. Windows below
/// 2 leave the input unchanged.
pub fn detrend(values: &[f32], window: usize) -> Vec<f32> {
    let half = window / 2;
    if half == 0 || values.is_empty() {
        return values.to_vec();
    }
    let n = values.len();
    let mut prefix = vec![0.0_f64; n + 1];
    for (i, &v) in values.iter().enumerate() {
        prefix[i + 1] = prefix[i] + v as f64;
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            let mean = (prefix[hi] - prefix[lo]) / (hi - lo) as f64;
            (values[i] as f64 - mean) as f32
        })
        .collect()
}

/// Detrend only the leading non-sentinel run of a profile.
///
/// Sentinel tails (positions whose window leaves the trace) are kept as-is so
/// they stay unselectable.
pub fn detrend_valid_prefix(values: &[f32], window: usize) -> Vec<f32> {
    let valid = values
        .iter()
        .position(|&v| v <= SENTINEL)
        .unwrap_or(values.len());
    let mut out = detrend(&values[..valid], window);
    out.extend_from_slice(&values[valid..]);
    out
}

/// Invalidate `[idx - zone, idx + zone]` (clamped) so no peak can be picked there again.
#[inline]
pub fn apply_suppression(profile: &mut [f32], idx: usize, zone: usize) {
    let start = idx.saturating_sub(zone);
    let end = (idx + zone + 1).min(profile.len());
    for val in &mut profile[start..end] {
        *val = SENTINEL;
    }
}

/// Widen a single-precision slice to `f64`.
pub fn to_f64(values: &[f32]) -> Vec<f64> {
    values.iter().map(|&v| v as f64).collect()
}
