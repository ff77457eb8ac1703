use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SmoothError {
    #[error("cannot smooth an empty sequence")]
    EmptySequence,
    #[error("smoothing window must be positive")]
    ZeroWindow,
}

/// Window actually used by [`smooth`]: odd windows are bumped to the next even
/// value. Returns `(window, half)`.
pub fn normalized_window(window: usize) -> (usize, usize) {
    let window = if window % 2 != 0 { window + 1 } else { window };
    (window, window / 2)
}

/// Boundary-aware centred moving average ("curve fitting").
///
/// * `i < half`: index 0 is copied, index `i` averages the first `2i + 1` samples.
/// * `i >= n - half`: averages `samples[2i - n + 1 .. n]`.
/// * interior: the first point is a direct centred mean over `window + 1`
///   samples, every later point is updated in O(1) from its predecessor.
///
/// The recurrence accumulates rounding error along the sequence; that drift is
/// part of the output.
pub fn smooth(samples: &[f64], window: usize) -> Result<Vec<f64>, SmoothError> {
    if window == 0 {
        return Err(SmoothError::ZeroWindow);
    }
    if samples.is_empty() {
        return Err(SmoothError::EmptySequence);
    }

    let n = samples.len();
    let (window, half) = normalized_window(window);
    let span = (window + 1) as f64;
    let mut out = vec![0.0; n];

    for i in 0..n {
        out[i] = if i < half {
            if i == 0 {
                samples[0]
            } else {
                mean(&samples[..(2 * i + 1).min(n)])
            }
        } else if i >= n - half {
            mean(&samples[2 * i + 1 - n..])
        } else if i == half {
            mean(&samples[i - half..=i + half])
        } else {
            out[i - 1] + (samples[i + half] - samples[i - half - 1]) / span
        };
    }
    Ok(out)
}

/// Mean anchored on the first element, so a constant window reproduces its
/// value bit for bit.
pub(crate) fn mean(values: &[f64]) -> f64 {
    let first = values[0];
    let dev: f64 = values.iter().map(|&v| v - first).sum();
    first + dev / values.len() as f64
}
