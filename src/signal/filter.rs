//! Selectable smoothing / low-pass filters.
//!
//! [`FilterConfig`] is the serialisable choice, one variant per kind with its
//! own parameter record. [`FilterConfig::prepare`] validates it and does any
//! one-off design work, yielding a [`PreparedFilter`] that can be applied to
//! many sequences (one per bead and channel).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::iir::{self, Prototype, Section};

/// Highest IIR order accepted.
pub const MAX_IIR_ORDER: usize = 20;

/// Widest moving-average, median or Savitzky-Golay window accepted.
pub const MAX_WINDOW: usize = 1001;

/// Largest Gaussian sigma accepted; its kernel spans `2 * round(4 sigma) + 1`
/// taps.
pub const MAX_SIGMA: f64 = 250.0;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("cannot filter an empty sequence")]
    EmptySequence,
    #[error("{kind} window must lie in 1..={max}, got {window}", max = MAX_WINDOW)]
    InvalidWindow { kind: &'static str, window: usize },
    #[error("smoothing factor must lie in (0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("polynomial order {order} must be below the window length {window}")]
    InvalidPolyOrder { order: usize, window: usize },
    #[error("sigma must lie in (0, {max}], got {0}", max = MAX_SIGMA)]
    InvalidSigma(f64),
    #[error("cutoff must lie strictly inside (0, 0.5) cycles/sample, got {0}")]
    InvalidCutoff(f64),
    #[error("filter order must be between 1 and {max}, got {0}", max = MAX_IIR_ORDER)]
    InvalidOrder(usize),
    #[error("passband ripple must be positive and finite, got {0} dB")]
    InvalidRipple(f64),
    #[error("stopband attenuation {stopband_db} dB is not usable with ripple {ripple_db} dB")]
    InvalidStopband { stopband_db: f64, ripple_db: f64 },
    #[error("sequence of {len} samples is shorter than the {window}-sample window")]
    SequenceTooShort { len: usize, window: usize },
}

// ---------------------------------------------------------------------------
// Parameter records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowParams {
    pub window: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialParams {
    pub alpha: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavitzkyGolayParams {
    pub window: usize,
    pub polyorder: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaussianParams {
    pub sigma: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ButterworthParams {
    /// Cycles per sample, Nyquist = 0.5.
    pub cutoff: f64,
    pub order: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChebyshevIParams {
    pub cutoff: f64,
    pub order: usize,
    pub ripple_db: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChebyshevIIParams {
    /// Start of the stopband, cycles per sample.
    pub cutoff: f64,
    pub order: usize,
    pub stopband_db: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipticParams {
    pub cutoff: f64,
    pub order: usize,
    pub ripple_db: f64,
    pub stopband_db: f64,
}

/// The active filter kind and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FilterConfig {
    MovingAverage(WindowParams),
    Exponential(ExponentialParams),
    Median(WindowParams),
    SavitzkyGolay(SavitzkyGolayParams),
    Gaussian(GaussianParams),
    Butterworth(ButterworthParams),
    ChebyshevI(ChebyshevIParams),
    ChebyshevII(ChebyshevIIParams),
    Elliptic(EllipticParams),
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig::Butterworth(ButterworthParams {
            cutoff: 0.1,
            order: 3,
        })
    }
}

impl FilterConfig {
    /// Short label used in reports and logs.
    pub fn label(&self) -> &'static str {
        match self {
            FilterConfig::MovingAverage(_) => "Moving Average",
            FilterConfig::Exponential(_) => "Exponential",
            FilterConfig::Median(_) => "Median",
            FilterConfig::SavitzkyGolay(_) => "Savitzky-Golay",
            FilterConfig::Gaussian(_) => "Gaussian",
            FilterConfig::Butterworth(_) => "Butterworth",
            FilterConfig::ChebyshevI(_) => "Chebyshev I",
            FilterConfig::ChebyshevII(_) => "Chebyshev II",
            FilterConfig::Elliptic(_) => "Elliptic",
        }
    }

    /// Validate the parameters and build everything that does not depend on
    /// the data. No sample is touched here.
    pub fn prepare(&self) -> Result<PreparedFilter, FilterError> {
        let plan = match *self {
            FilterConfig::MovingAverage(WindowParams { window }) => Plan::MovingAverage {
                window: odd_window("moving average", window)?,
            },
            FilterConfig::Exponential(ExponentialParams { alpha }) => {
                if !(alpha > 0.0 && alpha <= 1.0) {
                    return Err(FilterError::InvalidAlpha(alpha));
                }
                Plan::Exponential { alpha }
            }
            FilterConfig::Median(WindowParams { window }) => Plan::Median {
                window: odd_window("median", window)?,
            },
            FilterConfig::SavitzkyGolay(SavitzkyGolayParams { window, polyorder }) => {
                let window = odd_window("Savitzky-Golay", window)?;
                if polyorder >= window {
                    return Err(FilterError::InvalidPolyOrder {
                        order: polyorder,
                        window,
                    });
                }
                Plan::SavitzkyGolay(SavGol::new(window, polyorder))
            }
            FilterConfig::Gaussian(GaussianParams { sigma }) => {
                if !(sigma > 0.0 && sigma <= MAX_SIGMA) {
                    return Err(FilterError::InvalidSigma(sigma));
                }
                Plan::Gaussian {
                    kernel: gaussian_kernel(sigma),
                }
            }
            FilterConfig::Butterworth(p) => {
                check_lowpass(p.cutoff, p.order)?;
                Plan::Iir(iir::design_lowpass(Prototype::Butterworth, p.order, p.cutoff))
            }
            FilterConfig::ChebyshevI(p) => {
                check_lowpass(p.cutoff, p.order)?;
                check_ripple(p.ripple_db)?;
                Plan::Iir(iir::design_lowpass(
                    Prototype::ChebyshevI {
                        ripple_db: p.ripple_db,
                    },
                    p.order,
                    p.cutoff,
                ))
            }
            FilterConfig::ChebyshevII(p) => {
                check_lowpass(p.cutoff, p.order)?;
                if !(p.stopband_db.is_finite() && p.stopband_db > 0.0) {
                    return Err(FilterError::InvalidStopband {
                        stopband_db: p.stopband_db,
                        ripple_db: 0.0,
                    });
                }
                Plan::Iir(iir::design_lowpass(
                    Prototype::ChebyshevII {
                        stopband_db: p.stopband_db,
                    },
                    p.order,
                    p.cutoff,
                ))
            }
            FilterConfig::Elliptic(p) => {
                check_lowpass(p.cutoff, p.order)?;
                check_ripple(p.ripple_db)?;
                check_elliptic_stopband(p.ripple_db, p.stopband_db)?;
                Plan::Iir(iir::design_lowpass(
                    Prototype::Elliptic {
                        ripple_db: p.ripple_db,
                        stopband_db: p.stopband_db,
                    },
                    p.order,
                    p.cutoff,
                ))
            }
        };
        Ok(PreparedFilter {
            config: *self,
            plan,
        })
    }
}

fn odd_window(kind: &'static str, window: usize) -> Result<usize, FilterError> {
    if window == 0 || window > MAX_WINDOW {
        return Err(FilterError::InvalidWindow { kind, window });
    }
    Ok(if window % 2 == 0 { window + 1 } else { window })
}

fn check_lowpass(cutoff: f64, order: usize) -> Result<(), FilterError> {
    if !(cutoff > 0.0 && cutoff < 0.5) {
        return Err(FilterError::InvalidCutoff(cutoff));
    }
    if order == 0 || order > MAX_IIR_ORDER {
        return Err(FilterError::InvalidOrder(order));
    }
    Ok(())
}

fn check_ripple(ripple_db: f64) -> Result<(), FilterError> {
    if !(ripple_db.is_finite() && ripple_db > 0.0) {
        return Err(FilterError::InvalidRipple(ripple_db));
    }
    Ok(())
}

/// The stopband must sit below the ripple, and the two must not be so far
/// apart that the selectivity modulus underflows in double precision.
fn check_elliptic_stopband(ripple_db: f64, stopband_db: f64) -> Result<(), FilterError> {
    let err = FilterError::InvalidStopband {
        stopband_db,
        ripple_db,
    };
    if !(stopband_db.is_finite() && stopband_db > ripple_db) {
        return Err(err);
    }
    let ck1_sq = (10f64.powf(0.1 * ripple_db) - 1.0) / (10f64.powf(0.1 * stopband_db) - 1.0);
    if ck1_sq < 1e-14 {
        return Err(err);
    }
    Ok(())
}

/// Validate `config` and apply it to `samples`.
pub fn filter(samples: &[f64], config: &FilterConfig) -> Result<Vec<f64>, FilterError> {
    config.prepare()?.apply(samples)
}

// ---------------------------------------------------------------------------
// Prepared filters
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Plan {
    MovingAverage { window: usize },
    Exponential { alpha: f64 },
    Median { window: usize },
    SavitzkyGolay(SavGol),
    Gaussian { kernel: Vec<f64> },
    Iir(Vec<Section>),
}

/// A validated filter, ready to run.
#[derive(Debug, Clone)]
pub struct PreparedFilter {
    config: FilterConfig,
    plan: Plan,
}

impl PreparedFilter {
    pub fn config(&self) -> &FilterConfig {
        &self.config
    }

    /// Filter one sequence. The output has the input's length and sample `i`
    /// of the output corresponds to sample `i` of the input.
    pub fn apply(&self, samples: &[f64]) -> Result<Vec<f64>, FilterError> {
        if samples.is_empty() {
            return Err(FilterError::EmptySequence);
        }
        let out = match &self.plan {
            Plan::MovingAverage { window } => moving_average(samples, *window),
            Plan::Exponential { alpha } => exponential(samples, *alpha),
            Plan::Median { window } => median(samples, *window),
            Plan::SavitzkyGolay(sg) => {
                if samples.len() < sg.window {
                    return Err(FilterError::SequenceTooShort {
                        len: samples.len(),
                        window: sg.window,
                    });
                }
                sg.apply(samples)
            }
            Plan::Gaussian { kernel } => convolve_reflect(samples, kernel),
            Plan::Iir(sections) => iir::filtfilt(sections, samples),
        };
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

/// Centred boxcar, zero outside the sequence, always divided by `window`.
fn moving_average(x: &[f64], window: usize) -> Vec<f64> {
    let n = x.len();
    let half = window / 2;
    let mut prefix = Vec::with_capacity(n + 1);
    prefix.push(0.0);
    for &v in x {
        prefix.push(prefix.last().copied().unwrap_or(0.0) + v);
    }
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + half + 1).min(n);
            (prefix[hi] - prefix[lo]) / window as f64
        })
        .collect()
}

fn exponential(x: &[f64], alpha: f64) -> Vec<f64> {
    let mut out = Vec::with_capacity(x.len());
    let mut prev = x[0];
    for &v in x {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Running median; the window shrinks at the edges instead of padding.
fn median(x: &[f64], window: usize) -> Vec<f64> {
    let n = x.len();
    let half = window / 2;
    let mut buf = Vec::with_capacity(window);
    (0..n)
        .map(|i| {
            buf.clear();
            buf.extend_from_slice(&x[i.saturating_sub(half)..(i + half + 1).min(n)]);
            buf.sort_by(|a, b| a.total_cmp(b));
            let mid = buf.len() / 2;
            if buf.len() % 2 == 1 {
                buf[mid]
            } else {
                0.5 * (buf[mid - 1] + buf[mid])
            }
        })
        .collect()
}

/// Normalised Gaussian taps out to `round(4 sigma)`.
fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (4.0 * sigma + 0.5) as isize;
    let taps: Vec<f64> = (-radius..=radius)
        .map(|k| (-0.5 * (k as f64 / sigma).powi(2)).exp())
        .collect();
    let total: f64 = taps.iter().sum();
    taps.into_iter().map(|t| t / total).collect()
}

/// Convolution with an odd-length symmetric kernel, mirroring the sequence at
/// its ends (`d c b a | a b c d | d c b a`).
fn convolve_reflect(x: &[f64], kernel: &[f64]) -> Vec<f64> {
    let n = x.len() as isize;
    let radius = (kernel.len() / 2) as isize;
    let reflect = |i: isize| -> usize {
        let r = i.rem_euclid(2 * n);
        (if r >= n { 2 * n - 1 - r } else { r }) as usize
    };
    (0..n)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .map(|(k, w)| w * x[reflect(i + k as isize - radius)])
                .sum()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Savitzky-Golay
// ---------------------------------------------------------------------------

/// Least-squares polynomial smoothing weights for one window/order pair.
#[derive(Debug, Clone)]
struct SavGol {
    window: usize,
    /// Weights producing the fitted value at the window centre.
    centre: Vec<f64>,
    /// Weights for positions `0..half` of the first window (the last window
    /// uses them mirrored).
    edges: Vec<Vec<f64>>,
}

impl SavGol {
    fn new(window: usize, polyorder: usize) -> Self {
        let half = window / 2;
        // Positions scaled to [-1, 1] keep the least-squares system well conditioned.
        let scale = half.max(1) as f64;
        let positions: Vec<f64> = (0..window)
            .map(|j| (j as f64 - half as f64) / scale)
            .collect();
        let fit = PolyFit::new(&positions, polyorder);
        SavGol {
            window,
            centre: fit.weights_at(0.0),
            edges: (0..half).map(|j| fit.weights_at(positions[j])).collect(),
        }
    }

    fn apply(&self, x: &[f64]) -> Vec<f64> {
        let n = x.len();
        let w = self.window;
        let half = w / 2;
        let dot = |weights: &[f64], window: &[f64]| -> f64 {
            weights.iter().zip(window).map(|(a, b)| a * b).sum()
        };

        let mut out = vec![0.0; n];
        for i in half..n - half {
            out[i] = dot(&self.centre, &x[i - half..=i + half]);
        }
        let head = &x[..w];
        let tail = &x[n - w..];
        for (j, weights) in self.edges.iter().enumerate() {
            out[j] = dot(weights, head);
            // Mirror: position w-1-j of the last window uses reversed weights.
            out[n - 1 - j] = weights.iter().rev().zip(tail).map(|(a, b)| a * b).sum();
        }
        out
    }
}

/// Thin QR factorisation of a Vandermonde matrix, used to turn "fit a
/// polynomial, evaluate it at t" into a fixed weight vector.
struct PolyFit {
    /// Orthonormal columns, `terms` vectors of length `positions.len()`.
    q: Vec<Vec<f64>>,
    /// Upper-triangular `terms x terms`.
    r: Vec<Vec<f64>>,
}

impl PolyFit {
    fn new(positions: &[f64], order: usize) -> Self {
        let terms = order + 1;
        let mut q: Vec<Vec<f64>> = (0..terms)
            .map(|k| positions.iter().map(|t| t.powi(k as i32)).collect())
            .collect();
        let mut r = vec![vec![0.0; terms]; terms];

        // Modified Gram-Schmidt, two passes for orthogonality.
        for k in 0..terms {
            for _ in 0..2 {
                for j in 0..k {
                    let proj: f64 = q[j].iter().zip(&q[k]).map(|(a, b)| a * b).sum();
                    r[j][k] += proj;
                    let (done, rest) = q.split_at_mut(k);
                    for (v, u) in rest[0].iter_mut().zip(&done[j]) {
                        *v -= proj * u;
                    }
                }
            }
            let norm = q[k].iter().map(|v| v * v).sum::<f64>().sqrt();
            r[k][k] = norm;
            for v in &mut q[k] {
                *v /= norm;
            }
        }
        PolyFit { q, r }
    }

    /// Weights `w` such that `w . y` is the least-squares polynomial at `t`.
    fn weights_at(&self, t: f64) -> Vec<f64> {
        let terms = self.r.len();
        // Solve R^T u = [1, t, t^2, ...] by forward substitution.
        let mut u = vec![0.0; terms];
        for k in 0..terms {
            let mut acc = t.powi(k as i32);
            for j in 0..k {
                acc -= self.r[j][k] * u[j];
            }
            u[k] = acc / self.r[k][k];
        }
        let len = self.q[0].len();
        (0..len)
            .map(|i| (0..terms).map(|k| self.q[k][i] * u[k]).sum())
            .collect()
    }
}
