//! Digital IIR low-pass design and zero-phase application.
//!
//! ```text
//!  analog prototype (zpk, cutoff 1 rad/s)
//!        │  lp2lp with pre-warped cutoff
//!        ▼
//!  analog low-pass ──bilinear──▶ digital zpk ──pairing──▶ second-order sections
//!                                                              │
//!                                          forward + backward ▼ (odd padding,
//!                                                      steady-state initial state)
//! ```
//!
//! Cutoffs are normalised to the sample rate, so Nyquist is 0.5.

use std::f64::consts::PI;

use num_complex::Complex64;

const EPSILON: f64 = 2e-16;

/// Which analog prototype to start from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Prototype {
    Butterworth,
    ChebyshevI { ripple_db: f64 },
    ChebyshevII { stopband_db: f64 },
    Elliptic { ripple_db: f64, stopband_db: f64 },
}

/// One biquad: `b0 + b1 z^-1 + b2 z^-2` over `1 + a1 z^-1 + a2 z^-2`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Section {
    pub b: [f64; 3],
    pub a: [f64; 3],
}

impl Section {
    /// DC gain of the section.
    fn dc_gain(&self) -> f64 {
        (self.b[0] + self.b[1] + self.b[2]) / (self.a[0] + self.a[1] + self.a[2])
    }
}

struct Zpk {
    zeros: Vec<Complex64>,
    poles: Vec<Complex64>,
    gain: f64,
}

// ---------------------------------------------------------------------------
// Design
// ---------------------------------------------------------------------------

/// Design a low-pass of the given order. `cutoff` is in cycles per sample and
/// must already be validated to lie in (0, 0.5).
pub(crate) fn design_lowpass(prototype: Prototype, order: usize, cutoff: f64) -> Vec<Section> {
    let analog = match prototype {
        Prototype::Butterworth => butterworth(order),
        Prototype::ChebyshevI { ripple_db } => chebyshev1(order, ripple_db),
        Prototype::ChebyshevII { stopband_db } => chebyshev2(order, stopband_db),
        Prototype::Elliptic {
            ripple_db,
            stopband_db,
        } => elliptic(order, ripple_db, stopband_db),
    };

    // Design at fs = 2 so the bilinear constant is 2 * fs = 4.
    let fs2 = 4.0;
    let warped = fs2 * (PI * cutoff).tan();
    let digital = bilinear(lowpass_to_lowpass(analog, warped), fs2);
    to_sections(digital)
}

fn butterworth(n: usize) -> Zpk {
    let poles = symmetric_indices(n)
        .map(|m| -Complex64::from_polar(1.0, PI * m / (2.0 * n as f64)))
        .collect();
    Zpk {
        zeros: Vec::new(),
        poles,
        gain: 1.0,
    }
}

fn chebyshev1(n: usize, ripple_db: f64) -> Zpk {
    let eps = (10f64.powf(0.1 * ripple_db) - 1.0).sqrt();
    let mu = (1.0 / eps).asinh() / n as f64;
    let poles: Vec<Complex64> = symmetric_indices(n)
        .map(|m| -Complex64::new(mu, PI * m / (2.0 * n as f64)).sinh())
        .collect();
    let mut gain = product(poles.iter().map(|p| -*p)).re;
    if n % 2 == 0 {
        gain /= (1.0 + eps * eps).sqrt();
    }
    Zpk {
        zeros: Vec::new(),
        poles,
        gain,
    }
}

fn chebyshev2(n: usize, stopband_db: f64) -> Zpk {
    let de = 1.0 / (10f64.powf(0.1 * stopband_db) - 1.0).sqrt();
    let mu = (1.0 / de).asinh() / n as f64;
    let nf = n as f64;

    // Odd orders drop the zero at infinity (m = 0).
    let zeros: Vec<Complex64> = symmetric_indices(n)
        .filter(|m| *m != 0.0)
        .map(|m| Complex64::new(0.0, 1.0 / (m * PI / (2.0 * nf)).sin()))
        .collect();
    let poles: Vec<Complex64> = symmetric_indices(n)
        .map(|m| {
            let p = -Complex64::from_polar(1.0, PI * m / (2.0 * nf));
            Complex64::new(mu.sinh() * p.re, mu.cosh() * p.im).inv()
        })
        .collect();
    let gain = (product(poles.iter().map(|p| -*p)) / product(zeros.iter().map(|z| -*z))).re;
    Zpk { zeros, poles, gain }
}

fn elliptic(n: usize, ripple_db: f64, stopband_db: f64) -> Zpk {
    let eps_sq = 10f64.powf(0.1 * ripple_db) - 1.0;
    let eps = eps_sq.sqrt();
    if n == 1 {
        let p = -1.0 / eps;
        return Zpk {
            zeros: Vec::new(),
            poles: vec![Complex64::new(p, 0.0)],
            gain: -p,
        };
    }

    let nf = n as f64;
    let ck1_sq = eps_sq / (10f64.powf(0.1 * stopband_db) - 1.0);
    let k1 = complete_elliptic_k(ck1_sq);
    let krat = nf * k1 / complete_elliptic_k(1.0 - ck1_sq);
    let m = solve_modulus_ratio(krat);
    let capk = complete_elliptic_k(m);

    let r = incomplete_elliptic_f((1.0 / eps).atan(), 1.0 - ck1_sq);
    let v0 = capk * r / (nf * k1);
    let (sv, cv, dv) = jacobi_elliptic(v0, 1.0 - m);

    let mut zeros = Vec::new();
    let mut poles = Vec::new();
    let mut j = 1 - n % 2;
    while j < n {
        let (s, c, d) = jacobi_elliptic(j as f64 * capk / nf, m);
        if s.abs() > EPSILON {
            let z = Complex64::new(0.0, 1.0 / (m.sqrt() * s));
            zeros.push(z);
            zeros.push(z.conj());
        }
        let p = -Complex64::new(c * d * sv * cv, s * dv) / (1.0 - (d * sv).powi(2));
        poles.push(p);
        if p.im.abs() > EPSILON * p.norm() {
            poles.push(p.conj());
        }
        j += 2;
    }

    let mut gain = (product(poles.iter().map(|p| -*p)) / product(zeros.iter().map(|z| -*z))).re;
    if n % 2 == 0 {
        gain /= (1.0 + eps_sq).sqrt();
    }
    Zpk { zeros, poles, gain }
}

/// `-n+1, -n+3, ..., n-1`
fn symmetric_indices(n: usize) -> impl Iterator<Item = f64> {
    (0..n).map(move |i| (2 * i) as f64 - n as f64 + 1.0)
}

fn product(values: impl Iterator<Item = Complex64>) -> Complex64 {
    values.fold(Complex64::new(1.0, 0.0), |acc, v| acc * v)
}

fn lowpass_to_lowpass(zpk: Zpk, wo: f64) -> Zpk {
    let degree = zpk.poles.len() - zpk.zeros.len();
    Zpk {
        zeros: zpk.zeros.iter().map(|z| *z * wo).collect(),
        poles: zpk.poles.iter().map(|p| *p * wo).collect(),
        gain: zpk.gain * wo.powi(degree as i32),
    }
}

fn bilinear(zpk: Zpk, fs2: f64) -> Zpk {
    let degree = zpk.poles.len() - zpk.zeros.len();
    let map = |s: &Complex64| (fs2 + *s) / (fs2 - *s);

    let mut zeros: Vec<Complex64> = zpk.zeros.iter().map(map).collect();
    zeros.extend(std::iter::repeat(Complex64::new(-1.0, 0.0)).take(degree));
    let poles = zpk.poles.iter().map(map).collect();

    let num = product(zpk.zeros.iter().map(|z| fs2 - *z));
    let den = product(zpk.poles.iter().map(|p| fs2 - *p));
    Zpk {
        zeros,
        poles,
        gain: zpk.gain * (num / den).re,
    }
}

// ---------------------------------------------------------------------------
// Second-order sections
// ---------------------------------------------------------------------------

/// Roots grouped into conjugate pairs, real pairs, or a lone real root.
fn root_groups(roots: &[Complex64]) -> Vec<Vec<Complex64>> {
    let is_real = |r: &Complex64| r.im.abs() <= 1e-9 * r.norm().max(1.0);

    let mut groups: Vec<Vec<Complex64>> = roots
        .iter()
        .filter(|r| !is_real(*r) && r.im > 0.0)
        .map(|r| vec![*r, r.conj()])
        .collect();

    let mut reals: Vec<Complex64> = roots
        .iter()
        .filter(|r| is_real(*r))
        .map(|r| Complex64::new(r.re, 0.0))
        .collect();
    reals.sort_by(|a, b| b.re.abs().total_cmp(&a.re.abs()));
    groups.extend(reals.chunks(2).map(|c| c.to_vec()));
    groups
}

fn poly(roots: &[Complex64]) -> [f64; 3] {
    match roots {
        [] => [1.0, 0.0, 0.0],
        [r] => [1.0, -r.re, 0.0],
        [r1, r2] => [1.0, -(*r1 + *r2).re, (*r1 * *r2).re],
        _ => unreachable!("groups hold at most two roots"),
    }
}

fn nearest_distance(group: &[Complex64], target: Complex64) -> f64 {
    group
        .iter()
        .map(|z| (*z - target).norm())
        .fold(f64::INFINITY, f64::min)
}

fn to_sections(zpk: Zpk) -> Vec<Section> {
    let mut pole_groups = root_groups(&zpk.poles);
    let mut zero_groups = root_groups(&zpk.zeros);

    // Poles closest to the unit circle pick their zeros first.
    let radius = |g: &Vec<Complex64>| g.iter().map(|p| p.norm()).fold(0.0, f64::max);
    pole_groups.sort_by(|a, b| radius(b).total_cmp(&radius(a)));

    let mut pairs: Vec<(Vec<Complex64>, Vec<Complex64>)> = Vec::with_capacity(pole_groups.len());

    // A lone real pole goes with a lone real zero when there is one.
    if let Some(pi) = pole_groups.iter().position(|g| g.len() == 1) {
        if let Some(zi) = zero_groups.iter().position(|g| g.len() == 1) {
            pairs.push((pole_groups.remove(pi), zero_groups.remove(zi)));
        }
    }

    for poles in pole_groups {
        let zeros = if zero_groups.is_empty() {
            Vec::new()
        } else {
            let best = zero_groups
                .iter()
                .enumerate()
                .map(|(i, g)| (i, nearest_distance(g, poles[0])))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(i, _)| i)
                .unwrap_or(0);
            zero_groups.remove(best)
        };
        pairs.push((poles, zeros));
    }

    // Farthest-from-circle sections run first.
    pairs.sort_by(|a, b| radius(&a.0).total_cmp(&radius(&b.0)));

    let mut sections: Vec<Section> = pairs
        .iter()
        .map(|(p, z)| Section {
            b: poly(z),
            a: poly(p),
        })
        .collect();
    if let Some(first) = sections.first_mut() {
        for b in &mut first.b {
            *b *= zpk.gain;
        }
    }
    sections
}

/// Complex response of the cascade at `freq` cycles per sample.
#[cfg(test)]
pub(crate) fn frequency_response(sections: &[Section], freq: f64) -> Complex64 {
    let z1 = Complex64::from_polar(1.0, -2.0 * PI * freq);
    let z2 = z1 * z1;
    product(sections.iter().map(|s| {
        (s.b[0] + z1 * s.b[1] + z2 * s.b[2]) / (s.a[0] + z1 * s.a[1] + z2 * s.a[2])
    }))
}

// ---------------------------------------------------------------------------
// Zero-phase application
// ---------------------------------------------------------------------------

/// Initial state per section for a unit step already at steady state.
fn steady_state(sections: &[Section]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sections
        .iter()
        .map(|s| {
            let g = s.dc_gain();
            let zi = [scale * (g - s.b[0]), scale * (s.b[2] - s.a[2] * g)];
            scale *= g;
            zi
        })
        .collect()
}

/// Cascade in transposed direct form II.
fn run_cascade(sections: &[Section], zi: &[[f64; 2]], x0: f64, input: &[f64]) -> Vec<f64> {
    let mut state: Vec<[f64; 2]> = zi.iter().map(|z| [z[0] * x0, z[1] * x0]).collect();
    input
        .iter()
        .map(|&x| {
            let mut v = x;
            for (s, z) in sections.iter().zip(state.iter_mut()) {
                let y = s.b[0] * v + z[0];
                z[0] = s.b[1] * v - s.a[1] * y + z[1];
                z[1] = s.b[2] * v - s.a[2] * y;
                v = y;
            }
            v
        })
        .collect()
}

/// Odd extension by `edge` samples on both sides.
fn odd_extend(x: &[f64], edge: usize) -> Vec<f64> {
    let n = x.len();
    let mut ext = Vec::with_capacity(n + 2 * edge);
    ext.extend((1..=edge).rev().map(|i| 2.0 * x[0] - x[i]));
    ext.extend_from_slice(x);
    ext.extend((1..=edge).map(|i| 2.0 * x[n - 1] - x[n - 1 - i]));
    ext
}

/// Forward-backward filtering: no phase shift, squared magnitude response.
/// `x` must be non-empty.
pub(crate) fn filtfilt(sections: &[Section], x: &[f64]) -> Vec<f64> {
    let n = x.len();
    let padlen = 3 * (2 * sections.len() + 1);
    let edge = padlen.min(n - 1);
    let zi = steady_state(sections);

    let ext = odd_extend(x, edge);
    let mut y = run_cascade(sections, &zi, ext[0], &ext);
    y.reverse();
    let mut y = run_cascade(sections, &zi, y[0], &y);
    y.reverse();
    y[edge..edge + n].to_vec()
}

// ---------------------------------------------------------------------------
// Elliptic integrals and functions
// ---------------------------------------------------------------------------

/// Carlson's symmetric integral R_F(x, y, z).
fn carlson_rf(x: f64, y: f64, z: f64) -> f64 {
    const ERRTOL: f64 = 0.0025;
    let (mut x, mut y, mut z) = (x, y, z);
    let mut avg;
    let mut dx;
    let mut dy;
    let mut dz;
    let mut iterations = 0;
    loop {
        let (sx, sy, sz) = (x.sqrt(), y.sqrt(), z.sqrt());
        let lambda = sx * (sy + sz) + sy * sz;
        x = 0.25 * (x + lambda);
        y = 0.25 * (y + lambda);
        z = 0.25 * (z + lambda);
        avg = (x + y + z) / 3.0;
        dx = (avg - x) / avg;
        dy = (avg - y) / avg;
        dz = (avg - z) / avg;
        iterations += 1;
        if dx.abs().max(dy.abs()).max(dz.abs()) <= ERRTOL || iterations >= 100 {
            break;
        }
    }
    let e2 = dx * dy - dz * dz;
    let e3 = dx * dy * dz;
    (1.0 + (e2 / 24.0 - 0.1 - 3.0 * e3 / 44.0) * e2 + e3 / 14.0) / avg.sqrt()
}

/// Complete elliptic integral of the first kind, parameter `m = k^2`.
fn complete_elliptic_k(m: f64) -> f64 {
    if m >= 1.0 {
        return f64::INFINITY;
    }
    carlson_rf(0.0, 1.0 - m, 1.0)
}

/// Incomplete elliptic integral F(phi | m) for `0 <= phi <= pi/2`.
fn incomplete_elliptic_f(phi: f64, m: f64) -> f64 {
    let (s, c) = phi.sin_cos();
    s * carlson_rf(c * c, 1.0 - m * s * s, 1.0)
}

/// Find `m` with `K(m) / K(1 - m) = ratio` by bisection; the ratio is
/// increasing in `m`.
fn solve_modulus_ratio(ratio: f64) -> f64 {
    let (mut lo, mut hi) = (0.0_f64, 1.0_f64);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if mid <= lo || mid >= hi {
            break;
        }
        let r = complete_elliptic_k(mid) / complete_elliptic_k(1.0 - mid);
        if r < ratio {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    0.5 * (lo + hi)
}

/// Jacobi elliptic functions `(sn, cn, dn)` of `u` with parameter `m`,
/// by the descending Landen / AGM recurrence.
fn jacobi_elliptic(u: f64, m: f64) -> (f64, f64, f64) {
    if m < 1e-9 {
        let (t, b) = u.sin_cos();
        let ai = 0.25 * m * (u - t * b);
        return (t - ai * b, b + ai * t, 1.0 - 0.5 * m * t * t);
    }
    if m >= 0.9999999999 {
        let mut ai = 0.25 * (1.0 - m);
        let b = u.cosh();
        let t = u.tanh();
        let phi = 1.0 / b;
        let twon = b * u.sinh();
        let sn = t + ai * (twon - u) / (b * b);
        ai *= t * phi;
        return (sn, phi - ai * (twon - u), phi + ai * (twon + u));
    }

    let mut a = [0.0f64; 10];
    let mut c = [0.0f64; 10];
    a[0] = 1.0;
    c[0] = m.sqrt();
    let mut b = (1.0 - m).sqrt();
    let mut twon = 1.0;
    let mut i = 0;
    while (c[i] / a[i]).abs() > EPSILON && i < 8 {
        let ai = a[i];
        i += 1;
        c[i] = 0.5 * (ai - b);
        let t = (ai * b).sqrt();
        a[i] = 0.5 * (ai + b);
        b = t;
        twon *= 2.0;
    }

    let mut phi = twon * a[i] * u;
    let mut prev = phi;
    while i > 0 {
        let t = c[i] * phi.sin() / a[i];
        prev = phi;
        phi = 0.5 * (t.asin() + phi);
        i -= 1;
    }
    let (sn, cn) = phi.sin_cos();
    (sn, cn, cn / (prev - phi).cos())
}
