use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Single point of a stability curve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DevPoint {
    /// Averaging time (seconds).
    pub tau: f64,
    /// Modified deviation at `tau`.
    #[serde(rename = "MDEV")]
    pub mdev: f64,
    /// Time deviation at `tau`.
    #[serde(rename = "TDEV")]
    pub tdev: f64,
}

/// Noise type identified from the slope of a modified deviation curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoiseType {
    WhitePhase,
    FlickerPhase,
    WhiteFrequency,
    FlickerFrequency,
    RandomWalkFrequency,
    Unknown,
}

/// Generate the averaging factors evaluated for a series of `n_vals` samples.
///
/// Starts at 1 and grows as `floor(step_factor * m) + 1` while `3 * m <= n_vals`.
pub fn averaging_factors(n_vals: usize, step_factor: f64) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut m = 1;
    while 3 * m <= n_vals {
        factors.push(m);
        m = (step_factor * m as f64).floor() as usize + 1;
    }
    factors
}

/// Compute the modified deviation for averaging factor `m`.
///
/// Returns `None` when the series is too short for `m`.
pub fn compute_mdev(vals: &[f64], m: usize, tau0: f64) -> Option<f64> {
    if m == 0 || 3 * m > vals.len() {
        return None;
    }
    let n_max = vals.len() - 3 * m + 1;

    let mut diff_2_sum = 0.0;
    for i in 0..n_max {
        let s1: f64 = vals[i..i + m].iter().sum();
        let s2: f64 = vals[i + m..i + 2 * m].iter().sum();
        let s3: f64 = vals[i + 2 * m..i + 3 * m].iter().sum();
        diff_2_sum += (s3 - 2.0 * s2 + s1).powi(2);
    }

    let m = m as f64;
    Some((diff_2_sum / (2.0 * m * m * tau0 * tau0 * n_max as f64)).sqrt())
}

/// Derive the time deviation from a modified deviation at averaging time `tau`.
pub fn compute_tdev(tau: f64, mdev: f64) -> f64 {
    tau * mdev / 3.0_f64.sqrt()
}

/// Compute the MDEV/TDEV curve of a series.
///
/// # Errors
/// Returns an error if the sampling interval is not positive,
/// a sample is not finite, or a deviation overflows.
pub fn compute_curve(vals: &[f64], tau0: f64, step_factor: f64) -> Result<Vec<DevPoint>> {
    if !(tau0 > 0.0 && tau0.is_finite()) {
        bail!("sampling interval must be positive and finite, but is {tau0}");
    }
    if let Some(idx) = vals.iter().position(|val| !val.is_finite()) {
        bail!("sample {idx} is not finite");
    }

    let mut points = Vec::new();
    for m in averaging_factors(vals.len(), step_factor) {
        let Some(mdev) = compute_mdev(vals, m, tau0) else {
            continue;
        };
        if !mdev.is_finite() {
            bail!("modified deviation for m = {m} is not finite");
        }
        let tau = m as f64 * tau0;
        points.push(DevPoint {
            tau,
            mdev,
            tdev: compute_tdev(tau, mdev),
        });
    }
    Ok(points)
}

/// Compute the least-squares slope of `log(mdev)` versus `log(tau)`.
///
/// Only points with positive coordinates contribute.
/// Returns `None` with fewer than 3 such points.
pub fn compute_log_slope(points: &[DevPoint]) -> Option<f64> {
    let logs: Vec<_> = points
        .iter()
        .filter(|p| p.tau > 0.0 && p.mdev > 0.0)
        .map(|p| (p.tau.ln(), p.mdev.ln()))
        .collect();
    if logs.len() < 3 {
        return None;
    }

    let n = logs.len() as f64;
    let mean_x = logs.iter().map(|(x, _)| x).sum::<f64>() / n;
    let mean_y = logs.iter().map(|(_, y)| y).sum::<f64>() / n;
    let (mut num, mut den) = (0.0, 0.0);
    for (x, y) in &logs {
        num += (x - mean_x) * (y - mean_y);
        den += (x - mean_x).powi(2);
    }
    if den > 0.0 { Some(num / den) } else { None }
}

/// Classify a modified deviation slope.
///
/// [`compute_mdev`] normalizes window sums by `tau0` rather than window means by `tau`,
/// which scales the textbook deviation by `m`. Slopes are therefore one unit above the
/// textbook values: white phase -1/2, flicker phase 0, white frequency +1/2,
/// flicker frequency +1 and random walk frequency +3/2.
pub fn identify_noise_type(slope: Option<f64>) -> NoiseType {
    match slope {
        None => NoiseType::Unknown,
        Some(s) if s < -0.25 => NoiseType::WhitePhase,
        Some(s) if s < 0.25 => NoiseType::FlickerPhase,
        Some(s) if s < 0.75 => NoiseType::WhiteFrequency,
        Some(s) if s < 1.25 => NoiseType::FlickerFrequency,
        Some(_) => NoiseType::RandomWalkFrequency,
    }
}
