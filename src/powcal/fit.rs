//! Ordinary least squares polynomial regression.

use crate::error::{Error, Result};

/// Polynomial with coefficients in ascending powers of x.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial {
    coefficients: Vec<f64>,
}

impl Polynomial {
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn degree(&self) -> usize {
        self.coefficients.len().saturating_sub(1)
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.coefficients.iter().rev().fold(0.0, |acc, c| acc * x + c)
    }
}

/// Fit `y ≈ p(x)` of the given degree by least squares.
///
/// Solves the Vandermonde system with Householder QR. Fails with
/// `InsufficientData` when there are fewer than `degree + 1` points or the x
/// values cannot determine that many coefficients.
pub fn polyfit(x: &[f64], y: &[f64], degree: usize) -> Result<Polynomial> {
    if x.len() != y.len() {
        return Err(Error::InsufficientData(format!(
            "{} x values but {} y values",
            x.len(),
            y.len()
        )));
    }

    let rows = x.len();
    let cols = degree + 1;
    if rows < cols {
        return Err(Error::InsufficientData(format!(
            "degree {degree} fit needs at least {cols} points, got {rows}"
        )));
    }

    // Column-major Vandermonde matrix.
    let mut a: Vec<Vec<f64>> = (0..cols)
        .map(|power| x.iter().map(|xi| xi.powi(power as i32)).collect())
        .collect();
    let mut b = y.to_vec();

    let scale = a
        .iter()
        .flat_map(|column| column.iter())
        .fold(0.0_f64, |acc, v| acc.max(v.abs()))
        .max(1.0);
    let rank_tolerance = scale * rows as f64 * f64::EPSILON * 1e3;

    for k in 0..cols {
        let norm = a[k][k..].iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm <= rank_tolerance {
            return Err(Error::InsufficientData(format!(
                "x values only determine {k} of {cols} coefficients"
            )));
        }

        let alpha = if a[k][k] > 0.0 { -norm } else { norm };
        let mut v: Vec<f64> = a[k][k..].to_vec();
        v[0] -= alpha;
        let v_norm_sq: f64 = v.iter().map(|vi| vi * vi).sum();

        if v_norm_sq > 0.0 {
            for column in a.iter_mut().skip(k) {
                reflect(&v, v_norm_sq, &mut column[k..]);
            }
            reflect(&v, v_norm_sq, &mut b[k..]);
        }
    }

    // Back substitution on the upper triangle.
    let mut coefficients = vec![0.0; cols];
    for i in (0..cols).rev() {
        let tail: f64 = (i + 1..cols).map(|j| a[j][i] * coefficients[j]).sum();
        coefficients[i] = (b[i] - tail) / a[i][i];
    }

    Ok(Polynomial { coefficients })
}

/// Apply `I - 2 v vᵀ / (vᵀv)` to `target` in place.
fn reflect(v: &[f64], v_norm_sq: f64, target: &mut [f64]) {
    let dot: f64 = v.iter().zip(target.iter()).map(|(vi, ti)| vi * ti).sum();
    let factor = 2.0 * dot / v_norm_sq;
    for (ti, vi) in target.iter_mut().zip(v) {
        *ti -= factor * vi;
    }
}
