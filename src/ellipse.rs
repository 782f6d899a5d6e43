// src/ellipse.rs

use crate::error::{PcaError, Result, SkippedGroup};
use crate::stats::mean;
use log::{debug, warn};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Fewest points that give a usable 2×2 covariance.
pub const MIN_GROUP_SIZE: usize = 3;

/// Smallest-to-largest eigenvalue ratio below which a covariance is degenerate.
const DEGENERATE_RATIO: f64 = 1e-12;

/// A confidence ellipse in a two-component score plane.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipseParams {
    pub center_x: f64,
    pub center_y: f64,
    /// Semi-axis along the dominant direction.
    pub semi_major: f64,
    pub semi_minor: f64,
    /// Rotation of the major axis from the x axis, radians in (-π, π].
    pub angle: f64,
    pub confidence_level: f64,
    /// Number of points the ellipse was estimated from.
    pub n_points: usize,
}

impl EllipseParams {
    /// Whether `(x, y)` lies inside or on the ellipse.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let dx = x - self.center_x;
        let dy = y - self.center_y;
        let (sin, cos) = self.angle.sin_cos();
        let u = dx * cos + dy * sin;
        let v = -dx * sin + dy * cos;
        (u / self.semi_major).powi(2) + (v / self.semi_minor).powi(2) <= 1.0
    }
}

/// Ellipses that could be computed plus the groups that were skipped.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EllipseSet {
    pub ellipses: BTreeMap<String, EllipseParams>,
    pub skipped: Vec<SkippedGroup>,
}

impl EllipseSet {
    pub fn is_partial(&self) -> bool {
        !self.skipped.is_empty()
    }
}

/// Chi-square quantile with two degrees of freedom: `-2 ln(1 - p)`.
pub fn chi_square_2df(confidence_level: f64) -> f64 {
    -2.0 * (1.0 - confidence_level).ln()
}

#[derive(Debug, Clone, Copy)]
pub struct EllipseCalculator {
    confidence_level: f64,
}

impl EllipseCalculator {
    /// # Errors
    /// [`PcaError::Validation`] unless `0 < confidence_level < 1`. Typical
    /// levels are 0.90, 0.95 and 0.99.
    pub fn new(confidence_level: f64) -> Result<Self> {
        if !(confidence_level > 0.0 && confidence_level < 1.0) {
            return Err(PcaError::validation(
                "confidence level",
                format!("must lie strictly between 0 and 1, got {}", confidence_level),
            ));
        }
        Ok(Self { confidence_level })
    }

    /// Ellipse for a single set of points.
    ///
    /// # Errors
    /// [`PcaError::Data`] for fewer than three points or unequal lengths,
    /// [`PcaError::Numerical`] when the covariance is not positive definite.
    pub fn ellipse(&self, x: &[f64], y: &[f64]) -> Result<EllipseParams> {
        if x.len() != y.len() {
            return Err(PcaError::data(format!(
                "x and y lengths differ ({} vs {})",
                x.len(),
                y.len()
            )));
        }
        let n = x.len();
        if n < MIN_GROUP_SIZE {
            return Err(PcaError::data(format!(
                "{} point(s); at least {} are required",
                n, MIN_GROUP_SIZE
            )));
        }
        let cx = mean(x);
        let cy = mean(y);
        let dof = (n - 1) as f64;
        let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            sxx += (xi - cx) * (xi - cx);
            syy += (yi - cy) * (yi - cy);
            sxy += (xi - cx) * (yi - cy);
        }
        let (a, b, c) = (sxx / dof, sxy / dof, syy / dof);

        let half_trace = (a + c) / 2.0;
        let radius = (((a - c) / 2.0).powi(2) + b * b).sqrt();
        let major = half_trace + radius;
        let minor = half_trace - radius;
        if !(major > 0.0) || minor <= DEGENERATE_RATIO * major {
            return Err(PcaError::numerical(format!(
                "covariance is not positive definite (eigenvalues {:.3e}, {:.3e})",
                major, minor
            )));
        }

        let angle = if b.abs() > 0.0 {
            (major - a).atan2(b)
        } else if a >= c {
            0.0
        } else {
            std::f64::consts::FRAC_PI_2
        };
        let chi2 = chi_square_2df(self.confidence_level);
        Ok(EllipseParams {
            center_x: cx,
            center_y: cy,
            semi_major: (chi2 * major).sqrt(),
            semi_minor: (chi2 * minor).sqrt(),
            angle,
            confidence_level: self.confidence_level,
            n_points: n,
        })
    }

    /// One ellipse per group label over components `pc_x` and `pc_y` (0-based).
    ///
    /// Groups with too few points or a degenerate covariance are listed in
    /// [`EllipseSet::skipped`].
    ///
    /// # Errors
    /// [`PcaError::Validation`] for an out-of-range component,
    /// [`PcaError::Data`] when `groups` does not match the score rows, and
    /// [`PcaError::NoEllipses`] when every group was skipped.
    pub fn group_ellipses(
        &self,
        scores: &Array2<f64>,
        groups: &[String],
        pc_x: usize,
        pc_y: usize,
    ) -> Result<EllipseSet> {
        let n_components = scores.ncols();
        for (name, pc) in [("pc_x", pc_x), ("pc_y", pc_y)] {
            if pc >= n_components {
                return Err(PcaError::validation(
                    name,
                    format!("component {} out of range for {} component(s)", pc, n_components),
                ));
            }
        }
        if pc_x == pc_y {
            return Err(PcaError::validation(
                "pc_y",
                format!("must differ from pc_x (both are {})", pc_x),
            ));
        }
        if groups.len() != scores.nrows() {
            return Err(PcaError::data(format!(
                "{} group labels for {} score rows",
                groups.len(),
                scores.nrows()
            )));
        }

        let mut members: BTreeMap<&str, (Vec<f64>, Vec<f64>)> = BTreeMap::new();
        for (row, label) in scores.outer_iter().zip(groups) {
            let entry = members.entry(label.as_str()).or_default();
            entry.0.push(row[pc_x]);
            entry.1.push(row[pc_y]);
        }

        let mut set = EllipseSet::default();
        for (label, (x, y)) in members {
            match self.ellipse(&x, &y) {
                Ok(params) => {
                    set.ellipses.insert(label.to_string(), params);
                }
                Err(e) => {
                    debug!("Skipping ellipse for group '{}': {}", label, e);
                    set.skipped.push(SkippedGroup {
                        group: label.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        if set.ellipses.is_empty() {
            return Err(PcaError::NoEllipses {
                skipped: set.skipped,
            });
        }
        if set.is_partial() {
            warn!(
                "Computed {} ellipse(s); skipped {} group(s)",
                set.ellipses.len(),
                set.skipped.len()
            );
        }
        Ok(set)
    }
}
