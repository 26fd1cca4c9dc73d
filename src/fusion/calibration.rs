//! Score calibration into [0, 1]

use serde::{Deserialize, Serialize};

/// Monotone calibration of a raw source score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ScoreCalibrator {
    /// Pass-through, clamped
    Identity,

    /// `clamp(a·x + b, 0, 1)`
    Linear { a: f64, b: f64 },

    /// Three linear segments through (0,0), (x1,y1), (x2,y2), (1,1)
    Piecewise { x1: f64, y1: f64, x2: f64, y2: f64 },

    /// `σ(λ(α + βx + γ·tanh(x − d₀) − μ))`
    Sigmoid {
        alpha: f64,
        beta: f64,
        gamma: f64,
        d0: f64,
        mu: f64,
        lambda: f64,
    },
}

impl Default for ScoreCalibrator {
    fn default() -> Self {
        ScoreCalibrator::Piecewise {
            x1: 0.3,
            y1: 0.15,
            x2: 0.7,
            y2: 0.85,
        }
    }
}

impl ScoreCalibrator {
    /// Calibrate one score. NaN maps to 0; the result is always in [0, 1].
    pub fn calibrate(&self, x: f64) -> f64 {
        if x.is_nan() {
            return 0.0;
        }

        let y = match self {
            ScoreCalibrator::Identity => x,
            ScoreCalibrator::Linear { a, b } => a * x + b,
            ScoreCalibrator::Piecewise { x1, y1, x2, y2 } => piecewise(x, *x1, *y1, *x2, *y2),
            ScoreCalibrator::Sigmoid {
                alpha,
                beta,
                gamma,
                d0,
                mu,
                lambda,
            } => {
                let z = alpha + beta * x + gamma * (x - d0).tanh();
                sigmoid(lambda * (z - mu))
            }
        };

        clamp01(y)
    }
}

fn piecewise(x: f64, x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    let x = clamp01(x);

    // Sanitize knots so the curve stays monotone
    let x1 = clamp01(x1);
    let x2 = clamp01(x2).max(x1);
    let y1 = clamp01(y1);
    let y2 = clamp01(y2).max(y1);

    if x <= x1 {
        lerp(x, 0.0, 0.0, x1, y1)
    } else if x <= x2 {
        lerp(x, x1, y1, x2, y2)
    } else {
        lerp(x, x2, y2, 1.0, 1.0)
    }
}

fn lerp(x: f64, x0: f64, y0: f64, x1: f64, y1: f64) -> f64 {
    let dx = x1 - x0;
    if dx <= f64::EPSILON {
        return y1;
    }
    y0 + (x - x0) * (y1 - y0) / dx
}

fn sigmoid(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    if value > 30.0 {
        return 1.0;
    }
    if value < -30.0 {
        return 0.0;
    }
    1.0 / (1.0 + (-value).exp())
}

pub(crate) fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
