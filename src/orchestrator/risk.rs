//! Risk-based deceleration of the fusion top-K

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub enabled: bool,

    /// Risk at or above this shrinks top-K the most (default: 70)
    pub high_threshold: u8,
    pub high_factor: f64,

    /// Risk at or above this shrinks top-K a little (default: 40)
    pub medium_threshold: u8,
    pub medium_factor: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            high_threshold: 70,
            high_factor: 0.6,
            medium_threshold: 40,
            medium_factor: 0.8,
        }
    }
}

/// Shrink `base` by the factor matching `risk`; never below 1 unless
/// `base` itself is 0
pub fn decelerate_top_k(base: usize, risk: u8, config: &RiskConfig) -> usize {
    if !config.enabled || base <= 1 {
        return base;
    }

    let factor = if risk >= config.high_threshold {
        config.high_factor
    } else if risk >= config.medium_threshold {
        config.medium_factor
    } else {
        return base;
    };

    let factor = if factor.is_finite() {
        factor.clamp(0.0, 1.0)
    } else {
        1.0
    };
    ((base as f64 * factor).floor() as usize).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thresholds() {
        let c = RiskConfig::default();
        assert_eq!(decelerate_top_k(10, 0, &c), 10);
        assert_eq!(decelerate_top_k(10, 39, &c), 10);
        assert_eq!(decelerate_top_k(10, 40, &c), 8);
        assert_eq!(decelerate_top_k(10, 69, &c), 8);
        assert_eq!(decelerate_top_k(10, 70, &c), 6);
        assert_eq!(decelerate_top_k(10, 100, &c), 6);
    }

    #[test]
    fn test_small_bases() {
        let c = RiskConfig::default();
        assert_eq!(decelerate_top_k(0, 100, &c), 0);
        assert_eq!(decelerate_top_k(1, 100, &c), 1);
        assert_eq!(decelerate_top_k(2, 100, &c), 1);
        assert_eq!(decelerate_top_k(5, 100, &c), 3);
    }

    #[test]
    fn test_disabled() {
        let c = RiskConfig {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(decelerate_top_k(10, 100, &c), 10);
    }
}
