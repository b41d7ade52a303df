//! Transparency score decay.
//!
//! How a lot's own score is discounted as it travels through transformation
//! hops is a policy decision, so it is pluggable: the tracer only sees the
//! [`DecayPolicy`] trait.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub const MIN_SCORE: f64 = 0.0;
pub const MAX_SCORE: f64 = 100.0;

/// Discount applied to a hop's own score.
pub trait DecayPolicy: Send + Sync {
    /// Score of a hop reached through `transformations` transformative hops.
    fn apply(&self, score: f64, transformations: u32) -> f64;

    fn name(&self) -> &'static str;
}

/// `score * factor^n`.
#[derive(Clone, Debug)]
pub struct MultiplicativeDecay {
    pub factor: f64,
}

impl DecayPolicy for MultiplicativeDecay {
    fn apply(&self, score: f64, transformations: u32) -> f64 {
        clamp_score(score * self.factor.powi(transformations as i32))
    }

    fn name(&self) -> &'static str {
        "multiplicative"
    }
}

/// `score - step * n`, floored at 0.
#[derive(Clone, Debug)]
pub struct LinearDecay {
    pub step: f64,
}

impl DecayPolicy for LinearDecay {
    fn apply(&self, score: f64, transformations: u32) -> f64 {
        clamp_score(score - self.step * f64::from(transformations))
    }

    fn name(&self) -> &'static str {
        "linear"
    }
}

#[derive(Clone, Debug)]
pub struct NoDecay;

impl DecayPolicy for NoDecay {
    fn apply(&self, score: f64, _transformations: u32) -> f64 {
        clamp_score(score)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}

/// Serializable choice of decay policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DecayConfig {
    Multiplicative {
        #[serde(default = "default_factor")]
        factor: f64,
    },
    Linear {
        #[serde(default = "default_step")]
        step: f64,
    },
    None,
}

impl Default for DecayConfig {
    fn default() -> Self {
        DecayConfig::Multiplicative {
            factor: default_factor(),
        }
    }
}

impl DecayConfig {
    pub fn build(&self) -> Arc<dyn DecayPolicy> {
        match self {
            DecayConfig::Multiplicative { factor } => Arc::new(MultiplicativeDecay {
                factor: factor.clamp(0.0, 1.0),
            }),
            DecayConfig::Linear { step } => Arc::new(LinearDecay { step: step.max(0.0) }),
            DecayConfig::None => Arc::new(NoDecay),
        }
    }
}

fn default_factor() -> f64 {
    0.9
}

fn default_step() -> f64 {
    5.0
}

pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        return MIN_SCORE;
    }
    score.clamp(MIN_SCORE, MAX_SCORE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiplicative_compounds_per_hop() {
        let policy = MultiplicativeDecay { factor: 0.9 };
        assert_eq!(policy.apply(80.0, 0), 80.0);
        assert!((policy.apply(80.0, 2) - 64.8).abs() < 1e-9);
    }

    #[test]
    fn linear_floors_at_zero() {
        let policy = LinearDecay { step: 30.0 };
        assert_eq!(policy.apply(50.0, 1), 20.0);
        assert_eq!(policy.apply(50.0, 4), 0.0);
    }

    #[test]
    fn default_config_is_multiplicative() {
        let policy = DecayConfig::default().build();
        assert_eq!(policy.name(), "multiplicative");
    }

    #[test]
    fn config_is_tagged_by_type() {
        let cfg: DecayConfig =
            serde_json::from_value(serde_json::json!({"type": "linear", "step": 2.5})).unwrap();
        assert_eq!(cfg, DecayConfig::Linear { step: 2.5 });
        let cfg: DecayConfig = serde_json::from_value(serde_json::json!({"type": "none"})).unwrap();
        assert_eq!(cfg.build().apply(150.0, 3), 100.0);
    }
}
