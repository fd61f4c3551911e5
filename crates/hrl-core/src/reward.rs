//! Terminal reward normalization

use serde::{Deserialize, Serialize};

/// How a raw terminal reward is collapsed before learning
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum RewardNormalization {
    /// `> 0` → +1.0, anything else → -1.0
    #[default]
    Binary,
    /// `> 0` → +1.0, `< 0` → -1.0, `0` → 0.0
    WinLossNeutral,
}

/// Episode result after normalization
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    Neutral,
}

impl RewardNormalization {
    pub fn normalize(&self, raw: f64) -> f64 {
        match self {
            RewardNormalization::Binary => {
                if raw > 0.0 {
                    1.0
                } else {
                    -1.0
                }
            }
            RewardNormalization::WinLossNeutral => {
                if raw > 0.0 {
                    1.0
                } else if raw < 0.0 {
                    -1.0
                } else {
                    0.0
                }
            }
        }
    }

    pub fn outcome(&self, raw: f64) -> Outcome {
        let normalized = self.normalize(raw);
        if normalized > 0.0 {
            Outcome::Win
        } else if normalized < 0.0 {
            Outcome::Loss
        } else {
            Outcome::Neutral
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_collapses_zero_to_loss() {
        let policy = RewardNormalization::Binary;
        assert_eq!(policy.normalize(3.5), 1.0);
        assert_eq!(policy.normalize(0.0), -1.0);
        assert_eq!(policy.normalize(-2.0), -1.0);
        assert_eq!(policy.outcome(0.0), Outcome::Loss);
    }

    #[test]
    fn test_three_way() {
        let policy = RewardNormalization::WinLossNeutral;
        assert_eq!(policy.normalize(0.0), 0.0);
        assert_eq!(policy.outcome(0.0), Outcome::Neutral);
        assert_eq!(policy.outcome(1.0), Outcome::Win);
        assert_eq!(policy.outcome(-0.1), Outcome::Loss);
    }

    #[test]
    fn test_normalization_is_idempotent() {
        for policy in [RewardNormalization::Binary, RewardNormalization::WinLossNeutral] {
            for raw in [-4.0, -1.0, 0.0, 0.5, 1.0] {
                let once = policy.normalize(raw);
                if once != 0.0 {
                    assert_eq!(policy.normalize(once), once);
                }
            }
        }
    }
}
