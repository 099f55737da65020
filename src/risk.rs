use std::fmt;

use serde::Serialize;

use crate::error::{Result, TimelineError};

/// Traffic-light band for a predicted graduation probability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskBand {
    /// Likely to graduate (green).
    Favorable,
    /// Borderline (yellow).
    Borderline,
    /// Unlikely to graduate (red).
    Unfavorable,
}

impl RiskBand {
    pub fn color(&self) -> &'static str {
        match self {
            RiskBand::Favorable => "green",
            RiskBand::Borderline => "yellow",
            RiskBand::Unfavorable => "red",
        }
    }
}

impl fmt::Display for RiskBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RiskBand::Favorable => "favorable",
            RiskBand::Borderline => "borderline",
            RiskBand::Unfavorable => "unfavorable",
        };
        write!(f, "{label} ({})", self.color())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RiskThresholds {
    pub favorable: f64,
    pub borderline: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            favorable: 0.70,
            borderline: 0.40,
        }
    }
}

impl RiskThresholds {
    pub fn new(favorable: f64, borderline: f64) -> Result<Self> {
        let in_unit = |value: f64| (0.0..=1.0).contains(&value);
        if !in_unit(favorable) || !in_unit(borderline) {
            return Err(TimelineError::InvalidThresholds(format!(
                "thresholds must lie in [0, 1], got favorable={favorable} borderline={borderline}"
            )));
        }
        if borderline > favorable {
            return Err(TimelineError::InvalidThresholds(format!(
                "borderline {borderline} exceeds favorable {favorable}"
            )));
        }
        Ok(Self {
            favorable,
            borderline,
        })
    }

    pub fn classify(&self, probability: f64) -> RiskBand {
        if probability >= self.favorable {
            RiskBand::Favorable
        } else if probability >= self.borderline {
            RiskBand::Borderline
        } else {
            RiskBand::Unfavorable
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_follow_default_tiers() {
        let thresholds = RiskThresholds::default();
        assert_eq!(thresholds.classify(0.95), RiskBand::Favorable);
        assert_eq!(thresholds.classify(0.70), RiskBand::Favorable);
        assert_eq!(thresholds.classify(0.69), RiskBand::Borderline);
        assert_eq!(thresholds.classify(0.40), RiskBand::Borderline);
        assert_eq!(thresholds.classify(0.39), RiskBand::Unfavorable);
        assert_eq!(thresholds.classify(0.0), RiskBand::Unfavorable);
    }

    #[test]
    fn custom_thresholds_shift_bands() {
        let thresholds = RiskThresholds::new(0.9, 0.5).unwrap();
        assert_eq!(thresholds.classify(0.8), RiskBand::Borderline);
        assert_eq!(thresholds.classify(0.45), RiskBand::Unfavorable);
    }

    #[test]
    fn rejects_out_of_order_or_out_of_range_thresholds() {
        assert!(RiskThresholds::new(0.3, 0.6).is_err());
        assert!(RiskThresholds::new(1.5, 0.4).is_err());
        assert!(RiskThresholds::new(0.7, -0.1).is_err());
    }

    #[test]
    fn display_includes_color() {
        assert_eq!(RiskBand::Borderline.to_string(), "borderline (yellow)");
    }
}
