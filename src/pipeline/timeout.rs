//! Per-call deadline estimation.
//!
//! The deadline scales with the amount of work in the request and with the
//! hardware: a CPU-only model is an order of magnitude slower than a GPU.
//! It is a single deadline per call, not a retry budget; the resolution
//! ladder decides what happens after it expires.

use crate::error::DocExtractError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Largest accepted `base_secs` / `max_secs`: 30 days.
pub const MAX_TIMEOUT_SECS: f64 = 30.0 * 24.0 * 3600.0;

/// Largest accepted `cpu_multiplier`.
pub const MAX_CPU_MULTIPLIER: f64 = 1000.0;

/// Inputs of [`estimate`] that come from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeoutSettings {
    /// Seconds granted per page per window. Default: 1800.
    #[serde(default = "default_base_secs")]
    pub base_secs: f64,
    /// Upper bound in seconds. Default: 14400 (4 h).
    #[serde(default = "default_max_secs")]
    pub max_secs: f64,
    /// Factor applied on CPU-only backends. Default: 2.0.
    #[serde(default = "default_cpu_multiplier")]
    pub cpu_multiplier: f64,
    /// Treat the backend as CPU-only regardless of what it reports.
    #[serde(default)]
    pub force_cpu: bool,
}

fn default_base_secs() -> f64 {
    1800.0
}
fn default_max_secs() -> f64 {
    14400.0
}
fn default_cpu_multiplier() -> f64 {
    2.0
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            base_secs: default_base_secs(),
            max_secs: default_max_secs(),
            cpu_multiplier: default_cpu_multiplier(),
            force_cpu: false,
        }
    }
}

impl TimeoutSettings {
    /// Reject values that cannot become a [`Duration`].
    pub fn validate(&self) -> Result<(), DocExtractError> {
        let secs = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 && v <= MAX_TIMEOUT_SECS {
                Ok(())
            } else {
                Err(DocExtractError::InvalidConfig(format!(
                    "timeout.{name} must be in (0, {MAX_TIMEOUT_SECS}] seconds, got {v}"
                )))
            }
        };
        secs("base_secs", self.base_secs)?;
        secs("max_secs", self.max_secs)?;
        if !(self.cpu_multiplier.is_finite()
            && self.cpu_multiplier > 0.0
            && self.cpu_multiplier <= MAX_CPU_MULTIPLIER)
        {
            return Err(DocExtractError::InvalidConfig(format!(
                "timeout.cpu_multiplier must be in (0, {MAX_CPU_MULTIPLIER}], got {}",
                self.cpu_multiplier
            )));
        }
        Ok(())
    }

    /// Deadline for one call. Unrepresentable settings fall back to
    /// [`MAX_TIMEOUT_SECS`].
    pub fn deadline(&self, pages: usize, windows: usize, is_cpu: bool) -> Duration {
        let fallback = Duration::from_secs_f64(MAX_TIMEOUT_SECS);
        let max = Duration::try_from_secs_f64(self.max_secs)
            .map(|d| d.min(fallback))
            .unwrap_or(fallback);
        let base = Duration::try_from_secs_f64(self.base_secs).unwrap_or(max);
        estimate(base, pages, windows, is_cpu || self.force_cpu, self.cpu_multiplier, max)
    }
}

/// `min(base × pages × windows × (multiplier if CPU), max)`.
///
/// Page and window counts below 1 count as 1 and multipliers below 1.0 as
/// 1.0, so the result is monotone non-decreasing in every input.
pub fn estimate(
    base: Duration,
    pages: usize,
    windows: usize,
    is_cpu: bool,
    cpu_multiplier: f64,
    max: Duration,
) -> Duration {
    let mut secs = base.as_secs_f64() * pages.max(1) as f64 * windows.max(1) as f64;
    if is_cpu && cpu_multiplier.is_finite() {
        secs *= cpu_multiplier.max(1.0);
    }
    let capped = secs.min(max.as_secs_f64());
    if capped.is_finite() && capped >= 0.0 {
        Duration::from_secs_f64(capped)
    } else {
        max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: Duration = Duration::from_secs(1800);
    const MAX: Duration = Duration::from_secs(14400);

    #[test]
    fn single_page_vertical_gpu() {
        assert_eq!(estimate(BASE, 1, 2, false, 2.0, MAX), Duration::from_secs(3600));
    }

    #[test]
    fn cpu_multiplier_applies_then_caps() {
        assert_eq!(estimate(BASE, 1, 2, true, 2.0, MAX), Duration::from_secs(7200));
        assert_eq!(estimate(BASE, 3, 4, true, 2.0, MAX), MAX);
    }

    #[test]
    fn monotone_and_bounded() {
        let mut prev = Duration::ZERO;
        for pages in 0..6 {
            for windows in 0..5 {
                let gpu = estimate(BASE, pages, windows, false, 2.0, MAX);
                let cpu = estimate(BASE, pages, windows, true, 2.0, MAX);
                assert!(cpu >= gpu);
                assert!(cpu <= MAX && gpu <= MAX);
                assert!(estimate(BASE, pages + 1, windows, false, 2.0, MAX) >= gpu);
                assert!(estimate(BASE, pages, windows + 1, false, 2.0, MAX) >= gpu);
            }
            let row = estimate(BASE, pages, 1, false, 2.0, MAX);
            assert!(row >= prev);
            prev = row;
        }
    }

    #[test]
    fn sub_unit_multiplier_never_shortens() {
        assert_eq!(
            estimate(BASE, 1, 1, true, 0.5, MAX),
            estimate(BASE, 1, 1, false, 0.5, MAX)
        );
    }

    #[test]
    fn settings_honour_force_cpu() {
        let settings = TimeoutSettings {
            force_cpu: true,
            ..Default::default()
        };
        assert_eq!(settings.deadline(1, 1, false), Duration::from_secs(3600));
    }

    #[test]
    fn validate_rejects_unrepresentable_values() {
        for bad in [
            TimeoutSettings { base_secs: 1.0e20, ..Default::default() },
            TimeoutSettings { max_secs: f64::INFINITY, ..Default::default() },
            TimeoutSettings { base_secs: f64::NAN, ..Default::default() },
            TimeoutSettings { max_secs: -1.0, ..Default::default() },
            TimeoutSettings { cpu_multiplier: f64::INFINITY, ..Default::default() },
        ] {
            assert!(
                matches!(bad.validate(), Err(DocExtractError::InvalidConfig(_))),
                "{bad:?} accepted"
            );
        }
        assert!(TimeoutSettings::default().validate().is_ok());
    }

    #[test]
    fn deadline_never_panics_on_huge_values() {
        let settings = TimeoutSettings {
            base_secs: 1.0e20,
            max_secs: f64::INFINITY,
            ..Default::default()
        };
        assert_eq!(
            settings.deadline(2, 4, true),
            Duration::from_secs_f64(MAX_TIMEOUT_SECS)
        );
    }
}
