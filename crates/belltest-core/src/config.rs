//! Experiment constants and analysis knobs.
//!
//! Defaults match the 2015 NIST loophole-free run layout: GPS sync on channel
//! 6, detector clicks on channel 0, RNG settings on channels 2 and 4, 90
//! pulses per trial and a sync period near 120 000 ticks.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Expected GPS-sync channel.
pub const DEFAULT_SYNC_CHANNEL: u8 = 6;
/// Sync phase tolerance, ±5 ticks = ±1.6 ns.
pub const DEFAULT_PHASE_TOLERANCE_TICKS: u64 = 5;
/// Plausible sync period range in ticks (inclusive).
pub const DEFAULT_PERIOD_RANGE: (u64, u64) = (100_000, 140_000);
/// Pulses per trial for 100 kHz data.
pub const DEFAULT_PULSES_PER_TRIAL: u32 = 90;
/// Phase-window radius as a fraction of the period.
pub const DEFAULT_RADIUS: f64 = 0.05;
/// Bins in the phase-peak histogram.
pub const DEFAULT_HISTOGRAM_BINS: usize = 400;
/// Detector slots 6..9 entering the CH counters.
pub const DEFAULT_SLOT_MASK: u16 = 0x03C0;

/// Which channels carry which signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelMap {
    pub sync: u8,
    pub detectors: Vec<u8>,
    /// RNG channel mapped to setting 1.
    pub setting_one: u8,
    /// RNG channel mapped to setting 2.
    pub setting_two: u8,
}

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            sync: DEFAULT_SYNC_CHANNEL,
            detectors: vec![0],
            setting_one: 2,
            setting_two: 4,
        }
    }
}

impl ChannelMap {
    pub fn is_detector(&self, channel: u8) -> bool {
        self.detectors.contains(&channel)
    }

    /// Setting encoded by an RNG channel, or `None` for any other channel.
    pub fn setting_of(&self, channel: u8) -> Option<u8> {
        if channel == self.setting_one {
            Some(1)
        } else if channel == self.setting_two {
            Some(2)
        } else {
            None
        }
    }
}

/// Complete configuration for the synchronization and aggregation stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub channels: ChannelMap,
    pub phase_tolerance_ticks: u64,
    pub period_range: (u64, u64),
    pub pulses_per_trial: u32,
    pub radius: f64,
    pub histogram_bins: usize,
    pub slot_mask: u16,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            channels: ChannelMap::default(),
            phase_tolerance_ticks: DEFAULT_PHASE_TOLERANCE_TICKS,
            period_range: DEFAULT_PERIOD_RANGE,
            pulses_per_trial: DEFAULT_PULSES_PER_TRIAL,
            radius: DEFAULT_RADIUS,
            histogram_bins: DEFAULT_HISTOGRAM_BINS,
            slot_mask: DEFAULT_SLOT_MASK,
        }
    }
}

impl AnalysisConfig {
    /// Load a (possibly partial) configuration from JSON; missing keys keep
    /// their defaults.
    pub fn from_json_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject out-of-range values before any data is touched.
    pub fn validate(&self) -> Result<()> {
        validate_radius(self.radius)?;
        let (lo, hi) = self.period_range;
        if lo == 0 || lo > hi {
            return Err(Error::InvalidConfig(format!(
                "period range [{lo}, {hi}] must be non-empty and positive"
            )));
        }
        if self.pulses_per_trial == 0 || self.pulses_per_trial > u16::MAX as u32 {
            return Err(Error::InvalidConfig(format!(
                "pulses per trial {} must lie in [1, 65535]",
                self.pulses_per_trial
            )));
        }
        if self.histogram_bins == 0 {
            return Err(Error::InvalidConfig(
                "histogram needs at least one bin".to_string(),
            ));
        }
        if self.slot_mask == 0 {
            return Err(Error::InvalidConfig("slot mask must not be zero".to_string()));
        }
        let ch = &self.channels;
        if ch.detectors.is_empty() {
            return Err(Error::InvalidConfig(
                "at least one detector channel is required".to_string(),
            ));
        }
        if ch.setting_one == ch.setting_two {
            return Err(Error::InvalidConfig(format!(
                "setting channels must differ (both {})",
                ch.setting_one
            )));
        }
        let roles = [ch.sync, ch.setting_one, ch.setting_two];
        let sync_clash = ch.sync == ch.setting_one || ch.sync == ch.setting_two;
        if sync_clash || ch.detectors.iter().any(|d| roles.contains(d)) {
            return Err(Error::InvalidConfig(
                "sync, detector and setting channels must be distinct".to_string(),
            ));
        }
        Ok(())
    }
}

/// Check the phase-window radius lies in the open interval (0, 0.5).
pub fn validate_radius(radius: f64) -> Result<()> {
    if radius > 0.0 && radius < 0.5 {
        Ok(())
    } else {
        Err(Error::InvalidRadius(radius))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        AnalysisConfig::default().validate().unwrap();
    }

    #[test]
    fn test_radius_bounds() {
        assert!(validate_radius(0.05).is_ok());
        assert!(validate_radius(0.4999).is_ok());
        for bad in [0.0, 0.5, -0.1, 1.0, f64::NAN] {
            assert!(matches!(validate_radius(bad), Err(Error::InvalidRadius(_))));
        }
    }

    #[test]
    fn test_pk_must_fit_u16() {
        let cfg = AnalysisConfig {
            pulses_per_trial: 70_000,
            ..Default::default()
        };
        assert!(matches!(cfg.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_channel_roles_distinct() {
        let mut cfg = AnalysisConfig::default();
        cfg.channels.detectors = vec![0, 6];
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_setting_of() {
        let ch = ChannelMap::default();
        assert_eq!(ch.setting_of(2), Some(1));
        assert_eq!(ch.setting_of(4), Some(2));
        assert_eq!(ch.setting_of(0), None);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.json");
        std::fs::write(&path, r#"{"radius": 0.03, "pulses_per_trial": 60}"#).unwrap();
        let cfg = AnalysisConfig::from_json_path(&path).unwrap();
        assert_eq!(cfg.radius, 0.03);
        assert_eq!(cfg.pulses_per_trial, 60);
        assert_eq!(cfg.channels.sync, DEFAULT_SYNC_CHANNEL);
        assert_eq!(cfg.period_range, DEFAULT_PERIOD_RANGE);
    }

    #[test]
    fn test_json_with_bad_radius_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.json");
        std::fs::write(&path, r#"{"radius": 0.7}"#).unwrap();
        assert!(matches!(
            AnalysisConfig::from_json_path(&path),
            Err(Error::InvalidRadius(_))
        ));
    }
}
