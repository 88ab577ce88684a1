use std::fmt;

use serde::Deserialize;

/// A named feature toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Feature {
    Basal = 0,
    Bolus = 1,
    BolusBg = 2,
    Cgm = 3,
    CgmAlerts = 4,
    PumpEvents = 5,
    Profiles = 6,
}

/// Number of Feature variants, used for array sizing.
pub const FEATURE_CARDINALITY: usize = 7;

/// Features enabled when configuration does not list any.
pub const DEFAULT_FEATURES: &[Feature] = &[Feature::Basal, Feature::Bolus, Feature::PumpEvents];

impl Feature {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Basal => "BASAL",
            Self::Bolus => "BOLUS",
            Self::BolusBg => "BOLUS_BG",
            Self::Cgm => "CGM",
            Self::CgmAlerts => "CGM_ALERTS",
            Self::PumpEvents => "PUMP_EVENTS",
            Self::Profiles => "PROFILES",
        }
    }

    pub fn all() -> &'static [Self] {
        &[
            Self::Basal,
            Self::Bolus,
            Self::BolusBg,
            Self::Cgm,
            Self::CgmAlerts,
            Self::PumpEvents,
            Self::Profiles,
        ]
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable set of enabled features.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Features {
    enabled: [bool; FEATURE_CARDINALITY],
}

impl Features {
    pub fn new(features: &[Feature]) -> Self {
        let mut enabled = [false; FEATURE_CARDINALITY];
        for f in features {
            if let Some(slot) = enabled.get_mut(*f as usize) {
                *slot = true;
            }
        }
        Self { enabled }
    }

    pub fn contains(&self, feature: Feature) -> bool {
        self.enabled.get(feature as usize).copied().unwrap_or(false)
    }

    /// Enabled features in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::all().iter().copied().filter(|f| self.contains(*f))
    }
}

impl fmt::Debug for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter().map(Feature::as_str)).finish()
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Feature::as_str).collect();
        f.write_str(&names.join(","))
    }
}
