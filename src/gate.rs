//! Version Gate
//!
//! Maps a platform version and a feature to enabled/disabled. Versions are
//! compared on parsed integers, so `1.9` sorts below `1.17`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Version Info
// =============================================================================

/// Major/minor version of the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionInfo {
    pub major: u32,
    pub minor: u32,
}

impl VersionInfo {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Build from the fields reported by the version endpoint
    ///
    /// Providers append markers to the minor version (`"17+"`); only the
    /// leading digits count. When major/minor are empty the git version
    /// (`v1.17.3-gke.1`) is parsed instead.
    pub fn from_parts(major: &str, minor: &str, git_version: &str) -> Result<Self> {
        match (leading_number(major), leading_number(minor)) {
            (Some(major), Some(minor)) => Ok(Self { major, minor }),
            _ => Self::parse(git_version),
        }
    }

    /// Parse `v1.17`, `1.17.3`, `v1.29.1-eks-123`
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim().trim_start_matches('v');
        let mut parts = trimmed.split('.');
        let major = parts.next().and_then(leading_number);
        let minor = parts.next().and_then(leading_number);
        match (major, minor) {
            (Some(major), Some(minor)) => Ok(Self { major, minor }),
            _ => Err(Error::VersionParse(format!(
                "cannot parse platform version '{}'",
                input
            ))),
        }
    }
}

fn leading_number(part: &str) -> Option<u32> {
    let digits: String = part.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

impl fmt::Display for VersionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// =============================================================================
// Features
// =============================================================================

/// Platform features that gate scenario steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Resize,
    PvcClone,
    Snapshot,
}

impl Feature {
    /// Minimum platform version supporting the feature
    pub const fn minimum(&self) -> VersionInfo {
        match self {
            Feature::Resize => VersionInfo::new(1, 15),
            Feature::PvcClone => VersionInfo::new(1, 16),
            Feature::Snapshot => VersionInfo::new(1, 17),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Resize => write!(f, "resize"),
            Feature::PvcClone => write!(f, "pvc-clone"),
            Feature::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Whether `feature` is available on a platform at `version`
pub fn is_enabled(feature: Feature, version: &VersionInfo) -> bool {
    let gate = feature.minimum();
    version.major > gate.major || (version.major == gate.major && version.minor >= gate.minor)
}

/// Whether every feature in `features` is available
pub fn all_enabled(features: &[Feature], version: &VersionInfo) -> bool {
    features.iter().all(|feature| is_enabled(*feature, version))
}

// =============================================================================
// Gated Steps
// =============================================================================

/// Scenario steps that only run on sufficiently new platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GatedStep {
    CloneFromSnapshot,
    CloneFromClaim,
    Resize,
}

impl GatedStep {
    /// Features the step depends on
    pub fn features(&self) -> &'static [Feature] {
        match self {
            GatedStep::CloneFromSnapshot => &[Feature::Snapshot, Feature::PvcClone],
            GatedStep::CloneFromClaim => &[Feature::PvcClone],
            GatedStep::Resize => &[Feature::Resize],
        }
    }

    /// The highest minimum version among the step's features
    pub fn minimum(&self) -> VersionInfo {
        self.features()
            .iter()
            .map(Feature::minimum)
            .max_by_key(|v| (v.major, v.minor))
            .unwrap_or(VersionInfo::new(0, 0))
    }

    pub fn is_enabled(&self, version: &VersionInfo) -> bool {
        all_enabled(self.features(), version)
    }
}

impl fmt::Display for GatedStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatedStep::CloneFromSnapshot => write!(f, "ValidateClone(fromSnapshot=true)"),
            GatedStep::CloneFromClaim => write!(f, "ValidateClone(fromSnapshot=false)"),
            GatedStep::Resize => write!(f, "ValidateResize"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_not_lexical_comparison() {
        // "9" >= "17" holds lexically; numerically 1.9 predates 1.17
        assert!(!is_enabled(Feature::Snapshot, &VersionInfo::new(1, 9)));
        assert!(is_enabled(Feature::Snapshot, &VersionInfo::new(1, 17)));
        assert!(is_enabled(Feature::Snapshot, &VersionInfo::new(1, 29)));
        assert!(is_enabled(Feature::Resize, &VersionInfo::new(2, 0)));
        assert!(!is_enabled(Feature::Resize, &VersionInfo::new(0, 99)));
    }

    #[test]
    fn test_feature_boundaries() {
        assert!(!is_enabled(Feature::Resize, &VersionInfo::new(1, 14)));
        assert!(is_enabled(Feature::Resize, &VersionInfo::new(1, 15)));
        assert!(!is_enabled(Feature::PvcClone, &VersionInfo::new(1, 15)));
        assert!(is_enabled(Feature::PvcClone, &VersionInfo::new(1, 16)));
    }

    #[test]
    fn test_clone_from_snapshot_needs_highest_minimum() {
        let step = GatedStep::CloneFromSnapshot;
        assert_eq!(step.minimum(), VersionInfo::new(1, 17));
        assert!(!step.is_enabled(&VersionInfo::new(1, 16)));
        assert!(step.is_enabled(&VersionInfo::new(1, 17)));
        assert!(GatedStep::CloneFromClaim.is_enabled(&VersionInfo::new(1, 16)));
    }

    #[test]
    fn test_parse_reported_versions() {
        assert_eq!(
            VersionInfo::from_parts("1", "17+", "v1.17.3-gke.1").unwrap(),
            VersionInfo::new(1, 17)
        );
        assert_eq!(
            VersionInfo::from_parts("", "", "v1.29.1-eks-123").unwrap(),
            VersionInfo::new(1, 29)
        );
        assert_eq!(VersionInfo::parse("1.9.0").unwrap(), VersionInfo::new(1, 9));
        assert!(VersionInfo::parse("latest").is_err());
    }
}
