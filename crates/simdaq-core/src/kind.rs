//! Signal kinds: which read surface exposes a signal.

use serde::{Deserialize, Serialize};

/// Classification of a signal.
///
/// | kind      | `read()` | `read_configuration()` |
/// |-----------|----------|------------------------|
/// | `Normal`  | yes      | no                     |
/// | `Hinted`  | yes      | no                     |
/// | `Config`  | no       | yes                    |
/// | `Omitted` | no       | no                     |
///
/// `Hinted` marks the primary display quantity of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    #[default]
    Normal,
    Config,
    Hinted,
    Omitted,
}

impl Kind {
    /// Exposed by `read()`.
    pub fn is_read(self) -> bool {
        matches!(self, Kind::Normal | Kind::Hinted)
    }

    /// Exposed by `read_configuration()`.
    pub fn is_config(self) -> bool {
        self == Kind::Config
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Normal => "normal",
            Kind::Config => "config",
            Kind::Hinted => "hinted",
            Kind::Omitted => "omitted",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_surfaces_are_disjoint() {
        for kind in [Kind::Normal, Kind::Config, Kind::Hinted, Kind::Omitted] {
            assert!(!(kind.is_read() && kind.is_config()), "{kind:?}");
        }
        assert!(!Kind::Omitted.is_read());
        assert!(!Kind::Omitted.is_config());
    }

    #[test]
    fn test_kind_serde_lowercase() {
        let kind: Kind = serde_json::from_str("\"hinted\"").unwrap();
        assert_eq!(kind, Kind::Hinted);
        assert_eq!(serde_json::to_string(&Kind::Config).unwrap(), "\"config\"");
    }
}
