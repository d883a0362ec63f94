//! License tiers.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::DomainError;

/// Ordered license level. Each tier unlocks everything the tiers below it unlock.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Premium,
    Business,
    Agency,
}

impl Tier {
    /// All tiers in ascending order.
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Premium, Tier::Business, Tier::Agency];

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Premium => "premium",
            Tier::Business => "business",
            Tier::Agency => "agency",
        }
    }

    /// Human-facing name shown in license views.
    pub fn display_name(self) -> &'static str {
        match self {
            Tier::Free => "Free",
            Tier::Premium => "Premium",
            Tier::Business => "Business",
            Tier::Agency => "Agency",
        }
    }

    /// Tiers at or above `self`.
    pub fn and_above(self) -> impl Iterator<Item = Tier> {
        Tier::ALL.into_iter().filter(move |tier| *tier >= self)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Tier::Free),
            "premium" => Ok(Tier::Premium),
            "business" => Ok(Tier::Business),
            "agency" => Ok(Tier::Agency),
            other => Err(DomainError::validation(format!("unknown tier `{other}`"))),
        }
    }
}
