//! Persisted license state and the effective-tier rule.

use serde::Serialize;
use time::{
    OffsetDateTime, PrimitiveDateTime, format_description::well_known::Rfc3339,
    macros::format_description,
};

use super::{options::OptionsSnapshot, settings::option_key, tier::Tier};

pub const LICENSE_KEY: &str = "license_key";
pub const LICENSE_STATUS: &str = "license_status";
pub const LICENSE_EXPIRES: &str = "license_expires";

/// The three license fields, always written and cleared together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LicenseState {
    pub key: String,
    pub tier: Tier,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl LicenseState {
    /// Read the license fields from an options snapshot.
    ///
    /// Every malformed field resolves to its safest reading: an unknown tier is
    /// `free` and an unreadable expiry is treated as already expired.
    pub fn from_snapshot(options: &OptionsSnapshot) -> Self {
        let key = options
            .text(&option_key(LICENSE_KEY))
            .map(|key| key.trim().to_string())
            .unwrap_or_default();

        let tier = options
            .text(&option_key(LICENSE_STATUS))
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(Tier::Free);

        let expires_at = match options.text(&option_key(LICENSE_EXPIRES)) {
            None => None,
            Some(raw) if raw.trim().is_empty() => None,
            Some(raw) => Some(parse_expiry(&raw).unwrap_or(OffsetDateTime::UNIX_EPOCH)),
        };

        Self {
            key,
            tier,
            expires_at,
        }
    }

    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }

    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }

    /// Empty key or a past expiry collapse to `free`; otherwise the stored tier.
    pub fn effective_tier_at(&self, now: OffsetDateTime) -> Tier {
        if !self.has_key() || self.is_expired_at(now) {
            return Tier::Free;
        }
        self.tier
    }

    /// The key with everything but its last four characters hidden.
    pub fn masked_key(&self) -> String {
        let chars: Vec<char> = self.key.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let visible: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{visible}", "*".repeat(chars.len() - 4))
    }
}

/// Parse a stored expiry. Accepts RFC 3339 and the `YYYY-MM-DD HH:MM:SS` form
/// (taken as UTC).
pub fn parse_expiry(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if let Ok(parsed) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(parsed);
    }
    let legacy = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    PrimitiveDateTime::parse(raw, legacy)
        .ok()
        .map(PrimitiveDateTime::assume_utc)
}

pub fn format_expiry(expires_at: OffsetDateTime) -> String {
    expires_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| expires_at.unix_timestamp().to_string())
}
