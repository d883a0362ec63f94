//! License resolution and the activate / deactivate / re-validate actions.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tracing::{info, warn};

use crate::{
    application::options::{OptionsError, OptionsStore, snapshot_or_default},
    domain::{
        license::{LICENSE_EXPIRES, LICENSE_KEY, LICENSE_STATUS, LicenseState, format_expiry},
        options::OptionsSnapshot,
        settings::option_key,
        tier::Tier,
    },
};

/// Who is asking for a license change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub name: String,
    pub can_manage_options: bool,
}

impl Actor {
    pub fn manager(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can_manage_options: true,
        }
    }

    pub fn visitor(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            can_manage_options: false,
        }
    }
}

/// What a license authority says about a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorityVerdict {
    Active {
        tier: Tier,
        expires_at: Option<OffsetDateTime>,
    },
    Invalid,
}

#[derive(Debug, Error)]
#[error("license authority unavailable: {0}")]
pub struct AuthorityError(pub String);

/// Validates keys. Real deployments talk to a vendor; the offline authority
/// validates locally.
#[async_trait]
pub trait LicenseAuthority: Send + Sync {
    async fn activate(
        &self,
        key: &str,
        now: OffsetDateTime,
    ) -> Result<AuthorityVerdict, AuthorityError>;

    async fn check(
        &self,
        current: &LicenseState,
        now: OffsetDateTime,
    ) -> Result<AuthorityVerdict, AuthorityError>;

    async fn deactivate(&self, key: &str) -> Result<(), AuthorityError>;
}

/// Offline validation: any key of at least 16 characters is accepted for one
/// year, its tier read from a marker in the key.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineAuthority;

pub const OFFLINE_MIN_KEY_LEN: usize = 16;

impl OfflineAuthority {
    pub fn tier_for_key(key: &str) -> Tier {
        if key.contains("AGENCY") {
            Tier::Agency
        } else if key.contains("BUSINESS") {
            Tier::Business
        } else {
            Tier::Premium
        }
    }

    fn accepts(key: &str) -> bool {
        key.chars().count() >= OFFLINE_MIN_KEY_LEN
    }
}

#[async_trait]
impl LicenseAuthority for OfflineAuthority {
    async fn activate(
        &self,
        key: &str,
        now: OffsetDateTime,
    ) -> Result<AuthorityVerdict, AuthorityError> {
        if !Self::accepts(key) {
            return Ok(AuthorityVerdict::Invalid);
        }
        Ok(AuthorityVerdict::Active {
            tier: Self::tier_for_key(key),
            expires_at: Some(now + Duration::days(365)),
        })
    }

    async fn check(
        &self,
        current: &LicenseState,
        _now: OffsetDateTime,
    ) -> Result<AuthorityVerdict, AuthorityError> {
        if !Self::accepts(&current.key) {
            return Ok(AuthorityVerdict::Invalid);
        }
        Ok(AuthorityVerdict::Active {
            tier: current.tier,
            expires_at: current.expires_at,
        })
    }

    async fn deactivate(&self, _key: &str) -> Result<(), AuthorityError> {
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum LicenseError {
    #[error("actor `{actor}` may not manage the license")]
    Forbidden { actor: String },
    #[error("license key was rejected")]
    Rejected,
    #[error(transparent)]
    Authority(#[from] AuthorityError),
    #[error(transparent)]
    Options(#[from] OptionsError),
}

/// License view for admin surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseInfo {
    pub key: String,
    pub tier: Tier,
    pub tier_name: &'static str,
    pub stored_tier: Tier,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub is_valid: bool,
}

impl LicenseInfo {
    pub fn from_state(state: &LicenseState, now: OffsetDateTime) -> Self {
        let tier = state.effective_tier_at(now);
        Self {
            key: state.masked_key(),
            tier,
            tier_name: tier.display_name(),
            stored_tier: state.tier,
            expires_at: state.expires_at,
            is_valid: state.has_key() && !state.is_expired_at(now),
        }
    }
}

/// Effective tier of an options snapshot at `now`.
pub fn resolve_tier(options: &OptionsSnapshot, now: OffsetDateTime) -> Tier {
    LicenseState::from_snapshot(options).effective_tier_at(now)
}

/// Reads the persisted license. Never fails: an unreadable store is `free`.
#[derive(Clone)]
pub struct LicenseResolver {
    store: Arc<dyn OptionsStore>,
}

impl LicenseResolver {
    pub fn new(store: Arc<dyn OptionsStore>) -> Self {
        Self { store }
    }

    pub async fn state(&self) -> LicenseState {
        LicenseState::from_snapshot(&snapshot_or_default(self.store.as_ref()).await)
    }

    pub async fn effective_tier_at(&self, now: OffsetDateTime) -> Tier {
        self.state().await.effective_tier_at(now)
    }

    pub async fn effective_tier(&self) -> Tier {
        self.effective_tier_at(OffsetDateTime::now_utc()).await
    }

    pub async fn info_at(&self, now: OffsetDateTime) -> LicenseInfo {
        LicenseInfo::from_state(&self.state().await, now)
    }
}

#[derive(Clone)]
pub struct LicenseService {
    store: Arc<dyn OptionsStore>,
    authority: Arc<dyn LicenseAuthority>,
    resolver: LicenseResolver,
}

impl LicenseService {
    pub fn new(store: Arc<dyn OptionsStore>, authority: Arc<dyn LicenseAuthority>) -> Self {
        let resolver = LicenseResolver::new(Arc::clone(&store));
        Self {
            store,
            authority,
            resolver,
        }
    }

    pub fn resolver(&self) -> &LicenseResolver {
        &self.resolver
    }

    pub async fn activate(&self, actor: &Actor, key: &str) -> Result<LicenseInfo, LicenseError> {
        self.activate_at(actor, key, OffsetDateTime::now_utc()).await
    }

    pub async fn activate_at(
        &self,
        actor: &Actor,
        key: &str,
        now: OffsetDateTime,
    ) -> Result<LicenseInfo, LicenseError> {
        ensure_manager(actor)?;
        let key = key.trim();
        if key.is_empty() {
            return Err(LicenseError::Rejected);
        }

        let (tier, expires_at) = match self.authority.activate(key, now).await? {
            AuthorityVerdict::Active { tier, expires_at } => (tier, expires_at),
            AuthorityVerdict::Invalid => {
                counter!("speed_optimizer_license_activation_total", "result" => "rejected")
                    .increment(1);
                warn!(
                    target = "speed_optimizer::license",
                    actor = %actor.name,
                    "license key rejected"
                );
                return Err(LicenseError::Rejected);
            }
        };

        let state = LicenseState {
            key: key.to_string(),
            tier,
            expires_at,
        };
        self.store.set_many(state_entries(&state)).await?;

        counter!("speed_optimizer_license_activation_total", "result" => "activated")
            .increment(1);
        info!(
            target = "speed_optimizer::license",
            actor = %actor.name,
            tier = %tier,
            "license activated"
        );
        Ok(LicenseInfo::from_state(&state, now))
    }

    /// Clear the license. The authority is told, but its answer does not matter.
    pub async fn deactivate(&self, actor: &Actor) -> Result<LicenseInfo, LicenseError> {
        ensure_manager(actor)?;
        let current = self.resolver.state().await;

        if current.has_key()
            && let Err(err) = self.authority.deactivate(&current.key).await
        {
            warn!(
                target = "speed_optimizer::license",
                error = %err,
                "authority not notified of deactivation"
            );
        }

        let keys = [LICENSE_KEY, LICENSE_STATUS, LICENSE_EXPIRES]
            .into_iter()
            .map(option_key)
            .collect::<Vec<_>>();
        self.store.remove_many(&keys).await?;

        info!(
            target = "speed_optimizer::license",
            actor = %actor.name,
            "license deactivated"
        );
        Ok(LicenseInfo::from_state(
            &LicenseState::default(),
            OffsetDateTime::now_utc(),
        ))
    }

    pub async fn refresh(&self) -> Result<LicenseInfo, LicenseError> {
        self.refresh_at(OffsetDateTime::now_utc()).await
    }

    /// Periodic re-validation. Without a key there is nothing to check. An
    /// unreachable authority leaves the state alone; expiry still applies.
    pub async fn refresh_at(&self, now: OffsetDateTime) -> Result<LicenseInfo, LicenseError> {
        let mut state = self.resolver.state().await;
        if !state.has_key() {
            return Ok(LicenseInfo::from_state(&state, now));
        }

        let verdict = self.authority.check(&state, now).await;
        let outcome = match &verdict {
            Ok(AuthorityVerdict::Active { .. }) => "active",
            Ok(AuthorityVerdict::Invalid) => "invalid",
            Err(_) => "unreachable",
        };
        counter!("speed_optimizer_license_refresh_total", "outcome" => outcome).increment(1);

        match verdict {
            Ok(AuthorityVerdict::Active { tier, expires_at }) => {
                state.tier = tier;
                state.expires_at = expires_at;
                self.store.set_many(state_entries(&state)).await?;
            }
            Ok(AuthorityVerdict::Invalid) => {
                state.tier = Tier::Free;
                self.store
                    .set_many(vec![(
                        option_key(LICENSE_STATUS),
                        Value::String(Tier::Free.as_str().to_string()),
                    )])
                    .await?;
                warn!(
                    target = "speed_optimizer::license",
                    "license no longer valid, downgraded to free"
                );
            }
            Err(err) => {
                warn!(
                    target = "speed_optimizer::license",
                    error = %err,
                    "license check skipped"
                );
            }
        }

        Ok(LicenseInfo::from_state(&state, now))
    }
}

fn ensure_manager(actor: &Actor) -> Result<(), LicenseError> {
    if actor.can_manage_options {
        return Ok(());
    }
    warn!(
        target = "speed_optimizer::license",
        actor = %actor.name,
        "license change denied"
    );
    Err(LicenseError::Forbidden {
        actor: actor.name.clone(),
    })
}

fn state_entries(state: &LicenseState) -> Vec<(String, Value)> {
    vec![
        (option_key(LICENSE_KEY), Value::String(state.key.clone())),
        (
            option_key(LICENSE_STATUS),
            Value::String(state.tier.as_str().to_string()),
        ),
        (
            option_key(LICENSE_EXPIRES),
            Value::String(state.expires_at.map(format_expiry).unwrap_or_default()),
        ),
    ]
}
