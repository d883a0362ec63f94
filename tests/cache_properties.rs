use std::sync::Arc;

use serde_json::json;
use speed_optimizer::{
    application::{
        license::{Actor, LicenseService, OfflineAuthority, resolve_tier},
        operations::SiteOperations,
        options::OptionsStore,
    },
    cache::{
        BypassReason, CacheConfig, CacheDecision, CacheKey, CacheRules, KeyOptions,
        PageCacheEngine,
    },
    domain::{
        features::{Feature, is_available},
        license::{LICENSE_EXPIRES, LICENSE_KEY, LICENSE_STATUS, LicenseState, format_expiry},
        request::{PageRequest, RequestMethod},
        settings::{OptimizationSettings, names, option_key},
        tier::Tier,
    },
    infra::options::MemoryOptionsStore,
};
use tempfile::tempdir;
use time::{Duration, OffsetDateTime};

fn page(title: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{title}</title></head><body>{}</body></html>",
        "<p>Lorem ipsum dolor sit amet.</p>".repeat(16)
    )
}

fn rules(settings: &OptimizationSettings, tier: Tier) -> CacheRules {
    CacheRules::from_settings(settings, tier)
}

#[test]
fn availability_never_shrinks_with_a_higher_tier() {
    for feature in Feature::all() {
        for (index, lower) in Tier::ALL.iter().enumerate() {
            for higher in &Tier::ALL[index..] {
                if feature.is_available_for(*lower) {
                    assert!(
                        feature.is_available_for(*higher),
                        "{feature} available for {lower} but not {higher}"
                    );
                }
            }
        }
    }
}

#[test]
fn unknown_feature_names_are_denied() {
    for tier in Tier::ALL {
        assert!(!is_available("teleportation", tier));
    }
}

#[tokio::test]
async fn expired_agency_license_falls_back_to_free() {
    let now = OffsetDateTime::now_utc();
    let state = LicenseState {
        key: "AGENCY-1234-5678-9012".to_string(),
        tier: Tier::Agency,
        expires_at: Some(now - Duration::seconds(1)),
    };
    assert_eq!(state.effective_tier_at(now), Tier::Free);

    let store = MemoryOptionsStore::with_values([
        (option_key(LICENSE_KEY), json!(state.key)),
        (option_key(LICENSE_STATUS), json!("agency")),
        (
            option_key(LICENSE_EXPIRES),
            json!(format_expiry(now - Duration::seconds(1))),
        ),
    ]);
    let snapshot = store.snapshot().await.unwrap();
    assert_eq!(resolve_tier(&snapshot, now), Tier::Free);
}

#[test]
fn cache_keys_are_deterministic_and_vary_only_on_active_attributes() {
    let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X)";
    let firefox = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
    let request = PageRequest::get("/shop").with_user_agent(firefox);

    let plain = KeyOptions::default();
    assert_eq!(
        CacheKey::derive(&request, &plain),
        CacheKey::derive(&request.clone(), &plain)
    );

    let other_agent = PageRequest::get("/shop").with_user_agent(iphone);
    assert_eq!(
        CacheKey::derive(&request, &plain),
        CacheKey::derive(&other_agent, &plain)
    );

    let by_agent = KeyOptions {
        user_agent: true,
        ..KeyOptions::default()
    };
    assert_ne!(
        CacheKey::derive(&request, &by_agent),
        CacheKey::derive(&other_agent, &by_agent)
    );
    assert_eq!(
        CacheKey::derive(&request, &by_agent),
        CacheKey::derive(&PageRequest::get("/shop").with_user_agent(firefox), &by_agent)
    );

    let queried = PageRequest::get("/shop").with_query("page=2");
    assert_eq!(
        CacheKey::derive(&queried, &plain),
        CacheKey::derive(&PageRequest::get("/shop"), &plain)
    );
    let by_query = KeyOptions {
        query_strings: true,
        ..KeyOptions::default()
    };
    assert_ne!(
        CacheKey::derive(&queried, &by_query),
        CacheKey::derive(&PageRequest::get("/shop"), &by_query)
    );
}

#[tokio::test]
async fn captured_page_comes_back_verbatim_with_trailer() {
    let dir = tempdir().unwrap();
    let engine = PageCacheEngine::new(CacheConfig::for_content_dir(dir.path()));
    let rules = rules(&OptimizationSettings::default(), Tier::Free);
    let request = PageRequest::get("/contact");
    let now = OffsetDateTime::now_utc();

    let CacheDecision::Miss(key) = engine.classify(&request, &rules, now).await else {
        panic!("empty store must miss");
    };
    let body = page("contact");
    engine.capture(&key, &body).await;

    match engine.classify(&request, &rules, now).await {
        CacheDecision::Hit(hit) => {
            let served = hit.body();
            assert_eq!(&served[..body.len()], body);
            assert!(served[body.len()..].contains("Cached page served by Speed Optimizer"));
        }
        other => panic!("expected a hit, got {}", other.label()),
    }
}

#[tokio::test]
async fn entries_are_fresh_until_expiration() {
    let dir = tempdir().unwrap();
    let engine = PageCacheEngine::new(CacheConfig::for_content_dir(dir.path()));
    let settings = OptimizationSettings {
        cache_expiration: 3600,
        ..OptimizationSettings::default()
    };
    let rules = rules(&settings, Tier::Free);
    let request = PageRequest::get("/pricing");

    let key = CacheKey::derive(&request, &rules.keys);
    engine.capture(&key, &page("pricing")).await;
    let written = engine.store().read(&key).await.unwrap().unwrap().modified;

    let before = engine
        .classify(&request, &rules, written + Duration::seconds(3599))
        .await;
    assert_eq!(before.label(), "HIT");

    let after = engine
        .classify(&request, &rules, written + Duration::seconds(3601))
        .await;
    assert_eq!(after, CacheDecision::Miss(key));
}

#[tokio::test]
async fn writes_admin_and_excluded_paths_bypass_even_when_stored() {
    let dir = tempdir().unwrap();
    let engine = PageCacheEngine::new(CacheConfig::for_content_dir(dir.path()));
    let rules = rules(&OptimizationSettings::default(), Tier::Free);
    let now = OffsetDateTime::now_utc();

    for path in ["/", "/wp-admin/", "/checkout"] {
        let key = CacheKey::derive(&PageRequest::get(path), &rules.keys);
        engine.capture(&key, &page(path)).await;
    }

    let cases = [
        (
            PageRequest::get("/").with_method(RequestMethod::parse("POST")),
            BypassReason::UnsafeMethod,
        ),
        (PageRequest::get("/wp-admin/").as_admin(), BypassReason::Admin),
        (PageRequest::get("/checkout"), BypassReason::ExcludedPath),
    ];
    for (request, reason) in cases {
        assert_eq!(
            engine.classify(&request, &rules, now).await,
            CacheDecision::Bypass(reason),
            "{}",
            request.path
        );
    }
}

fn operations(content_dir: &std::path::Path, store: MemoryOptionsStore) -> SiteOperations {
    let store: Arc<dyn OptionsStore> = Arc::new(store);
    let license = LicenseService::new(Arc::clone(&store), Arc::new(OfflineAuthority));
    let engine = PageCacheEngine::new(CacheConfig::for_content_dir(content_dir));
    SiteOperations::new(store, license, engine)
}

#[tokio::test]
async fn free_tier_page_cache_scenario() {
    let dir = tempdir().unwrap();
    let store = MemoryOptionsStore::with_values([
        (option_key(names::ENABLE_PAGE_CACHING), json!(true)),
        (option_key(names::CACHE_EXPIRATION), json!(3600)),
    ]);
    let operations = operations(dir.path(), store);
    let now = OffsetDateTime::now_utc();

    let wiring = operations.wiring_at(now).await;
    assert_eq!(wiring.tier, Tier::Free);
    let rules = wiring.cache_rules.expect("page cache wired on the free tier");
    assert_eq!(rules.expiration_secs, 3600);

    let request = PageRequest::get("/about");
    let engine = operations.engine();
    let CacheDecision::Miss(key) = engine.classify(&request, &rules, now).await else {
        panic!("first request must miss");
    };
    let body = page("about");
    engine.capture(&key, &body).await;
    assert_eq!(operations.cache_stats().await.unwrap().entries, 1);

    let second = engine
        .classify(&request, &rules, now + Duration::seconds(60))
        .await;
    assert_eq!(second.label(), "HIT");
    let CacheDecision::Hit(hit) = second else {
        unreachable!()
    };
    assert_eq!(hit.content, body);
}

#[tokio::test]
async fn agency_activation_unlocks_white_labeling() {
    let dir = tempdir().unwrap();
    let operations = operations(dir.path(), MemoryOptionsStore::default());

    let info = operations
        .license()
        .activate(&Actor::manager("owner"), "AGENCYXXXXXXXXXXXXXXXX")
        .await
        .unwrap();
    assert_eq!(info.tier, Tier::Agency);
    assert_eq!(
        operations.license().resolver().effective_tier().await,
        Tier::Agency
    );
    assert!(is_available("white_labeling", Tier::Agency));
    assert!(!is_available("white_labeling", Tier::Premium));
}

#[tokio::test]
async fn visitors_cannot_activate_licenses() {
    let dir = tempdir().unwrap();
    let operations = operations(dir.path(), MemoryOptionsStore::default());

    let result = operations
        .license()
        .activate(&Actor::visitor("guest"), "AGENCYXXXXXXXXXXXXXXXX")
        .await;
    assert!(result.is_err());
    assert_eq!(
        operations.license().resolver().effective_tier().await,
        Tier::Free
    );
}
