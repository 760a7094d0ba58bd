use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use revenant_core::config::PagesConfig;
use revenant_core::events::EventBus;
use revenant_core::page_host::NullPageHost;
use revenant_core::pages::{profile_for, MultiPageManager, ProcSampler, ProfileName, ResourceMonitor};

fn manager_for(profile_name: ProfileName) -> Arc<MultiPageManager> {
    let profile = profile_for(profile_name);
    let events = EventBus::new(64);
    let monitor = Arc::new(ResourceMonitor::new(profile, Box::new(ProcSampler), events.clone()));
    Arc::new(MultiPageManager::new(profile, monitor, events))
}

/// Spec §8 scenario 2: a second navigation to the same domain waits out
/// the domain's politeness delay, while a concurrent navigation to a
/// different domain completes without waiting on it.
#[tokio::test]
async fn rate_limited_navigation_blocks_same_domain_not_cross_domain() {
    let manager = manager_for(ProfileName::Balanced);
    let p1 = manager.create_page(Arc::new(NullPageHost::new("h1")), HashMap::new()).await.unwrap();
    let p2 = manager.create_page(Arc::new(NullPageHost::new("h2")), HashMap::new()).await.unwrap();
    let p3 = manager.create_page(Arc::new(NullPageHost::new("h3")), HashMap::new()).await.unwrap();

    let start = Instant::now();
    manager.navigate_page(&p1, "https://ex.com/a").await.unwrap();

    let manager_other = Arc::clone(&manager);
    let p3_clone = p3.clone();
    let other_domain = tokio::spawn(async move {
        manager_other.navigate_page(&p3_clone, "https://other.com").await
    });

    manager.navigate_page(&p2, "https://ex.com/b").await.unwrap();
    let elapsed = start.elapsed();
    assert!(elapsed.as_millis() >= 1000, "second same-domain navigation must wait out the politeness delay");

    other_domain.await.unwrap().unwrap();
    assert!(manager.rate_limit_delays().await >= 1);
}

#[tokio::test]
async fn default_profile_pages_config_resolves_to_balanced() {
    let cfg = PagesConfig::default();
    assert_eq!(cfg.default_profile, "balanced");
}
