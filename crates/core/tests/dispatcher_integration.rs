use std::sync::Arc;

use revenant_core::config::Config;
use revenant_core::page_host::{NullPageHost, PageHost};
use revenant_core::pool::HostFactory;
use revenant_core::Orchestrator;

fn test_factory() -> HostFactory {
    Arc::new(|id: String| Arc::new(NullPageHost::new(id)) as Arc<dyn PageHost>)
}

async fn orchestrator_with_handlers() -> Orchestrator {
    let orchestrator = Orchestrator::new(Config::default(), test_factory());
    orchestrator.pool.initialize().await.unwrap();
    orchestrator.install_handlers().await;
    orchestrator
}

#[tokio::test]
async fn ping_round_trips_through_the_registry() {
    let orchestrator = orchestrator_with_handlers().await;
    let response = orchestrator.registry.dispatch(r#"{"id":"1","command":"ping"}"#).await;
    assert!(response.success);
}

#[tokio::test]
async fn browser_alias_reaches_the_same_handler_as_the_canonical_verb() {
    let orchestrator = orchestrator_with_handlers().await;
    let response = orchestrator.registry.dispatch(r#"{"id":"1","command":"browser_ping"}"#).await;
    assert!(response.success);
}

#[tokio::test]
async fn navigate_then_screenshot_round_trips_against_a_live_page() {
    let orchestrator = orchestrator_with_handlers().await;
    let host = orchestrator.pool.acquire().await.expect("pool warmed at least one host");
    let page_id = orchestrator
        .pages
        .create_page(host, std::collections::HashMap::new())
        .await
        .unwrap();

    let navigate = orchestrator
        .registry
        .dispatch(&format!(r#"{{"id":"1","command":"navigate","pageId":"{page_id}","url":"https://example.com"}}"#))
        .await;
    assert!(navigate.success);

    let screenshot = orchestrator
        .registry
        .dispatch(&format!(r#"{{"id":"2","command":"screenshot_viewport","pageId":"{page_id}"}}"#))
        .await;
    assert!(screenshot.success);
}

#[tokio::test]
async fn unknown_page_id_surfaces_a_not_found_error() {
    let orchestrator = orchestrator_with_handlers().await;
    let response = orchestrator
        .registry
        .dispatch(r#"{"id":"1","command":"navigate","pageId":"missing","url":"https://example.com"}"#)
        .await;
    assert!(!response.success);
    assert_eq!(response.kind, Some("not_found"));
}

#[tokio::test]
async fn recording_start_stop_round_trips_a_verifiable_hash() {
    let orchestrator = orchestrator_with_handlers().await;
    let start = orchestrator
        .registry
        .dispatch(r#"{"id":"1","command":"recording_start","name":"r1","startUrl":"https://example.com"}"#)
        .await;
    assert!(start.success);

    let stop = orchestrator.registry.dispatch(r#"{"id":"2","command":"recording_stop"}"#).await;
    assert!(stop.success);
    assert!(stop.data.unwrap().get("hash").is_some());
}

#[tokio::test]
async fn set_and_list_proxy_round_trips() {
    let orchestrator = orchestrator_with_handlers().await;
    let set = orchestrator
        .registry
        .dispatch(r#"{"id":"1","command":"set_proxy","proxy":{"id":"p1","proxy_type":"http","weight":1}}"#)
        .await;
    assert!(set.success);

    let status = orchestrator.registry.dispatch(r#"{"id":"2","command":"get_proxy_status"}"#).await;
    assert!(status.success);
}
