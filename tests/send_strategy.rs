//! `SendStrategy` variants exercised through `PeManager::get`/`subscribe`,
//! observed via `FakeTransport`'s recorded `sent`/`broadcasts`.

use midi_ci_pe::testutil::{FakeDiscovery, FakeMessageBuilder, FakeTransport, IdentityCodec};
use midi_ci_pe::{Destination, Duid, EngineConfig, PeError, PeManager, SendStrategy};
use std::sync::Arc;
use std::time::Duration;

fn target() -> Duid {
    Duid::new(0x55)
}

fn manager_with(
    strategy: SendStrategy,
    discovery: FakeDiscovery,
    known_destinations: Vec<Destination>,
) -> (Arc<PeManager>, Arc<FakeTransport>) {
    let transport = Arc::new(FakeTransport::new(known_destinations));
    let manager = Arc::new(PeManager::new(
        transport.clone(),
        Arc::new(discovery),
        Arc::new(IdentityCodec::default()),
        Arc::new(FakeMessageBuilder),
        strategy,
        EngineConfig::builder().reply_timeout(Duration::from_millis(50)).build().unwrap(),
    ));
    (manager, transport)
}

async fn wait_until(cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition never became true");
}

#[tokio::test]
async fn single_sends_to_the_one_resolved_destination() {
    let discovery = FakeDiscovery::new().with_route(target(), Destination::new("ep1"));
    let (manager, transport) = manager_with(SendStrategy::Single, discovery, vec![]);

    let task = tokio::spawn({
        let m = manager.clone();
        async move { m.get("DeviceInfo", target()).await }
    });
    wait_until(|| transport.sent_count() > 0).await;
    assert_eq!(transport.sent.lock().unwrap()[0].1, Destination::new("ep1"));
    assert!(transport.broadcasts.lock().unwrap().is_empty());

    task.abort();
}

#[tokio::test]
async fn broadcast_never_touches_the_per_destination_send_path() {
    let (manager, transport) = manager_with(SendStrategy::Broadcast, FakeDiscovery::new(), vec![]);

    let task = tokio::spawn({
        let m = manager.clone();
        async move { m.subscribe("ChannelList", target()).await }
    });
    wait_until(|| !transport.broadcasts.lock().unwrap().is_empty()).await;
    assert_eq!(transport.broadcasts.lock().unwrap().len(), 1);
    assert!(transport.sent.lock().unwrap().is_empty());

    task.abort();
}

#[tokio::test]
async fn learned_with_an_empty_cache_fails_fast_with_no_destination_instead_of_timing_out() {
    let (manager, transport) = manager_with(SendStrategy::Learned, FakeDiscovery::new(), vec![]);

    let result = manager.get("DeviceInfo", target()).await;
    assert_eq!(result, Err(PeError::NoDestination));
    assert!(transport.sent.lock().unwrap().is_empty());
}

#[tokio::test]
async fn fallback_uses_the_resolved_destination_on_a_cache_miss() {
    let discovery = FakeDiscovery::new().with_route(target(), Destination::new("resolved-ep"));
    let (manager, transport) = manager_with(SendStrategy::Fallback, discovery, vec![]);

    let task = tokio::spawn({
        let m = manager.clone();
        async move { m.get("DeviceInfo", target()).await }
    });
    wait_until(|| transport.sent_count() > 0).await;
    assert_eq!(transport.sent.lock().unwrap()[0].1, Destination::new("resolved-ep"));

    task.abort();
}

#[tokio::test]
async fn custom_sends_only_to_the_destinations_the_closure_selects() {
    let known = vec![Destination::new("keep-a"), Destination::new("drop-b"), Destination::new("keep-c")];
    let strategy = SendStrategy::Custom(Arc::new(|candidates: &[Destination]| {
        candidates.iter().filter(|d| d.0.starts_with("keep")).cloned().collect()
    }));
    let (manager, transport) = manager_with(strategy, FakeDiscovery::new(), known);

    let task = tokio::spawn({
        let m = manager.clone();
        async move { m.get("DeviceInfo", target()).await }
    });
    wait_until(|| transport.sent_count() >= 2).await;

    let sent = transport.sent.lock().unwrap();
    let destinations: Vec<Destination> = sent.iter().map(|(_, d)| d.clone()).collect();
    assert_eq!(destinations, vec![Destination::new("keep-a"), Destination::new("keep-c")]);

    drop(sent);
    task.abort();
}

#[tokio::test]
async fn custom_with_no_matching_destinations_fails_with_no_destination() {
    let known = vec![Destination::new("drop-only")];
    let strategy = SendStrategy::Custom(Arc::new(|_: &[Destination]| Vec::new()));
    let (manager, transport) = manager_with(strategy, FakeDiscovery::new(), known);

    let result = manager.get("DeviceInfo", target()).await;
    assert_eq!(result, Err(PeError::NoDestination));
    assert!(transport.sent.lock().unwrap().is_empty());
}
