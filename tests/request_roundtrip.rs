//! Single-chunk GET/SET round trips, plus the NAK and SubscribeReply receive
//! paths and the two layers of pre-send validation.

use midi_ci_pe::testutil::{FakeDiscovery, FakeMessageBuilder, FakeTransport, IdentityCodec};
use midi_ci_pe::{
    Destination, Duid, EngineConfig, NakDetails, PeError, PeManager, PeRequest, ParsedMessage, RequestId,
    RequestValidationError, SchemaError, SendStrategy,
};
use std::sync::Arc;
use std::time::Duration;

fn target() -> Duid {
    Duid::new(7)
}

async fn make_manager(reply_timeout: Duration) -> (Arc<PeManager>, Arc<FakeTransport>) {
    let transport = Arc::new(FakeTransport::new(vec![]));
    let discovery = Arc::new(FakeDiscovery::new().with_route(target(), Destination::new("ep1")));
    let manager = Arc::new(PeManager::new(
        transport.clone(),
        discovery,
        Arc::new(IdentityCodec::default()),
        Arc::new(FakeMessageBuilder),
        SendStrategy::Single,
        EngineConfig::builder().reply_timeout(reply_timeout).build().unwrap(),
    ));
    (manager, transport)
}

async fn sent_request_id(transport: &FakeTransport) -> RequestId {
    for _ in 0..500 {
        if transport.sent_count() > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let sent = transport.sent.lock().unwrap();
    RequestId::new(sent[0].0[0]).unwrap()
}

#[tokio::test]
async fn single_chunk_get_round_trips_status_and_body() {
    let (manager, transport) = make_manager(Duration::from_secs(2)).await;

    let task = {
        let m = manager.clone();
        tokio::spawn(async move { m.get("DeviceInfo", target()).await })
    };
    let request_id = sent_request_id(&transport).await;

    manager
        .handle_inbound(
            tokio::time::Instant::now(),
            target(),
            ParsedMessage::PeReply {
                source: target(),
                request_id,
                this_chunk: 1,
                num_chunks: 1,
                header: br#"{"status":200}"#.to_vec(),
                property: b"{\"manufacturer\":\"Acme\"}".to_vec(),
            },
        )
        .await;

    let response = task.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.decoded_body, b"{\"manufacturer\":\"Acme\"}".to_vec());
}

#[tokio::test]
async fn single_chunk_set_round_trips_an_empty_ack_body() {
    let (manager, transport) = make_manager(Duration::from_secs(2)).await;

    let task = {
        let m = manager.clone();
        tokio::spawn(async move { m.set("DeviceInfo", target(), b"{\"name\":\"new\"}".to_vec()).await })
    };
    let request_id = sent_request_id(&transport).await;

    manager
        .handle_inbound(
            tokio::time::Instant::now(),
            target(),
            ParsedMessage::PeReply {
                source: target(),
                request_id,
                this_chunk: 1,
                num_chunks: 1,
                header: br#"{"status":200}"#.to_vec(),
                property: Vec::new(),
            },
        )
        .await;

    let response = task.await.unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert!(response.decoded_body.is_empty());
}

#[tokio::test]
async fn device_error_status_is_surfaced_as_a_device_error_not_a_response() {
    let (manager, transport) = make_manager(Duration::from_secs(2)).await;

    let task = {
        let m = manager.clone();
        tokio::spawn(async move { m.get("Missing", target()).await })
    };
    let request_id = sent_request_id(&transport).await;

    manager
        .handle_inbound(
            tokio::time::Instant::now(),
            target(),
            ParsedMessage::PeReply {
                source: target(),
                request_id,
                this_chunk: 1,
                num_chunks: 1,
                header: br#"{"status":404,"message":"not found"}"#.to_vec(),
                property: Vec::new(),
            },
        )
        .await;

    let err = task.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        PeError::DeviceError {
            status: 404,
            message: Some("not found".into())
        }
    );
}

#[tokio::test]
async fn nak_with_exactly_one_pending_waiter_resolves_it() {
    let (manager, transport) = make_manager(Duration::from_secs(2)).await;

    let task = {
        let m = manager.clone();
        tokio::spawn(async move { m.get("DeviceInfo", target()).await })
    };
    let _request_id = sent_request_id(&transport).await;

    let details = NakDetails {
        original_transaction: 0,
        status_code: 0x41,
        detail_code: NakDetails::DETAIL_BUSY.to_owned(),
        extra: Vec::new(),
        text: None,
    };
    let outcome = manager
        .handle_inbound(
            tokio::time::Instant::now(),
            target(),
            ParsedMessage::Nak {
                destination_duid: target(),
                details: details.clone(),
            },
        )
        .await;
    assert!(matches!(outcome, midi_ci_pe::InboundOutcome::Handled));

    let result = task.await.unwrap();
    assert_eq!(result, Err(PeError::Nak(details)));
}

#[tokio::test]
async fn nak_with_no_pending_waiter_is_dropped_not_delivered() {
    let (manager, _transport) = make_manager(Duration::from_secs(2)).await;

    let details = NakDetails {
        original_transaction: 0,
        status_code: 0x41,
        detail_code: NakDetails::DETAIL_BUSY.to_owned(),
        extra: Vec::new(),
        text: None,
    };
    let outcome = manager
        .handle_inbound(tokio::time::Instant::now(), target(), ParsedMessage::Nak { destination_duid: target(), details })
        .await;
    assert!(matches!(
        outcome,
        midi_ci_pe::InboundOutcome::Dropped {
            reason: "NAK with zero or multiple pending waiters for this destination"
        }
    ));
}

#[tokio::test]
async fn nak_with_two_pending_waiters_for_the_destination_is_ambiguous_and_dropped() {
    let (manager, transport) = make_manager(Duration::from_secs(2)).await;

    let a = {
        let m = manager.clone();
        tokio::spawn(async move { m.get("DeviceInfo", target()).await })
    };
    for _ in 0..500 {
        if transport.sent_count() >= 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    let b = {
        let m = manager.clone();
        tokio::spawn(async move { m.get("ChannelList", target()).await })
    };
    for _ in 0..500 {
        if transport.sent_count() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let details = NakDetails {
        original_transaction: 0,
        status_code: 0x41,
        detail_code: NakDetails::DETAIL_BUSY.to_owned(),
        extra: Vec::new(),
        text: None,
    };
    let outcome = manager
        .handle_inbound(tokio::time::Instant::now(), target(), ParsedMessage::Nak { destination_duid: target(), details })
        .await;
    assert!(matches!(
        outcome,
        midi_ci_pe::InboundOutcome::Dropped {
            reason: "NAK with zero or multiple pending waiters for this destination"
        }
    ));

    a.abort();
    b.abort();
}

#[tokio::test]
async fn subscribe_ack_round_trips_the_subscribe_id() {
    let (manager, transport) = make_manager(Duration::from_secs(2)).await;

    let task = {
        let m = manager.clone();
        tokio::spawn(async move { m.subscribe("ChannelList", target()).await })
    };
    let request_id = sent_request_id(&transport).await;

    manager
        .handle_inbound(
            tokio::time::Instant::now(),
            target(),
            ParsedMessage::SubscribeReply {
                source: target(),
                request_id,
                status: 200,
                subscribe_id: Some("sub-42".into()),
            },
        )
        .await;

    let subscribe_id = task.await.unwrap().unwrap();
    assert_eq!(subscribe_id, "sub-42");
}

#[tokio::test]
async fn empty_resource_name_is_rejected_before_any_send() {
    let (manager, transport) = make_manager(Duration::from_secs(2)).await;
    let err = manager.send(PeRequest::get("", target())).await.unwrap_err();
    assert_eq!(err, PeError::ValidationFailed(RequestValidationError::EmptyResource));
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn set_payload_that_is_not_json_and_has_no_registered_validator_is_rejected() {
    let (manager, transport) = make_manager(Duration::from_secs(2)).await;
    let err = manager.set("DeviceInfo", target(), b"not json".to_vec()).await.unwrap_err();
    assert!(matches!(err, PeError::PayloadValidationFailed(SchemaError::SchemaMismatch { .. })));
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test]
async fn registered_validator_is_consulted_before_a_set_is_sent() {
    struct RejectAll;
    impl midi_ci_pe::validation::PayloadValidator for RejectAll {
        fn validate(&self, _body: &[u8]) -> Result<(), String> {
            Err("schema violation".into())
        }
    }

    let (manager, transport) = make_manager(Duration::from_secs(2)).await;
    manager.register_validator("DeviceInfo", Arc::new(RejectAll)).await;

    let err = manager.set("DeviceInfo", target(), b"{}".to_vec()).await.unwrap_err();
    assert!(matches!(
        err,
        PeError::PayloadValidationFailed(SchemaError::ValidatorRejected { ref resource, .. }) if resource == "DeviceInfo"
    ));
    assert_eq!(transport.sent_count(), 0);
}
