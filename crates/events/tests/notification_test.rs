//! Wire format and delivery guarantees of change notifications.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use keel_events::{
    stream_for_subject, subject_matches, InMemoryBus, Notification, NotificationBus, Operation,
    ETHEREUM_NODE_INSTANCE_SUBJECT, WORKLOAD_DEFINITION_SUBJECT, WORKLOAD_INSTANCE_SUBJECT,
};
use proptest::prelude::*;
use serde_json::{json, Value};

#[test]
fn test_envelope_uses_api_server_field_names() {
    let notification = Notification::new(Operation::Created, json!({"ID": 3, "Name": "web"}));

    let wire: Value = serde_json::from_slice(&notification.to_bytes().unwrap()).unwrap();

    assert_eq!(
        wire,
        json!({"Operation": "Created", "Requeue": false, "Object": {"ID": 3, "Name": "web"}})
    );
}

#[test]
fn test_requeued_copy_carries_delay_and_keeps_operation() {
    let original = Notification::new(Operation::Deleted, json!({"ID": 9}));

    let requeued = original.requeued(4, json!({"ID": 9, "Name": "snapshot"}));
    let wire: Value = serde_json::from_slice(&requeued.to_bytes().unwrap()).unwrap();

    assert_eq!(wire["Operation"], json!("Deleted"));
    assert_eq!(wire["Requeue"], json!(true));
    assert_eq!(wire["LastRequeueDelay"], json!(4));
    assert!(!original.requeue);
}

#[test]
fn test_unknown_operation_still_decodes() {
    let bytes = br#"{"Operation": "Archived", "Object": {"ID": 1}}"#;

    let notification = Notification::<Value>::from_bytes(bytes).unwrap();

    assert_eq!(
        notification.operation,
        Operation::Unrecognized("Archived".to_string())
    );
    assert!(!notification.requeue);
    assert_eq!(notification.last_requeue_delay, None);
}

#[test]
fn test_garbage_is_malformed() {
    assert!(Notification::<Value>::from_bytes(b"not json").is_err());
}

#[test]
fn test_subjects_route_to_streams() {
    assert_eq!(
        stream_for_subject(&WORKLOAD_INSTANCE_SUBJECT.created()),
        Some("workloadStream")
    );
    assert_eq!(
        stream_for_subject(&ETHEREUM_NODE_INSTANCE_SUBJECT.filter()),
        Some("ethereumStream")
    );
    assert_eq!(stream_for_subject("cluster.cluster-instance.created"), None);
}

#[tokio::test(start_paused = true)]
async fn test_competing_consumers_share_one_queue() {
    let bus = InMemoryBus::new();
    let filter = WORKLOAD_DEFINITION_SUBJECT.filter();
    let mut first = bus
        .subscribe("WorkloadDefinitionReconciler", &filter)
        .await
        .unwrap();
    let mut second = bus
        .subscribe("WorkloadDefinitionReconciler", &filter)
        .await
        .unwrap();
    let mut audit = bus.subscribe("Audit", &filter).await.unwrap();

    for id in 1..=4 {
        let payload = Notification::new(Operation::Created, json!({"ID": id}))
            .to_bytes()
            .unwrap();
        bus.publish(&WORKLOAD_DEFINITION_SUBJECT.created(), payload)
            .await
            .unwrap();
    }

    let wait = Duration::from_millis(10);
    let mut competing = 0;
    while first.fetch(wait).await.unwrap().is_some() {
        competing += 1;
        if second.fetch(wait).await.unwrap().is_some() {
            competing += 1;
        }
    }
    assert_eq!(competing, 4);
    assert!(second.fetch(wait).await.unwrap().is_none());

    let mut audited = 0;
    while audit.fetch(wait).await.unwrap().is_some() {
        audited += 1;
    }
    assert_eq!(audited, 4);
}

#[tokio::test]
async fn test_other_object_types_are_not_delivered() {
    let bus = InMemoryBus::new();
    let mut subscription = bus
        .subscribe(
            "WorkloadInstanceReconciler",
            &WORKLOAD_INSTANCE_SUBJECT.filter(),
        )
        .await
        .unwrap();

    bus.publish(&WORKLOAD_DEFINITION_SUBJECT.created(), b"{}".to_vec())
        .await
        .unwrap();

    let message = subscription.fetch(Duration::from_millis(20)).await.unwrap();
    assert!(message.is_none());
}

proptest! {
    #[test]
    fn star_matches_exactly_one_token(token in "[a-z][a-z0-9-]{0,12}", extra in "[a-z]{1,6}") {
        let filter = WORKLOAD_INSTANCE_SUBJECT.filter();
        let root = WORKLOAD_INSTANCE_SUBJECT.root();
        let single = format!("{root}.{token}");
        let nested = format!("{root}.{token}.{extra}");
        prop_assert!(subject_matches(&filter, &single));
        prop_assert!(!subject_matches(&filter, &nested));
    }

    #[test]
    fn wildcard_tail_matches_any_depth(tokens in prop::collection::vec("[a-z]{1,8}", 1..5)) {
        let subject = format!("workload.{}", tokens.join("."));
        prop_assert!(subject_matches("workload.>", &subject));
        prop_assert!(!subject_matches("ethereum.>", &subject));
    }
}
