//! Controller wiring: a configuration file drives the worker pools.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use keel_api::{ControlPlaneApi, InMemoryApi, WorkloadDefinition};
use keel_core::ControllerConfig;
use keel_events::{InMemoryBus, InMemoryLockStore};
use keel_reconciler::{InMemoryRuntime, ReconcilerContext, ReconcilerSupervisor};

const CONFIG: &str = r#"
controller_id = "controller-east-1"
lock_ttl_secs = 60

[reconcilers.WorkloadDefinitionReconciler]
concurrent_reconciles = 3
initial_delay_secs = 2
max_delay_secs = 120

[reconcilers.WorkloadInstanceReconciler]
concurrent_reconciles = 2
"#;

fn write_config() -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(CONFIG.as_bytes()).expect("write config");
    file
}

#[tokio::test(start_paused = true)]
async fn test_config_file_sizes_worker_pools() {
    let file = write_config();
    let config = ControllerConfig::from_file(file.path()).unwrap();
    assert_eq!(config.controller_id, "controller-east-1");

    let bus = InMemoryBus::new_arc();
    let locks = InMemoryLockStore::new_arc(Duration::from_secs(config.lock_ttl_secs));
    let context = ReconcilerContext::new(bus.clone(), locks, config.controller_id.clone());
    let api = Arc::new(InMemoryApi::new().with_notifications(bus.clone()));

    let supervisor =
        ReconcilerSupervisor::start(context, api.clone(), InMemoryRuntime::new_arc(), &config)
            .await
            .unwrap();

    // 3 + 2 configured, one each for the ethereum reconcilers
    assert_eq!(supervisor.worker_count(), 7);

    let definition = api
        .create_workload_definition(WorkloadDefinition {
            name: Some("web".to_string()),
            yaml_document: Some("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: web\n".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;

    let stored = api
        .get_workload_definition(definition.id.unwrap())
        .await
        .unwrap();
    assert_eq!(stored.reconciled, Some(true));

    let stats = supervisor.shutdown().await;
    assert_eq!(stats.stopped, 7);
}

#[test]
fn test_unreadable_config_file_is_an_error() {
    let result = ControllerConfig::from_file(std::path::Path::new("/nonexistent/keel.toml"));
    assert!(result.is_err());
}
