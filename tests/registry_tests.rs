// Instance registry tests

mod common;

use common::{chunk, ts, unit, ScriptedPublisher};
use fluent_pubsub::config::{OutputSettings, PluginConfig};
use fluent_pubsub::pubsub::StatusCode;
use fluent_pubsub::{Disposition, FlushOrchestrator, InstanceRegistry};
use rmpv::Value;
use std::sync::Arc;

fn orchestrator(publisher: Arc<ScriptedPublisher>) -> FlushOrchestrator {
    FlushOrchestrator::new(&OutputSettings::default(), publisher)
}

#[tokio::test]
async fn test_instances_are_independent() {
    let registry = InstanceRegistry::new();
    let healthy = Arc::new(ScriptedPublisher::new());
    let broken =
        Arc::new(ScriptedPublisher::new().fail_with_status("log", StatusCode::PermissionDenied));

    let a = registry.register(orchestrator(healthy.clone()));
    let b = registry.register(orchestrator(broken.clone()));
    assert_ne!(a, b);
    assert_eq!(registry.len(), 2);

    let data = chunk(&[unit(ts(1, 0), vec![("log", Value::from("x"))])]);
    assert_eq!(registry.flush(a, &data, "t").await, Disposition::Accepted);
    assert_eq!(registry.flush(b, &data, "t").await, Disposition::Fatal);
    assert_eq!(healthy.published().len(), 1);
    assert_eq!(broken.published().len(), 1);
}

#[tokio::test]
async fn test_unknown_handle_is_fatal() {
    let registry = InstanceRegistry::new();
    let publisher = Arc::new(ScriptedPublisher::new());
    let handle = registry.register(orchestrator(publisher.clone()));
    assert!(registry.unregister(handle).await);
    assert!(!registry.unregister(handle).await);
    assert_eq!(publisher.shutdowns(), 1);

    let data = chunk(&[unit(ts(1, 0), vec![("log", Value::from("x"))])]);
    assert_eq!(registry.flush(handle, &data, "t").await, Disposition::Fatal);
    assert!(registry
        .flush_report(handle, &data, "t", None)
        .await
        .is_none());
}

#[tokio::test]
async fn test_clear_releases_all_instances() {
    let registry = InstanceRegistry::new();
    let publishers: Vec<_> = (0..3).map(|_| Arc::new(ScriptedPublisher::new())).collect();
    for publisher in &publishers {
        registry.register(orchestrator(publisher.clone()));
    }
    assert_eq!(registry.len(), 3);

    registry.clear().await;
    assert!(registry.is_empty());
    assert!(publishers.iter().all(|p| p.shutdowns() == 1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_flushes_on_one_instance() {
    let registry = Arc::new(InstanceRegistry::new());
    let publisher = Arc::new(ScriptedPublisher::new());
    let handle = registry.register(orchestrator(publisher.clone()));

    let tasks: Vec<_> = (0..8)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let data = chunk(&[
                    unit(ts(i, 0), vec![("n", Value::from(i))]),
                    unit(ts(i, 1), vec![("n", Value::from(i))]),
                ]);
                registry.flush(handle, &data, "t").await
            })
        })
        .collect();

    for task in tasks {
        assert_eq!(task.await.unwrap(), Disposition::Accepted);
    }
    assert_eq!(publisher.published().len(), 16);
}

#[tokio::test]
async fn test_register_from_config_with_stdout_transport() {
    let mut config = PluginConfig::default();
    config.pubsub.project_id = "p".to_string();
    config.pubsub.topic_id = "t".to_string();
    config.pubsub.transport = "stdout".to_string();
    config.publish.delay_threshold_ms = 10;

    let registry = InstanceRegistry::new();
    let handle = registry.register_from_config(&config).await.unwrap();

    let data = chunk(&[unit(ts(1, 0), vec![("log", Value::from("to stdout"))])]);
    assert_eq!(registry.flush(handle, &data, "t").await, Disposition::Accepted);
}

#[test]
fn test_return_codes_match_host_contract() {
    assert_eq!(Disposition::Accepted.return_code(), fluent_pubsub::FLB_OK);
    assert_eq!(Disposition::RetryRequested.return_code(), fluent_pubsub::FLB_RETRY);
    assert_eq!(Disposition::Fatal.return_code(), fluent_pubsub::FLB_ERROR);
}

#[tokio::test]
async fn test_unregister_drains_abandoned_publishes() {
    let mut config = PluginConfig::default();
    config.pubsub.project_id = "p".to_string();
    config.pubsub.topic_id = "t".to_string();
    config.pubsub.transport = "stdout".to_string();
    // Long enough that nothing is sent before the flush gives up
    config.publish.delay_threshold_ms = 60_000;

    let registry = InstanceRegistry::new();
    let handle = registry.register_from_config(&config).await.unwrap();

    let data = chunk(&[unit(ts(1, 0), vec![("log", Value::from("late"))])]);
    let ctx = fluent_pubsub::FlushContext::with_timeout(std::time::Duration::from_millis(20));
    let report = registry
        .flush_report(handle, &data, "t", Some(&ctx))
        .await
        .unwrap();
    assert_eq!(report.disposition, Disposition::RetryRequested);
    assert_eq!(report.submitted, 1);

    let drained = tokio::time::timeout(
        std::time::Duration::from_secs(5),
        registry.unregister(handle),
    )
    .await;
    assert_eq!(drained, Ok(true));
}
