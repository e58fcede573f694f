//! Daemon wiring: watcher submissions and scheduled cycles feed the pipeline

mod helpers;

use helpers::{artifacts, MockMode, MockSource};
use mcat_common::config::TomlConfig;
use mcat_common::events::{EventBus, IngestEvent, RunTrigger};
use mcat_ingest::cache::MemoryCache;
use mcat_ingest::services::{ArtifactWriter, IngestPipeline};
use mcat_ingest::utils::RetryPolicy;
use mcat_ingest::IngestService;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

fn service(config: TomlConfig, output: &Path, bus: EventBus) -> Arc<IngestService> {
    let pipeline = IngestPipeline::new(ArtifactWriter::new(output))
        .with_cache(Arc::new(MemoryCache::new()), Duration::from_secs(60))
        .with_primary(
            Arc::new(MockSource::new(MockMode::Found)),
            RetryPolicy::new(2, Duration::from_millis(5)),
        );
    Arc::new(IngestService::new(config, pipeline, bus))
}

async fn wait_for_artifact(dir: &Path, name: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if artifacts(dir).iter().any(|a| a == name) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

#[tokio::test]
async fn daemon_requires_a_trigger() {
    let media = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut config = TomlConfig::default();
    config.library.roots = vec![media.path().to_path_buf()];
    config.schedule.enabled = false;
    config.watch.enabled = false;

    let result = service(config, output.path(), EventBus::new(8))
        .run_daemon(CancellationToken::new())
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn scheduled_cycle_runs_on_startup() {
    // Given: one movie already in the library and a long interval
    let media = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    std::fs::write(media.path().join("Heat.1995.mkv"), b"x").unwrap();

    let mut config = TomlConfig::default();
    config.library.roots = vec![media.path().to_path_buf()];
    config.schedule.interval_secs = 3600;
    config.schedule.run_on_startup = true;
    config.watch.enabled = false;

    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let cancel = CancellationToken::new();
    let daemon = tokio::spawn(service(config, output.path(), bus).run_daemon(cancel.clone()));

    // When: the startup tick fires
    assert!(wait_for_artifact(output.path(), "heat-1995.md", Duration::from_secs(5)).await);

    // Then: the run was reported as scheduled
    let trigger = loop {
        match events.recv().await.unwrap() {
            IngestEvent::RunCompleted { trigger, .. } => break trigger,
            _ => continue,
        }
    };
    assert_eq!(trigger, RunTrigger::Scheduled);

    cancel.cancel();
    daemon.await.unwrap().unwrap();
}

#[tokio::test]
async fn watched_file_is_ingested_after_settling() {
    // Given: a daemon with only the watcher enabled
    let media = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    let mut config = TomlConfig::default();
    config.library.roots = vec![media.path().to_path_buf()];
    config.schedule.enabled = false;
    config.watch.enabled = true;
    config.watch.debounce_ms = 200;

    let bus = EventBus::new(16);
    let mut events = bus.subscribe();
    let cancel = CancellationToken::new();
    let daemon = tokio::spawn(service(config, output.path(), bus).run_daemon(cancel.clone()));
    // Let the watch register
    tokio::time::sleep(Duration::from_millis(200)).await;

    // When: a file arrives in a few writes
    let file = media.path().join("Alien.1979.mkv");
    for _ in 0..3 {
        std::fs::write(&file, b"chunk").unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
    }

    // Then: one artifact, submitted through the watcher
    assert!(wait_for_artifact(output.path(), "alien-1979.md", Duration::from_secs(5)).await);
    let mut submitted = 0;
    let mut trigger = None;
    while trigger.is_none() {
        match events.recv().await.unwrap() {
            IngestEvent::ItemSubmitted { .. } => submitted += 1,
            IngestEvent::RunCompleted { trigger: t, .. } => trigger = Some(t),
            _ => {}
        }
    }
    assert_eq!(submitted, 1);
    assert_eq!(trigger, Some(RunTrigger::Watch));

    cancel.cancel();
    daemon.await.unwrap().unwrap();
}
