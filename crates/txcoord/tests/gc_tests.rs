use anyhow::Result;
use coordstore::{CoordinationClient, CreateMode, MemorySession, MemoryStore};
use std::sync::Arc;
use std::time::Duration;
use txcoord::{CoordinatorConfig, ErrorKind, GcOutcome, GcReport, SkipReason, TransactionCoordinator};

async fn coordinator(
    memory: &MemoryStore,
    tx_timeout_secs: u64,
    gc_interval_secs: u64,
) -> Result<(TransactionCoordinator, Arc<MemorySession>)> {
    let config = CoordinatorConfig {
        tx_timeout_secs,
        gc_interval_secs,
        gc_poll_interval_millis: 10,
        connect_timeout_millis: 300,
        ..CoordinatorConfig::default()
    };
    let session = Arc::new(memory.session().await);
    let client: Arc<dyn CoordinationClient> = session.clone();
    let coordinator = TransactionCoordinator::new(client, config);
    coordinator.connect().await?;
    Ok((coordinator, session))
}

async fn wait_until_blacklisted(coord: &TransactionCoordinator, app: &str, txid: u64) -> Result<bool> {
    for _ in 0..400 {
        if coord.is_blacklisted(app, txid).await? {
            return Ok(true);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(false)
}

#[tokio::test]
async fn test_background_gc_reclaims_abandoned_lock() -> Result<()> {
    let memory = MemoryStore::new();
    let (client_process, _s1) = coordinator(&memory, 0, 0).await?;
    let (gc_process, _s2) = coordinator(&memory, 0, 0).await?;

    let stale = client_process.get_transaction_id("app1").await?;
    assert!(client_process.acquire_lock("app1", stale, "customer#42").await?);

    gc_process.start_gc().await;
    assert!(wait_until_blacklisted(&gc_process, "app1", stale).await?);
    gc_process.stop_gc().await;

    assert!(!gc_process.transaction_exists("app1", stale).await?);
    let fresh = client_process.get_transaction_id("app1").await?;
    assert!(client_process.acquire_lock("app1", fresh, "customer#42").await?);

    // The abandoned transaction can no longer be used by its owner
    let err = client_process.check_transaction("app1", stale).await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Expired | ErrorKind::Invalid));
    Ok(())
}

#[tokio::test]
async fn test_gc_keeps_young_transactions() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory, 3600, 0).await?;
    let tx = coord.get_transaction_id("app1").await?;
    coord.acquire_lock("app1", tx, "k").await?;

    let outcomes = coord.run_gc_once().await?;
    assert_eq!(
        outcomes,
        vec![(
            "app1".to_string(),
            GcOutcome::Collected(GcReport {
                scanned: 1,
                rolled_back: 0,
                failed: 0
            })
        )]
    );
    assert!(coord.check_transaction("app1", tx).await?);
    Ok(())
}

#[tokio::test]
async fn test_gc_throttled_per_application() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory, 0, 3600).await?;
    coord.get_transaction_id("app1").await?;

    let first = coord.run_gc_once().await?;
    assert!(matches!(first[0].1, GcOutcome::Collected(r) if r.rolled_back == 1));

    let tx = coord.get_transaction_id("app1").await?;
    let second = coord.run_gc_once().await?;
    assert_eq!(second[0].1, GcOutcome::Skipped(SkipReason::Throttled));
    assert!(coord.check_transaction("app1", tx).await?);
    Ok(())
}

#[tokio::test]
async fn test_gc_lock_excludes_other_processes() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory, 0, 0).await?;
    let tx = coord.get_transaction_id("app1").await?;

    // Another process is in the middle of a pass
    let other = Arc::new(memory.session().await);
    let (events, _receiver) = tokio::sync::mpsc::unbounded_channel();
    other.connect(events).await?;
    other
        .create("/appscale/apps/app1/gclock", b"", CreateMode::EPHEMERAL)
        .await?;

    let outcomes = coord.run_gc_once().await?;
    assert_eq!(outcomes[0].1, GcOutcome::Skipped(SkipReason::Locked));
    assert!(coord.check_transaction("app1", tx).await?);

    // Its session dies; the ephemeral lock goes with it
    other.expire().await;
    let outcomes = coord.run_gc_once().await?;
    assert!(matches!(outcomes[0].1, GcOutcome::Collected(r) if r.rolled_back == 1));
    assert!(coord.is_blacklisted("app1", tx).await?);
    Ok(())
}

#[tokio::test]
async fn test_close_stops_gc() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory, 0, 0).await?;
    coord.start_gc().await;
    coord.start_gc().await;

    tokio::time::timeout(Duration::from_secs(2), coord.close()).await??;
    coord.stop_gc().await;
    Ok(())
}
