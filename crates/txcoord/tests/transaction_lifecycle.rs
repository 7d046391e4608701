use anyhow::Result;
use coordstore::{CoordinationClient, MemorySession, MemoryStore};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use txcoord::{CoordinatorConfig, ErrorKind, NO_VALID_TXID, TransactionCoordinator};

fn test_config() -> CoordinatorConfig {
    CoordinatorConfig {
        connect_timeout_millis: 300,
        gc_poll_interval_millis: 10,
        ..CoordinatorConfig::default()
    }
}

/// A connected coordinator on its own session of `memory`
async fn coordinator(memory: &MemoryStore) -> Result<(Arc<TransactionCoordinator>, Arc<MemorySession>)> {
    let session = Arc::new(memory.session().await);
    let client: Arc<dyn CoordinationClient> = session.clone();
    let coordinator = Arc::new(TransactionCoordinator::new(client, test_config()));
    coordinator.connect().await?;
    Ok((coordinator, session))
}

#[tokio::test]
async fn test_transaction_ids_unique_across_processes() -> Result<()> {
    let memory = MemoryStore::new();
    let (first, _s1) = coordinator(&memory).await?;
    let (second, _s2) = coordinator(&memory).await?;

    let mut handles = Vec::new();
    for coord in [first, second] {
        for _ in 0..4 {
            let coord = Arc::clone(&coord);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..10 {
                    ids.push(coord.get_transaction_id("app1").await?);
                }
                Ok::<_, txcoord::TxError>(ids)
            }));
        }
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for txid in handle.await?? {
            assert!(txid > 0);
            assert!(seen.insert(txid), "txid {txid} handed out twice");
        }
    }
    assert_eq!(seen.len(), 80);
    Ok(())
}

#[tokio::test]
async fn test_lock_mutual_exclusion() -> Result<()> {
    let memory = MemoryStore::new();
    let (first, _s1) = coordinator(&memory).await?;
    let (second, _s2) = coordinator(&memory).await?;

    let mut handles = Vec::new();
    for coord in [first.clone(), second.clone(), first.clone(), second] {
        handles.push(tokio::spawn(async move {
            let txid = coord.get_transaction_id("app1").await?;
            coord.acquire_lock("app1", txid, "customer#42").await
        }));
    }

    let mut acquired = 0;
    for handle in handles {
        match handle.await? {
            Ok(true) => acquired += 1,
            Ok(false) => panic!("acquire_lock returned false"),
            Err(e) => assert_eq!(e.kind(), ErrorKind::Concurrent),
        }
    }
    assert_eq!(acquired, 1);
    Ok(())
}

#[tokio::test]
async fn test_release_is_idempotent() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;
    let txid = coord.get_transaction_id("app1").await?;
    assert!(coord.acquire_lock("app1", txid, "k").await?);

    assert!(coord.release_lock("app1", txid, None).await?);
    assert!(!coord.release_lock("app1", txid, None).await?);
    assert!(!coord.transaction_exists("app1", txid).await?);
    Ok(())
}

#[tokio::test]
async fn test_rollback_without_prior_version() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;
    let tx = coord.get_transaction_id("app1").await?;
    coord.register_updated_key("app1", tx, tx, "K").await?;
    assert_eq!(coord.get_updated_key_list("app1", tx).await?, vec!["K".to_string()]);

    assert!(coord.notify_failed_transaction("app1", tx).await?);

    assert!(coord.is_blacklisted("app1", tx).await?);
    assert_eq!(coord.get_valid_transaction_id("app1", tx, "K").await?, NO_VALID_TXID);
    assert_eq!(
        coord.check_transaction("app1", tx).await.unwrap_err().kind(),
        ErrorKind::Expired
    );
    Ok(())
}

#[tokio::test]
async fn test_rollback_forwards_prior_version() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;

    // tx1 commits K
    let tx1 = coord.get_transaction_id("app1").await?;
    coord.acquire_lock("app1", tx1, "K").await?;
    coord.register_updated_key("app1", tx1, NO_VALID_TXID, "K").await?;
    assert!(coord.release_lock("app1", tx1, Some("K")).await?);

    // tx2 overwrites K on top of tx1 and fails
    let tx2 = coord.get_transaction_id("app1").await?;
    coord.acquire_lock("app1", tx2, "K").await?;
    coord.register_updated_key("app1", tx2, tx1, "K").await?;
    assert_eq!(coord.get_valid_transaction_id("app1", tx2, "K").await?, tx2);
    assert!(coord.notify_failed_transaction("app1", tx2).await?);

    assert_eq!(coord.get_valid_transaction_id("app1", tx2, "K").await?, tx1);
    assert_eq!(coord.get_valid_transaction_id("app1", tx1, "K").await?, tx1);

    // tx3 finds the pointer in place and updates it instead of recording a key
    let tx3 = coord.get_transaction_id("app1").await?;
    coord.register_updated_key("app1", tx3, tx1, "K").await?;
    assert!(coord.get_updated_key_list("app1", tx3).await?.is_empty());
    assert!(coord.notify_failed_transaction("app1", tx3).await?);
    assert_eq!(coord.get_valid_transaction_id("app1", tx3, "K").await?, tx1);
    Ok(())
}

#[tokio::test]
async fn test_blacklist_visible_to_other_process() -> Result<()> {
    let memory = MemoryStore::new();
    let (first, _s1) = coordinator(&memory).await?;
    let (second, _s2) = coordinator(&memory).await?;

    let tx = first.get_transaction_id("app1").await?;
    // Loads and watches the blacklist in the second process
    assert!(!second.is_blacklisted("app1", tx).await?);

    first.notify_failed_transaction("app1", tx).await?;

    let mut seen = false;
    for _ in 0..200 {
        if second.is_blacklisted("app1", tx).await? {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(seen);
    Ok(())
}

#[tokio::test]
async fn test_single_root_key_per_transaction() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;
    let tx = coord.get_transaction_id("app1").await?;

    assert!(coord.acquire_lock("app1", tx, "customer#1").await?);
    assert!(coord.acquire_lock("app1", tx, "customer#1").await?);
    let err = coord.acquire_lock("app1", tx, "customer#2").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DifferentRootKey);
    assert_eq!(
        coord.get_lock_path("app1", tx).await?.as_deref(),
        Some("/appscale/apps/app1/locks/customer%231")
    );
    Ok(())
}

#[tokio::test]
async fn test_end_to_end_success() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;

    let a = coord.get_transaction_id("app1").await?;
    assert_eq!(a, 1);
    assert!(coord.acquire_lock("app1", a, "customer#42").await?);
    coord.register_updated_key("app1", a, a, "customer#42").await?;
    assert!(coord.release_lock("app1", a, None).await?);

    let b = coord.get_transaction_id("app1").await?;
    assert_eq!(b, 2);
    assert!(coord.acquire_lock("app1", b, "customer#42").await?);
    Ok(())
}

#[tokio::test]
async fn test_end_to_end_failure() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;
    let (other, _other_session) = coordinator(&memory).await?;

    let b = coord.get_transaction_id("app1").await?;
    assert!(coord.acquire_lock("app1", b, "order#7").await?);

    let c = other.get_transaction_id("app1").await?;
    let err = other.acquire_lock("app1", c, "order#7").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Concurrent);
    assert!(err.is_retryable());

    assert!(coord.notify_failed_transaction("app1", b).await?);

    let d = other.get_transaction_id("app1").await?;
    assert!(other.acquire_lock("app1", d, "order#7").await?);
    assert_eq!(
        other.get_lock_path("app1", d).await?.as_deref(),
        Some("/appscale/apps/app1/locks/order%237")
    );
    Ok(())
}

#[tokio::test]
async fn test_finished_transaction_is_invalid() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;
    let tx = coord.get_transaction_id("app1").await?;
    coord.release_lock("app1", tx, None).await?;

    for err in [
        coord.check_transaction("app1", tx).await.unwrap_err(),
        coord.acquire_lock("app1", tx, "k").await.unwrap_err(),
        coord.register_updated_key("app1", tx, tx, "k").await.unwrap_err(),
        coord.notify_failed_transaction("app1", tx).await.unwrap_err(),
    ] {
        assert_eq!(err.kind(), ErrorKind::Invalid);
    }
    Ok(())
}

#[tokio::test]
async fn test_id_blocks_disjoint() -> Result<()> {
    let memory = MemoryStore::new();
    let (first, _s1) = coordinator(&memory).await?;
    let (second, _s2) = coordinator(&memory).await?;

    let mut blocks = Vec::new();
    for _ in 0..5 {
        blocks.push(first.generate_id_block("app1", None).await?);
        blocks.push(second.generate_id_block("app1", None).await?);
    }
    for block in &blocks {
        assert!(block.start > 0);
        assert_eq!(block.length, 10);
    }
    for (i, a) in blocks.iter().enumerate() {
        for b in &blocks[i + 1..] {
            assert!(a.end() <= b.start || b.end() <= a.start, "{a:?} overlaps {b:?}");
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_disconnect_surfaces_no_connection() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, session) = coordinator(&memory).await?;
    let tx = coord.get_transaction_id("app1").await?;

    session.disconnect().await;
    let err = coord.get_transaction_id("app1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoConnection);
    assert!(err.is_retryable());
    let err = coord.acquire_lock("app1", tx, "k").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoConnection);

    session.reconnect().await;
    assert!(coord.acquire_lock("app1", tx, "k").await?);
    Ok(())
}

#[tokio::test]
async fn test_session_expiry_recovers() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, session) = coordinator(&memory).await?;
    let tx = coord.get_transaction_id("app1").await?;
    coord.notify_failed_transaction("app1", tx).await?;

    session.expire().await;

    // Callers back off on NoConnection until the event pump has opened a
    // fresh session
    let mut next = None;
    for _ in 0..100 {
        match coord.get_transaction_id("app1").await {
            Ok(txid) => {
                next = Some(txid);
                break;
            }
            Err(e) if e.kind() == ErrorKind::NoConnection => {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
    let next = next.expect("session was not re-established");
    assert!(next > tx);

    // The cache was dropped with the old session and is re-read from the store
    assert!(coord.is_blacklisted("app1", tx).await?);
    Ok(())
}

#[tokio::test]
async fn test_close_ends_session() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;
    coord.get_transaction_id("app1").await?;

    coord.close().await?;
    let err = coord.get_transaction_id("app1").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NoConnection);
    Ok(())
}

#[tokio::test]
async fn test_dump_tree_shows_layout() -> Result<()> {
    let memory = MemoryStore::new();
    let (coord, _session) = coordinator(&memory).await?;
    let tx = coord.get_transaction_id("guestbook").await?;
    coord.acquire_lock("guestbook", tx, "customer#42").await?;

    let rendered = coord.dump_tree(Some("/appscale/apps/guestbook/locks")).await?.to_string();
    assert_eq!(
        rendered,
        "/appscale/apps/guestbook/locks\n└── customer%2342 = /appscale/apps/guestbook/txids/tx0000000001\n"
    );

    let full = coord.dump_tree(None).await?.to_string();
    assert!(full.contains("lockpath = /appscale/apps/guestbook/locks/customer%2342"));
    Ok(())
}
