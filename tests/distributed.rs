//! End-to-end scenarios against a master running the distributed backend
//! and real storage workers, using deterministic hash placement.

mod util;

use flamestore::backend::selection::hash_name;
use flamestore::client::FlameStoreClient;
use flamestore::common::config::BackendConfig;
use flamestore::common::StatusCode;
use flamestore::region::RegionClient;

fn hash_config() -> BackendConfig {
    let mut config = BackendConfig::new();
    config.insert("selection".to_owned(), "hash".to_owned());
    config
}

#[tokio::test]
async fn test_empty_registry_rejects_registration() {
    let workspace = tempfile::tempdir().unwrap();
    let master = util::start_master(workspace.path(), "distributed", BackendConfig::new()).await;
    let client = FlameStoreClient::connect_workspace(workspace.path())
        .await
        .unwrap();

    let status = client.register_model("m1", "cfg", 1024, "s").await.unwrap();
    assert_eq!(status.code, StatusCode::Storage);

    let status = client.shutdown().await.unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    tokio::time::timeout(util::DEADLINE, master.handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_placement_worker_loss_and_drain() {
    let workspace = tempfile::tempdir().unwrap();
    let storage_a = tempfile::tempdir().unwrap();
    let storage_b = tempfile::tempdir().unwrap();

    let master = util::start_master(workspace.path(), "distributed", hash_config()).await;

    // Join order fixes registry order: worker A holds index 0, B index 1.
    let worker_a = util::start_worker(workspace.path(), storage_a.path()).await;
    util::wait_for_members(&master, 1).await;
    let worker_b = util::start_worker(workspace.path(), storage_b.path()).await;
    util::wait_for_members(&master, 2).await;

    let client = FlameStoreClient::connect_workspace(workspace.path())
        .await
        .unwrap();

    // Deterministic placement: m1 lands where hash("m1") mod 2 points.
    let status = client.register_model("m1", "cfg", 1024, "s").await.unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    let expected = (hash_name("m1") % 2) as usize;
    let (owner, survivor) = if expected == 0 {
        (worker_a, worker_b)
    } else {
        (worker_b, worker_a)
    };
    assert_eq!(util::region_files_of_size(&owner.storage, 1024), 1);
    assert_eq!(util::region_files_of_size(&survivor.storage, 1024), 0);

    // Bytes round-trip through the owning worker's region.
    let payload = vec![0xabu8; 1024];
    let status = client.write_model("m1", "s", &payload).await.unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    let (status, data) = client.read_model("m1", "s", 1024).await.unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    assert_eq!(data, payload);

    // Duplication migrates a copy; the two models are then independent.
    let status = client.duplicate_model("m1", "m2").await.unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    let status = client.write_model("m1", "s", &vec![0x11u8; 1024]).await.unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    let (status, data) = client.read_model("m2", "s", 1024).await.unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    assert_eq!(data, payload);

    // Stop the worker owning m1 and wait for the left callback.
    RegionClient::connect(&owner.endpoint)
        .await
        .unwrap()
        .shutdown()
        .await
        .unwrap();
    tokio::time::timeout(util::DEADLINE, owner.handle)
        .await
        .expect("stopped worker did not finalize")
        .unwrap()
        .unwrap();
    util::wait_for_members(&master, 1).await;

    // The departed worker's model fails fast until re-registered. The
    // registry purge races the roster update, so poll for it.
    let deadline = tokio::time::Instant::now() + util::DEADLINE;
    loop {
        let status = client.write_model("m1", "s", &payload).await.unwrap();
        if status.code == StatusCode::Io {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "write of departed model never failed with an IO status"
        );
        tokio::time::sleep(util::WAIT).await;
    }

    // New registrations land on the surviving worker.
    let before = util::region_files_of_size(&survivor.storage, 1024);
    let status = client.register_model("m1b", "cfg", 1024, "s").await.unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    assert_eq!(util::region_files_of_size(&survivor.storage, 1024), before + 1);

    // Graceful drain: shutdown returns only after the registry emptied,
    // and the surviving worker exits cleanly.
    let status = tokio::time::timeout(util::DEADLINE, client.shutdown())
        .await
        .expect("shutdown did not drain")
        .unwrap();
    assert_eq!(status.code, StatusCode::Ok);
    tokio::time::timeout(util::DEADLINE, survivor.handle)
        .await
        .expect("surviving worker did not finalize")
        .unwrap()
        .unwrap();
    tokio::time::timeout(util::DEADLINE, master.handle)
        .await
        .expect("master did not finalize")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_master_loss_cascades_to_workers() {
    let workspace = tempfile::tempdir().unwrap();
    let storage = tempfile::tempdir().unwrap();

    let master = util::start_master(workspace.path(), "distributed", BackendConfig::new()).await;
    let worker = util::start_worker(workspace.path(), storage.path()).await;
    util::wait_for_members(&master, 1).await;

    // Kill the master without draining.
    master.handle.abort();

    // Within a few missed heartbeats the worker finalizes on its own.
    let result = tokio::time::timeout(util::DEADLINE, worker.handle)
        .await
        .expect("worker did not self-finalize after master loss")
        .unwrap();
    assert!(result.is_ok());
}
