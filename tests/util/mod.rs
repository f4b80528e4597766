//! Shared helpers for in-process end-to-end tests: a master and any number
//! of workers on ephemeral localhost ports, with fast membership timing.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use flamestore::common::config::BackendConfig;
use flamestore::common::Result;
use flamestore::group::Group;
use flamestore::server::{MasterOptions, MasterServer, WorkerOptions, WorkerServer};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub const WAIT: Duration = Duration::from_millis(50);
pub const DEADLINE: Duration = Duration::from_secs(10);

pub struct TestMaster {
    pub group: Arc<Group>,
    pub handle: JoinHandle<Result<()>>,
}

pub async fn start_master(workspace: &Path, backend: &str, config: BackendConfig) -> TestMaster {
    let server = MasterServer::new(MasterOptions {
        addr: "127.0.0.1:0".to_owned(),
        workspace: workspace.to_path_buf(),
        backend: backend.to_owned(),
        backend_config: config,
        member_deadline: Duration::from_millis(500),
    })
    .await
    .expect("master construction failed");
    let group = server.group();
    let handle = tokio::spawn(server.run());
    TestMaster { group, handle }
}

pub struct TestWorker {
    pub endpoint: String,
    pub storage: PathBuf,
    pub handle: JoinHandle<Result<()>>,
}

pub async fn start_worker(workspace: &Path, storage: &Path) -> TestWorker {
    let server = WorkerServer::new(WorkerOptions {
        addr: "127.0.0.1:0".to_owned(),
        workspace: workspace.to_path_buf(),
        storage_path: storage.to_path_buf(),
        heartbeat_period: Duration::from_millis(100),
        failure_threshold: 3,
    })
    .await
    .expect("worker construction failed");
    let endpoint = server.endpoint().to_owned();
    let handle = tokio::spawn(server.run());
    TestWorker {
        endpoint,
        storage: storage.to_path_buf(),
        handle,
    }
}

/// Wait until the master sees exactly `count` members.
pub async fn wait_for_members(master: &TestMaster, count: usize) {
    let deadline = tokio::time::Instant::now() + DEADLINE;
    loop {
        if master.group.member_count().await == count {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} group members"
        );
        tokio::time::sleep(WAIT).await;
    }
}

/// Number of region files of exactly `size` bytes under a worker's storage
/// path, across all of its targets.
pub fn region_files_of_size(storage: &Path, size: u64) -> usize {
    let mut count = 0;
    let Ok(targets) = std::fs::read_dir(storage) else {
        return 0;
    };
    for target in targets.flatten() {
        let Ok(regions) = std::fs::read_dir(target.path()) else {
            continue;
        };
        for region in regions.flatten() {
            if let Ok(metadata) = region.metadata() {
                if metadata.len() == size {
                    count += 1;
                }
            }
        }
    }
    count
}
