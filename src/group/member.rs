//! Worker-side group membership: join with the published identifier, keep
//! the membership alive, and watch the master.

use crate::common::{Error, Result};
use crate::group::{load_group_file, load_master_id};
use crate::proto::group::group_client::GroupClient;
use crate::proto::group::{JoinRequest, LeaveRequest, PingRequest};
use crate::server::engine::Engine;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Channel;
use uuid::Uuid;

pub struct GroupMembership {
    group: Uuid,
    member_id: u64,
    master_member_id: u64,
    client: GroupClient<Channel>,
}

impl GroupMembership {
    /// Join the group published in the workspace, advertising `self_addr`
    /// as this member's endpoint. Both published files must exist.
    pub async fn join(workspace: &Path, self_addr: &str) -> Result<GroupMembership> {
        let file = load_group_file(workspace)?;
        let master_member_id = load_master_id(workspace)?;
        let mut client = GroupClient::connect(file.master.clone())
            .await
            .map_err(|e| Error::Group(format!("could not reach master at {}: {}", file.master, e)))?;
        let response = client
            .join(JoinRequest {
                group: file.group.to_string(),
                addr: self_addr.to_owned(),
            })
            .await
            .map_err(|s| Error::Group(format!("could not join group: {}", s.message())))?
            .into_inner();
        tracing::info!(
            group = %file.group,
            member_id = response.member_id,
            master_member_id,
            "joined group"
        );
        Ok(GroupMembership {
            group: file.group,
            member_id: response.member_id,
            master_member_id,
            client,
        })
    }

    pub fn member_id(&self) -> u64 {
        self.member_id
    }

    pub fn master_member_id(&self) -> u64 {
        self.master_member_id
    }

    /// Leave the group. Best effort during teardown; the master reaps us
    /// by heartbeat deadline if this never arrives.
    pub async fn leave(&self) -> Result<()> {
        let mut client = self.client.clone();
        client
            .leave(LeaveRequest {
                group: self.group.to_string(),
                member_id: self.member_id,
            })
            .await
            .map_err(|s| Error::Group(format!("could not leave group: {}", s.message())))?;
        Ok(())
    }

    /// Ping the master periodically; after `failure_threshold` consecutive
    /// misses, schedule finalization of this worker's engine. Runs as a
    /// detached task so the engine is never finalized from inside a
    /// membership callback.
    pub fn spawn_master_watch(
        &self,
        engine: Arc<Engine>,
        period: Duration,
        failure_threshold: u32,
    ) -> tokio::task::JoinHandle<()> {
        let mut client = self.client.clone();
        let group = self.group.to_string();
        let member_id = self.member_id;
        let mut shutdown = engine.shutdown_signal();
        tokio::spawn(async move {
            let mut misses = 0u32;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown.wait_for(|finalized| *finalized) => break,
                }
                match client
                    .ping(PingRequest {
                        group: group.clone(),
                        member_id,
                    })
                    .await
                {
                    Ok(_) => misses = 0,
                    Err(status) => {
                        misses += 1;
                        tracing::warn!(misses, "master unreachable: {}", status.message());
                        if misses >= failure_threshold {
                            tracing::error!("master is gone, scheduling worker finalization");
                            engine.finalize();
                            break;
                        }
                    }
                }
            }
        })
    }
}
