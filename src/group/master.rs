//! Master-side group state: the member roster, the reaper that declares
//! silent members dead, and the gRPC service workers talk to.

use crate::group::{MembershipListener, MASTER_MEMBER_ID};
use crate::proto::group::group_server::{Group as GroupGrpc, GroupServer};
use crate::proto::group::{
    JoinRequest, JoinResponse, LeaveRequest, LeaveResponse, PingRequest, PingResponse,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tonic::{Request, Response, Status};
use uuid::Uuid;

#[derive(Debug)]
struct MemberInfo {
    addr: String,
    last_seen: Instant,
}

pub struct Group {
    id: Uuid,
    deadline: Duration,
    members: Mutex<HashMap<u64, MemberInfo>>,
    next_member_id: AtomicU64,
    listener: OnceLock<Arc<dyn MembershipListener>>,
}

impl Group {
    /// Found a group with this process as the sole member.
    pub fn create(deadline: Duration) -> Arc<Group> {
        let id = Uuid::new_v4();
        tracing::info!(group = %id, "group created");
        Arc::new(Group {
            id,
            deadline,
            members: Mutex::new(HashMap::new()),
            next_member_id: AtomicU64::new(MASTER_MEMBER_ID + 1),
            listener: OnceLock::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Install the membership listener. Must happen before members join;
    /// later calls are ignored.
    pub fn set_listener(&self, listener: Arc<dyn MembershipListener>) {
        let _ = self.listener.set(listener);
    }

    pub async fn member_count(&self) -> usize {
        self.members.lock().await.len()
    }

    async fn notify_joined(&self, member_id: u64, addr: &str) {
        if let Some(listener) = self.listener.get() {
            listener.on_joined(member_id, addr).await;
        }
    }

    pub async fn join(&self, addr: &str) -> u64 {
        let member_id = self.next_member_id.fetch_add(1, Ordering::Relaxed);
        // Listener first: a member becomes visible in the roster only once
        // its advertised targets are known.
        self.notify_joined(member_id, addr).await;
        {
            let mut members = self.members.lock().await;
            members.insert(
                member_id,
                MemberInfo {
                    addr: addr.to_owned(),
                    last_seen: Instant::now(),
                },
            );
        }
        tracing::info!(member_id, addr, "member joined");
        member_id
    }

    pub async fn leave(&self, member_id: u64) -> bool {
        let removed = self.members.lock().await.remove(&member_id).is_some();
        if removed {
            tracing::info!(member_id, "member left");
            if let Some(listener) = self.listener.get() {
                listener.on_left(member_id).await;
            }
        }
        removed
    }

    /// Refresh a member's deadline. False when the member is unknown.
    pub async fn ping(&self, member_id: u64) -> bool {
        let mut members = self.members.lock().await;
        match members.get_mut(&member_id) {
            Some(info) => {
                info.last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Clear the roster at master teardown. No events fire; the group no
    /// longer exists.
    pub async fn destroy(&self) {
        let mut members = self.members.lock().await;
        let count = members.len();
        members.clear();
        tracing::debug!(group = %self.id, members = count, "group destroyed");
    }

    /// Periodically reap members whose heartbeat deadline passed, firing
    /// the died callback for each. Stops when the engine finalizes.
    pub fn spawn_reaper(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let group = self.clone();
        let period = group.deadline / 2;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(period) => {}
                    _ = shutdown.wait_for(|finalized| *finalized) => break,
                }
                let now = Instant::now();
                let expired: Vec<(u64, String)> = {
                    let mut members = group.members.lock().await;
                    let dead: Vec<u64> = members
                        .iter()
                        .filter(|(_, info)| now.duration_since(info.last_seen) > group.deadline)
                        .map(|(id, _)| *id)
                        .collect();
                    dead.into_iter()
                        .filter_map(|id| members.remove(&id).map(|info| (id, info.addr)))
                        .collect()
                };
                for (member_id, addr) in expired {
                    tracing::warn!(member_id, addr, "member missed its heartbeat deadline");
                    if let Some(listener) = group.listener.get() {
                        listener.on_died(member_id).await;
                    }
                }
            }
        })
    }
}

pub struct GroupService {
    group: Arc<Group>,
}

impl GroupService {
    pub fn new(group: Arc<Group>) -> Self {
        GroupService { group }
    }

    pub fn into_server(self) -> GroupServer<Self> {
        GroupServer::new(self)
    }

    fn check_group(&self, raw: &str) -> Result<(), Status> {
        let id = Uuid::parse_str(raw)
            .map_err(|_| Status::invalid_argument(format!("malformed group id: {}", raw)))?;
        if id != self.group.id() {
            return Err(Status::failed_precondition(format!("unknown group {}", id)));
        }
        Ok(())
    }
}

#[tonic::async_trait]
impl GroupGrpc for GroupService {
    async fn join(&self, request: Request<JoinRequest>) -> Result<Response<JoinResponse>, Status> {
        let req = request.into_inner();
        self.check_group(&req.group)?;
        if req.addr.is_empty() {
            return Err(Status::invalid_argument("missing member address"));
        }
        let member_id = self.group.join(&req.addr).await;
        Ok(Response::new(JoinResponse { member_id }))
    }

    async fn leave(
        &self,
        request: Request<LeaveRequest>,
    ) -> Result<Response<LeaveResponse>, Status> {
        let req = request.into_inner();
        self.check_group(&req.group)?;
        self.group.leave(req.member_id).await;
        Ok(Response::new(LeaveResponse {}))
    }

    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        let req = request.into_inner();
        self.check_group(&req.group)?;
        if !self.group.ping(req.member_id).await {
            return Err(Status::not_found(format!("unknown member {}", req.member_id)));
        }
        Ok(Response::new(PingResponse {}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct CountingListener {
        joined: AtomicUsize,
        left: AtomicUsize,
        died: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MembershipListener for CountingListener {
        async fn on_joined(&self, _member_id: u64, _addr: &str) {
            self.joined.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_left(&self, _member_id: u64) {
            self.left.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_died(&self, _member_id: u64) {
            self.died.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_join_assigns_fresh_ids() {
        let group = Group::create(Duration::from_secs(5));
        let a = group.join("http://127.0.0.1:1001").await;
        let b = group.join("http://127.0.0.1:1002").await;
        assert_ne!(a, MASTER_MEMBER_ID);
        assert_ne!(a, b);
        assert_eq!(group.member_count().await, 2);
    }

    #[tokio::test]
    async fn test_leave_fires_listener_once() {
        let group = Group::create(Duration::from_secs(5));
        let listener = Arc::new(CountingListener::default());
        group.set_listener(listener.clone());
        let id = group.join("http://127.0.0.1:1001").await;
        assert!(group.leave(id).await);
        assert!(!group.leave(id).await);
        assert_eq!(listener.joined.load(Ordering::SeqCst), 1);
        assert_eq!(listener.left.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ping_unknown_member() {
        let group = Group::create(Duration::from_secs(5));
        assert!(!group.ping(42).await);
        let id = group.join("http://127.0.0.1:1001").await;
        assert!(group.ping(id).await);
    }

    #[tokio::test]
    async fn test_reaper_declares_silent_member_dead() {
        let group = Group::create(Duration::from_millis(50));
        let listener = Arc::new(CountingListener::default());
        group.set_listener(listener.clone());
        group.join("http://127.0.0.1:1001").await;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let reaper = group.spawn_reaper(shutdown_rx);
        for _ in 0..40 {
            if listener.died.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert_eq!(listener.died.load(Ordering::SeqCst), 1);
        assert_eq!(group.member_count().await, 0);
        let _ = shutdown_tx.send(true);
        let _ = reaper.await;
    }
}
