use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use armada_fabric::{EventSink, ResourceKind};
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// WebSocket close code for "server is at capacity, try again later".
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;

/// One serialized frame pushed to clients.
#[derive(Debug, Clone, Serialize)]
pub struct WsFrame {
    #[serde(rename = "type")]
    pub frame_type: &'static str,
    pub data: Value,
    pub timestamp: String,
}

impl WsFrame {
    pub fn new(frame_type: &'static str, data: Value) -> Self {
        Self {
            frame_type,
            data,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn status_connected() -> Self {
        Self::new("status", json!({"status": "connected"}))
    }

    pub fn error(message: &str) -> Self {
        Self::new("error", json!({"message": message}))
    }

    pub fn ping() -> Self {
        Self::new("ping", json!({}))
    }

    fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

struct Connection {
    tx: mpsc::Sender<String>,
    user_id: i64,
    connected_at: Instant,
    last_heartbeat: Instant,
}

#[derive(Default)]
struct Rooms {
    cluster: HashMap<i64, HashSet<String>>,
    namespace: HashMap<(i64, String), HashSet<String>>,
    kind: HashMap<(i64, String), HashSet<String>>,
}

#[derive(Default)]
struct HubInner {
    connections: HashMap<String, Connection>,
    rooms: Rooms,
}

/// Connection registry and room fan-out. Membership mutation is atomic with
/// broadcast snapshotting; the mutex is never held across a send.
pub struct Hub {
    max_connections: usize,
    broadcast_concurrency: usize,
    heartbeat_interval: Duration,
    inner: Mutex<HubInner>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RegistryFull;

impl Hub {
    pub fn new(max_connections: usize) -> Arc<Self> {
        Arc::new(Self {
            max_connections,
            broadcast_concurrency: 50,
            heartbeat_interval: Duration::from_secs(30),
            inner: Mutex::new(HubInner::default()),
        })
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }

    /// Admit a connection unless the registry is full.
    pub fn register(
        &self,
        connection_id: &str,
        user_id: i64,
        tx: mpsc::Sender<String>,
    ) -> Result<(), RegistryFull> {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if inner.connections.len() >= self.max_connections {
            return Err(RegistryFull);
        }
        inner.connections.insert(
            connection_id.to_string(),
            Connection {
                tx,
                user_id,
                connected_at: Instant::now(),
                last_heartbeat: Instant::now(),
            },
        );
        tracing::info!(connection_id, user_id, "websocket connection registered");
        Ok(())
    }

    /// Remove the connection from every room, then drop it from the
    /// registry. Dropping its sender ends the writer task, which closes the
    /// socket — so a concurrent broadcast can never address a half-live
    /// connection. Duplicate disconnects are no-ops.
    pub fn disconnect(&self, connection_id: &str) {
        let removed = {
            let mut inner = self.inner.lock().expect("hub lock poisoned");
            Self::leave_all_rooms(&mut inner.rooms, connection_id);
            inner.connections.remove(connection_id)
        };
        if removed.is_some() {
            tracing::info!(connection_id, "websocket connection closed");
        } else {
            tracing::debug!(connection_id, "duplicate disconnect ignored");
        }
    }

    fn leave_all_rooms(rooms: &mut Rooms, connection_id: &str) {
        rooms.cluster.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
        rooms.namespace.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
        rooms.kind.retain(|_, members| {
            members.remove(connection_id);
            !members.is_empty()
        });
    }

    pub fn mark_heartbeat(&self, connection_id: &str) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let Some(conn) = inner.connections.get_mut(connection_id) {
            conn.last_heartbeat = Instant::now();
        }
    }

    fn join(&self, connection_id: &str, select: impl FnOnce(&mut Rooms) -> &mut HashSet<String>) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        // Membership is only ever granted to live connections.
        if !inner.connections.contains_key(connection_id) {
            return;
        }
        select(&mut inner.rooms).insert(connection_id.to_string());
    }

    pub fn join_cluster(&self, connection_id: &str, cluster_id: i64) {
        self.join(connection_id, |rooms| {
            rooms.cluster.entry(cluster_id).or_default()
        });
    }

    pub fn leave_cluster(&self, connection_id: &str, cluster_id: i64) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        if let Some(members) = inner.rooms.cluster.get_mut(&cluster_id) {
            members.remove(connection_id);
            if members.is_empty() {
                inner.rooms.cluster.remove(&cluster_id);
            }
        }
    }

    pub fn join_namespace(&self, connection_id: &str, cluster_id: i64, namespace: &str) {
        self.join(connection_id, |rooms| {
            rooms
                .namespace
                .entry((cluster_id, namespace.to_string()))
                .or_default()
        });
    }

    pub fn leave_namespace(&self, connection_id: &str, cluster_id: i64, namespace: &str) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let key = (cluster_id, namespace.to_string());
        if let Some(members) = inner.rooms.namespace.get_mut(&key) {
            members.remove(connection_id);
            if members.is_empty() {
                inner.rooms.namespace.remove(&key);
            }
        }
    }

    pub fn join_kind(&self, connection_id: &str, cluster_id: i64, kind: &str) {
        self.join(connection_id, |rooms| {
            rooms.kind.entry((cluster_id, kind.to_string())).or_default()
        });
    }

    pub fn leave_kind(&self, connection_id: &str, cluster_id: i64, kind: &str) {
        let mut inner = self.inner.lock().expect("hub lock poisoned");
        let key = (cluster_id, kind.to_string());
        if let Some(members) = inner.rooms.kind.get_mut(&key) {
            members.remove(connection_id);
            if members.is_empty() {
                inner.rooms.kind.remove(&key);
            }
        }
    }

    fn snapshot_members(&self, targets: &HashSet<String>) -> Vec<(String, mpsc::Sender<String>)> {
        let inner = self.inner.lock().expect("hub lock poisoned");
        targets
            .iter()
            .filter_map(|id| {
                inner
                    .connections
                    .get(id)
                    .map(|c| (id.clone(), c.tx.clone()))
            })
            .collect()
    }

    /// Fan a frame out to a member snapshot through the bounded concurrency
    /// window. A failed send disconnects only that connection.
    async fn dispatch(&self, members: Vec<(String, mpsc::Sender<String>)>, frame: &WsFrame) {
        if members.is_empty() {
            return;
        }
        let payload = frame.encode();
        futures::stream::iter(members)
            .for_each_concurrent(self.broadcast_concurrency, |(id, tx)| {
                let payload = payload.clone();
                async move {
                    if tx.send(payload).await.is_err() {
                        tracing::debug!(connection_id = %id, "send failed, disconnecting");
                        self.disconnect(&id);
                    }
                }
            })
            .await;
    }

    pub async fn send_personal(&self, connection_id: &str, frame: &WsFrame) {
        let tx = {
            let inner = self.inner.lock().expect("hub lock poisoned");
            inner.connections.get(connection_id).map(|c| c.tx.clone())
        };
        let Some(tx) = tx else {
            return;
        };
        if tx.send(frame.encode()).await.is_err() {
            self.disconnect(connection_id);
        }
    }

    pub async fn broadcast_to_cluster(&self, cluster_id: i64, frame: &WsFrame) {
        let members = {
            let inner = self.inner.lock().expect("hub lock poisoned");
            inner.rooms.cluster.get(&cluster_id).cloned()
        };
        if let Some(targets) = members {
            let members = self.snapshot_members(&targets);
            self.dispatch(members, frame).await;
        }
    }

    pub async fn broadcast_to_namespace(&self, cluster_id: i64, namespace: &str, frame: &WsFrame) {
        let members = {
            let inner = self.inner.lock().expect("hub lock poisoned");
            inner
                .rooms
                .namespace
                .get(&(cluster_id, namespace.to_string()))
                .cloned()
        };
        if let Some(targets) = members {
            let members = self.snapshot_members(&targets);
            self.dispatch(members, frame).await;
        }
    }

    pub async fn broadcast_to_kind(&self, cluster_id: i64, kind: &str, frame: &WsFrame) {
        let members = {
            let inner = self.inner.lock().expect("hub lock poisoned");
            inner.rooms.kind.get(&(cluster_id, kind.to_string())).cloned()
        };
        if let Some(targets) = members {
            let members = self.snapshot_members(&targets);
            self.dispatch(members, frame).await;
        }
    }

    /// Heartbeat loop: ping everyone, drop connections that have been
    /// silent for two intervals.
    pub async fn run_heartbeat(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let timeout = self.heartbeat_interval * 2;
            let (stale, live): (Vec<String>, Vec<String>) = {
                let inner = self.inner.lock().expect("hub lock poisoned");
                let mut stale = Vec::new();
                let mut live = Vec::new();
                for (id, conn) in inner.connections.iter() {
                    if conn.last_heartbeat.elapsed() > timeout {
                        stale.push(id.clone());
                    } else {
                        live.push(id.clone());
                    }
                }
                (stale, live)
            };

            for id in stale {
                tracing::warn!(connection_id = %id, "heartbeat timeout, disconnecting");
                self.disconnect(&id);
            }

            let ping = WsFrame::ping();
            for id in live {
                self.send_personal(&id, &ping).await;
            }
        }
        tracing::debug!("heartbeat loop stopped");
    }

    pub fn stats(&self) -> Value {
        let inner = self.inner.lock().expect("hub lock poisoned");
        let cluster_rooms = inner.rooms.cluster.len();
        let namespace_rooms = inner.rooms.namespace.len();
        let kind_rooms = inner.rooms.kind.len();
        json!({
            "active_connections": inner.connections.len(),
            "cluster_rooms": cluster_rooms,
            "namespace_rooms": namespace_rooms,
            "resource_rooms": kind_rooms,
            "total_rooms": cluster_rooms + namespace_rooms + kind_rooms,
        })
    }

    /// Per-connection metadata for the admin monitoring view.
    pub fn connections(&self) -> Value {
        let inner = self.inner.lock().expect("hub lock poisoned");
        let mut out: Vec<Value> = inner
            .connections
            .iter()
            .map(|(id, conn)| {
                json!({
                    "connection_id": id,
                    "user_id": conn.user_id,
                    "connected_secs": conn.connected_at.elapsed().as_secs(),
                    "last_heartbeat_secs": conn.last_heartbeat.elapsed().as_secs(),
                })
            })
            .collect();
        out.sort_by_key(|c| c["connection_id"].as_str().map(|s| s.to_string()));
        Value::Array(out)
    }

    #[cfg(test)]
    fn is_member_of_cluster(&self, connection_id: &str, cluster_id: i64) -> bool {
        let inner = self.inner.lock().expect("hub lock poisoned");
        inner
            .rooms
            .cluster
            .get(&cluster_id)
            .map(|m| m.contains(connection_id))
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn connection_count(&self) -> usize {
        self.inner.lock().expect("hub lock poisoned").connections.len()
    }
}

#[async_trait::async_trait]
impl EventSink for Hub {
    async fn resource_update(
        &self,
        cluster_id: i64,
        kind: ResourceKind,
        namespace: Option<String>,
        payload: Value,
    ) {
        let frame = WsFrame::new(
            "resource_update",
            json!({
                "resource_type": kind.label(),
                "resource_data": payload,
                "cluster_id": cluster_id,
                "namespace": namespace.clone(),
            }),
        );
        self.broadcast_to_cluster(cluster_id, &frame).await;
        if let Some(ns) = namespace.as_deref() {
            self.broadcast_to_namespace(cluster_id, ns, &frame).await;
        }
        self.broadcast_to_kind(cluster_id, kind.label(), &frame).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(hub: &Hub, id: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(16);
        hub.register(id, 1, tx).expect("register");
        rx
    }

    #[tokio::test]
    async fn registry_refuses_connections_past_the_bound() {
        let hub = Hub::new(2);
        let _a = connect(&hub, "a");
        let _b = connect(&hub, "b");
        let (tx, _rx) = mpsc::channel(1);
        assert_eq!(hub.register("c", 1, tx), Err(RegistryFull));
        assert_eq!(hub.connection_count(), 2);
    }

    #[tokio::test]
    async fn join_then_leave_is_a_no_op_and_empty_rooms_are_dropped() {
        let hub = Hub::new(10);
        let _rx = connect(&hub, "a");
        hub.join_cluster("a", 1);
        assert!(hub.is_member_of_cluster("a", 1));
        assert_eq!(hub.stats()["cluster_rooms"], 1);
        hub.leave_cluster("a", 1);
        assert!(!hub.is_member_of_cluster("a", 1));
        assert_eq!(hub.stats()["cluster_rooms"], 0);
    }

    #[tokio::test]
    async fn unregistered_connections_cannot_enter_rooms() {
        let hub = Hub::new(10);
        hub.join_cluster("ghost", 1);
        assert_eq!(hub.stats()["cluster_rooms"], 0);
    }

    #[tokio::test]
    async fn disconnect_clears_every_membership() {
        let hub = Hub::new(10);
        let _rx = connect(&hub, "a");
        hub.join_cluster("a", 1);
        hub.join_namespace("a", 1, "default");
        hub.join_kind("a", 1, "pods");
        assert_eq!(hub.stats()["total_rooms"], 3);

        hub.disconnect("a");
        assert_eq!(hub.stats()["active_connections"], 0);
        assert_eq!(hub.stats()["total_rooms"], 0);

        // A broadcast after disconnect must not address the connection.
        hub.broadcast_to_cluster(1, &WsFrame::ping()).await;
        // Duplicate disconnect is swallowed.
        hub.disconnect("a");
    }

    #[tokio::test]
    async fn broadcast_reaches_only_the_room() {
        let hub = Hub::new(10);
        let mut rx_a = connect(&hub, "a");
        let mut rx_b = connect(&hub, "b");
        hub.join_cluster("a", 1);
        hub.join_cluster("b", 2);

        hub.broadcast_to_cluster(1, &WsFrame::new("resource_update", json!({"x": 1})))
            .await;
        let frame = rx_a.try_recv().expect("member receives");
        assert!(frame.contains("resource_update"));
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn failed_send_evicts_only_the_dead_connection() {
        let hub = Hub::new(10);
        let (dead_tx, dead_rx) = mpsc::channel(1);
        hub.register("dead", 1, dead_tx).unwrap();
        drop(dead_rx);
        let mut rx_live = connect(&hub, "live");
        hub.join_cluster("dead", 1);
        hub.join_cluster("live", 1);

        hub.broadcast_to_cluster(1, &WsFrame::ping()).await;
        assert!(rx_live.try_recv().is_ok());
        assert_eq!(hub.stats()["active_connections"], 1);
        assert!(!hub.is_member_of_cluster("dead", 1));
    }

    #[tokio::test]
    async fn resource_update_frame_shape() {
        let hub = Hub::new(10);
        let mut rx = connect(&hub, "a");
        hub.join_kind("a", 5, "pods");
        hub.resource_update(5, ResourceKind::Pod, Some("default".into()), json!({"name": "p"}))
            .await;
        let raw = rx.try_recv().expect("frame delivered");
        let frame: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(frame["type"], "resource_update");
        assert_eq!(frame["data"]["resource_type"], "pods");
        assert_eq!(frame["data"]["cluster_id"], 5);
        assert_eq!(frame["data"]["resource_data"]["name"], "p");
        assert!(frame["timestamp"].as_str().unwrap().contains('T'));
    }
}
