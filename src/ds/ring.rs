//! Ring membership, backup assignment, heartbeat monitor, and the recovery
//! state machine (spec §4.2, §7).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::SnDescriptor;

/// Recovery transitions an SN goes through on rejoin (spec §7):
/// `Idle -> SyncFromBackup -> ReReplicate? -> Online`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecoveryState {
    Idle,
    SyncFromBackup,
    ReReplicate,
    Online,
}

struct Registration {
    descriptor: SnDescriptor,
    last_heartbeat: Instant,
    recovery: RecoveryState,
}

pub struct Ring {
    order: Mutex<Vec<u32>>,
    nodes: Mutex<HashMap<u32, Registration>>,
    by_endpoint: Mutex<HashMap<(String, u16), u32>>,
    next_id: AtomicU32,
    heartbeat_timeout: Duration,
}

/// Computed ring adjacency for one SN.
pub struct RingAssignment {
    pub backup_of: Option<u32>,
    pub replication_target: Option<u32>,
}

impl Ring {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            order: Mutex::new(Vec::new()),
            nodes: Mutex::new(HashMap::new()),
            by_endpoint: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            heartbeat_timeout,
        }
    }

    /// Registers an SN. Reuses the id if `(ip, client_port)` registered
    /// before (flagging `must_recover`); otherwise allocates a fresh id and
    /// splices it into the head of the circular list.
    pub fn register(&self, ip: String, client_port: u16, backup_port: u16, ds_command_port: u16) -> (u32, bool) {
        let key = (ip.clone(), client_port);
        let mut by_endpoint = self.by_endpoint.lock().unwrap();
        if let Some(&id) = by_endpoint.get(&key) {
            let mut nodes = self.nodes.lock().unwrap();
            if let Some(reg) = nodes.get_mut(&id) {
                reg.descriptor.online = true;
                reg.descriptor.ip = ip;
                reg.descriptor.client_port = client_port;
                reg.descriptor.backup_port = backup_port;
                reg.descriptor.ds_command_port = ds_command_port;
                reg.last_heartbeat = Instant::now();
                reg.recovery = RecoveryState::SyncFromBackup;
            }
            return (id, true);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        by_endpoint.insert(key, id);
        let descriptor = SnDescriptor {
            id,
            ip,
            client_port,
            backup_port,
            ds_command_port,
            online: true,
            syncing: false,
            file_count: 0,
            backup_of: None,
        };
        self.nodes.lock().unwrap().insert(
            id,
            Registration { descriptor, last_heartbeat: Instant::now(), recovery: RecoveryState::Idle },
        );
        self.order.lock().unwrap().insert(0, id);
        (id, false)
    }

    pub fn set_recovery_state(&self, id: u32, state: RecoveryState) {
        if let Some(reg) = self.nodes.lock().unwrap().get_mut(&id) {
            reg.recovery = state;
            reg.descriptor.syncing = !matches!(state, RecoveryState::Online);
        }
    }

    pub fn recovery_state(&self, id: u32) -> Option<RecoveryState> {
        self.nodes.lock().unwrap().get(&id).map(|r| r.recovery)
    }

    pub fn touch_heartbeat(&self, id: u32) {
        if let Some(reg) = self.nodes.lock().unwrap().get_mut(&id) {
            reg.last_heartbeat = Instant::now();
        }
    }

    pub fn descriptor(&self, id: u32) -> Option<SnDescriptor> {
        self.nodes.lock().unwrap().get(&id).map(|r| r.descriptor.clone())
    }

    pub fn set_file_count(&self, id: u32, count: u64) {
        if let Some(reg) = self.nodes.lock().unwrap().get_mut(&id) {
            reg.descriptor.file_count = count;
        }
    }

    pub fn increment_file_count(&self, id: u32) {
        if let Some(reg) = self.nodes.lock().unwrap().get_mut(&id) {
            reg.descriptor.file_count += 1;
        }
    }

    pub fn decrement_file_count(&self, id: u32) {
        if let Some(reg) = self.nodes.lock().unwrap().get_mut(&id) {
            reg.descriptor.file_count = reg.descriptor.file_count.saturating_sub(1);
        }
    }

    /// Online, non-syncing SN with the least `file_count`; ties broken by
    /// ring order (spec §4.2 Create step b).
    pub fn select_primary(&self) -> Option<u32> {
        let order = self.order.lock().unwrap();
        let nodes = self.nodes.lock().unwrap();
        order
            .iter()
            .filter_map(|id| nodes.get(id).map(|reg| (*id, reg)))
            .filter(|(_, reg)| reg.descriptor.online && !reg.descriptor.syncing)
            .min_by_key(|(_, reg)| reg.descriptor.file_count)
            .map(|(id, _)| id)
    }

    /// Recomputes `backup_of` assignments for the whole ring: each SN backs
    /// up its predecessor. Returns, per SN, its new assignment so callers
    /// can diff against the old one and trigger re-replication.
    pub fn recompute_assignments(&self) -> HashMap<u32, RingAssignment> {
        let order = self.order.lock().unwrap().clone();
        let mut nodes = self.nodes.lock().unwrap();
        let mut out = HashMap::new();
        let len = order.len();
        for (i, &id) in order.iter().enumerate() {
            let predecessor = if len <= 1 { None } else { Some(order[(i + len - 1) % len]) };
            let successor = if len <= 1 { None } else { Some(order[(i + 1) % len]) };
            if let Some(reg) = nodes.get_mut(&id) {
                reg.descriptor.backup_of = predecessor;
            }
            out.insert(id, RingAssignment { backup_of: predecessor, replication_target: successor });
        }
        out
    }

    /// Scans all SNs; any online SN whose last heartbeat exceeds the
    /// timeout is transitioned offline and returned so the caller can
    /// force-close its socket and trigger ring reassignment.
    pub fn sweep_expired(&self) -> Vec<u32> {
        let mut expired = Vec::new();
        let mut nodes = self.nodes.lock().unwrap();
        for (id, reg) in nodes.iter_mut() {
            if reg.descriptor.online && reg.last_heartbeat.elapsed() > self.heartbeat_timeout {
                reg.descriptor.online = false;
                expired.push(*id);
            }
        }
        expired
    }

    /// The SN that backs up `primary_id`'s files, i.e. the node whose
    /// `backup_of` points at it (its successor in the ring).
    pub fn backup_node_for(&self, primary_id: u32) -> Option<u32> {
        self.nodes
            .lock()
            .unwrap()
            .iter()
            .find(|(_, reg)| reg.descriptor.backup_of == Some(primary_id))
            .map(|(id, _)| *id)
    }

    pub fn all_ids(&self) -> Vec<u32> {
        self.order.lock().unwrap().clone()
    }

    pub fn online_ids(&self) -> Vec<u32> {
        let nodes = self.nodes.lock().unwrap();
        self.order.lock().unwrap().iter().copied().filter(|id| nodes.get(id).is_some_and(|r| r.descriptor.online)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registration_gets_new_id_and_head_position() {
        let ring = Ring::new(Duration::from_secs(15));
        let (id_a, recovered_a) = ring.register("10.0.0.1".into(), 9000, 9001, 9002);
        assert!(!recovered_a);
        let (id_b, recovered_b) = ring.register("10.0.0.2".into(), 9000, 9001, 9002);
        assert!(!recovered_b);
        assert_ne!(id_a, id_b);
        assert_eq!(ring.all_ids(), vec![id_b, id_a]);
    }

    #[test]
    fn re_registration_reuses_id_and_flags_recovery() {
        let ring = Ring::new(Duration::from_secs(15));
        let (id, _) = ring.register("10.0.0.1".into(), 9000, 9001, 9002);
        let (id2, must_recover) = ring.register("10.0.0.1".into(), 9000, 9001, 9002);
        assert_eq!(id, id2);
        assert!(must_recover);
    }

    #[test]
    fn backup_assignment_follows_ring_order() {
        let ring = Ring::new(Duration::from_secs(15));
        let (a, _) = ring.register("a".into(), 1, 2, 3);
        let (b, _) = ring.register("b".into(), 1, 2, 3);
        let (c, _) = ring.register("c".into(), 1, 2, 3);
        // order is [c, b, a] (head-spliced)
        let assignments = ring.recompute_assignments();
        assert_eq!(assignments[&c].backup_of, Some(a));
        assert_eq!(assignments[&b].backup_of, Some(c));
        assert_eq!(assignments[&a].backup_of, Some(b));
    }

    #[test]
    fn select_primary_prefers_least_loaded_online_node() {
        let ring = Ring::new(Duration::from_secs(15));
        let (a, _) = ring.register("a".into(), 1, 2, 3);
        let (b, _) = ring.register("b".into(), 1, 2, 3);
        ring.set_file_count(a, 5);
        ring.set_file_count(b, 1);
        assert_eq!(ring.select_primary(), Some(b));
    }

    #[test]
    fn heartbeat_sweep_expires_stale_nodes() {
        let ring = Ring::new(Duration::from_millis(1));
        let (id, _) = ring.register("a".into(), 1, 2, 3);
        std::thread::sleep(Duration::from_millis(5));
        let expired = ring.sweep_expired();
        assert_eq!(expired, vec![id]);
        assert!(!ring.descriptor(id).unwrap().online);
    }
}
