//! Connection registry.
//!
//! Tracks every live connection, which user each one is bound to, and which
//! groups each one belongs to. Backed by persistent `im` maps: cloning a
//! `Registry` is O(1), which is how the control loop publishes read-only
//! snapshots without copying state.
//!
//! Invariants, maintained by every operation:
//! - a user maps to at most one connection, and that connection is present;
//! - a connection's group set and the group membership index agree;
//! - a group with no members does not exist.

use im::{HashMap, HashSet};
use std::sync::Arc;

use super::{ConnId, ConnectionHandle};
use crate::error::HubError;
use crate::protocol::{GroupId, UserId};

#[derive(Debug, Clone)]
struct Entry {
    handle: Arc<ConnectionHandle>,
    user: Option<UserId>,
    groups: HashSet<GroupId>,
}

/// Result of binding a connection to a user.
#[derive(Debug, Default)]
pub struct Binding {
    /// Connection that previously served this user. It is unbound but still
    /// registered; the caller decides how to retire it.
    pub superseded: Option<Arc<ConnectionHandle>>,
    /// User this connection was bound to before, now without any connection.
    pub released: Option<UserId>,
    /// The user had no connection before this binding.
    pub newly_online: bool,
}

/// What `remove` took out of the registry.
#[derive(Debug)]
pub struct Removed {
    pub handle: Arc<ConnectionHandle>,
    /// Set only when the removed connection was the user's active one.
    pub went_offline: Option<UserId>,
    pub groups: Vec<GroupId>,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    connections: HashMap<ConnId, Entry>,
    users: HashMap<UserId, ConnId>,
    groups: HashMap<GroupId, HashSet<ConnId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Mutations (control loop only)
    // ========================================================================

    /// Insert an unbound connection. Returns `false` if the id is present.
    pub fn add(&mut self, handle: Arc<ConnectionHandle>) -> bool {
        let id = handle.id();
        if self.contains(id) {
            return false;
        }
        self.connections.insert(
            id,
            Entry {
                handle,
                user: None,
                groups: HashSet::new(),
            },
        );
        true
    }

    /// Bind a connection to a user, displacing any prior binding.
    pub fn bind_user(&mut self, id: ConnId, user: UserId) -> Result<Binding, HubError> {
        let previous = match self.connections.get(&id) {
            Some(entry) => entry.user,
            None => return Err(HubError::UnknownConnection(id)),
        };
        if previous == Some(user) {
            return Ok(Binding::default());
        }

        let mut binding = Binding::default();

        if let Some(old_user) = previous
            && self.users.get(&old_user) == Some(&id)
        {
            self.users.remove(&old_user);
            binding.released = Some(old_user);
        }

        match self.users.insert(user, id) {
            Some(old_id) if old_id != id => {
                if let Some(old_entry) = self.connections.get_mut(&old_id) {
                    old_entry.user = None;
                    binding.superseded = Some(Arc::clone(&old_entry.handle));
                }
            }
            _ => binding.newly_online = true,
        }

        if let Some(entry) = self.connections.get_mut(&id) {
            entry.user = Some(user);
        }
        Ok(binding)
    }

    /// Remove a connection from every index. Removing an absent id is a no-op.
    pub fn remove(&mut self, id: ConnId) -> Option<Removed> {
        let entry = self.connections.remove(&id)?;

        for group in entry.groups.iter() {
            self.detach_from_group(*group, id);
        }

        let went_offline = entry
            .user
            .filter(|user| self.users.get(user) == Some(&id));
        if let Some(user) = went_offline {
            self.users.remove(&user);
        }

        Some(Removed {
            handle: entry.handle,
            went_offline,
            groups: entry.groups.into_iter().collect(),
        })
    }

    /// Returns `false` if the connection is unknown or already a member.
    pub fn join_group(&mut self, group: GroupId, id: ConnId) -> bool {
        let Some(entry) = self.connections.get_mut(&id) else {
            return false;
        };
        if entry.groups.insert(group).is_some() {
            return false;
        }
        self.groups
            .entry(group)
            .or_insert_with(HashSet::new)
            .insert(id);
        true
    }

    /// Returns `false` if the connection was not a member. Empty groups are
    /// pruned immediately.
    pub fn leave_group(&mut self, group: GroupId, id: ConnId) -> bool {
        let Some(entry) = self.connections.get_mut(&id) else {
            return false;
        };
        if entry.groups.remove(&group).is_none() {
            return false;
        }
        self.detach_from_group(group, id);
        true
    }

    fn detach_from_group(&mut self, group: GroupId, id: ConnId) {
        let now_empty = match self.groups.get_mut(&group) {
            Some(members) => {
                members.remove(&id);
                members.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.groups.remove(&group);
        }
    }

    // ========================================================================
    // Reads (safe on snapshots)
    // ========================================================================

    pub fn lookup(&self, user: UserId) -> Option<Arc<ConnectionHandle>> {
        let id = self.users.get(&user)?;
        self.connections.get(id).map(|e| Arc::clone(&e.handle))
    }

    pub fn members(&self, group: GroupId) -> Vec<Arc<ConnectionHandle>> {
        self.groups
            .get(&group)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.connections.get(id))
                    .map(|e| Arc::clone(&e.handle))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .values()
            .map(|e| Arc::clone(&e.handle))
            .collect()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn user_of(&self, id: ConnId) -> Option<UserId> {
        self.connections.get(&id).and_then(|e| e.user)
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.users.contains_key(&user)
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.users.keys().copied().collect();
        users.sort_unstable();
        users
    }

    /// Users bound to a connection in `group`.
    pub fn online_members(&self, group: GroupId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .groups
            .get(&group)
            .map(|ids| ids.iter().filter_map(|id| self.user_of(*id)).collect())
            .unwrap_or_default();
        users.sort_unstable();
        users.dedup();
        users
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::{ConnIdGenerator, Outbound};
    use proptest::prelude::*;
    use tokio::sync::mpsc;

    fn conn(ids: &ConnIdGenerator) -> (Arc<ConnectionHandle>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(4);
        (ConnectionHandle::new(ids.next(), tx), rx)
    }

    fn check_invariants(reg: &Registry) {
        for (user, id) in reg.users.iter() {
            let entry = reg.connections.get(id).expect("user points at missing connection");
            assert_eq!(entry.user, Some(*user));
        }
        for (group, members) in reg.groups.iter() {
            assert!(!members.is_empty(), "empty group {group} not pruned");
            for id in members.iter() {
                let entry = reg.connections.get(id).expect("group lists missing connection");
                assert!(entry.groups.contains(group));
            }
        }
        for (id, entry) in reg.connections.iter() {
            for group in entry.groups.iter() {
                assert!(reg.groups.get(group).is_some_and(|m| m.contains(id)));
            }
        }
    }

    #[test]
    fn add_lookup_remove() {
        let ids = ConnIdGenerator::new();
        let mut reg = Registry::new();
        let (a, _rx) = conn(&ids);

        assert!(reg.add(Arc::clone(&a)));
        assert!(!reg.add(Arc::clone(&a)));
        let binding = reg.bind_user(a.id(), 1).unwrap();
        assert!(binding.newly_online);
        assert_eq!(reg.lookup(1).map(|h| h.id()), Some(a.id()));

        let removed = reg.remove(a.id()).unwrap();
        assert_eq!(removed.went_offline, Some(1));
        assert!(reg.lookup(1).is_none());
        assert!(reg.all().is_empty());
        check_invariants(&reg);
    }

    #[test]
    fn remove_is_idempotent() {
        let ids = ConnIdGenerator::new();
        let mut reg = Registry::new();
        let (a, _rx) = conn(&ids);
        reg.add(Arc::clone(&a));
        assert!(reg.remove(a.id()).is_some());
        assert!(reg.remove(a.id()).is_none());
        assert!(reg.remove(ids.next()).is_none());
    }

    #[test]
    fn bind_unknown_connection_fails() {
        let mut reg = Registry::new();
        let id = ConnIdGenerator::new().next();
        assert_eq!(
            reg.bind_user(id, 1).unwrap_err(),
            HubError::UnknownConnection(id)
        );
    }

    #[test]
    fn second_binding_supersedes_first() {
        let ids = ConnIdGenerator::new();
        let mut reg = Registry::new();
        let (old, _rx1) = conn(&ids);
        let (new, _rx2) = conn(&ids);
        reg.add(Arc::clone(&old));
        reg.add(Arc::clone(&new));
        reg.bind_user(old.id(), 7).unwrap();

        let binding = reg.bind_user(new.id(), 7).unwrap();
        assert_eq!(binding.superseded.map(|h| h.id()), Some(old.id()));
        assert!(!binding.newly_online);
        assert_eq!(reg.lookup(7).map(|h| h.id()), Some(new.id()));
        assert_eq!(reg.user_of(old.id()), None);

        // Removing the superseded connection must not unbind the user.
        let removed = reg.remove(old.id()).unwrap();
        assert_eq!(removed.went_offline, None);
        assert!(reg.is_online(7));
        check_invariants(&reg);
    }

    #[test]
    fn rebinding_same_user_is_noop() {
        let ids = ConnIdGenerator::new();
        let mut reg = Registry::new();
        let (a, _rx) = conn(&ids);
        reg.add(Arc::clone(&a));
        reg.bind_user(a.id(), 3).unwrap();
        let binding = reg.bind_user(a.id(), 3).unwrap();
        assert!(binding.superseded.is_none());
        assert!(!binding.newly_online);
        assert!(binding.released.is_none());
    }

    #[test]
    fn rebinding_other_user_releases_previous() {
        let ids = ConnIdGenerator::new();
        let mut reg = Registry::new();
        let (a, _rx) = conn(&ids);
        reg.add(Arc::clone(&a));
        reg.bind_user(a.id(), 3).unwrap();
        let binding = reg.bind_user(a.id(), 4).unwrap();
        assert_eq!(binding.released, Some(3));
        assert!(binding.newly_online);
        assert!(!reg.is_online(3));
        assert!(reg.is_online(4));
        check_invariants(&reg);
    }

    #[test]
    fn groups_prune_when_empty() {
        let ids = ConnIdGenerator::new();
        let mut reg = Registry::new();
        let (a, _ra) = conn(&ids);
        let (b, _rb) = conn(&ids);
        reg.add(Arc::clone(&a));
        reg.add(Arc::clone(&b));

        assert!(reg.join_group(10, a.id()));
        assert!(!reg.join_group(10, a.id()));
        assert!(reg.join_group(10, b.id()));
        assert_eq!(reg.members(10).len(), 2);

        assert!(reg.leave_group(10, a.id()));
        assert!(!reg.leave_group(10, a.id()));
        assert_eq!(reg.group_count(), 1);

        reg.remove(b.id());
        assert_eq!(reg.group_count(), 0);
        assert!(reg.members(10).is_empty());
        check_invariants(&reg);
    }

    #[test]
    fn join_unknown_connection_is_rejected() {
        let mut reg = Registry::new();
        assert!(!reg.join_group(1, ConnIdGenerator::new().next()));
        assert_eq!(reg.group_count(), 0);
    }

    #[test]
    fn snapshot_is_isolated_from_later_mutation() {
        let ids = ConnIdGenerator::new();
        let mut reg = Registry::new();
        let (a, _ra) = conn(&ids);
        reg.add(Arc::clone(&a));
        reg.bind_user(a.id(), 1).unwrap();
        reg.join_group(5, a.id());

        let snapshot = reg.clone();
        reg.remove(a.id());

        assert!(snapshot.is_online(1));
        assert_eq!(snapshot.members(5).len(), 1);
        assert!(!reg.is_online(1));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add,
        ReAdd(usize),
        Bind(usize, UserId),
        Join(usize, GroupId),
        Leave(usize, GroupId),
        Remove(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Add),
            (0usize..8).prop_map(Op::ReAdd),
            (0usize..8, 0u64..4).prop_map(|(c, u)| Op::Bind(c, u)),
            (0usize..8, 0u64..3).prop_map(|(c, g)| Op::Join(c, g)),
            (0usize..8, 0u64..3).prop_map(|(c, g)| Op::Leave(c, g)),
            (0usize..8).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn invariants_hold_for_any_sequence(ops in prop::collection::vec(op(), 0..64)) {
            let ids = ConnIdGenerator::new();
            let mut reg = Registry::new();
            let mut handles = Vec::new();
            let mut receivers = Vec::new();
            let mut live: std::collections::HashSet<ConnId> = std::collections::HashSet::new();

            for op in ops {
                match op {
                    Op::Add => {
                        let (h, rx) = conn(&ids);
                        prop_assert!(reg.add(Arc::clone(&h)));
                        live.insert(h.id());
                        handles.push(h);
                        receivers.push(rx);
                    }
                    Op::ReAdd(i) => {
                        if let Some(h) = handles.get(i) {
                            let inserted = reg.add(Arc::clone(h));
                            prop_assert_eq!(inserted, live.insert(h.id()));
                        }
                    }
                    Op::Bind(i, user) => {
                        if let Some(h) = handles.get(i) {
                            let _ = reg.bind_user(h.id(), user);
                        }
                    }
                    Op::Join(i, group) => {
                        if let Some(h) = handles.get(i) {
                            reg.join_group(group, h.id());
                        }
                    }
                    Op::Leave(i, group) => {
                        if let Some(h) = handles.get(i) {
                            reg.leave_group(group, h.id());
                        }
                    }
                    Op::Remove(i) => {
                        if let Some(h) = handles.get(i) {
                            prop_assert_eq!(reg.remove(h.id()).is_some(), live.remove(&h.id()));
                        }
                    }
                }
                check_invariants(&reg);
                let actual: std::collections::HashSet<ConnId> =
                    reg.all().iter().map(|h| h.id()).collect();
                prop_assert_eq!(&actual, &live);
            }

            for h in &handles {
                reg.remove(h.id());
            }
            prop_assert_eq!(reg.connection_count(), 0);
            prop_assert_eq!(reg.user_count(), 0);
            prop_assert_eq!(reg.group_count(), 0);
        }
    }
}
