use std::collections::HashMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use futures::future::join_all;
use serde::Serialize;
use uuid::Uuid;

use crate::metrics::BroadcastMetrics;
use crate::websocket::Connection;

use super::types::{BroadcastReport, GroupId, GroupStats};

struct Member {
    id: Uuid,
    connection: Weak<Connection>,
}

impl Member {
    fn live(&self) -> Option<Arc<Connection>> {
        self.connection.upgrade().filter(|c| c.is_alive())
    }
}

/// Process-wide registry of connection groups.
///
/// Groups hold weak references only; a member whose connection was dropped
/// or reached a terminal state is skipped by broadcasts and removed by the
/// next [`sweep`](Self::sweep). Every read copies the member list out of the
/// map before any `.await`.
#[derive(Default)]
pub struct GroupRegistry {
    /// group id -> members in join order
    groups: DashMap<GroupId, Vec<Member>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to a group, creating the group on first use.
    /// Returns false if it was already a member.
    pub fn add_to_group(&self, group: impl Into<GroupId>, connection: &Arc<Connection>) -> bool {
        let group = group.into();
        let mut members = self.groups.entry(group.clone()).or_default();

        if members.iter().any(|m| m.id == connection.id()) {
            return false;
        }
        members.push(Member {
            id: connection.id(),
            connection: Arc::downgrade(connection),
        });

        tracing::debug!(group = %group, connection_id = %connection.id(), members = members.len(), "Joined group");
        true
    }

    /// Remove `connection` from a group. A group left empty is dropped.
    pub fn remove_from_group(&self, group: impl Into<GroupId>, connection: &Connection) -> bool {
        let group = group.into();
        let removed = match self.groups.get_mut(&group) {
            Some(mut members) => {
                let before = members.len();
                members.retain(|m| m.id != connection.id());
                before != members.len()
            }
            None => false,
        };

        if removed {
            self.groups.remove_if(&group, |_, members| members.is_empty());
            tracing::debug!(group = %group, connection_id = %connection.id(), "Left group");
        }
        removed
    }

    /// Snapshot of the group's live members in join order.
    ///
    /// Members that were dropped or reached a terminal state are left out
    /// but stay registered until the next [`sweep`](Self::sweep), so this
    /// can be shorter than [`stats`](Self::stats) reports.
    pub fn get_group_connections(&self, group: impl Into<GroupId>) -> Vec<Arc<Connection>> {
        self.groups
            .get(&group.into())
            .map(|members| members.iter().filter_map(Member::live).collect())
            .unwrap_or_default()
    }

    /// Number of live members. Like [`get_group_connections`](Self::get_group_connections)
    /// it ignores dead members that have not been swept yet.
    pub fn get_group_connection_count(&self, group: impl Into<GroupId>) -> usize {
        self.groups
            .get(&group.into())
            .map(|members| members.iter().filter(|m| m.live().is_some()).count())
            .unwrap_or(0)
    }

    pub fn contains(&self, group: impl Into<GroupId>, connection: &Connection) -> bool {
        self.groups
            .get(&group.into())
            .map(|members| members.iter().any(|m| m.id == connection.id()))
            .unwrap_or(false)
    }

    /// Send `text` to every live member concurrently.
    pub async fn broadcast_text(&self, group: impl Into<GroupId>, text: &str) -> BroadcastReport {
        self.deliver(group.into(), text).await
    }

    /// Serialize `value` once and send it to every live member.
    pub async fn broadcast_json<T>(
        &self,
        group: impl Into<GroupId>,
        value: &T,
    ) -> Result<BroadcastReport, serde_json::Error>
    where
        T: Serialize + ?Sized,
    {
        let text = serde_json::to_string(value)?;
        Ok(self.deliver(group.into(), &text).await)
    }

    async fn deliver(&self, group: GroupId, text: &str) -> BroadcastReport {
        // Copy out so no shard guard lives across the sends
        let members: Vec<Option<Arc<Connection>>> = self
            .groups
            .get(&group)
            .map(|members| members.iter().map(|m| m.connection.upgrade()).collect())
            .unwrap_or_default();

        let mut report = BroadcastReport::default();
        let mut targets = Vec::with_capacity(members.len());
        for member in members {
            match member {
                Some(conn) if conn.is_alive() => targets.push(conn),
                _ => report.skipped += 1,
            }
        }

        let results = join_all(targets.iter().map(|conn| conn.send_text(text))).await;

        for (conn, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::debug!(
                        group = %group,
                        connection_id = %conn.id(),
                        error = %e,
                        "Broadcast delivery failed"
                    );
                }
            }
        }

        BroadcastMetrics::record_report(report.delivered, report.skipped, report.failed);
        tracing::debug!(
            group = %group,
            delivered = report.delivered,
            skipped = report.skipped,
            failed = report.failed,
            "Broadcast complete"
        );

        report
    }

    /// Remove dropped or dead members and then empty groups.
    /// Returns the number of members removed.
    pub fn sweep(&self) -> usize {
        let mut removed = 0;

        for mut entry in self.groups.iter_mut() {
            let before = entry.value().len();
            entry.value_mut().retain(|m| m.live().is_some());
            removed += before - entry.value().len();
        }
        self.groups.retain(|_, members| !members.is_empty());

        let stats = self.stats();
        BroadcastMetrics::set_group_sizes(stats.groups, stats.memberships);

        removed
    }

    /// Every distinct live connection across all groups.
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut unique: HashMap<Uuid, Arc<Connection>> = HashMap::new();
        for entry in self.groups.iter() {
            for conn in entry.value().iter().filter_map(Member::live) {
                unique.entry(conn.id()).or_insert(conn);
            }
        }
        unique.into_values().collect()
    }

    /// Dispose every member connection and empty the registry.
    /// Returns the number of distinct connections disposed.
    pub async fn cleanup(&self) -> usize {
        let mut unique: HashMap<Uuid, Arc<Connection>> = HashMap::new();
        for entry in self.groups.iter() {
            for conn in entry.value().iter().filter_map(|m| m.connection.upgrade()) {
                unique.entry(conn.id()).or_insert(conn);
            }
        }
        self.groups.clear();

        let count = unique.len();
        join_all(unique.values().map(|conn| conn.dispose())).await;

        BroadcastMetrics::set_group_sizes(0, 0);
        tracing::info!(connections = count, "Group registry cleaned up");
        count
    }

    pub fn stats(&self) -> GroupStats {
        let mut stats = GroupStats::default();
        for entry in self.groups.iter() {
            stats.groups += 1;
            stats.memberships += entry.value().len();
        }
        stats
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }
}
