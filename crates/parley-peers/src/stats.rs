//! Memory usage report for the peer pools.

use std::fmt;

use serde::Serialize;

use crate::pool::PoolStats;

/// Objects of one kind in use and the bytes they occupy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub in_use: usize,
    pub bytes: usize,
}

impl Usage {
    pub fn of<T>(in_use: usize) -> Self {
        Self::new(in_use, std::mem::size_of::<T>())
    }

    pub fn new(in_use: usize, size: usize) -> Self {
        Self {
            in_use,
            bytes: in_use * size,
        }
    }
}

impl std::ops::Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            in_use: self.in_use + rhs.in_use,
            bytes: self.bytes + rhs.bytes,
        }
    }
}

/// Pool-level counters, including dormant objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolCounters {
    pub peers: PoolStats,
    pub connections: PoolStats,
    pub links: PoolStats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListInfo {
    pub clients: Usage,
    pub connections: Usage,
    pub users: Usage,
    pub servers: Usage,
    pub links: Usage,
    pub memberships: Usage,
    /// Connections whose peer is gone, waiting on cancellations.
    pub parked: usize,
    pub pools: PoolCounters,
}

impl ListInfo {
    /// Sum over every object kind.
    pub fn total(&self) -> Usage {
        self.clients + self.connections + self.users + self.servers + self.links + self.memberships
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "clients": self.clients,
            "connections": self.connections,
            "users": self.users,
            "servers": self.servers,
            "links": self.links,
            "memberships": self.memberships,
            "parked": self.parked,
            "pools": self.pools,
            "total": self.total(),
        })
    }
}

impl fmt::Display for ListInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rows = [
            ("Clients", self.clients),
            ("Connections", self.connections),
            ("Users", self.users),
            ("Servers", self.servers),
            ("Links", self.links),
            ("DLinks", self.memberships),
        ];
        for (label, usage) in rows {
            writeln!(f, "{label}: inuse: {}({})", usage.in_use, usage.bytes)?;
        }
        let total = self.total();
        write!(f, "Total: inuse {}({})", total.in_use, total.bytes)
    }
}
