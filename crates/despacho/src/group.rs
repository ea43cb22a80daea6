// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue groups and the persisted key layout.
//!
//! Drivers are partitioned into two service groups by vehicle class. The
//! group is derived once, when the driver confirms identity, and never
//! changes for the lifetime of the session.

use serde::{Deserialize, Serialize};

/// Routing partition for queues and active slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Moto,
    General,
}

impl Group {
    pub const ALL: [Group; 2] = [Group::Moto, Group::General];

    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Moto => "moto",
            Group::General => "general",
        }
    }

    /// Classify a vehicle type into its service group.
    pub fn for_vehicle(vehicle_type: &str) -> Group {
        if vehicle_type.trim().eq_ignore_ascii_case("moto") {
            Group::Moto
        } else {
            Group::General
        }
    }

    pub fn list_key(&self) -> String {
        format!("queue:list:{}", self.as_str())
    }

    pub fn active_key(&self) -> String {
        format!("queue:active:{}", self.as_str())
    }

    pub fn active_meta_key(&self) -> String {
        format!("queue:active:meta:{}", self.as_str())
    }

    pub fn lock_key(&self) -> String {
        format!("queue:lock:{}", self.as_str())
    }

    pub fn reclaim_lock_key(&self) -> String {
        format!("queue:reclaim:lock:{}", self.as_str())
    }

    pub fn empty_since_key(&self) -> String {
        format!("queue:empty_since:{}", self.as_str())
    }
}

impl std::fmt::Display for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fiorino vans are dispatched ahead of every other vehicle in the same
/// group; the bias is domain policy, not a tuning knob.
pub fn is_fiorino(vehicle_type: &str) -> bool {
    vehicle_type.trim().eq_ignore_ascii_case("fiorino")
}

pub fn session_key(chat_id: i64) -> String {
    format!("session:{chat_id}")
}

pub fn member_key(chat_id: i64) -> String {
    format!("queue:member:{chat_id}")
}

pub fn timer_key(chat_id: i64) -> String {
    format!("route:timeout:{chat_id}")
}

pub fn blocklist_cache_key(driver_id: i64) -> String {
    format!("blocklist:cache:driver:{driver_id}")
}

#[cfg(test)]
#[path = "group_tests.rs"]
mod tests;
