// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Route claim executor.
//!
//! The claim is one conditional predicate-update against the route table;
//! the table is authoritative. The assignment-overview export is attempted
//! after a successful claim and its failure is logged, never reversed.

use std::sync::Arc;

use crate::eventlog::EventLog;
use crate::repo::{ExportSink, RouteRepo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The route is now ASSIGNED to the driver.
    Committed,
    /// The predicate matched zero rows: raced, blocked, or unknown route.
    Raced,
}

#[derive(Clone)]
pub struct RouteClaimer {
    routes: Arc<dyn RouteRepo>,
    export: Arc<dyn ExportSink>,
    events: EventLog,
}

impl RouteClaimer {
    pub fn new(routes: Arc<dyn RouteRepo>, export: Arc<dyn ExportSink>, events: EventLog) -> Self {
        Self { routes, export, events }
    }

    /// Belt-and-braces check run both before entering the queue and again
    /// before each claim: the same human driver may be talking from more
    /// than one chat. True when either the route table or the
    /// assignment-overview view says the driver already holds a route.
    pub async fn driver_already_assigned(&self, driver_id: i64) -> anyhow::Result<bool> {
        if self.routes.find_assigned(driver_id).await?.is_some() {
            return Ok(true);
        }
        match self.export.is_assigned(driver_id).await {
            Ok(assigned) => Ok(assigned),
            Err(e) => {
                // Overview is best-effort; the route table already answered no.
                tracing::warn!(driver_id, err = %e, "assignment overview check failed");
                Ok(false)
            }
        }
    }

    /// Execute the conditional claim and, on success, the best-effort
    /// export. Idempotent re-issue of a lost confirmation is safe: a second
    /// attempt for an already-claimed route reports [`ClaimOutcome::Raced`]
    /// without mutating anything.
    pub async fn claim(&self, route_id: &str, driver_id: i64) -> anyhow::Result<ClaimOutcome> {
        if !self.routes.assign_if_available(route_id, driver_id).await? {
            self.events
                .append("claim_raced", &[("route", route_id.to_owned()), ("driver", driver_id.to_string())])
                .await;
            return Ok(ClaimOutcome::Raced);
        }

        self.events
            .append("claim", &[("route", route_id.to_owned()), ("driver", driver_id.to_string())])
            .await;

        if let Err(e) = self.export.set_assigned(route_id, driver_id).await {
            tracing::warn!(route_id, driver_id, err = %e, "assignment export failed");
            self.events
                .append("export_failed", &[("route", route_id.to_owned()), ("driver", driver_id.to_string())])
                .await;
        }
        Ok(ClaimOutcome::Committed)
    }
}

#[cfg(test)]
#[path = "claim_tests.rs"]
mod tests;
