// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::eventlog::EventLog;
use crate::kv::Kv;
use crate::repo::{ExportSink, RouteRepo, RouteStatus};
use crate::test_support::{MemExport, MemRoutes, MemoryKv};

use super::{ClaimOutcome, RouteClaimer};

struct Fixture {
    routes: Arc<MemRoutes>,
    export: Arc<MemExport>,
    claimer: RouteClaimer,
    log: EventLog,
}

fn fixture() -> Fixture {
    let kv = MemoryKv::new();
    let routes = MemRoutes::new();
    let export = MemExport::new();
    let log = EventLog::new(kv.clone() as Arc<dyn Kv>);
    let claimer = RouteClaimer::new(
        routes.clone() as Arc<dyn RouteRepo>,
        export.clone() as Arc<dyn ExportSink>,
        log.clone(),
    );
    Fixture { routes, export, claimer, log }
}

#[tokio::test]
async fn claim_commits_and_exports() -> anyhow::Result<()> {
    let fx = fixture();
    fx.routes.insert_available("R001", "Passeio", "Centro — manhã");

    let outcome = fx.claimer.claim("R001", 123).await?;
    assert_eq!(outcome, ClaimOutcome::Committed);

    let route = fx.routes.get("R001").expect("route exists");
    assert_eq!(route.status, RouteStatus::Assigned);
    assert_eq!(route.driver_id, Some(123));
    assert!(route.assigned_at.is_some());
    assert_eq!(fx.export.assignments().get("R001"), Some(&123));
    Ok(())
}

#[tokio::test]
async fn second_claim_races_out() -> anyhow::Result<()> {
    let fx = fixture();
    fx.routes.insert_available("R001", "Passeio", "Centro — manhã");

    assert_eq!(fx.claimer.claim("R001", 123).await?, ClaimOutcome::Committed);
    // Same route, other driver: the predicate matches zero rows.
    assert_eq!(fx.claimer.claim("R001", 456).await?, ClaimOutcome::Raced);
    // Even the winning driver cannot re-claim.
    assert_eq!(fx.claimer.claim("R001", 123).await?, ClaimOutcome::Raced);

    let route = fx.routes.get("R001").expect("route exists");
    assert_eq!(route.driver_id, Some(123));
    Ok(())
}

#[tokio::test]
async fn unknown_route_races_out() -> anyhow::Result<()> {
    let fx = fixture();
    assert_eq!(fx.claimer.claim("R999", 123).await?, ClaimOutcome::Raced);
    Ok(())
}

#[tokio::test]
async fn export_failure_keeps_the_claim() -> anyhow::Result<()> {
    let fx = fixture();
    fx.routes.insert_available("R001", "Passeio", "Centro — manhã");
    fx.export.fail_writes.store(true, Ordering::Relaxed);

    let outcome = fx.claimer.claim("R001", 123).await?;
    assert_eq!(outcome, ClaimOutcome::Committed);
    assert_eq!(fx.routes.get("R001").and_then(|r| r.driver_id), Some(123));
    assert!(fx.export.assignments().is_empty());

    let lines = fx.log.today().await;
    assert!(lines.iter().any(|l| l.contains("action=export_failed")), "lines: {lines:?}");
    Ok(())
}

#[tokio::test]
async fn already_assigned_checks_route_table() -> anyhow::Result<()> {
    let fx = fixture();
    fx.routes.insert_available("R001", "Passeio", "Centro — manhã");

    assert!(!fx.claimer.driver_already_assigned(123).await?);
    fx.claimer.claim("R001", 123).await?;
    assert!(fx.claimer.driver_already_assigned(123).await?);
    Ok(())
}

#[tokio::test]
async fn already_assigned_falls_back_to_overview() -> anyhow::Result<()> {
    let fx = fixture();
    // Only the overview knows: e.g. the route table was re-imported.
    fx.export.set_assigned("R777", 123).await?;
    assert!(fx.claimer.driver_already_assigned(123).await?);
    assert!(!fx.claimer.driver_already_assigned(456).await?);
    Ok(())
}
