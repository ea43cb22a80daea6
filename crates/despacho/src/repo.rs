// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver, route, blocklist and assignment-overview repositories.
//!
//! The driver and route tables are refreshed by an external ETL on a
//! schedule; the core only reads drivers and conditionally mutates routes.
//! Object-safe traits so tests can swap in-memory implementations from
//! `test_support`.

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

pub type RepoFuture<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

// -- Records ------------------------------------------------------------------

/// Driver registry record (read-only to the core).
#[derive(Debug, Clone, PartialEq)]
pub struct Driver {
    pub id: i64,
    pub name: String,
    pub vehicle_type: String,
    /// Dispatch priority in [0, 100].
    pub priority_score: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteStatus {
    Available,
    Assigned,
    Blocked,
}

impl RouteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteStatus::Available => "AVAILABLE",
            RouteStatus::Assigned => "ASSIGNED",
            RouteStatus::Blocked => "BLOCKED",
        }
    }

    pub fn parse(raw: &str) -> RouteStatus {
        match raw {
            "ASSIGNED" => RouteStatus::Assigned,
            "BLOCKED" => RouteStatus::Blocked,
            _ => RouteStatus::Available,
        }
    }
}

/// Delivery route, the contested work item.
#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub id: String,
    pub vehicle_type: String,
    pub description: String,
    pub status: RouteStatus,
    pub driver_id: Option<i64>,
    pub assigned_at: Option<DateTime<Utc>>,
}

// -- Traits -------------------------------------------------------------------

pub trait DriverRepo: Send + Sync + 'static {
    fn find_by_id(&self, driver_id: i64) -> RepoFuture<'_, Option<Driver>>;
}

pub trait RouteRepo: Send + Sync + 'static {
    /// Routes a driver of `vehicle_type` may take, in menu order: moto-only
    /// drivers see only moto routes; everyone else sees non-moto routes
    /// first, then moto.
    fn list_available_for_vehicle<'a>(&'a self, vehicle_type: &'a str)
        -> RepoFuture<'a, Vec<Route>>;

    /// The conditional claim: flips AVAILABLE → ASSIGNED for `driver_id`
    /// in one predicate update. Returns false when the route was already
    /// taken, blocked, or unknown.
    fn assign_if_available<'a>(&'a self, route_id: &'a str, driver_id: i64)
        -> RepoFuture<'a, bool>;

    /// The route currently assigned to a driver, if any.
    fn find_assigned(&self, driver_id: i64) -> RepoFuture<'_, Option<Route>>;
}

pub trait BlocklistRepo: Send + Sync + 'static {
    fn is_active(&self, driver_id: i64) -> RepoFuture<'_, bool>;
}

/// Assignment-overview writeback (feeds the spreadsheet export). Best-effort:
/// the route table is authoritative, failures here never reverse a claim.
pub trait ExportSink: Send + Sync + 'static {
    fn set_assigned<'a>(&'a self, route_id: &'a str, driver_id: i64) -> RepoFuture<'a, ()>;

    fn is_assigned(&self, driver_id: i64) -> RepoFuture<'_, bool>;
}

// -- Postgres implementations -------------------------------------------------

#[derive(Clone)]
pub struct PgDriverRepo {
    pool: PgPool,
}

impl PgDriverRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl DriverRepo for PgDriverRepo {
    fn find_by_id(&self, driver_id: i64) -> RepoFuture<'_, Option<Driver>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, name, vehicle_type, priority_score FROM drivers WHERE id = $1",
            )
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;
            let Some(row) = row else { return Ok(None) };
            Ok(Some(Driver {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                vehicle_type: row.try_get("vehicle_type")?,
                priority_score: row.try_get("priority_score")?,
            }))
        })
    }
}

#[derive(Clone)]
pub struct PgRouteRepo {
    pool: PgPool,
}

impl PgRouteRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn route_from_row(row: &sqlx::postgres::PgRow) -> anyhow::Result<Route> {
        let status: String = row.try_get("status")?;
        Ok(Route {
            id: row.try_get("id")?,
            vehicle_type: row.try_get("vehicle_type")?,
            description: row.try_get("description")?,
            status: RouteStatus::parse(&status),
            driver_id: row.try_get("driver_id")?,
            assigned_at: row.try_get("assigned_at")?,
        })
    }
}

impl RouteRepo for PgRouteRepo {
    fn list_available_for_vehicle<'a>(
        &'a self,
        vehicle_type: &'a str,
    ) -> RepoFuture<'a, Vec<Route>> {
        Box::pin(async move {
            let moto_only = crate::group::Group::for_vehicle(vehicle_type)
                == crate::group::Group::Moto;
            let query = if moto_only {
                "SELECT id, vehicle_type, description, status, driver_id, assigned_at \
                 FROM routes WHERE status = 'AVAILABLE' AND lower(vehicle_type) = 'moto' \
                 ORDER BY id"
            } else {
                "SELECT id, vehicle_type, description, status, driver_id, assigned_at \
                 FROM routes WHERE status = 'AVAILABLE' \
                 ORDER BY (lower(vehicle_type) = 'moto') ASC, id"
            };
            let rows = sqlx::query(query).fetch_all(&self.pool).await?;
            rows.iter().map(Self::route_from_row).collect()
        })
    }

    fn assign_if_available<'a>(
        &'a self,
        route_id: &'a str,
        driver_id: i64,
    ) -> RepoFuture<'a, bool> {
        Box::pin(async move {
            let result = sqlx::query(
                "UPDATE routes SET driver_id = $1, status = 'ASSIGNED', assigned_at = now() \
                 WHERE id = $2 AND status = 'AVAILABLE' AND driver_id IS NULL",
            )
            .bind(driver_id)
            .bind(route_id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
    }

    fn find_assigned(&self, driver_id: i64) -> RepoFuture<'_, Option<Route>> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT id, vehicle_type, description, status, driver_id, assigned_at \
                 FROM routes WHERE driver_id = $1 AND status = 'ASSIGNED' LIMIT 1",
            )
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;
            row.as_ref().map(Self::route_from_row).transpose()
        })
    }
}

#[derive(Clone)]
pub struct PgBlocklistRepo {
    pool: PgPool,
}

impl PgBlocklistRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl BlocklistRepo for PgBlocklistRepo {
    fn is_active(&self, driver_id: i64) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let row = sqlx::query(
                "SELECT 1 AS hit FROM blocklist WHERE driver_id = $1 AND status = 'ACTIVE'",
            )
            .bind(driver_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row.is_some())
        })
    }
}

/// Assignment-overview table the export job reads from.
#[derive(Clone)]
pub struct PgExportSink {
    pool: PgPool,
}

impl PgExportSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ExportSink for PgExportSink {
    fn set_assigned<'a>(&'a self, route_id: &'a str, driver_id: i64) -> RepoFuture<'a, ()> {
        Box::pin(async move {
            sqlx::query(
                "INSERT INTO assignment_overview (route_id, driver_id, assigned_at) \
                 VALUES ($1, $2, now()) \
                 ON CONFLICT (route_id) DO UPDATE \
                 SET driver_id = EXCLUDED.driver_id, assigned_at = EXCLUDED.assigned_at",
            )
            .bind(route_id)
            .bind(driver_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn is_assigned(&self, driver_id: i64) -> RepoFuture<'_, bool> {
        Box::pin(async move {
            let row = sqlx::query("SELECT 1 AS hit FROM assignment_overview WHERE driver_id = $1")
                .bind(driver_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row.is_some())
        })
    }
}
