// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: in-memory adapters and state builders.
//!
//! `MemoryKv` honors TTLs against the process clock; tests that need aged
//! timestamps write the aged value directly (deferral timestamps and slot
//! metadata carry epoch instants as data, not key TTLs).

use std::collections::{HashMap, HashSet};
use std::future::ready;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::BotConfig;
use crate::error::KvError;
use crate::kv::{Kv, KvFuture};
use crate::repo::{BlocklistRepo, Driver, DriverRepo, ExportSink, RepoFuture, Route, RouteRepo, RouteStatus};
use crate::state::{Adapters, AppState};
use crate::sync::{SyncFuture, SyncRunner, SyncScope, SyncSummary};
use crate::transport::telegram::{ChatSender, SendFuture};

// -- MemoryKv -----------------------------------------------------------------

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
    }
}

#[derive(Debug, Clone)]
struct ListEntry {
    items: Vec<String>,
    expires_at: Option<Instant>,
}

/// In-process stand-in for the shared KV store.
#[derive(Default)]
pub struct MemoryKv {
    strings: Mutex<HashMap<String, Entry>>,
    lists: Mutex<HashMap<String, ListEntry>>,
}

impl MemoryKv {
    pub fn new() -> Arc<MemoryKv> {
        Arc::new(MemoryKv::default())
    }

    fn get_sync(&self, key: &str) -> Option<String> {
        let mut strings = self.strings.lock().unwrap_or_else(|e| e.into_inner());
        match strings.get(key) {
            Some(entry) if entry.live() => Some(entry.value.clone()),
            Some(_) => {
                strings.remove(key);
                None
            }
            None => None,
        }
    }

    fn with_list<T>(&self, key: &str, f: impl FnOnce(&mut Vec<String>) -> T) -> T {
        let mut lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        let expired = lists
            .get(key)
            .map(|l| l.expires_at.map(|at| Instant::now() >= at).unwrap_or(false))
            .unwrap_or(false);
        if expired {
            lists.remove(key);
        }
        let entry = lists
            .entry(key.to_owned())
            .or_insert_with(|| ListEntry { items: Vec::new(), expires_at: None });
        let result = f(&mut entry.items);
        if entry.items.is_empty() {
            lists.remove(key);
        }
        result
    }
}

fn range_bounds(len: usize, start: isize, stop: isize) -> (usize, usize) {
    let norm = |i: isize| -> isize { if i < 0 { i + len as isize } else { i } };
    let lo = norm(start).max(0) as usize;
    let hi = norm(stop).min(len as isize - 1);
    if hi < 0 {
        return (0, 0);
    }
    (lo.min(len), (hi as usize + 1).min(len))
}

/// Minimal glob: `*` matches any run of characters.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.split_once('*') {
        None => pattern == key,
        Some((prefix, rest)) => {
            let Some(after) = key.strip_prefix(prefix) else { return false };
            if rest.is_empty() {
                return true;
            }
            after
                .char_indices()
                .map(|(i, _)| i)
                .chain([after.len()])
                .any(|i| glob_match(rest, &after[i..]))
        }
    }
}

impl Kv for MemoryKv {
    fn get<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        Box::pin(ready(Ok(self.get_sync(key))))
    }

    fn set_ttl<'a>(&'a self, key: &'a str, value: &'a str, ttl: Duration) -> KvFuture<'a, ()> {
        let mut strings = self.strings.lock().unwrap_or_else(|e| e.into_inner());
        strings.insert(
            key.to_owned(),
            Entry { value: value.to_owned(), expires_at: Some(Instant::now() + ttl) },
        );
        Box::pin(ready(Ok(())))
    }

    fn set_if_absent<'a>(
        &'a self,
        key: &'a str,
        value: &'a str,
        ttl: Duration,
    ) -> KvFuture<'a, bool> {
        let mut strings = self.strings.lock().unwrap_or_else(|e| e.into_inner());
        let absent = !strings.get(key).map(Entry::live).unwrap_or(false);
        if absent {
            strings.insert(
                key.to_owned(),
                Entry { value: value.to_owned(), expires_at: Some(Instant::now() + ttl) },
            );
        }
        Box::pin(ready(Ok(absent)))
    }

    fn del<'a>(&'a self, key: &'a str) -> KvFuture<'a, ()> {
        self.strings.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        self.lists.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Box::pin(ready(Ok(())))
    }

    fn rpush<'a>(&'a self, key: &'a str, value: &'a str) -> KvFuture<'a, ()> {
        self.with_list(key, |items| items.push(value.to_owned()));
        Box::pin(ready(Ok(())))
    }

    fn lrange<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> KvFuture<'a, Vec<String>> {
        let items = self.with_list(key, |items| {
            let (lo, hi) = range_bounds(items.len(), start, stop);
            items.get(lo..hi).map(|s| s.to_vec()).unwrap_or_default()
        });
        Box::pin(ready(Ok(items)))
    }

    fn lrem<'a>(&'a self, key: &'a str, count: isize, value: &'a str) -> KvFuture<'a, usize> {
        let removed = self.with_list(key, |items| {
            let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() };
            let before = items.len();
            if count >= 0 {
                let mut kept = 0;
                items.retain(|item| {
                    if item == value && kept < limit {
                        kept += 1;
                        false
                    } else {
                        true
                    }
                });
            } else {
                let mut kept = 0;
                let mut reversed: Vec<String> = items.drain(..).rev().collect();
                reversed.retain(|item| {
                    if item == value && kept < limit {
                        kept += 1;
                        false
                    } else {
                        true
                    }
                });
                *items = reversed.into_iter().rev().collect();
            }
            before - items.len()
        });
        Box::pin(ready(Ok(removed)))
    }

    fn lpop<'a>(&'a self, key: &'a str) -> KvFuture<'a, Option<String>> {
        let popped = self.with_list(key, |items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        });
        Box::pin(ready(Ok(popped)))
    }

    fn ltrim<'a>(&'a self, key: &'a str, start: isize, stop: isize) -> KvFuture<'a, ()> {
        self.with_list(key, |items| {
            let (lo, hi) = range_bounds(items.len(), start, stop);
            let kept = items.get(lo..hi).map(|s| s.to_vec()).unwrap_or_default();
            *items = kept;
        });
        Box::pin(ready(Ok(())))
    }

    fn llen<'a>(&'a self, key: &'a str) -> KvFuture<'a, usize> {
        let len = self.with_list(key, |items| items.len());
        Box::pin(ready(Ok(len)))
    }

    fn scan<'a>(&'a self, pattern: &'a str) -> KvFuture<'a, Vec<String>> {
        let strings = self.strings.lock().unwrap_or_else(|e| e.into_inner());
        let lists = self.lists.lock().unwrap_or_else(|e| e.into_inner());
        let mut keys: Vec<String> = strings
            .iter()
            .filter(|(k, v)| v.live() && glob_match(pattern, k))
            .map(|(k, _)| k.clone())
            .chain(
                lists
                    .iter()
                    .filter(|(k, l)| {
                        l.expires_at.map(|at| Instant::now() < at).unwrap_or(true)
                            && glob_match(pattern, k)
                    })
                    .map(|(k, _)| k.clone()),
            )
            .collect();
        keys.sort();
        Box::pin(ready(Ok(keys)))
    }

    fn expire<'a>(&'a self, key: &'a str, ttl: Duration) -> KvFuture<'a, ()> {
        let at = Instant::now() + ttl;
        if let Some(entry) = self.strings.lock().unwrap_or_else(|e| e.into_inner()).get_mut(key) {
            entry.expires_at = Some(at);
        }
        if let Some(entry) = self.lists.lock().unwrap_or_else(|e| e.into_inner()).get_mut(key) {
            entry.expires_at = Some(at);
        }
        Box::pin(ready(Ok(())))
    }
}

// -- In-memory repositories ---------------------------------------------------

#[derive(Default)]
pub struct MemDrivers {
    drivers: Mutex<HashMap<i64, Driver>>,
}

impl MemDrivers {
    pub fn new() -> Arc<MemDrivers> {
        Arc::new(MemDrivers::default())
    }

    pub fn insert(&self, driver: Driver) {
        self.drivers.lock().unwrap_or_else(|e| e.into_inner()).insert(driver.id, driver);
    }
}

impl DriverRepo for MemDrivers {
    fn find_by_id(&self, driver_id: i64) -> RepoFuture<'_, Option<Driver>> {
        let found = self.drivers.lock().unwrap_or_else(|e| e.into_inner()).get(&driver_id).cloned();
        Box::pin(ready(Ok(found)))
    }
}

#[derive(Default)]
pub struct MemRoutes {
    routes: Mutex<Vec<Route>>,
}

impl MemRoutes {
    pub fn new() -> Arc<MemRoutes> {
        Arc::new(MemRoutes::default())
    }

    pub fn insert_available(&self, id: &str, vehicle_type: &str, description: &str) {
        self.routes.lock().unwrap_or_else(|e| e.into_inner()).push(Route {
            id: id.to_owned(),
            vehicle_type: vehicle_type.to_owned(),
            description: description.to_owned(),
            status: RouteStatus::Available,
            driver_id: None,
            assigned_at: None,
        });
    }

    pub fn get(&self, id: &str) -> Option<Route> {
        self.routes.lock().unwrap_or_else(|e| e.into_inner()).iter().find(|r| r.id == id).cloned()
    }
}

fn is_moto_route(route: &Route) -> bool {
    route.vehicle_type.eq_ignore_ascii_case("moto")
}

impl RouteRepo for MemRoutes {
    fn list_available_for_vehicle<'a>(&'a self, vehicle_type: &'a str) -> RepoFuture<'a, Vec<Route>> {
        let moto_only = crate::group::Group::for_vehicle(vehicle_type) == crate::group::Group::Moto;
        let mut available: Vec<Route> = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.status == RouteStatus::Available)
            .filter(|r| !moto_only || is_moto_route(r))
            .cloned()
            .collect();
        available.sort_by_key(|r| (is_moto_route(r), r.id.clone()));
        Box::pin(ready(Ok(available)))
    }

    fn assign_if_available<'a>(&'a self, route_id: &'a str, driver_id: i64) -> RepoFuture<'a, bool> {
        let mut routes = self.routes.lock().unwrap_or_else(|e| e.into_inner());
        let claimed = routes
            .iter_mut()
            .find(|r| r.id == route_id && r.status == RouteStatus::Available && r.driver_id.is_none())
            .map(|r| {
                r.status = RouteStatus::Assigned;
                r.driver_id = Some(driver_id);
                r.assigned_at = Some(chrono::Utc::now());
            })
            .is_some();
        Box::pin(ready(Ok(claimed)))
    }

    fn find_assigned(&self, driver_id: i64) -> RepoFuture<'_, Option<Route>> {
        let found = self
            .routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.driver_id == Some(driver_id) && r.status == RouteStatus::Assigned)
            .cloned();
        Box::pin(ready(Ok(found)))
    }
}

#[derive(Default)]
pub struct MemBlocklist {
    blocked: Mutex<HashSet<i64>>,
}

impl MemBlocklist {
    pub fn new() -> Arc<MemBlocklist> {
        Arc::new(MemBlocklist::default())
    }

    pub fn block(&self, driver_id: i64) {
        self.blocked.lock().unwrap_or_else(|e| e.into_inner()).insert(driver_id);
    }
}

impl BlocklistRepo for MemBlocklist {
    fn is_active(&self, driver_id: i64) -> RepoFuture<'_, bool> {
        let blocked = self.blocked.lock().unwrap_or_else(|e| e.into_inner()).contains(&driver_id);
        Box::pin(ready(Ok(blocked)))
    }
}

#[derive(Default)]
pub struct MemExport {
    assigned: Mutex<HashMap<String, i64>>,
    pub fail_writes: AtomicBool,
}

impl MemExport {
    pub fn new() -> Arc<MemExport> {
        Arc::new(MemExport::default())
    }

    pub fn assignments(&self) -> HashMap<String, i64> {
        self.assigned.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl ExportSink for MemExport {
    fn set_assigned<'a>(&'a self, route_id: &'a str, driver_id: i64) -> RepoFuture<'a, ()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Box::pin(ready(Err(anyhow::anyhow!("export sink unavailable"))));
        }
        self.assigned.lock().unwrap_or_else(|e| e.into_inner()).insert(route_id.to_owned(), driver_id);
        Box::pin(ready(Ok(())))
    }

    fn is_assigned(&self, driver_id: i64) -> RepoFuture<'_, bool> {
        let hit = self
            .assigned
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .any(|d| *d == driver_id);
        Box::pin(ready(Ok(hit)))
    }
}

// -- Outbound recording -------------------------------------------------------

#[derive(Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<(i64, String)>>,
    pub fail_sends: AtomicBool,
}

impl RecordingSender {
    pub fn new() -> Arc<RecordingSender> {
        Arc::new(RecordingSender::default())
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn texts_for(&self, chat_id: i64) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(chat, _)| *chat == chat_id)
            .map(|(_, text)| text)
            .collect()
    }

    pub fn last_for(&self, chat_id: i64) -> Option<String> {
        self.texts_for(chat_id).pop()
    }
}

impl ChatSender for RecordingSender {
    fn send<'a>(&'a self, chat_id: i64, text: &'a str) -> SendFuture<'a> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Box::pin(ready(Err(anyhow::anyhow!("chat delivery failed"))));
        }
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push((chat_id, text.to_owned()));
        Box::pin(ready(Ok(())))
    }
}

#[derive(Default)]
pub struct CountingSyncRunner {
    runs: Mutex<Vec<SyncScope>>,
}

impl CountingSyncRunner {
    pub fn new() -> Arc<CountingSyncRunner> {
        Arc::new(CountingSyncRunner::default())
    }

    pub fn runs(&self) -> Vec<SyncScope> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SyncRunner for CountingSyncRunner {
    fn run(&self, scope: SyncScope) -> SyncFuture<'_> {
        self.runs.lock().unwrap_or_else(|e| e.into_inner()).push(scope);
        Box::pin(ready(Ok(SyncSummary { drivers: 10, routes: 4 })))
    }
}

// -- State builder ------------------------------------------------------------

/// Handle bundling the shared state with every in-memory adapter, so tests
/// can seed data and assert on what was sent.
pub struct TestCtx {
    pub state: Arc<AppState>,
    pub kv: Arc<MemoryKv>,
    pub drivers: Arc<MemDrivers>,
    pub routes: Arc<MemRoutes>,
    pub blocklist: Arc<MemBlocklist>,
    pub export: Arc<MemExport>,
    pub sender: Arc<RecordingSender>,
    pub sync_runner: Arc<CountingSyncRunner>,
}

pub fn test_config() -> BotConfig {
    BotConfig {
        host: "127.0.0.1".into(),
        port: 0,
        redis_url: "redis://unused".into(),
        database_url: "postgres://unused".into(),
        bot_token: "test-token".into(),
        chat_api_base: "http://127.0.0.1:1".into(),
        state_ttl_secs: 10800,
        queue_ttl_secs: 30,
        blocklist_wait_secs: 120,
        sync_password: "segredo".into(),
        sweep_interval_ms: 5000,
        admin_chat_ids: Vec::new(),
    }
}

pub fn test_ctx() -> TestCtx {
    test_ctx_with(test_config())
}

pub fn test_ctx_with(config: BotConfig) -> TestCtx {
    let kv = MemoryKv::new();
    let drivers = MemDrivers::new();
    let routes = MemRoutes::new();
    let blocklist = MemBlocklist::new();
    let export = MemExport::new();
    let sender = RecordingSender::new();
    let sync_runner = CountingSyncRunner::new();

    let adapters = Adapters {
        drivers: Arc::clone(&drivers) as Arc<dyn DriverRepo>,
        routes: Arc::clone(&routes) as Arc<dyn RouteRepo>,
        blocklist: Arc::clone(&blocklist) as Arc<dyn BlocklistRepo>,
        export: Arc::clone(&export) as Arc<dyn ExportSink>,
        sender: Arc::clone(&sender) as Arc<dyn ChatSender>,
        sync_runner: Arc::clone(&sync_runner) as Arc<dyn SyncRunner>,
    };
    let state = Arc::new(AppState::new(
        config,
        Arc::clone(&kv) as Arc<dyn Kv>,
        adapters,
        CancellationToken::new(),
    ));

    TestCtx { state, kv, drivers, routes, blocklist, export, sender, sync_runner }
}

impl TestCtx {
    pub fn seed_driver(&self, id: i64, name: &str, vehicle_type: &str, priority_score: i32) {
        self.drivers.insert(Driver {
            id,
            name: name.to_owned(),
            vehicle_type: vehicle_type.to_owned(),
            priority_score,
        });
    }
}
