// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide shared state, built once at boot and passed by reference.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::blocklist::Blocklist;
use crate::claim::RouteClaimer;
use crate::config::BotConfig;
use crate::eventlog::EventLog;
use crate::group::Group;
use crate::kv::Kv;
use crate::queue::QueueEngine;
use crate::repo::{BlocklistRepo, DriverRepo, ExportSink, RouteRepo};
use crate::session::SessionStore;
use crate::slot::SlotController;
use crate::sync::{SyncGate, SyncRunner};
use crate::timer::TimerWheel;
use crate::transport::telegram::ChatSender;

/// Queue engine and slot controller for one group.
pub struct GroupRuntime {
    pub queue: Arc<QueueEngine>,
    pub slot: Arc<SlotController>,
}

/// Composition root. Everything here is created at boot and torn down on
/// shutdown; in-flight timers are abandoned, the store's TTLs reconverge.
pub struct AppState {
    pub config: BotConfig,
    pub kv: Arc<dyn Kv>,
    pub sessions: SessionStore,
    pub drivers: Arc<dyn DriverRepo>,
    pub routes: Arc<dyn RouteRepo>,
    pub claimer: RouteClaimer,
    pub sender: Arc<dyn ChatSender>,
    pub timers: TimerWheel,
    pub events: EventLog,
    pub sync: SyncGate,
    pub sync_runner: Arc<dyn SyncRunner>,
    pub shutdown: CancellationToken,
    groups: [GroupRuntime; 2],
    /// Inbound events for one chat are processed serially; out-of-order
    /// processing of a single driver's messages is a correctness violation.
    chat_locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

/// External collaborators injected into [`AppState::new`].
pub struct Adapters {
    pub drivers: Arc<dyn DriverRepo>,
    pub routes: Arc<dyn RouteRepo>,
    pub blocklist: Arc<dyn BlocklistRepo>,
    pub export: Arc<dyn ExportSink>,
    pub sender: Arc<dyn ChatSender>,
    pub sync_runner: Arc<dyn SyncRunner>,
}

impl AppState {
    pub fn new(
        config: BotConfig,
        kv: Arc<dyn Kv>,
        adapters: Adapters,
        shutdown: CancellationToken,
    ) -> Self {
        let sessions = SessionStore::new(Arc::clone(&kv), config.state_ttl());
        let blocklist = Blocklist::new(Arc::clone(&kv), Arc::clone(&adapters.blocklist));
        let events = EventLog::new(Arc::clone(&kv));
        let claimer = RouteClaimer::new(
            Arc::clone(&adapters.routes),
            Arc::clone(&adapters.export),
            events.clone(),
        );
        let timers = TimerWheel::new(Arc::clone(&kv), config.queue_ttl());
        let sync = SyncGate::new(Arc::clone(&kv));

        let group_runtime = |group: Group| {
            let queue = Arc::new(QueueEngine::new(
                Arc::clone(&kv),
                group,
                sessions.clone(),
                blocklist.clone(),
                config.state_ttl(),
                config.blocklist_wait(),
            ));
            let slot = Arc::new(SlotController::new(
                Arc::clone(&kv),
                group,
                Arc::clone(&queue),
                config.queue_ttl(),
            ));
            GroupRuntime { queue, slot }
        };
        let groups = [group_runtime(Group::Moto), group_runtime(Group::General)];

        Self {
            config,
            kv,
            sessions,
            drivers: adapters.drivers,
            routes: adapters.routes,
            claimer,
            sender: adapters.sender,
            timers,
            events,
            sync,
            sync_runner: adapters.sync_runner,
            shutdown,
            groups,
            chat_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn group(&self, group: Group) -> &GroupRuntime {
        match group {
            Group::Moto => &self.groups[0],
            Group::General => &self.groups[1],
        }
    }

    /// Per-chat mutex used by the webhook layer to serialize events.
    pub async fn chat_lock(&self, chat_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.chat_locks.lock().await;
        Arc::clone(locks.entry(chat_id).or_default())
    }
}

/// Current epoch millis.
pub fn epoch_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Current epoch seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
