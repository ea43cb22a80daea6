// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-driver session state machine.
//!
//! Transitions are driven by inbound chat messages and by timer events.
//! Event preprocessing runs in a fixed order before state dispatch: admin
//! commands, the global sync gate, the universal end command, then the
//! in-queue shortcut. The webhook layer serializes events per chat, so each
//! handler may read-modify-write the session without further coordination.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::claim::ClaimOutcome;
use crate::error::KvError;
use crate::eventlog::{chunk_lines, CHUNK_LIMIT};
use crate::group::Group;
use crate::messages;
use crate::session::{DriverSession, RouteRef, SessionState};
use crate::state::AppState;
use crate::sync::SyncScope;
use crate::timer::arm_response_timer;

pub struct Dispatcher {
    state: Arc<AppState>,
}

impl Dispatcher {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Entry point for one inbound message. Failures are logged and the
    /// event is dropped: the user gets no reply and the sweeper
    /// reconverges whatever was left half-done.
    pub async fn handle_message(&self, chat_id: i64, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if let Err(e) = self.process(chat_id, text).await {
            tracing::warn!(chat_id, err = %e, "event processing failed");
        }
    }

    async fn process(&self, chat_id: i64, text: &str) -> anyhow::Result<()> {
        if self.handle_admin(chat_id, text).await? {
            return Ok(());
        }

        if self.state.sync.in_progress().await? {
            self.send(chat_id, messages::SYNC_WAIT).await;
            return Ok(());
        }

        let Some(mut session) = self.load_session_retry(chat_id).await? else {
            let session = DriverSession::new(chat_id);
            self.state.sessions.save(&session).await?;
            self.state.events.append("session_created", &[("chat", chat_id.to_string())]).await;
            self.send(chat_id, messages::ASK_ID).await;
            return Ok(());
        };

        if text.eq_ignore_ascii_case("encerrar") {
            self.end_session(session).await?;
            return Ok(());
        }

        if session.in_queue {
            return self.on_queued(session, text).await;
        }

        match session.state {
            SessionState::WaitingId => self.on_waiting_id(session, text).await,
            SessionState::Menu => self.on_menu(session, text).await,
            SessionState::HelpMenu => self.on_help_menu(session, text).await,
            SessionState::ChoosingRoute => self.on_choosing_route(session, text).await,
        }
    }

    /// One retry on a transient store failure, then give up on the event.
    async fn load_session_retry(&self, chat_id: i64) -> Result<Option<DriverSession>, KvError> {
        match self.state.sessions.load(chat_id).await {
            Err(e) if e.is_transient() => {
                tracing::debug!(chat_id, err = %e, "retrying session load");
                self.state.sessions.load(chat_id).await
            }
            other => other,
        }
    }

    // -- Admin commands -------------------------------------------------------

    /// Admin commands take precedence over everything, including the sync
    /// gate. Returns true when the event was consumed.
    async fn handle_admin(&self, chat_id: i64, text: &str) -> anyhow::Result<bool> {
        let is_admin = self.state.config.is_admin_chat(chat_id);
        match text {
            "/sync" | "/atualizar_dados" => {
                if !is_admin {
                    return Ok(false);
                }
                self.state.sync.set_pending(chat_id, SyncScope::All).await?;
                self.send(chat_id, messages::SYNC_PASSWORD_PROMPT).await;
                Ok(true)
            }
            "/syncDriver" => {
                if !is_admin {
                    return Ok(false);
                }
                self.state.sync.set_pending(chat_id, SyncScope::DriversOnly).await?;
                self.send(chat_id, messages::SYNC_PASSWORD_PROMPT).await;
                Ok(true)
            }
            "/logdiario" => {
                if !is_admin {
                    return Ok(false);
                }
                self.dump_daily_log(chat_id).await;
                Ok(true)
            }
            _ => {
                if !is_admin {
                    return Ok(false);
                }
                let Some(scope) = self.state.sync.take_pending(chat_id).await? else {
                    return Ok(false);
                };
                if text == self.state.config.sync_password {
                    self.run_sync(chat_id, scope).await?;
                } else {
                    self.send(chat_id, messages::SYNC_WRONG_PASSWORD).await;
                }
                Ok(true)
            }
        }
    }

    async fn dump_daily_log(&self, chat_id: i64) {
        let lines = self.state.events.today().await;
        if lines.is_empty() {
            self.send(chat_id, messages::LOG_EMPTY).await;
            return;
        }
        for chunk in chunk_lines(&lines, CHUNK_LIMIT) {
            self.send(chat_id, &chunk).await;
        }
    }

    async fn run_sync(&self, chat_id: i64, scope: SyncScope) -> anyhow::Result<()> {
        if !self.state.sync.begin().await? {
            self.send(chat_id, messages::SYNC_WAIT).await;
            return Ok(());
        }
        self.send(chat_id, messages::SYNC_STARTED).await;
        self.state
            .events
            .append("sync_started", &[("scope", scope.as_str().to_owned()), ("chat", chat_id.to_string())])
            .await;

        let outcome = self.state.sync_runner.run(scope).await;
        match outcome {
            Ok(summary) => {
                if scope == SyncScope::All {
                    match self.state.sync.flush_sessions().await {
                        Ok(count) => tracing::info!(count, "flushed cached sessions after sync"),
                        Err(e) => tracing::warn!(err = %e, "session flush after sync failed"),
                    }
                }
                self.state
                    .events
                    .append(
                        "sync_done",
                        &[
                            ("scope", scope.as_str().to_owned()),
                            ("drivers", summary.drivers.to_string()),
                            ("routes", summary.routes.to_string()),
                        ],
                    )
                    .await;
                self.send(chat_id, &messages::sync_done(scope.as_str())).await;
            }
            Err(e) => {
                tracing::error!(scope = scope.as_str(), err = %e, "sync failed");
                self.state
                    .events
                    .append("sync_failed", &[("scope", scope.as_str().to_owned())])
                    .await;
                self.send(chat_id, &messages::sync_failed(scope.as_str())).await;
            }
        }
        self.state.sync.end().await?;
        Ok(())
    }

    // -- Queue shortcut -------------------------------------------------------

    /// A queued chat gets a narrow interface: leave, or poke the queue.
    /// The poke re-enqueues (idempotent) and retries acquisition, so a
    /// driver whose turn already came gets served immediately.
    async fn on_queued(&self, mut session: DriverSession, text: &str) -> anyhow::Result<()> {
        let chat_id = session.chat_id;
        let group = session.group();

        if text == "0" {
            self.end_session(session).await?;
            return Ok(());
        }

        self.state.group(group).queue.enqueue(chat_id).await?;
        let acquired = self.state.group(group).slot.try_acquire(chat_id).await?;
        if let Some(expired) = acquired.reclaimed {
            self.close_for_inactivity(expired).await;
        }
        if acquired.acquired {
            self.state.group(group).queue.remove(chat_id).await?;
            session.in_queue = false;
            self.enter_choosing_route(&mut session).await?;
        } else {
            if let Some(other) = acquired.activated_other {
                self.notify_activated(other, group).await;
            }
            self.send(chat_id, messages::STILL_IN_QUEUE).await;
        }
        Ok(())
    }

    // -- Per-state handlers ---------------------------------------------------

    async fn on_waiting_id(&self, mut session: DriverSession, text: &str) -> anyhow::Result<()> {
        let chat_id = session.chat_id;
        let Ok(driver_id) = text.parse::<i64>() else {
            self.send(chat_id, messages::INVALID_ID).await;
            return Ok(());
        };
        let Some(driver) = self.state.drivers.find_by_id(driver_id).await? else {
            self.send(chat_id, messages::INVALID_ID).await;
            return Ok(());
        };

        session.driver_id = Some(driver.id);
        session.driver_name = Some(driver.name.clone());
        session.priority_score = Some(driver.priority_score);
        session.queue_group = Some(Group::for_vehicle(&driver.vehicle_type));
        session.vehicle_type = Some(driver.vehicle_type);
        session.state = SessionState::Menu;
        self.state.sessions.save(&session).await?;

        self.state
            .events
            .append("identified", &[("chat", chat_id.to_string()), ("driver", driver.id.to_string())])
            .await;
        self.send(chat_id, &messages::greet(&driver.name)).await;
        self.send(chat_id, &messages::main_menu()).await;
        Ok(())
    }

    async fn on_menu(&self, mut session: DriverSession, text: &str) -> anyhow::Result<()> {
        let chat_id = session.chat_id;
        match text {
            "1" => {
                let Some(driver_id) = session.driver_id else {
                    // Identity never confirmed; send the chat back to the start.
                    session.state = SessionState::WaitingId;
                    self.state.sessions.save(&session).await?;
                    self.send(chat_id, messages::ASK_ID).await;
                    return Ok(());
                };
                if self.state.claimer.driver_already_assigned(driver_id).await? {
                    self.send(chat_id, messages::ALREADY_ASSIGNED).await;
                    self.state.sessions.clear(chat_id).await?;
                    self.state
                        .events
                        .append("refused_already_assigned", &[("driver", driver_id.to_string())])
                        .await;
                    return Ok(());
                }

                let group = session.group();
                let position = self.state.group(group).queue.enqueue(chat_id).await?;
                self.state
                    .events
                    .append(
                        "enqueued",
                        &[
                            ("chat", chat_id.to_string()),
                            ("group", group.to_string()),
                            ("position", position.to_string()),
                        ],
                    )
                    .await;

                let acquired = self.state.group(group).slot.try_acquire(chat_id).await?;
                if let Some(expired) = acquired.reclaimed {
                    self.close_for_inactivity(expired).await;
                }
                if acquired.acquired {
                    self.state.group(group).queue.remove(chat_id).await?;
                    session.in_queue = false;
                    self.enter_choosing_route(&mut session).await?;
                } else {
                    session.in_queue = true;
                    self.state.sessions.save(&session).await?;
                    if let Some(other) = acquired.activated_other {
                        self.notify_activated(other, group).await;
                    }
                    self.send(chat_id, &messages::queued(position)).await;
                }
                Ok(())
            }
            "2" => {
                session.state = SessionState::HelpMenu;
                self.state.sessions.save(&session).await?;
                self.send(chat_id, &messages::help_menu()).await;
                Ok(())
            }
            "0" => self.end_session(session).await,
            _ => {
                self.send(chat_id, messages::INVALID_OPTION).await;
                self.send(chat_id, &messages::main_menu()).await;
                Ok(())
            }
        }
    }

    async fn on_help_menu(&self, mut session: DriverSession, text: &str) -> anyhow::Result<()> {
        let chat_id = session.chat_id;
        if text.eq_ignore_ascii_case("voltar") {
            session.state = SessionState::Menu;
            self.state.sessions.save(&session).await?;
            self.send(chat_id, &messages::main_menu()).await;
            return Ok(());
        }
        if text == "0" {
            return self.end_session(session).await;
        }
        match messages::faq_answer(text) {
            Some(answer) => {
                self.send(chat_id, answer).await;
                self.send(chat_id, &messages::help_menu()).await;
            }
            None => {
                self.send(chat_id, messages::INVALID_OPTION).await;
                self.send(chat_id, &messages::help_menu()).await;
            }
        }
        Ok(())
    }

    async fn on_choosing_route(&self, mut session: DriverSession, text: &str) -> anyhow::Result<()> {
        let chat_id = session.chat_id;
        let group = session.group();

        if text == "0" {
            return self.end_session(session).await;
        }

        let chosen = text
            .parse::<usize>()
            .ok()
            .filter(|n| *n >= 1)
            .and_then(|n| session.available_routes.get(n - 1).cloned());
        let Some(route) = chosen else {
            self.send(chat_id, messages::INVALID_OPTION).await;
            self.serve_routes_menu(&session).await?;
            return Ok(());
        };

        let Some(driver_id) = session.driver_id else {
            self.end_session(session).await?;
            return Ok(());
        };

        if self.state.claimer.driver_already_assigned(driver_id).await? {
            self.send(chat_id, messages::ALREADY_ASSIGNED).await;
            self.finish_slot_session(chat_id, group).await?;
            return Ok(());
        }

        match self.state.claimer.claim(&route.id, driver_id).await? {
            ClaimOutcome::Committed => {
                let name = session.driver_name.as_deref().unwrap_or("motorista");
                self.send(chat_id, &messages::route_claimed(&route.label, name)).await;
                self.finish_slot_session(chat_id, group).await?;
                Ok(())
            }
            ClaimOutcome::Raced => {
                // Someone got there first; refresh the snapshot and retry.
                self.send(chat_id, messages::ROUTE_TAKEN).await;
                let vehicle = session.vehicle_type.clone().unwrap_or_default();
                let routes = self.state.routes.list_available_for_vehicle(&vehicle).await?;
                if routes.is_empty() {
                    self.send(chat_id, messages::NO_ROUTES).await;
                    session.state = SessionState::Menu;
                    session.available_routes.clear();
                    self.state.sessions.save(&session).await?;
                    let _ = self.state.timers.disarm(chat_id).await;
                    self.release_and_notify(group).await;
                    return Ok(());
                }
                session.available_routes = routes
                    .iter()
                    .map(|r| RouteRef { id: r.id.clone(), label: r.description.clone() })
                    .collect();
                self.state.sessions.save(&session).await?;
                self.serve_routes_menu(&session).await?;
                Ok(())
            }
        }
    }

    // -- Route selection helpers ----------------------------------------------

    /// Transition a slot holder into route selection: snapshot the routes
    /// they may take, render the menu, restart the service window and the
    /// response timer.
    async fn enter_choosing_route(&self, session: &mut DriverSession) -> anyhow::Result<()> {
        let chat_id = session.chat_id;
        let group = session.group();
        let vehicle = session.vehicle_type.clone().unwrap_or_default();

        let routes = self.state.routes.list_available_for_vehicle(&vehicle).await?;
        if routes.is_empty() {
            self.send(chat_id, messages::NO_ROUTES).await;
            session.state = SessionState::Menu;
            session.in_queue = false;
            session.available_routes.clear();
            self.state.sessions.save(session).await?;
            self.release_and_notify(group).await;
            return Ok(());
        }

        session.available_routes = routes
            .iter()
            .map(|r| RouteRef { id: r.id.clone(), label: r.description.clone() })
            .collect();
        session.state = SessionState::ChoosingRoute;
        session.in_queue = false;
        self.state.sessions.save(session).await?;

        self.state
            .events
            .append(
                "routes_offered",
                &[("chat", chat_id.to_string()), ("count", session.available_routes.len().to_string())],
            )
            .await;
        self.serve_routes_menu(session).await?;
        Ok(())
    }

    /// Render the routes menu and restart the service window + timer.
    async fn serve_routes_menu(&self, session: &DriverSession) -> anyhow::Result<()> {
        let chat_id = session.chat_id;
        let group = session.group();
        self.send(chat_id, &messages::routes_menu(&session.available_routes)).await;
        self.state.group(group).slot.refresh_meta(chat_id).await?;
        arm_response_timer(&self.state, chat_id, group).await?;
        Ok(())
    }

    /// Terminal wrap-up after a claim (or an already-assigned refusal) while
    /// holding the slot: clear everything and hand the slot on.
    async fn finish_slot_session(&self, chat_id: i64, group: Group) -> anyhow::Result<()> {
        let _ = self.state.timers.disarm(chat_id).await;
        self.state.sessions.clear(chat_id).await?;
        self.release_and_notify(group).await;
        Ok(())
    }

    // -- Session teardown and slot handoff ------------------------------------

    /// `encerrar` (or its legacy alias) from any state.
    async fn end_session(&self, session: DriverSession) -> anyhow::Result<()> {
        let chat_id = session.chat_id;
        let group = session.group();

        if session.in_queue {
            self.state.group(group).queue.remove(chat_id).await?;
            self.state
                .events
                .append("dequeued", &[("chat", chat_id.to_string()), ("group", group.to_string())])
                .await;
        }
        if session.state == SessionState::ChoosingRoute {
            let _ = self.state.timers.disarm(chat_id).await;
            self.state.sessions.clear(chat_id).await?;
            self.send(chat_id, messages::SESSION_CLOSED).await;
            self.release_and_notify(group).await;
            return Ok(());
        }

        self.state.sessions.clear(chat_id).await?;
        self.send(chat_id, messages::SESSION_CLOSED).await;
        self.state.events.append("session_closed", &[("chat", chat_id.to_string())]).await;
        Ok(())
    }

    /// Timeout path: the slot holder never answered. Release first so the
    /// next waiter is not blocked on our cleanup.
    pub async fn handle_timeout(&self, chat_id: i64, group: Group) {
        let next = match self.state.group(group).slot.release_and_next().await {
            Ok(next) => next,
            Err(e) => {
                tracing::warn!(chat_id, err = %e, "slot release on timeout failed");
                None
            }
        };
        self.close_for_inactivity(chat_id).await;
        if let Some(next) = next {
            self.notify_activated(next, group).await;
        }
    }

    /// Inactivity cleanup for a chat whose slot is already gone: clear the
    /// session, tell the driver, log. Idempotent: a second call finds
    /// nothing left to clear and sends a redundant courtesy message at worst.
    pub async fn close_for_inactivity(&self, chat_id: i64) {
        let _ = self.state.timers.disarm(chat_id).await;
        if let Err(e) = self.state.sessions.clear(chat_id).await {
            tracing::warn!(chat_id, err = %e, "session clear on timeout failed");
        }
        self.send(chat_id, messages::INACTIVITY_CLOSED).await;
        self.state.events.append("timeout", &[("chat", chat_id.to_string())]).await;
    }

    /// Release the slot, install the next waiter, notify them.
    async fn release_and_notify(&self, group: Group) {
        match self.state.group(group).slot.release_and_next().await {
            Ok(Some(next)) => self.notify_activated(next, group).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(group = %group, err = %e, "slot release failed"),
        }
    }

    /// Sweeper entry: install the next waiter if the slot is free.
    pub async fn activate_and_notify(&self, group: Group) {
        match self.state.group(group).slot.activate_next().await {
            Ok(Some(next)) => self.notify_activated(next, group).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(group = %group, err = %e, "slot activation failed"),
        }
    }

    /// Bring a freshly activated chat into route selection. If its session
    /// expired while it waited, free the slot and move down the queue.
    fn notify_activated<'a>(
        &'a self,
        chat_id: i64,
        group: Group,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            let mut current = chat_id;
            loop {
                match self.state.sessions.load(current).await {
                    Ok(Some(mut session)) => {
                        session.in_queue = false;
                        if let Err(e) = self.enter_choosing_route(&mut session).await {
                            tracing::warn!(chat_id = current, err = %e, "activation notify failed");
                        }
                        return;
                    }
                    Ok(None) => {
                        tracing::info!(chat_id = current, "activated chat has no session, skipping");
                        match self.state.group(group).slot.release_and_next().await {
                            Ok(Some(next)) => current = next,
                            Ok(None) => return,
                            Err(e) => {
                                tracing::warn!(err = %e, "slot handoff failed");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(chat_id = current, err = %e, "session read failed during notify");
                        return;
                    }
                }
            }
        })
    }

    // -- Plumbing -------------------------------------------------------------

    /// Best-effort outbound send: delivery failures never block a
    /// transition; the driver can resend and timers guarantee progress.
    async fn send(&self, chat_id: i64, text: &str) {
        if let Err(e) = self.state.sender.send(chat_id, text).await {
            tracing::warn!(chat_id, err = %e, "chat send failed");
        }
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
