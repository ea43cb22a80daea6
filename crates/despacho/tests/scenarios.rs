// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end dispatch scenarios through the webhook.
//!
//! Uses `axum_test::TestServer`: no real TCP, no real Redis or Postgres;
//! the in-memory adapters from `test_support` stand in for both.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use serde_json::json;

use despacho::group::Group;
use despacho::kv::Kv;
use despacho::session::SessionState;
use despacho::slot::SlotMeta;
use despacho::state::{epoch_ms, epoch_secs};
use despacho::test_support::{test_ctx, TestCtx};
use despacho::timer::sweep_once;
use despacho::transport::build_router;

fn server(ctx: &TestCtx) -> TestServer {
    TestServer::new(build_router(Arc::clone(&ctx.state))).expect("failed to create test server")
}

async fn send_text(server: &TestServer, chat_id: i64, text: &str) {
    let response = server
        .post("/telegram/webhook")
        .json(&json!({"message": {"chat": {"id": chat_id}, "text": text}}))
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({"ok": true}));
}

#[tokio::test]
async fn s1_happy_path_single_driver() {
    let ctx = test_ctx();
    ctx.seed_driver(123, "Ana", "Passeio", 80);
    ctx.routes.insert_available("R001", "Passeio", "Centro — manhã");
    let server = server(&ctx);

    send_text(&server, 1001, "bom dia").await;
    send_text(&server, 1001, "123").await;

    let texts = ctx.sender.texts_for(1001);
    assert!(texts.iter().any(|t| t == "Olá, Ana!"), "sent: {texts:?}");

    send_text(&server, 1001, "1").await;
    assert!(ctx.sender.last_for(1001).expect("menu").contains("1 - Centro — manhã"));

    send_text(&server, 1001, "1").await;
    assert_eq!(ctx.routes.get("R001").and_then(|r| r.driver_id), Some(123));
    assert!(ctx
        .sender
        .last_for(1001)
        .expect("confirmation")
        .contains("atribuída com sucesso"));
    assert!(ctx.state.sessions.load(1001).await.expect("load").is_none());
}

#[tokio::test]
async fn s2_two_drivers_contending_for_the_slot() {
    let ctx = test_ctx();
    ctx.seed_driver(123, "Ana", "Passeio", 80);
    ctx.seed_driver(456, "Bia", "Passeio", 40);
    ctx.routes.insert_available("R001", "Passeio", "Centro — manhã");
    ctx.routes.insert_available("R002", "Passeio", "Norte — tarde");
    let server = server(&ctx);

    for chat in [1001, 1002] {
        send_text(&server, chat, "oi").await;
    }
    send_text(&server, 1001, "123").await;
    send_text(&server, 1002, "456").await;

    send_text(&server, 1001, "1").await;
    send_text(&server, 1002, "1").await;

    // First-processed caller won the slot; the second waits.
    assert_eq!(ctx.state.group(Group::General).slot.holder().await.expect("holder"), Some(1001));
    let second = ctx.state.sessions.load(1002).await.expect("load").expect("exists");
    assert!(second.in_queue);

    // The winner claims; release activates the waiter in the same pass.
    send_text(&server, 1001, "1").await;
    assert_eq!(ctx.state.group(Group::General).slot.holder().await.expect("holder"), Some(1002));
    assert!(ctx.sender.last_for(1002).expect("menu").contains("Rotas disponíveis"));
}

#[tokio::test]
async fn s3_silent_holder_is_reclaimed_by_the_sweeper() {
    let ctx = test_ctx();
    ctx.seed_driver(123, "Ana", "Passeio", 80);
    ctx.seed_driver(456, "Bia", "Passeio", 40);
    ctx.routes.insert_available("R001", "Passeio", "Centro — manhã");
    let server = server(&ctx);

    send_text(&server, 1001, "oi").await;
    send_text(&server, 1001, "123").await;
    send_text(&server, 1001, "1").await;
    assert_eq!(
        ctx.state
            .sessions
            .load(1001)
            .await
            .expect("load")
            .expect("exists")
            .state,
        SessionState::ChoosingRoute
    );

    send_text(&server, 1002, "oi").await;
    send_text(&server, 1002, "456").await;
    send_text(&server, 1002, "1").await;

    // 1001 never answers; age its service window past the TTL.
    let meta = SlotMeta { chat_id: 1001, started_at_ms: epoch_ms() - 31_000 };
    ctx.state
        .kv
        .set_ttl(
            &Group::General.active_meta_key(),
            &serde_json::to_string(&meta).expect("meta json"),
            Duration::from_secs(60),
        )
        .await
        .expect("write meta");

    sweep_once(&ctx.state, Group::General).await;

    assert!(ctx
        .sender
        .texts_for(1001)
        .iter()
        .any(|t| t.contains("inatividade")));
    assert!(ctx.state.sessions.load(1001).await.expect("load").is_none());
    assert_eq!(ctx.state.group(Group::General).slot.holder().await.expect("holder"), Some(1002));
}

#[tokio::test]
async fn s4_claim_race_rerenders_without_the_lost_route() {
    let ctx = test_ctx();
    ctx.seed_driver(123, "Ana", "Passeio", 80);
    ctx.routes.insert_available("R001", "Passeio", "Centro — manhã");
    ctx.routes.insert_available("R002", "Passeio", "Norte — tarde");
    let server = server(&ctx);

    send_text(&server, 1001, "oi").await;
    send_text(&server, 1001, "123").await;
    send_text(&server, 1001, "1").await;

    // A concurrent session claims R001 first.
    use despacho::repo::RouteRepo;
    assert!(ctx.routes.assign_if_available("R001", 999).await.expect("snatch"));

    send_text(&server, 1001, "1").await;

    let texts = ctx.sender.texts_for(1001);
    assert!(texts.iter().any(|t| t.contains("não está mais disponível")), "sent: {texts:?}");
    let menu = ctx.sender.last_for(1001).expect("menu");
    assert!(menu.contains("Norte — tarde"));
    assert!(!menu.contains("Centro — manhã"));
}

#[tokio::test]
async fn s5_blocklisted_driver_is_served_after_the_deferral_window() {
    let ctx = test_ctx();
    ctx.seed_driver(77, "Zé", "Passeio", 60);
    ctx.blocklist.block(77);
    ctx.routes.insert_available("R001", "Passeio", "Centro — manhã");
    let server = server(&ctx);

    send_text(&server, 2001, "oi").await;
    send_text(&server, 2001, "77").await;
    send_text(&server, 2001, "1").await;

    // Deferral in force: queued, not served.
    let session = ctx.state.sessions.load(2001).await.expect("load").expect("exists");
    assert!(session.in_queue);
    sweep_once(&ctx.state, Group::General).await;
    assert_eq!(ctx.state.group(Group::General).slot.holder().await.expect("holder"), None);

    // Age the deferral clock past the window; the next sweep serves them.
    let aged = epoch_secs() - 121;
    ctx.state
        .kv
        .set_ttl(&Group::General.empty_since_key(), &aged.to_string(), Duration::from_secs(600))
        .await
        .expect("age clock");
    sweep_once(&ctx.state, Group::General).await;

    assert_eq!(ctx.state.group(Group::General).slot.holder().await.expect("holder"), Some(2001));
    assert!(ctx.sender.last_for(2001).expect("menu").contains("Rotas disponíveis"));
}

#[tokio::test]
async fn s6_sync_gate_pauses_ordinary_traffic() {
    let ctx = test_ctx();
    let server = server(&ctx);

    ctx.state.sync.begin().await.expect("gate");
    send_text(&server, 3001, "qualquer coisa").await;

    assert!(ctx
        .sender
        .last_for(3001)
        .expect("reply")
        .contains("Atualização de dados em andamento"));
    assert!(ctx.state.sessions.load(3001).await.expect("load").is_none());
}

#[tokio::test]
async fn non_text_updates_are_acknowledged_and_ignored() {
    let ctx = test_ctx();
    let server = server(&ctx);

    let response = server
        .post("/telegram/webhook")
        .json(&json!({"message": {"chat": {"id": 1001}, "photo": [{"file_id": "abc"}]}}))
        .await;
    response.assert_status_ok();
    response.assert_json(&json!({"ok": true}));

    let response = server.post("/telegram/webhook").json(&json!({"edited_message": {}})).await;
    response.assert_status_ok();

    assert!(ctx.sender.sent().is_empty());
    assert!(ctx.state.sessions.load(1001).await.expect("load").is_none());
}

#[tokio::test]
async fn unknown_envelope_fields_are_ignored() {
    let ctx = test_ctx();
    let server = server(&ctx);

    let response = server
        .post("/telegram/webhook")
        .json(&json!({
            "update_id": 9,
            "message": {
                "message_id": 44,
                "from": {"id": 1, "is_bot": false},
                "chat": {"id": 1001, "type": "private"},
                "date": 1700000000,
                "text": "olá"
            }
        }))
        .await;
    response.assert_status_ok();

    assert!(ctx.state.sessions.load(1001).await.expect("load").is_some());
}

#[tokio::test]
async fn health_endpoint_reports_queue_depths() {
    let ctx = test_ctx();
    let server = server(&ctx);

    let response = server.get("/healthz").await;
    response.assert_status_ok();
    response.assert_json(&json!({"status": "running", "queued_moto": 0, "queued_general": 0}));
}
