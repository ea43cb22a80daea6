// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use crate::blocklist::Blocklist;
use crate::group::Group;
use crate::kv::Kv;
use crate::queue::QueueEngine;
use crate::repo::BlocklistRepo;
use crate::session::{DriverSession, SessionState, SessionStore};
use crate::state::epoch_ms;
use crate::test_support::{MemBlocklist, MemoryKv};

use super::{SlotController, SlotMeta};

const SLOT_TTL: Duration = Duration::from_secs(30);

struct Fixture {
    kv: Arc<MemoryKv>,
    sessions: SessionStore,
    slot: SlotController,
    queue: Arc<QueueEngine>,
}

fn fixture() -> Fixture {
    let kv = MemoryKv::new();
    let sessions = SessionStore::new(kv.clone() as Arc<dyn Kv>, Duration::from_secs(10800));
    let blocklist = Blocklist::new(
        kv.clone() as Arc<dyn Kv>,
        MemBlocklist::new() as Arc<dyn BlocklistRepo>,
    );
    let queue = Arc::new(QueueEngine::new(
        kv.clone() as Arc<dyn Kv>,
        Group::General,
        sessions.clone(),
        blocklist,
        Duration::from_secs(10800),
        Duration::from_secs(120),
    ));
    let slot =
        SlotController::new(kv.clone() as Arc<dyn Kv>, Group::General, Arc::clone(&queue), SLOT_TTL);
    Fixture { kv, sessions, slot, queue }
}

async fn seed_and_enqueue(fx: &Fixture, chat_id: i64, score: i32) -> anyhow::Result<()> {
    let mut session = DriverSession::new(chat_id);
    session.state = SessionState::Menu;
    session.driver_id = Some(100 + chat_id);
    session.vehicle_type = Some("Passeio".to_owned());
    session.priority_score = Some(score);
    session.queue_group = Some(Group::General);
    fx.sessions.save(&session).await?;
    fx.queue.enqueue(chat_id).await?;
    Ok(())
}

async fn write_stale_meta(fx: &Fixture, chat_id: i64) -> anyhow::Result<()> {
    let meta = SlotMeta { chat_id, started_at_ms: epoch_ms() - 31_000 };
    fx.kv
        .set_ttl(&Group::General.active_meta_key(), &serde_json::to_string(&meta)?, Duration::from_secs(60))
        .await?;
    fx.kv
        .set_ttl(&Group::General.active_key(), &chat_id.to_string(), Duration::from_secs(60))
        .await?;
    Ok(())
}

#[tokio::test]
async fn acquire_with_empty_queue_is_a_no_op() -> anyhow::Result<()> {
    let fx = fixture();
    let result = fx.slot.try_acquire(1001).await?;
    assert!(!result.acquired);
    assert_eq!(result.activated_other, None);
    assert_eq!(result.reclaimed, None);
    assert_eq!(fx.slot.holder().await?, None);
    Ok(())
}

#[tokio::test]
async fn first_waiter_acquires_and_leaves_queue() -> anyhow::Result<()> {
    let fx = fixture();
    seed_and_enqueue(&fx, 1001, 50).await?;

    let result = fx.slot.try_acquire(1001).await?;
    assert!(result.acquired);
    assert_eq!(fx.slot.holder().await?, Some(1001));
    assert_eq!(fx.queue.position(1001).await?, None);

    let meta: SlotMeta = serde_json::from_str(
        &fx.kv.get(&Group::General.active_meta_key()).await?.expect("meta present"),
    )?;
    assert_eq!(meta.chat_id, 1001);
    Ok(())
}

#[tokio::test]
async fn acquire_is_idempotent_for_current_holder() -> anyhow::Result<()> {
    let fx = fixture();
    seed_and_enqueue(&fx, 1001, 50).await?;
    assert!(fx.slot.try_acquire(1001).await?.acquired);
    assert!(fx.slot.try_acquire(1001).await?.acquired);
    assert_eq!(fx.slot.holder().await?, Some(1001));
    Ok(())
}

#[tokio::test]
async fn second_caller_stays_queued_while_slot_is_fresh() -> anyhow::Result<()> {
    let fx = fixture();
    seed_and_enqueue(&fx, 1001, 50).await?;
    assert!(fx.slot.try_acquire(1001).await?.acquired);

    seed_and_enqueue(&fx, 1002, 50).await?;
    let result = fx.slot.try_acquire(1002).await?;
    assert!(!result.acquired);
    assert_eq!(result.activated_other, None);
    assert_eq!(result.reclaimed, None);
    assert_eq!(fx.slot.holder().await?, Some(1001));
    Ok(())
}

#[tokio::test]
async fn higher_priority_waiter_wins_activation() -> anyhow::Result<()> {
    let fx = fixture();
    seed_and_enqueue(&fx, 1001, 10).await?;
    seed_and_enqueue(&fx, 1002, 90).await?;

    // 1001 asks first, but 1002 outranks it in the queue.
    let result = fx.slot.try_acquire(1001).await?;
    assert!(!result.acquired);
    assert_eq!(result.activated_other, Some(1002));
    assert_eq!(fx.slot.holder().await?, Some(1002));
    Ok(())
}

#[tokio::test]
async fn release_hands_slot_to_next_waiter() -> anyhow::Result<()> {
    let fx = fixture();
    seed_and_enqueue(&fx, 1001, 50).await?;
    assert!(fx.slot.try_acquire(1001).await?.acquired);
    seed_and_enqueue(&fx, 1002, 50).await?;

    let next = fx.slot.release_and_next().await?;
    assert_eq!(next, Some(1002));
    assert_eq!(fx.slot.holder().await?, Some(1002));
    Ok(())
}

#[tokio::test]
async fn release_with_empty_queue_clears_slot() -> anyhow::Result<()> {
    let fx = fixture();
    seed_and_enqueue(&fx, 1001, 50).await?;
    assert!(fx.slot.try_acquire(1001).await?.acquired);

    assert_eq!(fx.slot.release_and_next().await?, None);
    assert_eq!(fx.slot.holder().await?, None);
    assert!(fx.kv.get(&Group::General.active_meta_key()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn fresh_slot_is_not_reclaimed() -> anyhow::Result<()> {
    let fx = fixture();
    seed_and_enqueue(&fx, 1001, 50).await?;
    assert!(fx.slot.try_acquire(1001).await?.acquired);

    assert_eq!(fx.slot.reclaim_expired().await?, None);
    assert_eq!(fx.slot.holder().await?, Some(1001));
    Ok(())
}

#[tokio::test]
async fn expired_slot_is_reclaimed() -> anyhow::Result<()> {
    let fx = fixture();
    write_stale_meta(&fx, 1001).await?;

    assert_eq!(fx.slot.reclaim_expired().await?, Some(1001));
    assert_eq!(fx.slot.holder().await?, None);
    assert!(fx.kv.get(&Group::General.active_meta_key()).await?.is_none());

    // Second reclaim finds nothing: the operation is idempotent.
    assert_eq!(fx.slot.reclaim_expired().await?, None);
    Ok(())
}

#[tokio::test]
async fn acquire_reclaims_expired_holder_and_takes_over() -> anyhow::Result<()> {
    let fx = fixture();
    write_stale_meta(&fx, 1001).await?;
    seed_and_enqueue(&fx, 1002, 50).await?;

    let result = fx.slot.try_acquire(1002).await?;
    assert_eq!(result.reclaimed, Some(1001));
    assert!(result.acquired);
    assert_eq!(fx.slot.holder().await?, Some(1002));
    Ok(())
}

#[tokio::test]
async fn refresh_meta_restarts_the_service_window() -> anyhow::Result<()> {
    let fx = fixture();
    write_stale_meta(&fx, 1001).await?;

    fx.slot.refresh_meta(1001).await?;
    assert_eq!(fx.slot.reclaim_expired().await?, None);
    assert_eq!(fx.slot.holder().await?, Some(1001));
    Ok(())
}

#[tokio::test]
async fn activate_next_respects_current_holder() -> anyhow::Result<()> {
    let fx = fixture();
    seed_and_enqueue(&fx, 1001, 50).await?;
    assert!(fx.slot.try_acquire(1001).await?.acquired);
    seed_and_enqueue(&fx, 1002, 50).await?;

    // Holder present: the sweeper must not install anyone else.
    assert_eq!(fx.slot.activate_next().await?, None);
    assert_eq!(fx.slot.holder().await?, Some(1001));
    assert_eq!(fx.queue.position(1002).await?, Some(1));
    Ok(())
}
