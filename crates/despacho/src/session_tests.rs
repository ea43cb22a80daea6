// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use crate::group::Group;
use crate::kv::Kv;
use crate::test_support::MemoryKv;

use super::{DriverSession, SessionState, SessionStore};

fn store(kv: &Arc<MemoryKv>) -> SessionStore {
    SessionStore::new(kv.clone() as Arc<dyn Kv>, Duration::from_secs(10800))
}

#[tokio::test]
async fn save_load_round_trip() -> anyhow::Result<()> {
    let kv = MemoryKv::new();
    let store = store(&kv);

    let mut session = DriverSession::new(1001);
    session.state = SessionState::Menu;
    session.driver_id = Some(123);
    session.driver_name = Some("Ana".into());
    session.vehicle_type = Some("Passeio".into());
    session.priority_score = Some(80);
    session.queue_group = Some(Group::General);
    session.in_queue = true;
    store.save(&session).await?;

    let loaded = store.load(1001).await?.expect("session should exist");
    assert_eq!(loaded.state, SessionState::Menu);
    assert_eq!(loaded.driver_id, Some(123));
    assert_eq!(loaded.driver_name.as_deref(), Some("Ana"));
    assert!(loaded.in_queue);
    assert_eq!(loaded.group(), Group::General);
    Ok(())
}

#[tokio::test]
async fn load_missing_returns_none() -> anyhow::Result<()> {
    let kv = MemoryKv::new();
    assert!(store(&kv).load(404).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn corrupt_record_is_discarded() -> anyhow::Result<()> {
    let kv = MemoryKv::new();
    kv.set_ttl("session:1001", "not json", Duration::from_secs(60)).await?;

    let store = store(&kv);
    assert!(store.load(1001).await?.is_none());
    // The bad record is gone, not just skipped.
    assert!(kv.get("session:1001").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn clear_removes_record() -> anyhow::Result<()> {
    let kv = MemoryKv::new();
    let store = store(&kv);
    store.save(&DriverSession::new(7)).await?;
    store.clear(7).await?;
    assert!(store.load(7).await?.is_none());
    Ok(())
}

#[test]
fn group_defaults_to_general_before_identification() {
    let session = DriverSession::new(1);
    assert_eq!(session.group(), Group::General);
    assert!(!session.is_fiorino());
}

#[test]
fn fiorino_flag_follows_vehicle() {
    let mut session = DriverSession::new(1);
    session.vehicle_type = Some("Fiorino".into());
    assert!(session.is_fiorino());
}
