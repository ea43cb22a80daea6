// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use crate::kv::Kv;
use crate::repo::BlocklistRepo;
use crate::test_support::{MemBlocklist, MemoryKv};

use super::Blocklist;

fn setup() -> (Arc<MemoryKv>, Arc<MemBlocklist>, Blocklist) {
    let kv = MemoryKv::new();
    let repo = MemBlocklist::new();
    let blocklist =
        Blocklist::new(kv.clone() as Arc<dyn Kv>, repo.clone() as Arc<dyn BlocklistRepo>);
    (kv, repo, blocklist)
}

#[tokio::test]
async fn miss_consults_repo_and_caches() -> anyhow::Result<()> {
    let (kv, repo, blocklist) = setup();
    repo.block(42);

    assert!(blocklist.is_blocked(42).await);
    assert_eq!(kv.get("blocklist:cache:driver:42").await?.as_deref(), Some("1"));

    assert!(!blocklist.is_blocked(7).await);
    assert_eq!(kv.get("blocklist:cache:driver:7").await?.as_deref(), Some("0"));
    Ok(())
}

#[tokio::test]
async fn cached_answer_shadows_repo() -> anyhow::Result<()> {
    let (kv, repo, blocklist) = setup();

    // Cache says blocked even though the repo has no entry.
    kv.set_ttl("blocklist:cache:driver:9", "1", Duration::from_secs(300)).await?;
    assert!(blocklist.is_blocked(9).await);

    // And the other way around: stale clear answer wins until the TTL runs out.
    repo.block(10);
    kv.set_ttl("blocklist:cache:driver:10", "0", Duration::from_secs(300)).await?;
    assert!(!blocklist.is_blocked(10).await);
    Ok(())
}
