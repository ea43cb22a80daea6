// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use crate::kv::Kv;
use crate::test_support::MemoryKv;

use super::{chunk_lines, EventLog, CHUNK_LIMIT};

#[tokio::test]
async fn append_formats_action_and_fields() {
    let kv = MemoryKv::new();
    let log = EventLog::new(kv.clone() as Arc<dyn Kv>);

    log.append("claim", &[("route", "R001".into()), ("driver", "123".into())]).await;

    let lines = log.today().await;
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("action=claim route=R001 driver=123"), "got: {}", lines[0]);
    assert!(lines[0].starts_with('['), "timestamp prefix missing: {}", lines[0]);
}

#[tokio::test]
async fn ring_is_capped_at_500() {
    let kv = MemoryKv::new();
    let log = EventLog::new(kv.clone() as Arc<dyn Kv>);

    for i in 0..520 {
        log.append("tick", &[("n", i.to_string())]).await;
    }

    let lines = log.today().await;
    assert_eq!(lines.len(), 500);
    // Oldest entries were trimmed, newest survive.
    assert!(lines[0].contains("n=20"), "got: {}", lines[0]);
    assert!(lines[499].contains("n=519"));
}

#[test]
fn chunking_respects_limit() {
    let lines: Vec<String> = (0..100).map(|i| format!("line number {i:04}")).collect();
    let chunks = chunk_lines(&lines, 100);

    assert!(chunks.len() > 1);
    for chunk in &chunks {
        assert!(chunk.len() <= 100, "chunk too long: {}", chunk.len());
    }
    let rejoined: Vec<String> =
        chunks.iter().flat_map(|c| c.lines().map(str::to_owned)).collect();
    assert_eq!(rejoined, lines);
}

#[test]
fn oversized_line_becomes_own_chunk() {
    let lines = vec!["short".to_owned(), "x".repeat(CHUNK_LIMIT + 10), "tail".to_owned()];
    let chunks = chunk_lines(&lines, CHUNK_LIMIT);
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[0], "short");
    assert_eq!(chunks[2], "tail");
}

#[test]
fn empty_input_yields_no_chunks() {
    assert!(chunk_lines(&[], CHUNK_LIMIT).is_empty());
}
