// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::session::RouteRef;

use super::*;

#[test]
fn greeting_uses_driver_name() {
    assert_eq!(greet("Ana"), "Olá, Ana!");
}

#[test]
fn routes_menu_numbers_from_one() {
    let routes = vec![
        RouteRef { id: "R001".into(), label: "Centro — manhã".into() },
        RouteRef { id: "R002".into(), label: "Zona Sul — tarde".into() },
    ];
    let menu = routes_menu(&routes);
    assert!(menu.contains("1 - Centro — manhã"));
    assert!(menu.contains("2 - Zona Sul — tarde"));
    assert!(menu.contains("encerrar"));
}

#[test]
fn queued_message_carries_position() {
    assert!(queued(3).contains("posição 3"));
}

#[test]
fn help_menu_lists_every_faq_entry() {
    let menu = help_menu();
    for (key, question, _) in FAQ {
        assert!(menu.contains(&format!("{key} - {question}")));
    }
    assert!(menu.contains("voltar"));
}

#[test]
fn faq_lookup_by_key() {
    for (key, _, answer) in FAQ {
        assert_eq!(faq_answer(key), Some(*answer));
    }
    assert_eq!(faq_answer("9"), None);
    assert_eq!(faq_answer("voltar"), None);
}
