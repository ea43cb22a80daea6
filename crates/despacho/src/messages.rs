// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! All driver- and operator-facing chat texts, plus menu rendering.
//!
//! Texts are Portuguese (the operation runs in Brazil). Keep every
//! user-visible string here so flows stay free of literals.

use crate::session::RouteRef;

pub const ASK_ID: &str = "Olá! Informe seu ID de motorista para começar.";
pub const INVALID_ID: &str = "ID não encontrado. Verifique o número e envie novamente.";
pub const INVALID_OPTION: &str = "Opção inválida.";
pub const ALREADY_ASSIGNED: &str =
    "Você já possui uma rota atribuída hoje. Em caso de dúvida, fale com o suporte.";
pub const NO_ROUTES: &str = "Não há rotas disponíveis no momento para o seu veículo.";
pub const ROUTE_TAKEN: &str = "Essa rota não está mais disponível. Escolha outra opção.";
pub const SESSION_CLOSED: &str = "Atendimento encerrado. Até logo!";
pub const INACTIVITY_CLOSED: &str =
    "Atendimento encerrado por inatividade. Envie qualquer mensagem para recomeçar.";
pub const SYNC_WAIT: &str =
    "Atualização de dados em andamento. Tente novamente em alguns minutos.";
pub const STILL_IN_QUEUE: &str =
    "Você ainda está na fila. Avisaremos quando chegar a sua vez. Digite encerrar para sair.";
pub const SYNC_PASSWORD_PROMPT: &str = "Envie a senha de sincronização.";
pub const SYNC_WRONG_PASSWORD: &str = "Senha incorreta. Operação cancelada.";
pub const SYNC_STARTED: &str = "Sincronização iniciada. Os atendimentos ficam pausados até o fim.";
pub const LOG_EMPTY: &str = "Nenhum evento registrado hoje.";

pub fn greet(name: &str) -> String {
    format!("Olá, {name}!")
}

pub fn main_menu() -> String {
    [
        "O que você deseja?",
        "",
        "1 - Pegar uma rota",
        "2 - Ajuda",
        "",
        "Digite encerrar para sair.",
    ]
    .join("\n")
}

pub fn queued(position: usize) -> String {
    format!(
        "Você entrou na fila de atendimento (posição {position}). \
         Avisaremos quando chegar a sua vez. Digite encerrar para sair."
    )
}

pub fn routes_menu(routes: &[RouteRef]) -> String {
    let mut out = String::from("Rotas disponíveis:\n");
    for (i, route) in routes.iter().enumerate() {
        out.push_str(&format!("\n{} - {}", i + 1, route.label));
    }
    out.push_str("\n\nDigite o número da rota desejada ou encerrar para sair.");
    out
}

pub fn route_claimed(label: &str, name: &str) -> String {
    format!("Rota {label} atribuída com sucesso! Boa entrega, {name}.")
}

pub fn sync_done(scope: &str) -> String {
    format!("Sincronização ({scope}) concluída.")
}

pub fn sync_failed(scope: &str) -> String {
    format!("Sincronização ({scope}) falhou. Consulte o log diário.")
}

// -- Help menu ----------------------------------------------------------------

/// Static FAQ served from HELP_MENU, keyed by menu digit.
pub const FAQ: &[(&str, &str, &str)] = &[
    (
        "1",
        "Quando recebo o pagamento?",
        "Os repasses são feitos toda sexta-feira, referentes às rotas concluídas até quarta.",
    ),
    (
        "2",
        "Posso trocar de rota depois de aceitar?",
        "Não. Depois de atribuída, a rota só pode ser remanejada pelo suporte.",
    ),
    (
        "3",
        "Como falo com o suporte?",
        "Envie mensagem para o suporte no horário comercial: (11) 4002-8922.",
    ),
];

pub fn help_menu() -> String {
    let mut out = String::from("Ajuda — escolha uma opção:\n");
    for (key, question, _) in FAQ {
        out.push_str(&format!("\n{key} - {question}"));
    }
    out.push_str("\n\nDigite voltar para o menu principal ou encerrar para sair.");
    out
}

pub fn faq_answer(key: &str) -> Option<&'static str> {
    FAQ.iter().find(|(k, _, _)| *k == key).map(|(_, _, answer)| *answer)
}

#[cfg(test)]
#[path = "messages_tests.rs"]
mod tests;
