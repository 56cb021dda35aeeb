//! Parsing of private-message commands.

use std::sync::LazyLock;

use regex::Regex;

static DELETE_BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^delete ([a-z0-9]{7,8})$").unwrap());
static FORCE_SUBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^force ([a-z0-9]{7,8})$").unwrap());

/// What a private message asks for, decided from its subject alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Delete,
    Force,
    Forward,
}

pub fn classify(subject: &str) -> CommandKind {
    if subject == "delete" {
        CommandKind::Delete
    } else if subject.to_lowercase().starts_with("force ") {
        CommandKind::Force
    } else {
        CommandKind::Forward
    }
}

/// Target parent id from a delete body: exactly `delete <id>`.
pub fn parse_delete_body(body: &str) -> Option<String> {
    DELETE_BODY.captures(body).map(|c| c[1].to_string())
}

/// Target comment id from a force subject: `force <id>`, any case.
pub fn parse_force_subject(subject: &str) -> Option<String> {
    FORCE_SUBJECT
        .captures(subject)
        .map(|c| c[1].to_ascii_lowercase())
}
