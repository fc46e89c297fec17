//! Recognizing bot commands in record content.

use regex::Regex;
use std::sync::LazyLock;

#[allow(clippy::expect_used)]
static BALANCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?mi)\bbalance\b").expect("balance regex is valid"));

/// A command the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// "What is my balance?"
    Balance,
}

impl Command {
    /// Find a command in `content`, matching whole words case-insensitively.
    #[must_use]
    pub fn parse(content: &str) -> Option<Self> {
        BALANCE_REGEX.is_match(content).then_some(Self::Balance)
    }
}

/// Reply text for a balance query.
#[must_use]
pub fn balance_reply(remaining: i64) -> String {
    format!("Your balance is {remaining} sats.")
}
