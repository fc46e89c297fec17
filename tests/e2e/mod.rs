//! End-to-end tests for ppe-relay.
//!
//! Run with: `cargo test --test e2e`

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod command_bot;
mod harness;
mod relay;
