//! Integration test entry point for peerwire-node.
//!
//! Run with: cargo test --test integration

mod harness;
mod lifecycle;
mod scenarios;
