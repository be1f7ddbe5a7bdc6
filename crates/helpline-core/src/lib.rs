//! Core types, config, errors, call sessions, store and ledger for helpline.

pub mod config;
pub mod error;
pub mod jsonl_store;
pub mod ledger;
pub mod session;
pub mod store;
pub mod types;
