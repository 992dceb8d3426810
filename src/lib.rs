//! Event-ingestion and ledger core for a trading backend: balances move only
//! through the balance engine, every movement leaves an append-only
//! transaction row, and bus events are applied exactly once.

pub mod api;
pub mod bus;
pub mod config;
pub mod consumers;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
