//! Library root for the `ledgerbook` engine crate.
//!
//! One storage contract (`storage::StorageAdapter`) with three adapters, a
//! migration runner, document numbering and the journal ledger, all built
//! on the adapter the `storage::BackendSelector` picks at startup. The
//! desktop shell calls into `commands`.

pub mod commands;
pub mod config_mod;
pub mod ledger_mod;
pub mod migrations;
pub mod sequence_mod;
pub mod state_mod;
pub mod storage;
