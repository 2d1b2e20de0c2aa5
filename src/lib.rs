//! Bridge core library: the state machine and durability layer of §1-§9.
//! The three binaries in `src/bin/` and `src/main.rs` all build on this —
//! the process entry point is a thin wiring layer, everything testable
//! lives here so unit tests don't need a subprocess.

pub mod balance_reconciler;
pub mod chain_n;
pub mod chain_s;
pub mod config;
pub mod error;
pub mod fees;
pub mod heartbeat;
pub mod ingestion_n;
pub mod ingestion_s;
pub mod processor_n;
pub mod processor_s;
pub mod reconciler;
pub mod reference;
pub mod startup_recovery;
pub mod store;
pub mod supervisor;
