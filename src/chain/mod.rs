//! Blockchain collaborators.
//!
//! Read side fetches vault state, authorization lists and prices; write side
//! submits the corrective transactions. Both sit behind async traits so the
//! monitor pipeline can be driven against mocks in tests and against a
//! dry-run writer in paper mode.

pub mod reader;
pub mod writer;

pub use reader::{ChainReader, HttpChainReader, VaultState};
pub use writer::{ChainWriter, HttpChainWriter, PaperChainWriter, TxOutcome};
