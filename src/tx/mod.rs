//! Transactions: log records, undo recovery and the transaction façade.

pub mod record;
pub mod recovery;
mod transaction;

pub use record::LogRecord;
pub use recovery::RecoveryManager;
pub use transaction::{Transaction, TxIdGenerator, TxState};
