mod connection;
mod id;
mod statistics;
mod transaction;

pub use connection::{Connection, ConnectionStatus};
pub use id::{Id, IdError};
pub use statistics::{MonthlyAggregate, SpendingStatistics, SpendingSummary};
pub use transaction::{ProcessedTransaction, Transaction};
