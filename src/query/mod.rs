//! Component C8: Query Service.

pub mod service;

pub use service::{BalanceDetail, QueryService, TransactionView, UtxoPage};
