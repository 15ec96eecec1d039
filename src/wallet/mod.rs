pub mod models;
pub mod repository;

pub use models::{
    RecordKind, RecordStatus, ShieldedAccount, SwapDetails, TransactionRecord,
};
pub use repository::{AccountRepository, TransactionRepository};
