pub mod client;
pub mod reconciler;

pub use client::{
    ExternalTransferRequest, LedgerBalance, ProofReceipt, ProofUpload, ShieldClient,
    ShieldedLedger, TransferReceipt, NATIVE_TOKEN,
};
pub use reconciler::{Reconciler, DRIFT_EPSILON, LAMPORTS_PER_SOL};
