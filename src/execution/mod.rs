pub mod rpc;

pub use rpc::{ConfirmOutcome, SolanaConfig, SolanaRpc, WalletRpc};
