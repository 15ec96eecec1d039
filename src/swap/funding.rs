use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::execution::rpc::{ConfirmOutcome, WalletRpc};
use crate::ledger::reconciler::LAMPORTS_PER_SOL;
use crate::transfer::protocol::{SignedTransfer, TransferProtocol};
use crate::wallet::models::ShieldedAccount;

/// Kept on top of the swap amount so the execution wallet can pay
/// network fees and rent for the settlement leg
pub const FUNDING_FEE_RESERVE: Decimal = dec!(0.005);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FundingOutcome {
    /// On-chain balance already covers amount + reserve; no ledger call
    AlreadyFunded,
    /// Shielded funds were settled into the execution wallet
    Settled { tx_signature: String },
    /// The authorization failed but the wallet alone covers the raw
    /// amount; the pipeline continues without the reserve margin
    ProceedDegraded,
}

/// Decides whether the transfer-authorization protocol must run before
/// a swap can proceed, and optimistically rides out confirmation
/// uncertainty on the funding leg.
pub struct FundingPolicy {
    rpc: Arc<dyn WalletRpc>,
    protocol: Arc<TransferProtocol>,
    confirm_fallback_wait: Duration,
    no_hash_wait: Duration,
}

impl FundingPolicy {
    pub fn new(rpc: Arc<dyn WalletRpc>, protocol: Arc<TransferProtocol>) -> Self {
        Self {
            rpc,
            protocol,
            confirm_fallback_wait: Duration::from_secs(5),
            no_hash_wait: Duration::from_secs(3),
        }
    }

    pub fn with_waits(mut self, confirm_fallback_wait: Duration, no_hash_wait: Duration) -> Self {
        self.confirm_fallback_wait = confirm_fallback_wait;
        self.no_hash_wait = no_hash_wait;
        self
    }

    pub async fn ensure_funded(
        &self,
        account: &ShieldedAccount,
        execution_wallet: &Pubkey,
        required: Decimal,
        transfer: &SignedTransfer,
    ) -> AppResult<FundingOutcome> {
        let balance_lamports = self.rpc.get_balance(execution_wallet).await?;
        let balance = Decimal::from(balance_lamports) / Decimal::from(LAMPORTS_PER_SOL);

        if balance >= required + FUNDING_FEE_RESERVE {
            info!(
                "Execution wallet holds {} SOL; skipping shielded transfer",
                balance
            );
            return Ok(FundingOutcome::AlreadyFunded);
        }

        info!(
            "Execution wallet holds {} SOL, needs {} + reserve; settling from shielded balance",
            balance, required
        );

        match self.protocol.execute(account, transfer).await {
            Ok(receipt) => {
                self.await_transfer_landing(&receipt.tx_signature).await;
                Ok(FundingOutcome::Settled {
                    tx_signature: receipt.tx_signature,
                })
            }
            Err(e) => {
                warn!("Failed to deduct shielded balance: {}", e);
                if balance >= required {
                    warn!("Execution wallet covers the raw amount; proceeding without reserve");
                    Ok(FundingOutcome::ProceedDegraded)
                } else {
                    Err(AppError::Funding(format!(
                        "Failed to deduct shielded balance and execution wallet is empty: {}",
                        e
                    )))
                }
            }
        }
    }

    /// Two-phase wait: RPC-driven confirmation first; on timeout or an
    /// unexpected status result, a fixed sleep and optimistic proceed.
    /// The settlement rail has been reliable even when its status API
    /// is not, so unknown is treated as likely-landed, not fatal.
    async fn await_transfer_landing(&self, tx_signature: &str) {
        let signature = match Signature::from_str(tx_signature) {
            Ok(signature) => signature,
            Err(_) => {
                tokio::time::sleep(self.no_hash_wait).await;
                return;
            }
        };

        match self.rpc.confirm_transaction(&signature).await {
            Ok(ConfirmOutcome::Confirmed) => {
                info!("Funding transfer confirmed; proceeding to swap");
            }
            Ok(ConfirmOutcome::FailedOnChain(err)) => {
                warn!("Funding transfer confirmation warning: {}", err);
                tokio::time::sleep(self.confirm_fallback_wait).await;
            }
            Err(e) => {
                warn!("Funding transfer confirmation warning: {}", e);
                tokio::time::sleep(self.confirm_fallback_wait).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppResult, LedgerError, RpcError};
    use crate::ledger::client::{
        ExternalTransferRequest, LedgerBalance, ProofReceipt, ProofUpload, ShieldedLedger,
        TransferReceipt,
    };
    use crate::transfer::protocol::TransferAuthorization;
    use crate::wallet::repository::AccountRepository;
    use async_trait::async_trait;
    use solana_sdk::hash::Hash;
    use solana_sdk::signature::{Keypair, Signer};
    use solana_sdk::transaction::VersionedTransaction;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubLedger {
        fail_transfer: bool,
        proof_calls: AtomicUsize,
        transfer_calls: AtomicUsize,
    }

    impl StubLedger {
        fn new(fail_transfer: bool) -> Self {
            Self {
                fail_transfer,
                proof_calls: AtomicUsize::new(0),
                transfer_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ShieldedLedger for StubLedger {
        async fn get_balance(
            &self,
            _wallet: &str,
            _api_key: Option<&str>,
        ) -> AppResult<LedgerBalance> {
            Ok(LedgerBalance {
                available: 200_000_000,
                pool_address: None,
            })
        }

        async fn upload_proof(&self, request: &ProofUpload) -> AppResult<ProofReceipt> {
            self.proof_calls.fetch_add(1, Ordering::SeqCst);
            Ok(ProofReceipt {
                nonce: request.nonce as u64 + 1,
            })
        }

        async fn external_transfer(
            &self,
            _request: &ExternalTransferRequest,
        ) -> AppResult<TransferReceipt> {
            self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_transfer {
                return Err(LedgerError::Rejected("insufficient shielded funds".into()).into());
            }
            Ok(TransferReceipt {
                tx_signature: Signature::from([9u8; 64]).to_string(),
            })
        }

        async fn build_deposit(&self, _wallet: &str, _amount: u64) -> AppResult<String> {
            unreachable!()
        }

        async fn build_withdraw(&self, _wallet: &str, _amount: u64) -> AppResult<String> {
            unreachable!()
        }
    }

    enum ConfirmBehavior {
        Confirm,
        Timeout,
    }

    struct StubRpc {
        balance: u64,
        confirm: ConfirmBehavior,
        confirm_calls: AtomicUsize,
    }

    impl StubRpc {
        fn new(balance: u64, confirm: ConfirmBehavior) -> Self {
            Self {
                balance,
                confirm,
                confirm_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl WalletRpc for StubRpc {
        async fn get_balance(&self, _address: &Pubkey) -> AppResult<u64> {
            Ok(self.balance)
        }

        async fn get_latest_blockhash(&self) -> AppResult<Hash> {
            Ok(Hash::default())
        }

        async fn send_transaction(
            &self,
            _transaction: &VersionedTransaction,
        ) -> AppResult<Signature> {
            unreachable!("funding never broadcasts directly")
        }

        async fn confirm_transaction(&self, _signature: &Signature) -> AppResult<ConfirmOutcome> {
            self.confirm_calls.fetch_add(1, Ordering::SeqCst);
            match self.confirm {
                ConfirmBehavior::Confirm => Ok(ConfirmOutcome::Confirmed),
                ConfirmBehavior::Timeout => Err(RpcError::ConfirmationTimeout.into()),
            }
        }
    }

    async fn setup(
        balance_lamports: u64,
        confirm: ConfirmBehavior,
        fail_transfer: bool,
    ) -> (
        FundingPolicy,
        Arc<StubLedger>,
        Arc<StubRpc>,
        ShieldedAccount,
    ) {
        let ledger = Arc::new(StubLedger::new(fail_transfer));
        let rpc = Arc::new(StubRpc::new(balance_lamports, confirm));
        let accounts = Arc::new(AccountRepository::new());
        let mut account = ShieldedAccount::new("sender".to_string());
        account.cached_balance = dec!(0.2);
        accounts.upsert(account.clone()).await.unwrap();

        let protocol = Arc::new(TransferProtocol::new(ledger.clone(), accounts));
        let policy = FundingPolicy::new(rpc.clone(), protocol)
            .with_waits(Duration::from_millis(0), Duration::from_millis(0));
        (policy, ledger, rpc, account)
    }

    fn signed_transfer(amount: Decimal, recipient: &str) -> SignedTransfer {
        let auth = TransferAuthorization::prepared(100_000_000);
        SignedTransfer {
            recipient_address: recipient.to_string(),
            amount,
            signing_nonce: auth.signing_nonce.clone(),
            signature: bs58::encode([3u8; 64]).into_string(),
            message: auth.message,
        }
    }

    fn execution_wallet() -> Pubkey {
        Keypair::new().pubkey()
    }

    #[tokio::test]
    async fn sufficient_balance_skips_ledger_entirely() {
        // 1.0 SOL on chain, 0.1 required
        let (policy, ledger, _, account) =
            setup(1_000_000_000, ConfirmBehavior::Confirm, false).await;

        let outcome = policy
            .ensure_funded(
                &account,
                &execution_wallet(),
                dec!(0.1),
                &signed_transfer(dec!(0.1), "exec"),
            )
            .await
            .unwrap();

        assert_eq!(outcome, FundingOutcome::AlreadyFunded);
        assert_eq!(ledger.proof_calls.load(Ordering::SeqCst), 0);
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn threshold_is_amount_plus_reserve() {
        // 0.104 SOL < 0.1 + 0.005 -> must invoke the protocol
        let (policy, ledger, _, account) =
            setup(104_000_000, ConfirmBehavior::Confirm, false).await;

        let outcome = policy
            .ensure_funded(
                &account,
                &execution_wallet(),
                dec!(0.1),
                &signed_transfer(dec!(0.1), "exec"),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, FundingOutcome::Settled { .. }));
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exact_threshold_counts_as_funded() {
        let (policy, ledger, _, account) =
            setup(105_000_000, ConfirmBehavior::Confirm, false).await;

        let outcome = policy
            .ensure_funded(
                &account,
                &execution_wallet(),
                dec!(0.1),
                &signed_transfer(dec!(0.1), "exec"),
            )
            .await
            .unwrap();

        assert_eq!(outcome, FundingOutcome::AlreadyFunded);
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn confirmation_timeout_is_optimistic() {
        let (policy, _, rpc, account) = setup(0, ConfirmBehavior::Timeout, false).await;

        let outcome = policy
            .ensure_funded(
                &account,
                &execution_wallet(),
                dec!(0.1),
                &signed_transfer(dec!(0.1), "exec"),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, FundingOutcome::Settled { .. }));
        assert_eq!(rpc.confirm_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_authorization_degrades_when_wallet_covers_raw_amount() {
        // 0.102 covers 0.1 raw but not 0.1 + reserve
        let (policy, ledger, _, account) =
            setup(102_000_000, ConfirmBehavior::Confirm, true).await;

        let outcome = policy
            .ensure_funded(
                &account,
                &execution_wallet(),
                dec!(0.1),
                &signed_transfer(dec!(0.1), "exec"),
            )
            .await
            .unwrap();

        assert_eq!(outcome, FundingOutcome::ProceedDegraded);
        assert_eq!(ledger.transfer_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_authorization_with_empty_wallet_aborts() {
        let (policy, _, _, account) = setup(0, ConfirmBehavior::Confirm, true).await;

        let err = policy
            .ensure_funded(
                &account,
                &execution_wallet(),
                dec!(0.1),
                &signed_transfer(dec!(0.1), "exec"),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Funding(_)));
        assert!(err.to_string().contains("insufficient shielded funds"));
    }
}
