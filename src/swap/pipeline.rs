use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use solana_sdk::signature::Signer;
use solana_sdk::transaction::VersionedTransaction;
use std::sync::Arc;
use tracing::{info, warn};

use crate::aggregator::client::{QuoteParams, SwapAggregator};
use crate::aggregator::tokens::TokenCache;
use crate::error::{AggregatorError, AppError, AppResult, RpcError};
use crate::execution::rpc::{ConfirmOutcome, WalletRpc};
use crate::locks::AccountLocks;
use crate::swap::funding::{FundingOutcome, FundingPolicy};
use crate::transfer::protocol::SignedTransfer;
use crate::wallet::models::{RecordStatus, SwapDetails, TransactionRecord};
use crate::wallet::repository::{AccountRepository, TransactionRepository};

pub const NATIVE_MINT: &str = "So11111111111111111111111111111111111111112";
pub const NATIVE_SYMBOL: &str = "SOL";

/// Kept back from the swap amount so the execution wallet retains
/// enough for network fees and rent
pub const SWAP_FEE_RESERVE: Decimal = dec!(0.003);

const AGGREGATOR_PROTOCOL: &str = "JUPITER";

fn default_slippage_bps() -> u16 {
    50
}

/// Either leg of a swap: a raw mint identifier or a metadata object
/// carrying one
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRef {
    pub address: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub input_mint: Option<String>,
    #[serde(default)]
    pub output_mint: Option<String>,
    #[serde(default)]
    pub from_token: Option<TokenRef>,
    #[serde(default)]
    pub to_token: Option<TokenRef>,
    #[serde(default = "default_slippage_bps")]
    pub slippage_bps: u16,
    /// Transfer authorization for the shielded funding leg, signed
    /// out-of-band against a prepared message
    #[serde(default)]
    pub nonce: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Caller-supplied key making a retried funding+swap attempt safe
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapStatus {
    Confirmed,
    SentUnknown,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapOutcome {
    pub success: bool,
    pub tx_hash: String,
    pub status: SwapStatus,
    pub message: String,
}

#[derive(Debug, Clone)]
struct ResolvedAsset {
    mint: String,
    symbol: Option<String>,
    decimals: Option<u8>,
}

impl ResolvedAsset {
    fn is_native(&self) -> bool {
        self.mint == NATIVE_MINT || self.symbol.as_deref() == Some(NATIVE_SYMBOL)
    }

    fn label(&self) -> String {
        self.symbol.clone().unwrap_or_else(|| "UNKNOWN".to_string())
    }
}

/// Top-level settlement state machine: funds the execution wallet from
/// the shielded ledger when needed, fetches a quote and swap
/// transaction from the aggregator, signs with the execution-wallet
/// credential, broadcasts, and resolves to a terminal status.
pub struct SwapPipeline {
    rpc: Arc<dyn WalletRpc>,
    aggregator: Arc<dyn SwapAggregator>,
    funding: Arc<FundingPolicy>,
    accounts: Arc<AccountRepository>,
    records: Arc<TransactionRepository>,
    tokens: Arc<TokenCache>,
    locks: Arc<AccountLocks>,
}

impl SwapPipeline {
    pub fn new(
        rpc: Arc<dyn WalletRpc>,
        aggregator: Arc<dyn SwapAggregator>,
        funding: Arc<FundingPolicy>,
        accounts: Arc<AccountRepository>,
        records: Arc<TransactionRepository>,
        tokens: Arc<TokenCache>,
        locks: Arc<AccountLocks>,
    ) -> Self {
        Self {
            rpc,
            aggregator,
            funding,
            accounts,
            records,
            tokens,
            locks,
        }
    }

    pub async fn execute(
        &self,
        wallet_address: &str,
        request: SwapRequest,
    ) -> AppResult<SwapOutcome> {
        // REQUESTED: validate before any external call
        if request.amount <= Decimal::ZERO {
            return Err(AppError::Validation("Invalid amount".to_string()));
        }

        let input = self
            .resolve_asset(request.input_mint.as_deref(), request.from_token.as_ref())
            .await
            .ok_or_else(|| AppError::Validation("Missing input asset".to_string()))?;
        let output = self
            .resolve_asset(request.output_mint.as_deref(), request.to_token.as_ref())
            .await
            .ok_or_else(|| AppError::Validation("Missing output asset".to_string()))?;

        let account = self.accounts.get(wallet_address).await?;
        let keypair = account.execution_keypair()?;
        let execution_wallet = keypair.pubkey();

        // One in-flight settlement per account, held through
        // funding and broadcast
        let _settlement_guard = self.locks.acquire(wallet_address).await;

        if let Some(key) = request.idempotency_key.as_deref() {
            if let Some(existing) = self.records.find_by_idempotency_key(key).await {
                info!(
                    "Idempotent replay for {}: returning recorded attempt {}",
                    wallet_address, existing.id
                );
                return Ok(outcome_from_record(&existing));
            }
        }

        // FUNDING: only the native-asset shielded balance participates;
        // other assets must already sit in the execution wallet
        if input.is_native() {
            if let Some(message) = request.message.as_deref() {
                if !message.contains(crate::transfer::protocol::EXTERNAL_TRANSFER_TAG) {
                    warn!("Funding message does not look like an external-transfer authorization");
                }
            }

            let transfer = SignedTransfer {
                recipient_address: execution_wallet.to_string(),
                amount: request.amount,
                signing_nonce: request.nonce.clone().unwrap_or_default(),
                signature: request.signature.clone().unwrap_or_default(),
                message: request.message.clone().unwrap_or_default(),
            };

            match self
                .funding
                .ensure_funded(&account, &execution_wallet, request.amount, &transfer)
                .await?
            {
                FundingOutcome::AlreadyFunded => {
                    info!("Execution wallet already funded for {}", wallet_address)
                }
                FundingOutcome::Settled { tx_signature } => {
                    info!("Shielded balance settled for swap: {}", tx_signature)
                }
                FundingOutcome::ProceedDegraded => {
                    warn!("Proceeding on existing execution-wallet balance only")
                }
            }
        }

        // Fee reservation: never let the reserve push the amount negative
        let mut swap_amount = request.amount;
        if input.is_native() && swap_amount > SWAP_FEE_RESERVE {
            swap_amount -= SWAP_FEE_RESERVE;
            info!(
                "Reserved {} SOL for fees; swapping {}",
                SWAP_FEE_RESERVE, swap_amount
            );
        }

        let decimals = input
            .decimals
            .unwrap_or(if input.is_native() { 9 } else { 6 });
        let amount_smallest = to_smallest_units(swap_amount, decimals)?;

        // QUOTING
        let quote = self
            .aggregator
            .quote(&QuoteParams {
                input_mint: input.mint.clone(),
                output_mint: output.mint.clone(),
                amount: amount_smallest,
                slippage_bps: request.slippage_bps,
            })
            .await?
            .ok_or(AggregatorError::NoQuote)?;

        let blob = self
            .aggregator
            .build_swap(&quote, &execution_wallet.to_string())
            .await?;

        // SIGNING: the execution-wallet credential authorizes the swap
        // instruction set; this is not the user's transfer signature
        let tx_bytes = BASE64
            .decode(&blob)
            .map_err(|e| RpcError::InvalidTransaction(format!("Invalid base64: {}", e)))?;
        let mut transaction: VersionedTransaction = bincode::deserialize(&tx_bytes)
            .map_err(|e| RpcError::InvalidTransaction(e.to_string()))?;
        if transaction.signatures.is_empty() {
            return Err(RpcError::InvalidTransaction("No signature slots".to_string()).into());
        }
        let signature = keypair.sign_message(&transaction.message.serialize());
        transaction.signatures[0] = signature;

        // BROADCAST
        let tx_hash = self.rpc.send_transaction(&transaction).await?;
        info!("Swap transaction sent: {}", tx_hash);

        let status = match self.rpc.confirm_transaction(&tx_hash).await {
            Ok(ConfirmOutcome::Confirmed) => SwapStatus::Confirmed,
            Ok(ConfirmOutcome::FailedOnChain(err)) => {
                warn!("Swap transaction failed on chain: {}", err);
                return Err(AppError::OnChain(err));
            }
            // Indeterminate is not failure: the transaction may still
            // land, and the caller is told exactly that
            Err(AppError::Rpc(RpcError::ConfirmationTimeout)) => {
                warn!("Confirmation timed out, but the transaction was sent");
                SwapStatus::SentUnknown
            }
            Err(e) => return Err(e),
        };

        let record = TransactionRecord::swap(
            wallet_address.to_string(),
            request.amount,
            format!("{}-{}", input.label(), output.label()),
            tx_hash.to_string(),
            match status {
                SwapStatus::Confirmed => RecordStatus::Completed,
                SwapStatus::SentUnknown => RecordStatus::Pending,
            },
            SwapDetails {
                protocol: AGGREGATOR_PROTOCOL.to_string(),
                input_mint: input.mint,
                output_mint: output.mint,
            },
        )
        .with_idempotency_key(request.idempotency_key.clone());
        self.records.save(record).await?;

        Ok(SwapOutcome {
            success: true,
            tx_hash: tx_hash.to_string(),
            status,
            message: match status {
                SwapStatus::Confirmed => "Swap executed successfully".to_string(),
                SwapStatus::SentUnknown => {
                    "Swap transaction sent, waiting for confirmation on chain.".to_string()
                }
            },
        })
    }

    /// Accepts a raw mint or a metadata object; fills symbol/decimals
    /// from the token cache when the caller didn't supply them
    async fn resolve_asset(
        &self,
        mint: Option<&str>,
        meta: Option<&TokenRef>,
    ) -> Option<ResolvedAsset> {
        let mint = mint
            .map(str::to_string)
            .or_else(|| meta.map(|m| m.address.clone()))?;

        let mut resolved = ResolvedAsset {
            symbol: meta.and_then(|m| m.symbol.clone()),
            decimals: meta.and_then(|m| m.decimals),
            mint,
        };

        if resolved.symbol.is_none() || resolved.decimals.is_none() {
            if let Some(known) = self.tokens.find(&resolved.mint).await {
                resolved.symbol.get_or_insert(known.symbol);
                resolved.decimals.get_or_insert(known.decimals);
            }
        }

        Some(resolved)
    }
}

fn outcome_from_record(record: &TransactionRecord) -> SwapOutcome {
    let status = match record.status {
        RecordStatus::Completed => SwapStatus::Confirmed,
        RecordStatus::Pending => SwapStatus::SentUnknown,
    };
    SwapOutcome {
        success: true,
        tx_hash: record.tx_hash.clone(),
        status,
        message: "Swap already settled for this idempotency key".to_string(),
    }
}

/// floor(major units * 10^decimals)
fn to_smallest_units(amount: Decimal, decimals: u8) -> AppResult<u64> {
    let scale = Decimal::from(10u64.pow(decimals as u32));
    (amount * scale)
        .floor()
        .to_u64()
        .filter(|units| *units > 0)
        .ok_or_else(|| AppError::Validation("Swap amount below one smallest unit".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppResult, LedgerError};
    use crate::ledger::client::{
        ExternalTransferRequest, LedgerBalance, ProofReceipt, ProofUpload, ShieldedLedger,
        TransferReceipt,
    };
    use crate::transfer::protocol::{TransferAuthorization, TransferProtocol};
    use crate::wallet::models::ShieldedAccount;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use solana_sdk::hash::Hash;
    use solana_sdk::instruction::{AccountMeta, Instruction};
    use solana_sdk::message::Message;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::{Keypair, Signature};
    use solana_sdk::transaction::Transaction;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const USDC_MINT: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    struct StubLedger {
        available: u64,
        transfer_calls: AtomicUsize,
        balance_calls: AtomicUsize,
    }

    impl StubLedger {
        fn new(available: u64) -> Self {
            Self {
                available,
                transfer_calls: AtomicUsize::new(0),
                balance_calls: AtomicUsize::new(0),
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
            self.balance_calls.fetch_add(1, Ordering::SeqCst);
            Ok(LedgerBalance {
                available: self.available,
                pool_address: None,
            })
        }

        async fn upload_proof(&self, request: &ProofUpload) -> AppResult<ProofReceipt> {
            Ok(ProofReceipt {
                nonce: request.nonce as u64 + 1,
            })
        }

        async fn external_transfer(
            &self,
            request: &ExternalTransferRequest,
        ) -> AppResult<TransferReceipt> {
            self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            if request.sender_signature.is_empty() {
                return Err(LedgerError::Rejected("missing signature".into()).into());
            }
            Ok(TransferReceipt {
                tx_signature: Signature::from([8u8; 64]).to_string(),
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
        FailOnChain,
    }

    struct StubRpc {
        balance: u64,
        confirm: ConfirmBehavior,
        send_calls: AtomicUsize,
    }

    impl StubRpc {
        fn new(balance: u64, confirm: ConfirmBehavior) -> Self {
            Self {
                balance,
                confirm,
                send_calls: AtomicUsize::new(0),
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
            transaction: &VersionedTransaction,
        ) -> AppResult<Signature> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            Ok(*transaction
                .signatures
                .first()
                .expect("signed transaction has a signature"))
        }

        async fn confirm_transaction(&self, _signature: &Signature) -> AppResult<ConfirmOutcome> {
            match self.confirm {
                ConfirmBehavior::Confirm => Ok(ConfirmOutcome::Confirmed),
                ConfirmBehavior::Timeout => Err(RpcError::ConfirmationTimeout.into()),
                ConfirmBehavior::FailOnChain => Ok(ConfirmOutcome::FailedOnChain(
                    "InstructionError(2, Custom(6001))".to_string(),
                )),
            }
        }
    }

    struct StubAggregator {
        has_quote: bool,
        quote_calls: AtomicUsize,
        last_quote_params: Mutex<Option<QuoteParams>>,
    }

    impl StubAggregator {
        fn new(has_quote: bool) -> Self {
            Self {
                has_quote,
                quote_calls: AtomicUsize::new(0),
                last_quote_params: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SwapAggregator for StubAggregator {
        async fn quote(&self, params: &QuoteParams) -> AppResult<Option<Value>> {
            self.quote_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_quote_params.lock().unwrap() = Some(params.clone());
            if !self.has_quote {
                return Ok(None);
            }
            Ok(Some(json!({"inAmount": params.amount.to_string()})))
        }

        async fn build_swap(&self, _quote: &Value, user_public_key: &str) -> AppResult<String> {
            // A structurally valid unsigned transaction for the given
            // fee payer, as the real aggregator returns
            let payer = Pubkey::from_str(user_public_key).unwrap();
            let instruction = Instruction {
                program_id: Pubkey::new_unique(),
                accounts: vec![AccountMeta::new(payer, true)],
                data: vec![1, 2, 3],
            };
            let message = Message::new(&[instruction], Some(&payer));
            let transaction =
                VersionedTransaction::from(Transaction::new_unsigned(message));
            Ok(BASE64.encode(bincode::serialize(&transaction).unwrap()))
        }

        async fn token_list(&self) -> AppResult<Vec<crate::aggregator::client::TokenMetadata>> {
            Ok(vec![crate::aggregator::client::TokenMetadata {
                address: USDC_MINT.to_string(),
                symbol: "USDC".to_string(),
                name: "USD Coin".to_string(),
                decimals: 6,
                logo_uri: None,
            }])
        }
    }

    struct Harness {
        pipeline: SwapPipeline,
        ledger: Arc<StubLedger>,
        rpc: Arc<StubRpc>,
        aggregator: Arc<StubAggregator>,
        records: Arc<TransactionRepository>,
    }

    async fn harness(
        wallet_lamports: u64,
        shielded_lamports: u64,
        confirm: ConfirmBehavior,
        has_quote: bool,
    ) -> Harness {
        let ledger = Arc::new(StubLedger::new(shielded_lamports));
        let rpc = Arc::new(StubRpc::new(wallet_lamports, confirm));
        let aggregator = Arc::new(StubAggregator::new(has_quote));
        let accounts = Arc::new(AccountRepository::new());
        let records = Arc::new(TransactionRepository::new());

        let keypair = Keypair::new();
        let mut account = ShieldedAccount::new("user-wallet".to_string())
            .with_execution_secret(keypair.to_base58_string())
            .unwrap();
        account.cached_balance = Decimal::from(shielded_lamports) / Decimal::from(1_000_000_000u64);
        accounts.upsert(account).await.unwrap();

        let protocol = Arc::new(TransferProtocol::new(ledger.clone(), accounts.clone()));
        let funding = Arc::new(
            FundingPolicy::new(rpc.clone(), protocol)
                .with_waits(Duration::from_millis(0), Duration::from_millis(0)),
        );
        let tokens = Arc::new(TokenCache::hourly(aggregator.clone()));

        let pipeline = SwapPipeline::new(
            rpc.clone(),
            aggregator.clone(),
            funding,
            accounts,
            records.clone(),
            tokens,
            Arc::new(AccountLocks::new()),
        );

        Harness {
            pipeline,
            ledger,
            rpc,
            aggregator,
            records,
        }
    }

    fn native_request(amount: Decimal) -> SwapRequest {
        SwapRequest {
            amount,
            input_mint: Some(NATIVE_MINT.to_string()),
            output_mint: Some(USDC_MINT.to_string()),
            from_token: Some(TokenRef {
                address: NATIVE_MINT.to_string(),
                symbol: Some("SOL".to_string()),
                decimals: Some(9),
            }),
            to_token: None,
            slippage_bps: 50,
            nonce: None,
            signature: None,
            message: None,
            idempotency_key: None,
        }
    }

    fn with_authorization(mut request: SwapRequest) -> SwapRequest {
        let auth = TransferAuthorization::prepared(100_000_000);
        request.nonce = Some(auth.signing_nonce.clone());
        request.signature = Some(bs58::encode([5u8; 64]).into_string());
        request.message = Some(auth.message);
        request
    }

    #[tokio::test]
    async fn funded_wallet_never_touches_the_ledger() {
        // Scenario B: 1.0 SOL on chain, swap 0.1
        let h = harness(1_000_000_000, 0, ConfirmBehavior::Confirm, true).await;

        let outcome = h
            .pipeline
            .execute("user-wallet", native_request(dec!(0.1)))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.status, SwapStatus::Confirmed);
        assert!(!outcome.tx_hash.is_empty());
        assert_eq!(h.ledger.transfer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.ledger.balance_calls.load(Ordering::SeqCst), 0);

        // Fee reserve applied before unit conversion
        let params = h.aggregator.last_quote_params.lock().unwrap().clone().unwrap();
        assert_eq!(params.amount, 97_000_000);
    }

    #[tokio::test]
    async fn shielded_funding_path_settles_then_swaps() {
        // Scenario A: empty execution wallet, 0.2 SOL shielded
        let h = harness(0, 200_000_000, ConfirmBehavior::Confirm, true).await;

        let outcome = h
            .pipeline
            .execute(
                "user-wallet",
                with_authorization(native_request(dec!(0.1))),
            )
            .await
            .unwrap();

        assert!(outcome.success);
        assert!(!outcome.tx_hash.is_empty());
        assert!(matches!(
            outcome.status,
            SwapStatus::Confirmed | SwapStatus::SentUnknown
        ));
        assert_eq!(h.ledger.transfer_calls.load(Ordering::SeqCst), 1);

        let params = h.aggregator.last_quote_params.lock().unwrap().clone().unwrap();
        assert_eq!(params.amount, 97_000_000);
    }

    #[tokio::test]
    async fn missing_quote_aborts_before_broadcast() {
        // Scenario C
        let h = harness(1_000_000_000, 0, ConfirmBehavior::Confirm, false).await;

        let err = h
            .pipeline
            .execute("user-wallet", native_request(dec!(0.1)))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AppError::Aggregator(AggregatorError::NoQuote)
        ));
        assert_eq!(err.to_string(), "Aggregator error: No quote found");
        assert_eq!(h.rpc.send_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.records.count().await, 0);
    }

    #[tokio::test]
    async fn confirmation_timeout_is_success_with_pending_record() {
        // Scenario D
        let h = harness(1_000_000_000, 0, ConfirmBehavior::Timeout, true).await;

        let outcome = h
            .pipeline
            .execute("user-wallet", native_request(dec!(0.1)))
            .await
            .unwrap();

        assert!(outcome.success);
        assert_eq!(outcome.status, SwapStatus::SentUnknown);

        let records = h.records.find_by_user("user-wallet").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::Pending);
    }

    #[tokio::test]
    async fn confirmed_swap_persists_exactly_one_completed_record() {
        let h = harness(1_000_000_000, 0, ConfirmBehavior::Confirm, true).await;

        h.pipeline
            .execute("user-wallet", native_request(dec!(0.1)))
            .await
            .unwrap();

        let records = h.records.find_by_user("user-wallet").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RecordStatus::Completed);
        assert_eq!(records[0].token_pair, "SOL-USDC");
        assert_eq!(records[0].details.protocol, "JUPITER");
    }

    #[tokio::test]
    async fn onchain_failure_is_terminal_and_unrecorded() {
        let h = harness(1_000_000_000, 0, ConfirmBehavior::FailOnChain, true).await;

        let err = h
            .pipeline
            .execute("user-wallet", native_request(dec!(0.1)))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::OnChain(_)));
        assert_eq!(h.records.count().await, 0);
    }

    #[tokio::test]
    async fn tiny_native_amount_skips_fee_reservation() {
        let h = harness(1_000_000_000, 0, ConfirmBehavior::Confirm, true).await;

        h.pipeline
            .execute("user-wallet", native_request(dec!(0.002)))
            .await
            .unwrap();

        let params = h.aggregator.last_quote_params.lock().unwrap().clone().unwrap();
        // 0.002 <= reserve, so the amount goes through unchanged
        assert_eq!(params.amount, 2_000_000);
    }

    #[tokio::test]
    async fn non_native_input_skips_funding_and_defaults_to_six_decimals() {
        let h = harness(0, 0, ConfirmBehavior::Confirm, true).await;

        let request = SwapRequest {
            amount: dec!(25),
            input_mint: Some(USDC_MINT.to_string()),
            output_mint: Some(NATIVE_MINT.to_string()),
            from_token: None,
            to_token: None,
            slippage_bps: 50,
            nonce: None,
            signature: None,
            message: None,
            idempotency_key: None,
        };

        let outcome = h.pipeline.execute("user-wallet", request).await.unwrap();

        assert!(outcome.success);
        assert_eq!(h.ledger.transfer_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.ledger.balance_calls.load(Ordering::SeqCst), 0);

        let params = h.aggregator.last_quote_params.lock().unwrap().clone().unwrap();
        assert_eq!(params.amount, 25_000_000);

        // Symbol resolved through the token cache for the record label
        let records = h.records.find_by_user("user-wallet").await.unwrap();
        assert_eq!(records[0].token_pair, "USDC-UNKNOWN");
    }

    #[tokio::test]
    async fn invalid_amount_rejected_before_any_external_call() {
        let h = harness(1_000_000_000, 0, ConfirmBehavior::Confirm, true).await;

        let err = h
            .pipeline
            .execute("user-wallet", native_request(dec!(0)))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert_eq!(h.aggregator.quote_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.records.count().await, 0);
    }

    #[tokio::test]
    async fn missing_credential_is_a_client_error() {
        let h = harness(1_000_000_000, 0, ConfirmBehavior::Confirm, true).await;
        // An account that never configured an execution wallet
        let account = ShieldedAccount::new("bare-wallet".to_string());
        h.pipeline.accounts.upsert(account).await.unwrap();

        let err = h
            .pipeline
            .execute("bare-wallet", native_request(dec!(0.1)))
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(_)));
        assert!(err.to_string().contains("Internal wallet not configured"));
        assert_eq!(h.aggregator.quote_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn idempotency_key_replays_recorded_attempt() {
        let h = harness(1_000_000_000, 0, ConfirmBehavior::Confirm, true).await;

        let mut request = native_request(dec!(0.1));
        request.idempotency_key = Some("attempt-1".to_string());
        let first = h
            .pipeline
            .execute("user-wallet", request.clone())
            .await
            .unwrap();

        let quote_calls_after_first = h.aggregator.quote_calls.load(Ordering::SeqCst);
        let replay = h.pipeline.execute("user-wallet", request).await.unwrap();

        assert_eq!(replay.tx_hash, first.tx_hash);
        assert_eq!(h.records.count().await, 1);
        assert_eq!(
            h.aggregator.quote_calls.load(Ordering::SeqCst),
            quote_calls_after_first
        );
    }

    #[test]
    fn smallest_unit_conversion_floors() {
        assert_eq!(to_smallest_units(dec!(0.097), 9).unwrap(), 97_000_000);
        assert_eq!(to_smallest_units(dec!(25), 6).unwrap(), 25_000_000);
        assert_eq!(to_smallest_units(dec!(0.0000015), 6).unwrap(), 1);
        assert!(to_smallest_units(dec!(0.0000001), 6).is_err());
    }
}
