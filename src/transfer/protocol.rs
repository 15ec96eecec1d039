use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AppResult, TransferError};
use crate::ledger::client::{
    ExternalTransferRequest, ProofUpload, ShieldedLedger, TransferReceipt, NATIVE_TOKEN,
};
use crate::ledger::reconciler::{Reconciler, LAMPORTS_PER_SOL};
use crate::wallet::models::ShieldedAccount;
use crate::wallet::repository::AccountRepository;

pub const MESSAGE_PREFIX: &str = "shadowpay";
pub const EXTERNAL_TRANSFER_TAG: &str = "external_transfer";

/// Relayer keeps 1% of the transferred amount, floored to a lamport
const RELAYER_FEE_DIVISOR: u64 = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthorizationState {
    Prepared,
    Signed,
    ProofSubmitted,
    Settled,
    Failed,
}

/// Ephemeral transfer authorization. Lives only for the duration of a
/// prepare/execute round trip; terminal states are final and a retried
/// attempt starts over with a fresh signing nonce.
#[derive(Clone, Debug)]
pub struct TransferAuthorization {
    pub message: String,
    /// Nonce embedded in the signable message. Distinct from the proof
    /// nonce sent to the ledger and from the settlement nonce it
    /// returns - the three must never be conflated.
    pub signing_nonce: String,
    pub timestamp: i64,
    pub amount_lamports: u64,
    pub state: AuthorizationState,
}

impl TransferAuthorization {
    pub fn prepared(amount_lamports: u64) -> Self {
        let signing_nonce = Uuid::new_v4().to_string();
        let timestamp = Utc::now().timestamp();
        let message = format!(
            "{}:{}:{}:{}",
            MESSAGE_PREFIX, EXTERNAL_TRANSFER_TAG, signing_nonce, timestamp
        );

        Self {
            message,
            signing_nonce,
            timestamp,
            amount_lamports,
            state: AuthorizationState::Prepared,
        }
    }

    pub fn mark_signed(mut self) -> Self {
        self.state = AuthorizationState::Signed;
        self
    }

    pub fn mark_proof_submitted(mut self) -> Self {
        self.state = AuthorizationState::ProofSubmitted;
        self
    }

    pub fn mark_settled(mut self) -> Self {
        self.state = AuthorizationState::Settled;
        self
    }

    pub fn mark_failed(mut self) -> Self {
        self.state = AuthorizationState::Failed;
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            AuthorizationState::Settled | AuthorizationState::Failed
        )
    }
}

/// Signed inputs for the execute phase, produced out-of-band by the
/// sender's wallet against a prepared authorization.
#[derive(Clone, Debug)]
pub struct SignedTransfer {
    pub recipient_address: String,
    pub amount: Decimal,
    pub signing_nonce: String,
    pub signature: String,
    pub message: String,
}

/// Two-phase signed-transfer flow for moving shielded funds to a
/// non-self recipient.
pub struct TransferProtocol {
    ledger: Arc<dyn ShieldedLedger>,
    accounts: Arc<AccountRepository>,
    reconciler: Reconciler,
}

impl TransferProtocol {
    pub fn new(ledger: Arc<dyn ShieldedLedger>, accounts: Arc<AccountRepository>) -> Self {
        let reconciler = Reconciler::new(ledger.clone(), accounts.clone());
        Self {
            ledger,
            accounts,
            reconciler,
        }
    }

    /// Phase one: build the signable message. Signing happens
    /// out-of-band in the sender's wallet.
    pub fn prepare(
        &self,
        sender: &str,
        recipient: &str,
        amount: Decimal,
    ) -> AppResult<TransferAuthorization> {
        let amount_lamports = to_lamports(amount)?;
        let authorization = TransferAuthorization::prepared(amount_lamports);

        info!(
            "Prepared transfer {} -> {}: {}",
            sender, recipient, authorization.message
        );
        Ok(authorization)
    }

    /// Phase two: validate the signed message, submit the settlement
    /// proof, and finalize the external transfer. Any failure is
    /// terminal for this authorization; the caller must re-prepare.
    pub async fn execute(
        &self,
        account: &ShieldedAccount,
        transfer: &SignedTransfer,
    ) -> AppResult<TransferReceipt> {
        validate_signature(&transfer.signature)?;
        validate_message_binding(&transfer.message, &transfer.signing_nonce)?;

        let amount_lamports = to_lamports(transfer.amount)?;
        let mut authorization = TransferAuthorization {
            message: transfer.message.clone(),
            signing_nonce: transfer.signing_nonce.clone(),
            timestamp: Utc::now().timestamp(),
            amount_lamports,
            state: AuthorizationState::Prepared,
        }
        .mark_signed();

        // Balance truth comes from the reconciler; an apparent shortfall
        // is only a warning because the value may be a stale-cache
        // fallback and the ledger is the authority that rejects.
        let shielded_balance = self.reconciler.reconcile(account).await;
        if to_lamports(shielded_balance).unwrap_or(0) < amount_lamports {
            warn!(
                "Shielded balance {} looks short of transfer amount {} for {}",
                shielded_balance, transfer.amount, account.wallet_address
            );
        }

        // The proof nonce is a fresh seconds-resolution timestamp; the
        // signing nonce from the message is never reused here.
        let proof_nonce = Utc::now().timestamp() as u32;
        let proof = self
            .ledger
            .upload_proof(&ProofUpload {
                sender_wallet: account.wallet_address.clone(),
                token: NATIVE_TOKEN.to_string(),
                amount: amount_lamports,
                nonce: proof_nonce,
            })
            .await
            .map_err(|e| {
                warn!("Proof upload failed for {}: {}", account.wallet_address, e);
                TransferError::ProofUpload(e.to_string())
            })?;
        authorization = authorization.mark_proof_submitted();

        let relayer_fee = amount_lamports / RELAYER_FEE_DIVISOR;
        let receipt = self
            .ledger
            .external_transfer(&ExternalTransferRequest {
                sender_wallet: account.wallet_address.clone(),
                recipient_wallet: transfer.recipient_address.clone(),
                token: NATIVE_TOKEN.to_string(),
                nonce: proof.nonce,
                relayer_fee,
                sender_signature: transfer.signature.clone(),
                signature_message: transfer.message.clone(),
            })
            .await
            .map_err(|e| {
                warn!(
                    "External transfer failed for {}: {}",
                    account.wallet_address, e
                );
                TransferError::Settlement(e.to_string())
            })?;
        authorization = authorization.mark_settled();
        debug_assert!(authorization.is_terminal());

        info!(
            "Transfer settled: {} -> {} ({} lamports, tx {})",
            account.wallet_address, transfer.recipient_address, amount_lamports,
            receipt.tx_signature
        );

        if let Err(e) = self
            .accounts
            .debit_cached_balance(&account.wallet_address, transfer.amount)
            .await
        {
            warn!("Failed to debit cached balance: {}", e);
        }

        Ok(receipt)
    }
}

/// floor(major units * 1e9), rejecting non-positive results
pub fn to_lamports(amount: Decimal) -> AppResult<u64> {
    let lamports = (amount * Decimal::from(LAMPORTS_PER_SOL)).floor();
    lamports
        .to_u64()
        .filter(|l| *l > 0)
        .ok_or_else(|| TransferError::MalformedMessage("Invalid amount conversion".into()).into())
}

fn validate_signature(signature: &str) -> Result<(), TransferError> {
    if signature.trim().is_empty() {
        return Err(TransferError::InvalidSignature("empty signature".into()));
    }

    let bytes = bs58::decode(signature)
        .into_vec()
        .map_err(|_| TransferError::InvalidSignature("not canonical base58".into()))?;
    if bytes.len() != 64 {
        return Err(TransferError::InvalidSignature(format!(
            "expected 64 bytes, got {}",
            bytes.len()
        )));
    }

    Ok(())
}

/// The supplied message must be the one this authorization was prepared
/// with: correct prefix and tag, and the embedded nonce equal to the
/// caller's signing nonce.
fn validate_message_binding(message: &str, signing_nonce: &str) -> Result<(), TransferError> {
    let parts: Vec<&str> = message.split(':').collect();
    if parts.len() != 4 {
        return Err(TransferError::MalformedMessage(format!(
            "expected 4 colon-delimited fields, got {}",
            parts.len()
        )));
    }
    if parts[0] != MESSAGE_PREFIX || parts[1] != EXTERNAL_TRANSFER_TAG {
        return Err(TransferError::MalformedMessage(
            "message is not an external-transfer authorization".into(),
        ));
    }
    if parts[2] != signing_nonce {
        return Err(TransferError::NonceMismatch);
    }
    if parts[3].parse::<i64>().is_err() {
        return Err(TransferError::MalformedMessage(
            "timestamp is not numeric".into(),
        ));
    }

    Ok(())
}
