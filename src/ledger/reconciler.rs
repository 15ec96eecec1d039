use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ledger::client::ShieldedLedger;
use crate::wallet::models::ShieldedAccount;
use crate::wallet::repository::AccountRepository;

/// Drift below this is treated as parity; no persistence write happens.
pub const DRIFT_EPSILON: Decimal = dec!(0.000001);

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Compares the cached shielded balance against the authoritative value
/// reported by the ledger service and resolves drift.
pub struct Reconciler {
    ledger: Arc<dyn ShieldedLedger>,
    accounts: Arc<AccountRepository>,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn ShieldedLedger>, accounts: Arc<AccountRepository>) -> Self {
        Self { ledger, accounts }
    }

    /// Returns the authoritative balance in major units. Falls back to
    /// the cached value when the external read fails - balance
    /// visibility never hard-fails on a transient outage.
    pub async fn reconcile(&self, account: &ShieldedAccount) -> Decimal {
        let external = match self
            .ledger
            .get_balance(&account.wallet_address, account.api_key.as_deref())
            .await
        {
            Ok(balance) => Decimal::from(balance.available) / Decimal::from(LAMPORTS_PER_SOL),
            Err(e) => {
                warn!(
                    "Failed to fetch shielded balance for {}: {}",
                    account.wallet_address, e
                );
                return account.cached_balance;
            }
        };

        let drift = (account.cached_balance - external).abs();
        if drift > DRIFT_EPSILON {
            info!(
                "Syncing balance for {}: cache={} -> ledger={}",
                account.wallet_address, account.cached_balance, external
            );
            if let Err(e) = self
                .accounts
                .update_cached_balance(&account.wallet_address, external)
                .await
            {
                warn!("Failed to persist reconciled balance: {}", e);
            }
        }

        // A fresh read always wins over the cache, drift or not
        external
    }
}
