use rust_decimal::Decimal;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::wallet::models::{ShieldedAccount, TransactionRecord};

pub struct AccountRepository {
    accounts: tokio::sync::RwLock<HashMap<String, ShieldedAccount>>,
}

impl AccountRepository {
    pub fn new() -> Self {
        Self {
            accounts: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn upsert(&self, account: ShieldedAccount) -> AppResult<ShieldedAccount> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.wallet_address.clone(), account.clone());
        Ok(account)
    }

    pub async fn get(&self, wallet_address: &str) -> AppResult<ShieldedAccount> {
        let accounts = self.accounts.read().await;
        accounts
            .get(wallet_address)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", wallet_address)))
    }

    pub async fn update_cached_balance(
        &self,
        wallet_address: &str,
        balance: Decimal,
    ) -> AppResult<ShieldedAccount> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(wallet_address)
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", wallet_address)))?;

        account.cached_balance = balance;
        Ok(account.clone())
    }

    /// Debit the advisory cache after a settled transfer. Never goes
    /// negative - the external ledger is authoritative and the next
    /// reconcile overwrites whatever we compute here.
    pub async fn debit_cached_balance(
        &self,
        wallet_address: &str,
        amount: Decimal,
    ) -> AppResult<ShieldedAccount> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(wallet_address)
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", wallet_address)))?;

        account.cached_balance = (account.cached_balance - amount).max(Decimal::ZERO);
        Ok(account.clone())
    }

    pub async fn set_api_key(&self, wallet_address: &str, api_key: String) -> AppResult<()> {
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(wallet_address)
            .ok_or_else(|| AppError::NotFound(format!("Account {} not found", wallet_address)))?;

        account.api_key = Some(api_key);
        Ok(())
    }
}

pub struct TransactionRepository {
    records: tokio::sync::RwLock<HashMap<Uuid, TransactionRecord>>,
}

impl TransactionRepository {
    pub fn new() -> Self {
        Self {
            records: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn save(&self, record: TransactionRecord) -> AppResult<TransactionRecord> {
        let mut records = self.records.write().await;
        records.insert(record.id, record.clone());
        Ok(record)
    }

    pub async fn find_by_id(&self, id: Uuid) -> AppResult<TransactionRecord> {
        let records = self.records.read().await;
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Transaction {} not found", id)))
    }

    pub async fn find_by_user(&self, wallet_address: &str) -> AppResult<Vec<TransactionRecord>> {
        let records = self.records.read().await;
        let mut user_records: Vec<TransactionRecord> = records
            .values()
            .filter(|r| r.wallet_address == wallet_address)
            .cloned()
            .collect();
        user_records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(user_records)
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Option<TransactionRecord> {
        let records = self.records.read().await;
        records
            .values()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
            .cloned()
    }

    #[cfg(test)]
    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wallet::models::{RecordStatus, SwapDetails};
    use rust_decimal_macros::dec;

    fn sample_record(wallet: &str, status: RecordStatus) -> TransactionRecord {
        TransactionRecord::swap(
            wallet.to_string(),
            dec!(0.1),
            "SOL-USDC".to_string(),
            "hash".to_string(),
            status,
            SwapDetails {
                protocol: "JUPITER".to_string(),
                input_mint: "in".to_string(),
                output_mint: "out".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn debit_never_goes_negative() {
        let repo = AccountRepository::new();
        let mut account = ShieldedAccount::new("w1".to_string());
        account.cached_balance = dec!(0.05);
        repo.upsert(account).await.unwrap();

        let updated = repo.debit_cached_balance("w1", dec!(0.2)).await.unwrap();
        assert_eq!(updated.cached_balance, Decimal::ZERO);
    }

    #[tokio::test]
    async fn find_by_user_filters_and_orders() {
        let repo = TransactionRepository::new();
        repo.save(sample_record("w1", RecordStatus::Completed))
            .await
            .unwrap();
        repo.save(sample_record("w2", RecordStatus::Pending))
            .await
            .unwrap();

        let records = repo.find_by_user("w1").await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].wallet_address, "w1");
    }

    #[tokio::test]
    async fn idempotency_key_lookup() {
        let repo = TransactionRepository::new();
        let record =
            sample_record("w1", RecordStatus::Completed).with_idempotency_key(Some("k1".into()));
        repo.save(record.clone()).await.unwrap();

        let found = repo.find_by_idempotency_key("k1").await.unwrap();
        assert_eq!(found.id, record.id);
        assert!(repo.find_by_idempotency_key("k2").await.is_none());
    }
}
