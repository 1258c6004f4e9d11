//! Withdrawal and transfer flow.
//!
//! The user's balance is decremented by the full requested amount before
//! the external call goes out, so concurrent requests cannot double-spend
//! by racing the network. If the dispatch fails in any way, including a
//! timeout with no definitive processor-side answer, the full amount is
//! credited back and the transaction is marked failed: this design accepts
//! a rare false refund over a more common false debit. Each dispatch is
//! attempted exactly once.

use crate::errors::{DicepayResult, ValidationError};
use crate::gateway::{CreateTransferRequest, Transfer};
use crate::ledger::{LedgerStore, UserId};
use crate::transactions::{Transaction, TransactionKind, TransactionLedger};
use async_trait::async_trait;
use log::{info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Where the funds go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WithdrawalDestination {
    /// Processor-internal account; transfers here are free
    ProcessorUser { user_id: u64 },
    /// External wallet address; incurs the fixed fee
    Wallet { address: String },
}

impl fmt::Display for WithdrawalDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WithdrawalDestination::ProcessorUser { user_id } => {
                write!(f, "cryptobot:{}", user_id)
            }
            WithdrawalDestination::Wallet { address } => write!(f, "{}", address),
        }
    }
}

/// TON address sanity check: base64 form starting with EQ or UQ
pub fn validate_ton_wallet(address: &str) -> bool {
    (address.starts_with("EQ") || address.starts_with("UQ")) && address.len() >= 48
}

/// Fee and asset policy for outbound transfers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawalConfig {
    pub asset: String,
    /// Fixed fee subtracted from the requested amount on external transfers
    pub external_fee: Decimal,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            asset: "TON".to_string(),
            external_fee: Decimal::new(1, 1), // 0.1
        }
    }
}

/// Transfer submission boundary, a seam over the gateway client so the
/// dispatch can be faked in tests
#[async_trait]
pub trait TransferGateway: Send + Sync {
    async fn create_transfer(&self, request: &CreateTransferRequest) -> DicepayResult<Transfer>;
}

#[async_trait]
impl TransferGateway for crate::gateway::CryptoPayClient {
    async fn create_transfer(&self, request: &CreateTransferRequest) -> DicepayResult<Transfer> {
        // resolves to the inherent method on the client
        crate::gateway::CryptoPayClient::create_transfer(self, request).await
    }
}

/// Outcome of a dispatched withdrawal. `transaction.status` tells whether
/// the transfer went through; on failure the balance has already been
/// restored.
#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    pub transaction: Transaction,
    pub balance_after: Decimal,
}

pub struct WithdrawalService {
    ledger: Arc<dyn LedgerStore>,
    gateway: Arc<dyn TransferGateway>,
    transactions: Arc<TransactionLedger>,
    config: WithdrawalConfig,
}

impl WithdrawalService {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn TransferGateway>,
        transactions: Arc<TransactionLedger>,
        config: WithdrawalConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            transactions,
            config,
        }
    }

    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Decimal,
        destination: WithdrawalDestination,
    ) -> DicepayResult<WithdrawalReceipt> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(amount).into());
        }

        let fee = match &destination {
            WithdrawalDestination::ProcessorUser { .. } => Decimal::ZERO,
            WithdrawalDestination::Wallet { address } => {
                if !validate_ton_wallet(address) {
                    return Err(ValidationError::InvalidDestination(address.clone()).into());
                }
                self.config.external_fee
            }
        };

        let net_amount = amount - fee;
        if net_amount <= Decimal::ZERO {
            return Err(ValidationError::AmountBelowFee { amount, fee }.into());
        }

        // Sufficiency check and debit are one conditional update; the full
        // requested amount comes off before the network call.
        let balance_after = self.ledger.try_debit(user_id, amount).await?;

        let transaction = self.transactions.open(
            user_id,
            TransactionKind::Withdrawal,
            amount,
            fee,
            net_amount,
            destination.to_string(),
        );
        info!(
            "withdrawal {} opened for user {}: {} ({} net) to {}",
            transaction.transaction_id, user_id, amount, net_amount, destination
        );

        let request = self.build_transfer_request(user_id, net_amount, &transaction, &destination);

        match self.gateway.create_transfer(&request).await {
            Ok(transfer) => {
                let transaction = self.transactions.mark_completed(
                    &transaction.transaction_id,
                    Some(transfer.transfer_id.to_string()),
                )?;
                info!(
                    "withdrawal {} completed as transfer {}",
                    transaction.transaction_id, transfer.transfer_id
                );
                Ok(WithdrawalReceipt {
                    transaction,
                    balance_after,
                })
            }
            Err(err) => {
                // Compensate: the debit is reversed in full, even when the
                // failure leaves the processor-side state unknown.
                let restored_balance = self.ledger.credit(user_id, amount).await?;
                let transaction = self
                    .transactions
                    .mark_failed(&transaction.transaction_id, err.to_string())?;
                warn!(
                    "withdrawal {} failed ({}), refunded {} to user {}",
                    transaction.transaction_id, err, amount, user_id
                );
                Ok(WithdrawalReceipt {
                    transaction,
                    balance_after: restored_balance,
                })
            }
        }
    }

    fn build_transfer_request(
        &self,
        user_id: UserId,
        net_amount: Decimal,
        transaction: &Transaction,
        destination: &WithdrawalDestination,
    ) -> CreateTransferRequest {
        match destination {
            WithdrawalDestination::ProcessorUser {
                user_id: processor_user,
            } => CreateTransferRequest::to_processor_user(
                *processor_user,
                self.config.asset.clone(),
                net_amount,
                format!("withdrawal_{}_{}", user_id, transaction.transaction_id),
                format!("Withdrawal for user {}", user_id),
            ),
            WithdrawalDestination::Wallet { address } => CreateTransferRequest::to_wallet(
                address.clone(),
                self.config.asset.clone(),
                net_amount,
                format!("Withdrawal for user {}", user_id),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{DicepayError, TransportError};
    use crate::ledger::InMemoryLedger;
    use crate::transactions::TransactionStatus;
    use std::sync::Mutex;

    const WALLET: &str = "EQBvW8Z5huBkMJYdnfAEM5JqTNkuWX3diqYENkWsIL0XggGG";

    fn ton(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    /// Gateway fake recording requests and answering from a script
    struct ScriptedGateway {
        responses: Mutex<Vec<DicepayResult<Transfer>>>,
        requests: Mutex<Vec<CreateTransferRequest>>,
    }

    impl ScriptedGateway {
        fn succeeding(transfer_id: i64) -> Self {
            Self {
                responses: Mutex::new(vec![Ok(Transfer { transfer_id })]),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                responses: Mutex::new(vec![Err(TransportError::Timeout.into())]),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn last_request(&self) -> CreateTransferRequest {
            self.requests.lock().unwrap().last().unwrap().clone()
        }
    }

    #[async_trait]
    impl TransferGateway for ScriptedGateway {
        async fn create_transfer(
            &self,
            request: &CreateTransferRequest,
        ) -> DicepayResult<Transfer> {
            self.requests.lock().unwrap().push(request.clone());
            self.responses.lock().unwrap().pop().unwrap_or_else(|| {
                Err(TransportError::Request("script exhausted".into()).into())
            })
        }
    }

    fn service(
        ledger: Arc<InMemoryLedger>,
        gateway: Arc<ScriptedGateway>,
        transactions: Arc<TransactionLedger>,
    ) -> WithdrawalService {
        WithdrawalService::new(ledger, gateway, transactions, WithdrawalConfig::default())
    }

    #[tokio::test]
    async fn insufficient_funds_changes_nothing() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(1, ton(5)).await.unwrap();
        let transactions = Arc::new(TransactionLedger::new());
        let svc = service(
            Arc::clone(&ledger),
            Arc::new(ScriptedGateway::succeeding(1)),
            Arc::clone(&transactions),
        );

        let err = svc
            .withdraw(1, ton(6), WithdrawalDestination::Wallet { address: WALLET.into() })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DicepayError::Validation(ValidationError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.get(1).await.unwrap().unwrap().balance, ton(5));
        assert!(transactions.is_empty());
    }

    #[tokio::test]
    async fn successful_external_withdrawal_debits_full_amount_and_dispatches_net() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(1, ton(20)).await.unwrap();
        let gateway = Arc::new(ScriptedGateway::succeeding(555));
        let transactions = Arc::new(TransactionLedger::new());
        let svc = service(Arc::clone(&ledger), Arc::clone(&gateway), Arc::clone(&transactions));

        let receipt = svc
            .withdraw(1, ton(10), WithdrawalDestination::Wallet { address: WALLET.into() })
            .await
            .unwrap();

        // balance = prior - full amount, not net-of-fee
        assert_eq!(receipt.balance_after, ton(10));
        assert_eq!(ledger.get(1).await.unwrap().unwrap().balance, ton(10));

        assert_eq!(receipt.transaction.status, TransactionStatus::Completed);
        assert_eq!(receipt.transaction.gross_amount, ton(10));
        assert_eq!(receipt.transaction.fee, Decimal::new(1, 1));
        assert_eq!(receipt.transaction.net_amount, Decimal::new(99, 1));
        assert_eq!(receipt.transaction.transfer_id.as_deref(), Some("555"));

        // the processor sees the net amount at the wallet address
        let dispatched = gateway.last_request();
        assert_eq!(dispatched.amount, Decimal::new(99, 1));
        assert_eq!(dispatched.wallet_address.as_deref(), Some(WALLET));
        assert!(dispatched.user_id.is_none());
    }

    #[tokio::test]
    async fn internal_transfer_is_fee_free_and_carries_spend_id() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(2, ton(8)).await.unwrap();
        let gateway = Arc::new(ScriptedGateway::succeeding(9));
        let transactions = Arc::new(TransactionLedger::new());
        let svc = service(Arc::clone(&ledger), Arc::clone(&gateway), Arc::clone(&transactions));

        let receipt = svc
            .withdraw(2, ton(8), WithdrawalDestination::ProcessorUser { user_id: 4242 })
            .await
            .unwrap();

        assert_eq!(receipt.transaction.fee, Decimal::ZERO);
        assert_eq!(receipt.transaction.net_amount, ton(8));
        assert_eq!(receipt.transaction.counterparty, "cryptobot:4242");

        let dispatched = gateway.last_request();
        assert_eq!(dispatched.user_id, Some(4242));
        assert_eq!(dispatched.amount, ton(8));
        let spend_id = dispatched.spend_id.unwrap();
        assert!(spend_id.starts_with("withdrawal_2_"));
        assert!(spend_id.ends_with(&receipt.transaction.transaction_id));
    }

    #[tokio::test]
    async fn failed_dispatch_is_compensated_in_full() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(1, ton(20)).await.unwrap();
        let transactions = Arc::new(TransactionLedger::new());
        let svc = service(
            Arc::clone(&ledger),
            Arc::new(ScriptedGateway::failing()),
            Arc::clone(&transactions),
        );

        let receipt = svc
            .withdraw(1, ton(10), WithdrawalDestination::Wallet { address: WALLET.into() })
            .await
            .unwrap();

        // net zero after compensation
        assert_eq!(receipt.balance_after, ton(20));
        assert_eq!(ledger.get(1).await.unwrap().unwrap().balance, ton(20));

        assert_eq!(receipt.transaction.status, TransactionStatus::Failed);
        let detail = receipt.transaction.error_detail.unwrap();
        assert!(detail.contains("timed out"), "unexpected detail: {detail}");
    }

    #[tokio::test]
    async fn invalid_wallet_is_rejected_before_any_state_change() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(1, ton(20)).await.unwrap();
        let transactions = Arc::new(TransactionLedger::new());
        let svc = service(
            Arc::clone(&ledger),
            Arc::new(ScriptedGateway::succeeding(1)),
            Arc::clone(&transactions),
        );

        let err = svc
            .withdraw(1, ton(10), WithdrawalDestination::Wallet { address: "bogus".into() })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DicepayError::Validation(ValidationError::InvalidDestination(_))
        ));
        assert_eq!(ledger.get(1).await.unwrap().unwrap().balance, ton(20));
        assert!(transactions.is_empty());
    }

    #[tokio::test]
    async fn amount_not_covering_the_fee_is_rejected() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(1, ton(20)).await.unwrap();
        let transactions = Arc::new(TransactionLedger::new());
        let svc = service(
            Arc::clone(&ledger),
            Arc::new(ScriptedGateway::succeeding(1)),
            Arc::clone(&transactions),
        );

        let err = svc
            .withdraw(
                1,
                Decimal::new(5, 2), // 0.05, below the 0.1 fee
                WithdrawalDestination::Wallet { address: WALLET.into() },
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DicepayError::Validation(ValidationError::AmountBelowFee { .. })
        ));
    }

    #[tokio::test]
    async fn concurrent_withdrawals_cannot_both_pass_the_check() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(1, ton(10)).await.unwrap();
        let transactions = Arc::new(TransactionLedger::new());
        let svc = Arc::new(WithdrawalService::new(
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::new(ScriptedGateway {
                responses: Mutex::new(vec![
                    Ok(Transfer { transfer_id: 1 }),
                    Ok(Transfer { transfer_id: 2 }),
                ]),
                requests: Mutex::new(Vec::new()),
            }),
            Arc::clone(&transactions),
            WithdrawalConfig::default(),
        ));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let svc = Arc::clone(&svc);
            handles.push(tokio::spawn(async move {
                svc.withdraw(1, ton(7), WithdrawalDestination::ProcessorUser { user_id: 1 })
                    .await
                    .is_ok()
            }));
        }

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(ledger.get(1).await.unwrap().unwrap().balance, ton(3));
        assert_eq!(transactions.len(), 1);
    }

    #[test]
    fn wallet_validation_rules() {
        assert!(validate_ton_wallet(WALLET));
        assert!(validate_ton_wallet(&("UQ".to_string() + &"a".repeat(46))));
        assert!(!validate_ton_wallet(""));
        assert!(!validate_ton_wallet("EQshort"));
        assert!(!validate_ton_wallet(&("XX".to_string() + &"a".repeat(46))));
    }
}
