//! Reconciliation of confirmed payments into balance mutations.
//!
//! The engine is the only component that turns a `PaymentEvent` into money
//! movement. Invariants, in order:
//!
//! 1. Only `invoice_paid` updates do anything; everything else is an
//!    acknowledged no-op.
//! 2. A payment with incomplete intent mutates nothing and reports exactly
//!    which fields were missing.
//! 3. A confirmed payment with full intent always credits the gross amount;
//!    the money was genuinely received.
//! 4. The wager outcome then adjusts the balance by payout minus stake:
//!    a loss nets the whole event to zero, a win nets it to +1.5x the
//!    stake.
//! 5. If outcome resolution fails the deposit credit stands; the failure is
//!    surfaced, not rolled back.
//!
//! The engine emits a structured audit event for every full-intent payment
//! and returns a structured outcome; rendering user-facing text is the
//! transport layer's concern.

use crate::errors::DicepayResult;
use crate::games::resolver::WagerResolver;
use crate::games::types::{BetChoice, GameOutcome, GameType};
use crate::gateway::{PaymentEvent, UPDATE_INVOICE_PAID};
use crate::intent::{parse_intent, MissingField};
use crate::ledger::{LedgerStore, UserId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A fully settled wager, ready for the transport layer to render
#[derive(Debug, Clone, Serialize)]
pub struct WagerSettlement {
    pub user_id: UserId,
    pub game_type: GameType,
    pub bet_choice: BetChoice,
    pub bet_amount: Decimal,
    pub asset: String,
    pub invoice_id: i64,
    pub correlation_id: Option<String>,
    pub outcome: GameOutcome,
    pub payout: Decimal,
    pub balance_after: Decimal,
    pub settled_at: DateTime<Utc>,
}

/// Record published to the results channel for every reconciled payment
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditEvent {
    WagerSettled(WagerSettlement),
    OutcomeUnresolved {
        user_id: UserId,
        amount: Decimal,
        asset: String,
        invoice_id: i64,
        detail: String,
    },
}

/// Result of handling one payment event
#[derive(Debug, Clone)]
pub enum ReconciliationOutcome {
    /// Update type was not a payment confirmation; nothing happened
    Ignored { update_type: String },
    /// Intent could not be fully determined; nothing was credited
    Rejected { missing: Vec<MissingField> },
    /// Deposit credited and wager settled
    Settled(WagerSettlement),
    /// Deposit credited but the outcome could not be applied
    CreditedOnly {
        user_id: UserId,
        amount: Decimal,
        detail: String,
    },
}

/// Destination for audit records. Implementations must not block money
/// movement: publish failures are logged by the engine and never retried.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn publish(&self, event: &AuditEvent) -> Result<(), String>;
}

/// Sink that just logs the record
#[derive(Debug, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn publish(&self, event: &AuditEvent) -> Result<(), String> {
        let json = serde_json::to_string(event).map_err(|e| e.to_string())?;
        info!("audit: {}", json);
        Ok(())
    }
}

/// Fan-out sink the transport layer subscribes to. Keeps money movement
/// decoupled from message rendering.
#[derive(Debug)]
pub struct BroadcastAuditSink {
    sender: broadcast::Sender<AuditEvent>,
}

impl BroadcastAuditSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuditEvent> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl AuditSink for BroadcastAuditSink {
    async fn publish(&self, event: &AuditEvent) -> Result<(), String> {
        self.sender
            .send(event.clone())
            .map(|_| ())
            .map_err(|_| "no audit subscribers".to_string())
    }
}

pub struct ReconciliationEngine {
    ledger: Arc<dyn LedgerStore>,
    resolver: Arc<dyn WagerResolver>,
    audit: Arc<dyn AuditSink>,
}

impl ReconciliationEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        resolver: Arc<dyn WagerResolver>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            ledger,
            resolver,
            audit,
        }
    }

    pub async fn handle_payment_event(
        &self,
        event: &PaymentEvent,
    ) -> DicepayResult<ReconciliationOutcome> {
        if event.update_type != UPDATE_INVOICE_PAID {
            info!("ignoring update of type '{}'", event.update_type);
            return Ok(ReconciliationOutcome::Ignored {
                update_type: event.update_type.clone(),
            });
        }

        let Some(payload) = event.payload.as_ref() else {
            warn!("invoice_paid update without payload");
            return Ok(ReconciliationOutcome::Rejected {
                missing: vec![
                    MissingField::UserId,
                    MissingField::GameType,
                    MissingField::BetChoice,
                ],
            });
        };

        let parsed = parse_intent(&payload.comment, &payload.hidden_message);
        let Some(intent) = parsed.complete() else {
            let missing = parsed.missing_fields();
            warn!(
                "invalid payment data for invoice {}, missing: {:?}",
                payload.invoice_id, missing
            );
            return Ok(ReconciliationOutcome::Rejected { missing });
        };

        // Money received is always credited, before the outcome is known.
        let amount = payload.amount;
        let credited_balance = self.ledger.credit(intent.user_id, amount).await?;
        info!(
            "confirmed payment of {} {} for user {} (invoice {})",
            amount, payload.asset, intent.user_id, payload.invoice_id
        );

        let outcome = match self.resolver.settle(intent.game_type, intent.bet_choice) {
            Ok(outcome) => outcome,
            Err(err) => {
                return self
                    .credited_only(intent.user_id, amount, payload, err.to_string())
                    .await;
            }
        };

        let balance_after = match self
            .apply_adjustment(intent.user_id, outcome.balance_adjustment(amount))
            .await
        {
            Ok(Some(balance)) => balance,
            Ok(None) => credited_balance,
            Err(err) => {
                return self
                    .credited_only(intent.user_id, amount, payload, err.to_string())
                    .await;
            }
        };

        self.ledger.record_game(intent.user_id, intent.game_type).await?;

        let settlement = WagerSettlement {
            user_id: intent.user_id,
            game_type: intent.game_type,
            bet_choice: intent.bet_choice,
            bet_amount: amount,
            asset: payload.asset.clone(),
            invoice_id: payload.invoice_id,
            correlation_id: intent.correlation_id,
            outcome,
            payout: outcome.payout(amount),
            balance_after,
            settled_at: Utc::now(),
        };

        self.emit(AuditEvent::WagerSettled(settlement.clone())).await;
        Ok(ReconciliationOutcome::Settled(settlement))
    }

    /// Apply the signed post-outcome adjustment. Returns the new balance,
    /// or None when the adjustment is zero.
    async fn apply_adjustment(
        &self,
        user_id: UserId,
        adjustment: Decimal,
    ) -> DicepayResult<Option<Decimal>> {
        if adjustment > Decimal::ZERO {
            Ok(Some(self.ledger.credit(user_id, adjustment).await?))
        } else if adjustment < Decimal::ZERO {
            Ok(Some(self.ledger.try_debit(user_id, -adjustment).await?))
        } else {
            Ok(None)
        }
    }

    /// The deposit stands, the outcome could not be applied. Happens on a
    /// choice/game mismatch or when a concurrent withdrawal drained the
    /// stake between the credit and the loss debit.
    async fn credited_only(
        &self,
        user_id: UserId,
        amount: Decimal,
        payload: &crate::gateway::InvoicePayload,
        detail: String,
    ) -> DicepayResult<ReconciliationOutcome> {
        error!(
            "outcome resolution failed for user {} (invoice {}): {}",
            user_id, payload.invoice_id, detail
        );
        self.emit(AuditEvent::OutcomeUnresolved {
            user_id,
            amount,
            asset: payload.asset.clone(),
            invoice_id: payload.invoice_id,
            detail: detail.clone(),
        })
        .await;
        Ok(ReconciliationOutcome::CreditedOnly {
            user_id,
            amount,
            detail,
        })
    }

    async fn emit(&self, event: AuditEvent) {
        if let Err(err) = self.audit.publish(&event).await {
            warn!("audit emission failed: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ValidationError;
    use crate::games::resolver::{FixedRoller, OutcomeResolver};
    use crate::games::types::DiceRoll;
    use crate::gateway::InvoicePayload;
    use crate::ledger::InMemoryLedger;

    fn ton(value: i64) -> Decimal {
        Decimal::new(value, 0)
    }

    fn paid_event(comment: &str, hidden: &str, amount: Decimal) -> PaymentEvent {
        PaymentEvent {
            update_type: UPDATE_INVOICE_PAID.to_string(),
            payload: Some(InvoicePayload {
                hidden_message: hidden.to_string(),
                comment: comment.to_string(),
                amount,
                asset: "TON".to_string(),
                invoice_id: 101,
            }),
        }
    }

    fn engine_with_roll(ledger: Arc<InMemoryLedger>, face: u8) -> ReconciliationEngine {
        let resolver = OutcomeResolver::new(Arc::new(FixedRoller(DiceRoll::new(face).unwrap())));
        ReconciliationEngine::new(ledger, Arc::new(resolver), Arc::new(LogAuditSink))
    }

    struct FailingResolver;

    impl WagerResolver for FailingResolver {
        fn settle(&self, game: GameType, choice: BetChoice) -> DicepayResult<GameOutcome> {
            Err(ValidationError::ChoiceMismatch { game, choice }.into())
        }
    }

    #[tokio::test]
    async fn non_payment_updates_are_ignored_without_mutation() {
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = engine_with_roll(Arc::clone(&ledger), 2);

        let event = PaymentEvent {
            update_type: "invoice_expired".to_string(),
            payload: None,
        };
        let outcome = engine.handle_payment_event(&event).await.unwrap();

        assert!(matches!(outcome, ReconciliationOutcome::Ignored { .. }));
        assert!(ledger.is_empty());
    }

    #[tokio::test]
    async fn malformed_payment_credits_nothing() {
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = engine_with_roll(Arc::clone(&ledger), 2);

        let event = paid_event("no recognizable game here", "user_id:77", ton(10));
        let outcome = engine.handle_payment_event(&event).await.unwrap();

        match outcome {
            ReconciliationOutcome::Rejected { missing } => {
                assert_eq!(
                    missing,
                    vec![MissingField::GameType, MissingField::BetChoice]
                );
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(ledger.get(77).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn losing_wager_nets_to_zero() {
        let ledger = Arc::new(InMemoryLedger::new());
        // face 3 loses an "even" bet
        let engine = engine_with_roll(Arc::clone(&ledger), 3);

        let event = paid_event("чет и нечет [чет]", "user_id:7", ton(10));
        let outcome = engine.handle_payment_event(&event).await.unwrap();

        match outcome {
            ReconciliationOutcome::Settled(settlement) => {
                assert!(!settlement.outcome.user_won);
                assert_eq!(settlement.payout, Decimal::ZERO);
                assert_eq!(settlement.balance_after, Decimal::ZERO);
            }
            other => panic!("expected settlement, got {other:?}"),
        }

        // deposit 10, lose -> balance delta 0
        let account = ledger.get(7).await.unwrap().unwrap();
        assert_eq!(account.balance, Decimal::ZERO);
        assert_eq!(account.games_played, 1);
        assert_eq!(account.even_odd_games, 1);
    }

    #[tokio::test]
    async fn winning_wager_nets_to_one_point_five_times_stake() {
        let ledger = Arc::new(InMemoryLedger::new());
        // face 4 wins an "even" bet
        let engine = engine_with_roll(Arc::clone(&ledger), 4);

        let event = paid_event("чет и нечет [чет]", "user_id:7", ton(10));
        let outcome = engine.handle_payment_event(&event).await.unwrap();

        match outcome {
            ReconciliationOutcome::Settled(settlement) => {
                assert!(settlement.outcome.user_won);
                assert_eq!(settlement.payout, ton(15));
                assert_eq!(settlement.balance_after, ton(15));
            }
            other => panic!("expected settlement, got {other:?}"),
        }

        // deposit 10, win -> balance delta +15
        assert_eq!(ledger.get(7).await.unwrap().unwrap().balance, ton(15));
    }

    #[tokio::test]
    async fn settlement_identity_holds_from_nonzero_prior_balance() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.credit(7, ton(100)).await.unwrap();

        let engine = engine_with_roll(Arc::clone(&ledger), 6);
        let event = paid_event("больше и меньше [больше]", "user_id:7", ton(4));
        engine.handle_payment_event(&event).await.unwrap();
        assert_eq!(ledger.get(7).await.unwrap().unwrap().balance, ton(106));

        let engine = engine_with_roll(Arc::clone(&ledger), 1);
        let event = paid_event("больше и меньше [больше]", "user_id:7", ton(4));
        engine.handle_payment_event(&event).await.unwrap();
        assert_eq!(ledger.get(7).await.unwrap().unwrap().balance, ton(106));
    }

    #[tokio::test]
    async fn resolver_failure_leaves_the_deposit_credited() {
        let ledger = Arc::new(InMemoryLedger::new());
        let engine = ReconciliationEngine::new(
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::new(FailingResolver),
            Arc::new(LogAuditSink),
        );

        let event = paid_event("боулинг [победа]", "user_id:9", ton(10));
        let outcome = engine.handle_payment_event(&event).await.unwrap();

        match outcome {
            ReconciliationOutcome::CreditedOnly { user_id, amount, .. } => {
                assert_eq!(user_id, 9);
                assert_eq!(amount, ton(10));
            }
            other => panic!("expected credited-only, got {other:?}"),
        }

        let account = ledger.get(9).await.unwrap().unwrap();
        assert_eq!(account.balance, ton(10));
        assert_eq!(account.games_played, 0);
    }

    #[tokio::test]
    async fn settlement_is_published_to_subscribers() {
        let ledger = Arc::new(InMemoryLedger::new());
        let sink = Arc::new(BroadcastAuditSink::new(8));
        let mut events = sink.subscribe();

        let resolver = OutcomeResolver::new(Arc::new(FixedRoller(DiceRoll::new(5).unwrap())));
        let engine = ReconciliationEngine::new(
            Arc::clone(&ledger) as Arc<dyn LedgerStore>,
            Arc::new(resolver),
            sink,
        );

        let event = paid_event("боулинг [победа]", "user_id:3,txid:t-9", ton(2));
        engine.handle_payment_event(&event).await.unwrap();

        match events.try_recv().unwrap() {
            AuditEvent::WagerSettled(settlement) => {
                assert_eq!(settlement.user_id, 3);
                assert_eq!(settlement.correlation_id.as_deref(), Some("t-9"));
                assert_eq!(settlement.outcome.dice_value.value(), 5);
                assert!(settlement.outcome.user_won);
            }
            other => panic!("unexpected audit event: {other:?}"),
        }
    }
}
