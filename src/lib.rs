//! Dicepay - payment-to-balance reconciliation for a dice-wager bot.
//!
//! Players pay through a custodial crypto processor; the pipeline turns
//! confirmed payment notifications into ledger credits, settles the wager
//! embedded in the payment comment, and keeps the internal balance in
//! lockstep with what the processor actually confirmed. Withdrawals are
//! debited up front and compensated on failure. Chat transport is a
//! collaborator on the other side of the webhook and audit-event
//! boundaries; nothing in here formats a message.

pub mod config;
pub mod errors;
pub mod games;
pub mod gateway;
pub mod intent;
pub mod ledger;
pub mod reconcile;
pub mod server;
pub mod transactions;
pub mod withdraw;

pub use errors::{DicepayError, DicepayResult};
