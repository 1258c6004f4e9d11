//! Dice game modes and wager resolution.

pub mod resolver;
pub mod types;

pub use resolver::{resolve, DiceRoller, FixedRoller, OutcomeResolver, ThreadRngRoller, WagerResolver};
pub use types::{win_multiplier, BetChoice, DiceRoll, GameOutcome, GameType};
