//! Wager resolution against a single die roll.
//!
//! The roll is the only nondeterministic input; it comes from a
//! [`DiceRoller`] so tests can pin the draw and assert exact outcomes.

use crate::errors::{DicepayResult, ValidationError};
use crate::games::types::{BetChoice, DiceRoll, GameOutcome, GameType};
use rand::Rng;
use std::sync::Arc;

/// Source of die rolls
pub trait DiceRoller: Send + Sync {
    fn roll(&self) -> DiceRoll;
}

/// Production roller drawing uniformly from the thread RNG
#[derive(Debug, Default)]
pub struct ThreadRngRoller;

impl DiceRoller for ThreadRngRoller {
    fn roll(&self) -> DiceRoll {
        DiceRoll::ALL[rand::thread_rng().gen_range(0..DiceRoll::ALL.len())]
    }
}

/// Test roller returning a fixed face
#[derive(Debug)]
pub struct FixedRoller(pub DiceRoll);

impl DiceRoller for FixedRoller {
    fn roll(&self) -> DiceRoll {
        self.0
    }
}

/// Pure win/loss resolution for a fixed roll.
///
/// Every mode splits the six faces 3-vs-3:
/// even/odd by parity, higher/lower around the 3|4 boundary, bowling at
/// 4-or-more. Returns an error when the choice does not belong to the game.
pub fn resolve(
    game: GameType,
    choice: BetChoice,
    roll: DiceRoll,
) -> Result<GameOutcome, ValidationError> {
    if choice.game_type() != game {
        return Err(ValidationError::ChoiceMismatch { game, choice });
    }

    let user_won = match choice {
        BetChoice::Even => roll.is_even(),
        BetChoice::Odd => !roll.is_even(),
        BetChoice::Higher => roll.value() > 3,
        BetChoice::Lower => roll.value() <= 3,
        BetChoice::Win => roll.value() >= 4,
        BetChoice::Lose => roll.value() < 4,
    };

    Ok(if user_won {
        GameOutcome::won(roll)
    } else {
        GameOutcome::lost(roll)
    })
}

/// Settles wagers by drawing a roll and resolving it
pub trait WagerResolver: Send + Sync {
    fn settle(&self, game: GameType, choice: BetChoice) -> DicepayResult<GameOutcome>;
}

/// Default resolver combining a [`DiceRoller`] with [`resolve`]
pub struct OutcomeResolver {
    roller: Arc<dyn DiceRoller>,
}

impl OutcomeResolver {
    pub fn new(roller: Arc<dyn DiceRoller>) -> Self {
        Self { roller }
    }

    pub fn with_thread_rng() -> Self {
        Self::new(Arc::new(ThreadRngRoller))
    }
}

impl WagerResolver for OutcomeResolver {
    fn settle(&self, game: GameType, choice: BetChoice) -> DicepayResult<GameOutcome> {
        let roll = self.roller.roll();
        Ok(resolve(game, choice, roll)?)
    }
}
