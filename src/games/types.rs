use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported dice game modes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    EvenOdd,
    HigherLower,
    Bowling,
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameType::EvenOdd => write!(f, "even_odd"),
            GameType::HigherLower => write!(f, "higher_lower"),
            GameType::Bowling => write!(f, "bowling"),
        }
    }
}

/// A player's pick within one of the game modes.
///
/// Each variant belongs to exactly one [`GameType`]; `game_type()` gives the
/// mode a choice is valid for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BetChoice {
    Even,
    Odd,
    Higher,
    Lower,
    Win,
    Lose,
}

impl BetChoice {
    /// The game mode this choice belongs to
    pub fn game_type(&self) -> GameType {
        match self {
            BetChoice::Even | BetChoice::Odd => GameType::EvenOdd,
            BetChoice::Higher | BetChoice::Lower => GameType::HigherLower,
            BetChoice::Win | BetChoice::Lose => GameType::Bowling,
        }
    }
}

impl fmt::Display for BetChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetChoice::Even => write!(f, "even"),
            BetChoice::Odd => write!(f, "odd"),
            BetChoice::Higher => write!(f, "higher"),
            BetChoice::Lower => write!(f, "lower"),
            BetChoice::Win => write!(f, "win"),
            BetChoice::Lose => write!(f, "lose"),
        }
    }
}

/// A single die face, guaranteed to be in 1..=6
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct DiceRoll(u8);

impl DiceRoll {
    /// All six faces, in order. Handy for exhaustive tests and for drawing
    /// a face by index without re-validating the range.
    pub const ALL: [DiceRoll; 6] = [
        DiceRoll(1),
        DiceRoll(2),
        DiceRoll(3),
        DiceRoll(4),
        DiceRoll(5),
        DiceRoll(6),
    ];

    pub fn new(value: u8) -> Option<Self> {
        if (1..=6).contains(&value) {
            Some(DiceRoll(value))
        } else {
            None
        }
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    pub fn is_even(&self) -> bool {
        self.0 % 2 == 0
    }
}

impl TryFrom<u8> for DiceRoll {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        DiceRoll::new(value).ok_or_else(|| format!("die value out of range: {}", value))
    }
}

impl From<DiceRoll> for u8 {
    fn from(roll: DiceRoll) -> u8 {
        roll.0
    }
}

impl fmt::Display for DiceRoll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payout multiplier applied to the stake on a winning wager
pub fn win_multiplier() -> Decimal {
    Decimal::new(15, 1) // 1.5
}

/// Result of settling a single wager against one die roll
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GameOutcome {
    pub dice_value: DiceRoll,
    pub user_won: bool,
    /// 1.5 on a win, 0 on a loss (full forfeiture of the stake)
    pub payout_multiplier: Decimal,
}

impl GameOutcome {
    pub fn won(dice_value: DiceRoll) -> Self {
        Self {
            dice_value,
            user_won: true,
            payout_multiplier: win_multiplier(),
        }
    }

    pub fn lost(dice_value: DiceRoll) -> Self {
        Self {
            dice_value,
            user_won: false,
            payout_multiplier: Decimal::ZERO,
        }
    }

    /// Amount paid back to the player for a given stake. The stake itself is
    /// part of the payout: a win pays 1.5x the stake, a loss pays nothing.
    pub fn payout(&self, stake: Decimal) -> Decimal {
        stake * self.payout_multiplier
    }

    /// Balance adjustment to apply after the deposit credit. The confirmed
    /// deposit already put the stake on the balance, so the adjustment is
    /// payout minus stake: -stake on a loss (net zero overall), +0.5x stake
    /// on a win (net +1.5x overall).
    pub fn balance_adjustment(&self, stake: Decimal) -> Decimal {
        self.payout(stake) - stake
    }
}
