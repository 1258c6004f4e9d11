//! Extraction of wager intent from payment metadata.
//!
//! A confirmed payment carries two uncontrolled strings: the free-text
//! comment the payer typed (which embeds the game mode and pick) and the
//! hidden-metadata string the invoice was created with (which embeds the
//! user id and an optional correlation token). Matching is deliberately
//! lenient keyword containment; the rules live in one table so they can be
//! audited and tested in isolation. Parsing never fails outright: the
//! result always says exactly which fields could not be determined.

use crate::games::types::{BetChoice, GameType};
use serde::Serialize;
use std::fmt;

/// Metadata key carrying the payer's user id
const USER_ID_KEY: &str = "user_id";
/// Metadata key carrying the optional correlation token
const CORRELATION_KEY: &str = "txid";

/// One game mode: the phrase that selects it and the two choice markers it
/// recognizes.
struct ModeRule {
    phrase: &'static str,
    game: GameType,
    choices: [(&'static str, BetChoice); 2],
}

/// Recognition table for payment comments. Phrases are matched against the
/// lower-cased, trimmed comment; the first matching mode wins and only its
/// own markers are considered for the choice.
const MODE_RULES: [ModeRule; 3] = [
    ModeRule {
        phrase: "чет и нечет",
        game: GameType::EvenOdd,
        choices: [("[чет]", BetChoice::Even), ("[нечет]", BetChoice::Odd)],
    },
    ModeRule {
        phrase: "больше и меньше",
        game: GameType::HigherLower,
        choices: [("[больше]", BetChoice::Higher), ("[меньше]", BetChoice::Lower)],
    },
    ModeRule {
        phrase: "боул",
        game: GameType::Bowling,
        choices: [("[победа]", BetChoice::Win), ("[поражение]", BetChoice::Lose)],
    },
];

/// Field that could not be determined from a payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingField {
    UserId,
    GameType,
    BetChoice,
}

impl fmt::Display for MissingField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissingField::UserId => write!(f, "user_id"),
            MissingField::GameType => write!(f, "game_type"),
            MissingField::BetChoice => write!(f, "bet_choice"),
        }
    }
}

/// Outcome of looking for the user id in hidden metadata. A token that is
/// present but does not parse is reported distinctly from an absent token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIdField {
    Present(u64),
    Malformed(String),
    Absent,
}

/// Fully resolved wager intent
#[derive(Debug, Clone, PartialEq)]
pub struct WagerIntent {
    pub user_id: u64,
    pub game_type: GameType,
    pub bet_choice: BetChoice,
    pub correlation_id: Option<String>,
}

/// Partial parse result; always returned, never an error
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedIntent {
    pub user_id: UserIdField,
    pub correlation_id: Option<String>,
    pub game_type: Option<GameType>,
    pub bet_choice: Option<BetChoice>,
}

impl ParsedIntent {
    /// Fields the caller must report as undetermined
    pub fn missing_fields(&self) -> Vec<MissingField> {
        let mut missing = Vec::new();
        if !matches!(self.user_id, UserIdField::Present(_)) {
            missing.push(MissingField::UserId);
        }
        if self.game_type.is_none() {
            missing.push(MissingField::GameType);
        }
        if self.bet_choice.is_none() {
            missing.push(MissingField::BetChoice);
        }
        missing
    }

    /// The complete intent, if nothing is missing
    pub fn complete(&self) -> Option<WagerIntent> {
        match (&self.user_id, self.game_type, self.bet_choice) {
            (UserIdField::Present(user_id), Some(game_type), Some(bet_choice)) => {
                Some(WagerIntent {
                    user_id: *user_id,
                    game_type,
                    bet_choice,
                    correlation_id: self.correlation_id.clone(),
                })
            }
            _ => None,
        }
    }
}

/// Parse both payment strings into a (possibly partial) intent
pub fn parse_intent(comment: &str, hidden_metadata: &str) -> ParsedIntent {
    let (user_id, correlation_id) = parse_hidden_metadata(hidden_metadata);
    let (game_type, bet_choice) = parse_comment(comment);
    ParsedIntent {
        user_id,
        correlation_id,
        game_type,
        bet_choice,
    }
}

/// Hidden metadata is a comma-separated list of `key:value` tokens.
pub fn parse_hidden_metadata(raw: &str) -> (UserIdField, Option<String>) {
    let mut user_id = UserIdField::Absent;
    let mut correlation_id = None;

    for token in raw.split(',') {
        let Some((key, value)) = token.split_once(':') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            USER_ID_KEY => {
                user_id = match value.parse::<u64>() {
                    Ok(id) => UserIdField::Present(id),
                    Err(_) => UserIdField::Malformed(value.to_string()),
                };
            }
            CORRELATION_KEY => {
                if !value.is_empty() {
                    correlation_id = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    (user_id, correlation_id)
}

/// Match the comment against the mode table. A matching mode without a
/// recognizable choice marker yields the mode with no choice.
pub fn parse_comment(comment: &str) -> (Option<GameType>, Option<BetChoice>) {
    let comment = comment.to_lowercase();
    let comment = comment.trim();

    for rule in &MODE_RULES {
        if !comment.contains(rule.phrase) {
            continue;
        }
        let choice = rule
            .choices
            .iter()
            .find(|entry| comment.contains(entry.0))
            .map(|entry| entry.1);
        return (Some(rule.game), choice);
    }

    (None, None)
}
