use crate::errors::UserError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Built-in games
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GameType {
    CoinFlip,
    Dice,
}

impl fmt::Display for GameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameType::CoinFlip => write!(f, "coinflip"),
            GameType::Dice => write!(f, "dice"),
        }
    }
}

impl FromStr for GameType {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "coinflip" | "coin_flip" => Ok(GameType::CoinFlip),
            "dice" => Ok(GameType::Dice),
            other => Err(UserError::InvalidOutcome(format!("unknown game {}", other))),
        }
    }
}

/// Coin flip choice
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoinChoice {
    Heads,
    Tails,
}

impl fmt::Display for CoinChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinChoice::Heads => write!(f, "heads"),
            CoinChoice::Tails => write!(f, "tails"),
        }
    }
}

impl FromStr for CoinChoice {
    type Err = UserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "heads" => Ok(CoinChoice::Heads),
            "tails" => Ok(CoinChoice::Tails),
            other => Err(UserError::InvalidOutcome(format!(
                "coin flip expects heads or tails, got {}",
                other
            ))),
        }
    }
}
