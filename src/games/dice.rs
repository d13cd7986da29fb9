use super::GameFn;
use crate::common::types::{BetOutcome, Credits};
use crate::errors::{SettleResult, UserError};
use crate::fairness::OutcomeHash;

pub const MIN_TARGET: u8 = 2;
pub const MAX_TARGET: u8 = 99;

/// Roll-under dice: a roll in `1..=100` strictly below the target wins
/// `wager * 99 / target`.
pub struct Dice;

impl Dice {
    pub fn roll(outcome: &OutcomeHash) -> u8 {
        let mut word = [0u8; 8];
        word.copy_from_slice(&outcome[..8]);
        (u64::from_be_bytes(word) % 100) as u8 + 1
    }

    fn target(wanted_outcome: &str) -> Result<u8, UserError> {
        let target: u8 = wanted_outcome.trim().parse().map_err(|_| {
            UserError::InvalidOutcome(format!("dice target must be a number, got {}", wanted_outcome))
        })?;
        if !(MIN_TARGET..=MAX_TARGET).contains(&target) {
            return Err(UserError::InvalidOutcome(format!(
                "dice target must be within {}..={}, got {}",
                MIN_TARGET, MAX_TARGET, target
            )));
        }
        Ok(target)
    }
}

impl GameFn for Dice {
    fn name(&self) -> &str {
        "dice"
    }

    fn validate(&self, wanted_outcome: &str) -> SettleResult<()> {
        Self::target(wanted_outcome)?;
        Ok(())
    }

    fn play(&self, outcome: &OutcomeHash, wager: Credits, wanted_outcome: &str) -> SettleResult<BetOutcome> {
        let target = Self::target(wanted_outcome)?;
        let roll = Self::roll(outcome);

        let amount_won = if roll < target {
            wager.saturating_mul(99) / Credits::from(target)
        } else {
            0
        };

        Ok(BetOutcome {
            wager,
            amount_won,
            outcome_value: roll.to_string(),
        })
    }
}
