use super::{CoinChoice, GameFn};
use crate::common::types::{BetOutcome, Credits};
use crate::errors::SettleResult;
use crate::fairness::OutcomeHash;

/// Even/odd coin flip paying 2x on a match
pub struct CoinFlip;

impl CoinFlip {
    /// Heads on an even first byte, tails on odd.
    pub fn flip(outcome: &OutcomeHash) -> CoinChoice {
        if outcome[0] % 2 == 0 {
            CoinChoice::Heads
        } else {
            CoinChoice::Tails
        }
    }
}

impl GameFn for CoinFlip {
    fn name(&self) -> &str {
        "coinflip"
    }

    fn validate(&self, wanted_outcome: &str) -> SettleResult<()> {
        wanted_outcome.parse::<CoinChoice>()?;
        Ok(())
    }

    fn play(&self, outcome: &OutcomeHash, wager: Credits, wanted_outcome: &str) -> SettleResult<BetOutcome> {
        let choice: CoinChoice = wanted_outcome.parse()?;
        let landed = Self::flip(outcome);

        Ok(BetOutcome {
            wager,
            amount_won: if landed == choice { wager.saturating_mul(2) } else { 0 },
            outcome_value: landed.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome_with_first_byte(byte: u8) -> OutcomeHash {
        let mut outcome = [0xFFu8; 32];
        outcome[0] = byte;
        outcome
    }

    #[test]
    fn test_parity_rule() {
        assert_eq!(CoinFlip::flip(&outcome_with_first_byte(4)), CoinChoice::Heads);
        assert_eq!(CoinFlip::flip(&outcome_with_first_byte(7)), CoinChoice::Tails);
    }

    #[test]
    fn test_win_pays_double() {
        let result = CoinFlip.play(&outcome_with_first_byte(2), 5, "heads").unwrap();
        assert_eq!(result.amount_won, 10);
        assert_eq!(result.outcome_value, "heads");
    }

    #[test]
    fn test_loss_pays_nothing() {
        let result = CoinFlip.play(&outcome_with_first_byte(2), 5, "tails").unwrap();
        assert_eq!(result.amount_won, 0);
    }

    #[test]
    fn test_invalid_pick() {
        assert!(CoinFlip.validate("sideways").is_err());
        assert!(CoinFlip.play(&[0u8; 32], 1, "sideways").is_err());
    }
}
