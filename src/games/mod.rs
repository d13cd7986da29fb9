//! Games played against the off-chain ledger
//!
//! A game turns an outcome hash, a wager and the player's pick into a
//! [`BetOutcome`]. The ledger takes any [`GameFn`], so tests and callers can
//! pass a closure.

pub mod coinflip;
pub mod dice;
pub mod types;

pub use coinflip::CoinFlip;
pub use dice::Dice;
pub use types::{CoinChoice, GameType};

use crate::common::types::{BetOutcome, Credits};
use crate::errors::SettleResult;
use crate::fairness::OutcomeHash;

pub trait GameFn: Send + Sync {
    fn name(&self) -> &str {
        "custom"
    }

    /// Reject a malformed pick before any secret is revealed.
    fn validate(&self, _wanted_outcome: &str) -> SettleResult<()> {
        Ok(())
    }

    fn play(&self, outcome: &OutcomeHash, wager: Credits, wanted_outcome: &str) -> SettleResult<BetOutcome>;
}

impl<F> GameFn for F
where
    F: Fn(&OutcomeHash, Credits, &str) -> SettleResult<BetOutcome> + Send + Sync,
{
    fn play(&self, outcome: &OutcomeHash, wager: Credits, wanted_outcome: &str) -> SettleResult<BetOutcome> {
        self(outcome, wager, wanted_outcome)
    }
}

/// Built-in game for a game type
pub fn builtin(game: GameType) -> Box<dyn GameFn> {
    match game {
        GameType::CoinFlip => Box::new(CoinFlip),
        GameType::Dice => Box::new(Dice),
    }
}
