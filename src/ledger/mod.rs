//! Off-chain credit ledger
//!
//! Each account has two independent pools: `withdrawable` (bought credits and
//! winnings) and `sluggish` (airdropped credits, spent first, never paid out
//! directly). Every read-modify-write of one account runs under that
//! account's lock.
//!
//! Withdrawals debit and persist before the payout is broadcast. A confirmed
//! revert credits the amount back; any other failure keeps the debit as a
//! pending payout until the on-chain paid-out total shows it.

pub mod locks;

pub use locks::AccountLocks;

use crate::chain::ContractClient;
use crate::common::traits::BalanceRepository;
use crate::common::types::{
    current_timestamp_ms, AccountBalance, AccountKey, BetOutcome, Credits, OnChainTotals,
};
use crate::errors::{ConsistencyError, InfraError, SettleError, SettleResult, UserError};
use crate::fairness::{FairnessProof, RandomnessResolver};
use crate::game_store::BetRecord;
use crate::games::GameFn;
use crate::metrics::SettlerMetrics;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Spendable pools of one account
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceView {
    pub withdrawable: Credits,
    pub sluggish: Credits,
}

impl From<&AccountBalance> for BalanceView {
    fn from(balance: &AccountBalance) -> Self {
        Self {
            withdrawable: balance.withdrawable,
            sluggish: balance.sluggish,
        }
    }
}

/// Result of a withdrawal
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversion {
    pub balance: BalanceView,
    /// Signed change of `withdrawable + sluggish`
    pub net_evolution: i128,
    pub tx_hash: String,
}

/// Client-supplied fairness inputs for one bet
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FairnessPayload {
    pub client_seed: Option<String>,
    pub hashed_secret: Option<String>,
}

/// Result of one bet
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct BetSettlement {
    pub outcome: BetOutcome,
    pub balance: BalanceView,
    pub fairness: FairnessProof,
}

pub struct AccountLedger {
    client: Arc<dyn ContractClient>,
    repo: Arc<dyn BalanceRepository>,
    resolver: RandomnessResolver,
    locks: AccountLocks,
    chain_id: u64,
    min_wager: Credits,
    min_plays_before_withdraw: u64,
    metrics: Arc<SettlerMetrics>,
}

impl AccountLedger {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: Arc<dyn ContractClient>,
        repo: Arc<dyn BalanceRepository>,
        resolver: RandomnessResolver,
        chain_id: u64,
        min_wager: Credits,
        min_plays_before_withdraw: u64,
        metrics: Arc<SettlerMetrics>,
    ) -> Self {
        Self {
            client,
            repo,
            resolver,
            locks: AccountLocks::new(),
            chain_id,
            min_wager,
            min_plays_before_withdraw,
            metrics,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    fn record(&self, operation: &str, result: &SettleResult<impl Sized>) {
        let outcome = match result {
            Ok(_) => "ok",
            Err(SettleError::User(_)) => "rejected",
            Err(_) => "error",
        };
        self.metrics
            .ledger_operations
            .with_label_values(&[operation, outcome])
            .inc();
        if let Err(e) = result {
            e.log(operation);
        }
    }

    async fn load(&self, key: &AccountKey) -> SettleResult<AccountBalance> {
        Ok(self
            .repo
            .load_balance(key)
            .await?
            .unwrap_or_else(|| AccountBalance::empty(key)))
    }

    /// Fold on-chain totals into the row. Caller holds the lock.
    async fn reconcile(&self, balance: &mut AccountBalance) -> SettleResult<bool> {
        let totals = self.client.account_totals(&balance.address).await?;
        let payouts_changed = settle_pending_payouts(balance, &totals);
        let purchases_changed = credit_purchases(balance, &totals)?;
        Ok(payouts_changed || purchases_changed)
    }

    /// Reconcile against the chain and return the current pools.
    pub async fn interrogate_balance(&self, address: &str) -> SettleResult<BalanceView> {
        let result = self.try_interrogate(&AccountKey::new(self.chain_id, address)).await;
        self.record("interrogate", &result);
        result
    }

    async fn try_interrogate(&self, key: &AccountKey) -> SettleResult<BalanceView> {
        let _guard = self.locks.lock(key).await;
        let mut balance = self.load(key).await?;
        if self.reconcile(&mut balance).await? {
            self.repo.save_balance(&balance).await?;
        }
        Ok(BalanceView::from(&balance))
    }

    /// Smallest play count that unlocks withdrawal for this balance.
    pub fn required_plays(&self, balance: &AccountBalance) -> u64 {
        let affordable = balance.spendable() / self.min_wager.max(1);
        let affordable = u64::try_from(affordable).unwrap_or(u64::MAX);
        self.min_plays_before_withdraw.min(affordable)
    }

    /// Pay out withdrawable credits; `amount == 0` withdraws everything.
    pub async fn withdraw(&self, address: &str, amount: Credits) -> SettleResult<Conversion> {
        let result = self.try_withdraw(&AccountKey::new(self.chain_id, address), amount).await;
        self.record("withdraw", &result);
        result
    }

    async fn try_withdraw(&self, key: &AccountKey, amount: Credits) -> SettleResult<Conversion> {
        let _guard = self.locks.lock(key).await;
        let mut balance = self.load(key).await?;
        if self.reconcile(&mut balance).await? {
            self.repo.save_balance(&balance).await?;
        }

        if balance.withdrawable == 0 {
            return Err(UserError::NothingToWithdraw.into());
        }
        let amount = if amount == 0 { balance.withdrawable } else { amount };
        if amount > balance.withdrawable {
            return Err(UserError::InsufficientBalance {
                requested: amount,
                available: balance.withdrawable,
            }
            .into());
        }

        let required = self.required_plays(&balance);
        if balance.plays_since_withdraw < required {
            return Err(UserError::WithdrawThresholdUnmet {
                required,
                current: balance.plays_since_withdraw,
            }
            .into());
        }

        if !self.client.can_pay(amount).await? {
            return Err(UserError::PayoutUnavailable { amount }.into());
        }

        let before = balance.clone();
        balance.withdrawable -= amount;
        balance.plays_since_withdraw = 0;
        balance.pending_payout = balance
            .pending_payout
            .checked_add(amount)
            .ok_or_else(|| overflow(&balance, "pending_payout"))?;
        self.repo.save_balance(&balance).await?;

        let receipt = match self.client.submit_payout(&balance.address, amount).await {
            Ok(receipt) if receipt.success => receipt,
            Ok(receipt) => return Err(self.credit_back(&before, receipt.tx_hash).await),
            Err(SettleError::Infra(InfraError::TransactionReverted { tx_hash })) => {
                return Err(self.credit_back(&before, tx_hash).await)
            }
            Err(e) => {
                error!(
                    account = %key,
                    amount = %amount,
                    error = %e,
                    "payout outcome unknown, debit kept as pending"
                );
                return Err(unconfirmed(e));
            }
        };

        balance.pending_payout -= amount;
        balance.withdrawn_total = balance.withdrawn_total.saturating_add(amount);
        if let Err(e) = self.repo.save_balance(&balance).await {
            // The debit is already stored; the next reconcile clears the marker.
            warn!(account = %key, error = %e, "paid payout left pending");
        }

        info!(account = %key, amount = %amount, tx_hash = %receipt.tx_hash, "withdrawal paid");
        Ok(Conversion {
            balance: BalanceView::from(&balance),
            net_evolution: -(amount as i128),
            tx_hash: receipt.tx_hash,
        })
    }

    /// Restore the row as it was before a payout the chain reverted.
    async fn credit_back(&self, before: &AccountBalance, tx_hash: String) -> SettleError {
        if let Err(e) = self.repo.save_balance(before).await {
            error!(account = %before.key(), tx_hash = %tx_hash, error = %e, "reverted payout not credited back");
            return e;
        }
        warn!(account = %before.key(), tx_hash = %tx_hash, "payout reverted, debit credited back");
        InfraError::TransactionReverted { tx_hash }.into()
    }

    /// Play one round of `game`, settling the balance and audit row atomically.
    pub async fn play_with_chips(
        &self,
        address: &str,
        game: &dyn GameFn,
        wager: Credits,
        wanted_outcome: &str,
        fairness: &FairnessPayload,
    ) -> SettleResult<BetSettlement> {
        let key = AccountKey::new(self.chain_id, address);
        let result = self
            .try_play(&key, game, wager, wanted_outcome, fairness)
            .await;
        self.record("bet", &result);
        result
    }

    async fn try_play(
        &self,
        key: &AccountKey,
        game: &dyn GameFn,
        wager: Credits,
        wanted_outcome: &str,
        fairness: &FairnessPayload,
    ) -> SettleResult<BetSettlement> {
        if wager == 0 || wager < self.min_wager {
            return Err(UserError::WagerBelowMinimum {
                wager,
                minimum: self.min_wager,
            }
            .into());
        }
        game.validate(wanted_outcome)?;

        let _guard = self.locks.lock(key).await;
        let mut balance = self.load(key).await?;
        if wager > balance.spendable() {
            return Err(UserError::InsufficientBalance {
                requested: wager,
                available: balance.spendable(),
            }
            .into());
        }

        let nonce = balance.total_plays;
        let proof = self.resolver.resolve_commitment(
            fairness.client_seed.as_deref(),
            nonce,
            fairness.hashed_secret.as_deref(),
            "ledger",
        )?;
        let outcome = game.play(&proof.outcome_bytes()?, wager, wanted_outcome)?;

        let from_sluggish = wager.min(balance.sluggish);
        balance.sluggish -= from_sluggish;
        balance.withdrawable = balance
            .withdrawable
            .checked_sub(wager - from_sluggish)
            .ok_or_else(|| ConsistencyError::BalanceInvariant {
                account: key.to_string(),
                reason: "wager exceeded both pools".to_string(),
            })?;
        balance.withdrawable = balance
            .withdrawable
            .checked_add(outcome.amount_won)
            .ok_or_else(|| overflow(&balance, "withdrawable"))?;
        balance.plays_since_withdraw += 1;
        balance.total_plays += 1;

        let bet = BetRecord {
            account: key.clone(),
            sequence: nonce,
            game: game.name().to_string(),
            wager,
            wanted_outcome: wanted_outcome.to_string(),
            outcome_value: outcome.outcome_value.clone(),
            amount_won: outcome.amount_won,
            fairness: proof.clone(),
            timestamp_ms: current_timestamp_ms(),
        };
        self.repo.commit_bet(&balance, &bet).await?;

        debug!(
            account = %key,
            game = game.name(),
            wager = %wager,
            won = %outcome.amount_won,
            nonce,
            "bet settled"
        );
        Ok(BetSettlement {
            outcome,
            balance: BalanceView::from(&balance),
            fairness: proof,
        })
    }

    /// Stored pools without touching the chain.
    pub async fn balance(&self, address: &str) -> SettleResult<AccountBalance> {
        self.load(&AccountKey::new(self.chain_id, address)).await
    }

    pub async fn recent_bets(&self, address: &str, limit: usize) -> SettleResult<Vec<BetRecord>> {
        self.repo
            .recent_bets(&AccountKey::new(self.chain_id, address), limit)
            .await
    }
}

/// Credit positive purchase deltas; a regression resyncs without credit.
fn credit_purchases(balance: &mut AccountBalance, totals: &OnChainTotals) -> SettleResult<bool> {
    if totals.bought < balance.bought_total || totals.airdropped < balance.airdropped_total {
        warn!(
            account = %balance.key(),
            recorded_bought = %balance.bought_total,
            chain_bought = %totals.bought,
            recorded_airdropped = %balance.airdropped_total,
            chain_airdropped = %totals.airdropped,
            "on-chain totals regressed, resyncing without credit"
        );
        balance.bought_total = totals.bought;
        balance.airdropped_total = totals.airdropped;
        return Ok(true);
    }

    let bought_delta = totals.bought - balance.bought_total;
    let airdropped_delta = totals.airdropped - balance.airdropped_total;
    if bought_delta == 0 && airdropped_delta == 0 {
        return Ok(false);
    }

    balance.withdrawable = balance
        .withdrawable
        .checked_add(bought_delta)
        .ok_or_else(|| overflow(balance, "withdrawable"))?;
    balance.sluggish = balance
        .sluggish
        .checked_add(airdropped_delta)
        .ok_or_else(|| overflow(balance, "sluggish"))?;
    balance.bought_total = totals.bought;
    balance.airdropped_total = totals.airdropped;

    info!(
        account = %balance.key(),
        bought_delta = %bought_delta,
        airdropped_delta = %airdropped_delta,
        "credited on-chain purchases"
    );
    Ok(true)
}

/// Clear pending payouts the chain now shows as paid.
fn settle_pending_payouts(balance: &mut AccountBalance, totals: &OnChainTotals) -> bool {
    if totals.withdrawn == balance.withdrawn_total {
        return false;
    }
    if totals.withdrawn < balance.withdrawn_total {
        warn!(
            account = %balance.key(),
            recorded_withdrawn = %balance.withdrawn_total,
            chain_withdrawn = %totals.withdrawn,
            "on-chain paid-out total regressed, resyncing"
        );
    } else {
        let landed = totals.withdrawn - balance.withdrawn_total;
        let cleared = landed.min(balance.pending_payout);
        balance.pending_payout -= cleared;
        if cleared > 0 {
            info!(account = %balance.key(), cleared = %cleared, "pending payout confirmed on chain");
        }
    }
    balance.withdrawn_total = totals.withdrawn;
    true
}

fn unconfirmed(e: SettleError) -> SettleError {
    match e {
        SettleError::Infra(InfraError::Unconfirmed { .. }) => e,
        other => InfraError::Unconfirmed {
            method: "submit_payout".to_string(),
            reason: other.to_string(),
        }
        .into(),
    }
}

fn overflow(balance: &AccountBalance, pool: &str) -> SettleError {
    ConsistencyError::BalanceInvariant {
        account: balance.key().to_string(),
        reason: format!("{} overflow", pool),
    }
    .into()
}
