//! Casino facade
//!
//! The thin boundary a presentation layer calls into. Every mutating call
//! proves account ownership first, then hands over to the ledger or the
//! secret store. Failures come back as [`ApiError`] tagged with a request id.

pub mod auth;
pub mod errors;
pub mod models;

pub use auth::{verify_ownership, OwnershipProof};
pub use errors::{ApiError, ErrorResponse};
pub use models::{BetRequest, BetResponse, CommitmentResponse, ConvertRequest, ConvertResponse};

use crate::errors::{SettleResult, UserError};
use crate::games::{self, GameFn};
use crate::ledger::{AccountLedger, BalanceView, FairnessPayload};
use crate::secrets::SecretCommitmentStore;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Clone)]
pub struct CasinoApi {
    ledger: Arc<AccountLedger>,
    secrets: Arc<SecretCommitmentStore>,
    challenge: String,
}

impl CasinoApi {
    pub fn new(ledger: Arc<AccountLedger>, secrets: Arc<SecretCommitmentStore>, challenge: impl Into<String>) -> Self {
        Self {
            ledger,
            secrets,
            challenge: challenge.into(),
        }
    }

    /// Message every ownership proof must sign
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    fn request_id() -> String {
        Uuid::new_v4().to_string()
    }

    fn check_chain(&self, chain_id: u64) -> SettleResult<()> {
        if chain_id != self.ledger.chain_id() {
            return Err(UserError::UnsupportedChain(chain_id).into());
        }
        Ok(())
    }

    pub async fn balance_inquiry(&self, account: &str, chain_id: u64) -> ApiResult<BalanceView> {
        let request_id = Self::request_id();
        self.check_chain(chain_id)
            .map_err(|e| ApiError::new(&request_id, e))?;
        self.ledger
            .interrogate_balance(account)
            .await
            .map_err(|e| ApiError::new(request_id, e))
    }

    pub async fn convert(&self, request: &ConvertRequest) -> ApiResult<ConvertResponse> {
        let request_id = Self::request_id();
        let conversion = async {
            self.check_chain(request.chain_id)?;
            verify_ownership(&request.account, &self.challenge, &request.proof)?;
            self.ledger.withdraw(&request.account, request.amount).await
        }
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;

        info!(request_id = %request_id, account = %request.account, net = %conversion.net_evolution, "convert served");
        Ok(ConvertResponse {
            balance: conversion.balance,
            net_evolution: conversion.net_evolution,
            tx_hash: conversion.tx_hash,
        })
    }

    /// Bet on a built-in game.
    pub async fn bet(&self, request: &BetRequest) -> ApiResult<BetResponse> {
        let game = games::builtin(request.game);
        self.bet_with(request, game.as_ref()).await
    }

    /// Bet on any game, the request's `game` field only labels the response.
    pub async fn bet_with(&self, request: &BetRequest, game: &dyn GameFn) -> ApiResult<BetResponse> {
        let request_id = Self::request_id();
        let fairness = FairnessPayload {
            client_seed: request.client_seed.clone(),
            hashed_secret: request.hashed_secret.clone(),
        };
        let settlement = async {
            self.check_chain(request.chain_id)?;
            verify_ownership(&request.account, &self.challenge, &request.proof)?;
            self.ledger
                .play_with_chips(&request.account, game, request.wager, &request.wanted_outcome, &fairness)
                .await
        }
        .await
        .map_err(|e| ApiError::new(&request_id, e))?;

        Ok(BetResponse {
            game: game.name().to_string(),
            outcome: settlement.outcome.outcome_value,
            amount_won: settlement.outcome.amount_won,
            updated_balance: settlement.balance,
            fairness: settlement.fairness,
            settled_at: chrono::Utc::now(),
        })
    }

    pub fn request_secret_commitment(&self) -> ApiResult<CommitmentResponse> {
        let hashed_secret = self
            .secrets
            .request_commitment()
            .map_err(|e| ApiError::new(Self::request_id(), e))?;
        Ok(CommitmentResponse {
            hashed_secret,
            expires_in_secs: self.secrets.ttl().as_secs(),
        })
    }
}
