//! Error taxonomy for the settlement daemon
//!
//! Every failure falls in one of four categories, and the category decides
//! how far it may travel:
//! - `User`: returned verbatim to the caller, never logged as a fault
//! - `Infra`: transient, retried on the next poll or recovery cycle
//! - `Consistency`: fatal to the single order or record involved
//! - `Configuration`: raised at construction and prevents startup

use thiserror::Error;

/// Root error type for all settlement operations
#[derive(Debug, Error)]
pub enum SettleError {
    #[error("{0}")]
    User(#[from] UserError),

    #[error("Infrastructure error: {0}")]
    Infra(#[from] InfraError),

    #[error("Consistency error: {0}")]
    Consistency(#[from] ConsistencyError),

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Caller mistakes and unmet preconditions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UserError {
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u128, available: u128 },

    #[error("Wager {wager} is below the minimum of {minimum}")]
    WagerBelowMinimum { wager: u128, minimum: u128 },

    #[error("Nothing to withdraw")]
    NothingToWithdraw,

    #[error("Withdrawal requires {required} plays since the last withdrawal, {current} so far")]
    WithdrawThresholdUnmet { required: u64, current: u64 },

    #[error("The payout contract cannot cover {amount} right now")]
    PayoutUnavailable { amount: u128 },

    #[error("Invalid ownership proof: {0}")]
    InvalidProof(String),

    #[error("Invalid hex for {field}: {reason}")]
    InvalidHex { field: String, reason: String },

    #[error("Unknown game outcome: {0}")]
    InvalidOutcome(String),

    #[error("Chain {0} is not served by this settler")]
    UnsupportedChain(u64),
}

/// RPC, storage and runtime hiccups
#[derive(Debug, Clone, Error)]
pub enum InfraError {
    #[error("RPC call {method} failed: {reason}")]
    Rpc { method: String, reason: String },

    #[error("RPC call {method} timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("Transaction {tx_hash} reverted")]
    TransactionReverted { tx_hash: String },

    /// Submitted, but the receipt never arrived; the transaction may be mined
    #[error("Outcome of {method} unknown: {reason}")]
    Unconfirmed { method: String, reason: String },

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Encoding failure: {0}")]
    Encoding(String),

    #[error("Service is shutting down")]
    ShuttingDown,
}

/// Disagreements between local state and the chain
#[derive(Debug, Clone, Error)]
pub enum ConsistencyError {
    #[error("Genesis block mismatch for {event_name}: stored {stored}, contract reports {live}")]
    GenesisMismatch {
        event_name: String,
        stored: u64,
        live: u64,
    },

    #[error("Expected exactly one order request for purpose {purpose_index} nonce {nonce}, found {found}")]
    FairnessEventCount {
        purpose_index: u32,
        nonce: u64,
        found: usize,
    },

    #[error("Balance invariant violated for {account}: {reason}")]
    BalanceInvariant { account: String, reason: String },
}

/// Invalid or missing configuration
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),
}

impl SettleError {
    /// True for errors the caller caused; those are not faults of the daemon.
    pub fn is_user_error(&self) -> bool {
        matches!(self, SettleError::User(_))
    }

    /// Message safe to show outside the process.
    ///
    /// User errors surface verbatim, everything else collapses into a generic
    /// message so internals do not leak.
    pub fn public_message(&self) -> String {
        match self {
            SettleError::User(e) => e.to_string(),
            SettleError::Infra(InfraError::ShuttingDown) => "Service unavailable".to_string(),
            SettleError::Infra(_) | SettleError::Consistency(_) | SettleError::Configuration(_) => {
                "Internal error".to_string()
            }
        }
    }

    /// Emit the error at the level its category deserves.
    pub fn log(&self, context: &str) {
        match self {
            SettleError::User(e) => tracing::debug!(context, error = %e, "request rejected"),
            SettleError::Infra(e) => tracing::warn!(context, error = %e, "transient failure"),
            SettleError::Consistency(e) => tracing::error!(context, error = %e, "consistency failure"),
            SettleError::Configuration(e) => tracing::error!(context, error = %e, "configuration failure"),
        }
    }
}

// External error conversions
impl From<rocksdb::Error> for SettleError {
    fn from(e: rocksdb::Error) -> Self {
        SettleError::Infra(InfraError::Storage(e.to_string()))
    }
}

impl From<serde_json::Error> for SettleError {
    fn from(e: serde_json::Error) -> Self {
        SettleError::Infra(InfraError::Encoding(e.to_string()))
    }
}

impl From<bincode::Error> for SettleError {
    fn from(e: bincode::Error) -> Self {
        SettleError::Infra(InfraError::Encoding(e.to_string()))
    }
}

impl From<hex::FromHexError> for SettleError {
    fn from(e: hex::FromHexError) -> Self {
        SettleError::User(UserError::InvalidHex {
            field: "hex".to_string(),
            reason: e.to_string(),
        })
    }
}

impl From<prometheus::Error> for SettleError {
    fn from(e: prometheus::Error) -> Self {
        SettleError::Configuration(ConfigurationError::InvalidValue {
            field: "metrics".to_string(),
            reason: e.to_string(),
        })
    }
}

// Convenience type alias for Results
pub type SettleResult<T> = Result<T, SettleError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_user_error_surfaces_verbatim() {
        let err: SettleError = UserError::InsufficientBalance {
            requested: 10,
            available: 3,
        }
        .into();

        assert!(err.is_user_error());
        assert!(err.public_message().contains("requested 10"));
        assert!(err.public_message().contains("available 3"));
    }

    #[test]
    fn test_internal_errors_are_masked() {
        let err: SettleError = ConsistencyError::GenesisMismatch {
            event_name: "0xabc:OrderRequested".to_string(),
            stored: 10,
            live: 11,
        }
        .into();

        assert!(!err.is_user_error());
        assert_eq!(err.public_message(), "Internal error");
        assert!(err.to_string().contains("stored 10"));
    }

    #[test]
    fn test_error_conversion() {
        let err: SettleError = InfraError::Storage("disk".to_string()).into();
        match err {
            SettleError::Infra(InfraError::Storage(_)) => {}
            _ => panic!("Expected storage error"),
        }
    }

    #[test]
    fn test_error_source() {
        let err: SettleError = ConfigurationError::MissingRequired("chain.contract_address".to_string()).into();
        assert!(err.source().is_some());
    }
}
