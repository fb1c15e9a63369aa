use crate::types::CharacterId;
use thiserror::Error;

/// Everything a spin attempt can end in other than a settled result.
///
/// Every variant leaves the session idle and retryable.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SpinError {
    #[error("signature request was cancelled")]
    UserCancelled,
    #[error("wager of {wager} gold exceeds balance of {available}")]
    InsufficientFunds { wager: u64, available: u64 },
    #[error("wallet cannot cover the transaction fee: {0}")]
    InsufficientFeeBalance(String),
    #[error("wallet is on chain {actual}, expected chain {expected}")]
    NetworkMismatch { expected: u64, actual: u64 },
    #[error("contract rejected the spin: {0}")]
    ContractRejected(String),
    #[error("transaction {tx} confirmed without a settlement event")]
    ResultNotFound { tx: String },
    #[error("off-chain ledger write failed: {0}")]
    LedgerWriteFailed(String),
    #[error("gold balance is unknown and the ledger could not be read: {0}")]
    LedgerUnavailable(String),
    #[error("character binding failed: {0}")]
    BindingFailed(String),
    #[error("character binding is not in place yet")]
    BindingPending,
    #[error("wallet is not connected")]
    WalletDisconnected,
    #[error("no character selected")]
    NoCharacterSelected,
    #[error("character {0} is not owned by this wallet")]
    UnknownCharacter(CharacterId),
    #[error("wager must be positive")]
    InvalidWager,
    #[error("provider error: {0}")]
    Provider(String),
}

impl SpinError {
    /// States in which the local view may have diverged from the
    /// authoritative ledger, so a full re-read follows automatically.
    pub fn requires_resync(&self) -> bool {
        matches!(
            self,
            SpinError::ResultNotFound { .. } | SpinError::LedgerWriteFailed(_)
        )
    }

    pub fn is_cancellation(&self) -> bool {
        matches!(self, SpinError::UserCancelled)
    }
}

/// Failure reported by the wallet/signer for a state-changing call.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SignerError {
    #[error("user rejected the signature request")]
    Rejected,
    #[error("insufficient funds for transaction: {0}")]
    InsufficientFunds(String),
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("{0}")]
    Provider(String),
}

impl From<SignerError> for SpinError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Rejected => SpinError::UserCancelled,
            SignerError::InsufficientFunds(msg) => SpinError::InsufficientFeeBalance(msg),
            SignerError::Reverted(reason) => SpinError::ContractRejected(reason),
            SignerError::Provider(msg) => SpinError::Provider(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    #[test]
    fn requires_resync__only_for_divergent_states() {
        assert!(SpinError::ResultNotFound { tx: "0x1".into() }.requires_resync());
        assert!(SpinError::LedgerWriteFailed("down".into()).requires_resync());
        assert!(!SpinError::UserCancelled.requires_resync());
        assert!(!SpinError::ContractRejected("revert".into()).requires_resync());
        assert!(!SpinError::BindingFailed("relay".into()).requires_resync());
    }

    #[test]
    fn from_signer_error__keeps_conditions_distinct() {
        assert_eq!(SpinError::from(SignerError::Rejected), SpinError::UserCancelled);
        assert!(matches!(
            SpinError::from(SignerError::Reverted("paused".into())),
            SpinError::ContractRejected(reason) if reason == "paused"
        ));
        assert!(matches!(
            SpinError::from(SignerError::InsufficientFunds("fee".into())),
            SpinError::InsufficientFeeBalance(_)
        ));
    }
}
