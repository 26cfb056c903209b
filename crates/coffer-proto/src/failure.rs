//! Failure code vocabulary for wire `Failure` replies.

use serde::{Deserialize, Serialize};

/// Reason attached to a `Failure` reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum FailureCode {
    UnexpectedMessage,
    ButtonExpected,
    SyntaxError,
    ActionCancelled,
    PinExpected,
    PinCancelled,
    PinInvalid,
    InvalidSignature,
    Other,
    NotEnoughFunds,
    NotInitialized,
    FirmwareError,
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
