//! Unified error type for token and registry operations
//!
//! Every failure is synchronous and surfaces to the caller unchanged. Natural
//! expiration is never an error; it is observed through `Token::ended`.

use crate::identifiers::{ObjectKey, RegistryId, TokenId};
use crate::token::TokenKind;
use serde::{Deserialize, Serialize};

/// Error type for all latchkey operations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum TokenError {
    /// A lifecycle field was read before the token was registered
    #[error("Token {token} has not been registered")]
    Unregistered {
        /// Token that was read too early
        token: TokenId,
    },

    /// A mutation was attempted on a token that has ended
    #[error("Token {token} has ended")]
    Ended {
        /// Token that has ended
        token: TokenId,
    },

    /// Another active token already claims the object
    #[error("Object {target} is already claimed by active token {existing}; cannot register {token}")]
    RegistrationConflict {
        /// Contested object
        target: ObjectKey,
        /// Token currently holding the claim
        existing: TokenId,
        /// Token whose registration was refused
        token: TokenId,
    },

    /// Invalid input: negative duration, offset-less timestamp, bad principals
    #[error("Invalid: {message}")]
    Validation {
        /// Error message describing the invalid input
        message: String,
    },

    /// The token is bound to a different registry
    #[error("Cannot reset registry of token {token}: bound to {bound}, not {requested}")]
    RegistryMismatch {
        /// Token being registered
        token: TokenId,
        /// Registry the token belongs to
        bound: RegistryId,
        /// Registry the caller tried to use
        requested: RegistryId,
    },

    /// The token variant does not offer the operation
    #[error("Operation `{operation}` is not supported by {kind} tokens")]
    Unsupported {
        /// Operation name
        operation: String,
        /// Variant of the token
        kind: TokenKind,
    },

    /// The registry owning the token has been dropped
    #[error("Registry of token {token} is no longer available")]
    RegistryUnavailable {
        /// Token whose registry is gone
        token: TokenId,
    },

    /// Snapshot encoding or decoding failed
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message describing the serialization failure
        message: String,
    },

    /// Configuration could not be loaded or is inconsistent
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration problem
        message: String,
    },
}

impl TokenError {
    /// Create an unregistered error
    pub fn unregistered(token: TokenId) -> Self {
        Self::Unregistered { token }
    }

    /// Create an ended error
    pub fn ended(token: TokenId) -> Self {
        Self::Ended { token }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an unsupported-operation error
    pub fn unsupported(operation: impl Into<String>, kind: TokenKind) -> Self {
        Self::Unsupported {
            operation: operation.into(),
            kind,
        }
    }

    /// Create a serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}

/// Standard result type for latchkey operations
pub type Result<T> = std::result::Result<T, TokenError>;

impl From<serde_json::Error> for TokenError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TokenError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}
