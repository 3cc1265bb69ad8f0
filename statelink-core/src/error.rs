//! Error types.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Raised by an actor that refuses a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct SubscribeError {
    reason: String,
}

impl SubscribeError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// A projection function failed.
///
/// Cloneable so a selector can hand the same failure to every reader until
/// the next successful projection.
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ProjectionError(Arc<dyn StdError + Send + Sync>);

impl ProjectionError {
    pub fn new<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self(Arc::from(error.into()))
    }

    /// The error returned by the projection.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        &*self.0
    }
}

/// Errors surfaced by bridges and selectors.
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// The actor's `subscribe` failed. Fatal; surfaced at attach time.
    #[error("failed to subscribe to actor `{actor}`: {source}")]
    SourceSubscription {
        actor: String,
        #[source]
        source: SubscribeError,
    },

    /// A selector projection failed; surfaced at the next read.
    #[error("projection failed: {0}")]
    Projection(#[from] ProjectionError),

    /// A value could not be converted into the store's representation.
    #[error("failed to encode value: {0}")]
    Encode(String),

    /// A persisted snapshot could not be read back.
    #[error("failed to decode persisted snapshot: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for BridgeError {
    fn from(error: serde_json::Error) -> Self {
        BridgeError::Encode(error.to_string())
    }
}

/// Advisories recorded by a bridge. Never returned as errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeWarning {
    /// One machine definition backs more than one live bridge; their
    /// services would observe each other's state.
    StaleActor { machine: String },
}

impl fmt::Display for BridgeWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeWarning::StaleActor { machine } => write!(
                f,
                "machine `{machine}` is already bridged; pass a factory that builds a fresh definition per bridge"
            ),
        }
    }
}
