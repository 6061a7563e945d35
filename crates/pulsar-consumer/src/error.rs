use crate::types::SubscriptionType;

/// Errors returned by consumer operations and receive adapters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsumerError {
    /// The caller's cancellation token fired while the operation was suspended.
    #[error("operation cancelled")]
    OperationCancelled,

    /// The handle was disposed or unsubscribed; it will never accept work again.
    #[error("consumer closed")]
    ConsumerClosed,

    #[error("{operation} is not supported on a {subscription_type} subscription")]
    UnsupportedOperation {
        operation: &'static str,
        subscription_type: SubscriptionType,
    },

    /// The broker side rejected the request, e.g. an unknown message id.
    #[error("consumer fault: {0}")]
    ConsumerFault(String),
}

impl ConsumerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConsumerError::OperationCancelled)
    }

    /// Terminal errors mean the handle is unusable; retrying cannot succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConsumerError::ConsumerClosed)
    }
}

pub type Result<T> = std::result::Result<T, ConsumerError>;

/// Errors raised while building an authentication provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("user id must not be empty")]
    MissingUserId,

    #[error("user id must not contain ':': {0}")]
    InvalidUserId(String),
}

/// Errors raised while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("service url scheme must be pulsar or pulsar+ssl, got {0}")]
    UnsupportedScheme(String),
}
