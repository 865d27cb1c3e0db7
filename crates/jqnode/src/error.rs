//! Node error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("{0}")]
    Config(String),

    #[error("{0}")]
    Transport(String),

    #[error("{0}")]
    Registrar(String),

    #[error("crypto self-test {0}")]
    SelfTest(String),

    #[error(transparent)]
    Identity(#[from] jqclaw_identity::IdentityError),

    #[error(transparent)]
    Auth(#[from] jqclaw_auth::AuthError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type NodeResult<T> = Result<T, NodeError>;
