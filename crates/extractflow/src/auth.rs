//! Bearer-credential verification for the RPC layer.
//!
//! The verifier is handed to the router as part of its state; there is no
//! process-wide credential slot. A request without an `Authorization` header
//! runs as anonymous. A bearer token the verifier rejects is a 401.

use std::collections::HashMap;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(user: impl Into<String>) -> Self {
        Self(user.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("malformed authorization header")]
    Malformed,
    #[error("invalid credential")]
    InvalidCredential,
}

pub trait AuthVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Identity, AuthError>;
}

/// Shared-secret verifier: each configured token maps to one user.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, user: &str, token: &str) -> Self {
        self.tokens.insert(token.to_string(), Identity::new(user));
        self
    }

    /// Parses `alice=tok1,bob=tok2`. Malformed pairs are skipped.
    pub fn from_pairs(pairs: &str) -> Self {
        pairs
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .map(|(u, t)| (u.trim(), t.trim()))
            .filter(|(u, t)| !u.is_empty() && !t.is_empty())
            .fold(Self::new(), |v, (u, t)| v.with_token(u, t))
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl AuthVerifier for StaticTokenVerifier {
    fn verify(&self, token: &str) -> Result<Identity, AuthError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(AuthError::InvalidCredential)
    }
}

/// `Ok(None)` when no credential was presented.
pub fn identify(
    verifier: &dyn AuthVerifier,
    headers: &HeaderMap,
) -> Result<Option<Identity>, AuthError> {
    let Some(header) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };

    let header = header.to_str().map_err(|_| AuthError::Malformed)?;
    let token = header
        .strip_prefix("Bearer ")
        .ok_or(AuthError::Malformed)?
        .trim();
    if token.is_empty() {
        return Err(AuthError::Malformed);
    }

    verifier.verify(token).map(Some)
}
