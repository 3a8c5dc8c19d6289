//! Authentication gate
//!
//! Holds the signed-in user's bearer token in a `watch` channel. Queries that
//! need a user are enabled only while [`AuthGate::is_authenticated`] holds.
//! Token storage and login are handled elsewhere; the gate only observes.

use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Claims read from a JWT bearer token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user identifier)
    pub sub: String,
    /// Issued at (timestamp)
    #[serde(default)]
    pub iat: Option<i64>,
    /// Expiration time (timestamp)
    #[serde(default)]
    pub exp: Option<i64>,
}

/// Shared view of the current auth status
#[derive(Clone)]
pub struct AuthGate {
    sender: Arc<watch::Sender<Option<String>>>,
    receiver: watch::Receiver<Option<String>>,
}

impl AuthGate {
    pub fn new(token: Option<String>) -> Self {
        let (sender, receiver) = watch::channel(token);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    pub fn signed_out() -> Self {
        Self::new(None)
    }

    pub fn sign_in(&self, token: impl Into<String>) {
        self.sender.send_replace(Some(token.into()));
        info!("Signed in");
    }

    pub fn sign_out(&self) {
        self.sender.send_replace(None);
        info!("Signed out");
    }

    pub fn token(&self) -> Option<String> {
        self.receiver.borrow().clone()
    }

    /// A token is present and, if it is a JWT with an `exp` claim, not expired
    pub fn is_authenticated(&self) -> bool {
        match self.token() {
            None => false,
            Some(token) => match Self::read_claims(&token) {
                Some(Claims { exp: Some(exp), .. }) => exp > Utc::now().timestamp(),
                _ => true,
            },
        }
    }

    /// Claims of the current token, if it is a JWT
    pub fn claims(&self) -> Option<Claims> {
        self.token().and_then(|token| Self::read_claims(&token))
    }

    /// Receiver notified on every sign-in and sign-out
    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.sender.subscribe()
    }

    /// Decode claims without verifying the signature; the API does that.
    fn read_claims(token: &str) -> Option<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
            .ok()
            .map(|data| data.claims)
    }

    /// `Authorization` header value for `token`
    pub fn bearer_header(token: &str) -> String {
        format!("Bearer {}", token.trim())
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
