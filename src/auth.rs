//! Identity token validation
//!
//! The hub treats identity as an external collaborator: a bearer token goes
//! in, an `Identity` comes out. `JwtVerifier` is the shipped implementation;
//! deployments with their own identity service implement `IdentityVerifier`.

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Access role carried by an identity token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessRole {
    /// Ordinary call participant
    User,
    /// Administrative authority (may delete any chat message)
    Admin,
}

/// A verified identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable opaque user id
    pub id: String,
    /// Access role
    pub role: AccessRole,
}

impl Identity {
    /// Whether this identity may delete the given message sender's chat
    pub fn may_delete_chat_of(&self, sender: &str) -> bool {
        self.role == AccessRole::Admin || self.id == sender
    }
}

/// Identity/authorization collaborator seam
#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Validate a bearer token and yield the identity it carries
    async fn verify(&self, token: &str) -> Result<Identity>;
}

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenClaims {
    /// Subject: the user id
    pub sub: String,

    /// Expiration timestamp (Unix epoch)
    pub exp: i64,

    /// Access role (defaults to user)
    #[serde(default = "default_role")]
    pub role: AccessRole,
}

fn default_role() -> AccessRole {
    AccessRole::User
}

impl TokenClaims {
    /// Create new claims for a user id
    pub fn new(sub: String, ttl_seconds: i64) -> Self {
        let exp = Utc::now()
            .checked_add_signed(Duration::seconds(ttl_seconds))
            .expect("valid timestamp")
            .timestamp();

        Self {
            sub,
            exp,
            role: AccessRole::User,
        }
    }

    /// Set the access role
    pub fn with_role(mut self, role: AccessRole) -> Self {
        self.role = role;
        self
    }
}

/// JWT-backed identity verifier (HS256, zero leeway)
pub struct JwtVerifier {
    secret: String,
}

impl JwtVerifier {
    /// Create a new verifier with the given secret
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    /// Validate and decode a token
    pub fn validate(&self, token: &str) -> Result<TokenClaims> {
        let key = DecodingKey::from_secret(self.secret.as_bytes());
        let mut validation = Validation::default();
        // Tokens expire at exactly the exp time
        validation.leeway = 0;

        let token_data =
            decode::<TokenClaims>(token, &key, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::Authentication("token has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    Error::Authentication("invalid token signature".to_string())
                }
                _ => Error::Authentication(format!("invalid token format: {}", e)),
            })?;

        Ok(token_data.claims)
    }

    /// Generate a token for a user id (test/dev tooling)
    pub fn generate(&self, sub: &str, ttl_seconds: i64) -> Result<String> {
        self.generate_with_claims(TokenClaims::new(sub.to_string(), ttl_seconds))
    }

    /// Generate a token with custom claims
    pub fn generate_with_claims(&self, claims: TokenClaims) -> Result<String> {
        let key = EncodingKey::from_secret(self.secret.as_bytes());

        encode(&Header::default(), &claims, &key)
            .map_err(|e| Error::Authentication(format!("token generation failed: {}", e)))
    }
}

#[async_trait]
impl IdentityVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<Identity> {
        let claims = self.validate(token)?;
        Ok(Identity {
            id: claims.sub,
            role: claims.role,
        })
    }
}
