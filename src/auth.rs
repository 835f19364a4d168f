// ABOUTME: JWT bearer-token identification of chat callers
// ABOUTME: Issues and validates HS256 tokens and extracts the user id from request headers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Authentication
//!
//! Callers present `Authorization: Bearer <jwt>`. Identification happens
//! before any session state is created; a rejected request never touches
//! persistence.

use chrono::{DateTime, Duration, Utc};
use http::HeaderMap;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::service_names;
use crate::errors::{AppError, AppResult};

/// `JWT` claims for user authentication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User `ID`
    pub sub: String,
    /// Issued at timestamp
    pub iat: i64,
    /// Expiration timestamp
    pub exp: i64,
    /// Audience (who the token is intended for)
    pub aud: String,
}

/// Identified caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    /// Authenticated user `ID`
    pub user_id: String,
}

/// Authentication manager for `JWT` bearer tokens
#[derive(Clone)]
pub struct AuthManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_expiry_hours: i64,
}

impl AuthManager {
    /// Create a manager signing with `secret`
    #[must_use]
    pub fn new(secret: &[u8], token_expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            token_expiry_hours,
        }
    }

    fn validation() -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.set_audience(&[service_names::STREAMCHAT_SERVER]);
        validation
    }

    /// Generate a token for `user_id`
    ///
    /// # Errors
    ///
    /// Returns an internal error if encoding fails
    pub fn generate_token(&self, user_id: &str) -> AppResult<String> {
        self.generate_token_at(user_id, Utc::now())
    }

    /// Generate a token as if issued at `issued_at`
    ///
    /// # Errors
    ///
    /// Returns an internal error if encoding fails
    pub fn generate_token_at(&self, user_id: &str, issued_at: DateTime<Utc>) -> AppResult<String> {
        let expiry = issued_at + Duration::hours(self.token_expiry_hours);
        let claims = Claims {
            sub: user_id.to_owned(),
            iat: issued_at.timestamp(),
            exp: expiry.timestamp(),
            aud: service_names::STREAMCHAT_SERVER.to_owned(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AppError::internal(format!("Failed to sign token: {e}")))
    }

    /// Validate a token and return its claims
    ///
    /// # Errors
    ///
    /// Returns `AuthInvalid` for expired, tampered, or malformed tokens
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(token, &self.decoding_key, &Self::validation())
            .map(|data| data.claims)
            .map_err(|e| {
                let message = match e.kind() {
                    ErrorKind::ExpiredSignature => "Token has expired",
                    ErrorKind::InvalidSignature => "Token signature verification failed",
                    ErrorKind::InvalidAudience => "Token audience is invalid",
                    _ => "Token is malformed",
                };
                warn!(reason = message, "JWT validation failed");
                AppError::auth_invalid(message)
            })
    }

    /// Identify the caller from request headers
    ///
    /// # Errors
    ///
    /// Returns `AuthRequired` without a bearer token, `AuthInvalid` if the
    /// token does not validate
    pub fn authenticate(&self, headers: &HeaderMap) -> AppResult<AuthResult> {
        let token = bearer_token(headers).ok_or_else(AppError::auth_required)?;
        let claims = self.validate_token(token)?;
        if claims.sub.trim().is_empty() {
            return Err(AppError::auth_invalid("Token has no subject"));
        }
        debug!(user_id = %claims.sub, "Caller identified");
        Ok(AuthResult {
            user_id: claims.sub,
        })
    }
}

/// Token from an `Authorization: Bearer` header
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
