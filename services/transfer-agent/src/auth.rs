// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! Node-to-node transfer tokens
//!
//! The control plane hands the target node a short-lived HS256 token whose
//! subject is the server being transferred. The source node only serves an
//! archive to a bearer of a valid token for that exact server.

use std::time::Duration;

use chrono::Utc;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("missing Authorization header")]
    Missing,

    #[error("malformed Authorization header")]
    Malformed,

    #[error("invalid transfer token: {0}")]
    Invalid(#[from] jsonwebtoken::errors::Error),

    #[error("token subject {subject} does not match server {server_id}")]
    SubjectMismatch { subject: String, server_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferClaims {
    /// Server the token grants access to
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

/// Extract the token from an `Authorization: Bearer <token>` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers.get(AUTHORIZATION).ok_or(AuthError::Missing)?;
    let value = value.to_str().map_err(|_| AuthError::Malformed)?;
    let (scheme, token) = value.split_once(' ').ok_or(AuthError::Malformed)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::Malformed);
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(token)
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Check the signature and expiry of `token`
    pub fn verify(&self, token: &str) -> Result<TransferClaims, AuthError> {
        let data = jsonwebtoken::decode::<TransferClaims>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }

    /// Admit a request for `server_id` carrying `headers`
    pub fn authorize(&self, headers: &HeaderMap, server_id: &str) -> Result<(), AuthError> {
        let claims = self.verify(bearer_token(headers)?)?;
        if claims.sub != server_id {
            return Err(AuthError::SubjectMismatch {
                subject: claims.sub,
                server_id: server_id.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct TokenSigner {
    key: EncodingKey,
}

impl TokenSigner {
    pub fn new(secret: &str) -> Self {
        Self {
            key: EncodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a token for `subject` valid for `ttl`
    pub fn sign(&self, subject: &str, ttl: Duration) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        self.sign_claims(&TransferClaims {
            sub: subject.to_string(),
            iat: now,
            exp: now.saturating_add(i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX)),
        })
    }

    pub fn sign_claims(&self, claims: &TransferClaims) -> Result<String, AuthError> {
        Ok(jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            claims,
            &self.key,
        )?)
    }
}
