// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TokenService: caches installation access tokens and mints single-use
//! registration tokens on demand (spec §4.3).
//!
//! The identity-provider HTTP client itself is an opaque external
//! collaborator (spec §1 Non-goals); [`IdentityProviderClient`] is the
//! trait boundary a real implementation (e.g. a thin `reqwest` wrapper
//! around the provider's REST API) plugs into.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use fc_core::{Clock, InstallationToken, RegistrationToken};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::TokenError;

/// Assertion lifetime and clock-skew tolerance (spec §4.3 step 1):
/// "expiry <= 10 minutes, issued-at skewed 60 seconds into the past".
const ASSERTION_TTL_SECS: i64 = 10 * 60;
const ASSERTION_SKEW_SECS: i64 = 60;

#[derive(Serialize, Deserialize)]
struct AssertionClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Opaque identity-provider HTTP client boundary (spec §1 Non-goals).
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    /// Exchanges a signed app assertion for an installation access token.
    async fn exchange_installation_token(
        &self,
        installation_id: i64,
        assertion: &str,
    ) -> Result<InstallationToken, TokenError>;

    /// Mints a single-use registration token for `owner/repo` using a
    /// cached installation token.
    async fn mint_registration_token(
        &self,
        installation_token: &str,
        owner: &str,
        repo: &str,
    ) -> Result<RegistrationToken, TokenError>;
}

/// Caches installation tokens keyed by installation id; the process-local
/// cache is the only place these live (spec §4.3, §9 "Tokens never in
/// durable storage").
pub struct TokenService<C: IdentityProviderClient, Ck: Clock> {
    client: Arc<C>,
    clock: Ck,
    app_id: String,
    signing_key: EncodingKey,
    /// Production deployments sign with `RS256` against the app's
    /// configured asymmetric key (spec §4.3); tests use `HS256` with a
    /// throwaway secret so they don't need a real RSA keypair on disk.
    algorithm: Algorithm,
    cache: Mutex<HashMap<i64, InstallationToken>>,
}

impl<C: IdentityProviderClient, Ck: Clock> TokenService<C, Ck> {
    pub fn new(client: Arc<C>, clock: Ck, app_id: impl Into<String>, signing_key: EncodingKey) -> Self {
        Self::with_algorithm(client, clock, app_id, signing_key, Algorithm::RS256)
    }

    pub fn with_algorithm(
        client: Arc<C>,
        clock: Ck,
        app_id: impl Into<String>,
        signing_key: EncodingKey,
        algorithm: Algorithm,
    ) -> Self {
        Self {
            client,
            clock,
            app_id: app_id.into(),
            signing_key,
            algorithm,
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn sign_assertion(&self, now_ms: u64) -> Result<String, TokenError> {
        let now_secs = (now_ms / 1000) as i64;
        let claims = AssertionClaims {
            iat: now_secs - ASSERTION_SKEW_SECS,
            exp: now_secs + ASSERTION_TTL_SECS,
            iss: self.app_id.clone(),
        };
        let header = Header::new(self.algorithm);
        jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|e| TokenError::Signing(e.to_string()))
    }

    async fn installation_token(&self, installation_id: i64) -> Result<InstallationToken, TokenError> {
        let now_ms = self.clock.epoch_ms();
        if let Some(cached) = self.cache.lock().get(&installation_id) {
            if !cached.needs_refresh(now_ms) {
                return Ok(cached.clone());
            }
        }
        let assertion = self.sign_assertion(now_ms)?;
        let fresh = self
            .client
            .exchange_installation_token(installation_id, &assertion)
            .await?;
        self.cache.lock().insert(installation_id, fresh.clone());
        Ok(fresh)
    }

    /// The full §4.3 sequence: refresh the cached installation token if
    /// needed, then mint a fresh single-use registration token scoped to
    /// `owner/repo`.
    pub async fn registration_token(
        &self,
        installation_id: i64,
        owner: &str,
        repo: &str,
    ) -> Result<RegistrationToken, TokenError> {
        let installation_token = self.installation_token(installation_id).await?;
        self.client
            .mint_registration_token(installation_token.reveal(), owner, repo)
            .await
    }
}

#[cfg(test)]
#[path = "token_service_tests.rs"]
mod tests;
