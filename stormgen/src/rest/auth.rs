// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

// Session credential shared by every in-flight request

use log::{info, warn};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use crate::rest::client::Error;

/// Header carrying the session key on every authenticated request.
pub(crate) const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
pub(crate) struct Token {
    pub value: String,
    pub generation: u64,
}

/// Holds the session key for one appliance connection.
///
/// The key is process-wide for the connection: every executor clone reads it
/// at request time and a `401` on any of them refreshes it in place. Refresh
/// is serialized behind `refresh_gate` and guarded by the generation the
/// caller observed, so a burst of expiries across concurrent pollers
/// performs a single re-login.
#[derive(Debug)]
pub(crate) struct CredentialStore {
    login_url: Url,
    username: String,
    password: String,
    token: RwLock<Option<Token>>,
    refresh_gate: Mutex<()>,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(rename = "apiKey")]
    api_key: Option<String>,
}

impl CredentialStore {
    pub fn new(login_url: Url, username: &str, password: &str) -> Self {
        Self {
            login_url,
            username: username.to_string(),
            password: password.to_string(),
            token: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    pub async fn token(&self) -> Option<Token> {
        self.token.read().await.clone()
    }

    /// Open a new session, replacing any previous key.
    ///
    /// `seen` is the generation of the token the caller last used. If another
    /// task already refreshed past it, the call is a no-op.
    pub async fn refresh(&self, http: &reqwest::Client, seen: u64) -> Result<(), Error> {
        let _gate = self.refresh_gate.lock().await;

        let current = self.token.read().await.as_ref().map_or(0, |t| t.generation);
        if current != seen {
            return Ok(());
        }

        let reply = http
            .post(self.login_url.clone())
            .json(&json!({ "username": self.username, "password": self.password }))
            .send()
            .await?;
        let status = reply.status();
        reply.error_for_status_ref()?;

        let reply = reply.json::<LoginReply>().await.map_err(|err| {
            warn!("appliance contract violation: undecodable login reply: {}", err);
            Error::ContractViolation {
                status,
                detail: format!("undecodable login reply: {}", err),
            }
        })?;
        let value = reply.api_key.ok_or_else(|| {
            warn!("appliance contract violation: login reply has no apiKey field");
            Error::ContractViolation {
                status,
                detail: "login reply has no apiKey field".to_string(),
            }
        })?;

        let mut slot = self.token.write().await;
        let generation = current + 1;
        info!("opened appliance session (generation {})", generation);
        *slot = Some(Token { value, generation });

        Ok(())
    }
}
