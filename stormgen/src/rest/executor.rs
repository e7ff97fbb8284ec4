// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

// Single-request execution with outcome classification

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use tokio::time::sleep;
use url::Url;

use crate::rest::auth::{CredentialStore, API_KEY_HEADER};
use crate::rest::client::Error;

/// Pause before retrying after a transient failure or a session refresh.
///
/// The appliance drops off the network while it reboots after an update or
/// a restore; a shorter pause only hammers a system that is not back yet.
pub(crate) const TRANSIENT_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub(crate) enum Body {
    Empty,
    Json(serde_json::Value),
    Multipart {
        field: String,
        file_name: String,
        content: Bytes,
    },
}

/// A fully formed request, reusable across retries.
#[derive(Debug, Clone)]
pub(crate) struct RequestSpec {
    pub method: Method,
    pub url: Url,
    pub body: Body,
}

impl RequestSpec {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            body: Body::Empty,
        }
    }

    pub fn upload(url: Url, field: &str, file_name: String, content: Bytes) -> Self {
        Self {
            method: Method::POST,
            url,
            body: Body::Multipart {
                field: field.to_string(),
                file_name,
                content,
            },
        }
    }
}

/// How a single attempt ended, for the caller to act on.
///
/// Fatal conditions are not a variant: they come back as `Err` and must not
/// be retried.
#[derive(Debug)]
pub(crate) enum Outcome {
    /// 2xx reply, body not consumed yet.
    Success(Response),
    /// Appliance unreachable or reporting itself unavailable; retry after
    /// the backoff.
    Transient(Option<StatusCode>),
    /// Session key rejected; refresh the credential before retrying.
    AuthExpired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    Success,
    Transient,
    AuthExpired,
    Fatal,
}

// The classification table the whole crate hangs on. 404 and 503 are how
// the appliance signals "not ready yet" while a card or the chassis
// reboots, not "does not exist".
fn classify(status: StatusCode) -> Class {
    if status.is_success() {
        return Class::Success;
    }

    match status {
        StatusCode::UNAUTHORIZED => Class::AuthExpired,
        StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => Class::Transient,
        _ => Class::Fatal,
    }
}

/// Issues requests against the appliance, classifying every outcome.
///
/// Stateless between invocations apart from the shared credential store.
#[derive(Debug, Clone)]
pub(crate) struct Executor {
    http: reqwest::Client,
    credentials: Arc<CredentialStore>,
    backoff: Duration,
}

impl Executor {
    pub fn new(http: reqwest::Client, credentials: Arc<CredentialStore>) -> Self {
        Self {
            http,
            credentials,
            backoff: TRANSIENT_BACKOFF,
        }
    }

    pub fn set_backoff(&mut self, backoff: Duration) {
        self.backoff = backoff;
    }

    /// Open a fresh appliance session.
    pub async fn login(&self) -> Result<(), Error> {
        let seen = self.credentials.token().await.map_or(0, |t| t.generation);
        self.credentials.refresh(&self.http, seen).await
    }

    /// Re-login after a rejected key, serialized across concurrent pollers.
    pub async fn refresh_credentials(&self, seen: u64) -> Result<(), Error> {
        self.credentials.refresh(&self.http, seen).await
    }

    /// One attempt: attach the current session key, send, classify.
    ///
    /// Also returns the generation of the key used, to hand back to
    /// [`Executor::refresh_credentials`] on expiry.
    pub async fn attempt(&self, spec: &RequestSpec) -> Result<(Outcome, u64), Error> {
        if self.credentials.token().await.is_none() {
            self.credentials.refresh(&self.http, 0).await?;
        }
        let token = self.credentials.token().await;
        let generation = token.as_ref().map_or(0, |t| t.generation);

        let mut req = self.http.request(spec.method.clone(), spec.url.clone());
        if let Some(token) = &token {
            req = req.header(API_KEY_HEADER, token.value.as_str());
        }
        match &spec.body {
            Body::Empty => (),
            Body::Json(body) => req = req.json(body),
            Body::Multipart {
                field,
                file_name,
                content,
            } => {
                let part = Part::bytes(content.to_vec()).file_name(file_name.clone());
                req = req.multipart(Form::new().part(field.clone(), part));
            }
        }

        let resp = match req.send().await {
            Ok(resp) => resp,
            // a refused or reset connection is the appliance rebooting,
            // not a broken request
            Err(err) if err.is_connect() || err.is_timeout() => {
                debug!("{} {}: transport failure: {}", spec.method, spec.url, err);
                return Ok((Outcome::Transient(None), generation));
            }
            Err(err) => return Err(err.into()),
        };

        let status = resp.status();
        match classify(status) {
            Class::Success => Ok((Outcome::Success(resp), generation)),
            Class::Transient => {
                debug!("{} {}: appliance not ready ({})", spec.method, spec.url, status);
                Ok((Outcome::Transient(Some(status)), generation))
            }
            Class::AuthExpired => Ok((Outcome::AuthExpired, generation)),
            Class::Fatal => {
                let body = resp.text().await.unwrap_or_default();
                Err(Error::Api { status, body })
            }
        }
    }

    /// Issue a request, absorbing transient failures and session expiry
    /// until the appliance answers.
    ///
    /// There is no retry ceiling: the appliance is expected to eventually
    /// come back. Callers operating under a deadline must impose their own.
    pub async fn execute(&self, spec: &RequestSpec) -> Result<Response, Error> {
        loop {
            match self.attempt(spec).await? {
                (Outcome::Success(resp), _) => return Ok(resp),
                (Outcome::Transient(status), _) => {
                    warn!(
                        "{} {}: retrying in {:?} ({})",
                        spec.method,
                        spec.url,
                        self.backoff,
                        status.map_or_else(|| "no reply".to_string(), |s| s.to_string()),
                    );
                    sleep(self.backoff).await;
                }
                (Outcome::AuthExpired, generation) => {
                    self.refresh_credentials(generation).await?;
                    sleep(self.backoff).await;
                }
            }
        }
    }
}
