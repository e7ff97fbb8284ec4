// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::rest::admin::Admin;
use crate::rest::auth::CredentialStore;
use crate::rest::executor::{Body, Executor, RequestSpec};
use crate::rest::operation::{OperationStatus, PendingOperation};

/// Appliance REST client.
///
/// Cheap to clone; clones share the session, so several operations can be
/// launched and waited on from independent tasks.
#[derive(Debug, Clone)]
pub struct Client {
    base_url: Url,
    executor: Executor,
}

/// Client errors
#[derive(Error, Debug)]
pub enum Error {
    /// URL error
    #[error("Could not parse url")]
    ParseUrlError(#[from] url::ParseError),
    /// HTTP error
    #[error("Failed to process request")]
    ReqwestError(#[from] reqwest::Error),
    /// The appliance rejected the request; not retryable
    #[error("Appliance replied {status}: {body}")]
    Api {
        /// HTTP status of the reply
        status: StatusCode,
        /// Raw error body, for diagnostics
        body: String,
    },
    /// The operation reached the `FAILED` state
    #[error("{}", failed_operation(.0))]
    OperationFailed(OperationStatus),
    /// A success reply missing mandatory information; an appliance bug
    /// rather than a user error
    #[error("Appliance contract violation on a {status} reply: {detail}")]
    ContractViolation {
        /// HTTP status of the offending reply
        status: StatusCode,
        /// What was missing or undecodable
        detail: String,
    },
    /// The configured deadline elapsed before the operation settled
    #[error("Operation still pending after the configured deadline")]
    DeadlineExceeded,
    /// IO error
    #[error("Failed to transfer file")]
    Io(#[from] std::io::Error),
}

fn failed_operation(status: &OperationStatus) -> String {
    format!(
        "Operation {} failed: {}",
        status.kind().unwrap_or("?"),
        status.progress_message().unwrap_or("no detail"),
    )
}

/// Reply to an operation-initiating request.
#[derive(Debug)]
pub enum Submission {
    /// The appliance finished the operation synchronously and answered
    /// with its result.
    Completed(serde_json::Value),
    /// The appliance accepted the operation for deferred execution; wait
    /// on the handle for completion.
    Accepted(PendingOperation),
}

impl Submission {
    /// The pending operation, if the appliance deferred the work.
    pub fn accepted(self) -> Option<PendingOperation> {
        match self {
            Submission::Accepted(pending) => Some(pending),
            Submission::Completed(_) => None,
        }
    }

    /// The synchronous result, if the appliance answered immediately.
    pub fn completed(self) -> Option<serde_json::Value> {
        match self {
            Submission::Completed(result) => Some(result),
            Submission::Accepted(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AcceptedReply {
    url: Option<String>,
}

impl Client {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `url`: the URL of the appliance, such as `https://my-appliance.example`
    /// * `username`: the account used to open the session
    /// * `password`: the account password
    pub fn new(url: &str, username: &str, password: &str) -> Result<Self, Error> {
        let host: Url = url.parse()?;
        let base_url = host.join("api/v2/")?;
        let login_url = base_url.join("auth/session")?;

        let http = reqwest::Client::builder().build()?;
        let credentials = Arc::new(CredentialStore::new(login_url, username, password));
        let executor = Executor::new(http, credentials);

        Ok(Self { base_url, executor })
    }

    /// Open the appliance session, obtaining the key attached to every
    /// subsequent request.
    ///
    /// Calling this up front is optional: the first request triggers the
    /// same login, and a session invalidated by an appliance reboot is
    /// reopened transparently.
    pub async fn login(&self) -> Result<(), Error> {
        self.executor.login().await
    }

    /// Change the pause applied before retrying when the appliance is
    /// transiently unavailable. Defaults to 30 seconds.
    pub fn set_retry_backoff(&mut self, backoff: Duration) {
        self.executor.set_backoff(backoff);
    }

    /// Administration operations: backup, restore, updates, reboot.
    pub fn admin(&self) -> Admin<'_> {
        Admin::new(self)
    }

    /// Submit an operation request to `path`, relative to the API root.
    ///
    /// A `200` reply means the operation completed synchronously and its
    /// result is returned as is. A `202` reply carries the status handle of
    /// a deferred operation. Transient appliance unavailability is absorbed
    /// before either outcome.
    pub async fn submit(
        &self,
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<Submission, Error> {
        let url = self.base_url.join(path)?;
        let body = body.map_or(Body::Empty, Body::Json);
        self.submit_spec(RequestSpec { method, url, body }).await
    }

    pub(crate) async fn submit_spec(&self, spec: RequestSpec) -> Result<Submission, Error> {
        let resp = self.executor.execute(&spec).await?;
        let status = resp.status();

        if status == StatusCode::ACCEPTED {
            let reply = resp
                .json::<AcceptedReply>()
                .await
                .map_err(|err| Error::ContractViolation {
                    status,
                    detail: format!("undecodable accept reply: {}", err),
                })?;
            let handle = reply.url.ok_or_else(|| Error::ContractViolation {
                status,
                detail: "202 reply has no url field".to_string(),
            })?;
            let status_url = self.base_url.join(&handle)?;

            Ok(Submission::Accepted(PendingOperation::new(
                self.executor.clone(),
                status_url,
            )))
        } else {
            // the operation completed synchronously; its result is the body
            let result =
                resp.json::<serde_json::Value>()
                    .await
                    .map_err(|err| Error::ContractViolation {
                        status,
                        detail: format!("success reply without a usable body: {}", err),
                    })?;

            Ok(Submission::Completed(result))
        }
    }

    pub(crate) fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.executor
    }
}
