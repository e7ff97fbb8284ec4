// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

// Long-running operation status and the loop driving it to completion

use std::fmt;
use std::time::{Duration, Instant};

use log::{info, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use tokio::time::sleep;
use url::Url;

use crate::rest::client::Error;
use crate::rest::executor::{Executor, Outcome, RequestSpec, TRANSIENT_BACKOFF};

/// Pause between two status fetches of an in-progress operation.
pub(crate) const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// State reported by the appliance for a long-running operation.
///
/// [`OperationState::InProgress`] is the only state that keeps the poll
/// loop going; everything else is terminal, including states this crate
/// does not know by name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum OperationState {
    /// Operation still running
    InProgress,
    /// Operation finished successfully
    Completed,
    /// Operation finished in error
    Failed,
    /// Appliance-defined terminal state
    Other(String),
}

impl From<String> for OperationState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "IN_PROGRESS" => OperationState::InProgress,
            "COMPLETED" => OperationState::Completed,
            "FAILED" => OperationState::Failed,
            _ => OperationState::Other(s),
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::InProgress => write!(f, "IN_PROGRESS"),
            OperationState::Completed => write!(f, "COMPLETED"),
            OperationState::Failed => write!(f, "FAILED"),
            OperationState::Other(s) => write!(f, "{}", s),
        }
    }
}

impl OperationState {
    /// `true` for every state except [`OperationState::InProgress`].
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationState::InProgress)
    }
}

#[derive(Debug, Deserialize)]
struct StatusReply {
    state: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    progress: Option<f64>,
    #[serde(rename = "progressMessage")]
    progress_message: Option<String>,
}

/// Snapshot of a long-running operation, decoded from one status fetch.
#[derive(Debug, Clone)]
pub struct OperationStatus {
    state: OperationState,
    kind: Option<String>,
    progress: Option<f64>,
    progress_message: Option<String>,
    status_url: Url,
}

impl OperationStatus {
    fn decode(reply: StatusReply, http_status: StatusCode, status_url: Url) -> Result<Self, Error> {
        let state = match reply.state {
            Some(state) => OperationState::from(state),
            None => {
                warn!(
                    "appliance contract violation: {} status reply has no state field",
                    status_url
                );
                return Err(Error::ContractViolation {
                    status: http_status,
                    detail: "status reply has no state field".to_string(),
                });
            }
        };

        Ok(Self {
            state,
            kind: reply.kind,
            progress: reply.progress,
            progress_message: reply.progress_message,
            status_url,
        })
    }

    /// Current state of the operation.
    pub fn state(&self) -> &OperationState {
        &self.state
    }

    /// Kind of operation as reported by the appliance, such as `BACKUP`.
    /// Informational only.
    pub fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    /// Completion percentage, when the appliance reports one.
    pub fn progress(&self) -> Option<f64> {
        self.progress
    }

    /// Human readable progress message, when the appliance reports one.
    pub fn progress_message(&self) -> Option<&str> {
        self.progress_message.as_deref()
    }

    /// The handle this status was fetched from; stable for the life of the
    /// operation.
    pub fn status_url(&self) -> &Url {
        &self.status_url
    }
}

/// Pacing of [`PendingOperation::wait_with`].
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// Pause between two status fetches.
    pub interval: Duration,
    /// Pause after a transient failure or a session refresh.
    pub backoff: Duration,
    /// Give up with [`Error::DeadlineExceeded`] once this much time has
    /// passed.
    ///
    /// `None` polls until the operation settles, matching the appliance
    /// convention that an unreachable system eventually comes back.
    pub deadline: Option<Duration>,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            backoff: TRANSIENT_BACKOFF,
            deadline: None,
        }
    }
}

type ProgressFn = Box<dyn Fn(&OperationStatus) + Send + Sync>;

/// An operation the appliance accepted for deferred execution.
///
/// Returned when an initiating request answers `202 Accepted`. Call
/// [`PendingOperation::wait`] to drive it to completion; status fetches for
/// one operation are strictly sequential, several operations can be waited
/// on from independent tasks.
pub struct PendingOperation {
    executor: Executor,
    status_url: Url,
    last: Option<OperationStatus>,
    on_progress: Option<ProgressFn>,
}

impl fmt::Debug for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOperation")
            .field("status_url", &self.status_url)
            .field("last", &self.last)
            .finish()
    }
}

impl PendingOperation {
    pub(crate) fn new(executor: Executor, status_url: Url) -> Self {
        Self {
            executor,
            status_url,
            last: None,
            on_progress: None,
        }
    }

    /// The status handle the appliance assigned to this operation.
    pub fn status_url(&self) -> &Url {
        &self.status_url
    }

    /// Last status decoded from the appliance, if any.
    pub fn last_status(&self) -> Option<&OperationStatus> {
        self.last.as_ref()
    }

    /// Register an observer called with each decoded status.
    ///
    /// Advisory only: whatever the observer does, it does not change how
    /// the operation is driven.
    pub fn on_progress<F>(&mut self, observer: F)
    where
        F: Fn(&OperationStatus) + Send + Sync + 'static,
    {
        self.on_progress = Some(Box::new(observer));
    }

    /// Poll with the default pacing until the operation settles.
    pub async fn wait(&mut self) -> Result<OperationStatus, Error> {
        self.wait_with(PollOptions::default()).await
    }

    /// Poll until the operation settles.
    ///
    /// A `FAILED` terminal state is surfaced as [`Error::OperationFailed`];
    /// every other terminal state is returned as the final status. An
    /// operation that already settled answers from memory, without
    /// contacting the appliance again.
    pub async fn wait_with(&mut self, options: PollOptions) -> Result<OperationStatus, Error> {
        if let Some(last) = &self.last {
            if last.state().is_terminal() {
                return Self::settle(last.clone());
            }
        }

        let started = Instant::now();
        let spec = RequestSpec::get(self.status_url.clone());
        let mut delay = options.interval;

        loop {
            check_deadline(&options, started)?;
            sleep(delay).await;
            delay = options.interval;

            match self.executor.attempt(&spec).await? {
                (Outcome::Success(resp), _) => {
                    let http_status = resp.status();
                    let reply = resp.json::<StatusReply>().await.map_err(|err| {
                        warn!(
                            "appliance contract violation: {}: undecodable status reply: {}",
                            self.status_url, err
                        );
                        Error::ContractViolation {
                            status: http_status,
                            detail: format!("undecodable status reply: {}", err),
                        }
                    })?;

                    let status =
                        OperationStatus::decode(reply, http_status, self.status_url.clone())?;
                    self.notify(&status);

                    let terminal = status.state().is_terminal();
                    self.last = Some(status.clone());
                    if terminal {
                        return Self::settle(status);
                    }
                }
                // state presumed unchanged; keep the last decoded status
                (Outcome::Transient(_), _) => {
                    delay = options.backoff;
                }
                (Outcome::AuthExpired, generation) => {
                    self.executor.refresh_credentials(generation).await?;
                    delay = options.backoff;
                }
            }
        }
    }

    fn settle(status: OperationStatus) -> Result<OperationStatus, Error> {
        if status.state() == &OperationState::Failed {
            Err(Error::OperationFailed(status))
        } else {
            Ok(status)
        }
    }

    fn notify(&self, status: &OperationStatus) {
        info!(
            "{}: {} {}{}",
            status.kind().unwrap_or("operation"),
            status.state(),
            status
                .progress()
                .map_or_else(String::new, |p| format!("{}% ", p)),
            status.progress_message().unwrap_or(""),
        );

        if let Some(observer) = &self.on_progress {
            observer(status);
        }
    }
}

fn check_deadline(options: &PollOptions, started: Instant) -> Result<(), Error> {
    match options.deadline {
        Some(deadline) if started.elapsed() >= deadline => Err(Error::DeadlineExceeded),
        _ => Ok(()),
    }
}
