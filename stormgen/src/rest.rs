// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Client for the appliance REST interface.

mod admin;
mod auth;
mod client;
mod executor;
mod operation;
mod transfer;

pub use admin::Admin;
pub use client::{Client, Error, Submission};
pub use operation::{OperationState, OperationStatus, PendingOperation, PollOptions};
pub use transfer::Report;
