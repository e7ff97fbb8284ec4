// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! # stormgen
//!
//! Client side API to drive a StormGen traffic-generation test appliance
//! over its REST interface: open a session, launch administration
//! operations, follow their progress until completion and move files in
//! and out of the appliance.
//!
//! Long-running operations follow the appliance convention of answering
//! `202 Accepted` with a status handle. [`PendingOperation`] polls that
//! handle until the operation settles, absorbing the outages the appliance
//! goes through while it reboots after an update or a restore.

pub mod rest;

pub use rest::{
    Admin, Client, Error, OperationState, OperationStatus, PendingOperation, PollOptions, Report,
    Submission,
};
