// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! # stormgen_mock
//!
//! Mock StormGen appliance implementation using
//! [httpmock](https://crates.io/crates/httpmock).
//!
//! This mock is used to test the `stormgen` crate but can also be useful to
//! test any client of the appliance REST convention: session login,
//! operations deferred with `202 Accepted`, status handles, transient
//! unavailability. See the [`rest`] module.

pub mod rest;
