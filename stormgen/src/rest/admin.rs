// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

// Appliance administration entry points

use reqwest::Method;
use serde_json::json;

use crate::rest::client::{Client, Error, Submission};

/// Administration surface of the appliance.
///
/// Every call returns a [`Submission`]: small operations may complete
/// synchronously, anything involving a service restart comes back as a
/// pending operation to wait on.
#[derive(Debug)]
pub struct Admin<'a> {
    client: &'a Client,
}

impl<'a> Admin<'a> {
    pub(crate) fn new(client: &'a Client) -> Self {
        Self { client }
    }

    /// Snapshot the appliance configuration under `name`.
    pub async fn backup(&self, name: &str) -> Result<Submission, Error> {
        self.client
            .submit(Method::POST, "admin/backup", Some(json!({ "name": name })))
            .await
    }

    /// Restore a snapshot previously taken with [`Admin::backup`].
    ///
    /// The appliance reboots while restoring; waiting on the returned
    /// operation rides through the outage.
    pub async fn restore(&self, name: &str) -> Result<Submission, Error> {
        self.client
            .submit(Method::POST, "admin/restore", Some(json!({ "name": name })))
            .await
    }

    /// Install a system update image previously uploaded with
    /// [`Client::upload`].
    pub async fn install_update(&self, image: &str) -> Result<Submission, Error> {
        self.client
            .submit(
                Method::POST,
                "admin/update/install",
                Some(json!({ "image": image })),
            )
            .await
    }

    /// Reboot the appliance.
    pub async fn reboot(&self) -> Result<Submission, Error> {
        self.client.submit(Method::POST, "admin/reboot", None).await
    }
}
