// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock implementation of the appliance REST convention.
//!
//! Status handles are plain mocks: tests change the state an operation
//! reports by deleting the current mock and registering the next one, and
//! assert on [`MockRef::hits`] to count fetches.

use std::rc::Rc;

use httpmock::{
    Method::{GET, POST},
    MockRef, MockServer,
};
use serde_json::{json, Value};

use stormgen::OperationState;

pub use httpmock::Method;

/// Header carrying the session key, matched on every authenticated mock.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Builder for [`Server`].
pub struct ServerBuilder {
    username: String,
    password: String,
    api_key: String,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self {
            username: "admin".into(),
            password: "admin".into(),
            api_key: "Key0".into(),
        }
    }
}

impl ServerBuilder {
    /// Account expected by the login endpoint.
    pub fn account(self, username: &str, password: &str) -> Self {
        let mut builder = self;
        builder.username = username.to_string();
        builder.password = password.to_string();
        builder
    }

    /// Session key handed out by the login endpoint.
    pub fn api_key(self, api_key: &str) -> Self {
        let mut builder = self;
        builder.api_key = api_key.to_string();
        builder
    }

    /// Start the mock appliance.
    pub fn build(self) -> Server {
        Server {
            server: Rc::new(MockServer::start()),
            username: self.username,
            password: self.password,
            api_key: self.api_key,
        }
    }
}

/// A mock appliance instance.
pub struct Server {
    server: Rc<MockServer>,
    /// Account username expected on login
    pub username: String,
    /// Account password expected on login
    pub password: String,
    api_key: String,
}

impl Server {
    /// Base URL to hand to the client under test.
    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    /// Session key the login endpoint hands out.
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Serve the login endpoint, handing out the configured key.
    pub fn expect_login(&self) -> MockRef<'_> {
        let key = self.api_key.clone();
        self.expect_login_with_key(&key)
    }

    /// Serve the login endpoint, handing out `key`.
    ///
    /// Delete the previous login mock first when simulating a key
    /// rotation, so the two mocks cannot both match.
    pub fn expect_login_with_key(&self, key: &str) -> MockRef<'_> {
        self.server.mock(|when, then| {
            when.method(POST)
                .path("/api/v2/auth/session")
                .header("Content-Type", "application/json")
                .json_body(json!({ "username": self.username, "password": self.password }));

            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(json!({ "apiKey": key }));
        })
    }

    /// Serve an operation-initiating endpoint that defers the work,
    /// answering `202` with `status_path` as the handle.
    pub fn accept_operation(&self, method: Method, path: &str, status_path: &str) -> MockRef<'_> {
        let handle = self.server.url(status_path);

        self.server.mock(|when, then| {
            when.method(method)
                .path(path.to_string())
                .header(API_KEY_HEADER, &self.api_key);

            then.status(202)
                .header("Content-Type", "application/json")
                .json_body(json!({ "url": handle }));
        })
    }

    /// Serve an operation-initiating endpoint that completes synchronously,
    /// answering `200` with `result`.
    pub fn complete_operation(&self, method: Method, path: &str, result: Value) -> MockRef<'_> {
        self.server.mock(|when, then| {
            when.method(method)
                .path(path.to_string())
                .header(API_KEY_HEADER, &self.api_key);

            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(result);
        })
    }

    /// Serve `status_path` reporting an operation of kind `kind` still
    /// running.
    pub fn status_in_progress(
        &self,
        status_path: &str,
        kind: &str,
        progress: u32,
        message: &str,
    ) -> MockRef<'_> {
        self.status_body(
            status_path,
            json!({
                "state": OperationState::InProgress.to_string(),
                "type": kind,
                "progress": progress,
                "progressMessage": message,
            }),
        )
    }

    /// Serve `status_path` reporting the operation finished successfully.
    pub fn status_completed(&self, status_path: &str, kind: &str) -> MockRef<'_> {
        self.status_body(
            status_path,
            json!({
                "state": OperationState::Completed.to_string(),
                "type": kind,
                "progress": 100,
                "progressMessage": "done",
            }),
        )
    }

    /// Serve `status_path` reporting the operation failed with `message`.
    pub fn status_failed(&self, status_path: &str, kind: &str, message: &str) -> MockRef<'_> {
        self.status_body(
            status_path,
            json!({
                "state": OperationState::Failed.to_string(),
                "type": kind,
                "progress": null,
                "progressMessage": message,
            }),
        )
    }

    /// Serve `status_path` with an arbitrary JSON body, matched against the
    /// configured session key.
    pub fn status_body(&self, status_path: &str, body: Value) -> MockRef<'_> {
        let key = self.api_key.clone();
        self.status_with_key(&key, status_path, body)
    }

    /// Same as [`Server::status_body`] but bound to a specific session key,
    /// for tests exercising a key rotation.
    pub fn status_with_key(&self, key: &str, status_path: &str, body: Value) -> MockRef<'_> {
        self.server.mock(|when, then| {
            when.method(GET)
                .path(status_path.to_string())
                .header(API_KEY_HEADER, key);

            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(body);
        })
    }

    /// Serve `status_path` with an HTTP error reply.
    pub fn status_error(&self, status_path: &str, code: u16, body: Value) -> MockRef<'_> {
        self.server.mock(|when, then| {
            when.method(GET)
                .path(status_path.to_string())
                .header(API_KEY_HEADER, &self.api_key);

            then.status(code)
                .header("Content-Type", "application/json")
                .json_body(body);
        })
    }

    /// Reject a specific session key with `401`, as the appliance does once
    /// a session is invalidated.
    pub fn reject_key(&self, status_path: &str, key: &str) -> MockRef<'_> {
        self.server.mock(|when, then| {
            when.method(GET)
                .path(status_path.to_string())
                .header(API_KEY_HEADER, key);

            then.status(401);
        })
    }

    /// Expect a file upload on `path`, deferring the resulting import
    /// operation to `status_path`.
    pub fn expect_upload(&self, path: &str, status_path: &str) -> MockRef<'_> {
        let handle = self.server.url(status_path);

        self.server.mock(|when, then| {
            when.method(POST)
                .path(path.to_string())
                .header(API_KEY_HEADER, &self.api_key);

            then.status(202)
                .header("Content-Type", "application/json")
                .json_body(json!({ "url": handle }));
        })
    }

    /// Serve a downloadable file.
    pub fn serve_file(&self, path: &str, content: &str) -> MockRef<'_> {
        self.server.mock(|when, then| {
            when.method(GET)
                .path(path.to_string())
                .header(API_KEY_HEADER, &self.api_key);

            then.status(200).body(content);
        })
    }
}
