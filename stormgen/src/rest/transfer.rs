// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

// File movement between the operator and the appliance

use std::io;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::{prelude::*, TryStreamExt};
use reqwest::Response;
use tokio::{
    fs::{DirBuilder, File},
    io::AsyncWriteExt,
};
use url::Url;

use crate::rest::client::{Client, Error, Submission};
use crate::rest::executor::{Executor, RequestSpec};

impl Client {
    /// Upload a local file to the appliance storage.
    ///
    /// Used for update images and test model imports. The appliance
    /// processes the uploaded file asynchronously, so expect a pending
    /// operation back.
    pub async fn upload(&self, path: &Path) -> Result<Submission, Error> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::Io(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "file name is not valid UTF-8",
                ))
            })?;
        let content = tokio::fs::read(path).await?;

        let url = self.base_url().join("storage/upload")?;
        let spec = RequestSpec::upload(url, "file", file_name, Bytes::from(content));
        self.submit_spec(spec).await
    }

    /// Handle on an exported report or capture file, at `path` relative to
    /// the API root.
    pub fn report(&self, path: &str) -> Result<Report, Error> {
        let url = self.base_url().join(path)?;
        Ok(Report::new(self.executor().clone(), url))
    }
}

/// A report or capture file generated by the appliance.
#[derive(Debug, Clone)]
pub struct Report {
    executor: Executor,
    url: Url,
}

impl Report {
    pub(crate) fn new(executor: Executor, url: Url) -> Self {
        Self { executor, url }
    }

    async fn response(&self) -> Result<Response, Error> {
        self.executor.execute(&RequestSpec::get(self.url.clone())).await
    }

    fn file_name(&self) -> String {
        self.url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .unwrap_or("report")
            .to_string()
    }

    /// Download the file to the directory defined in `dir`, named after the
    /// last segment of its URL. Returns the path of the downloaded file.
    pub async fn download(&self, dir: &Path) -> Result<PathBuf, Error> {
        let mut resp = self.response().await?;

        if !dir.exists() {
            DirBuilder::new().recursive(true).create(dir).await?;
        }

        let mut file_name = dir.to_path_buf();
        file_name.push(self.file_name());
        let mut dest = File::create(&file_name).await?;

        while let Some(chunk) = resp.chunk().await? {
            dest.write_all(&chunk).await?;
        }

        Ok(file_name)
    }

    /// Provide a `Stream` of `Bytes` to download the file.
    ///
    /// This can be used as an alternative to [`Report::download`], for
    /// example to feed an analysis pipeline while the export is being
    /// downloaded, saving the need to store it on disk.
    pub async fn download_stream(
        &self,
    ) -> Result<impl Stream<Item = Result<Bytes, Error>>, Error> {
        let resp = self.response().await?;

        Ok(resp.bytes_stream().map_err(|e| e.into()))
    }
}
