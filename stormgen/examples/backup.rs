// Copyright 2021, Collabora Ltd.
// SPDX-License-Identifier: MIT OR Apache-2.0

use anyhow::Result;
use stormgen::{Client, Submission};
use structopt::StructOpt;

#[derive(StructOpt, Debug)]
#[structopt(name = "backup example")]
struct Opt {
    url: String,
    username: String,
    password: String,
    #[structopt(short, long, default_value = "manual")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::from_args();

    let client = Client::new(&opt.url, &opt.username, &opt.password)?;
    client.login().await?;

    match client.admin().backup(&opt.name).await? {
        Submission::Completed(result) => println!("backup finished: {}", result),
        Submission::Accepted(mut pending) => {
            pending.on_progress(|status| {
                println!(
                    "{}: {} ({}%)",
                    status.kind().unwrap_or("backup"),
                    status.progress_message().unwrap_or(""),
                    status.progress().unwrap_or(0.0),
                );
            });

            let status = pending.wait().await?;
            println!("backup finished as {}", status.state());
        }
    }

    Ok(())
}
