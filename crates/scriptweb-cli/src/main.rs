// Copyright 2025 Scriptweb Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Scriptweb CLI
//!
//! Runs a JavaScript program that starts web servers through the global
//! `webserver` object.
//!
//! ## Usage
//!
//! ```bash
//! # Serve until ctrl-c
//! scriptweb run -s app.js
//!
//! # With settings from a file and a tighter header cap
//! scriptweb run -s app.js --config scriptweb.json --request-header-capacity 20
//!
//! # Load the script, report errors, and exit
//! scriptweb check -s app.js
//! ```

use anyhow::{Context, Result};
use argh::FromArgs;
use scriptweb_server::{BridgeConfig, ScriptContext};
use tokio::runtime::Handle;

#[derive(FromArgs)]
/// run web servers written in JavaScript
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Run(RunArgs),
    Check(CheckArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "run")]
/// load a script and serve until interrupted
struct RunArgs {
    /// path to the JavaScript file to load
    #[argh(option, short = 's')]
    script: String,

    /// path to a JSON file with bridge settings
    #[argh(option, long = "config")]
    config: Option<String>,

    /// maximum number of request headers passed to the script
    #[argh(option, long = "request-header-capacity")]
    request_header_capacity: Option<usize>,

    /// maximum number of response headers taken from the script
    #[argh(option, long = "response-header-capacity")]
    response_header_capacity: Option<usize>,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "check")]
/// load a script, report errors, and exit
struct CheckArgs {
    /// path to the JavaScript file to load
    #[argh(option, short = 's')]
    script: String,

    /// path to a JSON file with bridge settings
    #[argh(option, long = "config")]
    config: Option<String>,
}

fn build_config(
    path: Option<&str>,
    request_header_capacity: Option<usize>,
    response_header_capacity: Option<usize>,
) -> Result<BridgeConfig> {
    let mut config = match path {
        Some(path) => BridgeConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path))?,
        None => BridgeConfig::default(),
    };
    if let Some(capacity) = request_header_capacity {
        config = config.with_request_header_capacity(capacity);
    }
    if let Some(capacity) = response_header_capacity {
        config = config.with_response_header_capacity(capacity);
    }
    config.validate()?;
    Ok(config)
}

/// Creates the context and evaluates `script` on a blocking thread, since
/// both wait on the interpreter thread.
async fn load(config: BridgeConfig, script: String) -> Result<ScriptContext> {
    let runtime = Handle::current();
    tokio::task::spawn_blocking(move || -> Result<ScriptContext> {
        let ctx = ScriptContext::with_runtime(runtime, config)?;
        ctx.load_file(&script)?;
        Ok(ctx)
    })
    .await
    .context("Script loading task failed")?
}

/// Stops every server and closes the interpreter off the async workers.
async fn shut_down(ctx: ScriptContext) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let stopped = ctx.stop_all();
        ctx.close();
        Ok(stopped?)
    })
    .await
    .context("Shutdown task failed")?
}

async fn run(args: RunArgs) -> Result<()> {
    let config = build_config(
        args.config.as_deref(),
        args.request_header_capacity,
        args.response_header_capacity,
    )?;

    let ctx = load(config, args.script).await?;

    let servers = ctx.servers().server_ids();
    if servers.is_empty() {
        tracing::warn!("Script started no servers, exiting");
        return shut_down(ctx).await;
    }
    for server in servers {
        if let Ok(addr) = ctx.servers().local_addr(server) {
            tracing::info!(%server, %addr, "Listening");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down");
    shut_down(ctx).await
}

async fn check(args: CheckArgs) -> Result<()> {
    let config = build_config(args.config.as_deref(), None, None)?;
    let ctx = load(config, args.script.clone()).await?;
    let started = ctx.servers().server_ids().len();
    shut_down(ctx).await?;
    println!("{}: ok ({} server(s) started)", args.script, started);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // Default to INFO, RUST_LOG overrides
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Commands::Run(args) => {
            tracing::info!("Starting scriptweb with script: {}", args.script);
            run(args).await
        }
        Commands::Check(args) => check(args).await,
    }
}

#[cfg(test)]
mod tests;
