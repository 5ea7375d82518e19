// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

#[derive(Parser, Debug)]
#[command(name = "agentd", version, about = "Agent execution platform: chat server + sandboxed code interpreter")]
pub struct Cli {
    /// Path to the platform config file.
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose (debug) logging to stderr.
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the chat server (ReAct orchestrator over HTTP/SSE).
    Serve {
        /// Address to bind the chat server to.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
    },
    /// Run the sandboxed code interpreter service.
    Sandbox {
        /// Address to bind the sandbox service to.
        #[arg(long, default_value = "127.0.0.1:8088")]
        addr: SocketAddr,
        /// URL this pod is reachable at, used for consistent-hash routing
        /// between sandbox pods.
        #[arg(long)]
        self_url: Option<String>,
    },
    /// Print the resolved configuration and exit.
    ShowConfig,
    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut std::io::stdout());
}
