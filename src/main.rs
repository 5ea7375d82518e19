// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_guardrails::HookRegistry;
use agent_memory::{ColdTier, HotTierConfig, SessionManager};
use agent_server::AppState;
use agent_tools::{AskHumanTool, CalculatorTool, ToolRegistry};
use anyhow::Context;
use clap::Parser;
use cli::{Cli, Commands};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::ShowConfig => {
            let config = agent_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Completions { shell } => {
            cli::print_completions(shell);
            Ok(())
        }
        Commands::Sandbox { addr, self_url } => {
            let config = agent_config::load(cli.config.as_deref())?;
            let self_url = self_url.unwrap_or_else(|| format!("http://{addr}"));
            agent_sandbox::serve(config.platform, self_url, addr).await
        }
        Commands::Serve { addr } => {
            let config = agent_config::load(cli.config.as_deref())?;
            let state = build_app_state(&config).await?;
            agent_server::serve(state, addr).await
        }
    }
}

async fn build_app_state(config: &agent_config::Config) -> anyhow::Result<AppState> {
    let model = Arc::from(agent_model::from_config(&config.model).context("constructing model provider")?);

    let mut tools = ToolRegistry::new();
    tools.register(CalculatorTool);
    // Registered headless: a shared registry has no per-request HITL bridge
    // to bind `ask_human` to, so human-input requests raised through this
    // tool are denied rather than routed to the chat stream's bridge.
    // Tool-call approval (separate from `ask_human`) still goes through the
    // per-request bridge via `Orchestrator::approval_handler`.
    tools.register(AskHumanTool::new_headless());

    let cold_path = config
        .platform
        .cold_tier_url
        .strip_prefix("sqlite://")
        .unwrap_or(&config.platform.cold_tier_url);
    let cold = if cold_path == ":memory:" {
        ColdTier::open_in_memory().context("opening in-memory cold tier")?
    } else {
        ColdTier::open(cold_path).context("opening cold tier database")?
    };
    let hot_config = HotTierConfig {
        ttl: Duration::from_secs(config.platform.hot_tier_ttl_secs),
        ..HotTierConfig::default()
    };
    let memory = Arc::new(SessionManager::new(hot_config, Arc::new(cold)));

    let system_prompt = config
        .agent
        .system_prompt
        .clone()
        .unwrap_or_else(|| "You are a helpful agent. Use tools when they help answer the request.".to_string());

    Ok(AppState {
        memory,
        model,
        tools: Arc::new(tools),
        guardrails: None,
        hooks: Arc::new(HookRegistry::new()),
        system_prompt,
        max_steps: config.agent.max_tool_rounds,
        tools_requiring_approval: Arc::new(HashSet::new()),
        active_bridges: Arc::new(Mutex::new(HashMap::new())),
        feedback: Arc::new(Mutex::new(Vec::new())),
    })
}

fn init_logging(verbose: bool) {
    let default_directive = if verbose { "agentd=debug,tower_http=debug" } else { "agentd=info,tower_http=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}
