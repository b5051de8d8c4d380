// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use quarry::telemetry::init_tracing;
use quarry::{EngineConfig, QuarryEngine, RuntimeContext, TableSource};
use std::path::PathBuf;
use tracing::info;

#[derive(Subcommand, Debug, Clone)]
enum Commands {
    /// Match a free-text value against a category's canonical values.
    Resolve {
        category: String,
        value: String,
    },
    /// Screen a script without running it.
    Validate {
        #[arg(long)]
        file: PathBuf,
    },
    Analyze {
        #[arg(long)]
        file: PathBuf,
    },
    /// Validate and run a script against the registered tables.
    Execute {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, default_value = "demo-session")]
        session: String,
        #[arg(long, default_value = "quarry_demo")]
        agent: String,
        #[arg(long)]
        user: Option<String>,
        #[arg(long)]
        message: Option<String>,
    },
}

#[derive(Parser, Debug, Clone)]
#[command(name = "quarry-demo")]
#[command(about = "Resolve entities, screen generated code and run it against CSV-backed tables.")]
struct Cli {
    /// Engine configuration file (YAML or TOML); falls back to QUARRY_CONFIG.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Extra tables as name=path.csv
    #[arg(long = "table", value_parser = parse_table)]
    tables: Vec<TableSource>,
    #[arg(long, default_value_t = false)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

fn parse_table(raw: &str) -> std::result::Result<TableSource, String> {
    let (name, path) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=path, got '{raw}'"))?;
    if name.trim().is_empty() {
        return Err("table name is empty".to_string());
    }
    Ok(TableSource {
        name: name.trim().to_string(),
        path: PathBuf::from(path.trim()),
    })
}

fn read_script(path: &PathBuf) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(Some(path.as_path()))?,
        None => EngineConfig::load_from_env()?,
    };
    config.tables.extend(cli.tables.iter().cloned());
    let engine = QuarryEngine::from_config(&config)?;
    info!(tables = config.tables.len(), "Quarry demo ready");

    match cli.command {
        Commands::Resolve { category, value } => {
            let result = engine.resolve(&category, &value).await;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Commands::Validate { file } => {
            let verdict = engine.validate(&read_script(&file)?);
            println!("{}", serde_json::to_string_pretty(&verdict)?);
            if !verdict.valid {
                bail!("validation failed with {} issue(s)", verdict.issues.len());
            }
        }
        Commands::Analyze { file } => match engine.analyze(&read_script(&file)?) {
            Ok(structure) => println!("{}", serde_json::to_string_pretty(&structure)?),
            Err(message) => bail!(message),
        },
        Commands::Execute {
            file,
            session,
            agent,
            user,
            message,
        } => {
            let mut ctx = RuntimeContext::new(session.clone(), session).with_agent(agent);
            if let Some(user) = user {
                ctx = ctx.with_user(user);
            }
            if let Some(message) = message {
                ctx = ctx.with_message(message);
            }
            let outcome = engine.execute(&read_script(&file)?, &ctx).await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if !outcome.is_success() {
                std::process::exit(2);
            }
        }
    }
    Ok(())
}
