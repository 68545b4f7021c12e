// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: CLI entry point for the local cluster harness tools.
// Author: Lukas Bower
#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! CLI entry point for the local cluster harness tools.

use std::env;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Command, ExitCode};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use localcluster::{
    load_policy, HarnessContext, HarnessPolicy, OutputPipe, PipeConfig, PolicyOverrides,
    ProcessHandle, ReadyKind,
};
use localcluster_ports::{PortPlan, PortRole};
use log::{info, warn, LevelFilter};

/// Local cluster harness command-line arguments.
#[derive(Debug, Parser)]
#[command(author = "Lukas Bower", version, about = "Local cluster harness tools", long_about = None)]
struct Cli {
    /// Path to a harness policy TOML.
    #[arg(long, value_name = "FILE", global = true)]
    policy: Option<PathBuf>,

    /// Override the first port of the first role block.
    #[arg(long, global = true)]
    base_port: Option<u16>,

    /// Override the polling backoff ceiling in milliseconds.
    #[arg(long, global = true)]
    backoff_ceiling_ms: Option<u64>,

    /// Enable debug logging.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Print the port plan for a cluster.
    Ports {
        /// Number of hosts.
        #[arg(long, allow_negative_numbers = true)]
        hosts: i32,
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Run a command, tee its output into a log and wait for a token.
    Watch {
        /// Log file receiving the command's output.
        #[arg(long, value_name = "FILE")]
        log: PathBuf,
        /// Substring that signals success.
        #[arg(long)]
        token: String,
        /// How long to wait for the token.
        #[arg(long, default_value_t = 60_000)]
        timeout_ms: u64,
        /// Command and arguments to run.
        #[arg(last = true, required = true)]
        cmd: Vec<String>,
    },
    /// Hold a TCP listener on an address until killed.
    Listen {
        /// Address to bind.
        #[arg(long, default_value = "127.0.0.1")]
        addr: String,
        /// Port to bind.
        #[arg(long)]
        port: u16,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(2)
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let policy = resolve_policy(&cli)?;
    match cli.command {
        Cmd::Ports { hosts, json } => {
            print_ports(policy, hosts, json)?;
            Ok(ExitCode::SUCCESS)
        }
        Cmd::Watch {
            log,
            token,
            timeout_ms,
            cmd,
        } => watch(&policy, log, token, Duration::from_millis(timeout_ms), &cmd),
        Cmd::Listen { addr, port } => listen(&addr, port),
    }
}

fn init_logging(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn resolve_policy(cli: &Cli) -> Result<HarnessPolicy> {
    let policy = match resolve_policy_path(cli.policy.clone()) {
        Some(path) => load_policy(&path)?,
        None => HarnessPolicy::default(),
    };
    let overrides = PolicyOverrides {
        base_port: env_override(cli.base_port, "LOCALCLUSTER_BASE_PORT")?,
        block: parse_env_number("LOCALCLUSTER_BLOCK")?,
        backoff_base_ms: parse_env_number("LOCALCLUSTER_BACKOFF_BASE_MS")?,
        backoff_ceiling_ms: env_override(
            cli.backoff_ceiling_ms,
            "LOCALCLUSTER_BACKOFF_CEILING_MS",
        )?,
        log_dir: env_path("LOCALCLUSTER_LOG_DIR"),
        append_logs: parse_env_flag("LOCALCLUSTER_APPEND_LOGS")?,
    };
    policy.with_overrides(&overrides)
}

fn resolve_policy_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    cli_path.or_else(|| env_path("LOCALCLUSTER_POLICY"))
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

fn parse_env_number<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Ok(None)
            } else {
                trimmed
                    .parse::<T>()
                    .map(Some)
                    .map_err(|err| anyhow!("invalid {key} value '{trimmed}': {err}"))
            }
        }
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("failed to read {key}: {err}")),
    }
}

fn parse_env_flag(key: &str) -> Result<Option<bool>> {
    let Some(value) = parse_env_number::<String>(key)? else {
        return Ok(None);
    };
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(Some(true)),
        "0" | "false" | "no" | "off" => Ok(Some(false)),
        _ => Err(anyhow!(
            "invalid {key} value '{value}': expected 1/0, true/false, yes/no or on/off"
        )),
    }
}

fn env_override<T>(cli_value: Option<T>, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if cli_value.is_some() {
        return Ok(cli_value);
    }
    parse_env_number(key)
}

fn print_ports(policy: HarnessPolicy, hosts: i32, json: bool) -> Result<()> {
    let context = HarnessContext::new(policy)?;
    let plan = PortPlan::build(context.port_source(), hosts)
        .with_context(|| format!("failed to plan ports for {hosts} hosts"))?;
    if json {
        let text = serde_json::to_string_pretty(&plan).context("failed to encode port plan")?;
        println!("{text}");
        return Ok(());
    }
    let header: Vec<String> = PortRole::ALL.iter().map(ToString::to_string).collect();
    println!("host\t{}", header.join("\t"));
    for host in &plan.hosts {
        let ports: Vec<String> = PortRole::ALL
            .iter()
            .map(|role| host.port(*role).map_or_else(String::new, |port| port.to_string()))
            .collect();
        println!("{}\t{}", host.host, ports.join("\t"));
    }
    println!("coordinators\t{}", plan.coordinators.join(","));
    Ok(())
}

fn watch(
    policy: &HarnessPolicy,
    log: PathBuf,
    token: String,
    timeout: Duration,
    cmd: &[String],
) -> Result<ExitCode> {
    let (program, args) = cmd
        .split_first()
        .ok_or_else(|| anyhow!("watch needs a command to run"))?;
    let mut command = Command::new(program);
    command.args(args);
    let mut config = PipeConfig::new("watch", log, &policy.tokens, ReadyKind::Startup)
        .append(policy.logs.append);
    config.ready_token = token;
    let pipe = OutputPipe::launch(command, config)
        .with_context(|| format!("failed to run '{program}'"))?;

    let outcome = pipe.wait_ready(timeout);
    if let Some(process) = pipe.process() {
        stop_child(process);
    }
    let ready = outcome?;
    pipe.join()?;

    if ready {
        let elapsed = pipe.startup_elapsed().unwrap_or_default();
        println!("ready after {} ms", elapsed.as_millis());
        Ok(ExitCode::SUCCESS)
    } else {
        println!("token '{}' not seen", pipe.ready_token());
        Ok(ExitCode::FAILURE)
    }
}

fn stop_child(process: &ProcessHandle) {
    if process.is_alive() {
        if let Err(err) = process.kill() {
            warn!("watch: failed to kill pid {}: {err}", process.pid());
        }
    }
    if let Err(err) = process.wait() {
        warn!("watch: failed to reap pid {}: {err}", process.pid());
    }
}

fn listen(addr: &str, port: u16) -> Result<ExitCode> {
    let listener = TcpListener::bind((addr, port))
        .with_context(|| format!("failed to bind {addr}:{port}"))?;
    info!("listen: holding {}", listener.local_addr()?);
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => drop(stream),
            Err(err) => warn!("listen: accept failed: {err}"),
        }
    }
    Ok(ExitCode::SUCCESS)
}
