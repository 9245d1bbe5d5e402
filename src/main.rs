//! multihome CLI - multi-homed egress source manager.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use colored::Colorize;
use serde_json::Value;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use multihome::api::{ApiServer, ApiState, PolicyInput};
use multihome::cli::*;
use multihome::config::{init_logging, Config, LoggingConfig};
use multihome::error::{Error, Result};
use multihome::metrics::{MetricsSink, NoopMetrics};
use multihome::source::{Interface, InterfaceProvider, Listener, Provider, SourceHooks};
use multihome::store::SourceStore;
use multihome::types::Confidence;
use multihome::util;
use multihome::VERSION;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(cli.config.as_deref())?;

    // Initialize logging
    let log_config = LoggingConfig {
        level: cli.log_level.clone(),
        color: !cli.no_color && config.logging.color,
        ..config.logging.clone()
    };
    init_logging(&log_config)?;

    if cli.no_color {
        colored::control::set_override(false);
    }

    let client = ApiClient::new(&cli.api, cli.json);

    // Dispatch command
    match cli.command {
        Commands::Run(args) => run_daemon(args, config).await,
        Commands::Sources => client.sources().await,
        Commands::Policies(cmd) => run_policies(&client, cmd).await,
        Commands::Interfaces(args) => run_interfaces(&args, &config, cli.json),
        Commands::Check(args) => run_check(args, config).await,
        Commands::Completions(args) => run_completions(args),
        Commands::Config(args) => run_config(args),
    }
}

/// Run the listener and management API until Ctrl-C.
async fn run_daemon(args: RunArgs, mut config: Config) -> Result<()> {
    if !args.interface.is_empty() {
        config.discovery.interfaces = args.interface;
    }
    if let Some(interval) = args.poll_interval {
        config.listener.poll_interval = interval.into();
    }
    if args.no_api {
        config.api.enabled = false;
    }
    config.validate()?;

    println!("{}", format!("multihome {VERSION}").bright_cyan().bold());
    println!(
        "  {} poll every {}, timeout {}",
        "→".cyan(),
        util::format_duration(config.listener.poll_interval),
        util::format_duration(config.listener.poll_timeout)
    );

    let store = Arc::new(SourceStore::new());

    #[cfg(feature = "metrics")]
    let prometheus = if config.metrics.enabled {
        let metrics = multihome::metrics::PrometheusMetrics::new()
            .map_err(|e| Error::Internal(format!("Failed to create metrics: {e}")))?;
        Some(Arc::new(metrics))
    } else {
        None
    };

    #[cfg(feature = "metrics")]
    let sink: Arc<dyn MetricsSink> = match &prometheus {
        Some(metrics) => metrics.clone(),
        None => Arc::new(NoopMetrics),
    };
    #[cfg(not(feature = "metrics"))]
    let sink: Arc<dyn MetricsSink> = Arc::new(NoopMetrics);

    let listener = Listener::with_interfaces(&config, store.clone(), sink);
    let shutdown = CancellationToken::new();

    let api_task = if config.api.enabled {
        let state = ApiState::new(store.clone(), config.metrics.prometheus_port);
        #[cfg(feature = "metrics")]
        let state = match prometheus {
            Some(metrics) => state.with_metrics(metrics),
            None => state,
        };

        println!("  {} management API on {}", "→".cyan(), config.api.bind);
        let server = ApiServer::new(config.api.clone(), state);
        let token = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = server.serve(token.clone()).await {
                error!("Management API failed: {}", e);
                token.cancel();
            }
        }))
    } else {
        None
    };

    let token = shutdown.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
        }
        token.cancel();
    });

    println!("  {} press Ctrl-C to stop", "→".cyan());
    println!();

    match listener.run(shutdown.clone()).await {
        Ok(()) | Err(Error::Cancelled) => {}
        Err(e) => return Err(e),
    }

    if let Some(task) = api_task {
        if let Err(e) = join_api(task).await {
            error!("{}", e);
        }
    }

    println!("{} Stopped", "✓".green());
    Ok(())
}

/// Wait for the management API task, surfacing a panic or abort as an error.
async fn join_api(task: tokio::task::JoinHandle<()>) -> Result<()> {
    task.await
        .map_err(|e| Error::Internal(format!("Management API task ended abnormally: {e}")))
}

/// Minimal client for the management API.
struct ApiClient {
    base: String,
    http: reqwest::Client,
    json: bool,
}

fn request_error(e: reqwest::Error) -> Error {
    Error::Other(e.into())
}

impl ApiClient {
    fn new(base: &str, json: bool) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
            json,
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request.send().await.map_err(request_error)?;
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);

        if status.is_success() {
            Ok(body)
        } else {
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("request failed")
                .to_string();
            Err(Error::Other(anyhow::anyhow!("{status}: {message}")))
        }
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.send(self.http.get(format!("{}{path}", self.base))).await
    }

    async fn sources(&self) -> Result<()> {
        let body = self.get("/sources").await?;
        if self.json {
            return print_json(&body);
        }

        let sources = body["sources"].as_array().cloned().unwrap_or_default();
        println!("{}", "Active Sources".bright_white().bold());
        println!("{}", "─".repeat(40));
        if sources.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for source in sources {
            let name = source["name"].as_str().unwrap_or("?");
            let mtu = source["mtu"]
                .as_u64()
                .map_or_else(|| "-".to_string(), |m| m.to_string());
            let state = if source["blocked"].as_bool().unwrap_or(false) {
                "blocked".red()
            } else {
                "active".green()
            };
            println!("  {:<16} mtu {:<6} {}", name.bright_white(), mtu, state);
        }
        Ok(())
    }

    async fn policies(&self) -> Result<()> {
        let body = self.get("/policies").await?;
        if self.json {
            return print_json(&body);
        }

        let policies = body["policies"].as_array().cloned().unwrap_or_default();
        println!("{}", "Policies".bright_white().bold());
        println!("{}", "─".repeat(60));
        if policies.is_empty() {
            println!("  {}", "(none)".dimmed());
        }
        for p in policies {
            println!(
                "  {:<28} {:<9} source={} target={} issuer={}",
                p["id"].as_str().unwrap_or("?").bright_white(),
                p["kind"].as_str().unwrap_or("?").cyan(),
                p["source_id"].as_str().unwrap_or(""),
                p["target"].as_str().unwrap_or(""),
                p["issuer"].as_str().unwrap_or(""),
            );
            if let Some(reason) = p["reason"].as_str().filter(|r| !r.is_empty()) {
                println!("  {:<28} {}", "", reason.dimmed());
            }
        }
        Ok(())
    }

    async fn create(&self, kind: &str, input: PolicyInput) -> Result<()> {
        let request = self
            .http
            .post(format!("{}/policies/{kind}", self.base))
            .json(&input);
        let policy = self.send(request).await?;
        if self.json {
            return print_json(&policy);
        }
        println!(
            "{} Policy {} created",
            "✓".green(),
            policy["id"].as_str().unwrap_or("?").bright_white()
        );
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let request = self.http.delete(format!("{}/policies/{id}", self.base));
        self.send(request).await?;
        println!("{} Policy {} deleted", "✓".green(), id.bright_white());
        Ok(())
    }
}

fn print_json(value: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("Failed to encode JSON: {e}")))?;
    println!("{text}");
    Ok(())
}

async fn run_policies(client: &ApiClient, cmd: PolicyCommand) -> Result<()> {
    match cmd {
        PolicyCommand::List => client.policies().await,
        PolicyCommand::Block(args) => {
            let input = PolicyInput {
                source_id: args.source,
                reason: args.reason,
                issuer: args.issuer,
                ..Default::default()
            };
            client.create("block", input).await
        }
        PolicyCommand::Reserve(args) => client.create("reserve", target_input(args)).await,
        PolicyCommand::Avoid(args) => client.create("avoid", target_input(args)).await,
        PolicyCommand::Sticky(args) => {
            let input = PolicyInput {
                target: args.target,
                reason: args.reason,
                issuer: args.issuer,
                ..Default::default()
            };
            client.create("stick", input).await
        }
        PolicyCommand::Delete { id } => client.delete(&id).await,
    }
}

fn target_input(args: TargetPolicyArgs) -> PolicyInput {
    PolicyInput {
        source_id: args.policy.source,
        target: args.target,
        reason: args.policy.reason,
        issuer: args.policy.issuer,
    }
}

/// List local interfaces.
fn run_interfaces(args: &InterfacesArgs, config: &Config, json: bool) -> Result<()> {
    let interfaces: Vec<_> = util::get_network_interfaces()
        .into_iter()
        .filter(|i| args.all || (config.discovery.admits(&i.name) && i.is_usable()))
        .collect();

    if json {
        let value = serde_json::to_value(&interfaces)
            .map_err(|e| Error::Internal(format!("Failed to encode JSON: {e}")))?;
        return print_json(&value);
    }

    println!("{}", "Network Interfaces".bright_white().bold());
    println!("{}", "─".repeat(60));
    for iface in interfaces {
        let state = if iface.is_usable() && config.discovery.admits(&iface.name) {
            "candidate".green()
        } else if iface.is_up {
            "ignored".yellow()
        } else {
            "down".red()
        };
        let addrs: Vec<String> = iface.addresses.iter().map(ToString::to_string).collect();
        println!(
            "  {:<16} {:<9} {:<10} mtu {:<6} {}",
            iface.name.bright_white(),
            iface.interface_type.to_string(),
            state,
            iface.mtu.map_or_else(|| "-".to_string(), |m| m.to_string()),
            addrs.join(", ").dimmed()
        );
    }
    Ok(())
}

/// One-shot connectivity check.
async fn run_check(args: CheckArgs, config: Config) -> Result<()> {
    let iface = util::get_interface(&args.interface)
        .ok_or_else(|| Error::SourceNotFound(args.interface.clone()))?;
    let source = Interface::from_network_interface(&iface, SourceHooks::default());
    let provider = InterfaceProvider::new(config.discovery, config.probe, SourceHooks::default());

    let level = if args.low {
        Confidence::Low
    } else {
        Confidence::High
    };

    println!(
        "{} Checking {} ({} confidence)...",
        "→".cyan(),
        args.interface.bright_white(),
        level
    );

    let start = Instant::now();
    match provider.check(&source, level).await {
        Ok(()) => {
            println!(
                "  {} {} reachable in {}",
                "✓".green(),
                args.interface,
                util::format_duration(start.elapsed())
            );
            Ok(())
        }
        Err(e) => {
            println!("  {} {}", "✗".red(), e);
            Err(e)
        }
    }
}

/// Generate shell completions
fn run_completions(args: CompletionsArgs) -> Result<()> {
    use clap::CommandFactory;
    use clap_complete::generate;

    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();

    let shell = match args.shell {
        Shell::Bash => clap_complete::Shell::Bash,
        Shell::Zsh => clap_complete::Shell::Zsh,
        Shell::Fish => clap_complete::Shell::Fish,
        Shell::PowerShell => clap_complete::Shell::PowerShell,
    };

    generate(shell, &mut cmd, name, &mut std::io::stdout());

    Ok(())
}

/// Show example configuration
fn run_config(args: ConfigArgs) -> Result<()> {
    let output = toml::to_string_pretty(&Config::example())
        .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &output)?;
        println!(
            "{} Configuration written to {}",
            "✓".green(),
            path.display()
        );
    } else {
        println!("{}", output);
    }

    Ok(())
}
