use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use speedboard::config::Config;
use speedboard::dashboard::Dashboard;
use speedboard::display;
use speedboard::notify::TracingNotifier;
use speedboard::sequencer::metrics::{MetricSource, RandomMetrics};
use speedboard::sequencer::RunEvent;
use speedboard::storage::history_stats;

#[derive(Parser)]
#[command(
    name = "speedboard",
    about = "Speed test dashboard with live charts and saved result history",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $SPEEDBOARD_CONFIG, then ./speedboard.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dashboard API server
    Serve {
        /// Bind address (overrides the config)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one speed test in the terminal
    Run {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Sign in first so the result is saved
        #[arg(long, requires = "password")]
        email: Option<String>,

        #[arg(long, env = "SPEEDBOARD_PASSWORD", hide_env_values = true)]
        password: Option<String>,

        /// Seed the simulated readings for a reproducible run
        #[arg(long)]
        seed: Option<u64>,

        /// Skip the public IP / ISP lookup
        #[arg(long)]
        offline: bool,
    },

    /// Create an account
    SignUp {
        #[arg(long)]
        email: String,

        #[arg(long, env = "SPEEDBOARD_PASSWORD", hide_env_values = true)]
        password: String,

        /// Display name
        #[arg(long, default_value = "")]
        name: String,
    },

    /// List saved results
    History {
        #[arg(long)]
        email: String,

        #[arg(long, env = "SPEEDBOARD_PASSWORD", hide_env_values = true)]
        password: String,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    if cli.log_json {
        config.logging.json = true;
    }
    speedboard::init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            tracing::info!(bind = %config.server.bind, "Starting speedboard");
            speedboard::serve(config).await?;
        }
        Commands::Run {
            json,
            email,
            password,
            seed,
            offline,
        } => {
            if offline {
                config.metadata.enabled = false;
            }
            let mut deps = speedboard::dashboard_deps(&config, Arc::new(TracingNotifier))?;
            if let Some(seed) = seed {
                deps.metrics = Arc::new(move || Box::new(RandomMetrics::seeded(seed)) as Box<dyn MetricSource>);
            }
            let dashboard = Dashboard::new(deps);

            if let (Some(email), Some(password)) = (email.as_deref(), password.as_deref()) {
                dashboard
                    .sign_in(email, password)
                    .await
                    .context("sign in failed")?;
            }
            dashboard.refresh_network().await;
            run_in_terminal(&dashboard, json).await?;
        }
        Commands::SignUp {
            email,
            password,
            name,
        } => {
            let dashboard = speedboard::build_dashboard(&config, Arc::new(TracingNotifier))?;
            let user = dashboard
                .sign_up(&email, &password, &name)
                .await
                .context("sign up failed")?;
            println!("Account created for {} ({})", user.display_name, user.email);
        }
        Commands::History {
            email,
            password,
            json,
        } => {
            let dashboard = speedboard::build_dashboard(&config, Arc::new(TracingNotifier))?;
            dashboard
                .sign_in(&email, &password)
                .await
                .context("sign in failed")?;
            let results = dashboard.load_history().await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            } else if results.is_empty() {
                println!("No saved results.");
            } else {
                println!(
                    "{:<25} | {:>12} | {:>12} | {:>7} | {:>7} | Connection",
                    "When", "Download", "Upload", "Ping", "Jitter"
                );
                println!("{:-<25}-|-{:->12}-|-{:->12}-|-{:->7}-|-{:->7}-|-{:-<10}", "", "", "", "", "", "");
                for r in &results {
                    println!(
                        "{:<25} | {:>12} | {:>12} | {:>4.0} ms | {:>4.1} ms | {}",
                        r.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
                        display::format_speed(r.download_speed),
                        display::format_speed(r.upload_speed),
                        r.ping,
                        r.jitter,
                        r.connection_type
                    );
                }
                if let Some(stats) = history_stats(&results) {
                    println!(
                        "\n{} tests | avg down {} | avg up {} | avg ping {:.0} ms | best down {}",
                        stats.total_tests,
                        display::format_speed(stats.avg_download),
                        display::format_speed(stats.avg_upload),
                        stats.avg_ping,
                        display::format_speed(stats.max_download),
                    );
                }
            }
        }
    }

    Ok(())
}

async fn run_in_terminal(dashboard: &Dashboard, json: bool) -> Result<()> {
    let mut events = dashboard.subscribe();
    if !dashboard.start_run() {
        anyhow::bail!("a test is already running");
    }

    let mut final_state = None;
    let mut elapsed_ms = 0;
    while let Ok(event) = events.recv().await {
        match event {
            RunEvent::PhaseChanged { phase } => {
                if !json {
                    println!("{}...", phase.label());
                }
            }
            RunEvent::Completed { state, elapsed_ms: ms } => {
                final_state = Some(state);
                elapsed_ms = ms;
                break;
            }
            RunEvent::Stopped { phase } => {
                anyhow::bail!("test stopped during {phase}");
            }
        }
    }
    dashboard.wait_idle().await;

    let state = final_state.context("test ended without a result")?;
    let network = dashboard.network();
    if json {
        let out = serde_json::json!({
            "state": state,
            "elapsed_ms": elapsed_ms,
            "network": network,
            "samples": dashboard.samples(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let panel = display::stats_panel(&state);
    println!("\nSpeedboard Result");
    println!("{:<12} | Value", "Metric");
    println!("{:-<12}-|-{:-<30}", "", "");
    println!("{:<12} | {}", "Download", panel.download);
    println!("{:<12} | {}", "Upload", panel.upload);
    println!(
        "{:<12} | {} ({})",
        "Latency",
        panel.latency,
        panel.latency_quality.unwrap_or("-")
    );
    println!(
        "{:<12} | {} ({})",
        "Jitter",
        panel.jitter,
        panel.jitter_stability.unwrap_or("-")
    );
    println!("{:<12} | {} (Down:Up)", "Ratio", panel.ratio);
    println!("{:<12} | {}", "IP", network.ip);
    println!("{:<12} | {}", "ISP", network.isp);
    println!("{:<12} | {}", "Location", network.location);
    println!("{:<12} | {}", "Connection", network.connection);
    if dashboard.current_user().is_none() {
        println!("\n(Sign in with --email/--password to save this result)");
    }
    println!();
    Ok(())
}
