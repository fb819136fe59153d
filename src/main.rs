use anyhow::Result;
use clap::{Parser, Subcommand};
use proxyping::config::{AppConfig, LoggingConfig};
use proxyping::engine::TestState;
use proxyping::profile::{GroupId, Protocol};
use proxyping::ProbeKind;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "proxyping",
    about = "Connectivity testing for saved proxy profiles",
    version,
    long_about = None
)]
struct Cli {
    /// Config file (defaults to $PROXYPING_CONFIG, then /etc/proxyping/proxyping.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Profile database path (overrides the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Test every profile of a group
    Test {
        /// Group id
        #[arg(long)]
        group: i64,

        /// Probe kind: icmp, tcp or url
        #[arg(long, default_value = "tcp")]
        kind: ProbeKind,

        /// Maximum probes in flight
        #[arg(long)]
        concurrency: Option<usize>,

        /// URL fetched by url tests
        #[arg(long)]
        url: Option<String>,

        /// JSON report on stdout
        #[arg(long)]
        json: bool,
    },

    /// List the profiles of a group with their last result
    List {
        #[arg(long)]
        group: i64,

        #[arg(long)]
        json: bool,
    },

    /// Add a profile to a group
    Add {
        #[arg(long)]
        group: i64,

        #[arg(long)]
        name: String,

        #[arg(long)]
        server: String,

        #[arg(long)]
        port: u16,

        /// socks, http, shadowsocks, vmess, vless, trojan, naive, mieru,
        /// hysteria, hysteria1, tuic, juicity, wireguard, ssh, shadowtls,
        /// anytls, direct
        #[arg(long)]
        protocol: String,

        /// Transport hint (e.g. quic, ws, grpc, faketcp)
        #[arg(long)]
        transport: Option<String>,
    },

    /// Reset test results of a group
    Clear {
        #[arg(long)]
        group: i64,
    },

    /// Delete profiles whose last test failed
    Prune {
        #[arg(long)]
        group: i64,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    // Progress goes to stdout; keep logs on stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default(),
    };
    if let Some(db) = cli.db {
        config.database.path = db;
    }

    init_tracing(&config.logging);

    match cli.command {
        Commands::Test {
            group,
            kind,
            concurrency,
            url,
            json,
        } => {
            if let Some(concurrency) = concurrency {
                config.test.concurrency = concurrency;
            }
            if let Some(url) = url {
                config.test.test_url = url;
            }
            run_test(&config, GroupId(group), kind, json).await?;
        }
        Commands::List { group, json } => {
            let store = proxyping::storage::SqliteStore::open(&config.database.path)?;
            let profiles = store.list(GroupId(group))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profiles)?);
            } else if profiles.is_empty() {
                println!("No profiles in group {}.", group);
            } else {
                println!(
                    "{:<6} | {:<20} | {:<11} | {:<12} | {:>7} | Error",
                    "Id", "Name", "Protocol", "Status", "Latency"
                );
                println!("{:-<6}-|-{:-<20}-|-{:-<11}-|-{:-<12}-|-{:-<7}-|-{:-<20}", "", "", "", "", "", "");
                for p in profiles {
                    println!(
                        "{:<6} | {:<20} | {:<11} | {:<12} | {:>7} | {}",
                        p.id,
                        p.display_name(),
                        p.protocol.name(),
                        p.status,
                        p.latency_ms,
                        p.error.as_deref().unwrap_or("")
                    );
                }
            }
        }
        Commands::Add {
            group,
            name,
            server,
            port,
            protocol,
            transport,
        } => {
            let protocol = Protocol::parse(&protocol, transport.as_deref())?;
            let store = proxyping::storage::SqliteStore::open(&config.database.path)?;
            let profile = store.add_profile(GroupId(group), &name, &server, port, &protocol)?;
            println!("Profile '{}' added with id {}.", name, profile.id);
        }
        Commands::Clear { group } => {
            let (engine, _store) = proxyping::open_engine(&config)?;
            let cleared = engine.clear_results(GroupId(group)).await?;
            println!("Cleared {} result(s) in group {}.", cleared, group);
        }
        Commands::Prune { group } => {
            let (engine, _store) = proxyping::open_engine(&config)?;
            let removed = engine.delete_unavailable(GroupId(group)).await?;
            println!("Deleted {} profile(s) from group {}.", removed.len(), group);
        }
    }

    Ok(())
}

async fn run_test(config: &AppConfig, group: GroupId, kind: ProbeKind, json: bool) -> Result<()> {
    let (engine, _store) = proxyping::open_engine(config)?;
    let mut progress = engine.subscribe();
    let handle = engine.start(group, kind).await?;
    let run_id = handle.id();

    tracing::info!(group = %handle.group(), kind = %handle.kind(), "Testing group (Ctrl-C to stop)");

    let printer = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let state = progress.borrow_and_update().clone();
            match state {
                TestState::Running {
                    run_id: id,
                    snapshot,
                    ..
                } if id == run_id => {
                    if let Some(latest) = snapshot.latest {
                        if !json {
                            println!(
                                "[{}/{}] {:<24} {}",
                                snapshot.processed,
                                snapshot.total,
                                latest.profile.display_name(),
                                latest.outcome
                            );
                        }
                    }
                }
                TestState::Idle => break,
                _ => {}
            }
        }
    });

    let token = handle.cancellation_token();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling; waiting for in-flight probes...");
            token.cancel();
        }
    });

    let report = handle.wait().await?;
    interrupt.abort();
    let _ = printer.await;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "\nTested {}/{} profile(s): {} available{}{}",
            report.outcomes.len(),
            report.total,
            report.succeeded(),
            if report.cancelled { ", cancelled" } else { "" },
            if report.writes_failed > 0 {
                format!(", {} result(s) not saved", report.writes_failed)
            } else {
                String::new()
            }
        );
    }
    Ok(())
}
