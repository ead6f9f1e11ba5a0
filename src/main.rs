//! Mihomo Dialer - CLI Entry Point
//!
//! Diagnostic front end for the dialer: dial a destination under a given
//! policy and report which address won, or bind a listener the same way.

// Use mimalloc as global allocator for better p99 latency
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use clap::{Parser, Subcommand};
use mihomo_dialer::dialer::{self, DialOpt};
use mihomo_dialer::{Config, Context, VERSION};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "mihomo-dialer")]
#[command(author = "Tsang")]
#[command(version = VERSION)]
#[command(about = "Dial or listen through the mihomo dialer")]
struct Args {
    /// Path to configuration file
    #[arg(short = 'c', short_alias = 'f', long = "config", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Dial host:port and report the winning connection
    Dial {
        address: String,

        #[arg(short = 'n', long, default_value = "tcp")]
        network: String,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Race every candidate address at once
        #[arg(long)]
        concurrent: bool,

        #[arg(long = "timeout-ms", default_value_t = 5000)]
        timeout_ms: u64,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Bind host:port and wait for Ctrl-C
    Listen {
        address: String,

        #[arg(short = 'n', long, default_value = "tcp")]
        network: String,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Set SO_REUSEADDR (and SO_REUSEPORT on unix)
        #[arg(long)]
        reuse: bool,
    },
}

#[derive(clap::Args, Debug)]
struct PolicyArgs {
    /// Bind to this interface
    #[arg(short = 'i', long)]
    interface: Option<String>,

    #[arg(long = "routing-mark")]
    routing_mark: Option<u32>,

    /// Preferred family for dual-stack dials
    #[arg(long, value_parser = ["4", "6"])]
    prefer: Option<String>,

    /// Restrict to one family
    #[arg(long, value_parser = ["4", "6"])]
    only: Option<String>,

    /// TCP fast open
    #[arg(long)]
    tfo: bool,

    /// Multipath TCP
    #[arg(long)]
    mptcp: bool,
}

impl PolicyArgs {
    fn options(&self) -> Vec<DialOpt> {
        let mut opts = Vec::new();
        if let Some(ref name) = self.interface {
            opts.push(DialOpt::interface(name.clone()));
        }
        if let Some(mark) = self.routing_mark {
            opts.push(DialOpt::routing_mark(mark));
        }
        match self.prefer.as_deref() {
            Some("4") => opts.push(DialOpt::prefer_ipv4()),
            Some("6") => opts.push(DialOpt::prefer_ipv6()),
            _ => {}
        }
        if let Some(ref only) = self.only {
            opts.push(DialOpt::only_single_stack(only == "4"));
        }
        if self.tfo {
            opts.push(DialOpt::tfo(true));
        }
        if self.mptcp {
            opts.push(DialOpt::mptcp(true));
        }
        opts
    }
}

fn main() -> anyhow::Result<()> {
    // Build tokio runtime; dial races are short-lived, lightweight tasks
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get().clamp(2, 8))
        .enable_all()
        .thread_name("mihomo-dialer")
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match args.config {
        Some(ref path) => match Config::load_async(path).await {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    // Initialize logging
    let level = config.log_level.as_deref().unwrap_or("info");
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("mihomo_dialer={}", level).parse()?),
        )
        .init();

    info!("Mihomo Dialer v{}", VERSION);
    config.apply()?;

    match args.command {
        Command::Dial {
            address,
            network,
            policy,
            concurrent,
            timeout_ms,
            json,
        } => {
            if concurrent {
                dialer::set_tcp_concurrent(true);
            }

            let ctx = Context::with_timeout(Duration::from_millis(timeout_ms));
            let start = Instant::now();
            let conn = match dialer::dial_context(&ctx, &network, &address, &policy.options()).await {
                Ok(conn) => conn,
                Err(e) => {
                    error!("dial {} {} failed", network, address);
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            };
            let elapsed = start.elapsed();
            let peer = conn.peer_addr()?;
            let local = conn.local_addr()?;

            if json {
                let report = serde_json::json!({
                    "network": network,
                    "address": address,
                    "peer": peer.to_string(),
                    "local": local.to_string(),
                    "elapsed_ms": elapsed.as_millis() as u64,
                    "concurrent": dialer::tcp_concurrent(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{} {} -> {} (local {}) in {:?}", network, address, peer, local, elapsed);
            }
        }
        Command::Listen {
            address,
            network,
            policy,
            reuse,
        } => {
            let mut opts = policy.options();
            opts.push(DialOpt::addr_reuse(reuse));

            let listener = match dialer::listen(&Context::background(), &network, &address, &opts).await {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("{}", e);
                    std::process::exit(1);
                }
            };
            println!("{} listening on {}", network, listener.local_addr()?);

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
        }
    }

    Ok(())
}
