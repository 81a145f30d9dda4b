mod config;

use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use calc_net::datagram::{self, Status};
use calc_net::{DEFAULT_PORT, Mode, Reply, Server, StreamClient};
use clap::{ArgAction, Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::config::Overrides;

#[derive(Parser)]
#[command(name = "calcd", about = "Prefix arithmetic calculator over TCP and UDP")]
struct Cli {
    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// `-h` is the host here, as in the protocol's reference tooling.
#[derive(Args)]
struct Endpoint {
    /// IPv4 address to bind (serve) or connect to (solve)
    #[arg(short = 'h', long)]
    host: Option<Ipv4Addr>,

    /// Port number
    #[arg(short, long)]
    port: Option<u16>,

    /// Transport: tcp or udp
    #[arg(short, long)]
    mode: Option<Mode>,

    /// Print help
    #[arg(long, action = ArgAction::Help)]
    #[allow(dead_code)]
    help: Option<bool>,
}

impl Endpoint {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host,
            port: self.port,
            mode: self.mode,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Serve requests until SIGINT or SIGTERM
    #[command(disable_help_flag = true)]
    Serve {
        #[command(flatten)]
        endpoint: Endpoint,

        /// TOML config file (defaults to $CALCD_CONFIG)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Send expressions to a running server
    #[command(disable_help_flag = true)]
    Solve {
        #[command(flatten)]
        endpoint: Endpoint,

        /// Seconds to wait for each UDP response
        #[arg(long, default_value_t = 5)]
        timeout: u64,

        /// Expressions such as "(+ 1 2)"
        #[arg(required = true)]
        exprs: Vec<String>,
    },

    /// Evaluate expressions locally, without a server
    Eval {
        /// Expressions such as "(+ 1 2)"
        #[arg(required = true)]
        exprs: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Serve { endpoint, config } => cmd_serve(endpoint, config.as_deref()).await,
        Commands::Solve {
            endpoint,
            timeout,
            exprs,
        } => cmd_solve(endpoint, Duration::from_secs(*timeout), exprs).await,
        Commands::Eval { exprs } => cmd_eval(exprs),
    }
}

// ---------------------------------------------------------------------------
// Shutdown signals
// ---------------------------------------------------------------------------

/// Cancel `shutdown` on the first SIGINT or SIGTERM.
/// Handlers are registered before this returns, so no early signal is lost.
#[cfg(unix)]
fn install_signal_handlers(shutdown: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;

    tokio::spawn(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        tracing::info!("received {name}, shutting down");
        shutdown.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn install_signal_handlers(shutdown: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for ctrl-c: {e}");
            return;
        }
        tracing::info!("received ctrl-c, shutting down");
        shutdown.cancel();
    });
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn cmd_serve(endpoint: &Endpoint, config_path: Option<&Path>) -> Result<()> {
    let config = endpoint.overrides().apply(config::load(config_path)?);

    let server = match Server::bind(&config).await {
        Ok(server) => server,
        Err(e) => {
            tracing::error!("bind {} ({}) failed: {e}", config.bind_addr(), config.mode);
            return Err(e)
                .with_context(|| format!("failed to bind {} ({})", config.bind_addr(), config.mode));
        }
    };

    let shutdown = CancellationToken::new();
    install_signal_handlers(shutdown.clone())?;

    let addr = server.local_addr()?;
    println!("listening on {addr} ({})", server.mode());

    server.run(shutdown).await.context("server failed")?;
    tracing::info!("server stopped");
    Ok(())
}

async fn cmd_solve(endpoint: &Endpoint, timeout: Duration, exprs: &[String]) -> Result<()> {
    let host = endpoint.host.unwrap_or(Ipv4Addr::LOCALHOST);
    let addr = SocketAddr::from((host, endpoint.port.unwrap_or(DEFAULT_PORT)));

    match endpoint.mode.unwrap_or_default() {
        Mode::Tcp => solve_stream(addr, exprs).await,
        Mode::Udp => solve_datagram(addr, exprs, timeout).await,
    }
}

async fn solve_stream(addr: SocketAddr, exprs: &[String]) -> Result<()> {
    let mut client = StreamClient::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;

    let greeting = client.hello().await.context("handshake failed")?;
    if greeting != Reply::Hello {
        bail!("server refused the handshake with {greeting}");
    }

    for expr in exprs {
        match client.solve(expr).await.context("request failed")? {
            Reply::Result(value) => println!("RESULT {value}"),
            reply => {
                println!("{reply}");
                bail!("server could not evaluate {expr:?}");
            }
        }
    }

    // the server answers BYE and closes; nothing left to report either way
    let _ = client.bye().await;
    Ok(())
}

async fn solve_datagram(addr: SocketAddr, exprs: &[String], timeout: Duration) -> Result<()> {
    let mut failed = 0;
    for expr in exprs {
        let response = datagram::query(addr, expr, timeout)
            .await
            .with_context(|| format!("no response from {addr} for {expr:?}"))?;
        match response.status {
            Status::Ok => println!("OK:{}", response.message),
            Status::Error => {
                println!("ERR:{}", response.message);
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} expressions could not be evaluated", exprs.len());
    }
    Ok(())
}

fn cmd_eval(exprs: &[String]) -> Result<()> {
    for expr in exprs {
        let value =
            calc_core::evaluate(expr).with_context(|| format!("cannot evaluate {expr:?}"))?;
        println!("{value}");
    }
    Ok(())
}
