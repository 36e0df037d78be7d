use clap::Parser;
use tracing_subscriber::EnvFilter;

use cd_daemon::lifecycle;
use cd_daemon::server;

/// Shared coordination daemon for AI consultation clients.
#[derive(Debug, Parser)]
#[command(name = "consultd", version)]
struct Cli {
    /// Run the system installer (writes IDE config snippets).
    #[arg(long)]
    install: bool,

    /// Stop any running daemon and remove all local state.
    #[arg(long)]
    uninstall: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    config: bool,

    /// Expected daemon port; --config warns when the lock disagrees.
    #[arg(long)]
    port: Option<u16>,

    /// Run the daemon in the foreground.
    #[arg(long)]
    daemon: bool,

    /// Deprecated alias for the default proxy mode.
    #[arg(long)]
    legacy: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let dir = lifecycle::data_dir();

    let modes = [cli.install, cli.uninstall, cli.config, cli.daemon].iter().filter(|b| **b).count();
    if modes > 1 {
        anyhow::bail!("--install, --uninstall, --config and --daemon are mutually exclusive");
    }

    if cli.daemon {
        init_tracing();
        return server::run(dir).await;
    }
    if cli.uninstall {
        return uninstall(&dir);
    }
    if cli.config {
        return print_config(&dir, cli.port).await;
    }
    if cli.install {
        println!("the installer ships separately; see the project README");
        return Ok(());
    }

    // Default (and --legacy): proxy mode. Make sure a daemon is up and
    // report where to reach it; the stdio proxy attaches from there.
    if cli.legacy {
        eprintln!("warning: --legacy is deprecated and behaves like the default mode");
    }
    let lock = lifecycle::ensure_daemon(&dir)?;
    println!(
        "{}",
        serde_json::json!({ "port": lock.port, "pid": lock.pid })
    );
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cd_daemon=debug")),
        )
        .init();
}

/// Stop a running daemon via its lock file, then remove the data dir.
fn uninstall(dir: &std::path::Path) -> anyhow::Result<()> {
    if let Some(lock) = lifecycle::read_lock(&lifecycle::lock_path(dir)) {
        if lifecycle::lock_is_live(&lock) {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            println!("stopping daemon (pid {})", lock.pid);
            let _ = kill(Pid::from_raw(lock.pid as i32), Signal::SIGTERM);
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
    }
    if dir.exists() {
        std::fs::remove_dir_all(dir)?;
        println!("removed {}", dir.display());
    } else {
        println!("nothing to remove");
    }
    Ok(())
}

/// Print the effective config (keys masked): ask a running daemon over
/// REST, or read the store directly when none runs.
async fn print_config(dir: &std::path::Path, expected_port: Option<u16>) -> anyhow::Result<()> {
    if let Some(lock) = lifecycle::read_lock(&lifecycle::lock_path(dir)) {
        if lifecycle::lock_is_live(&lock) {
            if let Some(expected) = expected_port {
                if lock.port != expected {
                    eprintln!("warning: daemon is on port {}, not {expected}", lock.port);
                }
            }
            match fetch_config(lock.port, &lock.token).await {
                Ok(config) => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                    return Ok(());
                }
                Err(e) => {
                    eprintln!("warning: daemon on port {} did not answer ({e}); reading store", lock.port);
                }
            }
        }
    }

    let store = cd_store::Store::open(&lifecycle::db_path(dir))?;
    let config = cd_daemon::services::config::compose(&store)?;
    println!("{}", serde_json::to_string_pretty(&config.masked())?);
    Ok(())
}

/// `GET /api/config` against the live daemon from the lock file.
async fn fetch_config(port: u16, token: &str) -> anyhow::Result<serde_json::Value> {
    let resp = reqwest::Client::new()
        .get(format!("http://127.0.0.1:{port}/api/config"))
        .header("x-daemon-token", token)
        .timeout(std::time::Duration::from_secs(5))
        .send()
        .await?;
    if !resp.status().is_success() {
        anyhow::bail!("HTTP {}", resp.status().as_u16());
    }
    Ok(resp.json().await?)
}
