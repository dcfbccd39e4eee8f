//! Tool-server entry point. Thin wiring only — every piece of actual
//! debugging logic lives in `watcom_dbg_server::{pe,dwarf,debuggee,session}`.

use clap::Parser;
use log::LevelFilter;
use std::net::SocketAddr;
use std::path::PathBuf;
use watcom_dbg_server::config::ServerConfig;
use watcom_dbg_server::log as dbglog;
use watcom_dbg_server::rpc::server;
use watcom_dbg_server::session::SessionConductor;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a TOML config file. Missing file falls back to defaults.
    #[arg(long, env = "WATCOM_DBG_CONFIG")]
    config: Option<PathBuf>,

    /// Override the config's bind address.
    #[arg(long, env = "WATCOM_DBG_BIND")]
    bind: Option<SocketAddr>,

    /// Extra directory to search when resolving source files, in addition
    /// to whatever the config file lists. May be passed more than once.
    #[arg(long = "source-dir")]
    source_dirs: Vec<PathBuf>,

    /// Log verbosity.
    #[arg(long, default_value_t = LevelFilter::Info)]
    log_level: LevelFilter,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    dbglog::init(args.log_level);

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    config.source_dirs.extend(args.source_dirs);

    let conductor = SessionConductor::new(config.run_timeout);
    server::serve(config, conductor).await
}
