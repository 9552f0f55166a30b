use std::net::SocketAddr;

use clap::Parser;
use env_logger::Env;
use meshlink_core::server::{DrpServer, ServerConfig};

#[derive(Parser, Debug)]
#[command(version, about = "DRP signaling and fallback relay", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0:6266")]
    listen: SocketAddr,
    /// Messages buffered per client before senders are blocked
    #[arg(short, long, default_value_t = 1024)]
    queue_cap: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Args { listen, queue_cap } = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let config = ServerConfig::default()
        .set_listen(listen)
        .set_queue_cap(queue_cap);
    let server = DrpServer::bind(config)?;
    let shutdown = server.shutdown_manager();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("ctrl-c, shutting down");
            _ = shutdown.trigger_shutdown(());
        }
    });
    server.serve().await?;
    Ok(())
}
