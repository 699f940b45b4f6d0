//! envelopd - envelop overlay node daemon
//!
//! Runs one overlay node: QUIC listener, registry, router, and the
//! application socket. Bootstrap peers come from the command line; the
//! receive loop logs every delivered message.

mod config;

use clap::Parser;
use config::{parse_spec, Config};
use envelop_core::SimpleStrategy;
use envelop_net::HostBuilder;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("envelopd=info".parse().unwrap()))
        .init();

    let config = Config::parse();

    info!("envelopd v{}", env!("CARGO_PKG_VERSION"));

    let key = match config.key.as_deref().map(hex::decode).transpose() {
        Ok(key) => key,
        Err(e) => {
            error!("--key is not valid hex: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(key) = &key {
        if ![16, 24, 32].contains(&key.len()) {
            error!("--key must be 16, 24, or 32 bytes, got {}", key.len());
            return ExitCode::FAILURE;
        }
    }

    let host = match HostBuilder::new()
        .name(&config.name)
        .listen(config.listen)
        .strategy(Arc::new(SimpleStrategy::new(key, config.ttl)))
        .build()
    {
        Ok(host) => Arc::new(host),
        Err(e) => {
            error!("host build failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("peer id: {}", host.id());
    info!("listening on {}", host.addr());

    // Bootstrap: every --peer entry is a static address plus a direct
    // route.
    for spec in &config.peers {
        match parse_spec(spec) {
            Ok((id, addr)) => {
                host.registry().register_static(id, addr);
                host.route_table().learn_direct(id);
                info!(peer = %id, addr, "bootstrap peer");
            }
            Err(e) => {
                error!("bad --peer {spec:?}: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    host.start();

    // Receive loop: log everything the overlay delivers to us.
    let recv_host = host.clone();
    tokio::spawn(async move {
        while let Some(msg) = recv_host.recv().await {
            info!(
                from = %msg.from,
                len = msg.payload.len(),
                payload = %String::from_utf8_lossy(&msg.payload),
                "message"
            );
        }
    });

    if let Some(domain) = &config.register_at {
        match envelop_core::PeerId::from_domain(domain) {
            Ok(relay) => {
                if let Err(e) = host.register_at(relay).await {
                    error!("register at {domain} failed: {e}");
                }
            }
            Err(e) => {
                error!("bad --register-at {domain:?}: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    if let Some(spec) = &config.send {
        match parse_spec(spec) {
            Ok((dest, message)) => {
                if let Err(e) = host.send(dest, message.as_bytes()).await {
                    error!("send failed: {e}");
                }
            }
            Err(e) => {
                error!("bad --send {spec:?}: {e}");
                return ExitCode::FAILURE;
            }
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");
    host.stop();

    ExitCode::SUCCESS
}
