//! envelopd configuration

use clap::Parser;
use envelop_core::{PeerId, PeerIdError};
use std::net::SocketAddr;

/// Envelop overlay node daemon
#[derive(Parser, Debug, Clone)]
#[command(name = "envelopd")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Listen address for incoming QUIC connections
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    pub listen: SocketAddr,

    /// Node name used in logs
    #[arg(short, long, default_value = "envelopd")]
    pub name: String,

    /// Known peer, as <domain>=<addr>; repeatable.
    /// Example: --peer mfrgg...aab.env=203.0.113.7:9000
    #[arg(long = "peer")]
    pub peers: Vec<String>,

    /// Hex symmetric key (16/24/32 bytes) for end-to-end payload
    /// encryption with peers sharing the same key
    #[arg(long, env = "ENVELOPD_KEY")]
    pub key: Option<String>,

    /// Default TTL for outgoing envelopes
    #[arg(long, default_value = "5")]
    pub ttl: u8,

    /// Advertise our address to this relay (domain form) on startup
    #[arg(long)]
    pub register_at: Option<String>,

    /// Send a one-shot message after startup, as <domain>=<message>
    #[arg(long)]
    pub send: Option<String>,
}

/// Errors parsing peer/send specs.
#[derive(Debug, thiserror::Error)]
pub enum SpecError {
    #[error("expected <domain>=<value>, got {0:?}")]
    Shape(String),
    #[error(transparent)]
    PeerId(#[from] PeerIdError),
}

/// Split a `<domain>=<value>` spec into a peer ID and the value part.
pub fn parse_spec(spec: &str) -> Result<(PeerId, &str), SpecError> {
    let (domain, value) = spec
        .split_once('=')
        .ok_or_else(|| SpecError::Shape(spec.to_string()))?;
    Ok((PeerId::from_domain(domain)?, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spec() {
        let id = PeerId([3u8; 32]);
        let spec = format!("{}=127.0.0.1:9001", id.to_domain());
        let (parsed, addr) = parse_spec(&spec).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(addr, "127.0.0.1:9001");
    }

    #[test]
    fn test_parse_spec_rejects_missing_separator() {
        assert!(matches!(
            parse_spec("no-separator"),
            Err(SpecError::Shape(_))
        ));
    }

    #[test]
    fn test_parse_spec_rejects_bad_domain() {
        assert!(matches!(
            parse_spec("short.env=127.0.0.1:1"),
            Err(SpecError::PeerId(_))
        ));
    }
}
