//! End-to-end scenarios over real loopback QUIC nodes.

use envelop_core::{
    EnvelopeBuilder, KeyPair, OnionLayer, OnionStrategy, SimpleStrategy,
};
use envelop_net::socket::SocketError;
use envelop_net::{Host, HostBuilder, PeerManager};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn loopback() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
}

fn host(name: &str) -> Host {
    let h = HostBuilder::new()
        .name(name)
        .listen(loopback())
        .build()
        .unwrap();
    h.start();
    h
}

/// Teach `a` where `b` lives and that it is directly reachable.
fn link(a: &Host, b: &Host) {
    a.registry()
        .register_static(b.id(), &b.addr().to_string());
    a.route_table().learn_direct(b.id());
}

fn link_all(hosts: &[&Host]) {
    for a in hosts {
        for b in hosts {
            if a.id() != b.id() {
                link(a, b);
            }
        }
    }
}

async fn recv_within(h: &Host, secs: u64) -> envelop_net::IncomingMessage {
    timeout(Duration::from_secs(secs), h.recv())
        .await
        .expect("timed out waiting for message")
        .expect("socket closed")
}

async fn assert_no_message(h: &Host, millis: u64) {
    assert!(
        timeout(Duration::from_millis(millis), h.recv()).await.is_err(),
        "unexpected message delivered"
    );
}

#[tokio::test]
async fn test_self_send() {
    let alice = host("alice");

    alice.send(alice.id(), b"hi").await.unwrap();

    let msg = recv_within(&alice, 5).await;
    assert_eq!(msg.from, alice.id());
    assert_eq!(msg.payload, b"hi");

    alice.stop();
}

#[tokio::test]
async fn test_three_hop_relay_decrements_ttl() {
    let alice = host("alice");
    let relay = host("relay");
    let bob = host("bob");
    link_all(&[&alice, &relay, &bob]);

    // A simple envelope for Bob, handed to the relay: the relay must
    // forward it with the TTL decremented.
    let env = EnvelopeBuilder::new()
        .ttl(5)
        .dest(bob.id())
        .return_peer(alice.id())
        .payload(b"ping".to_vec())
        .build();
    alice
        .peer_manager()
        .send_to_peer(relay.id(), &env)
        .await
        .unwrap();

    let msg = recv_within(&bob, 5).await;
    assert_eq!(msg.from, alice.id());
    assert_eq!(msg.payload, b"ping");
    assert_eq!(msg.envelope.ttl, 4);

    // The relay itself never saw application data.
    assert_no_message(&relay, 200).await;

    alice.stop();
    relay.stop();
    bob.stop();
}

#[tokio::test]
async fn test_onion_through_one_relay() {
    let relay = host("relay");
    let bob = host("bob");

    let alice = {
        let h = HostBuilder::new()
            .name("alice")
            .listen(loopback())
            .strategy(Arc::new(OnionStrategy::new(vec![OnionLayer::new(
                relay.id(),
            )])))
            .build()
            .unwrap();
        h.start();
        h
    };
    link_all(&[&alice, &relay, &bob]);

    alice.send(bob.id(), b"hello").await.unwrap();

    // The relay peeled its layer and forwarded; Bob sees the original
    // sender because every wrap preserved the return address.
    let msg = recv_within(&bob, 5).await;
    assert_eq!(msg.from, alice.id());
    assert_eq!(msg.payload, b"hello");

    assert_no_message(&relay, 200).await;

    alice.stop();
    relay.stop();
    bob.stop();
}

#[tokio::test]
async fn test_ttl_one_is_dropped_downstream() {
    let alice = host("alice");
    let relay = host("relay");
    let bob = host("bob");
    link_all(&[&alice, &relay, &bob]);

    // ttl=1 reaches the relay, which forwards with ttl=0; Bob drops it
    // at entry. The payload must never surface.
    let env = EnvelopeBuilder::new()
        .ttl(1)
        .dest(bob.id())
        .return_peer(alice.id())
        .payload(b"too far".to_vec())
        .build();
    alice
        .peer_manager()
        .send_to_peer(relay.id(), &env)
        .await
        .unwrap();

    assert_no_message(&bob, 700).await;

    alice.stop();
    relay.stop();
    bob.stop();
}

#[tokio::test]
async fn test_unknown_destination_fails_synchronously() {
    let alice = host("alice");
    let stranger = KeyPair::generate().peer_id();

    let err = alice.send(stranger, b"x").await.unwrap_err();
    assert!(matches!(err, SocketError::NoNextHop(id) if id == stranger));

    alice.stop();
}

#[tokio::test]
async fn test_encrypted_simple_end_to_end() {
    let key = vec![0x42u8; 32];

    let build = |name: &str, key: Vec<u8>| {
        let h = HostBuilder::new()
            .name(name)
            .listen(loopback())
            .strategy(Arc::new(SimpleStrategy::new(Some(key), 5)))
            .build()
            .unwrap();
        h.start();
        h
    };
    let alice = build("alice", key.clone());
    let bob = build("bob", key);
    link_all(&[&alice, &bob]);

    alice.send(bob.id(), b"secret").await.unwrap();

    let msg = recv_within(&bob, 5).await;
    assert_eq!(msg.from, alice.id());
    assert_eq!(msg.payload, b"secret");
    assert!(!msg.envelope.is_encrypted());

    alice.stop();
    bob.stop();
}

#[tokio::test]
async fn test_register_advertises_observed_address() {
    let relay = host("relay");
    let alice = host("alice");
    link(&alice, &relay);

    alice.register_at(relay.id()).await.unwrap();

    // The relay learns some address for Alice (the one it observed on
    // the wire) and marks her directly reachable.
    let mut addrs = Vec::new();
    for _ in 0..50 {
        addrs = relay.registry().resolve(alice.id());
        if !addrs.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(!addrs.is_empty(), "relay never learned alice's address");
    assert_eq!(
        relay.registry().peer_by_addr(&addrs[0]),
        Some(alice.id())
    );
    assert_eq!(relay.route_table().lookup(alice.id()), Some(alice.id()));

    alice.stop();
    relay.stop();
}

#[tokio::test]
async fn test_rpc_call_between_hosts() {
    let alice = host("alice");
    let bob = host("bob");
    link_all(&[&alice, &bob]);

    bob.rpc().register(
        "echo",
        Box::new(|data| {
            let mut out = b"echo:".to_vec();
            out.extend_from_slice(data);
            Ok(out)
        }),
    );

    let resp = alice
        .rpc()
        .call(bob.id(), "echo", b"ping".to_vec(), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(resp, b"echo:ping");

    alice.stop();
    bob.stop();
}

#[tokio::test]
async fn test_consecutive_sends_reuse_one_connection() {
    // Bare listener counting connections and frames.
    let endpoint =
        quinn::Endpoint::server(envelop_net::tls::server_config().unwrap(), loopback()).unwrap();
    let addr = endpoint.local_addr().unwrap();

    let conns = Arc::new(AtomicUsize::new(0));
    let frames = Arc::new(AtomicUsize::new(0));
    {
        let conns = conns.clone();
        let frames = frames.clone();
        tokio::spawn(async move {
            while let Some(incoming) = endpoint.accept().await {
                let conns = conns.clone();
                let frames = frames.clone();
                tokio::spawn(async move {
                    let Ok(conn) = incoming.await else { return };
                    conns.fetch_add(1, Ordering::SeqCst);
                    while let Ok(mut stream) = conn.accept_uni().await {
                        if stream.read_to_end(1 << 16).await.is_ok() {
                            frames.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });
    }

    let target = KeyPair::generate().peer_id();
    let addr_string = addr.to_string();
    let peers =
        PeerManager::new(Box::new(move |_| vec![addr_string.clone()])).unwrap();

    let env = EnvelopeBuilder::new()
        .ttl(5)
        .dest(target)
        .return_peer(target)
        .payload(b"one".to_vec())
        .build();
    peers.send_to_peer(target, &env).await.unwrap();
    peers.send_to_peer(target, &env).await.unwrap();

    // Let the listener drain both streams.
    for _ in 0..50 {
        if frames.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(frames.load(Ordering::SeqCst), 2);
    assert_eq!(conns.load(Ordering::SeqCst), 1, "expected one dial");

    peers.close();
}
