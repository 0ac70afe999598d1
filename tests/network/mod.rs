use crate::helpers::{eventually, mocks::*};
use mochimap_indexer::{
    event::EventType,
    network::{
        ChainTip, ChainWeight, Consensus, NetworkConfig, PeerFilter, PeerListReply, PeerNode,
        PeerOrder, PeerScanner, PeerStatus,
    },
};
use pretty_assertions::assert_eq;
use std::{net::Ipv4Addr, sync::Arc, time::Duration};

fn scanner(config: NetworkConfig) -> (PeerScanner, Arc<MockProtocol>, Arc<RecordingSink>) {
    let protocol = Arc::new(MockProtocol::default());
    let sink = Arc::new(RecordingSink::default());
    let scanner = PeerScanner::new(config, protocol.clone(), None, sink.clone());
    (scanner, protocol, sink)
}

fn healthy(ip: [u8; 4], weight: &str, timestamp: u64, uptimestamp: u64) -> PeerNode {
    PeerNode {
        status: PeerStatus::Ok,
        chain_height: 1000,
        chain_hash: "ab".repeat(32),
        chain_weight: ChainWeight::from(weight),
        timestamp,
        uptimestamp,
        ..PeerNode::new(Ipv4Addr::from(ip))
    }
}

fn reply(height: u64, peers: &[[u8; 4]]) -> PeerListReply {
    PeerListReply {
        status: PeerStatus::Ok,
        chain_height: height,
        chain_hash: format!("{height:064x}"),
        chain_weight: ChainWeight::from(format!("0x{height:x}").as_str()),
        peers: peers.iter().map(|ip| Ipv4Addr::from(*ip)).collect(),
    }
}

fn ips(nodes: &[PeerNode]) -> Vec<Ipv4Addr> {
    nodes.iter().map(|node| node.ip).collect()
}

#[tokio::test]
async fn best_peers_by_weight_then_uptime() {
    let (scanner, _, _) = scanner(NetworkConfig::default());
    scanner.insert(healthy([1, 0, 0, 1], "0x05", 10_000, 1_000));
    scanner.insert(healthy([1, 0, 0, 2], "0x0a", 10_000, 9_000));
    scanner.insert(healthy([1, 0, 0, 3], "0x0a", 10_000, 2_000));

    let best = scanner.get_peers(&PeerFilter::default(), PeerOrder::Best);
    assert_eq!(
        ips(&best),
        vec![
            Ipv4Addr::new(1, 0, 0, 3),
            Ipv4Addr::new(1, 0, 0, 2),
            Ipv4Addr::new(1, 0, 0, 1),
        ]
    );

    let by_ip = scanner.get_peers(&PeerFilter::default(), PeerOrder::Ip);
    assert_eq!(
        ips(&by_ip),
        vec![
            Ipv4Addr::new(1, 0, 0, 1),
            Ipv4Addr::new(1, 0, 0, 2),
            Ipv4Addr::new(1, 0, 0, 3),
        ]
    );

    let filter = PeerFilter {
        chain_weight: Some(ChainWeight::from("a")),
        ..Default::default()
    };
    assert_eq!(scanner.get_peers(&filter, PeerOrder::Best).len(), 2);
}

#[tokio::test]
async fn stale_peers_are_dropped() {
    let (scanner, _, _) = scanner(NetworkConfig {
        max_node_age: Duration::from_millis(100),
        ..Default::default()
    });
    scanner.insert(healthy([8, 8, 8, 8], "0x01", 1, 1));
    assert_eq!(scanner.get_peers(&PeerFilter::default(), PeerOrder::Best).len(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(scanner.get_peers(&PeerFilter::default(), PeerOrder::Best).is_empty());
}

#[tokio::test]
async fn discovers_peers_transitively() {
    let bootstrap = Ipv4Addr::new(1, 1, 1, 1);
    let (scanner, protocol, sink) = scanner(NetworkConfig {
        bootstrap,
        ..Default::default()
    });
    protocol.reply(bootstrap, reply(100, &[[2, 2, 2, 2], [3, 3, 3, 3], [10, 0, 0, 1]]));
    protocol.reply(Ipv4Addr::new(2, 2, 2, 2), reply(100, &[[1, 1, 1, 1], [4, 4, 4, 4]]));
    protocol.reply(Ipv4Addr::new(4, 4, 4, 4), reply(99, &[]));

    scanner.init();
    assert!(
        eventually(Duration::from_secs(5), || {
            scanner.get_peers(&PeerFilter::healthy(), PeerOrder::Ip).len() == 3
                && scanner.in_flight() == 0
        })
        .await
    );

    let found = scanner.get_peers(&PeerFilter::healthy(), PeerOrder::Ip);
    assert_eq!(
        ips(&found),
        vec![
            Ipv4Addr::new(1, 1, 1, 1),
            Ipv4Addr::new(2, 2, 2, 2),
            Ipv4Addr::new(4, 4, 4, 4),
        ]
    );
    assert!(found.iter().all(|node| node.uptimestamp == node.timestamp));

    // unreachable peers are not cached, private ones never contacted
    let requests = protocol.requests();
    assert!(requests.contains(&Ipv4Addr::new(3, 3, 3, 3)));
    assert!(!requests.contains(&Ipv4Addr::new(10, 0, 0, 1)));
    assert!(sink.count(EventType::Network) >= 4);

    assert_eq!(
        scanner.chain_consensus(),
        Some(ChainTip {
            height: 100,
            hash: format!("{:064x}", 100),
            count: 2,
        })
    );
}

#[tokio::test]
async fn recently_contacted_peers_are_skipped() {
    let ip = Ipv4Addr::new(5, 5, 5, 5);
    let (scanner, protocol, _) = scanner(NetworkConfig::default());
    protocol.reply(ip, reply(10, &[]));

    scanner.scan_node(ip).await;
    scanner.scan_node(ip).await;
    assert_eq!(protocol.requests(), vec![ip]);

    // a node that stops answering is marked, and loses its uptime
    let (scanner, protocol, _) = scanner_without_cooldown();
    protocol.reply(ip, reply(10, &[]));
    scanner.scan_node(ip).await;
    protocol.forget(ip);
    scanner.scan_node(ip).await;

    let nodes = scanner.get_peers(&PeerFilter::default(), PeerOrder::Ip);
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].status, PeerStatus::Error);
    assert_eq!(nodes[0].uptimestamp, 0);
}

fn scanner_without_cooldown() -> (PeerScanner, Arc<MockProtocol>, Arc<RecordingSink>) {
    scanner(NetworkConfig {
        rescan_cooldown: Duration::ZERO,
        ..Default::default()
    })
}

#[tokio::test]
async fn consensus_over_best_peers() {
    let (scanner, _, _) = scanner(NetworkConfig::default());
    for last in 1..=4 {
        scanner.insert(healthy([9, 9, 9, last], "0x01", 10, 5));
    }

    let confident = scanner
        .consensus(4, |ip| async move {
            let balance = if ip.octets()[3] == 1 { 7u64 } else { 42 };
            Ok::<_, anyhow::Error>(balance)
        })
        .await;
    assert_eq!(
        confident,
        Consensus::Confident {
            value: 42,
            agreeing: 3
        }
    );

    let low = scanner
        .consensus(2, |ip| async move { Ok::<_, anyhow::Error>(ip.octets()[3]) })
        .await;
    assert!(matches!(low, Consensus::LowConfidence { .. }));

    let none = scanner
        .consensus(4, |ip| async move { Err::<u64, _>(anyhow::anyhow!("{ip} timed out")) })
        .await;
    assert_eq!(none, Consensus::Unavailable);
}
