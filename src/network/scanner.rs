//! Continuous, bounded-concurrency scan of the peer graph

use super::{
    cache::PeerCache, chain_consensus, is_private_ipv4, select_consensus, ChainTip, ChainWeight,
    Consensus, GeoLocator, PeerNode, PeerProtocol, PeerStatus,
};
use crate::{
    constants::*,
    event::{EventSink, IndexerEvent},
};
use log::{debug, error, info, trace, warn};
use serde::Deserialize;
use std::{
    collections::HashSet,
    future::Future,
    net::Ipv4Addr,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Seed of the peer graph
    pub bootstrap: Ipv4Addr,

    /// Cap on concurrently in-flight scans
    pub max_scan: usize,
    pub max_node_age: Duration,
    pub max_nodes: usize,
    pub scan_interval: Duration,
    pub defer_delay: Duration,
    pub idle_threshold: Duration,

    /// Minimum time between two contacts of the same node
    pub rescan_cooldown: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bootstrap: Ipv4Addr::LOCALHOST,
            max_scan: DEFAULT_MAX_SCAN,
            max_node_age: Duration::from_secs(DEFAULT_MAX_NODE_AGE_SECS),
            max_nodes: DEFAULT_MAX_PEER_CACHE,
            scan_interval: SCAN_LOOP_INTERVAL,
            defer_delay: SCAN_DEFER_DELAY,
            idle_threshold: NETWORK_IDLE_THRESHOLD,
            rescan_cooldown: Duration::from_millis(RESCAN_COOLDOWN_MS),
        }
    }
}

/// Exact-match filter over [PeerNode] fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PeerFilter {
    pub ip: Option<Ipv4Addr>,
    pub status: Option<PeerStatus>,
    pub chain_height: Option<u64>,
    pub chain_hash: Option<String>,
    pub chain_weight: Option<ChainWeight>,
}

impl PeerFilter {
    pub fn healthy() -> Self {
        Self {
            status: Some(PeerStatus::Ok),
            ..Default::default()
        }
    }

    pub fn matches(&self, node: &PeerNode) -> bool {
        self.ip.map_or(true, |ip| node.ip == ip)
            && self.status.map_or(true, |status| node.status == status)
            && self.chain_height.map_or(true, |h| node.chain_height == h)
            && self.chain_hash.as_ref().map_or(true, |h| &node.chain_hash == h)
            && self.chain_weight.as_ref().map_or(true, |w| &node.chain_weight == w)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerOrder {
    /// Descending chain weight, then descending uptime
    #[default]
    Best,

    /// Lexicographic ip
    Ip,
}

struct Inner {
    config: NetworkConfig,
    protocol: Arc<dyn PeerProtocol>,
    geo: Option<Arc<dyn GeoLocator>>,
    sink: Arc<dyn EventSink>,
    cache: Mutex<PeerCache>,
    in_flight: Mutex<HashSet<Ipv4Addr>>,
    idle_since: Mutex<Option<Instant>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[derive(Clone)]
pub struct PeerScanner {
    inner: Arc<Inner>,
}

/// Clears the in-flight marker of a scan however it ends
struct InFlight {
    scanner: PeerScanner,
    ip: Ipv4Addr,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        lock(&self.scanner.inner.in_flight).remove(&self.ip);
    }
}

impl PeerScanner {
    pub fn new(
        config: NetworkConfig,
        protocol: Arc<dyn PeerProtocol>,
        geo: Option<Arc<dyn GeoLocator>>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let cache = PeerCache::new(config.max_nodes, config.max_node_age);
        Self {
            inner: Arc::new(Inner {
                config,
                protocol,
                geo,
                sink,
                cache: Mutex::new(cache),
                in_flight: Mutex::new(HashSet::new()),
                idle_since: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.inner.config
    }

    /// Seeds scans from the bootstrap ip and every cached node
    pub fn init(&self) {
        info!("Initializing peer scan from {}", self.inner.config.bootstrap);
        self.scan(self.inner.config.bootstrap);

        let keys = lock(&self.inner.cache).keys();
        for ip in keys {
            self.scan(ip);
        }
    }

    /// Scan loop, until `shutdown` resolves
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        self.init();

        let mut interval = tokio::time::interval(self.inner.config.scan_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Peer scanner shutdown signal received");
                    break;
                }
                _ = interval.tick() => {
                    self.tick();
                }
            }
        }
    }

    /// One scan cycle: rescans reachable nodes and their peers, and reseeds
    /// after a prolonged loss of all peers. Returns the reachable count.
    pub fn tick(&self) -> usize {
        let nodes = lock(&self.inner.cache).nodes();
        let reachable: Vec<&PeerNode> = nodes.iter().filter(|n| n.status.is_ok()).collect();

        for node in &reachable {
            self.scan(node.ip);
            for peer in &node.peers {
                self.scan(*peer);
            }
        }

        let count = reachable.len();
        let reseed = {
            let mut idle_since = lock(&self.inner.idle_since);
            let current = *idle_since;
            match current {
                _ if count > 0 => {
                    if idle_since.take().is_some() {
                        info!("Network communication restored, {count} reachable peers");
                    }
                    false
                }
                None => {
                    warn!("No reachable peers");
                    *idle_since = Some(Instant::now());
                    false
                }
                Some(since) if since.elapsed() > self.inner.config.idle_threshold => {
                    error!(
                        "No reachable peers for {}s, reinitializing",
                        since.elapsed().as_secs()
                    );
                    *idle_since = Some(Instant::now());
                    true
                }
                Some(_) => false,
            }
        };

        if reseed {
            self.init();
        }
        count
    }

    /// Schedules a scan of `ip` unless one is in flight. Deferred when the
    /// concurrency cap is reached.
    pub fn scan(&self, ip: Ipv4Addr) {
        if is_private_ipv4(&ip) && ip != self.inner.config.bootstrap {
            trace!("Skipping private address {ip}");
            return;
        }

        {
            let mut in_flight = lock(&self.inner.in_flight);
            if in_flight.contains(&ip) {
                return;
            }

            if in_flight.len() >= self.inner.config.max_scan {
                drop(in_flight);
                trace!("Scan cap reached, deferring {ip}");

                let scanner = self.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(scanner.inner.config.defer_delay).await;
                    scanner.scan(ip);
                });
                return;
            }
            in_flight.insert(ip);
        }

        let guard = InFlight {
            scanner: self.clone(),
            ip,
        };
        tokio::spawn(async move {
            guard.scanner.scan_node(ip).await;
            drop(guard);
        });
    }

    /// Contacts `ip` and merges its reply into the cache
    pub async fn scan_node(&self, ip: Ipv4Addr) {
        let now = now_millis();
        let cached = lock(&self.inner.cache).get(&ip);
        let was_cached = cached.is_some();
        let mut node = cached.unwrap_or_else(|| PeerNode::new(ip));

        let cooldown = self.inner.config.rescan_cooldown.as_millis() as u64;
        if node.timestamp > 0 && now.saturating_sub(node.timestamp) < cooldown {
            trace!("{ip} contacted recently, skipping");
            return;
        }

        match self.inner.protocol.request_peer_list(ip).await {
            Ok(reply) => node.apply_reply(reply, now),
            Err(e) => {
                debug!("No reply from {ip}: {e}");
                node.status = PeerStatus::Error;
                node.uptimestamp = 0;
            }
        }

        let healthy = node.status.is_ok();
        if healthy {
            if let Some(geo) = &self.inner.geo {
                match geo.locate(ip).await {
                    Ok(info) => node.geo = Some(info),
                    Err(e) => debug!("Geolocation of {ip} failed: {e}"),
                }
            }
        }

        let newly_found = {
            let mut cache = lock(&self.inner.cache);
            let present = cache.contains(&ip);

            if healthy && !present {
                if !is_private_ipv4(&ip) {
                    cache.insert(node.clone());
                }
                true
            } else {
                if healthy {
                    cache.insert(node.clone());
                } else if was_cached {
                    cache.update(node.clone());
                }
                false
            }
        };

        if newly_found {
            debug!("Discovered {ip} with {} peers", node.peers.len());
            for peer in &node.peers {
                self.scan(*peer);
            }
        }

        self.inner.sink.emit(IndexerEvent::Network(Box::new(node)));
    }

    /// Cached nodes matching `filter`, in `order`
    pub fn get_peers(&self, filter: &PeerFilter, order: PeerOrder) -> Vec<PeerNode> {
        let mut nodes: Vec<PeerNode> = lock(&self.inner.cache)
            .nodes()
            .into_iter()
            .filter(|node| filter.matches(node))
            .collect();

        match order {
            PeerOrder::Ip => nodes.sort_by_key(|node| node.ip.to_string()),
            PeerOrder::Best => {
                nodes.sort_by(|a, b| {
                    b.chain_weight
                        .cmp(&a.chain_weight)
                        .then(b.uptime().cmp(&a.uptime()))
                })
            }
        }
        nodes
    }

    /// Majority chain tip of the healthy cached nodes
    pub fn chain_consensus(&self) -> Option<ChainTip> {
        chain_consensus(&self.get_peers(&PeerFilter::healthy(), PeerOrder::Best))
    }

    /// Asks up to `limit` of the best healthy peers for the same fact
    pub async fn consensus<T, F, Fut>(&self, limit: usize, query: F) -> Consensus<T>
    where
        T: PartialEq,
        F: Fn(Ipv4Addr) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let peers: Vec<Ipv4Addr> = self
            .get_peers(&PeerFilter::healthy(), PeerOrder::Best)
            .into_iter()
            .take(limit)
            .map(|node| node.ip)
            .collect();
        select_consensus(&peers, query).await
    }

    /// Directly caches `node`
    pub fn insert(&self, node: PeerNode) {
        lock(&self.inner.cache).insert(node);
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }
}
