use super::json_response;
use crate::network::{ChainWeight, PeerFilter, PeerOrder, PeerScanner, PeerStatus};
use actix_web::{
    get,
    web::{self, Data},
    HttpResponse,
};
use log::debug;
use serde::Deserialize;
use std::net::Ipv4Addr;

#[derive(Debug, Deserialize)]
struct NetworkParams {
    ip: Option<Ipv4Addr>,
    status: Option<PeerStatus>,
    chain_height: Option<u64>,
    chain_hash: Option<String>,
    chain_weight: Option<ChainWeight>,
    order: Option<PeerOrder>,
}

impl NetworkParams {
    fn into_filter(self) -> (PeerFilter, PeerOrder) {
        let filter = PeerFilter {
            ip: self.ip,
            status: self.status,
            chain_height: self.chain_height,
            chain_hash: self.chain_hash,
            chain_weight: self.chain_weight,
        };
        (filter, self.order.unwrap_or_default())
    }
}

fn unavailable() -> HttpResponse {
    debug!("Network query without a running peer scanner");
    HttpResponse::ServiceUnavailable().body("peer scanner is not running")
}

#[get("/network")]
pub async fn get_network(
    scanner: Data<Option<PeerScanner>>,
    params: web::Query<NetworkParams>,
) -> HttpResponse {
    let Some(scanner) = scanner.get_ref().as_ref() else {
        return unavailable();
    };
    let (filter, order) = params.into_inner().into_filter();
    json_response(&scanner.get_peers(&filter, order))
}

#[get("/network/consensus")]
pub async fn get_consensus(scanner: Data<Option<PeerScanner>>) -> HttpResponse {
    let Some(scanner) = scanner.get_ref().as_ref() else {
        return unavailable();
    };
    match scanner.chain_consensus() {
        Some(tip) => json_response(&tip),
        None => HttpResponse::NotFound().finish(),
    }
}
