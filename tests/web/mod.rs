use crate::helpers::{blocks::*, setup_new_db_dir};
use actix_web::{http::StatusCode, test, App};
use mochimap_indexer::{
    block::{parser::BlockRecord, BlockHash},
    event::Broadcaster,
    network::{ChainWeight, NetworkConfig, PeerNode, PeerScanner, PeerStatus},
    store::{BlockRow, Persistence, Row, SpeedbStore},
    web::WebState,
};
use pretty_assertions::assert_eq;
use serde_json::Value;
use std::{net::Ipv4Addr, sync::Arc};

async fn state_with_blocks(dir: &std::path::Path, scanner: Option<PeerScanner>) -> WebState {
    let store: Arc<dyn Persistence> = Arc::new(SpeedbStore::open(dir).unwrap());
    let rows = (1..=3)
        .map(|bnum| {
            let bytes = pseudo_block(bnum, &BlockHash::default());
            Row::Block(BlockRow::from(&BlockRecord::from_bytes(&bytes).unwrap()))
        })
        .collect();
    store.bulk_load(rows).await.unwrap();

    WebState {
        store,
        broadcaster: Broadcaster::new(),
        scanner,
    }
}

fn bnums(rows: &[Value]) -> Vec<u64> {
    rows.iter().map(|row| row["bnum"].as_u64().unwrap()).collect()
}

#[actix_web::test]
async fn block_search() {
    let db_dir = setup_new_db_dir("mochimap-web-").unwrap();
    let state = state_with_blocks(db_dir.path(), None).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::get().uri("/blocks").to_request();
    let rows: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(bnums(&rows), vec![3, 2, 1]);

    let req = test::TestRequest::get()
        .uri("/blocks?bnum%3E=2&orderby=bnum")
        .to_request();
    let rows: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(bnums(&rows), vec![2, 3]);
    assert_eq!(rows[0]["type"], "pseudo");

    let req = test::TestRequest::get().uri("/blocks?limit=1&offset=1").to_request();
    let rows: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(bnums(&rows), vec![2]);

    let req = test::TestRequest::get().uri("/block/2").to_request();
    let rows: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    assert_eq!(bnums(&rows), vec![2]);
}

#[actix_web::test]
async fn bad_requests() {
    let db_dir = setup_new_db_dir("mochimap-web-").unwrap();
    let state = state_with_blocks(db_dir.path(), None).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    for (uri, status) in [
        ("/blocks?password=1", StatusCode::BAD_REQUEST),
        ("/blocks?orderby=nothing", StatusCode::BAD_REQUEST),
        ("/block/9", StatusCode::NOT_FOUND),
        ("/transaction/00", StatusCode::NOT_FOUND),
        ("/network", StatusCode::SERVICE_UNAVAILABLE),
        ("/network/consensus", StatusCode::SERVICE_UNAVAILABLE),
    ] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), status, "{uri}");
    }
}

#[actix_web::test]
async fn network_listing() {
    let protocol = Arc::new(crate::helpers::mocks::MockProtocol::default());
    let sink = Arc::new(Broadcaster::new());
    let scanner = PeerScanner::new(NetworkConfig::default(), protocol, None, sink);
    for (last, weight, status) in [
        (3, "0x01", PeerStatus::Ok),
        (1, "0x09", PeerStatus::Ok),
        (2, "0x05", PeerStatus::Timeout),
    ] {
        scanner.insert(PeerNode {
            status,
            chain_height: 50,
            chain_hash: "cd".repeat(32),
            chain_weight: ChainWeight::from(weight),
            ..PeerNode::new(Ipv4Addr::new(7, 7, 7, last))
        });
    }

    let db_dir = setup_new_db_dir("mochimap-web-").unwrap();
    let state = state_with_blocks(db_dir.path(), Some(scanner)).await;
    let app = test::init_service(App::new().configure(|cfg| state.configure(cfg))).await;

    let req = test::TestRequest::get().uri("/network").to_request();
    let nodes: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    let ips: Vec<&str> = nodes.iter().map(|n| n["ip"].as_str().unwrap()).collect();
    assert_eq!(ips, vec!["7.7.7.1", "7.7.7.2", "7.7.7.3"]);

    let req = test::TestRequest::get().uri("/network?status=ok&order=ip").to_request();
    let nodes: Vec<Value> = test::call_and_read_body_json(&app, req).await;
    let ips: Vec<&str> = nodes.iter().map(|n| n["ip"].as_str().unwrap()).collect();
    assert_eq!(ips, vec!["7.7.7.1", "7.7.7.3"]);

    let req = test::TestRequest::get().uri("/network/consensus").to_request();
    let tip: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(tip["height"], 50);
    assert_eq!(tip["count"], 2);
}
