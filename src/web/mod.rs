pub mod rest;
pub mod stream;

use self::rest::{blocks, ledger, network, transactions};
use crate::{event::Broadcaster, network::PeerScanner, store::Persistence};
use actix_cors::Cors;
use actix_web::{
    middleware,
    web::{Data, ServiceConfig},
    App, HttpServer,
};
use std::{net, sync::Arc};
use tokio_graceful_shutdown::{FutureExt, SubsystemHandle};

/// Everything the handlers read from
#[derive(Clone)]
pub struct WebState {
    pub store: Arc<dyn Persistence>,
    pub broadcaster: Broadcaster,

    /// `None` when network scanning is disabled
    pub scanner: Option<PeerScanner>,
}

impl WebState {
    pub fn configure(&self, cfg: &mut ServiceConfig) {
        cfg.app_data(Data::new(self.store.clone()))
            .app_data(Data::new(self.broadcaster.clone()))
            .app_data(Data::new(self.scanner.clone()))
            .service(blocks::get_blocks)
            .service(blocks::get_block)
            .service(transactions::get_transactions)
            .service(transactions::get_transaction)
            .service(ledger::get_richlist)
            .service(ledger::get_balances)
            .service(network::get_consensus)
            .service(network::get_network)
            .service(stream::get_stream);
    }
}

pub async fn start_web_server<A: net::ToSocketAddrs>(
    subsys: SubsystemHandle,
    state: WebState,
    addrs: A,
) -> anyhow::Result<()> {
    let server = HttpServer::new(move || {
        App::new()
            .configure(|cfg| state.configure(cfg))
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
    })
    .bind(addrs)?;

    let _ = server.run().cancel_on_shutdown(&subsys).await;
    Ok(())
}
