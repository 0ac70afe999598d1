use super::{lookup, search};
use crate::store::{Comparison, Persistence, Query, Table};
use actix_web::{
    get,
    web::{self, Data},
    HttpRequest, HttpResponse,
};
use std::sync::Arc;

#[get("/transactions")]
pub async fn get_transactions(store: Data<Arc<dyn Persistence>>, req: HttpRequest) -> HttpResponse {
    search(store.get_ref().as_ref(), Table::Transactions, req.query_string(), ("created", true)).await
}

/// Confirmed and unconfirmed rows of `txid`
#[get("/transaction/{txid}")]
pub async fn get_transaction(store: Data<Arc<dyn Persistence>>, txid: web::Path<String>) -> HttpResponse {
    let txid = txid.into_inner().to_lowercase();
    let query = Query::new().filter("txid", Comparison::Eq, txid);
    lookup(store.get_ref().as_ref(), Table::Transactions, query).await
}
