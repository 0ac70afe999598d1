use super::{lookup, search};
use crate::store::{Comparison, Persistence, Query, Table};
use actix_web::{
    get,
    web::{self, Data},
    HttpRequest, HttpResponse,
};
use std::sync::Arc;

#[get("/blocks")]
pub async fn get_blocks(store: Data<Arc<dyn Persistence>>, req: HttpRequest) -> HttpResponse {
    search(store.get_ref().as_ref(), Table::Blocks, req.query_string(), ("bnum", true)).await
}

/// Every block stored at height `bnum`, forks included
#[get("/block/{bnum}")]
pub async fn get_block(store: Data<Arc<dyn Persistence>>, bnum: web::Path<u64>) -> HttpResponse {
    let query = Query::new()
        .filter("bnum", Comparison::Eq, bnum.into_inner())
        .order_by("created", true);
    lookup(store.get_ref().as_ref(), Table::Blocks, query).await
}
