use super::search;
use crate::store::{Persistence, Table};
use actix_web::{get, web::Data, HttpRequest, HttpResponse};
use std::sync::Arc;

#[get("/richlist")]
pub async fn get_richlist(store: Data<Arc<dyn Persistence>>, req: HttpRequest) -> HttpResponse {
    search(store.get_ref().as_ref(), Table::Richlist, req.query_string(), ("rank", false)).await
}

#[get("/balances")]
pub async fn get_balances(store: Data<Arc<dyn Persistence>>, req: HttpRequest) -> HttpResponse {
    search(store.get_ref().as_ref(), Table::Balances, req.query_string(), ("bnum", true)).await
}
