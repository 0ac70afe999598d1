pub mod blocks;
pub mod ledger;
pub mod network;
pub mod transactions;

use crate::store::{query::parse_search, Persistence, Query, QueryError, StoreError, Table};
use actix_web::{http::header::ContentType, HttpResponse};
use log::error;
use serde::Serialize;

pub(crate) fn json_response<T: Serialize + ?Sized>(value: &T) -> HttpResponse {
    match serde_json::to_string(value) {
        Ok(body) => HttpResponse::Ok()
            .content_type(ContentType::json())
            .body(body),
        Err(e) => {
            error!("Error serializing response: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Percent-decodes a raw query string, leaving malformed escapes as is
pub(crate) fn decode_query(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                match hex::decode(&bytes[i + 1..i + 3]) {
                    Ok(byte) => {
                        decoded.extend(byte);
                        i += 3;
                        continue;
                    }
                    Err(_) => decoded.push(b'%'),
                }
            }
            b'+' => decoded.push(b' '),
            b => decoded.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&decoded).into_owned()
}

fn parse_table_query(table: Table, raw: &str) -> Result<Query, QueryError> {
    let query = parse_search(&decode_query(raw))?;
    query.validate(table)?;
    Ok(query)
}

/// Runs a search over `table`, ordering by `default_order` unless the search
/// says otherwise
pub(crate) async fn search(
    store: &dyn Persistence,
    table: Table,
    raw: &str,
    default_order: (&str, bool),
) -> HttpResponse {
    let mut query = match parse_table_query(table, raw) {
        Ok(query) => query,
        Err(e) => return HttpResponse::BadRequest().body(e.to_string()),
    };
    if query.order_by.is_none() {
        let (column, descending) = default_order;
        query = query.order_by(column, descending);
    }

    match store.query(table, &query).await {
        Ok(rows) => json_response(&rows),
        Err(StoreError::Query(e)) => HttpResponse::BadRequest().body(e.to_string()),
        Err(e) => {
            error!("Error querying {table}: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}

/// Every row of `table` matching `query`, 404 when there are none
pub(crate) async fn lookup(store: &dyn Persistence, table: Table, query: Query) -> HttpResponse {
    match store.query(table, &query).await {
        Ok(rows) if rows.is_empty() => HttpResponse::NotFound().finish(),
        Ok(rows) => json_response(&rows),
        Err(e) => {
            error!("Error querying {table}: {e}");
            HttpResponse::InternalServerError().finish()
        }
    }
}
