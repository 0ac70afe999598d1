//! Typed filter/order/limit/offset queries over table rows, and the parser
//! for the HTTP search syntax (`bnum>=256&type=neogenesis|maddr=ab*`)

use super::row::{Row, Table, Value};
use crate::constants::{QUERY_LIMIT_DEFAULT, QUERY_LIMIT_MAX};
use regex::Regex;
use std::{cmp::Ordering, sync::OnceLock};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("unknown column {column:?} for table {table}")]
    UnknownColumn { table: Table, column: String },

    #[error("invalid search term {0:?}")]
    InvalidTerm(String),

    #[error("invalid {key} value {value:?}")]
    InvalidNumber { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conjunction {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub struct Condition {
    pub column: String,
    pub op: Comparison,
    pub value: Value,
    pattern: Option<Regex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

#[derive(Debug, Clone, Default)]
pub struct Query {
    pub conditions: Vec<(Conjunction, Condition)>,
    pub order_by: Option<OrderBy>,

    /// `None` is unbounded
    pub limit: Option<usize>,
    pub offset: usize,
}

/// Translates a LIKE pattern (`%` any run, `_` any char) to an anchored regex
fn like_pattern(pattern: &str) -> Regex {
    let mut re = String::from("^");
    for c in pattern.chars() {
        match c {
            '%' => re.push_str(".*"),
            '_' => re.push('.'),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    Regex::new(&re).unwrap_or_else(|_| Regex::new("$^").expect("empty regex compiles"))
}

impl Condition {
    pub fn new(column: &str, op: Comparison, value: impl Into<Value>) -> Self {
        let value = value.into();
        let pattern = match op {
            Comparison::Like | Comparison::NotLike => Some(like_pattern(&value.to_string())),
            _ => None,
        };

        Self {
            column: column.to_string(),
            op,
            value,
            pattern,
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        let Some(actual) = row.column(&self.column) else {
            return false;
        };

        if let Some(pattern) = &self.pattern {
            if actual == Value::Null {
                return false;
            }
            let is_match = pattern.is_match(&actual.to_string());
            return (self.op == Comparison::Like) == is_match;
        }

        match actual.compare(&self.value) {
            None => false,
            Some(ord) => match self.op {
                Comparison::Eq => ord == Ordering::Equal,
                Comparison::Ne => ord != Ordering::Equal,
                Comparison::Lt => ord == Ordering::Less,
                Comparison::Le => ord != Ordering::Greater,
                Comparison::Gt => ord == Ordering::Greater,
                Comparison::Ge => ord != Ordering::Less,
                Comparison::Like | Comparison::NotLike => false,
            },
        }
    }
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// AND condition
    pub fn filter(mut self, column: &str, op: Comparison, value: impl Into<Value>) -> Self {
        self.conditions
            .push((Conjunction::And, Condition::new(column, op, value)));
        self
    }

    /// OR condition
    pub fn or_filter(mut self, column: &str, op: Comparison, value: impl Into<Value>) -> Self {
        self.conditions
            .push((Conjunction::Or, Condition::new(column, op, value)));
        self
    }

    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            column: column.to_string(),
            descending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Checks every referenced column exists in `table`
    pub fn validate(&self, table: Table) -> Result<(), QueryError> {
        let columns = table.columns();
        let referenced = self
            .conditions
            .iter()
            .map(|(_, c)| c.column.as_str())
            .chain(self.order_by.iter().map(|o| o.column.as_str()));

        for column in referenced {
            if !columns.contains(&column) {
                return Err(QueryError::UnknownColumn {
                    table,
                    column: column.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Conditions are folded left to right
    pub fn matches(&self, row: &Row) -> bool {
        let mut conditions = self.conditions.iter();
        let Some((_, first)) = conditions.next() else {
            return true;
        };

        conditions.fold(first.matches(row), |acc, (conjunction, condition)| {
            match conjunction {
                Conjunction::And => acc && condition.matches(row),
                Conjunction::Or => acc || condition.matches(row),
            }
        })
    }

    /// Filters, orders and paginates `rows`
    pub fn apply(&self, rows: impl IntoIterator<Item = Row>) -> Vec<Row> {
        let mut rows: Vec<Row> = rows.into_iter().filter(|row| self.matches(row)).collect();

        if let Some(order) = &self.order_by {
            rows.sort_by(|a, b| {
                let ord = match (a.column(&order.column), b.column(&order.column)) {
                    (Some(a), Some(b)) => a.compare(&b).unwrap_or_else(|| {
                        // nulls first
                        (a != Value::Null).cmp(&(b != Value::Null))
                    }),
                    _ => Ordering::Equal,
                };
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        rows.into_iter()
            .skip(self.offset)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect()
    }
}

fn term_regex() -> &'static Regex {
    static TERM: OnceLock<Regex> = OnceLock::new();
    TERM.get_or_init(|| {
        Regex::new(r"^([0-9a-z_]+)(?:(<>|<=|>=|<|>|=)(.*))?$").expect("search term regex compiles")
    })
}

fn parse_value(raw: &str) -> Value {
    let is_plain_number = !raw.is_empty()
        && (raw == "0" || !raw.starts_with('0'))
        && raw.trim_start_matches('-').chars().all(|c| c.is_ascii_digit());

    match raw.parse::<i128>() {
        Ok(n) if is_plain_number => Value::Int(n),
        _ => Value::Text(raw.to_string()),
    }
}

fn parse_number(key: &'static str, value: &str) -> Result<usize, QueryError> {
    value.parse().map_err(|_| QueryError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

/// Parses an HTTP search string into a [Query].
///
/// Terms are separated by `&` (AND) or `|` (OR). `limit` is capped at
/// [QUERY_LIMIT_MAX] and defaults to [QUERY_LIMIT_DEFAULT].
pub fn parse_search(search: &str) -> Result<Query, QueryError> {
    let mut query = Query::new().limit(QUERY_LIMIT_DEFAULT);
    let search = search.trim_start_matches('?');
    let mut conjunction = Conjunction::And;
    let mut rest = search;

    while !rest.is_empty() {
        let end = rest.find(['&', '|']).unwrap_or(rest.len());
        let term = &rest[..end];
        let next = match rest[end..].chars().next() {
            Some('|') => Conjunction::Or,
            _ => Conjunction::And,
        };
        rest = rest.get(end + 1..).unwrap_or_default();

        if !term.is_empty() {
            let caps = term_regex()
                .captures(term)
                .ok_or_else(|| QueryError::InvalidTerm(term.to_string()))?;
            let column = &caps[1];
            let op = caps.get(2).map(|m| m.as_str());
            let raw = caps.get(3).map_or("", |m| m.as_str());

            match (column, op) {
                ("limit", Some("=")) => {
                    query.limit = Some(parse_number("limit", raw)?.min(QUERY_LIMIT_MAX))
                }
                ("offset", Some("=")) => query.offset = parse_number("offset", raw)?,
                ("orderby", Some("=")) => {
                    let (column, descending) = match raw.strip_suffix("-desc") {
                        Some(column) => (column, true),
                        None => (raw, false),
                    };
                    query = query.order_by(column, descending);
                }
                (_, Some(op)) => {
                    let wildcard = raw.contains('*');
                    let op = match op {
                        "=" if wildcard => Comparison::Like,
                        "<>" if wildcard => Comparison::NotLike,
                        "=" => Comparison::Eq,
                        "<>" => Comparison::Ne,
                        "<" => Comparison::Lt,
                        "<=" => Comparison::Le,
                        ">" => Comparison::Gt,
                        _ => Comparison::Ge,
                    };
                    let value = if wildcard {
                        Value::Text(raw.replace('*', "%"))
                    } else {
                        parse_value(raw)
                    };
                    query
                        .conditions
                        .push((conjunction, Condition::new(column, op, value)));
                }
                // bare keys select nothing
                (_, None) => (),
            }
        }
        conjunction = next;
    }
    Ok(query)
}
