//! Removal-filter compilation.
//!
//! A removal request is an AND over [`RemovalFilter`] predicates; this module
//! compiles the set once into a WHERE clause plus an ordered bind list for
//! the runtime query builder. The attachment table is aliased `a`, the host
//! `messages`/`members` projections `m` and `mb`.

use palaver_core::models::RemovalFilter;

/// A deferred bind value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlArg {
    I64(i64),
}

/// Compile a conjunction of filters into (`WHERE` body, binds).
///
/// An empty filter slice compiles to a never-matching clause; destructive
/// operations require an explicit predicate.
pub fn compile(filters: &[RemovalFilter]) -> (String, Vec<SqlArg>) {
    if filters.is_empty() {
        return ("0".to_string(), Vec::new());
    }

    let mut clauses = Vec::with_capacity(filters.len());
    let mut args = Vec::new();
    for filter in filters {
        let (clause, mut binds) = clause_for(filter);
        clauses.push(clause);
        args.append(&mut binds);
    }
    (clauses.join(" AND "), args)
}

fn in_list(column: &str, ids: &[i64]) -> (String, Vec<SqlArg>) {
    if ids.is_empty() {
        // IN () is a syntax error; an empty id set matches nothing.
        return ("0".to_string(), Vec::new());
    }
    let placeholders = vec!["?"; ids.len()].join(", ");
    (
        format!("{} IN ({})", column, placeholders),
        ids.iter().copied().map(SqlArg::I64).collect(),
    )
}

fn clause_for(filter: &RemovalFilter) -> (String, Vec<SqlArg>) {
    match filter {
        RemovalFilter::Ids(ids) => in_list("a.id", ids),
        RemovalFilter::Members(ids) => in_list("a.member_id", ids),
        RemovalFilter::Messages(ids) => in_list("a.message_id", ids),
        RemovalFilter::NormalOnly => ("a.kind = 0".to_string(), Vec::new()),
        RemovalFilter::PostedBefore(when) => (
            "m.posted_at < ?".to_string(),
            vec![SqlArg::I64(when.timestamp())],
        ),
        RemovalFilter::LastLoginBefore(when) => (
            "mb.last_login < ?".to_string(),
            vec![SqlArg::I64(when.timestamp())],
        ),
        RemovalFilter::LargerThan(bytes) => {
            ("a.size_bytes > ?".to_string(), vec![SqlArg::I64(*bytes)])
        }
        RemovalFilter::Not(inner) => {
            let (clause, binds) = clause_for(inner);
            (format!("NOT ({})", clause), binds)
        }
    }
}
