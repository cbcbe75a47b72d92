//! Ranked full-text search over the `files_fts` index.
//!
//! Fuzzy matching is token-prefix expansion: each query token `foo` becomes
//! the FTS5 prefix phrase `"foo"*`, so `foo` matches `foobar`. Tokens are
//! quoted, which also neutralises FTS5 query syntax in user input.

use sqlx::SqlitePool;

use crate::error::StoreError;

/// Hard cap on hits returned by a single search.
pub const MAX_HITS: i64 = 500;

/// Expand a raw query into an FTS5 MATCH expression. Empty result means
/// there was nothing searchable in the input.
pub fn fts_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(|tok| tok.replace('"', ""))
        .filter(|tok| !tok.is_empty())
        .map(|tok| format!("\"{tok}\"*"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ranked search within one box. Returns file IDs, best match first,
/// excluding soft-deleted files.
pub async fn search(
    pool: &SqlitePool,
    box_id: &str,
    query: &str,
) -> Result<Vec<String>, StoreError> {
    let match_expr = fts_query(query);
    if match_expr.is_empty() {
        return Ok(Vec::new());
    }

    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT f.file_id \
         FROM files_fts \
         JOIN files f ON f.file_id = files_fts.file_id \
         WHERE files_fts MATCH ? AND f.box_id = ? AND f.soft_deleted = 0 \
         ORDER BY bm25(files_fts) \
         LIMIT ?",
    )
    .bind(&match_expr)
    .bind(box_id)
    .bind(MAX_HITS)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}
