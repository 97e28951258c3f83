//! Deleted-Revision Reconstructor (§4.9): joins archive/revision rows to
//! deletion log entries, disambiguating by timestamp and batch-membership
//! heuristics.

use chrono::{DateTime, NaiveDateTime, Utc};
use dispatch_core::revision::{
    DeletionCause, DeletionLogEntry, DeletionParams, HiddenFlags, PageDeletionCause, PageRef,
    RevisionData,
};
use dispatch_core::DeletedPage;
use dispatch_php_params::mentions_revid;
use dispatch_query::{QueryComposer, QueryParam, RevTable};
use sqlx::MySqlPool;
use std::collections::HashMap;
use thiserror::Error;

const LOG_CANDIDATE_BATCH: usize = 50;
const LARGEST_EDITS_PAGE_SIZE: usize = 50;

#[derive(Debug, Error)]
pub enum ReconstructError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("malformed log_params on log id {0}: {1}")]
    BadLogParams(u64, dispatch_php_params::ParseError),
    #[error("no actor named `{0}` could be found on this wiki")]
    ActorNotFound(String),
}

#[derive(Debug, sqlx::FromRow)]
struct ActorIdRow {
    actor_id: i64,
}

/// Resolves a registered user's display name to the replica's `actor_id`,
/// the join key `rev_actor`/`ar_actor` are keyed on (§4.5).
pub async fn lookup_actor_id(pool: &MySqlPool, user_name: &str) -> Result<Option<u64>, sqlx::Error> {
    let row: Option<ActorIdRow> =
        sqlx::query_as("SELECT actor_id FROM actor WHERE actor_name = ?")
            .bind(user_name)
            .fetch_optional(pool)
            .await?;
    Ok(row.map(|r| r.actor_id as u64))
}

fn parse_mw_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Runs a `QueryComposer`-rendered statement, decoding each row into `T`.
/// `T` is a `FromRow` struct named after the join it comes from, per the
/// fixed-schema-per-query-shape convention used throughout this module.
async fn run_query<T>(pool: &MySqlPool, sql: &str, binds: &[QueryParam]) -> Result<Vec<T>, sqlx::Error>
where
    T: for<'r> sqlx::FromRow<'r, sqlx::mysql::MySqlRow> + Send + Unpin,
{
    let mut query = sqlx::query_as::<_, T>(sql);
    for bind in binds {
        query = match bind {
            QueryParam::Str(s) => query.bind(s.clone()),
            QueryParam::I64(n) => query.bind(*n),
            QueryParam::U64(n) => query.bind(*n as i64),
        };
    }
    query.fetch_all(pool).await
}

/// Row shape for the batched `logging` lookup in [`fetch_log_candidates`].
#[derive(Debug, sqlx::FromRow)]
struct LoggingDeleteRevisionRow {
    log_id: i64,
    log_timestamp: String,
    log_params: String,
    actor_name: Option<String>,
    comment_text: Option<String>,
}

struct LogCandidate {
    logid: u64,
    timestamp: DateTime<Utc>,
    actor: Option<String>,
    comment: Option<String>,
    params_raw: String,
}

/// Step 2+3 (§4.9): fetch `delete`/`revision` log rows whose `log_params`
/// textually mentions any of `revids` (batched in groups of
/// `LOG_CANDIDATE_BATCH`), parsed with the dedicated `php_params` module
/// rather than ad-hoc string splitting.
async fn fetch_log_candidates(
    pool: &MySqlPool,
    revids: &[u64],
) -> Result<Vec<LogCandidate>, ReconstructError> {
    let mut candidates = Vec::new();
    for chunk in revids.chunks(LOG_CANDIDATE_BATCH) {
        let like_clauses = chunk
            .iter()
            .map(|_| "log_params LIKE ?")
            .collect::<Vec<_>>()
            .join(" OR ");
        let sql = format!(
            "SELECT log_id, log_timestamp, log_actor, log_comment_id, log_params, \
             (SELECT comment_text FROM comment WHERE comment_id = logging.log_comment_id) AS comment_text, \
             (SELECT actor_name FROM actor WHERE actor_id = logging.log_actor) AS actor_name \
             FROM logging WHERE log_type = 'delete' AND log_action = 'revision' AND ({like_clauses}) \
             ORDER BY log_timestamp ASC"
        );
        let binds: Vec<QueryParam> = chunk
            .iter()
            .map(|id| QueryParam::Str(format!("%i:{id};%")))
            .collect();
        let rows: Vec<LoggingDeleteRevisionRow> = run_query(pool, &sql, &binds).await?;
        for row in rows {
            let Some(timestamp) = parse_mw_timestamp(&row.log_timestamp) else {
                continue;
            };
            candidates.push(LogCandidate {
                logid: row.log_id as u64,
                timestamp,
                actor: row.actor_name,
                comment: row.comment_text,
                params_raw: row.log_params,
            });
        }
    }
    Ok(candidates)
}

/// Step 4 (§4.9): build the revid → {entry, first_few} index. Candidates
/// must already be sorted ascending by timestamp so a later
/// `HashMap::insert` naturally overwrites an earlier one when two log
/// entries both claim the same revid.
fn build_log_index(
    candidates: &[LogCandidate],
) -> Result<HashMap<u64, (DeletionLogEntry, Vec<u64>)>, ReconstructError> {
    let mut index = HashMap::new();
    for candidate in candidates {
        let parsed = dispatch_php_params::parse(&candidate.params_raw)
            .map_err(|e| ReconstructError::BadLogParams(candidate.logid, e))?;
        let first_few: Vec<u64> = parsed.ids.iter().take(3).copied().collect();
        let entry = DeletionLogEntry {
            logid: candidate.logid,
            timestamp: candidate.timestamp,
            actor: candidate.actor.clone(),
            comment: candidate.comment.clone(),
            tags: Default::default(),
            params: DeletionParams {
                kind: parsed.kind.clone(),
                ids: parsed.ids.clone(),
                old_flags: parsed.old_flags,
                new_flags: parsed.new_flags,
            },
        };
        for &revid in &parsed.ids {
            index.insert(revid, (entry.clone(), first_few.clone()));
        }
    }
    Ok(index)
}

/// Row shape for the `revision` ⋈ `page` join in
/// [`reconstruct_deleted_revisions_for_actor`].
#[derive(Debug, sqlx::FromRow)]
struct RevisionPageJoinRow {
    rev_id: i64,
    rev_parent_id: Option<i64>,
    rev_timestamp: String,
    rev_deleted: u8,
    rev_len: i64,
    rev_minor_edit: i8,
    page_id: i64,
    page_namespace: i32,
    page_title: String,
}

/// Step 1 and step 5 (§4.9): revision-deletion reconstruction for one
/// actor. Ordered by timestamp descending, matching the replica's
/// `revision_userindex` access pattern.
pub async fn reconstruct_deleted_revisions_for_actor(
    pool: &MySqlPool,
    actor_id: u64,
) -> Result<Vec<RevisionData>, ReconstructError> {
    let mut q = QueryComposer::new(RevTable::Revision, "rev");
    q.select(
        "rev",
        &["rev_id", "rev_parent_id", "rev_timestamp", "rev_deleted", "rev_len", "rev_minor_edit"],
    );
    q.join_page();
    q.select("page", &["page_id", "page_namespace", "page_title"]);
    q.where_raw("rev.rev_actor = ?", [QueryParam::U64(actor_id)]);
    q.where_raw("rev.rev_deleted > 0", []);
    let (sql, binds) = q.order_by("rev.rev_timestamp DESC", true);
    let rows: Vec<RevisionPageJoinRow> = run_query(pool, &sql, &binds).await?;

    let revids: Vec<u64> = rows.iter().map(|row| row.rev_id as u64).collect();
    let candidates = fetch_log_candidates(pool, &revids).await?;
    let log_index = build_log_index(&candidates)?;

    let mut revisions = Vec::with_capacity(rows.len());
    for row in rows {
        let revid = row.rev_id as u64;
        let hidden = HiddenFlags::from_bitmask(row.rev_deleted);
        let deleted = match log_index.get(&revid) {
            Some((entry, first_few)) => DeletionCause::LogEntry {
                entry: entry.clone(),
                is_likely_cause: first_few.contains(&revid),
            },
            None => DeletionCause::Unknown,
        };
        revisions.push(RevisionData {
            revid,
            parentid: row.rev_parent_id.map(|p| p as u64).filter(|p| *p != 0),
            minor: row.rev_minor_edit != 0,
            user: None,
            timestamp: parse_mw_timestamp(&row.rev_timestamp),
            size: row.rev_len as u64,
            comment: None,
            parsed_comment: None,
            tags: Default::default(),
            page: PageRef {
                pageid: row.page_id as u64,
                namespace: row.page_namespace,
                prefixed_title: row.page_title,
            },
            diffsize: None,
            hidden,
            visibility: None,
            deleted: Some(deleted),
        });
    }
    Ok(revisions)
}

/// Row shape for the `archive` ⟕ `logging` deletion-log join in
/// [`reconstruct_deleted_pages_for_actor`].
#[derive(Debug, sqlx::FromRow)]
struct ArchiveDeletionLogRow {
    ar_page_id: Option<i64>,
    ar_namespace: i32,
    ar_title: String,
    ar_timestamp: String,
    ar_len: i64,
    log_id: Option<i64>,
    log_title: Option<String>,
    log_timestamp: Option<String>,
}

/// One archive row with its deletion-log candidate resolved down to a
/// single row (see [`reconstruct_deleted_pages_for_actor`]).
struct ResolvedArchiveRow {
    ar_page_id: Option<i64>,
    ar_namespace: i32,
    ar_title: String,
    ar_timestamp: DateTime<Utc>,
    ar_len: i64,
    log_id: Option<i64>,
    log_title: Option<String>,
    log_timestamp: Option<DateTime<Utc>>,
}

/// For deleted pages (pre-modern schema, §4.9): resolves the deletion log
/// row closest from above the archive timestamp; `guessed` is set when the
/// log's page id doesn't match or no exact match exists.
pub async fn reconstruct_deleted_pages_for_actor(
    pool: &MySqlPool,
    actor_id: u64,
) -> Result<Vec<DeletedPage>, ReconstructError> {
    let mut q = QueryComposer::new(RevTable::Archive, "ar");
    q.select(
        "ar",
        &["ar_page_id", "ar_namespace", "ar_title", "ar_timestamp", "ar_len"],
    );
    q.join_deletion_log();
    q.select("logging", &["log_id", "log_namespace", "log_title", "log_timestamp"]);
    q.where_raw("ar.ar_actor = ?", [QueryParam::U64(actor_id)]);
    let (sql, binds) = q.order_by("ar.ar_timestamp ASC, logging.log_timestamp ASC", true);
    let rows: Vec<ArchiveDeletionLogRow> = run_query(pool, &sql, &binds).await?;

    // The deletion-log join can produce several candidate logging rows per
    // archive row; the query orders candidates ascending by log_timestamp
    // within each archive row (the join already guarantees log_timestamp is
    // strictly after ar_timestamp), so the first candidate kept per archive
    // row is the one closest from above.
    let mut resolved: HashMap<(i32, String, String), ResolvedArchiveRow> = HashMap::new();
    for row in rows {
        let key = (row.ar_namespace, row.ar_title.clone(), row.ar_timestamp.clone());
        resolved.entry(key).or_insert_with(|| ResolvedArchiveRow {
            ar_page_id: row.ar_page_id,
            ar_namespace: row.ar_namespace,
            ar_title: row.ar_title,
            ar_timestamp: parse_mw_timestamp(&row.ar_timestamp).unwrap_or_else(Utc::now),
            ar_len: row.ar_len,
            log_id: row.log_id,
            log_title: row.log_title,
            log_timestamp: row.log_timestamp.as_deref().and_then(parse_mw_timestamp),
        });
    }

    // Collapse to one entry per page; rows arrive ascending by archive
    // timestamp so the first one kept is the earliest deletion.
    let mut by_page: HashMap<(i32, String), DeletedPage> = HashMap::new();
    for row in resolved.into_values() {
        let key = (row.ar_namespace, row.ar_title.clone());
        if by_page.contains_key(&key) {
            continue;
        }

        let cause = match row.log_id {
            Some(log_id) => {
                let guessed = row.log_title.as_deref() != Some(row.ar_title.as_str());
                PageDeletionCause::LogEntry {
                    entry: DeletionLogEntry {
                        logid: log_id as u64,
                        timestamp: row.log_timestamp.unwrap_or(row.ar_timestamp),
                        actor: None,
                        comment: None,
                        tags: Default::default(),
                        params: DeletionParams {
                            kind: "delete".to_string(),
                            ids: Vec::new(),
                            old_flags: HiddenFlags::default(),
                            new_flags: HiddenFlags::default(),
                        },
                    },
                    guessed,
                }
            }
            None => PageDeletionCause::Unknown,
        };

        by_page.insert(
            key,
            DeletedPage {
                pageid: row.ar_page_id.map(|p| p as u64),
                namespace: row.ar_namespace,
                title: row.ar_title,
                created: row.ar_timestamp,
                length: row.ar_len as u64,
                cause,
            },
        );
    }
    Ok(by_page.into_values().collect())
}

/// Row shape for the diffsize-ranked `revision` ⋈ `parent_revision` ⋈
/// `page` join in [`rank_largest_edits_for_actor`].
#[derive(Debug, sqlx::FromRow)]
struct LargestEditRow {
    rev_id: i64,
    rev_parent_id: Option<i64>,
    rev_timestamp: String,
    rev_deleted: u8,
    rev_len: i64,
    rev_minor_edit: i8,
    page_id: i64,
    page_namespace: i32,
    page_title: String,
    parent_len: Option<i64>,
}

/// Ranks an actor's edits by absolute diffsize, largest first (§4.5). An
/// edit tagged `mw-reverted` is excluded unless `with_reverts` is set;
/// `without_tags` excludes any additional caller-supplied tags.
pub async fn rank_largest_edits_for_actor(
    pool: &MySqlPool,
    actor_id: u64,
    namespaces: Option<&[i32]>,
    with_reverts: bool,
    without_tags: Option<&[String]>,
    offset: u64,
) -> Result<Vec<RevisionData>, ReconstructError> {
    let mut q = QueryComposer::new(RevTable::Revision, "rev");
    q.select(
        "rev",
        &["rev_id", "rev_parent_id", "rev_timestamp", "rev_deleted", "rev_len", "rev_minor_edit"],
    );
    q.join_page();
    q.select("page", &["page_id", "page_namespace", "page_title"]);
    q.join_parents();
    q.select("", &["parent_revision.rev_len AS parent_len"]);
    q.where_raw("rev.rev_actor = ?", [QueryParam::U64(actor_id)]);

    if let Some(namespaces) = namespaces.filter(|ns| !ns.is_empty()) {
        let placeholders = namespaces.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        q.where_raw(
            format!("page.page_namespace IN ({placeholders})"),
            namespaces.iter().map(|ns| QueryParam::I64(*ns as i64)),
        );
    }

    let mut excluded_tags: Vec<String> = without_tags.map(|t| t.to_vec()).unwrap_or_default();
    if !with_reverts {
        excluded_tags.push("mw-reverted".to_string());
    }
    if !excluded_tags.is_empty() {
        q.lacks_tag(&excluded_tags);
    }

    let (sql, binds) = q.order_by("ABS(rev.rev_len - parent_revision.rev_len) DESC", true);
    let sql = format!("{sql} LIMIT {LARGEST_EDITS_PAGE_SIZE} OFFSET ?");
    let mut binds = binds;
    binds.push(QueryParam::U64(offset));
    let rows: Vec<LargestEditRow> = run_query(pool, &sql, &binds).await?;

    let mut revisions = Vec::with_capacity(rows.len());
    for row in rows {
        let mut revision = RevisionData {
            revid: row.rev_id as u64,
            parentid: row.rev_parent_id.map(|p| p as u64).filter(|p| *p != 0),
            minor: row.rev_minor_edit != 0,
            user: None,
            timestamp: parse_mw_timestamp(&row.rev_timestamp),
            size: row.rev_len as u64,
            comment: None,
            parsed_comment: None,
            tags: Default::default(),
            page: PageRef {
                pageid: row.page_id as u64,
                namespace: row.page_namespace,
                prefixed_title: row.page_title,
            },
            diffsize: None,
            hidden: HiddenFlags::from_bitmask(row.rev_deleted),
            visibility: None,
            deleted: None,
        };
        revision.compute_diffsize(row.parent_len.map(|n| n as u64));
        revisions.push(revision);
    }
    Ok(revisions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_index_lets_later_timestamp_win_on_conflicting_revid() {
        let older = LogCandidate {
            logid: 1,
            timestamp: DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z").unwrap().into(),
            actor: None,
            comment: None,
            params_raw: r#"a:3:{s:4:"type";s:8:"revision";s:3:"ids";a:1:{i:0;i:42;}s:3:"old";i:0;}"#.to_string(),
        };
        let newer = LogCandidate {
            logid: 2,
            timestamp: DateTime::parse_from_rfc3339("2020-02-01T00:00:00Z").unwrap().into(),
            actor: None,
            comment: None,
            params_raw: r#"a:3:{s:4:"type";s:8:"revision";s:3:"ids";a:1:{i:0;i:42;}s:3:"old";i:0;}"#.to_string(),
        };
        let index = build_log_index(&[older, newer]).unwrap();
        let (entry, _) = index.get(&42).unwrap();
        assert_eq!(entry.logid, 2);
    }

    #[test]
    fn mentions_revid_prefilters_before_full_parse() {
        let raw = r#"a:1:{s:3:"ids";a:1:{i:0;i:777;}}"#;
        assert!(mentions_revid(raw, 777));
    }
}
