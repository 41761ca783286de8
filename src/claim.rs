use chrono::Utc;
use diesel::prelude::*;
use diesel::sql_types::{Double, Integer};

use crate::error::{ClaimError, ClaimResult};
use crate::models::{ClaimedJob, STATUS_DONE, STATUS_ERROR, STATUS_PENDING};
use crate::schema::file_contents;

/// Calls the `claim_pending_file_content(n)` stored procedure. The
/// fetcher role holds EXECUTE on this function and nothing else — it
/// cannot read or write `file_contents` directly, so this is the
/// only query this role ever issues. The procedure itself performs the
/// `SELECT ... FOR UPDATE SKIP LOCKED` and the transition to `indexing`;
/// by the time rows reach us the lock has already been released (the
/// function commits internally), so the row lock is held only across the
/// `SELECT`/`UPDATE`, not for the lifetime of the job.
pub fn claim_pending(conn: &mut PgConnection, batch_size: i64) -> ClaimResult<Vec<ClaimedJob>> {
    let rows = diesel::sql_query("SELECT * FROM claim_pending_file_content($1)")
        .bind::<Integer, _>(batch_size as i32)
        .load::<ClaimedJob>(conn)
        .map_err(ClaimError::Database)?;
    Ok(rows)
}

/// Uploader-side settlement. The uploader role's grant is a column-scoped
/// `UPDATE ... WHERE content_hash = $1`; Diesel's query builder is used
/// here purely as a client for that one statement; the actual access
/// control is enforced by Postgres, not by this code.
pub fn mark_done(
    conn: &mut PgConnection,
    content_hash: &str,
    thumbnail_path: Option<&str>,
    extracted_text: Option<&str>,
) -> ClaimResult<()> {
    let now = Utc::now();
    diesel::update(file_contents::table.find(content_hash))
        .set((
            file_contents::processing_status.eq(STATUS_DONE),
            file_contents::thumbnail_path.eq(thumbnail_path),
            file_contents::thumbnail_generated_at.eq(thumbnail_path.map(|_| now)),
            file_contents::extracted_text.eq(extracted_text),
            file_contents::last_status_change.eq(now),
            file_contents::db_updated_at.eq(now),
        ))
        .execute(conn)
        .map_err(ClaimError::Database)?;
    Ok(())
}

pub fn mark_retry_or_error(
    conn: &mut PgConnection,
    content_hash: &str,
    try_count: i32,
    max_retries: i32,
) -> ClaimResult<()> {
    let now = Utc::now();
    let next_try = try_count + 1;
    let status = if next_try >= max_retries {
        STATUS_ERROR
    } else {
        STATUS_PENDING
    };

    diesel::update(file_contents::table.find(content_hash))
        .set((
            file_contents::processing_status.eq(status),
            file_contents::try_count.eq(next_try),
            file_contents::last_status_change.eq(now),
            file_contents::db_updated_at.eq(now),
        ))
        .execute(conn)
        .map_err(ClaimError::Database)?;
    Ok(())
}

/// Reclaims jobs whose `indexing` lease has expired: a row stuck in
/// `indexing` past `lease_timeout_seconds` means the component that
/// claimed it crashed or was killed mid-job
/// without ever reaching a `.done`/`.failed` marker. Bumps `try_count`
/// the same way a processing failure would and sends the row back to
/// `pending` (or `error`, once retries are exhausted) so it re-enters the
/// claimable pool. This is an operator-run sweep, not part of the
/// Fetcher/Orchestrator/Uploader loop, so it runs a single bulk UPDATE
/// rather than reading rows first.
pub fn sweep_stuck_indexing(
    conn: &mut PgConnection,
    lease_timeout_seconds: f64,
    max_retries: i32,
) -> ClaimResult<u64> {
    let affected = diesel::sql_query(
        "UPDATE file_contents \
         SET try_count = try_count + 1, \
             processing_status = CASE WHEN try_count + 1 >= $2 THEN 'error' ELSE 'pending' END, \
             last_status_change = now(), \
             db_updated_at = now() \
         WHERE processing_status = 'indexing' \
           AND last_status_change < now() - make_interval(secs => $1)",
    )
    .bind::<Double, _>(lease_timeout_seconds)
    .bind::<Integer, _>(max_retries)
    .execute(conn)
    .map_err(ClaimError::Database)?;
    Ok(affected as u64)
}
