// src/ledger.rs
//
// Credit ledger: one non-negative counter per (user, tier) plus an append-only
// journal. Counters only move through `apply_delta`, a single conditional UPDATE,
// so concurrent writers serialize on the row lock and never drop a unit.
// Writers taking a `PgConnection` expect to run inside the caller's transaction:
// a failed delta leaves its journal row behind until that transaction rolls back.

use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::models::{CreditBalance, CreditEntry};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient credit for {tier}: {available} available, {requested} requested")]
    InsufficientCredit {
        tier: String,
        available: i64,
        requested: i64,
    },

    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryReason {
    Purchase,
    Redemption,
    Adjustment,
}

impl EntryReason {
    fn as_str(&self) -> &'static str {
        match self {
            EntryReason::Purchase => "purchase",
            EntryReason::Redemption => "redemption",
            EntryReason::Adjustment => "adjustment",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerOutcome {
    Applied { remaining: i64 },
    /// The idempotency key was already used; nothing changed.
    Duplicate { remaining: i64 },
}

impl LedgerOutcome {
    pub fn remaining(&self) -> i64 {
        match self {
            LedgerOutcome::Applied { remaining } | LedgerOutcome::Duplicate { remaining } => {
                *remaining
            }
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, LedgerOutcome::Duplicate { .. })
    }
}

/// Adds `delta` to the counter unless the result would fall below `expected_min_result`.
/// Returns the new value.
pub async fn apply_delta(
    conn: &mut PgConnection,
    user_id: i32,
    tier_key: &str,
    delta: i64,
    expected_min_result: i64,
) -> Result<i64, LedgerError> {
    if delta > 0 {
        sqlx::query(
            r#"INSERT INTO credit_balances (user_id, tier_key, remaining)
               VALUES ($1, $2, 0)
               ON CONFLICT (user_id, tier_key) DO NOTHING"#,
        )
        .bind(user_id)
        .bind(tier_key)
        .execute(&mut *conn)
        .await?;
    }

    let row = sqlx::query(
        r#"UPDATE credit_balances
           SET remaining = remaining + $3, updated_at = NOW()
           WHERE user_id = $1 AND tier_key = $2 AND remaining + $3 >= $4
           RETURNING remaining"#,
    )
    .bind(user_id)
    .bind(tier_key)
    .bind(delta)
    .bind(expected_min_result)
    .fetch_optional(&mut *conn)
    .await?;

    match row {
        Some(r) => Ok(r.get("remaining")),
        None => {
            let available = current(conn, user_id, tier_key).await?;
            Err(LedgerError::InsufficientCredit {
                tier: tier_key.to_string(),
                available,
                requested: -delta,
            })
        }
    }
}

/// Adds `credits` units. A repeated `idempotency_key` is a no-op.
pub async fn grant(
    conn: &mut PgConnection,
    user_id: i32,
    tier_key: &str,
    credits: i64,
    reference: &str,
    idempotency_key: &str,
) -> Result<LedgerOutcome, LedgerError> {
    journaled(
        conn,
        user_id,
        tier_key,
        credits,
        EntryReason::Purchase,
        reference,
        Some(idempotency_key),
    )
    .await
}

/// Consumes `credits` units, failing with `InsufficientCredit` rather than going negative.
pub async fn redeem(
    conn: &mut PgConnection,
    user_id: i32,
    tier_key: &str,
    credits: i64,
    reference: &str,
    idempotency_key: Option<&str>,
) -> Result<LedgerOutcome, LedgerError> {
    journaled(
        conn,
        user_id,
        tier_key,
        -credits,
        EntryReason::Redemption,
        reference,
        idempotency_key,
    )
    .await
}

/// Manual correction by an administrator; cannot take the counter below zero.
pub async fn adjust(
    pool: &PgPool,
    user_id: i32,
    tier_key: &str,
    delta: i64,
    reference: &str,
) -> Result<i64, LedgerError> {
    let mut tx = pool.begin().await?;
    let outcome = journaled(
        &mut *tx,
        user_id,
        tier_key,
        delta,
        EntryReason::Adjustment,
        reference,
        None,
    )
    .await?;
    tx.commit().await?;
    Ok(outcome.remaining())
}

async fn journaled(
    conn: &mut PgConnection,
    user_id: i32,
    tier_key: &str,
    delta: i64,
    reason: EntryReason,
    reference: &str,
    idempotency_key: Option<&str>,
) -> Result<LedgerOutcome, LedgerError> {
    // Claiming the key first makes a concurrent duplicate wait on the unique index
    // and then observe the conflict.
    let entry_id: Option<i64> = sqlx::query(
        r#"INSERT INTO credit_entries (user_id, tier_key, delta, reason, reference, idempotency_key)
           VALUES ($1, $2, $3, $4, $5, $6)
           ON CONFLICT (idempotency_key) DO NOTHING
           RETURNING id"#,
    )
    .bind(user_id)
    .bind(tier_key)
    .bind(delta)
    .bind(reason.as_str())
    .bind(reference)
    .bind(idempotency_key)
    .fetch_optional(&mut *conn)
    .await?
    .map(|r| r.get("id"));

    let Some(entry_id) = entry_id else {
        let remaining = current(conn, user_id, tier_key).await?;
        log::info!(
            "ledger duplicate user_id={} tier={} key={:?}",
            user_id,
            tier_key,
            idempotency_key
        );
        return Ok(LedgerOutcome::Duplicate { remaining });
    };

    let remaining = apply_delta(conn, user_id, tier_key, delta, 0).await?;

    sqlx::query("UPDATE credit_entries SET balance_after = $1 WHERE id = $2")
        .bind(remaining)
        .bind(entry_id)
        .execute(&mut *conn)
        .await?;

    log::info!(
        "ledger {} user_id={} tier={} delta={} remaining={} ref={}",
        reason.as_str(),
        user_id,
        tier_key,
        delta,
        remaining,
        reference
    );

    Ok(LedgerOutcome::Applied { remaining })
}

async fn current(conn: &mut PgConnection, user_id: i32, tier_key: &str) -> Result<i64, sqlx::Error> {
    let row = sqlx::query(
        "SELECT remaining FROM credit_balances WHERE user_id = $1 AND tier_key = $2",
    )
    .bind(user_id)
    .bind(tier_key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.map(|r| r.get("remaining")).unwrap_or(0))
}

pub async fn balance(pool: &PgPool, user_id: i32, tier_key: &str) -> Result<i64, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    current(&mut *conn, user_id, tier_key).await
}

pub async fn balances(pool: &PgPool, user_id: i32) -> Result<Vec<CreditBalance>, sqlx::Error> {
    let rows = sqlx::query(
        r#"SELECT tier_key, remaining, updated_at
           FROM credit_balances
           WHERE user_id = $1
           ORDER BY tier_key"#,
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| CreditBalance {
            tier_key: r.get("tier_key"),
            remaining: r.get("remaining"),
            updated_at: r.get("updated_at"),
        })
        .collect())
}

pub async fn history(pool: &PgPool, user_id: i32, limit: i64) -> Result<Vec<CreditEntry>, sqlx::Error> {
    let rows = sqlx::query(&format!(
        r#"SELECT {ENTRY_COLUMNS}
           FROM credit_entries
           WHERE user_id = $1
           ORDER BY created_at DESC, id DESC
           LIMIT $2"#
    ))
    .bind(user_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(entry_from_row).collect())
}

/// The journal row that claimed `idempotency_key`, if any.
pub async fn entry_by_key(
    conn: &mut PgConnection,
    idempotency_key: &str,
) -> Result<Option<CreditEntry>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM credit_entries WHERE idempotency_key = $1"
    ))
    .bind(idempotency_key)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row.as_ref().map(entry_from_row))
}

const ENTRY_COLUMNS: &str = "id, tier_key, delta, balance_after, reason, reference, created_at";

fn entry_from_row(r: &PgRow) -> CreditEntry {
    CreditEntry {
        id: r.get("id"),
        tier_key: r.get("tier_key"),
        delta: r.get("delta"),
        balance_after: r.get("balance_after"),
        reason: r.get("reason"),
        reference: r.get("reference"),
        created_at: r.get("created_at"),
    }
}
