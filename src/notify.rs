// src/notify.rs
//
// Outbound email via the mail service's HTTP endpoints. Messages go through an
// outbox table written in the same transaction as the state change that caused
// them; the worker delivers them with backoff.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool, Row};

/// Attempts before a message is parked as `failed`.
pub const MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalEmail {
    pub to: String,
    pub listing_type: String,
    /// `approved` or `rejected`.
    pub action: String,
    pub listing_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRegistrationEmail {
    pub to: String,
    pub event_name: String,
    pub attendee_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Approval(ApprovalEmail),
    EventRegistration(EventRegistrationEmail),
}

impl Notification {
    fn kind(&self) -> &'static str {
        match self {
            Notification::Approval(_) => "approval",
            Notification::EventRegistration(_) => "event_registration",
        }
    }

    fn payload(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Notification::Approval(m) => serde_json::to_value(m),
            Notification::EventRegistration(m) => serde_json::to_value(m),
        }
    }

    fn decode(kind: &str, payload: serde_json::Value) -> Result<Self, String> {
        match kind {
            "approval" => serde_json::from_value(payload)
                .map(Notification::Approval)
                .map_err(|e| e.to_string()),
            "event_registration" => serde_json::from_value(payload)
                .map(Notification::EventRegistration)
                .map_err(|e| e.to_string()),
            other => Err(format!("unknown notification kind {other}")),
        }
    }
}

#[derive(Clone)]
pub struct EmailClient {
    http: reqwest::Client,
    api_base: String,
}

impl EmailClient {
    pub fn new(http: reqwest::Client, api_base: &str) -> Self {
        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }

    pub async fn send(&self, notification: &Notification) -> Result<(), String> {
        let (path, body) = match notification {
            Notification::Approval(m) => ("/api/emails/approval", serde_json::to_value(m)),
            Notification::EventRegistration(m) => {
                ("/api/emails/event-registration", serde_json::to_value(m))
            }
        };
        let body = body.map_err(|e| e.to_string())?;

        let resp = self
            .http
            .post(format!("{}{path}", self.api_base))
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("email api status={status} body={text}"));
        }
        Ok(())
    }
}

pub async fn enqueue(conn: &mut PgConnection, notification: &Notification) -> Result<(), sqlx::Error> {
    let payload = notification
        .payload()
        .map_err(|e| sqlx::Error::Protocol(format!("notification payload: {e}")))?;

    sqlx::query("INSERT INTO notifications (kind, payload) VALUES ($1, $2)")
        .bind(notification.kind())
        .bind(payload)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub sent: u32,
    pub retried: u32,
    pub failed: u32,
}

/// Delivers up to `batch` due messages.
///
/// Rows are claimed in a short transaction that pushes `next_attempt_at` out by
/// a lease; concurrent dispatchers skip locked rows and then see the lease.
/// Sending happens outside any transaction and each row is updated on its own,
/// so a crash after a send can only repeat that one message once the lease ends.
pub async fn dispatch_pending(
    pool: &PgPool,
    client: &EmailClient,
    batch: i64,
) -> Result<DispatchReport, sqlx::Error> {
    let claimed = claim_due(pool, batch).await?;
    let mut report = DispatchReport::default();

    for row in claimed {
        let attempts = row.attempts + 1;
        let result = match Notification::decode(&row.kind, row.payload) {
            Ok(n) => client.send(&n).await,
            Err(e) => Err(e),
        };

        let marked = match result {
            Ok(()) => {
                report.sent += 1;
                mark_sent(pool, row.id, attempts).await
            }
            Err(e) => {
                let give_up = attempts >= MAX_ATTEMPTS;
                log::warn!(
                    "notification {} ({}) attempt {} failed: {}",
                    row.id,
                    row.kind,
                    attempts,
                    e
                );
                if give_up {
                    report.failed += 1;
                } else {
                    report.retried += 1;
                }
                mark_attempt_failed(pool, row.id, attempts, &e, give_up).await
            }
        };
        if let Err(e) = marked {
            log::error!("notification {} status update failed: {}", row.id, e);
        }
    }

    Ok(report)
}

/// Seconds a claimed message stays invisible to other dispatchers.
const CLAIM_LEASE_SECS: f64 = 300.0;

struct Claimed {
    id: i64,
    kind: String,
    payload: serde_json::Value,
    attempts: i32,
}

async fn claim_due(pool: &PgPool, batch: i64) -> Result<Vec<Claimed>, sqlx::Error> {
    let rows = sqlx::query(
        r#"UPDATE notifications
           SET next_attempt_at = NOW() + make_interval(secs => $2)
           WHERE id IN (
               SELECT id
               FROM notifications
               WHERE status = 'pending' AND next_attempt_at <= NOW()
               ORDER BY next_attempt_at
               LIMIT $1
               FOR UPDATE SKIP LOCKED
           )
           RETURNING id, kind, payload, attempts"#,
    )
    .bind(batch)
    .bind(CLAIM_LEASE_SECS)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|r| Claimed {
            id: r.get("id"),
            kind: r.get("kind"),
            payload: r.get("payload"),
            attempts: r.get("attempts"),
        })
        .collect())
}

async fn mark_sent(pool: &PgPool, id: i64, attempts: i32) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE notifications SET status = 'sent', attempts = $2, sent_at = NOW() WHERE id = $1",
    )
    .bind(id)
    .bind(attempts)
    .execute(pool)
    .await?;
    Ok(())
}

async fn mark_attempt_failed(
    pool: &PgPool,
    id: i64,
    attempts: i32,
    error: &str,
    give_up: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"UPDATE notifications
           SET status = $2, attempts = $3, last_error = $4, next_attempt_at = $5
           WHERE id = $1"#,
    )
    .bind(id)
    .bind(if give_up { "failed" } else { "pending" })
    .bind(attempts)
    .bind(error)
    .bind(Utc::now() + backoff(attempts))
    .execute(pool)
    .await?;
    Ok(())
}

/// 1, 2, 4, 8... minutes.
pub fn backoff(attempts: i32) -> Duration {
    let exp = attempts.clamp(1, 10) - 1;
    Duration::minutes(1i64 << exp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approval_payload_uses_camel_case() {
        let n = Notification::Approval(ApprovalEmail {
            to: "owner@example.com".into(),
            listing_type: "car".into(),
            action: "approved".into(),
            listing_name: "Blue Coupe".into(),
        });
        let v = n.payload().unwrap();
        assert_eq!(v["listingType"], "car");
        assert_eq!(v["listingName"], "Blue Coupe");
        assert_eq!(Notification::decode(n.kind(), v).unwrap(), n);
    }

    #[test]
    fn backoff_doubles() {
        assert_eq!(backoff(1), Duration::minutes(1));
        assert_eq!(backoff(2), Duration::minutes(2));
        assert_eq!(backoff(4), Duration::minutes(8));
    }
}
