// Feedback message store: the durable conversation log per report.
//
// Ordering invariant: within one report, `created_at` is strictly
// increasing, so clients can reconcile by refetching and comparing tails.
// The memory backend bumps colliding timestamps by one millisecond; the
// Postgres backend orders by (created_at, id) and relies on timestamp
// resolution.

use chrono::{DateTime, Duration, Utc};
use civica_common::types::{Attachment, FeedbackMessage, Role};
use sqlx::{types::Json, PgPool};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;

#[derive(Clone)]
pub enum FeedbackStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryFeedbackStore>>),
}

#[derive(Default)]
pub struct MemoryFeedbackStore {
    /// report_id -> messages in creation order.
    messages: HashMap<Uuid, Vec<FeedbackMessage>>,
}

/// Identity of a message author, as recorded on each stored message.
#[derive(Debug, Clone)]
pub struct Sender {
    pub user_id: Uuid,
    pub name: String,
    pub role: Role,
}

/// Per-report unread rollup for the notification feed.
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadSummary {
    pub report_id: Uuid,
    pub count: u64,
    pub latest_at: DateTime<Utc>,
}

impl FeedbackStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryFeedbackStore::default())))
    }

    /// All messages for a report, oldest first.
    pub async fn list(&self, report_id: Uuid) -> Result<Vec<FeedbackMessage>, StoreError> {
        match self {
            Self::Postgres(pool) => list_pg(pool, report_id).await,
            Self::Memory(store) => {
                Ok(store.read().await.messages.get(&report_id).cloned().unwrap_or_default())
            }
        }
    }

    /// Append a message to the report's log and return the stored row.
    pub async fn create(
        &self,
        report_id: Uuid,
        sender: Sender,
        body: String,
        attachments: Vec<Attachment>,
    ) -> Result<FeedbackMessage, StoreError> {
        match self {
            Self::Postgres(pool) => create_pg(pool, report_id, sender, body, attachments).await,
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let log = guard.messages.entry(report_id).or_default();
                let mut created_at = Utc::now();
                if let Some(last) = log.last() {
                    if created_at <= last.created_at {
                        created_at = last.created_at + Duration::milliseconds(1);
                    }
                }
                let message = FeedbackMessage {
                    id: Uuid::new_v4(),
                    report_id,
                    sender_id: sender.user_id,
                    sender_name: sender.name,
                    sender_role: sender.role,
                    body,
                    attachments,
                    created_at,
                    read_by: Vec::new(),
                };
                log.push(message.clone());
                Ok(message)
            }
        }
    }

    /// Mark every message in the report as read by `reader_id`, excluding
    /// the reader's own messages. Idempotent; returns how many messages
    /// were newly marked.
    pub async fn mark_read(&self, report_id: Uuid, reader_id: Uuid) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pool) => mark_read_pg(pool, report_id, reader_id).await,
            Self::Memory(store) => {
                let mut guard = store.write().await;
                let Some(log) = guard.messages.get_mut(&report_id) else {
                    return Ok(0);
                };
                let mut marked = 0;
                for message in log.iter_mut() {
                    if message.sender_id != reader_id && !message.read_by.contains(&reader_id) {
                        message.read_by.push(reader_id);
                        marked += 1;
                    }
                }
                Ok(marked)
            }
        }
    }

    /// How many messages in the report the user has not read.
    pub async fn unread_count(&self, report_id: Uuid, user_id: Uuid) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pool) => unread_count_pg(pool, report_id, user_id).await,
            Self::Memory(store) => {
                let guard = store.read().await;
                let count = guard
                    .messages
                    .get(&report_id)
                    .map(|log| {
                        log.iter().filter(|message| !message.is_read_by(user_id)).count() as u64
                    })
                    .unwrap_or(0);
                Ok(count)
            }
        }
    }

    /// Unread rollups across the given reports, skipping fully-read ones.
    /// Sorted by most recent unread message first.
    pub async fn unread_summaries(
        &self,
        report_ids: &[Uuid],
        user_id: Uuid,
    ) -> Result<Vec<UnreadSummary>, StoreError> {
        match self {
            Self::Postgres(pool) => unread_summaries_pg(pool, report_ids, user_id).await,
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut summaries = Vec::new();
                for report_id in report_ids {
                    let Some(log) = guard.messages.get(report_id) else {
                        continue;
                    };
                    let unread: Vec<&FeedbackMessage> =
                        log.iter().filter(|message| !message.is_read_by(user_id)).collect();
                    if let Some(latest) = unread.iter().map(|message| message.created_at).max() {
                        summaries.push(UnreadSummary {
                            report_id: *report_id,
                            count: unread.len() as u64,
                            latest_at: latest,
                        });
                    }
                }
                summaries.sort_by(|left, right| right.latest_at.cmp(&left.latest_at));
                Ok(summaries)
            }
        }
    }
}

// ── Postgres backend ─────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct FeedbackRow {
    id: Uuid,
    report_id: Uuid,
    sender_id: Uuid,
    sender_name: String,
    sender_role: String,
    body: String,
    attachments: Json<Vec<Attachment>>,
    created_at: DateTime<Utc>,
    read_by: Vec<Uuid>,
}

impl FeedbackRow {
    fn into_message(self) -> Result<FeedbackMessage, StoreError> {
        let sender_role = Role::from_db_value(&self.sender_role).ok_or_else(|| {
            StoreError::Unavailable(anyhow::anyhow!(
                "invalid sender role '{}' in database",
                self.sender_role
            ))
        })?;
        Ok(FeedbackMessage {
            id: self.id,
            report_id: self.report_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            sender_role,
            body: self.body,
            attachments: self.attachments.0,
            created_at: self.created_at,
            read_by: self.read_by,
        })
    }
}

async fn list_pg(pool: &PgPool, report_id: Uuid) -> Result<Vec<FeedbackMessage>, StoreError> {
    let rows = sqlx::query_as::<_, FeedbackRow>(
        r#"
        SELECT
            m.id,
            m.report_id,
            m.sender_id,
            m.sender_name,
            m.sender_role,
            m.body,
            m.attachments,
            m.created_at,
            COALESCE(
                ARRAY_AGG(r.user_id) FILTER (WHERE r.user_id IS NOT NULL),
                '{}'
            ) AS read_by
        FROM feedback_messages AS m
        LEFT JOIN feedback_reads AS r
            ON r.message_id = m.id
        WHERE m.report_id = $1
        GROUP BY m.id
        ORDER BY m.created_at ASC, m.id ASC
        "#,
    )
    .bind(report_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(FeedbackRow::into_message).collect()
}

async fn create_pg(
    pool: &PgPool,
    report_id: Uuid,
    sender: Sender,
    body: String,
    attachments: Vec<Attachment>,
) -> Result<FeedbackMessage, StoreError> {
    let row = sqlx::query_as::<_, FeedbackRow>(
        r#"
        INSERT INTO feedback_messages (report_id, sender_id, sender_name, sender_role, body, attachments)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING
            id,
            report_id,
            sender_id,
            sender_name,
            sender_role,
            body,
            attachments,
            created_at,
            ARRAY[]::uuid[] AS read_by
        "#,
    )
    .bind(report_id)
    .bind(sender.user_id)
    .bind(&sender.name)
    .bind(sender.role.as_str())
    .bind(&body)
    .bind(Json(&attachments))
    .fetch_one(pool)
    .await?;

    row.into_message()
}

async fn mark_read_pg(pool: &PgPool, report_id: Uuid, reader_id: Uuid) -> Result<u64, StoreError> {
    let result = sqlx::query(
        r#"
        INSERT INTO feedback_reads (message_id, user_id)
        SELECT id, $2
        FROM feedback_messages
        WHERE report_id = $1
          AND sender_id <> $2
        ON CONFLICT (message_id, user_id) DO NOTHING
        "#,
    )
    .bind(report_id)
    .bind(reader_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

async fn unread_count_pg(
    pool: &PgPool,
    report_id: Uuid,
    user_id: Uuid,
) -> Result<u64, StoreError> {
    let count = sqlx::query_scalar::<_, i64>(
        r#"
        SELECT COUNT(*)
        FROM feedback_messages AS m
        WHERE m.report_id = $1
          AND m.sender_id <> $2
          AND NOT EXISTS (
            SELECT 1 FROM feedback_reads AS r
            WHERE r.message_id = m.id
              AND r.user_id = $2
          )
        "#,
    )
    .bind(report_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    Ok(count as u64)
}

#[derive(sqlx::FromRow)]
struct UnreadSummaryRow {
    report_id: Uuid,
    count: i64,
    latest_at: DateTime<Utc>,
}

async fn unread_summaries_pg(
    pool: &PgPool,
    report_ids: &[Uuid],
    user_id: Uuid,
) -> Result<Vec<UnreadSummary>, StoreError> {
    if report_ids.is_empty() {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, UnreadSummaryRow>(
        r#"
        SELECT
            m.report_id,
            COUNT(*) AS count,
            MAX(m.created_at) AS latest_at
        FROM feedback_messages AS m
        WHERE m.report_id = ANY($1::uuid[])
          AND m.sender_id <> $2
          AND NOT EXISTS (
            SELECT 1 FROM feedback_reads AS r
            WHERE r.message_id = m.id
              AND r.user_id = $2
          )
        GROUP BY m.report_id
        ORDER BY latest_at DESC
        "#,
    )
    .bind(report_ids)
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| UnreadSummary {
            report_id: row.report_id,
            count: row.count as u64,
            latest_at: row.latest_at,
        })
        .collect())
}
