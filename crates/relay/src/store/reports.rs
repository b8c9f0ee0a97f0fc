// Report directory: read-only report metadata plus per-user notification acks.
//
// Reports are owned by the portal's report service; the relay mirrors the
// fields it needs for room authorization and the status-change notification
// source.

use chrono::{DateTime, Utc};
use civica_common::types::{Department, ReportStatus, ReportView, Role};
use sqlx::PgPool;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::middleware::AuthenticatedUser;

use super::StoreError;

#[derive(Clone)]
pub enum ReportDirectory {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryReportDirectory>>),
}

#[derive(Default)]
pub struct MemoryReportDirectory {
    reports: HashMap<Uuid, ReportView>,
    acks: HashMap<Uuid, DateTime<Utc>>,
}

/// Whether `user` may enter the feedback room for `report`.
///
/// Owners always may; admins only for reports in their own department;
/// the mayor may enter any room.
pub fn can_access(report: &ReportView, user: &AuthenticatedUser) -> bool {
    if report.owner_id == user.user_id {
        return true;
    }
    match user.role {
        Role::Mayor => true,
        Role::Admin => user.department == Some(report.department),
        Role::Citizen => false,
    }
}

impl ReportDirectory {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryReportDirectory::default())))
    }

    pub async fn find(&self, report_id: Uuid) -> Result<Option<ReportView>, StoreError> {
        match self {
            Self::Postgres(pool) => find_pg(pool, report_id).await,
            Self::Memory(store) => Ok(store.read().await.reports.get(&report_id).cloned()),
        }
    }

    /// Reports visible to a user: citizens see their own, admins their
    /// department's, the mayor everything. Sorted newest first.
    pub async fn visible_reports(
        &self,
        user: &AuthenticatedUser,
    ) -> Result<Vec<ReportView>, StoreError> {
        match self {
            Self::Postgres(pool) => visible_reports_pg(pool, user).await,
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut reports: Vec<ReportView> = guard
                    .reports
                    .values()
                    .filter(|report| can_access(report, user))
                    .cloned()
                    .collect();
                reports.sort_by(|left, right| {
                    right.created_at.cmp(&left.created_at).then(right.id.cmp(&left.id))
                });
                Ok(reports)
            }
        }
    }

    /// Visible reports whose status changed at or after `since`, excluding
    /// reports still in their initial `open` state.
    pub async fn status_changes_since(
        &self,
        user: &AuthenticatedUser,
        since: DateTime<Utc>,
    ) -> Result<Vec<ReportView>, StoreError> {
        match self {
            Self::Postgres(pool) => status_changes_since_pg(pool, user, since).await,
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut reports: Vec<ReportView> = guard
                    .reports
                    .values()
                    .filter(|report| can_access(report, user))
                    .filter(|report| report.status != ReportStatus::Open)
                    .filter(|report| report.status_changed_at >= since)
                    .cloned()
                    .collect();
                reports.sort_by(|left, right| {
                    right.status_changed_at.cmp(&left.status_changed_at).then(right.id.cmp(&left.id))
                });
                Ok(reports)
            }
        }
    }

    /// Create or replace the relay's view of a report.
    pub async fn upsert(&self, report: ReportView) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => upsert_pg(pool, &report).await,
            Self::Memory(store) => {
                store.write().await.reports.insert(report.id, report);
                Ok(())
            }
        }
    }

    /// Record that a user has seen their notification feed as of `now`.
    pub async fn record_ack(&self, user_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => record_ack_pg(pool, user_id, now).await,
            Self::Memory(store) => {
                store.write().await.acks.insert(user_id, now);
                Ok(())
            }
        }
    }

    /// The last time a user acknowledged their feed, if ever.
    pub async fn ack_for(&self, user_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError> {
        match self {
            Self::Postgres(pool) => ack_for_pg(pool, user_id).await,
            Self::Memory(store) => Ok(store.read().await.acks.get(&user_id).copied()),
        }
    }
}

// ── Postgres backend ─────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: Uuid,
    title: String,
    owner_id: Uuid,
    department: String,
    status: String,
    status_changed_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl ReportRow {
    fn into_view(self) -> Result<ReportView, StoreError> {
        let department = Department::from_db_value(&self.department).ok_or_else(|| {
            StoreError::Unavailable(anyhow::anyhow!(
                "invalid department '{}' in database",
                self.department
            ))
        })?;
        let status = ReportStatus::from_db_value(&self.status).ok_or_else(|| {
            StoreError::Unavailable(anyhow::anyhow!(
                "invalid report status '{}' in database",
                self.status
            ))
        })?;
        Ok(ReportView {
            id: self.id,
            title: self.title,
            owner_id: self.owner_id,
            department,
            status,
            status_changed_at: self.status_changed_at,
            created_at: self.created_at,
        })
    }
}

const REPORT_COLUMNS: &str =
    "id, title, owner_id, department, status, status_changed_at, created_at";

async fn find_pg(pool: &PgPool, report_id: Uuid) -> Result<Option<ReportView>, StoreError> {
    let row = sqlx::query_as::<_, ReportRow>(&format!(
        "SELECT {REPORT_COLUMNS} FROM reports WHERE id = $1"
    ))
    .bind(report_id)
    .fetch_optional(pool)
    .await?;

    row.map(ReportRow::into_view).transpose()
}

async fn visible_reports_pg(
    pool: &PgPool,
    user: &AuthenticatedUser,
) -> Result<Vec<ReportView>, StoreError> {
    let rows = sqlx::query_as::<_, ReportRow>(&format!(
        r#"
        SELECT {REPORT_COLUMNS}
        FROM reports
        WHERE owner_id = $1
           OR ($2::text = 'mayor')
           OR ($2::text = 'admin' AND department = $3)
        ORDER BY created_at DESC, id DESC
        "#
    ))
    .bind(user.user_id)
    .bind(user.role.as_str())
    .bind(user.department.map(|department| department.as_str()))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ReportRow::into_view).collect()
}

async fn status_changes_since_pg(
    pool: &PgPool,
    user: &AuthenticatedUser,
    since: DateTime<Utc>,
) -> Result<Vec<ReportView>, StoreError> {
    let rows = sqlx::query_as::<_, ReportRow>(&format!(
        r#"
        SELECT {REPORT_COLUMNS}
        FROM reports
        WHERE status <> 'open'
          AND status_changed_at >= $4
          AND (
            owner_id = $1
            OR ($2::text = 'mayor')
            OR ($2::text = 'admin' AND department = $3)
          )
        ORDER BY status_changed_at DESC, id DESC
        "#
    ))
    .bind(user.user_id)
    .bind(user.role.as_str())
    .bind(user.department.map(|department| department.as_str()))
    .bind(since)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(ReportRow::into_view).collect()
}

async fn upsert_pg(pool: &PgPool, report: &ReportView) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO reports (id, title, owner_id, department, status, status_changed_at, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (id) DO UPDATE SET
            title = EXCLUDED.title,
            status = EXCLUDED.status,
            status_changed_at = EXCLUDED.status_changed_at
        "#,
    )
    .bind(report.id)
    .bind(&report.title)
    .bind(report.owner_id)
    .bind(report.department.as_str())
    .bind(report.status.as_str())
    .bind(report.status_changed_at)
    .bind(report.created_at)
    .execute(pool)
    .await?;

    Ok(())
}

async fn record_ack_pg(pool: &PgPool, user_id: Uuid, now: DateTime<Utc>) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO notification_acks (user_id, acked_at)
        VALUES ($1, $2)
        ON CONFLICT (user_id) DO UPDATE SET acked_at = GREATEST(notification_acks.acked_at, EXCLUDED.acked_at)
        "#,
    )
    .bind(user_id)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

async fn ack_for_pg(pool: &PgPool, user_id: Uuid) -> Result<Option<DateTime<Utc>>, StoreError> {
    let acked_at = sqlx::query_scalar::<_, DateTime<Utc>>(
        "SELECT acked_at FROM notification_acks WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(acked_at)
}
