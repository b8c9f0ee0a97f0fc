// Mayor alert store.
//
// Alerts are city-wide broadcasts. They stay in every user's feed for
// ALERT_WINDOW_DAYS after creation unless the user dismisses them.

use chrono::{DateTime, Duration, Utc};
use civica_common::types::{Alert, NotificationSeverity};
use sqlx::PgPool;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;

/// How long an alert stays visible after creation.
pub const ALERT_WINDOW_DAYS: i64 = 7;

#[derive(Clone)]
pub enum AlertStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<MemoryAlertStore>>),
}

#[derive(Default)]
pub struct MemoryAlertStore {
    alerts: HashMap<Uuid, Alert>,
    dismissals: HashSet<(Uuid, Uuid)>,
}

impl AlertStore {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(MemoryAlertStore::default())))
    }

    pub async fn create(
        &self,
        title: String,
        message: String,
        severity: NotificationSeverity,
    ) -> Result<Alert, StoreError> {
        match self {
            Self::Postgres(pool) => create_pg(pool, title, message, severity).await,
            Self::Memory(store) => {
                let alert = Alert {
                    id: Uuid::new_v4(),
                    title,
                    message,
                    severity,
                    created_at: Utc::now(),
                };
                store.write().await.alerts.insert(alert.id, alert.clone());
                Ok(alert)
            }
        }
    }

    /// Alerts still inside the visibility window that the user has not
    /// dismissed, newest first.
    pub async fn active_for_user(&self, user_id: Uuid) -> Result<Vec<Alert>, StoreError> {
        self.active_for_user_at(user_id, Utc::now()).await
    }

    pub async fn active_for_user_at(
        &self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Alert>, StoreError> {
        let window_start = now - Duration::days(ALERT_WINDOW_DAYS);
        match self {
            Self::Postgres(pool) => active_for_user_pg(pool, user_id, window_start).await,
            Self::Memory(store) => {
                let guard = store.read().await;
                let mut alerts: Vec<Alert> = guard
                    .alerts
                    .values()
                    .filter(|alert| alert.created_at >= window_start)
                    .filter(|alert| !guard.dismissals.contains(&(alert.id, user_id)))
                    .cloned()
                    .collect();
                alerts.sort_by(|left, right| {
                    right.created_at.cmp(&left.created_at).then(right.id.cmp(&left.id))
                });
                Ok(alerts)
            }
        }
    }

    /// Hide an alert from one user's feed. Errs if the alert is unknown;
    /// repeat dismissals are no-ops.
    pub async fn dismiss(&self, alert_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => dismiss_pg(pool, alert_id, user_id).await,
            Self::Memory(store) => {
                let mut guard = store.write().await;
                if !guard.alerts.contains_key(&alert_id) {
                    return Err(StoreError::NotFound("alert not found"));
                }
                guard.dismissals.insert((alert_id, user_id));
                Ok(())
            }
        }
    }
}

// ── Postgres backend ─────────────────────────────────────────────────────────

#[derive(sqlx::FromRow)]
struct AlertRow {
    id: Uuid,
    title: String,
    message: String,
    severity: String,
    created_at: DateTime<Utc>,
}

impl AlertRow {
    fn into_alert(self) -> Result<Alert, StoreError> {
        let severity = parse_severity(&self.severity).ok_or_else(|| {
            StoreError::Unavailable(anyhow::anyhow!(
                "invalid alert severity '{}' in database",
                self.severity
            ))
        })?;
        Ok(Alert {
            id: self.id,
            title: self.title,
            message: self.message,
            severity,
            created_at: self.created_at,
        })
    }
}

fn severity_as_str(severity: NotificationSeverity) -> &'static str {
    match severity {
        NotificationSeverity::Info => "info",
        NotificationSeverity::Success => "success",
        NotificationSeverity::Warning => "warning",
        NotificationSeverity::Error => "error",
    }
}

fn parse_severity(value: &str) -> Option<NotificationSeverity> {
    match value {
        "info" => Some(NotificationSeverity::Info),
        "success" => Some(NotificationSeverity::Success),
        "warning" => Some(NotificationSeverity::Warning),
        "error" => Some(NotificationSeverity::Error),
        _ => None,
    }
}

async fn create_pg(
    pool: &PgPool,
    title: String,
    message: String,
    severity: NotificationSeverity,
) -> Result<Alert, StoreError> {
    let row = sqlx::query_as::<_, AlertRow>(
        r#"
        INSERT INTO mayor_alerts (title, message, severity)
        VALUES ($1, $2, $3)
        RETURNING id, title, message, severity, created_at
        "#,
    )
    .bind(&title)
    .bind(&message)
    .bind(severity_as_str(severity))
    .fetch_one(pool)
    .await?;

    row.into_alert()
}

async fn active_for_user_pg(
    pool: &PgPool,
    user_id: Uuid,
    window_start: DateTime<Utc>,
) -> Result<Vec<Alert>, StoreError> {
    let rows = sqlx::query_as::<_, AlertRow>(
        r#"
        SELECT a.id, a.title, a.message, a.severity, a.created_at
        FROM mayor_alerts AS a
        WHERE a.created_at >= $2
          AND NOT EXISTS (
            SELECT 1 FROM alert_dismissals AS d
            WHERE d.alert_id = a.id
              AND d.user_id = $1
          )
        ORDER BY a.created_at DESC, a.id DESC
        "#,
    )
    .bind(user_id)
    .bind(window_start)
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(AlertRow::into_alert).collect()
}

async fn dismiss_pg(pool: &PgPool, alert_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
    let exists =
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM mayor_alerts WHERE id = $1)")
            .bind(alert_id)
            .fetch_one(pool)
            .await?;
    if !exists {
        return Err(StoreError::NotFound("alert not found"));
    }

    sqlx::query(
        r#"
        INSERT INTO alert_dismissals (alert_id, user_id)
        VALUES ($1, $2)
        ON CONFLICT (alert_id, user_id) DO NOTHING
        "#,
    )
    .bind(alert_id)
    .bind(user_id)
    .execute(pool)
    .await?;

    Ok(())
}
