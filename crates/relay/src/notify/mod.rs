// Per-user notification feed.
//
// The feed is recomputed on every fetch from three sources: unread feedback
// rollups, recent report status changes, and active mayor alerts. Nothing
// here is persisted; dismissing feedback happens via read receipts, status
// items age out past their window or the user's last ack, and alerts have
// their own dismissal store.

use chrono::{DateTime, Duration, Utc};
use civica_common::types::{
    NotificationItem, NotificationSeverity, NotificationSource, ReportStatus, ReportView,
};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    auth::middleware::AuthenticatedUser,
    store::{AlertStore, FeedbackStore, ReportDirectory, StoreError, UnreadSummary},
};

/// How far back status-change items reach when the user has never acked.
pub const STATUS_WINDOW_DAYS: i64 = 7;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct NotificationFeed {
    /// Sum of every item's `count`.
    pub total: u64,
    pub items: Vec<NotificationItem>,
}

#[derive(Clone)]
pub struct NotificationAggregator {
    feedback: FeedbackStore,
    reports: ReportDirectory,
    alerts: AlertStore,
}

impl NotificationAggregator {
    pub fn new(feedback: FeedbackStore, reports: ReportDirectory, alerts: AlertStore) -> Self {
        Self { feedback, reports, alerts }
    }

    pub async fn feed(&self, user: &AuthenticatedUser) -> Result<NotificationFeed, StoreError> {
        self.feed_at(user, Utc::now()).await
    }

    pub async fn feed_at(
        &self,
        user: &AuthenticatedUser,
        now: DateTime<Utc>,
    ) -> Result<NotificationFeed, StoreError> {
        let mut items = Vec::new();

        // Unread feedback, rolled up per report.
        let visible = self.reports.visible_reports(user).await?;
        let report_ids: Vec<Uuid> = visible.iter().map(|report| report.id).collect();
        let summaries = self.feedback.unread_summaries(&report_ids, user.user_id).await?;
        for summary in &summaries {
            let title = visible
                .iter()
                .find(|report| report.id == summary.report_id)
                .map(|report| report.title.as_str())
                .unwrap_or("a report");
            items.push(feedback_item(summary, title));
        }

        // Status changes since the later of the window start and the last ack.
        let window_start = now - Duration::days(STATUS_WINDOW_DAYS);
        let since = match self.reports.ack_for(user.user_id).await? {
            Some(acked_at) => acked_at.max(window_start),
            None => window_start,
        };
        for report in self.reports.status_changes_since(user, since).await? {
            items.push(status_change_item(&report));
        }

        // Active mayor alerts.
        for alert in self.alerts.active_for_user_at(user.user_id, now).await? {
            items.push(NotificationItem {
                id: format!("alert:{}", alert.id),
                source: NotificationSource::Alert,
                severity: alert.severity,
                title: alert.title,
                message: alert.message,
                icon: "megaphone".to_string(),
                link: format!("/alerts/{}", alert.id),
                timestamp: Some(alert.created_at),
                count: 1,
            });
        }

        Ok(merge_items(items))
    }
}

fn feedback_item(summary: &UnreadSummary, report_title: &str) -> NotificationItem {
    let message = if summary.count == 1 {
        format!("1 new message on \"{report_title}\"")
    } else {
        format!("{} new messages on \"{report_title}\"", summary.count)
    };
    NotificationItem {
        id: format!("feedback:{}", summary.report_id),
        source: NotificationSource::Feedback,
        severity: NotificationSeverity::Info,
        title: "New feedback".to_string(),
        message,
        icon: "message".to_string(),
        link: format!("/reports/{}", summary.report_id),
        timestamp: Some(summary.latest_at),
        count: summary.count,
    }
}

fn status_change_item(report: &ReportView) -> NotificationItem {
    let (severity, verb) = match report.status {
        ReportStatus::Resolved => (NotificationSeverity::Success, "was resolved"),
        ReportStatus::Rejected => (NotificationSeverity::Error, "was rejected"),
        ReportStatus::InProgress => (NotificationSeverity::Info, "is in progress"),
        ReportStatus::Open => (NotificationSeverity::Info, "was reopened"),
    };
    NotificationItem {
        id: format!("status:{}", report.id),
        source: NotificationSource::StatusChange,
        severity,
        title: "Report status updated".to_string(),
        message: format!("\"{}\" {verb}", report.title),
        icon: "clipboard".to_string(),
        link: format!("/reports/{}", report.id),
        timestamp: Some(report.status_changed_at),
        count: 1,
    }
}

/// Collapse duplicate items (same source and link) by summing counts and
/// keeping the newest timestamp, then sort newest first with source
/// priority breaking timestamp ties. Also computes the feed total.
pub fn merge_items(items: Vec<NotificationItem>) -> NotificationFeed {
    let mut merged: Vec<NotificationItem> = Vec::with_capacity(items.len());
    for item in items {
        if let Some(existing) = merged
            .iter_mut()
            .find(|candidate| candidate.source == item.source && candidate.link == item.link)
        {
            existing.count += item.count;
            if item.timestamp > existing.timestamp {
                existing.timestamp = item.timestamp;
                existing.message = item.message;
                existing.severity = item.severity;
            }
        } else {
            merged.push(item);
        }
    }

    merged.sort_by(|left, right| {
        right
            .timestamp
            .cmp(&left.timestamp)
            .then_with(|| left.source.priority().cmp(&right.source.priority()))
            .then_with(|| left.id.cmp(&right.id))
    });

    let total = merged.iter().map(|item| item.count).sum();
    NotificationFeed { total, items: merged }
}
