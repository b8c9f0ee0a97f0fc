// Typing-indicator tracking with TTL expiry.
//
// Each (report, user) pair holds at most one typing entry. Entries expire
// after TYPING_TTL_MS unless refreshed; a background sweeper broadcasts
// `user_stop_typing` for entries that lapse without an explicit stop.

use chrono::{DateTime, Duration, Utc};
use civica_common::protocol::ws::WsMessage;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::rooms::RoomRouter;

/// How long a typing entry lives without a refresh.
pub const TYPING_TTL_MS: i64 = 2_500;

/// How often the background sweeper scans for lapsed entries. TTL plus one
/// full sweep period bounds how late the auto `user_stop_typing` can land;
/// clients expect it within 3 seconds of the last `typing` frame.
pub const SWEEP_INTERVAL_MS: u64 = 500;

#[derive(Debug, Clone, Default)]
pub struct TypingTracker {
    state: Arc<RwLock<HashMap<(Uuid, Uuid), TypingEntry>>>,
}

#[derive(Debug, Clone)]
struct TypingEntry {
    display_name: String,
    expires_at: DateTime<Utc>,
}

/// A typing entry that lapsed without an explicit stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredTyping {
    pub report_id: Uuid,
    pub user_id: Uuid,
}

impl TypingTracker {
    /// Record (or refresh) a typing indicator. Returns `true` when the entry
    /// is new, `false` when an existing entry was only refreshed.
    pub async fn mark_typing(&self, report_id: Uuid, user_id: Uuid, display_name: &str) -> bool {
        self.mark_typing_at(report_id, user_id, display_name, Utc::now()).await
    }

    pub async fn mark_typing_at(
        &self,
        report_id: Uuid,
        user_id: Uuid,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> bool {
        let mut guard = self.state.write().await;
        let entry = TypingEntry {
            display_name: display_name.to_string(),
            expires_at: now + Duration::milliseconds(TYPING_TTL_MS),
        };
        guard.insert((report_id, user_id), entry).is_none()
    }

    /// Clear a typing indicator explicitly. Returns `true` if one existed.
    pub async fn clear_typing(&self, report_id: Uuid, user_id: Uuid) -> bool {
        self.state.write().await.remove(&(report_id, user_id)).is_some()
    }

    /// Clear a user's typing indicators across the given reports (used on
    /// disconnect). Returns the report ids that actually had one.
    pub async fn clear_user(&self, report_ids: &[Uuid], user_id: Uuid) -> Vec<Uuid> {
        let mut guard = self.state.write().await;
        let mut cleared = Vec::new();
        for report_id in report_ids {
            if guard.remove(&(*report_id, user_id)).is_some() {
                cleared.push(*report_id);
            }
        }
        cleared
    }

    /// Currently-typing users in a report, sorted by user id.
    pub async fn typing_in_report(&self, report_id: Uuid) -> Vec<(Uuid, String)> {
        self.typing_in_report_at(report_id, Utc::now()).await
    }

    pub async fn typing_in_report_at(
        &self,
        report_id: Uuid,
        now: DateTime<Utc>,
    ) -> Vec<(Uuid, String)> {
        let guard = self.state.read().await;
        let mut typing: Vec<(Uuid, String)> = guard
            .iter()
            .filter(|((entry_report, _), entry)| {
                *entry_report == report_id && entry.expires_at > now
            })
            .map(|((_, user_id), entry)| (*user_id, entry.display_name.clone()))
            .collect();
        typing.sort_by_key(|(user_id, _)| *user_id);
        typing
    }

    /// Remove all lapsed entries, returning what was expired.
    pub async fn expire(&self) -> Vec<ExpiredTyping> {
        self.expire_at(Utc::now()).await
    }

    pub async fn expire_at(&self, now: DateTime<Utc>) -> Vec<ExpiredTyping> {
        let mut guard = self.state.write().await;
        let lapsed: Vec<(Uuid, Uuid)> = guard
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| *key)
            .collect();
        let mut expired = Vec::with_capacity(lapsed.len());
        for key in lapsed {
            guard.remove(&key);
            expired.push(ExpiredTyping { report_id: key.0, user_id: key.1 });
        }
        expired.sort_by_key(|entry| (entry.report_id, entry.user_id));
        expired
    }
}

/// Spawn the background task that expires lapsed typing entries and tells
/// the affected rooms. Runs until the process shuts down.
pub fn spawn_typing_sweeper(tracker: TypingTracker, rooms: RoomRouter) {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(SWEEP_INTERVAL_MS));
        loop {
            interval.tick().await;
            let expired = tracker.expire().await;
            for entry in expired {
                debug!(
                    report_id = %entry.report_id,
                    user_id = %entry.user_id,
                    "typing indicator expired"
                );
                // Same fan-out as an explicit stop_typing: the lapsed
                // typer's own connections already know.
                let _ = rooms
                    .broadcast_to_report_excluding_user(
                        entry.report_id,
                        WsMessage::UserStopTyping {
                            report_id: entry.report_id,
                            user_id: entry.user_id,
                        },
                        entry.user_id,
                    )
                    .await;
            }
        }
    });
}
