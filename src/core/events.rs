// ============================================
// RXCACHE - Usage Event Log
// ============================================

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::broadcast;

use crate::quota::TierName;

/// Signals raised by the quota service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UsageEventKind {
    QueryConsumed {
        queries_today: u32,
        queries_this_month: u32,
    },
    DailyLimitExceeded {
        limit: u32,
    },
    MonthlyLimitExceeded {
        limit: u32,
    },
    TierUpgraded {
        from: TierName,
        to: TierName,
    },
}

impl UsageEventKind {
    /// Whether the UI should offer an upgrade
    pub fn is_limit(&self) -> bool {
        matches!(
            self,
            UsageEventKind::DailyLimitExceeded { .. } | UsageEventKind::MonthlyLimitExceeded { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageEvent {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    #[serde(flatten)]
    pub kind: UsageEventKind,
    pub session_id: Option<String>,
}

impl UsageEvent {
    pub fn new(user_id: impl Into<String>, kind: UsageEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user_id.into(),
            kind,
            session_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventLogConfig {
    /// Append events as JSON lines to this file
    pub log_file: Option<PathBuf>,
    /// Events kept in memory
    pub max_memory_events: usize,
    /// Capacity of the broadcast channel
    pub channel_capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            max_memory_events: 1000,
            channel_capacity: 64,
        }
    }
}

/// Bounded in-memory record of usage events, optionally mirrored to a
/// JSON-lines file and broadcast to subscribers.
pub struct EventLog {
    config: EventLogConfig,
    events: Mutex<VecDeque<UsageEvent>>,
    file_writer: Option<Mutex<BufWriter<File>>>,
    sender: broadcast::Sender<UsageEvent>,
    session_id: String,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl EventLog {
    pub fn new(config: EventLogConfig) -> Result<Self> {
        let file_writer = match config.log_file {
            Some(ref path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                Some(Mutex::new(BufWriter::new(file)))
            }
            None => None,
        };

        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));

        Ok(Self {
            config,
            events: Mutex::new(VecDeque::new()),
            file_writer,
            sender,
            session_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    /// Log without a backing file
    pub fn in_memory() -> Self {
        let config = EventLogConfig::default();
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            file_writer: None,
            sender,
            session_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn record(&self, mut event: UsageEvent) {
        event.session_id = Some(self.session_id.clone());

        if event.kind.is_limit() {
            tracing::info!(user_id = %event.user_id, event = ?event.kind, "usage limit reached");
        } else {
            tracing::debug!(user_id = %event.user_id, event = ?event.kind, "usage event");
        }

        if let Some(ref writer) = self.file_writer {
            if let (Ok(mut w), Ok(line)) = (writer.lock(), serde_json::to_string(&event)) {
                let _ = writeln!(w, "{}", line);
                let _ = w.flush();
            }
        }

        // No receivers is fine
        let _ = self.sender.send(event.clone());

        if let Ok(mut events) = self.events.lock() {
            events.push_back(event);
            while events.len() > self.config.max_memory_events {
                events.pop_front();
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.sender.subscribe()
    }

    /// Most recent first
    pub fn recent_events(&self, count: usize) -> Vec<UsageEvent> {
        self.events
            .lock()
            .map(|events| events.iter().rev().take(count).cloned().collect())
            .unwrap_or_default()
    }

    pub fn events_for_user(&self, user_id: &str) -> Vec<UsageEvent> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.user_id == user_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_memory() {
        let log = EventLog::new(EventLogConfig {
            max_memory_events: 2,
            ..Default::default()
        })
        .unwrap();

        for limit in 0..5 {
            log.record(UsageEvent::new("u1", UsageEventKind::DailyLimitExceeded { limit }));
        }

        let recent = log.recent_events(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, UsageEventKind::DailyLimitExceeded { limit: 4 });
        assert_eq!(recent[0].session_id.as_deref(), Some(log.session_id()));
    }

    #[test]
    fn test_json_lines_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.jsonl");
        let log = EventLog::new(EventLogConfig {
            log_file: Some(path.clone()),
            ..Default::default()
        })
        .unwrap();

        log.record(UsageEvent::new(
            "u1",
            UsageEventKind::TierUpgraded {
                from: TierName::Free,
                to: TierName::Pro,
            },
        ));

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: UsageEvent = serde_json::from_str(content.lines().next().unwrap()).unwrap();
        assert_eq!(parsed.user_id, "u1");
        assert!(content.contains("\"type\":\"tier_upgraded\""));
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let log = EventLog::in_memory();
        let mut rx = log.subscribe();

        log.record(UsageEvent::new(
            "u2",
            UsageEventKind::QueryConsumed {
                queries_today: 1,
                queries_this_month: 1,
            },
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id, "u2");
        assert!(!event.kind.is_limit());
    }
}
