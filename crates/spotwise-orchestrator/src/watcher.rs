//! Interruption notice watcher
//!
//! Providers announce reclamation ahead of time (AWS gives a 2-minute
//! warning through instance metadata). Whatever produces those notices
//! exposes them as a [`Stream`]; the watcher feeds each one through
//! [`SpotDecisionManager::handle_interruption_event`] until the stream ends
//! or the watch is cancelled.
//!
//! ## Notice format
//!
//! ```json
//! {
//!   "action": "terminate",
//!   "time": "2024-01-17T10:30:00Z"
//! }
//! ```

use crate::manager::SpotDecisionManager;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use spotwise_core::{InterruptionEvent, Result, SpotwiseError};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reclamation grace period AWS gives spot instances (seconds)
pub const GRACE_PERIOD_SECONDS: u64 = 120;

/// What the provider will do to the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeAction {
    /// Instance will be terminated
    Terminate,
    /// Instance will be stopped
    Stop,
    /// Instance will be hibernated
    Hibernate,
}

impl NoticeAction {
    /// Parse the provider's action string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "terminate" => Some(Self::Terminate),
            "stop" => Some(Self::Stop),
            "hibernate" => Some(Self::Hibernate),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct InstanceAction {
    action: String,
    time: String,
}

/// A reclamation notice for one node
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptionNotice {
    /// Registered provider name
    pub provider: String,

    /// Node being reclaimed
    pub node_id: String,

    /// Action the provider will take
    pub action: NoticeAction,

    /// When the action happens, if announced
    pub time: Option<DateTime<Utc>>,
}

impl InterruptionNotice {
    /// Terminate notice with no announced time
    pub fn terminate(provider: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            node_id: node_id.into(),
            action: NoticeAction::Terminate,
            time: None,
        }
    }

    /// Parse an instance-action document
    pub fn from_instance_action(
        provider: impl Into<String>,
        node_id: impl Into<String>,
        body: &str,
    ) -> Result<Self> {
        let raw: InstanceAction = serde_json::from_str(body)
            .map_err(|e| SpotwiseError::fatal(format!("Invalid instance action: {}", e)))?;

        let action = NoticeAction::parse(&raw.action)
            .ok_or_else(|| SpotwiseError::fatal(format!("Unknown spot action: {}", raw.action)))?;

        let time = DateTime::parse_from_rfc3339(&raw.time)
            .map_err(|e| SpotwiseError::fatal(format!("Invalid timestamp: {}", e)))?
            .with_timezone(&Utc);

        Ok(Self {
            provider: provider.into(),
            node_id: node_id.into(),
            action,
            time: Some(time),
        })
    }

    /// Seconds left before the action, measured from `now`
    pub fn seconds_until(&self, now: DateTime<Utc>) -> Option<u64> {
        self.time
            .map(|time| if time > now { (time - now).num_seconds().max(0) as u64 } else { 0 })
    }

    /// Event handed to the manager.
    ///
    /// A notice without an announced time gets the standard grace period.
    pub fn to_event(&self) -> InterruptionEvent {
        let event = InterruptionEvent::new(&self.provider, &self.node_id);
        let secs = self
            .seconds_until(event.timestamp)
            .unwrap_or(GRACE_PERIOD_SECONDS);
        event.with_seconds_until_action(secs)
    }
}

/// Counters for one watch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    /// Notices taken off the stream
    pub received: usize,
    /// Notices whose provider handling succeeded
    pub handled: usize,
    /// Notices that ended in an error
    pub failed: usize,
    /// The watch stopped because it was cancelled
    pub cancelled: bool,
}

/// Feeds interruption notices to a [`SpotDecisionManager`]
#[derive(Clone)]
pub struct InterruptionWatcher {
    manager: Arc<SpotDecisionManager>,
}

impl InterruptionWatcher {
    /// Create a watcher dispatching to `manager`
    pub fn new(manager: Arc<SpotDecisionManager>) -> Self {
        Self { manager }
    }

    /// Handle notices one at a time until the stream ends or `cancel` fires
    pub async fn watch<S>(&self, notices: S, cancel: &CancellationToken) -> WatchSummary
    where
        S: Stream<Item = InterruptionNotice>,
    {
        futures::pin_mut!(notices);
        let mut summary = WatchSummary::default();

        info!("Watching for spot interruption notices");

        loop {
            let notice = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    info!(received = summary.received, "Interruption watch cancelled");
                    summary.cancelled = true;
                    break;
                }
                next = notices.next() => match next {
                    Some(notice) => notice,
                    None => {
                        debug!("Interruption notice stream ended");
                        break;
                    }
                },
            };

            summary.received += 1;
            let event = notice.to_event();
            info!(
                provider = %notice.provider,
                node_id = %notice.node_id,
                action = ?notice.action,
                seconds_until_action = ?event.seconds_until_action,
                "Spot interruption notice"
            );

            match self.manager.handle_interruption_event(event).await {
                Ok(()) => summary.handled += 1,
                Err(e) => {
                    summary.failed += 1;
                    warn!(node_id = %notice.node_id, error = %e, "Interruption handling failed");
                }
            }
        }

        summary
    }

    /// Run [`watch`](Self::watch) on its own task
    pub fn spawn<S>(self, notices: S, cancel: CancellationToken) -> JoinHandle<WatchSummary>
    where
        S: Stream<Item = InterruptionNotice> + Send + 'static,
    {
        tokio::spawn(async move { self.watch(notices, &cancel).await })
    }
}
