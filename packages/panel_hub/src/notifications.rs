//! The hub's notification surface.
//!
//! Rendering means broadcasting: every notifier action fans out as a JSON
//! frame to whoever is subscribed on `/notifications`. With nobody
//! subscribed an action is a quiet no-op, the same way a desktop
//! notification shows fine with nobody looking at the screen.

use serde::{Deserialize, Serialize};
use shell_cache::{NotificationSink, ShellCacheError};
use tokio::sync::broadcast;

const ACTION_BUFFER: usize = 32;

/// One rendered notification action, streamed to watchers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NotificationAction {
    /// Show (or replace) the status notification.
    Show { title: String, body: String },
    /// Retract the status notification.
    Close,
    /// Raise an application window, opening one at the root if none exists.
    Focus,
}

/// Frames a watcher may send back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WatcherEvent {
    /// The user clicked the rendered notification.
    #[serde(rename = "notificationclick")]
    Click,
}

/// Broadcast-backed [`NotificationSink`].
#[derive(Clone)]
pub struct BroadcastSink {
    actions: broadcast::Sender<NotificationAction>,
}

impl BroadcastSink {
    pub fn new() -> Self {
        let (actions, _) = broadcast::channel(ACTION_BUFFER);
        Self { actions }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationAction> {
        self.actions.subscribe()
    }

    fn publish(&self, action: NotificationAction) {
        // A send error only means nobody is subscribed right now.
        let _ = self.actions.send(action);
    }
}

impl NotificationSink for BroadcastSink {
    fn show(&self, title: &str, body: &str) -> Result<(), ShellCacheError> {
        self.publish(NotificationAction::Show {
            title: title.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    fn close(&self) -> Result<(), ShellCacheError> {
        self.publish(NotificationAction::Close);
        Ok(())
    }

    fn focus(&self) -> Result<(), ShellCacheError> {
        self.publish(NotificationAction::Focus);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actions_serialize_with_kebab_case_tags() {
        let action = NotificationAction::Show {
            title: "Alert".to_string(),
            body: "Door open".to_string(),
        };
        let json = serde_json::to_value(&action).unwrap();
        assert_eq!(json["type"], "show");
        assert_eq!(json["title"], "Alert");
        assert_eq!(json["body"], "Door open");

        let json = serde_json::to_value(NotificationAction::Close).unwrap();
        assert_eq!(json["type"], "close");
        let json = serde_json::to_value(NotificationAction::Focus).unwrap();
        assert_eq!(json["type"], "focus");
    }

    #[test]
    fn click_parses_from_wire_json() {
        let event: WatcherEvent = serde_json::from_str(r#"{"type":"notificationclick"}"#).unwrap();
        assert_eq!(event, WatcherEvent::Click);
    }

    #[tokio::test]
    async fn sink_fans_out_to_every_subscriber() {
        let sink = BroadcastSink::new();
        let mut first = sink.subscribe();
        let mut second = sink.subscribe();

        sink.show("Alert", "Door open").unwrap();
        sink.close().unwrap();

        for rx in [&mut first, &mut second] {
            assert_eq!(
                rx.recv().await.unwrap(),
                NotificationAction::Show {
                    title: "Alert".to_string(),
                    body: "Door open".to_string(),
                }
            );
            assert_eq!(rx.recv().await.unwrap(), NotificationAction::Close);
        }
    }

    #[test]
    fn sink_without_watchers_is_a_quiet_noop() {
        let sink = BroadcastSink::new();
        assert!(sink.show("Alert", "Door open").is_ok());
        assert!(sink.close().is_ok());
        assert!(sink.focus().is_ok());
    }
}
