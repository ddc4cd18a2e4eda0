use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::capability::{CapabilityError, NotificationCapability, ReminderPayload};

pub const DEFAULT_TITLE: &str = "Diary reminder";
pub const DEFAULT_BODY: &str = "Time to write your diary";

/// Fire path for armed reminders. Runs outside the scheduler and only ever
/// sees the payload captured at arm time.
pub struct ReminderReceiver {
    notifier: Arc<dyn NotificationCapability>,
}

impl ReminderReceiver {
    pub fn new(notifier: Arc<dyn NotificationCapability>) -> Self {
        Self { notifier }
    }

    /// Show the alert for `payload`. Returns whether anything was shown.
    pub async fn deliver(&self, payload: ReminderPayload) -> bool {
        if !self.notifier.has_permission() {
            warn!(
                "Notification permission missing, dropping reminder for {}",
                payload.record_id
            );
            return false;
        }

        let title = non_blank(&payload.title).unwrap_or(DEFAULT_TITLE);
        let body = non_blank(&payload.body_snippet).unwrap_or(DEFAULT_BODY);

        match self.notifier.show(title, body).await {
            Ok(()) => {
                info!("Reminder delivered for {}", payload.record_id);
                true
            }
            Err(e) => {
                warn!("Failed to show reminder for {}: {}", payload.record_id, e);
                false
            }
        }
    }
}

fn non_blank(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Notification stand-in that writes the alert to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl NotificationCapability for LogNotifier {
    async fn show(&self, title: &str, body: &str) -> Result<(), CapabilityError> {
        info!(title = %title, body = %body, "Reminder");
        Ok(())
    }
}
