pub mod capability;
pub mod receiver;
pub mod scheduler;
pub mod timer;

pub use capability::{
    CapabilityError, DeliveryPreference, NotificationCapability, ReminderPayload,
    TimerCapability, TimerToken, SNIPPET_CHARS,
};
pub use receiver::{LogNotifier, ReminderReceiver, DEFAULT_BODY, DEFAULT_TITLE};
pub use scheduler::{RearmSummary, ReminderAction, ReminderScheduler, Ticket};
pub use timer::{InProcessTimer, DEFAULT_BEST_EFFORT_SLACK};
