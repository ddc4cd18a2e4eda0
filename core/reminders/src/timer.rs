use diary_schemas::Clock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::capability::{
    CapabilityError, DeliveryPreference, ReminderPayload, TimerCapability, TimerToken,
};
use crate::receiver::ReminderReceiver;

/// Extra delay applied to best-effort registrations
pub const DEFAULT_BEST_EFFORT_SLACK: Duration = Duration::from_secs(60);

struct PendingTimer {
    generation: u64,
    task: JoinHandle<()>,
}

type PendingMap = HashMap<TimerToken, PendingTimer>;

/// Tokio-backed one-shot timers, one task per token.
///
/// Registering an existing token aborts the previous task. Pending timers
/// live only as long as the process; `ReminderScheduler::restore_from`
/// re-creates them on the next start.
pub struct InProcessTimer {
    runtime: Handle,
    clock: Arc<dyn Clock>,
    receiver: Arc<ReminderReceiver>,
    exact_permitted: AtomicBool,
    best_effort_slack: Duration,
    generations: AtomicU64,
    pending: Arc<Mutex<PendingMap>>,
}

impl InProcessTimer {
    pub fn new(runtime: Handle, clock: Arc<dyn Clock>, receiver: Arc<ReminderReceiver>) -> Self {
        Self {
            runtime,
            clock,
            receiver,
            exact_permitted: AtomicBool::new(true),
            best_effort_slack: DEFAULT_BEST_EFFORT_SLACK,
            generations: AtomicU64::new(0),
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_exact_permitted(self, permitted: bool) -> Self {
        self.exact_permitted.store(permitted, Ordering::SeqCst);
        self
    }

    pub fn with_best_effort_slack(mut self, slack: Duration) -> Self {
        self.best_effort_slack = slack;
        self
    }

    /// Grant or revoke exact delivery at runtime
    pub fn set_exact_permitted(&self, permitted: bool) {
        self.exact_permitted.store(permitted, Ordering::SeqCst);
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }

    pub fn is_pending(&self, token: TimerToken) -> bool {
        lock(&self.pending).contains_key(&token)
    }

    fn delay_until(&self, fire_at_ms: i64, delivery: DeliveryPreference) -> Duration {
        let remaining = fire_at_ms.saturating_sub(self.clock.now_ms()).max(0);
        let delay = Duration::from_millis(remaining as u64);
        match delivery {
            DeliveryPreference::Exact => delay,
            DeliveryPreference::BestEffort => delay + self.best_effort_slack,
        }
    }
}

fn lock(pending: &Mutex<PendingMap>) -> MutexGuard<'_, PendingMap> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

impl TimerCapability for InProcessTimer {
    fn can_schedule_exact(&self) -> bool {
        self.exact_permitted.load(Ordering::SeqCst)
    }

    fn register(
        &self,
        token: TimerToken,
        fire_at_ms: i64,
        delivery: DeliveryPreference,
        payload: ReminderPayload,
    ) -> Result<(), CapabilityError> {
        if delivery == DeliveryPreference::Exact && !self.can_schedule_exact() {
            return Err(CapabilityError::ExactNotPermitted);
        }

        let delay = self.delay_until(fire_at_ms, delivery);
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let receiver = self.receiver.clone();
        let pending = self.pending.clone();

        // Held until the entry is in place so a zero-delay task cannot finish first
        let mut timers = lock(&self.pending);

        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;

            {
                let mut timers = lock(&pending);
                if timers.get(&token).map(|t| t.generation) == Some(generation) {
                    timers.remove(&token);
                }
            }

            debug!("Timer {} fired", token);
            receiver.deliver(payload).await;
        });

        if let Some(previous) = timers.insert(token, PendingTimer { generation, task }) {
            previous.task.abort();
            debug!("Timer {} replaced", token);
        }

        info!(
            "Timer {} registered, fires in {}ms ({:?})",
            token,
            delay.as_millis(),
            delivery
        );
        Ok(())
    }

    fn unregister(&self, token: TimerToken) -> Result<(), CapabilityError> {
        if let Some(previous) = lock(&self.pending).remove(&token) {
            previous.task.abort();
            debug!("Timer {} unregistered", token);
        }
        Ok(())
    }
}
