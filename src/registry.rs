//! Action registration and scheduling.
//!
//! Any unit of work the monitoring loop should drive (a data group, a
//! discrete I/O bank, a custom task) implements [`PlcAction`] and is
//! registered with the connection's [`ActionRegistry`]. Actions run in
//! registration order on every tick while the link is online.
//!
//! Registration and execution share one lock, so the action set is never
//! observed partially updated. A failing action is isolated: its error is
//! logged and reported as an [`LinkEvent::ActionFailed`] notification, and
//! the remaining actions still run in the same tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::events::{EventBus, LinkEvent};

/// A unit of work the monitoring loop can invoke on demand.
#[async_trait]
pub trait PlcAction: Send + Sync {
    /// Name used in logs and failure notifications.
    fn name(&self) -> &str;

    /// Performs the action's read and/or write work.
    async fn execute(&self) -> Result<()>;
}

/// Insertion-ordered, duplicate-free set of registered actions.
///
/// Identity is the shared handle: registering the same `Arc` twice keeps a
/// single entry. Mutation awaits any in-flight execution tick.
pub struct ActionRegistry {
    actions: Mutex<Vec<Arc<dyn PlcAction>>>,
    online: AtomicBool,
    events: EventBus,
}

impl ActionRegistry {
    /// Creates an empty registry reporting failures on `events`.
    pub fn new(events: EventBus) -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            online: AtomicBool::new(false),
            events,
        }
    }

    /// Enables or disables action execution.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns whether action execution is enabled.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Adds an action if it is not already registered.
    pub async fn register(&self, action: Arc<dyn PlcAction>) {
        let mut actions = self.actions.lock().await;
        if actions.iter().any(|a| Arc::ptr_eq(a, &action)) {
            return;
        }
        info!(action = action.name(), "action registered");
        actions.push(action);
    }

    /// Removes an action; a no-op if it is not registered.
    pub async fn remove(&self, action: &Arc<dyn PlcAction>) {
        let mut actions = self.actions.lock().await;
        let before = actions.len();
        actions.retain(|a| !Arc::ptr_eq(a, action));
        if actions.len() < before {
            info!(action = action.name(), "action removed");
        }
    }

    /// Returns the number of registered actions.
    pub async fn len(&self) -> usize {
        self.actions.lock().await.len()
    }

    /// Returns whether the registry is empty.
    pub async fn is_empty(&self) -> bool {
        self.actions.lock().await.is_empty()
    }

    /// Executes all registered actions in registration order.
    ///
    /// A no-op while offline or empty. The registry lock is held for the
    /// whole tick, so register/remove calls wait for it to finish. Each
    /// action's failure is reported and the remaining actions still run.
    pub async fn execute_all(&self) {
        if !self.is_online() {
            return;
        }
        let actions = self.actions.lock().await;
        for action in actions.iter() {
            if let Err(err) = action.execute().await {
                warn!(action = action.name(), error = %err, "action failed");
                self.events.emit(LinkEvent::ActionFailed {
                    action: action.name().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("online", &self.is_online())
            .finish()
    }
}
