//! Observer hooks for scheduler activity.
//!
//! A [`SchedulerObserver`] is injected into the [`crate::Scheduler`] and is
//! told about dispatches, errors and terminal states. Logging happens
//! independently through `tracing`; observers are for callers that need to
//! react to those events. [`EventBus`] rebroadcasts them to any number of
//! subscribers.

use serde::Serialize;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::handle::TaskState;
use crate::task::{Method, Priority};
use crate::traits::DispatchError;

/// Identifying details of a task, captured when it leaves the queue.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TaskInfo {
    pub id: u64,
    pub method: Method,
    /// Priority at dispatch, after any starvation promotion.
    pub priority: Priority,
    /// Time spent queued.
    pub waited: Duration,
}

pub trait SchedulerObserver: Send + Sync {
    fn on_dispatch(&self, _task: &TaskInfo, _backend: &str, _model: &str) {}

    /// Selection failures, skipped backends and execution errors.
    fn on_error(&self, _task: &TaskInfo, _error: &DispatchError) {}

    fn on_finish(&self, _task: &TaskInfo, _state: TaskState) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullObserver;

impl SchedulerObserver for NullObserver {}

/// Events emitted through an [`EventBus`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum SchedulerEvent {
    Dispatched {
        task: TaskInfo,
        backend: String,
        model: String,
    },
    Error {
        task: TaskInfo,
        error: String,
    },
    Finished {
        task: TaskInfo,
        state: TaskState,
    },
}

/// Broadcast bus for [`SchedulerEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SchedulerEvent>,
}

impl EventBus {
    pub const DEFAULT_CAPACITY: usize = 64;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Obtain a receiver subscribed to all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<SchedulerEvent> {
        self.sender.subscribe()
    }

    /// Broadcast an event to all subscribers. Errors are ignored.
    pub fn send(&self, event: SchedulerEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerObserver for EventBus {
    fn on_dispatch(&self, task: &TaskInfo, backend: &str, model: &str) {
        self.send(SchedulerEvent::Dispatched {
            task: task.clone(),
            backend: backend.to_string(),
            model: model.to_string(),
        });
    }

    fn on_error(&self, task: &TaskInfo, error: &DispatchError) {
        self.send(SchedulerEvent::Error {
            task: task.clone(),
            error: error.to_string(),
        });
    }

    fn on_finish(&self, task: &TaskInfo, state: TaskState) {
        self.send(SchedulerEvent::Finished {
            task: task.clone(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> TaskInfo {
        TaskInfo {
            id: 1,
            method: Method::Generate,
            priority: Priority::DEFAULT,
            waited: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn bus_rebroadcasts_observer_calls() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.on_dispatch(&info(), "a", "m1");
        bus.on_error(&info(), &DispatchError::NoSuitableModel);
        match rx.recv().await {
            Ok(SchedulerEvent::Dispatched { backend, model, .. }) => {
                assert_eq!((backend.as_str(), model.as_str()), ("a", "m1"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv().await {
            Ok(SchedulerEvent::Error { error, .. }) => {
                assert_eq!(error, DispatchError::NoSuitableModel.to_string());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn send_without_subscribers_is_harmless() {
        let bus = EventBus::with_capacity(0);
        bus.on_finish(&info(), TaskState::Completed);
    }
}
