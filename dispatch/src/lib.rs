//! Capability-aware scheduling of inference work across model servers.
//!
//! Tasks ([`Task`]) are submitted to a [`Scheduler`], queued by priority and
//! dispatched to the least loaded backend in a [`BackendPool`] that serves a
//! model meeting the task's constraints. Output streams back through the
//! returned [`TaskHandle`].
//!
//! ```no_run
//! use dispatch::{Capability, Task};
//!
//! # async fn demo() -> Result<(), dispatch::DispatchError> {
//! let scheduler = dispatch::scheduler_from_env()?;
//! scheduler.spawn();
//! let mut handle = scheduler.submit(Task::generate("Say hi").require(Capability::Fast));
//! while let Some(chunk) = handle.next_chunk().await {
//!     println!("{chunk:?}");
//! }
//! println!("{:?}", handle.outcome().await);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod handle;
pub mod logging;
pub mod model;
pub mod observer;
pub mod pool;
mod queue;
mod relay;
pub mod runner;
pub mod scheduler;
pub mod selector;
pub mod task;
pub mod traits;

pub use client::OllamaClient;
pub use config::{PoolConfig, SchedulerConfig};
pub use handle::{Chunk, Outcome, Output, TaskHandle, TaskState};
pub use logging::init_logging;
pub use model::CapabilityRegistry;
pub use observer::{EventBus, NullObserver, SchedulerEvent, SchedulerObserver, TaskInfo};
pub use pool::{Backend, BackendHealth, BackendPool, BackendSnapshot, LoadGuard, Selection};
pub use runner::{pool_from_env, registry_from_env, scheduler_from_env};
pub use scheduler::Scheduler;
pub use selector::choose_model;
pub use task::{ImageData, Message, Method, ModelConstraints, Priority, Role, Task, TaskInput};
pub use traits::{BackendClient, Capability, ChunkStream, DispatchError};
