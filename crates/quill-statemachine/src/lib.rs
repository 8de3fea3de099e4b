//! Quill State Machine: drives stateful entities through their workflows.
//!
//! Each tick, for every registered handler, the runtime leases a batch of due
//! entities, processes each on its own task and persists the outcome. Failed
//! attempts are retried with backoff until the retry limit, then escalated to
//! the entity kind's error state.

pub mod lease;
pub mod processor;
pub mod runtime;
pub mod wait;

pub use lease::LeasedUpdate;
pub use processor::{EntityHandler, ProcessContext, ProcessOutcome};
pub use runtime::{RuntimeHandle, StateMachineRuntime, StateMachineRuntimeBuilder, TickReport};
pub use wait::{ExponentialWait, FixedWait, WaitStrategy};
