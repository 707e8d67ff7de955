//! Agent runtime.
//!
//! [`Agent`] owns the lifecycle state machine, the task bookkeeping and the
//! broker wiring; domain logic is supplied by an
//! [`AgentBehavior`](agentweave_protocols::AgentBehavior).
//!
//! ```text
//! INITIALIZING --initialize--> IDLE <--pause/resume--> PAUSED
//!                              IDLE <--task start/end--> BUSY
//!          any --execution error--> ERROR (next task recovers)
//!      running --stop--> TERMINATED --start--> IDLE
//!          any --terminate--> TERMINATED (final)
//! ```

mod execution;
mod runtime;
mod wiring;

pub use runtime::Agent;
