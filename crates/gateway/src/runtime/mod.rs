//! Runtime: orchestrator loop, task queue, worker pool, cancellation and
//! rate limiting.

pub mod cancel;
pub mod orchestrator;
pub mod queue;
pub mod rate_limit;
pub mod worker;
