//! Named single-threaded execution lanes and bounded thread pools
//!
//! A *lane* is a named FIFO queue drained by one dedicated worker thread:
//! everything posted to a lane runs on that thread, in order, so
//! lane-confined state needs no locks. Two bounded pools complement the
//! lanes for parallel work: a static pool with a fixed worker complement
//! and a dynamic pool that grows on demand up to a hard cap.
//!
//! The global registry ties it together. [`initialize`] creates the
//! built-in "main" and "background" lanes plus both pools; after that,
//! work moves between targets by posting or switching:
//!
//! ```no_run
//! use lanes::{initialize, post_to_background, switch_to_main};
//!
//! initialize();
//!
//! post_to_background(|| {
//!     let result = expensive_computation();
//!     let to_main = switch_to_main().unwrap();
//!     to_main.dispatch(move || present(result)).unwrap();
//! })
//! .unwrap()
//! .wait();
//! # fn expensive_computation() -> u32 { 0 }
//! # fn present(_: u32) {}
//! ```
//!
//! Every post returns a [`CompletionHandle`] that settles exactly once as
//! completed, cancelled or faulted. Panics inside posted actions never
//! kill a worker; they are captured as a [`Fault`], delivered through the
//! handle and to the process-wide handler installed with
//! [`set_fault_handler`].

mod cancel;
mod completion;
mod current;
mod error;
mod hook;
mod lane;
mod pool;
mod queue;
mod registry;
mod switch;
mod timer;

pub use cancel::{CancellationSource, CancellationToken};
pub use completion::{CompletionHandle, Outcome};
pub use error::{LaneError, Result};
pub use hook::{clear_fault_handler, set_fault_handler, Fault};
pub use lane::{live_worker_count, Dispatcher, Job, Lane, LaneId};
pub use pool::{DynamicPool, StaticPool};
pub use registry::{
    background_lane, contains_lane, create_lane, create_lane_with_dispatcher, current_kind,
    current_lane_id,
    current_lane_name, delay, dynamic_pool, initialize, initialize_with, is_background,
    is_dynamic_pool, is_initialized, is_main, is_static_pool, lane, main_lane, post_to_background,
    post_to_dynamic_pool, post_to_lane, post_to_main, post_to_static_pool, remove_lane, shutdown,
    static_pool, switch_to_background, switch_to_dynamic_pool, switch_to_lane, switch_to_main,
    switch_to_static_pool, where_am_i, InitOptions, LaneKey, TargetKind, BACKGROUND_LANE,
    MAIN_LANE,
};
pub use switch::Switch;
