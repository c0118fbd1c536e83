//! Component Lifecycle Module
//!
//! Starts components in dependency order, propagates one shared shutdown
//! signal, and stops them in exact reverse order under per-hook deadlines.
//!
//! # Lifecycle Phases
//!
//! ```text
//! 1. Assembly (RuntimeBuilder::component)
//!    ↓
//! 2. Graph validation + start order     ← fails before anything starts
//!    ↓
//! 3. construct → publish → on_start     ← per component, in order
//!    ↓
//! [Running...]
//!    ↓
//! 4. Shutdown signal (SIGINT/SIGTERM, parent token, explicit trigger)
//!    ↓
//! 5. on_stop                            ← per component, reverse order,
//!                                          each under its stop_timeout
//!    ↓
//! 6. ShutdownReport
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use keelson::component::ComponentDescriptor;
//! use keelson::lifecycle::Runtime;
//!
//! let report = Runtime::builder()
//!     .component(
//!         ComponentDescriptor::new("cache", |_deps| async { Ok(Cache::new()) })
//!             .on_stop(|cache, ctx| async move {
//!                 cache.flush_until(ctx.deadline()).await;
//!                 Ok(())
//!             }),
//!     )
//!     .build()?
//!     .run()
//!     .await?;
//! ```

mod error;
mod runtime;
mod sequencer;
mod shutdown;
mod signal;

pub use error::{LifecycleError, Result};
pub use runtime::{RunningRuntime, Runtime, RuntimeBuilder};
pub use sequencer::{Sequencer, ShutdownReport, StopOutcome, StopRecord};
pub use shutdown::{SignalPropagator, termination_signal, wait_for_shutdown};
pub use signal::{ShutdownReason, ShutdownSignal, ShutdownTrigger, StopContext};
