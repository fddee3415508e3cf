//! Worker primitives for component actors.
//!
//! The crate provides the serial executor ([`Strand`]) every component
//! configuration runs on, a blocking hand-off primitive ([`Latch`]), a
//! diagnostics registry ([`StrandRegistry`]) and the shared runtime entry
//! points used to schedule drain loops.

mod class;
mod latch;
mod panic;
mod registry;
mod spawn;
mod strand;

pub use class::TaskClass;
pub use latch::Latch;
pub use panic::panic_message;
pub use registry::{StrandRecord, StrandRegistry};
pub use spawn::{configure_global_runtime, spawn_blocking, spawn_detached_blocking};
pub use strand::{Strand, StrandError};
