//! Read-side bandwidth shaping for sockets.
//!
//! The [`Shaper`] sits between a caller and the real `socket`, `read` and `close` primitives
//! (provided through [`RealIo`]). Descriptors created with the shaped address family are tracked
//! in a [`Registry`]; reads on them are capped to a fixed allotment and paced by the
//! [`IntervalBudget`] so throughput converges on the configured byte limit. Everything else is
//! passed through untouched.
use thiserror::Error;

mod budget;
mod clock;
mod io;
mod options;
mod registry;
mod shaper;
mod stats;

pub use budget::*;
pub use clock::*;
pub use io::*;
pub use options::*;
pub use registry::*;
pub use shaper::*;
pub use stats::*;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Clock error: {0}")]
    Clock(#[from] ClockError),
}
