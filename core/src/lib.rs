//! Reference model for the corner-turn delay-tracking and channelization path.
//!
//! The modules cover the polynomial configuration memory, the fixed-point
//! delay/phase evaluator, the polyphase filterbank, the deripple filter and
//! the oracle that checks hardware traces against the model.

pub mod config;
pub mod delay;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;
pub mod trace;
pub mod verification;

pub use prelude::{ModelError, ModelResult, PacketCoordinate};
