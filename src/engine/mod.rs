//! Detection engine boundary.
//!
//! Commands go to the engine through the `DetectionEngine` trait; results come
//! back as typed `EngineEvent` messages on a channel the session controller
//! drains once per tick.

mod backend;
mod backends;
mod event;
mod registry;

pub use backend::{DetectionEngine, EngineFactory};
pub use backends::{EngineCall, EngineScript, ScriptedEngine, ScriptedProbe};
pub use event::{EngineEvent, EngineEvents};
pub use registry::EngineRegistry;
