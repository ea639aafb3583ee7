pub mod scripted;

pub use scripted::{EngineCall, EngineScript, ScriptedEngine, ScriptedProbe};
