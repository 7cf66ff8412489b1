pub mod args;
pub mod bridge;
pub mod context;
pub mod node;
pub mod value;

use thiserror::Error;

pub use context::{ScriptEffect, SharedContext, SimulationContext};
pub use node::ScriptNode;

pub const FUNCTION_INITIALIZE: &str = "initialize";
pub const FUNCTION_UPDATE: &str = "update";
pub const FUNCTION_WRITE_PROPERTY: &str = "writeProperty";
pub const FUNCTION_HIT: &str = "hit";
pub const FUNCTION_COLLISION_WITH_PLAYER: &str = "collisionWithPlayer";
pub const FUNCTION_SET_PATH: &str = "setPath";
pub const FUNCTION_MOVED_TO: &str = "movedTo";
pub const FUNCTION_SET_START_POSITION: &str = "setStartPosition";
pub const FUNCTION_PLAYER_MOVED_TO: &str = "playerMovedTo";
pub const FUNCTION_RETRIEVE_PROPERTIES: &str = "retrieveProperties";
pub const FUNCTION_TIMEOUT: &str = "timeout";

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("failed to read script {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("script {script} failed to load: {message}")]
    Load { script: String, message: String },
    #[error("{script}: {callback} failed: {message}")]
    Callback {
        script: String,
        callback: &'static str,
        message: String,
    },
    #[error("{script}: required function {callback} is not defined")]
    MissingCallback {
        script: String,
        callback: &'static str,
    },
}

impl ScriptError {
    pub fn script(&self) -> &str {
        match self {
            ScriptError::Io { path, .. } => path,
            ScriptError::Load { script, .. }
            | ScriptError::Callback { script, .. }
            | ScriptError::MissingCallback { script, .. } => script,
        }
    }
}
