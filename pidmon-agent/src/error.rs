use pidmon_common::EntityId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    /// The entity exited; expected and terminal for its subtree only
    #[error("Entity {0} is gone")]
    EntityGone(EntityId),

    /// Another dispatcher already supervises this entity
    #[error("Entity {0} is already supervised")]
    DuplicateEntity(EntityId),

    #[error("Permission denied while inspecting entity {0}")]
    PermissionDenied(EntityId),

    #[error("Failed to inspect entity {id}: {message}")]
    Introspection { id: EntityId, message: String },

    #[error("Renderer `{command}` failed with {status}")]
    RendererFailure { command: String, status: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    pub fn is_entity_gone(&self) -> bool {
        matches!(self, AgentError::EntityGone(_))
    }

    /// Short, stable name of the error kind for log records
    pub fn kind(&self) -> &'static str {
        match self {
            AgentError::EntityGone(_) => "entity_gone",
            AgentError::DuplicateEntity(_) => "duplicate_entity",
            AgentError::PermissionDenied(_) => "permission_denied",
            AgentError::Introspection { .. } => "introspection",
            AgentError::RendererFailure { .. } => "renderer_failure",
            AgentError::Config(_) => "config",
            AgentError::Io(_) => "io",
        }
    }

    /// Classify an IO error raised while reading data about `id`
    pub fn from_io(id: EntityId, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => AgentError::EntityGone(id),
            std::io::ErrorKind::PermissionDenied => AgentError::PermissionDenied(id),
            _ => AgentError::Introspection {
                id,
                message: err.to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_from_io_classification() {
        let id = EntityId::Process(10);

        let gone = AgentError::from_io(id, io::Error::from(io::ErrorKind::NotFound));
        assert!(gone.is_entity_gone());

        let denied = AgentError::from_io(id, io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(denied.kind(), "permission_denied");

        let other = AgentError::from_io(id, io::Error::other("boom"));
        assert_eq!(other.kind(), "introspection");
        assert!(other.to_string().contains("boom"));
    }
}
