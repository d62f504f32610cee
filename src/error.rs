use thiserror::Error;

/// Structural faults in a scenario graph or the cascade that walks it.
///
/// These are non-fatal: the host surfaces a generic apology message and the
/// session stays usable at its current node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),
    #[error("cascade step limit exceeded after {0} steps")]
    StepLimitExceeded(usize),
}

/// A collaborator call (classifier, generative text, REST target, scenario
/// store) failed or timed out.
#[derive(Debug, Clone, Error)]
pub enum CollaboratorError {
    #[error("{service} request timed out")]
    Timeout { service: String },
    #[error("{service} returned status {status}")]
    Status { service: String, status: u16 },
    #[error("{service} transport error: {message}")]
    Transport { service: String, message: String },
    #[error("{service} response could not be decoded: {message}")]
    Decode { service: String, message: String },
}

impl CollaboratorError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, CollaboratorError::Timeout { .. })
    }

    pub fn from_reqwest(service: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CollaboratorError::Timeout { service: service.to_string() }
        } else if err.is_decode() {
            CollaboratorError::Decode { service: service.to_string(), message: err.to_string() }
        } else {
            CollaboratorError::Transport { service: service.to_string(), message: err.to_string() }
        }
    }
}

/// Malformed condition or operation definitions inside scenario data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid scenario configuration: {0}")]
pub struct ConfigError(pub String);

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_error_display() {
        let err = GraphError::NodeNotFound("greet".into());
        assert_eq!(format!("{}", err), "node not found: greet");

        let err = GraphError::StepLimitExceeded(64);
        assert!(format!("{}", err).contains("64"));
    }

    #[test]
    fn collaborator_timeout_detection() {
        let err = CollaboratorError::Timeout { service: "nlu".into() };
        assert!(err.is_timeout());

        let err = CollaboratorError::Status { service: "nlu".into(), status: 503 };
        assert!(!err.is_timeout());
    }

    #[test]
    fn engine_error_wraps_taxonomy() {
        let err: EngineError = GraphError::ScenarioNotFound("billing".into()).into();
        assert!(matches!(err, EngineError::Graph(_)));

        let err: EngineError = ConfigError("bad condition".into()).into();
        assert_eq!(format!("{}", err), "invalid scenario configuration: bad condition");
    }
}
