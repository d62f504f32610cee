pub mod collaborator;
pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logger;
pub mod path;
pub mod scenario;
pub mod service;
pub mod session;
pub mod template;

pub use engine::{Response, ScenarioEngine};
pub use error::{CollaboratorError, ConfigError, EngineError, GraphError};
pub use scenario::{NodeKind, Scenario, ScenarioNode};
pub use service::DialogService;
