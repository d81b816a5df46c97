/// Agent registry model and tree invariants
pub mod agent;
/// Department handler contract consumed by the Director
pub mod handler;

pub use agent::{Agent, AgentRegistry, AgentStatus, AgentType};
pub use handler::{DepartmentHandler, HandlerMetrics, HandlerOutcome, HandlerStatus};
