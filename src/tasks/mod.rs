/// Task model and lifecycle management
pub mod task;

pub use task::{Task, TaskPriority, TaskStatus, TaskType};
