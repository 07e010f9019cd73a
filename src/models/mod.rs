pub mod task;
pub mod user;

pub use task::{Task, TaskChange, TaskPatch};
pub use user::{Identity, User};
