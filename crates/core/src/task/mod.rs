//! Tasks and the registry that owns them.

mod registry;
mod types;

pub use registry::{StatusCounts, TaskError, TaskRegistry};
pub use types::{InputSpec, OutputSize, Task, TaskStatus};
