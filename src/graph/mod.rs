// src/graph/mod.rs

//! Task graph: build-time expansion of stages × sessions into a dependency
//! DAG whose leaves are external-tool invocations.

pub mod builder;
pub mod task;
pub mod validate;

pub use builder::{build, BuildRequest, BuiltGraph};
pub use task::{MasterPublish, Task, TaskAction, TaskInput, ToolInvocation};
