// src/exec/mod.rs

//! Execution layer: up-to-date signatures, per-task workspaces, the
//! ready-queue executor, and run reporting.

pub mod executor;
pub mod report;
pub mod signature;
pub mod workspace;

pub use executor::{cancel_flag, CancelFlag, ExecOptions, Executor};
pub use report::{ReportRow, RunReport, TaskStatus};
pub use signature::{compute_signature, SignatureStore};
