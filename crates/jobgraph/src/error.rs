use jobgraph_state::StateTableError;
use thiserror::Error;

use crate::{JobHandle, JobKind, traverse::VisitorHook};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error("Job {0} does not exist (anymore?)")]
    InvalidHandle(JobHandle),
    #[error("Job {job} is a {found:?} job, but {expected:?} was expected. Was the handle recycled?")]
    KindMismatch {
        job: JobHandle,
        expected: JobKind,
        found: JobKind,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TraversalError {
    #[error("Job table is empty")]
    EmptyJobTable,
    #[error("Traversal root {0} is not a live job")]
    InvalidRoot(JobHandle),
    #[error("Job {0} was visited, but is not live anymore")]
    VanishedJob(JobHandle),
    #[error("Job {from} lists {to} as successor, but {to} is not live")]
    DanglingEdge { from: JobHandle, to: JobHandle },
    #[error("Visitor aborted traversal at {job} in {hook:?}")]
    Aborted { job: JobHandle, hook: VisitorHook },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Job error: {0}")]
    Job(#[from] JobError),
    #[error("Traversal error: {0}")]
    Traversal(#[from] TraversalError),
    #[error("Resource state error: {0}")]
    StateTable(#[from] StateTableError),
    #[error("Compilation must start at a root job, but {job} is a {found:?} job")]
    NotARoot { job: JobHandle, found: JobKind },
}

#[cfg(test)]
mod tests {
    use super::*;

    //Should be thread safe, so it can be passed between threads.
    static_assertions::assert_impl_all!(JobError: Send, Sync);
    static_assertions::assert_impl_all!(TraversalError: Send, Sync);
    static_assertions::assert_impl_all!(CompileError: Send, Sync);
}
