//! # Jobgraph
//!
//! Compiles a declared graph of GPU jobs into canonical command lists plus the resource barriers between them.
//!
//! Jobs are declared through a [JobBuilder]. Each job names the resources it touches and the jobs it depends on. The
//! [JobCompiler] then walks the graph from a [RootJob] and produces a [CompileResult]:
//!
//! - Ordered [CanonicalJobPath]s. Each path is recorded into one command list. A path only depends on paths with a
//!   smaller id.
//! - The minimal set of [GpuBarrier]s. A transition within a path is a single barrier. A transition between paths is
//!   split into a begin half after the producing job and an end half before the consuming job.
//! - Stale jobs that could never be placed, and [BarrierViolation]s where concurrently running paths would use a
//!   resource in incompatible states. Neither is fatal, but such a result is not submittable.
//!
//! Resource state bookkeeping lives in a shared [ResourceStateTable](jobgraph_state::ResourceStateTable). A
//! [StateCache] can carry the last known state of every resource from one compilation into the next.
//!
//! ## Features
//!
//! - `logging`: reports warnings and errors through the `log` crate.
//! - `log_reasoning`: additionally traces fusion and barrier decisions.

mod barrier;
mod builder;
mod cache;
mod canonical;
mod compiler;
mod error;
mod job;
mod path;
mod resource;
mod result;
pub mod traverse;

pub use barrier::{BarrierTiming, BarrierViolation, GpuBarrier, LocationGpuState, ResourceStateBuilder, ScopeRecord};
pub use builder::{
    ChainableJob, ClearRenderTargetJob, ComputeJob, ConstantBufferJob, CopyJob, DisplayJob, DrawJob, GpuJob,
    GroupJob, JobBuilder, RootJob,
};
pub use cache::StateCache;
pub use compiler::{CompilerConfig, JobCompiler};
pub use error::{CompileError, JobError, TraversalError};
pub use job::{
    Bindings, ClearData, ComputeData, CopyData, DisplayData, DrawData, DrawParams, JobHandle, JobKind, JobNode,
    JobPayload, JobTable,
};
pub use path::{BarrierList, CanonicalJobPath, Dependency, Location, PathId, PathNode};
pub use resource::{GpuResource, GpuState, RenderTargets, ResourceRef, ResourceTable};
pub use result::CompileResult;

pub use jobgraph_state;
