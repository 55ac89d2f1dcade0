use std::fmt::Display;

use crate::{
    JobHandle,
    barrier::{BarrierViolation, GpuBarrier, LocationGpuState},
    path::{CanonicalJobPath, Location, PathId},
    resource::ResourceRef,
};

///Output of one compilation.
///
///Paths are ordered so that every path only depends on paths with a smaller id. Barrier indices stored in the paths'
/// nodes point into [CompileResult::barriers].
#[derive(Clone, Debug)]
pub struct CompileResult {
    pub(crate) paths: Vec<CanonicalJobPath>,
    pub(crate) barriers: Vec<GpuBarrier>,
    pub(crate) stale_jobs: Vec<JobHandle>,
    pub(crate) violations: Vec<BarrierViolation>,
    pub(crate) final_states: Vec<(ResourceRef, LocationGpuState)>,
}

impl CompileResult {
    pub fn paths(&self) -> &[CanonicalJobPath] {
        &self.paths
    }

    pub fn path(&self, id: PathId) -> Option<&CanonicalJobPath> {
        self.paths.get(id.index())
    }

    pub fn barriers(&self) -> &[GpuBarrier] {
        &self.barriers
    }

    ///Jobs that could never be processed, because they take part in a cycle or wait on a job that is not reachable
    /// from the root. Sorted by handle.
    pub fn stale_jobs(&self) -> &[JobHandle] {
        &self.stale_jobs
    }

    pub fn violations(&self) -> &[BarrierViolation] {
        &self.violations
    }

    ///Last state of every used resource. Feed this into a [StateCache](crate::StateCache) once the result was
    /// submitted.
    pub fn final_states(&self) -> &[(ResourceRef, LocationGpuState)] {
        &self.final_states
    }

    ///True if every reachable job was placed and no barrier violation occurred.
    pub fn is_submittable(&self) -> bool {
        self.stale_jobs.is_empty() && self.violations.is_empty()
    }

    pub fn job_count(&self) -> usize {
        self.paths.iter().map(|p| p.len()).sum()
    }

    pub fn location_of(&self, job: JobHandle) -> Option<Location> {
        self.paths.iter().find_map(|path| {
            path.jobs()
                .position(|j| j == job)
                .map(|node| Location::new(path.id(), node as u32))
        })
    }

    ///Barriers to record before the job at `location`.
    pub fn pre_barriers(&self, location: Location) -> impl Iterator<Item = &GpuBarrier> {
        self.path(location.path)
            .and_then(|p| p.nodes().get(location.node as usize))
            .into_iter()
            .flat_map(|n| n.pre_barriers.iter())
            .filter_map(|idx| self.barriers.get(*idx as usize))
    }

    ///Barriers to record after the job at `location`.
    pub fn post_barriers(&self, location: Location) -> impl Iterator<Item = &GpuBarrier> {
        self.path(location.path)
            .and_then(|p| p.nodes().get(location.node as usize))
            .into_iter()
            .flat_map(|n| n.post_barriers.iter())
            .filter_map(|idx| self.barriers.get(*idx as usize))
    }
}

impl Display for CompileResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "CompileResult:")?;
        for path in &self.paths {
            write!(f, "  {path}")?;
        }
        writeln!(f, "  barriers:")?;
        for (idx, barrier) in self.barriers.iter().enumerate() {
            writeln!(f, "    {idx}: {barrier}")?;
        }
        if !self.stale_jobs.is_empty() {
            writeln!(f, "  stale: {:?}", self.stale_jobs)?;
        }
        for violation in &self.violations {
            writeln!(f, "  violation: {violation}")?;
        }
        Ok(())
    }
}
