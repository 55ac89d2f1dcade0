//! Splits a job graph into canonical command lists.
//!
//! The graph is walked depth first from the root. A job is only processed once all of its dependencies were at least
//! pushed, otherwise it is parked until another path reaches it. Every processed job either continues the path its
//! parent handed down (fusion), or starts a new path. Fusion happens when a job has exactly one successor, and that
//! successor is ready and has no other dependency. Every time a path can't be continued, the states of all jobs that
//! were appended since the last flush are assigned, while the dependencies of the flushing job are applied.

use ahash::AHashSet;
use jobgraph_state::ResourceStateTable;

use crate::{
    CompileError, CompilerConfig, JobHandle, JobNode, JobTable,
    barrier::{ResourceStateBuilder, ScopeRecord},
    path::{CanonicalJobPath, Location, PathId},
    result::CompileResult,
    traverse::{JobVisitor, traverse_bfs, traverse_dfs},
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum VisitState {
    #[default]
    Initial,
    Pushed,
    Popped,
}

#[derive(Debug, Default)]
struct NodeState {
    state: VisitState,
    location: Option<Location>,
    //path a fused parent handed down
    inherited: Option<PathId>,
    scope: Option<ScopeRecord>,
    parked: bool,
}

pub(crate) struct CanonicalListBuilder<'a> {
    jobs: &'a JobTable,
    states: &'a mut ResourceStateTable,
    config: &'a CompilerConfig,
    barriers: ResourceStateBuilder,
    nodes: Vec<NodeState>,
    paths: Vec<CanonicalJobPath>,
    //first node of each path whose states are not assigned yet
    unflushed: Vec<u32>,
    //jobs that currently hold an applied scope, innermost last
    open_scopes: Vec<JobHandle>,
    failure: Option<CompileError>,
}

impl<'a> CanonicalListBuilder<'a> {
    pub(crate) fn new(
        jobs: &'a JobTable,
        states: &'a mut ResourceStateTable,
        config: &'a CompilerConfig,
        barriers: ResourceStateBuilder,
    ) -> Self {
        CanonicalListBuilder {
            jobs,
            states,
            config,
            barriers,
            nodes: Vec::new(),
            paths: Vec::new(),
            unflushed: Vec::new(),
            open_scopes: Vec::new(),
            failure: None,
        }
    }

    pub(crate) fn build(mut self, root: JobHandle) -> Result<CompileResult, CompileError> {
        let jobs = self.jobs;
        if let Err(e) = traverse_dfs(jobs, root, &mut self) {
            self.unwind();
            return Err(self.failure.take().unwrap_or(CompileError::from(e)));
        }
        debug_assert!(self.open_scopes.is_empty(), "unbalanced barrier scopes");

        let stale_jobs = self.collect_stale()?;
        #[cfg(feature = "logging")]
        if !stale_jobs.is_empty() {
            log::warn!(
                "{} job(s) are not reachable in dependency order: {:?}",
                stale_jobs.len(),
                stale_jobs
            );
        }

        let barriers = self
            .barriers
            .store_barriers(&mut self.paths, self.config.emit_barriers_on_violation);

        Ok(CompileResult {
            paths: self.paths,
            barriers,
            stale_jobs,
            violations: self.barriers.violations().to_vec(),
            final_states: self.barriers.final_states(),
        })
    }

    fn visit_state(&self, handle: JobHandle) -> VisitState {
        self.nodes
            .get(handle.index())
            .map(|n| n.state)
            .unwrap_or_default()
    }

    //Follow-up job that continues the current path, if any.
    fn fusable_successor(&self, node: &JobNode) -> Option<JobHandle> {
        if !self.config.fuse_linear_chains || node.successor_count() != 1 {
            return None;
        }
        let successor = node.successors().next()?;
        let successor_node = self.jobs.get(successor)?;
        (successor_node.dependencies().len() == 1 && self.can_process(successor, successor_node))
            .then_some(successor)
    }

    //Latest locations of all real jobs `node` waits on, at most one per path. Structural dependencies are resolved
    // to whatever they wait on.
    fn dependency_locations(&self, node: &JobNode) -> Vec<Location> {
        let mut pending: Vec<JobHandle> = node.dependencies().to_vec();
        let mut seen = AHashSet::default();
        let mut locations: Vec<Location> = Vec::new();

        while let Some(dependency) = pending.pop() {
            if !seen.insert(dependency) {
                continue;
            }
            if let Some(location) = self.nodes.get(dependency.index()).and_then(|n| n.location) {
                locations.push(location);
            } else if let Some(dep_node) = self.jobs.get(dependency) {
                if dep_node.kind().is_structural() {
                    pending.extend_from_slice(dep_node.dependencies());
                }
            }
        }

        locations.sort();
        //keep the latest node per path
        locations.reverse();
        locations.dedup_by_key(|l| l.path);
        locations
    }

    fn new_path(&mut self) -> PathId {
        let id = PathId::from_index(self.paths.len());
        self.paths.push(CanonicalJobPath::new(id));
        self.unflushed.push(0);
        id
    }

    //Assigns states of all not yet flushed nodes of `path`, with `handle` owning the applied scope.
    fn flush(&mut self, handle: JobHandle, path: PathId) -> Result<(), CompileError> {
        let from = self.unflushed[path.index()];
        let to = self.paths[path.index()].len() as u32;
        if from >= to {
            return Ok(());
        }

        #[cfg(feature = "log_reasoning")]
        log::trace!("Flushing {path} nodes {from}..{to} at {handle}");

        let scope = self.barriers.apply_barriers(
            self.states,
            self.jobs,
            &self.paths,
            path,
            from..to,
        )?;
        self.unflushed[path.index()] = to;
        self.nodes[handle.index()].scope = Some(scope);
        self.open_scopes.push(handle);
        Ok(())
    }

    fn push_job(&mut self, handle: JobHandle, node: &JobNode) -> Result<(), CompileError> {
        self.nodes[handle.index()].state = VisitState::Pushed;
        let inherited = self.nodes[handle.index()].inherited.take();
        let fuse_into = self.fusable_successor(node);

        if node.kind().is_structural() {
            match (fuse_into, inherited) {
                //structural jobs hand the chain through
                (Some(successor), inherited) => self.nodes[successor.index()].inherited = inherited,
                (None, Some(path)) => self.flush(handle, path)?,
                (None, None) => {}
            }
            return Ok(());
        }

        let path = match inherited {
            Some(path) => path,
            None => self.new_path(),
        };
        let location = self.paths[path.index()].push(handle);
        self.nodes[handle.index()].location = Some(location);

        for dependency in self.dependency_locations(node) {
            if dependency.path != path {
                self.paths[path.index()].add_dependency(dependency, location.node);
            }
        }

        match fuse_into {
            Some(successor) => {
                #[cfg(feature = "log_reasoning")]
                log::trace!("Fusing {successor} into {path} after {handle}");
                self.nodes[successor.index()].inherited = Some(path);
            }
            None => self.flush(handle, path)?,
        }
        Ok(())
    }

    fn fail(&mut self, error: CompileError) -> bool {
        #[cfg(feature = "logging")]
        log::error!("Compilation aborted: {error}");
        self.failure = Some(error);
        false
    }

    //Releases all scopes that are still applied after an aborted traversal, innermost first. Leaves the barrier
    // builder as if no job was pushed.
    fn unwind(&mut self) {
        while let Some(handle) = self.open_scopes.pop() {
            if let Some(scope) = self.nodes.get_mut(handle.index()).and_then(|n| n.scope.take()) {
                self.barriers.unapply_barriers(scope);
            }
        }
    }

    //Jobs that were parked and never processed, plus everything that can only be reached through them.
    fn collect_stale(&self) -> Result<Vec<JobHandle>, CompileError> {
        let mut collector = StaleJobCollector {
            nodes: &self.nodes,
            visited: vec![false; self.nodes.len()],
            stale: Vec::new(),
        };

        for (index, node) in self.nodes.iter().enumerate() {
            if node.parked && node.state == VisitState::Initial {
                traverse_bfs(self.jobs, JobHandle::from_index(index), &mut collector)?;
            }
        }

        let mut stale = collector.stale;
        stale.sort();
        Ok(stale)
    }
}

impl JobVisitor for CanonicalListBuilder<'_> {
    fn on_begin(&mut self, job_count: usize) {
        self.nodes.clear();
        self.nodes.resize_with(job_count, NodeState::default);
    }

    fn can_process(&self, handle: JobHandle, node: &JobNode) -> bool {
        self.visit_state(handle) == VisitState::Initial
            && node
                .dependencies()
                .iter()
                .all(|d| self.visit_state(*d) != VisitState::Initial)
    }

    fn on_no_process(&mut self, handle: JobHandle, _node: &JobNode) -> bool {
        if let Some(state) = self.nodes.get_mut(handle.index()) {
            if state.state == VisitState::Initial {
                #[cfg(feature = "log_reasoning")]
                log::trace!("Parking {handle}, dependencies pending");
                state.parked = true;
            }
        }
        true
    }

    fn on_pushed(&mut self, handle: JobHandle, node: &JobNode) -> bool {
        match self.push_job(handle, node) {
            Ok(()) => true,
            Err(e) => self.fail(e),
        }
    }

    fn on_popped(&mut self, handle: JobHandle, _node: &JobNode) -> bool {
        let state = &mut self.nodes[handle.index()];
        state.state = VisitState::Popped;
        if let Some(scope) = state.scope.take() {
            debug_assert_eq!(self.open_scopes.last(), Some(&handle));
            self.open_scopes.pop();
            #[cfg(feature = "log_reasoning")]
            log::trace!("Unapplying {} view(s) of {handle}", scope.len());
            self.barriers.unapply_barriers(scope);
        }
        true
    }
}

struct StaleJobCollector<'n> {
    nodes: &'n [NodeState],
    visited: Vec<bool>,
    stale: Vec<JobHandle>,
}

impl JobVisitor for StaleJobCollector<'_> {
    fn can_process(&self, handle: JobHandle, _node: &JobNode) -> bool {
        let index = handle.index();
        !self.visited.get(index).copied().unwrap_or(true)
            && self
                .nodes
                .get(index)
                .is_some_and(|n| n.state != VisitState::Popped)
    }

    fn on_dequeued(&mut self, handle: JobHandle, _node: &JobNode) -> bool {
        self.visited[handle.index()] = true;
        self.stale.push(handle);
        true
    }
}
