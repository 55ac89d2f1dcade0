//! Resource state tracking and barrier generation.
//!
//! The [ResourceStateBuilder] records every state a resource is used in, keyed by the [Location] of the using job.
//! Whether an earlier use is *visible* to a later one depends on the cross-path dependencies that are currently
//! applied. A use is visible if it happened earlier on the same path, or on a path that is retired up to that use by
//! an applied dependency. Every other recorded use is still *in flight*. Using a resource in a state that is
//! incompatible with one of its in-flight uses is a [BarrierViolation]. The transition out of a resource's initial
//! state counts as a write of the first job that needs it, so every other job using the resource must be ordered after
//! that one.
//!
//! Transitions are only staged while compiling. [ResourceStateBuilder::store_barriers] distributes them onto the
//! paths at the end, as single barriers or as split begin/end pairs.

use std::fmt::Display;

use ahash::AHashMap;
use jobgraph_state::{Domain, ResourceStateTable, StateSlot, StateTableError};

use crate::{
    JobTable,
    path::{CanonicalJobPath, Location, PathId},
    resource::{GpuResource, GpuState, RenderTargets, ResourceRef, ResourceTable},
};

///A state at a location. The location is `None` for the state a resource had before the compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocationGpuState {
    pub state: GpuState,
    pub location: Option<Location>,
}

impl Display for LocationGpuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.location {
            Some(location) => write!(f, "{}@{}", self.state, location),
            None => write!(f, "{}@initial", self.state),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BarrierTiming {
    ///First half of a split barrier, recorded after the source job.
    Begin,
    ///Second half of a split barrier, recorded before the destination job.
    End,
    ///Immediate barrier, recorded before the destination job.
    BeginAndEnd,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct GpuBarrier {
    pub resource: ResourceRef,
    pub from: LocationGpuState,
    pub to: LocationGpuState,
    pub timing: BarrierTiming,
}

impl Display for GpuBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:?} {}: {} -> {}",
            self.timing, self.resource, self.from, self.to
        )
    }
}

///A resource was requested in `requested.state` while uses in incompatible states were still in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BarrierViolation {
    pub resource: ResourceRef,
    pub requested: LocationGpuState,
    pub in_flight: Vec<LocationGpuState>,
}

impl Display for BarrierViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} requested as {} while in flight as", self.resource, self.requested)?;
        for conflict in &self.in_flight {
            write!(f, " {conflict}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Usage {
    location: Location,
    state: GpuState,
}

struct ResourceRecord {
    resource: ResourceRef,
    initial: GpuState,
    //use that moved the resource out of `initial`
    initial_exit: Option<Usage>,
    usages: Vec<Usage>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct PathView {
    //number of applied dependencies that currently reach this path
    ref_count: u32,
    //highest retired node while ref_count > 0
    retired_until: Option<u32>,
}

#[derive(Clone, Copy, Debug)]
struct StagedTransition {
    resource: ResourceRef,
    from: LocationGpuState,
    to: Location,
    state: GpuState,
}

///Undo log of one [ResourceStateBuilder::apply_barriers] call.
#[derive(Debug, Default)]
#[must_use = "an applied scope has to be handed back to unapply_barriers"]
pub struct ScopeRecord {
    previous: Vec<(PathId, PathView)>,
}

impl ScopeRecord {
    ///Number of path views this scope changed.
    pub fn len(&self) -> usize {
        self.previous.len()
    }

    pub fn is_empty(&self) -> bool {
        self.previous.is_empty()
    }
}

///Tracks resource usages of one compilation. See the module level documentation.
pub struct ResourceStateBuilder {
    //maps state slots to `record index + 1`
    domain: Domain,
    //long lived states used as initial state of a resource
    fallback: Option<Domain>,
    records: Vec<ResourceRecord>,
    views: Vec<PathView>,
    staged: Vec<StagedTransition>,
    violations: Vec<BarrierViolation>,
    scratch: Vec<(ResourceRef, GpuState)>,
}

impl ResourceStateBuilder {
    ///Creates a builder that keeps its per-resource bookkeeping in `domain`. The domain must be empty. If
    /// `fallback` is given, states stored there are used as the state before the first use.
    pub fn new(domain: Domain, fallback: Option<Domain>) -> Self {
        ResourceStateBuilder {
            domain,
            fallback,
            records: Vec::new(),
            views: Vec::new(),
            staged: Vec::new(),
            violations: Vec::new(),
            scratch: Vec::new(),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn violations(&self) -> &[BarrierViolation] {
        &self.violations
    }

    ///Number of transitions staged so far.
    pub fn staged_count(&self) -> usize {
        self.staged.len()
    }

    ///Number of applied dependencies that currently reach `path`.
    pub fn ref_count(&self, path: PathId) -> u32 {
        self.views
            .get(path.index())
            .map(|v| v.ref_count)
            .unwrap_or(0)
    }

    ///True if a use at `used` is visible to a job at `at`, given the currently applied dependencies.
    pub fn is_retired(&self, used: Location, at: Location) -> bool {
        if used.path == at.path {
            return used.node <= at.node;
        }
        self.views.get(used.path.index()).is_some_and(|view| {
            view.ref_count > 0 && view.retired_until.is_some_and(|until| used.node <= until)
        })
    }

    fn record_index(
        &mut self,
        states: &mut ResourceStateTable,
        resource: ResourceRef,
    ) -> Result<usize, StateTableError> {
        if let Some(idx) = states.get_state(self.domain, resource.state_slot())? {
            return Ok(idx - 1);
        }

        let initial = match self.fallback {
            Some(cache) => states
                .get_state(cache, resource.state_slot())?
                .and_then(GpuState::from_raw)
                .unwrap_or(resource.default_state()),
            None => resource.default_state(),
        };

        self.records.push(ResourceRecord {
            resource,
            initial,
            initial_exit: None,
            usages: Vec::new(),
        });
        states.store_state(self.domain, resource.state_slot(), self.records.len())?;
        Ok(self.records.len() - 1)
    }

    ///Declares that the job at `location` uses `resource` in `state`.
    pub fn set_state(
        &mut self,
        states: &mut ResourceStateTable,
        location: Location,
        state: GpuState,
        resource: ResourceRef,
    ) -> Result<(), StateTableError> {
        let idx = self.record_index(states, resource)?;
        let record = &self.records[idx];

        let visible = record
            .usages
            .iter()
            .rev()
            .find(|u| self.is_retired(u.location, location))
            .map(|u| LocationGpuState {
                state: u.state,
                location: Some(u.location),
            });

        let mut in_flight: Vec<LocationGpuState> = Vec::new();
        for usage in &record.usages {
            if self.is_retired(usage.location, location) || usage.state.is_compatible(&state) {
                continue;
            }
            let conflict = LocationGpuState {
                state: usage.state,
                location: Some(usage.location),
            };
            if !in_flight.contains(&conflict) {
                in_flight.push(conflict);
            }
        }

        let from = visible.unwrap_or(LocationGpuState {
            state: record.initial,
            location: None,
        });
        let mut needs_transition = match from.location {
            Some(_) => from.state != state,
            //nothing to do if the resource was never constrained
            None => from.state != GpuState::Default && from.state != state,
        };

        //Leaving the initial state is a write. It happens once, every later use must be ordered after it.
        let leaves_initial = needs_transition && from.location.is_none();
        if leaves_initial {
            if let Some(exit) = record.initial_exit {
                let conflict = LocationGpuState {
                    state: exit.state,
                    location: Some(exit.location),
                };
                if !in_flight.contains(&conflict) {
                    in_flight.push(conflict);
                }
                needs_transition = false;
            }
        }

        if needs_transition {
            #[cfg(feature = "log_reasoning")]
            log::trace!("{resource}: {from} -> {state}@{location}");
            self.staged.push(StagedTransition {
                resource,
                from,
                to: location,
                state,
            });
        }

        if !in_flight.is_empty() {
            let violation = BarrierViolation {
                resource,
                requested: LocationGpuState {
                    state,
                    location: Some(location),
                },
                in_flight,
            };
            #[cfg(feature = "logging")]
            log::warn!("Barrier violation: {violation}");
            self.violations.push(violation);
        }

        let usage = Usage { location, state };
        let record = &mut self.records[idx];
        if leaves_initial && needs_transition {
            record.initial_exit = Some(usage);
        }
        if record.usages.last() != Some(&usage) {
            record.usages.push(usage);
        }
        Ok(())
    }

    ///[Self::set_state] for every resource of `table`.
    pub fn set_table_state(
        &mut self,
        states: &mut ResourceStateTable,
        location: Location,
        state: GpuState,
        table: &ResourceTable,
    ) -> Result<(), StateTableError> {
        for resource in table.iter() {
            self.set_state(states, location, state, *resource)?;
        }
        Ok(())
    }

    ///Color attachments are set to [GpuState::Rt], the depth attachment to [GpuState::Ds].
    pub fn set_render_target_state(
        &mut self,
        states: &mut ResourceStateTable,
        location: Location,
        targets: &RenderTargets,
    ) -> Result<(), StateTableError> {
        for (resource, state) in targets.attachments() {
            self.set_state(states, location, state, resource)?;
        }
        Ok(())
    }

    ///Assigns states for the jobs of `nodes` on `path`. Before each node, the cross-path dependencies owned by it are
    /// applied, transitively through the dependencies of the paths they point into. The returned scope undoes exactly
    /// those applications.
    pub fn apply_barriers(
        &mut self,
        states: &mut ResourceStateTable,
        jobs: &JobTable,
        paths: &[CanonicalJobPath],
        path: PathId,
        nodes: std::ops::Range<u32>,
    ) -> Result<ScopeRecord, StateTableError> {
        let mut scope = ScopeRecord::default();
        if let Err(e) = self.apply_nodes(states, jobs, paths, path, nodes, &mut scope) {
            self.unapply_barriers(scope);
            return Err(e);
        }
        Ok(scope)
    }

    fn apply_nodes(
        &mut self,
        states: &mut ResourceStateTable,
        jobs: &JobTable,
        paths: &[CanonicalJobPath],
        path: PathId,
        nodes: std::ops::Range<u32>,
        scope: &mut ScopeRecord,
    ) -> Result<(), StateTableError> {
        let Some(target) = paths.get(path.index()) else {
            return Ok(());
        };

        let mut uses = std::mem::take(&mut self.scratch);
        for node in nodes {
            for dependency in target.dependencies().iter().filter(|d| d.owner_node == node) {
                self.retire(paths, dependency.location, scope);
            }

            let Some(job) = target.nodes().get(node as usize).and_then(|n| jobs.get(n.job)) else {
                continue;
            };

            let location = Location::new(path, node);
            uses.clear();
            job.collect_resource_uses(&mut uses);
            for (resource, state) in uses.iter() {
                self.set_state(states, location, *state, *resource)?;
            }
        }
        self.scratch = uses;
        Ok(())
    }

    //Retires `location` and everything it depends on.
    fn retire(&mut self, paths: &[CanonicalJobPath], location: Location, scope: &mut ScopeRecord) {
        let mut pending = vec![location];
        while let Some(location) = pending.pop() {
            let index = location.path.index();
            if self.views.len() <= index {
                self.views.resize(index + 1, PathView::default());
            }

            let view = &mut self.views[index];
            if view.ref_count > 0 && view.retired_until.is_some_and(|until| until >= location.node) {
                continue;
            }

            scope.previous.push((location.path, *view));
            view.ref_count += 1;
            view.retired_until = Some(
                view.retired_until
                    .map_or(location.node, |until| until.max(location.node)),
            );

            if let Some(dep_path) = paths.get(index) {
                pending.extend(dep_path.dependencies_until(location.node).map(|d| d.location));
            }
        }
    }

    ///Reverts an earlier [Self::apply_barriers]. Scopes have to be unapplied in reverse order of application.
    pub fn unapply_barriers(&mut self, scope: ScopeRecord) {
        for (path, view) in scope.previous.into_iter().rev() {
            if let Some(slot) = self.views.get_mut(path.index()) {
                *slot = view;
            }
        }
    }

    ///Distributes all staged transitions onto `paths` and returns the barrier list the paths index into. If
    /// violations were recorded, no barriers are emitted unless `allow_violations` is set.
    pub fn store_barriers(
        &self,
        paths: &mut [CanonicalJobPath],
        allow_violations: bool,
    ) -> Vec<GpuBarrier> {
        if !self.violations.is_empty() && !allow_violations {
            #[cfg(feature = "logging")]
            log::warn!(
                "Not emitting barriers, {} violation(s) were recorded",
                self.violations.len()
            );
            return Vec::new();
        }

        let mut barriers = Vec::with_capacity(self.staged.len());
        //begin halves are shared by every end that waits on the same transition
        let mut begins: AHashMap<(StateSlot, Location, GpuState), u32> = AHashMap::default();

        for transition in &self.staged {
            let to = LocationGpuState {
                state: transition.state,
                location: Some(transition.to),
            };
            let split_source = transition.from.location.filter(|from| {
                let adjacent = from.path == transition.to.path && from.node + 1 >= transition.to.node;
                !adjacent
            });

            match split_source {
                Some(source) => {
                    let key = (transition.resource.state_slot(), source, transition.state);
                    if !begins.contains_key(&key) {
                        let idx = barriers.len() as u32;
                        barriers.push(GpuBarrier {
                            resource: transition.resource,
                            from: transition.from,
                            to,
                            timing: BarrierTiming::Begin,
                        });
                        if let Some(node) = paths
                            .get_mut(source.path.index())
                            .and_then(|p| p.node_mut(source.node))
                        {
                            node.post_barriers.push(idx);
                        }
                        begins.insert(key, idx);
                    }

                    let idx = barriers.len() as u32;
                    barriers.push(GpuBarrier {
                        resource: transition.resource,
                        from: transition.from,
                        to,
                        timing: BarrierTiming::End,
                    });
                    Self::attach_pre(paths, transition.to, idx);
                }
                None => {
                    let idx = barriers.len() as u32;
                    barriers.push(GpuBarrier {
                        resource: transition.resource,
                        from: transition.from,
                        to,
                        timing: BarrierTiming::BeginAndEnd,
                    });
                    Self::attach_pre(paths, transition.to, idx);
                }
            }
        }

        barriers
    }

    fn attach_pre(paths: &mut [CanonicalJobPath], location: Location, barrier: u32) {
        if let Some(node) = paths
            .get_mut(location.path.index())
            .and_then(|p| p.node_mut(location.node))
        {
            node.pre_barriers.push(barrier);
        }
    }

    ///Last state of every resource that was used, in first-use order.
    pub fn final_states(&self) -> Vec<(ResourceRef, LocationGpuState)> {
        self.records
            .iter()
            .filter_map(|record| {
                record.usages.last().map(|usage| {
                    (
                        record.resource,
                        LocationGpuState {
                            state: usage.state,
                            location: Some(usage.location),
                        },
                    )
                })
            })
            .collect()
    }
}
