use jobgraph_state::{Domain, ResourceStateTable};

use crate::{
    CompileError, CompileResult, GpuJob, JobTable, RootJob, StateCache,
    barrier::ResourceStateBuilder, canonical::CanonicalListBuilder,
};

///Tunables of a [JobCompiler].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompilerConfig {
    ///Continue a path with a job's single follow-up job instead of opening a new path. Disabling this yields one
    /// path per job, which is mostly useful for debugging.
    pub fuse_linear_chains: bool,
    ///Emit barriers even if barrier violations were recorded. The result is still not submittable.
    pub emit_barriers_on_violation: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            fuse_linear_chains: true,
            emit_barriers_on_violation: false,
        }
    }
}

impl CompilerConfig {
    pub fn with_fusion(mut self, fuse: bool) -> Self {
        self.fuse_linear_chains = fuse;
        self
    }

    pub fn with_barriers_on_violation(mut self, emit: bool) -> Self {
        self.emit_barriers_on_violation = emit;
        self
    }
}

///Compiles job graphs into [CompileResult]s.
///
///Each compilation keeps its per-resource bookkeeping in a fresh [Domain] of the shared [ResourceStateTable]. The
/// domain of the previous compilation is released when the next one starts, or on [JobCompiler::release].
#[derive(Debug, Default)]
pub struct JobCompiler {
    config: CompilerConfig,
    domain: Option<Domain>,
    cache: Option<StateCache>,
}

impl JobCompiler {
    pub fn new(config: CompilerConfig) -> Self {
        JobCompiler {
            config,
            domain: None,
            cache: None,
        }
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    ///Uses the last known states of `cache` as starting point of every compilation.
    pub fn with_state_cache(mut self, cache: StateCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn set_state_cache(&mut self, cache: Option<StateCache>) {
        self.cache = cache;
    }

    pub fn compile(
        &mut self,
        states: &mut ResourceStateTable,
        jobs: &JobTable,
        root: RootJob,
    ) -> Result<CompileResult, CompileError> {
        let node = jobs.node(root.handle())?;
        if !matches!(node.kind(), crate::JobKind::Root) {
            return Err(CompileError::NotARoot {
                job: root.handle(),
                found: node.kind(),
            });
        }

        self.release(states);
        let domain = states.create_domain();
        self.domain = Some(domain);

        #[cfg(feature = "logging")]
        log::trace!("Compiling {} in {:?}", root.handle(), domain);

        let barriers = ResourceStateBuilder::new(domain, self.cache.map(|c| c.domain()));
        let result = CanonicalListBuilder::new(jobs, states, &self.config, barriers).build(root.handle())?;

        #[cfg(feature = "logging")]
        log::trace!(
            "Compiled {} jobs into {} paths with {} barriers",
            result.job_count(),
            result.paths().len(),
            result.barriers().len()
        );

        Ok(result)
    }

    ///Releases the bookkeeping domain of the last compilation.
    pub fn release(&mut self, states: &mut ResourceStateTable) {
        if let Some(domain) = self.domain.take() {
            if let Err(_e) = states.remove_domain(domain) {
                #[cfg(feature = "logging")]
                log::warn!("Could not release compiler domain: {_e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use jobgraph_state::StateTableError;

    use super::*;
    use crate::{
        BarrierTiming, GpuBarrier, GpuState, JobBuilder, JobError, JobHandle, Location, LocationGpuState,
        RenderTargets, ResourceRef, ResourceTable,
    };

    fn resource(states: &mut ResourceStateTable) -> ResourceRef {
        ResourceRef::new(states.create_state_slot())
    }

    fn compile(
        states: &mut ResourceStateTable,
        builder: &JobBuilder,
        root: RootJob,
    ) -> CompileResult {
        JobCompiler::default()
            .compile(states, builder.table(), root)
            .unwrap()
    }

    fn jobs_of(result: &CompileResult) -> Vec<Vec<JobHandle>> {
        result.paths().iter().map(|p| p.jobs().collect()).collect()
    }

    fn at(path: usize, node: u32) -> Location {
        Location::new(crate::PathId::from_index(path), node)
    }

    #[test]
    fn linear_chain_is_one_path() {
        let mut states = ResourceStateTable::new();
        let r = resource(&mut states);
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let first = builder.create_compute_job();
        builder.depends_on(first, root).unwrap();
        builder.set_uav_table(first, 0, ResourceTable::new([r])).unwrap();
        let mut chain = vec![first.handle()];
        let mut last = first;
        for _ in 0..4 {
            last = builder.next(last).unwrap();
            chain.push(last.handle());
        }

        let result = compile(&mut states, &builder, root);
        assert_eq!(jobs_of(&result), vec![chain]);
        //uav stays uav
        assert!(result.barriers().is_empty());
        assert!(result.is_submittable());
    }

    #[test]
    fn draw_then_compute() {
        let mut states = ResourceStateTable::new();
        let r1 = resource(&mut states);
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let draw = builder.create_draw_job();
        builder.depends_on(draw, root).unwrap();
        builder
            .set_render_target(draw, RenderTargets::new().with_color(r1))
            .unwrap();
        let compute = builder.create_compute_job();
        builder.depends_on(compute, draw).unwrap();
        builder.set_uav_table(compute, 0, ResourceTable::new([r1])).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(jobs_of(&result), vec![vec![draw.handle(), compute.handle()]]);
        assert!(result.violations().is_empty());
        assert_eq!(
            result.barriers(),
            &[GpuBarrier {
                resource: r1,
                from: LocationGpuState {
                    state: GpuState::Rt,
                    location: Some(at(0, 0))
                },
                to: LocationGpuState {
                    state: GpuState::Uav,
                    location: Some(at(0, 1))
                },
                timing: BarrierTiming::BeginAndEnd
            }]
        );
        assert_eq!(result.pre_barriers(at(0, 1)).count(), 1);
        assert_eq!(result.post_barriers(at(0, 0)).count(), 0);
    }

    #[test]
    fn independent_children_get_own_paths() {
        let mut states = ResourceStateTable::new();
        let (r1, r2) = (resource(&mut states), resource(&mut states));
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let a = builder.create_compute_job();
        builder.depends_on(a, root).unwrap();
        builder.set_uav_table(a, 0, ResourceTable::new([r1])).unwrap();
        let b = builder.create_compute_job();
        builder.depends_on(b, root).unwrap();
        builder.set_uav_table(b, 0, ResourceTable::new([r2])).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(jobs_of(&result), vec![vec![a.handle()], vec![b.handle()]]);
        assert!(result.paths().iter().all(|p| p.dependencies().is_empty()));
        assert!(result.is_submittable());
    }

    #[test]
    fn read_then_write_in_one_job() {
        let mut states = ResourceStateTable::new();
        let r = resource(&mut states);
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let compute = builder.create_compute_job();
        builder.depends_on(compute, root).unwrap();
        builder.set_resource_table(compute, 0, ResourceTable::new([r])).unwrap();
        builder.set_uav_table(compute, 0, ResourceTable::new([r])).unwrap();

        let result = compile(&mut states, &builder, root);
        assert!(result.violations().is_empty());
        assert_eq!(result.barriers().len(), 1);
        let barrier = result.barriers()[0];
        assert_eq!(barrier.from.state, GpuState::Srv);
        assert_eq!(barrier.to.state, GpuState::Uav);
        assert_eq!(barrier.from.location, barrier.to.location);
        assert_eq!(barrier.timing, BarrierTiming::BeginAndEnd);
    }

    #[test]
    fn concurrent_write_and_read_is_reported() {
        let mut states = ResourceStateTable::new();
        let (r, other) = (resource(&mut states), resource(&mut states));
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let writer = builder.create_compute_job();
        builder.depends_on(writer, root).unwrap();
        builder.set_uav_table(writer, 0, ResourceTable::new([r])).unwrap();
        let reader = builder.create_draw_job();
        builder.depends_on(reader, root).unwrap();
        builder.set_resource_table(reader, 0, ResourceTable::new([r])).unwrap();
        //would need a barrier on its own
        builder
            .set_render_target(reader, RenderTargets::new().with_color(other))
            .unwrap();
        let after = builder.create_compute_job();
        builder.depends_on(after, reader).unwrap();
        builder.set_uav_table(after, 0, ResourceTable::new([other])).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(result.violations().len(), 1);
        assert_eq!(result.violations()[0].resource, r);
        assert_eq!(result.violations()[0].in_flight[0].state, GpuState::Uav);
        assert!(result.barriers().is_empty());
        assert!(!result.is_submittable());

        let forced = JobCompiler::new(CompilerConfig::default().with_barriers_on_violation(true))
            .compile(&mut states, builder.table(), root)
            .unwrap();
        assert_eq!(forced.violations().len(), 1);
        assert_eq!(forced.barriers().len(), 1);
    }

    #[test]
    fn unordered_readers_of_initial_state() {
        let mut states = ResourceStateTable::new();
        let r = ResourceRef::with_default_state(states.create_state_slot(), GpuState::Rt);
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let x = builder.create_compute_job();
        builder.depends_on(x, root).unwrap();
        builder.set_resource_table(x, 0, ResourceTable::new([r])).unwrap();
        let y = builder.create_compute_job();
        builder.depends_on(y, root).unwrap();
        builder.set_resource_table(y, 0, ResourceTable::new([r])).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(jobs_of(&result), vec![vec![x.handle()], vec![y.handle()]]);
        assert_eq!(result.violations().len(), 1);
        let violation = &result.violations()[0];
        assert_eq!(violation.requested.location, Some(at(1, 0)));
        assert_eq!(
            violation.in_flight,
            vec![LocationGpuState {
                state: GpuState::Srv,
                location: Some(at(0, 0))
            }]
        );
        assert!(result.barriers().is_empty());
        assert!(!result.is_submittable());

        let forced = JobCompiler::new(CompilerConfig::default().with_barriers_on_violation(true))
            .compile(&mut states, builder.table(), root)
            .unwrap();
        assert_eq!(forced.barriers().len(), 1);
        assert_eq!(forced.barriers()[0].to.location, Some(at(0, 0)));

        //ordering y after x makes it see the transitioned state
        builder.depends_on(y, x).unwrap();
        let result = compile(&mut states, &builder, root);
        assert!(result.is_submittable());
        assert_eq!(result.barriers().len(), 1);
        assert_eq!(result.barriers()[0].from.location, None);
        assert_eq!(result.barriers()[0].to.location, Some(at(0, 0)));
        assert!(result.pre_barriers(at(1, 0)).next().is_none());
    }

    #[test]
    fn split_barrier_between_paths() {
        let mut states = ResourceStateTable::new();
        let (r1, r2, r3) = (resource(&mut states), resource(&mut states), resource(&mut states));
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let copy_a = builder.create_copy_job();
        builder.depends_on(copy_a, root).unwrap();
        builder.set_copy(copy_a, r1, r2).unwrap();
        let copy_b = builder.create_copy_job();
        builder.depends_on(copy_b, root).unwrap();
        builder.depends_on(copy_b, copy_a).unwrap();
        builder.set_copy(copy_b, r2, r3).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(jobs_of(&result), vec![vec![copy_a.handle()], vec![copy_b.handle()]]);
        assert_eq!(result.paths()[1].dependencies().len(), 1);
        assert_eq!(result.paths()[1].dependencies()[0].location, at(0, 0));
        assert!(result.violations().is_empty());

        let begin: Vec<_> = result.post_barriers(at(0, 0)).collect();
        let end: Vec<_> = result.pre_barriers(at(1, 0)).collect();
        assert_eq!(begin.len(), 1);
        assert_eq!(end.len(), 1);
        for (barrier, timing) in [(begin[0], BarrierTiming::Begin), (end[0], BarrierTiming::End)] {
            assert_eq!(barrier.resource, r2);
            assert_eq!(barrier.from.state, GpuState::CopyDst);
            assert_eq!(barrier.to.state, GpuState::CopySrc);
            assert_eq!(barrier.timing, timing);
        }
        assert_eq!(result.barriers().len(), 2);
    }

    #[test]
    fn single_dependency_copy_fuses() {
        let mut states = ResourceStateTable::new();
        let (r1, r2, r3) = (resource(&mut states), resource(&mut states), resource(&mut states));
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let copy_a = builder.create_copy_job();
        builder.depends_on(copy_a, root).unwrap();
        builder.set_copy(copy_a, r1, r2).unwrap();
        let copy_b = builder.create_copy_job();
        builder.depends_on(copy_b, copy_a).unwrap();
        builder.set_copy(copy_b, r2, r3).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(jobs_of(&result), vec![vec![copy_a.handle(), copy_b.handle()]]);
        assert_eq!(result.barriers().len(), 1);
        assert_eq!(result.barriers()[0].timing, BarrierTiming::BeginAndEnd);
        assert_eq!(result.barriers()[0].resource, r2);
        assert_eq!(result.pre_barriers(at(0, 1)).count(), 1);
    }

    #[test]
    fn join_waits_for_both_paths() {
        let mut states = ResourceStateTable::new();
        let (r, s) = (resource(&mut states), resource(&mut states));
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let a = builder.create_compute_job();
        builder.depends_on(a, root).unwrap();
        builder.set_uav_table(a, 0, ResourceTable::new([r])).unwrap();
        let b = builder.create_compute_job();
        builder.depends_on(b, root).unwrap();
        builder.set_uav_table(b, 0, ResourceTable::new([s])).unwrap();
        let join = builder.create_draw_job();
        builder.depends_on(join, a).unwrap();
        builder.depends_on(join, b).unwrap();
        builder.set_resource_table(join, 0, ResourceTable::new([r, s])).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(
            jobs_of(&result),
            vec![vec![a.handle()], vec![b.handle()], vec![join.handle()]]
        );
        let mut deps: Vec<_> = result.paths()[2]
            .dependencies()
            .iter()
            .map(|d| d.location)
            .collect();
        deps.sort();
        assert_eq!(deps, vec![at(0, 0), at(1, 0)]);
        assert!(result.is_submittable());
        //one split transition per resource
        assert_eq!(result.barriers().len(), 4);
        assert_eq!(result.pre_barriers(at(2, 0)).count(), 2);
    }

    #[test]
    fn cycle_is_reported_as_stale() {
        let mut states = ResourceStateTable::new();
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let a = builder.create_draw_job();
        let b = builder.create_draw_job();
        let c = builder.create_draw_job();
        builder.depends_on(a, root).unwrap();
        builder.depends_on(a, c).unwrap();
        builder.depends_on(b, a).unwrap();
        builder.depends_on(c, b).unwrap();

        let result = compile(&mut states, &builder, root);
        let mut cycle = vec![a.handle(), b.handle(), c.handle()];
        cycle.sort();
        assert_eq!(result.stale_jobs(), cycle.as_slice());
        assert_eq!(result.job_count(), 0);
        assert!(!result.is_submittable());
    }

    #[test]
    fn unreachable_dependency_is_stale() {
        let mut states = ResourceStateTable::new();
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let orphan = builder.create_compute_job();
        let waiting = builder.create_compute_job();
        builder.depends_on(waiting, root).unwrap();
        builder.depends_on(waiting, orphan).unwrap();
        let fine = builder.create_compute_job();
        builder.depends_on(fine, root).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(result.stale_jobs(), &[waiting.handle()]);
        assert_eq!(jobs_of(&result), vec![vec![fine.handle()]]);
    }

    #[test]
    fn groups_are_transparent() {
        let mut states = ResourceStateTable::new();
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let group = builder.create_group_job();
        builder.depends_on(group, root).unwrap();
        let x = builder.create_compute_job();
        let y = builder.create_compute_job();
        builder.add_jobs(group, [x.handle(), y.handle()]).unwrap();
        let after = builder.create_draw_job();
        builder.depends_on(after, x).unwrap();
        builder.depends_on(after, y).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(
            jobs_of(&result),
            vec![vec![x.handle()], vec![y.handle()], vec![after.handle()]]
        );
        assert!(result.paths()[0].dependencies().is_empty());
        assert!(result.paths()[1].dependencies().is_empty());
        assert_eq!(result.paths()[2].dependencies().len(), 2);
    }

    #[test]
    fn fusion_can_be_disabled() {
        let mut states = ResourceStateTable::new();
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let a = builder.create_copy_job();
        builder.depends_on(a, root).unwrap();
        let b = builder.next(a).unwrap();
        let c = builder.next(b).unwrap();

        let result = JobCompiler::new(CompilerConfig::default().with_fusion(false))
            .compile(&mut states, builder.table(), root)
            .unwrap();
        assert_eq!(
            jobs_of(&result),
            vec![vec![a.handle()], vec![b.handle()], vec![c.handle()]]
        );
        assert_eq!(result.paths()[1].dependencies()[0].location, at(0, 0));
        assert_eq!(result.paths()[2].dependencies()[0].location, at(1, 0));
    }

    #[test]
    fn present_returns_to_default() {
        let mut states = ResourceStateTable::new();
        let surface = resource(&mut states);
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let clear = builder.create_clear_render_target_job();
        builder.depends_on(clear, root).unwrap();
        builder
            .set_clear_targets(clear, RenderTargets::new().with_color(surface), [0.0; 4])
            .unwrap();
        let present = builder.create_display_job();
        builder.depends_on(present, clear).unwrap();
        builder.set_presentable(present, surface).unwrap();

        let result = compile(&mut states, &builder, root);
        assert_eq!(result.barriers().len(), 1);
        assert_eq!(result.barriers()[0].from.state, GpuState::Rt);
        assert_eq!(result.barriers()[0].to.state, GpuState::Default);
        assert_eq!(
            result.final_states(),
            &[(
                surface,
                LocationGpuState {
                    state: GpuState::Default,
                    location: Some(at(0, 1))
                }
            )]
        );
    }

    #[test]
    fn state_cache_carries_states_over() {
        let mut states = ResourceStateTable::new();
        let r = resource(&mut states);
        let cache = StateCache::new(&mut states);
        let mut compiler = JobCompiler::default().with_state_cache(cache);

        let mut first = JobBuilder::new();
        let root = first.create_root_job();
        let draw = first.create_draw_job();
        first.depends_on(draw, root).unwrap();
        first.set_render_target(draw, RenderTargets::new().with_color(r)).unwrap();
        let result = compiler.compile(&mut states, first.table(), root).unwrap();
        assert!(result.barriers().is_empty());
        assert_eq!(cache.commit(&mut states, &result), Ok(1));
        assert_eq!(cache.last_known(&states, &r), Ok(Some(GpuState::Rt)));

        let mut second = JobBuilder::new();
        let root = second.create_root_job();
        let read = second.create_compute_job();
        second.depends_on(read, root).unwrap();
        second.set_resource_table(read, 0, ResourceTable::new([r])).unwrap();
        let result = compiler.compile(&mut states, second.table(), root).unwrap();
        assert_eq!(
            result.barriers(),
            &[GpuBarrier {
                resource: r,
                from: LocationGpuState {
                    state: GpuState::Rt,
                    location: None
                },
                to: LocationGpuState {
                    state: GpuState::Srv,
                    location: Some(at(0, 0))
                },
                timing: BarrierTiming::BeginAndEnd
            }]
        );

        //cache plus the live compiler domain
        assert_eq!(states.domain_count(), 2);
        compiler.release(&mut states);
        assert_eq!(states.domain_count(), 1);
    }

    #[test]
    fn released_resource_aborts_compilation() {
        let mut states = ResourceStateTable::new();
        let (ok, gone) = (resource(&mut states), resource(&mut states));
        states.remove_state_slot(gone.slot()).unwrap();

        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        let a = builder.create_compute_job();
        builder.depends_on(a, root).unwrap();
        builder.set_uav_table(a, 0, ResourceTable::new([ok])).unwrap();
        let b = builder.next(a).unwrap();
        builder.set_resource_table(b, 0, ResourceTable::new([gone])).unwrap();

        let mut compiler = JobCompiler::default();
        assert_eq!(
            compiler.compile(&mut states, builder.table(), root).err(),
            Some(CompileError::StateTable(StateTableError::SlotNotLive(gone.slot())))
        );
        //the next compilation still starts clean
        builder.set_resource_table(b, 0, ResourceTable::new([ok])).unwrap();
        let result = compiler.compile(&mut states, builder.table(), root).unwrap();
        assert!(result.is_submittable());
        assert_eq!(states.domain_count(), 1);
    }

    #[test]
    fn compile_checks_root() {
        let mut states = ResourceStateTable::new();
        let mut builder = JobBuilder::new();
        let root = builder.create_root_job();
        builder.delete(root).unwrap();
        let mut compiler = JobCompiler::default();
        assert_eq!(
            compiler.compile(&mut states, builder.table(), root).err(),
            Some(CompileError::Job(JobError::InvalidHandle(root.handle())))
        );

        let draw = builder.create_draw_job();
        assert_eq!(draw.handle(), root.handle());
        assert_eq!(
            compiler.compile(&mut states, builder.table(), root).err(),
            Some(CompileError::NotARoot {
                job: root.handle(),
                found: crate::JobKind::Draw
            })
        );
    }
}
