use crate::{
    JobError, JobHandle, JobKind, JobTable, TraversalError,
    job::{ClearData, ComputeData, CopyData, DisplayData, DrawData, DrawParams, JobPayload, bind_at},
    resource::{RenderTargets, ResourceRef, ResourceTable},
    traverse::{ChildJobAccumulator, traverse_bfs},
};

///Typed handle of a job. Every handle knows the [JobKind] it was created with.
pub trait GpuJob: Copy {
    const KIND: JobKind;
    fn handle(&self) -> JobHandle;
}

///Jobs that can bind constant buffers.
pub trait ConstantBufferJob: GpuJob {}

///Jobs that can be cloned into a follow-up job via [JobBuilder::next].
pub trait ChainableJob: GpuJob {
    #[doc(hidden)]
    fn from_handle(handle: JobHandle) -> Self;
}

macro_rules! typed_job {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        pub struct $name(JobHandle);

        impl GpuJob for $name {
            const KIND: JobKind = $kind;
            fn handle(&self) -> JobHandle {
                self.0
            }
        }

        impl From<$name> for JobHandle {
            fn from(value: $name) -> JobHandle {
                value.0
            }
        }
    };
}

typed_job!(
    ///Entry point of a job graph. Compilation always starts at a root.
    RootJob,
    JobKind::Root
);
typed_job!(DrawJob, JobKind::Draw);
typed_job!(ComputeJob, JobKind::Compute);
typed_job!(CopyJob, JobKind::Copy);
typed_job!(
    ///Hands a presentable surface back to the display.
    DisplayJob,
    JobKind::Display
);
typed_job!(
    ///Structural job that nests other jobs. Everything added to a group is ordered after the group's own
    /// dependencies.
    GroupJob,
    JobKind::Group
);
typed_job!(ClearRenderTargetJob, JobKind::ClearRenderTarget);

impl ConstantBufferJob for DrawJob {}
impl ConstantBufferJob for ComputeJob {}

impl ChainableJob for DrawJob {
    fn from_handle(handle: JobHandle) -> Self {
        DrawJob(handle)
    }
}
impl ChainableJob for ComputeJob {
    fn from_handle(handle: JobHandle) -> Self {
        ComputeJob(handle)
    }
}
impl ChainableJob for CopyJob {
    fn from_handle(handle: JobHandle) -> Self {
        CopyJob(handle)
    }
}

///Declares jobs, their payloads and the dependencies between them. Owns the [JobTable] that is later handed to the
/// [JobCompiler](crate::JobCompiler).
#[derive(Debug, Default)]
pub struct JobBuilder {
    table: JobTable,
}

impl JobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &JobTable {
        &self.table
    }

    fn allocate(&mut self, payload: JobPayload) -> JobHandle {
        let handle = self.table.allocate(payload);
        #[cfg(feature = "logging")]
        log::trace!("Allocated {handle} as {:?}", self.table.get(handle).map(|n| n.kind()));
        handle
    }

    pub fn create_root_job(&mut self) -> RootJob {
        RootJob(self.allocate(JobPayload::Root))
    }

    pub fn create_draw_job(&mut self) -> DrawJob {
        DrawJob(self.allocate(JobPayload::Draw(DrawData::default())))
    }

    pub fn create_compute_job(&mut self) -> ComputeJob {
        ComputeJob(self.allocate(JobPayload::Compute(ComputeData::default())))
    }

    pub fn create_copy_job(&mut self) -> CopyJob {
        CopyJob(self.allocate(JobPayload::Copy(CopyData::default())))
    }

    pub fn create_display_job(&mut self) -> DisplayJob {
        DisplayJob(self.allocate(JobPayload::Display(DisplayData::default())))
    }

    pub fn create_group_job(&mut self) -> GroupJob {
        GroupJob(self.allocate(JobPayload::Group))
    }

    pub fn create_clear_render_target_job(&mut self) -> ClearRenderTargetJob {
        ClearRenderTargetJob(self.allocate(JobPayload::ClearRenderTarget(ClearData::default())))
    }

    //Resolves a typed handle and checks that the slot was not recycled for another kind.
    fn typed_payload<J: GpuJob>(&mut self, job: J) -> Result<&mut JobPayload, JobError> {
        let handle = job.handle();
        let node = self.table.node_mut(handle)?;
        if node.kind() != J::KIND {
            return Err(JobError::KindMismatch {
                job: handle,
                expected: J::KIND,
                found: node.kind(),
            });
        }
        Ok(&mut node.payload)
    }

    pub fn set_name(&mut self, job: impl GpuJob, name: impl Into<String>) -> Result<(), JobError> {
        self.typed_payload(job)?;
        self.table.node_mut(job.handle())?.name = Some(name.into());
        Ok(())
    }

    pub fn name(&self, job: impl GpuJob) -> Option<&str> {
        self.table.get(job.handle()).and_then(|n| n.name())
    }

    ///Declares that `job` can only run after `other`. Returns false if the edge already existed or would be a
    /// self-dependency, in which case nothing changes.
    pub fn depends_on(&mut self, job: impl GpuJob, other: impl GpuJob) -> Result<bool, JobError> {
        let (handle, other) = (job.handle(), other.handle());
        self.table.node(other)?;
        if handle == other {
            #[cfg(feature = "logging")]
            log::warn!("Ignoring self dependency of {handle}");
            return Ok(false);
        }

        let node = self.table.node_mut(handle)?;
        if !node.dependency_set.insert(other) {
            return Ok(false);
        }
        node.dependencies.push(other);
        self.table.node_mut(other)?.dependents.push(handle);
        Ok(true)
    }

    ///Binds `table` as shader input at `space_register`. Every job kind may bind input tables.
    pub fn set_resource_table(
        &mut self,
        job: impl GpuJob,
        space_register: usize,
        table: ResourceTable,
    ) -> Result<(), JobError> {
        self.typed_payload(job)?;
        let node = self.table.node_mut(job.handle())?;
        bind_at(&mut node.srv_tables, space_register, table);
        Ok(())
    }

    pub fn set_constant_buffer(
        &mut self,
        job: impl ConstantBufferJob,
        space_register: usize,
        buffer: ResourceRef,
    ) -> Result<(), JobError> {
        match self.typed_payload(job)? {
            JobPayload::Draw(draw) => bind_at(&mut draw.constant_buffers, space_register, buffer),
            JobPayload::Compute(compute) => {
                bind_at(&mut compute.constant_buffers, space_register, buffer)
            }
            _ => {}
        }
        Ok(())
    }

    pub fn set_vertex_buffers(
        &mut self,
        job: DrawJob,
        buffers: impl IntoIterator<Item = ResourceRef>,
    ) -> Result<(), JobError> {
        if let JobPayload::Draw(draw) = self.typed_payload(job)? {
            draw.vertex_buffers = buffers.into_iter().collect();
        }
        Ok(())
    }

    pub fn set_render_target(&mut self, job: DrawJob, targets: RenderTargets) -> Result<(), JobError> {
        if let JobPayload::Draw(draw) = self.typed_payload(job)? {
            draw.render_targets = Some(targets);
        }
        Ok(())
    }

    pub fn set_draw_params(&mut self, job: DrawJob, params: DrawParams) -> Result<(), JobError> {
        if let JobPayload::Draw(draw) = self.typed_payload(job)? {
            draw.params = params;
        }
        Ok(())
    }

    ///Binds `table` as read-write output at `space_register`.
    pub fn set_uav_table(
        &mut self,
        job: ComputeJob,
        space_register: usize,
        table: ResourceTable,
    ) -> Result<(), JobError> {
        if let JobPayload::Compute(compute) = self.typed_payload(job)? {
            bind_at(&mut compute.uav_tables, space_register, table);
        }
        Ok(())
    }

    pub fn set_dispatch_params(&mut self, job: ComputeJob, x: u32, y: u32, z: u32) -> Result<(), JobError> {
        if let JobPayload::Compute(compute) = self.typed_payload(job)? {
            compute.dispatch = [x, y, z];
        }
        Ok(())
    }

    pub fn set_copy(
        &mut self,
        job: CopyJob,
        source: ResourceRef,
        destination: ResourceRef,
    ) -> Result<(), JobError> {
        if let JobPayload::Copy(copy) = self.typed_payload(job)? {
            copy.source = Some(source);
            copy.destination = Some(destination);
        }
        Ok(())
    }

    pub fn set_presentable(&mut self, job: DisplayJob, surface: ResourceRef) -> Result<(), JobError> {
        if let JobPayload::Display(display) = self.typed_payload(job)? {
            display.presentable = Some(surface);
        }
        Ok(())
    }

    pub fn set_clear_targets(
        &mut self,
        job: ClearRenderTargetJob,
        targets: RenderTargets,
        color: [f32; 4],
    ) -> Result<(), JobError> {
        if let JobPayload::ClearRenderTarget(clear) = self.typed_payload(job)? {
            clear.targets = Some(targets);
            clear.color = color;
        }
        Ok(())
    }

    ///Nests `job` into `group`. The job implicitly depends on the group and becomes one of its children.
    pub fn add_job(&mut self, group: GroupJob, job: impl GpuJob) -> Result<bool, JobError> {
        self.typed_payload(group)?;
        let (group, handle) = (group.handle(), job.handle());
        if group == handle {
            return Ok(false);
        }

        let node = self.table.node_mut(handle)?;
        if !node.dependency_set.insert(group) {
            return Ok(false);
        }
        node.dependencies.push(group);
        self.table.node_mut(group)?.children.push(handle);
        Ok(true)
    }

    pub fn add_jobs(
        &mut self,
        group: GroupJob,
        jobs: impl IntoIterator<Item = JobHandle>,
    ) -> Result<(), JobError> {
        self.typed_payload(group)?;
        for handle in jobs {
            let node = self.table.node_mut(handle)?;
            if handle == group.handle() || !node.dependency_set.insert(group.handle()) {
                continue;
            }
            node.dependencies.push(group.handle());
            self.table.node_mut(group.handle())?.children.push(handle);
        }
        Ok(())
    }

    ///Creates a follow-up job with the same kind, bindings and parameters as `job` that depends on `job`.
    pub fn next<J: ChainableJob>(&mut self, job: J) -> Result<J, JobError> {
        let payload = self.typed_payload(job)?.clone();
        let srv_tables = self.table.node(job.handle())?.srv_tables.clone();

        let next = self.allocate(payload);
        self.table.node_mut(next)?.srv_tables = srv_tables;
        let next = J::from_handle(next);
        self.depends_on(next, job)?;
        Ok(next)
    }

    ///Deletes `root` and every job reachable from it. Returns the number of released jobs. Their handles become
    /// available for reuse.
    pub fn delete(&mut self, root: RootJob) -> Result<usize, TraversalError> {
        self.typed_payload(root)
            .map_err(|_| TraversalError::InvalidRoot(root.handle()))?;

        let mut accumulator = ChildJobAccumulator::new(self.table.len());
        traverse_bfs(&self.table, root.handle(), &mut accumulator)?;
        let doomed = accumulator.into_jobs();

        for handle in &doomed {
            let Some(node) = self.table.release(*handle) else {
                continue;
            };
            //Unhook from survivors that still list the job. Dependents and children were collected as well.
            for dep in node.dependencies {
                if let Ok(dep) = self.table.node_mut(dep) {
                    dep.dependents.retain(|d| d != handle);
                    dep.children.retain(|c| c != handle);
                }
            }
        }

        #[cfg(feature = "logging")]
        log::trace!("Deleted {} jobs of root {}", doomed.len(), root.handle());

        Ok(doomed.len())
    }
}
