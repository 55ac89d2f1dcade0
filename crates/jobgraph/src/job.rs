use std::fmt::Display;

use ahash::AHashSet;
use tinyvec::TinyVec;

use crate::{
    JobError,
    resource::{GpuState, RenderTargets, ResourceRef, ResourceTable},
};

///Handle of a job within a [JobTable]. Handles are dense indices. They are only recycled after the root that owned
/// them was deleted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobHandle(u32);

impl JobHandle {
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn from_index(index: usize) -> Self {
        JobHandle(index as u32)
    }
}

impl Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job#{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum JobKind {
    Root,
    Draw,
    Compute,
    Copy,
    Display,
    Group,
    ClearRenderTarget,
}

impl JobKind {
    ///Structural jobs only shape the graph. They never land in a command list.
    pub fn is_structural(&self) -> bool {
        matches!(self, JobKind::Root | JobKind::Group)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DrawParams {
    NonIndexed {
        vertex_count: u32,
        instance_count: u32,
        first_vertex: u32,
        first_instance: u32,
    },
    Indexed {
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    },
}

impl Default for DrawParams {
    fn default() -> Self {
        DrawParams::NonIndexed {
            vertex_count: 0,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
        }
    }
}

///Binding list indexed by space/register. Unbound entries are `None`.
pub type Bindings<T> = TinyVec<[Option<T>; 4]>;

pub(crate) fn bind_at<T: Clone>(bindings: &mut Bindings<T>, index: usize, value: T) {
    if bindings.len() <= index {
        bindings.resize(index + 1, None);
    }
    bindings[index] = Some(value);
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DrawData {
    pub render_targets: Option<RenderTargets>,
    pub vertex_buffers: Vec<ResourceRef>,
    pub constant_buffers: Bindings<ResourceRef>,
    pub params: DrawParams,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComputeData {
    pub uav_tables: Bindings<ResourceTable>,
    pub constant_buffers: Bindings<ResourceRef>,
    pub dispatch: [u32; 3],
}

impl Default for ComputeData {
    fn default() -> Self {
        ComputeData {
            uav_tables: Bindings::default(),
            constant_buffers: Bindings::default(),
            dispatch: [1, 1, 1],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CopyData {
    pub source: Option<ResourceRef>,
    pub destination: Option<ResourceRef>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisplayData {
    pub presentable: Option<ResourceRef>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClearData {
    pub targets: Option<RenderTargets>,
    pub color: [f32; 4],
}

///Kind specific part of a job.
#[derive(Clone, Debug, PartialEq)]
pub enum JobPayload {
    Root,
    Draw(DrawData),
    Compute(ComputeData),
    Copy(CopyData),
    Display(DisplayData),
    Group,
    ClearRenderTarget(ClearData),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Root => JobKind::Root,
            JobPayload::Draw(_) => JobKind::Draw,
            JobPayload::Compute(_) => JobKind::Compute,
            JobPayload::Copy(_) => JobKind::Copy,
            JobPayload::Display(_) => JobKind::Display,
            JobPayload::Group => JobKind::Group,
            JobPayload::ClearRenderTarget(_) => JobKind::ClearRenderTarget,
        }
    }
}

///One entry of the [JobTable].
#[derive(Clone, Debug)]
pub struct JobNode {
    pub(crate) name: Option<String>,
    pub(crate) payload: JobPayload,
    pub(crate) srv_tables: Bindings<ResourceTable>,
    //set for dedup, vec for the declaration order
    pub(crate) dependency_set: AHashSet<JobHandle>,
    pub(crate) dependencies: Vec<JobHandle>,
    pub(crate) dependents: Vec<JobHandle>,
    pub(crate) children: Vec<JobHandle>,
}

impl JobNode {
    pub(crate) fn new(payload: JobPayload) -> Self {
        JobNode {
            name: None,
            payload,
            srv_tables: Bindings::default(),
            dependency_set: AHashSet::default(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }

    pub fn payload(&self) -> &JobPayload {
        &self.payload
    }

    ///Bound input tables, in space/register order.
    pub fn srv_tables(&self) -> impl Iterator<Item = &ResourceTable> {
        self.srv_tables.iter().flatten()
    }

    ///Jobs that must be processed before this job, in declaration order.
    pub fn dependencies(&self) -> &[JobHandle] {
        &self.dependencies
    }

    pub fn depends_on(&self, other: JobHandle) -> bool {
        self.dependency_set.contains(&other)
    }

    ///Jobs that declared a dependency on this job.
    pub fn dependents(&self) -> &[JobHandle] {
        &self.dependents
    }

    ///Jobs nested into this group job.
    pub fn children(&self) -> &[JobHandle] {
        &self.children
    }

    ///Traversal successors of this job. Dependents first, then nested children, each in declaration order.
    pub fn successors(&self) -> impl DoubleEndedIterator<Item = JobHandle> + '_ {
        self.dependents
            .iter()
            .chain(self.children.iter())
            .copied()
    }

    pub fn successor_count(&self) -> usize {
        self.dependents.len() + self.children.len()
    }

    ///Appends every resource this job touches, together with the state it needs, to `uses`. The order is the order
    /// states are assigned in: input tables, then the kind's own resources, then output tables.
    pub fn collect_resource_uses(&self, uses: &mut Vec<(ResourceRef, GpuState)>) {
        for table in self.srv_tables() {
            uses.extend(table.iter().map(|r| (*r, GpuState::Srv)));
        }

        match &self.payload {
            JobPayload::Root | JobPayload::Group => {}
            JobPayload::Draw(draw) => {
                uses.extend(
                    draw.constant_buffers
                        .iter()
                        .flatten()
                        .map(|r| (*r, GpuState::Cbv)),
                );
                uses.extend(draw.vertex_buffers.iter().map(|r| (*r, GpuState::Srv)));
                if let Some(targets) = &draw.render_targets {
                    uses.extend(targets.attachments());
                }
            }
            JobPayload::Compute(compute) => {
                uses.extend(
                    compute
                        .constant_buffers
                        .iter()
                        .flatten()
                        .map(|r| (*r, GpuState::Cbv)),
                );
                for table in compute.uav_tables.iter().flatten() {
                    uses.extend(table.iter().map(|r| (*r, GpuState::Uav)));
                }
            }
            JobPayload::Copy(copy) => {
                uses.extend(copy.source.map(|r| (r, GpuState::CopySrc)));
                uses.extend(copy.destination.map(|r| (r, GpuState::CopyDst)));
            }
            JobPayload::Display(display) => {
                uses.extend(display.presentable.map(|r| (r, GpuState::Default)));
            }
            JobPayload::ClearRenderTarget(clear) => {
                if let Some(targets) = &clear.targets {
                    uses.extend(targets.attachments());
                }
            }
        }
    }
}

///Arena of all declared jobs. Vacant entries are recycled through a free list.
#[derive(Clone, Debug, Default)]
pub struct JobTable {
    nodes: Vec<Option<JobNode>>,
    free: Vec<JobHandle>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    ///Number of entries, including vacant ones. Every live handle's index is smaller than this.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.nodes.len() - self.free.len()
    }

    pub fn contains(&self, handle: JobHandle) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: JobHandle) -> Option<&JobNode> {
        self.nodes.get(handle.index()).and_then(|n| n.as_ref())
    }

    pub fn node(&self, handle: JobHandle) -> Result<&JobNode, JobError> {
        self.get(handle).ok_or(JobError::InvalidHandle(handle))
    }

    pub(crate) fn node_mut(&mut self, handle: JobHandle) -> Result<&mut JobNode, JobError> {
        self.nodes
            .get_mut(handle.index())
            .and_then(|n| n.as_mut())
            .ok_or(JobError::InvalidHandle(handle))
    }

    ///Iterates all live jobs in handle order.
    pub fn iter(&self) -> impl Iterator<Item = (JobHandle, &JobNode)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(idx, n)| n.as_ref().map(|n| (JobHandle::from_index(idx), n)))
    }

    pub(crate) fn allocate(&mut self, payload: JobPayload) -> JobHandle {
        let node = JobNode::new(payload);
        if let Some(handle) = self.free.pop() {
            self.nodes[handle.index()] = Some(node);
            handle
        } else {
            self.nodes.push(Some(node));
            JobHandle::from_index(self.nodes.len() - 1)
        }
    }

    ///Vacates `handle` and queues it for reuse. Does not touch edges of other jobs.
    pub(crate) fn release(&mut self, handle: JobHandle) -> Option<JobNode> {
        let node = self.nodes.get_mut(handle.index())?.take()?;
        self.free.push(handle);
        Some(node)
    }
}
