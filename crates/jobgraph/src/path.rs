use std::fmt::Display;

use tinyvec::TinyVec;

use crate::JobHandle;

///Index of a [CanonicalJobPath] within one compilation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathId(u32);

impl PathId {
    pub const fn index(&self) -> usize {
        self.0 as usize
    }

    pub(crate) const fn from_index(index: usize) -> Self {
        PathId(index as u32)
    }
}

impl Display for PathId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "path#{}", self.0)
    }
}

///Position of a job within the compiled output.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location {
    pub path: PathId,
    pub node: u32,
}

impl Location {
    pub const fn new(path: PathId, node: u32) -> Self {
        Location { path, node }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.path, self.node)
    }
}

///Cross-path edge. Node `owner_node` of the owning path may only start after `location` finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Dependency {
    pub location: Location,
    pub owner_node: u32,
}

///Barrier indices into [CompileResult::barriers](crate::CompileResult::barriers).
pub type BarrierList = TinyVec<[u32; 2]>;

///One job within a path, plus the barriers recorded around it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathNode {
    pub job: JobHandle,
    ///Barriers that have to be recorded before the job.
    pub pre_barriers: BarrierList,
    ///Barriers that have to be recorded after the job.
    pub post_barriers: BarrierList,
}

///Ordered sequence of jobs that is recorded into a single command list.
///
///A path may only depend on paths with a smaller id, so recording and submitting paths in id order is always valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalJobPath {
    id: PathId,
    nodes: Vec<PathNode>,
    dependencies: Vec<Dependency>,
}

impl CanonicalJobPath {
    pub(crate) fn new(id: PathId) -> Self {
        CanonicalJobPath {
            id,
            nodes: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn id(&self) -> PathId {
        self.id
    }

    pub fn nodes(&self) -> &[PathNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    ///Jobs in recording order.
    pub fn jobs(&self) -> impl Iterator<Item = JobHandle> + '_ {
        self.nodes.iter().map(|n| n.job)
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    ///Dependencies that have to be satisfied before `node` of this path starts.
    pub fn dependencies_until(&self, node: u32) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(move |d| d.owner_node <= node)
    }

    pub(crate) fn push(&mut self, job: JobHandle) -> Location {
        let location = Location::new(self.id, self.nodes.len() as u32);
        self.nodes.push(PathNode {
            job,
            pre_barriers: BarrierList::default(),
            post_barriers: BarrierList::default(),
        });
        location
    }

    pub(crate) fn add_dependency(&mut self, location: Location, owner_node: u32) {
        debug_assert!(
            location.path < self.id,
            "{} may not depend on younger {}",
            self.id,
            location.path
        );
        let dependency = Dependency {
            location,
            owner_node,
        };
        if !self.dependencies.contains(&dependency) {
            self.dependencies.push(dependency);
        }
    }

    pub(crate) fn node_mut(&mut self, node: u32) -> Option<&mut PathNode> {
        self.nodes.get_mut(node as usize)
    }
}

impl Display for CanonicalJobPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:", self.id)?;
        for dep in &self.dependencies {
            write!(f, " [{} before {}]", dep.location, dep.owner_node)?;
        }
        writeln!(f)?;
        for (idx, node) in self.nodes.iter().enumerate() {
            write!(f, "    {idx}: {}", node.job)?;
            if !node.pre_barriers.is_empty() {
                write!(f, " pre{:?}", node.pre_barriers.as_slice())?;
            }
            if !node.post_barriers.is_empty() {
                write!(f, " post{:?}", node.post_barriers.as_slice())?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
