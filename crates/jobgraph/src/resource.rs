use std::{fmt::Display, sync::Arc};

use jobgraph_state::StateSlot;

///Coarse GPU visibility state of a resource. A backend translates each variant into its native layout and access flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum GpuState {
    ///Unconstrained common state. Compatible with every other state.
    #[default]
    Default,
    ///Unordered read/write access from shaders.
    Uav,
    ///Shader read access.
    Srv,
    ///Constant buffer read access.
    Cbv,
    ///Color render target.
    Rt,
    ///Depth-stencil target.
    Ds,
    CopySrc,
    CopyDst,
}

impl GpuState {
    pub const ALL: [GpuState; 8] = [
        GpuState::Default,
        GpuState::Uav,
        GpuState::Srv,
        GpuState::Cbv,
        GpuState::Rt,
        GpuState::Ds,
        GpuState::CopySrc,
        GpuState::CopyDst,
    ];

    ///True for states that never write the resource.
    pub fn is_read_only(&self) -> bool {
        matches!(self, GpuState::Srv | GpuState::Cbv | GpuState::CopySrc)
    }

    ///Two states may be in flight at the same time if both only read, or if either is [GpuState::Default].
    pub fn is_compatible(&self, other: &GpuState) -> bool {
        *self == GpuState::Default
            || *other == GpuState::Default
            || (self.is_read_only() && other.is_read_only())
    }

    //0 is reserved by the state table, so every state is shifted by one.
    pub(crate) fn to_raw(self) -> usize {
        self as usize + 1
    }

    pub(crate) fn from_raw(raw: usize) -> Option<Self> {
        Self::ALL.get(raw.checked_sub(1)?).copied()
    }
}

impl Display for GpuState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GpuState::Default => "Default",
            GpuState::Uav => "Uav",
            GpuState::Srv => "Srv",
            GpuState::Cbv => "Cbv",
            GpuState::Rt => "Rt",
            GpuState::Ds => "Ds",
            GpuState::CopySrc => "CopySrc",
            GpuState::CopyDst => "CopyDst",
        };
        write!(f, "{name}")
    }
}

///Anything the compiler can track states for. A resource owns one [StateSlot] of the
/// [ResourceStateTable](jobgraph_state::ResourceStateTable) for its whole lifetime.
pub trait GpuResource {
    fn state_slot(&self) -> StateSlot;
    ///State the resource is assumed to be in before its first use, if no cache knows better.
    fn default_state(&self) -> GpuState {
        GpuState::Default
    }
}

///Lightweight, copyable reference to a [GpuResource] that is stored in jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    slot: StateSlot,
    default_state: GpuState,
}

impl ResourceRef {
    pub fn new(slot: StateSlot) -> Self {
        ResourceRef {
            slot,
            default_state: GpuState::Default,
        }
    }

    pub fn with_default_state(slot: StateSlot, default_state: GpuState) -> Self {
        ResourceRef {
            slot,
            default_state,
        }
    }

    pub fn slot(&self) -> StateSlot {
        self.slot
    }
}

impl GpuResource for ResourceRef {
    fn state_slot(&self) -> StateSlot {
        self.slot
    }
    fn default_state(&self) -> GpuState {
        self.default_state
    }
}

impl<R: GpuResource> From<&R> for ResourceRef {
    fn from(value: &R) -> Self {
        ResourceRef::with_default_state(value.state_slot(), value.default_state())
    }
}

impl Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "res@{}", self.slot)
    }
}

///Ordered, immutable set of resources that is bound as a whole. Cloning is cheap, so one table can be bound to
/// many jobs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceTable {
    resources: Arc<[ResourceRef]>,
}

impl ResourceTable {
    pub fn new(resources: impl IntoIterator<Item = ResourceRef>) -> Self {
        ResourceTable {
            resources: resources.into_iter().collect(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceRef> {
        self.resources.iter()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}

impl FromIterator<ResourceRef> for ResourceTable {
    fn from_iter<T: IntoIterator<Item = ResourceRef>>(iter: T) -> Self {
        ResourceTable::new(iter)
    }
}

///Color attachments plus an optional depth attachment of a draw or clear job.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenderTargets {
    colors: Vec<ResourceRef>,
    depth: Option<ResourceRef>,
}

impl RenderTargets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_color(mut self, color: ResourceRef) -> Self {
        self.colors.push(color);
        self
    }

    pub fn with_depth(mut self, depth: ResourceRef) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn colors(&self) -> &[ResourceRef] {
        &self.colors
    }

    pub fn depth(&self) -> Option<&ResourceRef> {
        self.depth.as_ref()
    }

    ///All attachments with the state they are written in.
    pub fn attachments(&self) -> impl Iterator<Item = (ResourceRef, GpuState)> + '_ {
        self.colors
            .iter()
            .map(|c| (*c, GpuState::Rt))
            .chain(self.depth.iter().map(|d| (*d, GpuState::Ds)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_matrix() {
        for a in GpuState::ALL {
            assert!(a.is_compatible(&GpuState::Default));
            assert!(GpuState::Default.is_compatible(&a));
            for b in GpuState::ALL {
                assert_eq!(a.is_compatible(&b), b.is_compatible(&a));
            }
        }

        assert!(GpuState::Srv.is_compatible(&GpuState::CopySrc));
        assert!(GpuState::Cbv.is_compatible(&GpuState::Srv));
        assert!(!GpuState::Uav.is_compatible(&GpuState::Srv));
        assert!(!GpuState::Uav.is_compatible(&GpuState::Uav));
        assert!(!GpuState::Rt.is_compatible(&GpuState::CopySrc));
        assert!(!GpuState::CopyDst.is_compatible(&GpuState::Ds));
    }

    #[test]
    fn raw_states_skip_zero() {
        assert_eq!(GpuState::from_raw(0), None);
        assert_eq!(GpuState::from_raw(GpuState::ALL.len() + 1), None);
        for state in GpuState::ALL {
            assert_ne!(state.to_raw(), 0);
            assert_eq!(GpuState::from_raw(state.to_raw()), Some(state));
        }
    }
}
