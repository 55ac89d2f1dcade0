use jobgraph_state::{Domain, ResourceStateTable, StateTableError};

use crate::{
    CompileResult,
    resource::{GpuResource, GpuState},
};

///Last known state of resources across compilations. Backed by its own [Domain], so it lives next to any number of
/// compilers on the same table.
///
///Commit a [CompileResult] after it was submitted. A compiler the cache is attached to starts every resource in its
/// last known state instead of the resource's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateCache {
    domain: Domain,
}

impl StateCache {
    pub fn new(states: &mut ResourceStateTable) -> Self {
        StateCache {
            domain: states.create_domain(),
        }
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn last_known(
        &self,
        states: &ResourceStateTable,
        resource: &impl GpuResource,
    ) -> Result<Option<GpuState>, StateTableError> {
        Ok(states
            .get_state(self.domain, resource.state_slot())?
            .and_then(GpuState::from_raw))
    }

    ///Stores the final state of every resource `result` used. Returns how many states were stored.
    pub fn commit(&self, states: &mut ResourceStateTable, result: &CompileResult) -> Result<usize, StateTableError> {
        for (resource, state) in result.final_states() {
            states.store_state(self.domain, resource.state_slot(), state.state.to_raw())?;
        }
        Ok(result.final_states().len())
    }

    pub fn forget(&self, states: &mut ResourceStateTable, resource: &impl GpuResource) -> Result<(), StateTableError> {
        states.clear_state(self.domain, resource.state_slot())
    }

    ///Removes the cache's domain from `states`.
    pub fn destroy(self, states: &mut ResourceStateTable) -> Result<(), StateTableError> {
        states.remove_domain(self.domain)
    }
}
