//! System contracts
//!
//! Systems run once per frame in order: `begin_query`, then `on_query` with
//! the depth-sorted alive list, then `update`. Render systems additionally
//! take part in the sorted render sub-passes.

use super::entity_data::AsAny;
use super::entity_manager::EntityManager;
use bitflags::bitflags;

/// Per-frame unit of logic
///
/// Every hook receives the manager mutably. While a hook runs, the system
/// itself is detached from the manager, so it may freely create entities,
/// add data or look up other systems.
pub trait EntitySystem: AsAny {
    /// Called once, right after registration
    fn init(&mut self, _manager: &mut EntityManager) {}

    /// Reset per-frame state before the query step
    fn begin_query(&mut self, _manager: &mut EntityManager) {}

    /// Pull matching entities out of the depth-sorted alive list
    fn on_query(&mut self, _manager: &mut EntityManager, _entities: &[u32]) {}

    /// Mutate the collected entities
    fn update(&mut self, _manager: &mut EntityManager) {}
}

/// Render stage a render system belongs to, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum RenderPass {
    /// Sky box and background
    Sky,
    /// Opaque geometry
    #[default]
    Opaque,
    /// Alpha blended geometry
    Transparent,
    /// Particles and post effects
    Effect,
}

bitflags! {
    /// Render pipelines a render system participates in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineType: u32 {
        /// Forward shading
        const FORWARD = 1;
        /// Deferred shading
        const DEFERRED = 1 << 1;
        /// Shadow map generation
        const SHADOW_MAP = 1 << 2;
        /// Light map baking
        const LIGHTMAP = 1 << 3;
        /// Any pipeline
        const MIX = Self::FORWARD.bits()
            | Self::DEFERRED.bits()
            | Self::SHADOW_MAP.bits()
            | Self::LIGHTMAP.bits();
    }
}

impl Default for PipelineType {
    fn default() -> Self {
        Self::FORWARD
    }
}

impl PipelineType {
    /// Whether a system declaring `self` runs under `active`
    pub fn runs_in(self, active: Self) -> bool {
        self.intersects(active)
    }
}

/// A system that also issues draw calls
pub trait RenderSystem: EntitySystem {
    /// Opaque sub-pass
    fn render(&mut self, _manager: &mut EntityManager) {}

    /// Transparent sub-pass, after every system's `render`
    fn render_transparent(&mut self, _manager: &mut EntityManager) {}

    /// Emission sub-pass, driven separately
    fn render_emission(&mut self, _manager: &mut EntityManager) {}

    /// Final sub-pass of the frame
    fn post_render(&mut self, _manager: &mut EntityManager) {}

    /// Pipelines this system runs in
    fn pipeline_type(&self) -> PipelineType {
        PipelineType::MIX
    }

    /// Render stage, first sort key
    fn render_pass(&self) -> RenderPass {
        RenderPass::Opaque
    }

    /// Tie break within a pass, ascending
    fn sorting_priority(&self) -> i32 {
        0
    }

    /// Culling systems are re-run by `cull_and_render`
    fn is_culling(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_pass_order() {
        assert!(RenderPass::Sky < RenderPass::Opaque);
        assert!(RenderPass::Opaque < RenderPass::Transparent);
        assert!(RenderPass::Transparent < RenderPass::Effect);
    }

    #[test]
    fn test_pipeline_compatibility() {
        assert!(PipelineType::MIX.runs_in(PipelineType::SHADOW_MAP));
        assert!(PipelineType::FORWARD.runs_in(PipelineType::FORWARD));
        assert!(!PipelineType::DEFERRED.runs_in(PipelineType::FORWARD));
        assert!((PipelineType::FORWARD | PipelineType::DEFERRED).runs_in(PipelineType::DEFERRED));
    }
}
