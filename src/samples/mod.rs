// Samples - render graph builders driven by the frame controller
//
// Each sample is a pair of functions, not a type hierarchy:
// - build:  create its swapchain-sized targets for a freshly configured swapchain
// - record: write one frame's commands into the slot's command buffer
//
// `RenderGraph` owns the named render passes shared by every rebuild and
// hands the controller a `SampleTargets` value per swapchain generation.

pub mod clear;
pub mod post_effect;
pub mod secondary;

use anyhow::{Context, Result};
use ash::vk;
use glam::{Vec2, Vec4};
use parking_lot::Mutex;
use std::sync::Arc;

use crate::backend::{render_pass, VulkanDevice, VulkanSurface};
use crate::frame::{
    Extent2D, FrameContext, FrameLifecycleController, RebuildContext, RenderPassRegistry,
    SwapchainResources,
};

/// Controller type the application runs
pub type SampleController = FrameLifecycleController<VulkanDevice, VulkanSurface, SampleTargets>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Clear color + depth, nothing else
    Clear,
    /// Render into a reduced target, upscale with nearest filtering (mosaic)
    PostEffect,
    /// Per-slot secondary command buffers recorded at rebuild time
    Secondary,
}

impl SampleKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "clear" => Some(SampleKind::Clear),
            "post_effect" | "posteffect" | "mosaic" => Some(SampleKind::PostEffect),
            "secondary" => Some(SampleKind::Secondary),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleKind::Clear => "clear",
            SampleKind::PostEffect => "post_effect",
            SampleKind::Secondary => "secondary",
        }
    }
}

/// Values read when targets are (re)built; edits apply at the next rebuild
#[derive(Debug, Clone, Copy)]
pub struct SampleSettings {
    pub mosaic_block: u32,
}

impl Default for SampleSettings {
    fn default() -> Self {
        Self { mosaic_block: 8 }
    }
}

/// Per-frame inputs from the application
#[derive(Debug, Clone, Copy)]
pub struct FrameParams {
    pub clear_color: Vec4,
    /// Seconds since startup
    pub time: f32,
    /// Accumulated mouse drag in pixels
    pub pan: Vec2,
    pub cursor: Option<Vec2>,
}

impl FrameParams {
    /// Clear color with a slow brightness pulse
    pub fn animated_clear(&self) -> [f32; 4] {
        let pulse = 0.85 + 0.15 * (self.time * 2.0).sin();
        (self.clear_color.truncate() * pulse)
            .extend(self.clear_color.w)
            .to_array()
    }
}

/// The swapchain-dependent set of whichever sample is running
pub enum SampleTargets {
    Clear(clear::ClearTargets),
    PostEffect(post_effect::PostEffectTargets),
    Secondary(secondary::SecondaryTargets),
}

impl SwapchainResources<VulkanDevice> for SampleTargets {
    fn extent(&self) -> Extent2D {
        match self {
            SampleTargets::Clear(t) => t.extent,
            SampleTargets::PostEffect(t) => t.extent,
            SampleTargets::Secondary(t) => t.extent,
        }
    }

    fn destroy(self, device: &VulkanDevice) {
        match self {
            SampleTargets::Clear(t) => t.destroy(device),
            SampleTargets::PostEffect(t) => t.destroy(device),
            SampleTargets::Secondary(t) => t.destroy(device),
        }
    }
}

/// Record one frame of whichever sample owns `frame.resources`
pub fn record(
    device: &VulkanDevice,
    frame: FrameContext<'_, VulkanDevice, SampleTargets>,
    params: &FrameParams,
) -> Result<()> {
    let command_buffer = *frame.command_buffer;
    match frame.resources {
        SampleTargets::Clear(t) => t.record(device, command_buffer, frame.slot, params),
        SampleTargets::PostEffect(t) => t.record(device, command_buffer, frame.slot, params),
        SampleTargets::Secondary(t) => t.record(device, command_buffer, frame.slot, params),
    }
}

/// Render pass owner and target factory for one sample
pub struct RenderGraph {
    kind: SampleKind,
    device: Arc<VulkanDevice>,
    /// Passes and the swapchain format they were built for
    passes: Option<(vk::Format, RenderPassRegistry<vk::RenderPass>)>,
    settings: Arc<Mutex<SampleSettings>>,
}

impl RenderGraph {
    pub fn new(kind: SampleKind, device: Arc<VulkanDevice>, settings: Arc<Mutex<SampleSettings>>) -> Self {
        Self {
            kind,
            device,
            passes: None,
            settings,
        }
    }

    /// Build the targets for a freshly configured swapchain
    pub fn rebuild(&mut self, ctx: RebuildContext<'_, VulkanDevice, VulkanSurface>) -> Result<SampleTargets> {
        let kind = self.kind;
        let format = ctx.surface.format();
        let settings = *self.settings.lock();
        let passes = self.passes_for(format)?;

        log::info!(
            "Building '{}' targets at {} for {} images",
            kind.name(),
            ctx.extent,
            ctx.image_count
        );

        let targets = match kind {
            SampleKind::Clear => SampleTargets::Clear(clear::ClearTargets::build(&ctx, passes)?),
            SampleKind::PostEffect => SampleTargets::PostEffect(
                post_effect::PostEffectTargets::build(&ctx, passes, settings.mosaic_block)?,
            ),
            SampleKind::Secondary => {
                SampleTargets::Secondary(secondary::SecondaryTargets::build(&ctx, passes)?)
            }
        };
        Ok(targets)
    }

    /// Passes matching `format`. The swapchain format only changes across a
    /// rebuild, when no target still references the old passes.
    fn passes_for(&mut self, format: vk::Format) -> Result<&RenderPassRegistry<vk::RenderPass>> {
        let stale = self
            .passes
            .as_ref()
            .is_some_and(|(built_for, _)| *built_for != format);

        if stale {
            log::info!("Swapchain format changed to {:?}, recreating render passes", format);
            if let Some((_, registry)) = self.passes.take() {
                render_pass::destroy_pass_registry(&self.device, registry);
            }
        }

        if self.passes.is_none() {
            let registry = render_pass::create_pass_registry(&self.device, format)?;
            self.passes = Some((format, registry));
        }

        self.passes
            .as_ref()
            .map(|(_, registry)| registry)
            .context("Render passes missing after creation")
    }
}

impl Drop for RenderGraph {
    fn drop(&mut self) {
        if let Some((_, registry)) = self.passes.take() {
            render_pass::destroy_pass_registry(&self.device, registry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_names_round_trip() {
        for kind in [SampleKind::Clear, SampleKind::PostEffect, SampleKind::Secondary] {
            assert_eq!(SampleKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(SampleKind::from_name(" Mosaic "), Some(SampleKind::PostEffect));
        assert_eq!(SampleKind::from_name("teapot"), None);
    }

    #[test]
    fn clear_pulse_keeps_alpha() {
        let params = FrameParams {
            clear_color: Vec4::new(0.2, 0.4, 0.8, 0.5),
            time: 0.0,
            pan: Vec2::ZERO,
            cursor: None,
        };
        let color = params.animated_clear();
        assert!((color[0] - 0.17).abs() < 1e-6);
        assert!((color[2] - 0.68).abs() < 1e-6);
        assert_eq!(color[3], 0.5);
    }
}
