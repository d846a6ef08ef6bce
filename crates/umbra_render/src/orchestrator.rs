//! Pipeline orchestration
//!
//! [`ShadowPipeline`] runs one frame at a time:
//!
//! 1. rebuild the light view from the current light position
//! 2. make the live resource set match (algorithm, shadow-map resolution,
//!    window); a request the backend cannot provision is rejected and the
//!    last good combination is restored
//! 3. clear the lists (alias-free only)
//! 4. run the algorithm's passes in order, skipping passes without a program
//! 5. collect timings and list statistics
//!
//! All mutable pipeline state lives in a [`ShadowPipelineContext`] owned by
//! the pipeline, so independent pipelines never share anything.

use glam::Vec3;
use umbra_core::Extent2d;

use crate::backend::{FrameStats, ShadowBackend, TargetImage};
use crate::config::{ShadowAlgorithm, ShadowConfig, ShadowMapResolution};
use crate::error::PipelineError;
use crate::frame::{CameraMatrices, FrameUniforms};
use crate::lifecycle::{EnsureOutcome, LifecycleStats, ResourceLifecycle};
use crate::light::LightRig;
use crate::pass::PassId;
use crate::resource::{ResourceKind, ResourcePlan};
use crate::timing::PassTimings;

/// Two-state machine over [`ShadowAlgorithm`]
#[derive(Debug, Clone)]
pub struct AlgorithmStateMachine {
    current: ShadowAlgorithm,
    transitions: u64,
}

impl AlgorithmStateMachine {
    pub fn new(initial: ShadowAlgorithm) -> Self {
        Self {
            current: initial,
            transitions: 0,
        }
    }

    #[inline]
    pub fn current(&self) -> ShadowAlgorithm {
        self.current
    }

    /// Number of state changes so far
    #[inline]
    pub fn transitions(&self) -> u64 {
        self.transitions
    }

    /// Move to `next`; `on_transition(from, to)` runs only on a real change
    pub fn select<F>(&mut self, next: ShadowAlgorithm, on_transition: F) -> bool
    where
        F: FnOnce(ShadowAlgorithm, ShadowAlgorithm),
    {
        if next == self.current {
            return false;
        }
        let from = self.current;
        self.current = next;
        self.transitions += 1;
        on_transition(from, next);
        true
    }

    /// Go back to `algorithm` after a rejected switch; not a transition
    pub fn restore(&mut self, algorithm: ShadowAlgorithm) {
        self.current = algorithm;
    }
}

/// Algorithm, shadow-map resolution and window of one resource set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceRequest {
    pub algorithm: ShadowAlgorithm,
    pub resolution: ShadowMapResolution,
    pub window: Extent2d,
}

impl ResourceRequest {
    pub fn plan(&self) -> ResourcePlan {
        ResourcePlan::new(self.algorithm, self.resolution, self.window)
    }
}

/// Summary of one rendered frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    pub algorithm: ShadowAlgorithm,
    pub shadow_resolution: ShadowMapResolution,
    pub window: Extent2d,
    /// Resources were (re)allocated this frame
    pub reprovisioned: bool,
    /// Request that could not be provisioned and was rolled back this frame
    pub rejected: Option<ResourceRequest>,
    pub executed: Vec<PassId>,
    /// Passes skipped for lack of a program
    pub skipped: Vec<PassId>,
    pub stats: FrameStats,
}

impl FrameReport {
    pub fn overflowed_samples(&self) -> u32 {
        self.stats.overflowed_samples()
    }

    /// Shadow-map resolution of a rejected request, if it differed from the live one
    pub fn rejected_resolution(&self) -> Option<ShadowMapResolution> {
        self.rejected
            .map(|r| r.resolution)
            .filter(|r| *r != self.shadow_resolution)
    }
}

/// Mutable state of one pipeline instance
pub struct ShadowPipelineContext<R> {
    config: ShadowConfig,
    window: Extent2d,
    light: LightRig,
    lifecycle: ResourceLifecycle<R>,
    last_good: Option<ResourceRequest>,
    timings: PassTimings,
    frame_index: u64,
    warned_missing: [bool; PassId::COUNT],
}

impl<R> ShadowPipelineContext<R> {
    pub fn config(&self) -> &ShadowConfig {
        &self.config
    }

    pub fn window(&self) -> Extent2d {
        self.window
    }

    pub fn light(&self) -> &LightRig {
        &self.light
    }

    pub fn timings(&self) -> &PassTimings {
        &self.timings
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Last combination that provisioned successfully
    pub fn last_good(&self) -> Option<ResourceRequest> {
        self.last_good
    }
}

/// Standard / alias-free shadow pipeline over a backend
pub struct ShadowPipeline<B: ShadowBackend> {
    backend: B,
    state: AlgorithmStateMachine,
    ctx: ShadowPipelineContext<B::Resources>,
}

impl<B: ShadowBackend> ShadowPipeline<B> {
    /// Create a pipeline; resources are allocated by the first frame
    pub fn new(backend: B, mut config: ShadowConfig, window: Extent2d) -> Self {
        config.validate();
        let light = LightRig::from_config(&config);
        log::info!(
            "Shadow pipeline on {}: {} algorithm, shadow map {}, window {}",
            backend.name(),
            config.algorithm,
            config.shadow_map_resolution,
            window
        );
        Self {
            backend,
            state: AlgorithmStateMachine::new(config.algorithm),
            ctx: ShadowPipelineContext {
                last_good: None,
                config,
                window,
                light,
                lifecycle: ResourceLifecycle::new(),
                timings: PassTimings::default(),
                frame_index: 0,
                warned_missing: [false; PassId::COUNT],
            },
        }
    }

    /// Active algorithm
    pub fn algorithm(&self) -> ShadowAlgorithm {
        self.state.current()
    }

    /// Select an algorithm; a real change forces one reprovision
    pub fn select_algorithm(&mut self, algorithm: ShadowAlgorithm) -> bool {
        let ctx = &mut self.ctx;
        self.state.select(algorithm, |from, to| {
            log::info!("Shadow algorithm {} -> {}", from.state_name(), to.state_name());
            ctx.config.algorithm = to;
            ctx.lifecycle.invalidate();
        })
    }

    pub fn toggle_algorithm(&mut self) -> ShadowAlgorithm {
        let next = self.algorithm().toggled();
        self.select_algorithm(next);
        next
    }

    /// Request a new shadow-map resolution; applied by the next frame
    pub fn set_shadow_map_resolution(&mut self, resolution: ShadowMapResolution) -> bool {
        if resolution == self.ctx.config.shadow_map_resolution {
            return false;
        }
        log::info!(
            "Shadow map resolution {} -> {}",
            self.ctx.config.shadow_map_resolution,
            resolution
        );
        self.ctx.config.shadow_map_resolution = resolution;
        true
    }

    /// Double (`steps > 0`) or halve (`steps < 0`) the resolution with wrap-around
    pub fn step_shadow_map_resolution(&mut self, steps: i32) -> ShadowMapResolution {
        let next = self.ctx.config.shadow_map_resolution.stepped(steps);
        self.set_shadow_map_resolution(next);
        next
    }

    pub fn shadow_map_resolution(&self) -> ShadowMapResolution {
        self.ctx.config.shadow_map_resolution
    }

    /// Window resolution change notification
    pub fn resize(&mut self, window: Extent2d) -> bool {
        if window.is_empty() {
            log::warn!("Ignoring resize to empty window {}", window);
            return false;
        }
        if window == self.ctx.window {
            return false;
        }
        log::debug!("Window resized {} -> {}", self.ctx.window, window);
        self.ctx.window = window;
        true
    }

    /// Move the light (clamped per axis)
    pub fn set_light_position(&mut self, position: Vec3) {
        self.ctx.light.set_position(position);
        self.ctx.config.light_position = self.ctx.light.position().to_array();
    }

    /// Rebuild the backend's programs and re-arm missing-program warnings
    pub fn recompile(&mut self) -> usize {
        let valid = self.backend.recompile();
        self.ctx.warned_missing = [false; PassId::COUNT];
        log::info!("Recompiled programs: {}/{} valid", valid, PassId::COUNT);
        valid
    }

    /// Render one frame with the given camera
    pub fn render_frame(&mut self, camera: &CameraMatrices) -> Result<FrameReport, PipelineError> {
        self.ctx.light.update_view();
        let (reprovisioned, rejected) = self.ensure_resources()?;
        let algorithm = self.state.current();

        let ctx = &mut self.ctx;
        let backend = &mut self.backend;
        let (resolution, node_capacity) = match ctx.lifecycle.plan() {
            Some(plan) => (plan.shadow_resolution, plan.node_capacity()),
            None => return Err(PipelineError::NotProvisioned),
        };
        let frame = FrameUniforms::new(
            *camera,
            &ctx.light,
            ctx.window,
            resolution,
            ctx.config.max_list_traversal,
            node_capacity,
            ctx.config.depth_bias,
            ctx.config.ambient,
        );
        let resources = ctx
            .lifecycle
            .resources_mut()
            .ok_or(PipelineError::NotProvisioned)?;

        backend.begin_frame(&frame);
        if algorithm == ShadowAlgorithm::AliasFree {
            backend.reset_lists(resources);
        }

        let mut executed = Vec::new();
        let mut skipped = Vec::new();
        let mut failure = None;
        for pass in PassId::sequence(algorithm) {
            if !backend.has_program(*pass) {
                if !ctx.warned_missing[pass.index()] {
                    log::warn!("No valid program for pass {}, skipping", pass);
                    ctx.warned_missing[pass.index()] = true;
                }
                skipped.push(*pass);
                continue;
            }
            log::trace!("Executing {}", pass);
            if let Err(e) = backend.execute(*pass, resources, &frame) {
                failure = Some(e);
                break;
            }
            executed.push(*pass);
        }

        let stats = backend.end_frame(resources);
        if let Some(e) = failure {
            return Err(e.into());
        }

        let overflow = stats.overflowed_samples();
        if overflow > 0 {
            log::warn!(
                "Node buffer overflow: {} samples dropped (capacity {})",
                overflow,
                stats.node_capacity
            );
        }
        ctx.timings.record(&stats);

        let report = FrameReport {
            frame_index: ctx.frame_index,
            algorithm,
            shadow_resolution: resolution,
            window: ctx.window,
            reprovisioned,
            rejected,
            executed,
            skipped,
            stats,
        };
        ctx.frame_index += 1;
        Ok(report)
    }

    /// Provision for the current state, falling back to the last good one
    ///
    /// A failed request is rejected as a whole: algorithm, shadow-map
    /// resolution and window all return to the last combination that
    /// provisioned, and the live set is kept when it still matches.
    fn ensure_resources(&mut self) -> Result<(bool, Option<ResourceRequest>), PipelineError> {
        let requested = ResourceRequest {
            algorithm: self.state.current(),
            resolution: self.ctx.config.shadow_map_resolution,
            window: self.ctx.window,
        };

        let error = match self.ctx.lifecycle.ensure(&mut self.backend, &requested.plan()) {
            Ok(outcome) => {
                self.ctx.last_good = Some(requested);
                return Ok((outcome == EnsureOutcome::Provisioned, None));
            }
            Err(e) => e,
        };
        log::error!("{}", error);
        let last_good = match self.ctx.last_good {
            Some(last) if last != requested => last,
            _ => return Err(error.into()),
        };
        log::warn!(
            "Rejecting {} at shadow map {} and window {}, reverting to {} at {} and {}",
            requested.algorithm,
            requested.resolution,
            requested.window,
            last_good.algorithm,
            last_good.resolution,
            last_good.window
        );

        self.state.restore(last_good.algorithm);
        self.ctx.config.algorithm = last_good.algorithm;
        self.ctx.config.shadow_map_resolution = last_good.resolution;
        self.ctx.window = last_good.window;

        let fallback = last_good.plan();
        self.ctx.lifecycle.keep_if_matches(&fallback);
        let outcome = self.ctx.lifecycle.ensure(&mut self.backend, &fallback)?;
        Ok((outcome == EnsureOutcome::Provisioned, Some(requested)))
    }

    /// Copy an intermediate resource of the live set to the CPU
    pub fn read_target(&mut self, kind: ResourceKind) -> Result<TargetImage, PipelineError> {
        let resources = self
            .ctx
            .lifecycle
            .resources()
            .ok_or(PipelineError::NotProvisioned)?;
        Ok(self.backend.read_target(resources, kind)?)
    }

    pub fn config(&self) -> &ShadowConfig {
        &self.ctx.config
    }

    pub fn window(&self) -> Extent2d {
        self.ctx.window
    }

    pub fn light(&self) -> &LightRig {
        &self.ctx.light
    }

    pub fn timings(&self) -> &PassTimings {
        &self.ctx.timings
    }

    pub fn lifecycle_stats(&self) -> LifecycleStats {
        self.ctx.lifecycle.stats()
    }

    /// Plan of the live resource set
    pub fn plan(&self) -> Option<&ResourcePlan> {
        self.ctx.lifecycle.plan()
    }

    /// Live resources, read-only
    pub fn resources(&self) -> Option<&B::Resources> {
        self.ctx.lifecycle.resources()
    }

    pub fn context(&self) -> &ShadowPipelineContext<B::Resources> {
        &self.ctx
    }

    pub fn state(&self) -> &AlgorithmStateMachine {
        &self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}

impl<B: ShadowBackend> Drop for ShadowPipeline<B> {
    fn drop(&mut self) {
        self.ctx.lifecycle.release_all(&mut self.backend);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_machine_fires_only_on_change() {
        let mut sm = AlgorithmStateMachine::new(ShadowAlgorithm::Standard);
        let mut fired = Vec::new();
        assert!(!sm.select(ShadowAlgorithm::Standard, |a, b| fired.push((a, b))));
        assert!(sm.select(ShadowAlgorithm::AliasFree, |a, b| fired.push((a, b))));
        assert!(!sm.select(ShadowAlgorithm::AliasFree, |a, b| fired.push((a, b))));
        assert_eq!(fired, vec![(ShadowAlgorithm::Standard, ShadowAlgorithm::AliasFree)]);
        assert_eq!(sm.transitions(), 1);
        assert_eq!(sm.current(), ShadowAlgorithm::AliasFree);
    }

    #[test]
    fn test_restore_is_not_a_transition() {
        let mut sm = AlgorithmStateMachine::new(ShadowAlgorithm::Standard);
        sm.select(ShadowAlgorithm::AliasFree, |_, _| {});
        sm.restore(ShadowAlgorithm::Standard);
        assert_eq!(sm.current(), ShadowAlgorithm::Standard);
        assert_eq!(sm.transitions(), 1);
    }
}
