//! Resource lifecycle management
//!
//! [`ResourceLifecycle::ensure`] keeps exactly one live resource set that
//! matches the requested [`ResourcePlan`]. Identical requests are no-ops.
//! A new set is allocated before the old one is released, so a failed
//! allocation leaves the last good set untouched.

use crate::backend::ShadowBackend;
use crate::error::ProvisionError;
use crate::resource::ResourcePlan;

/// Result of an [`ResourceLifecycle::ensure`] call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// The live set already matched
    Unchanged,
    /// A new set was allocated
    Provisioned,
}

/// Counters for tests and telemetry
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LifecycleStats {
    pub provisions: u64,
    pub releases: u64,
    pub failures: u64,
}

/// Owner of the live resource set
pub struct ResourceLifecycle<R> {
    current: Option<(ResourcePlan, R)>,
    dirty: bool,
    stats: LifecycleStats,
}

impl<R> Default for ResourceLifecycle<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> ResourceLifecycle<R> {
    pub fn new() -> Self {
        Self {
            current: None,
            dirty: false,
            stats: LifecycleStats::default(),
        }
    }

    /// Force the next [`ensure`](Self::ensure) to reallocate
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Drop a pending invalidation if the live set was built for `plan`
    pub fn keep_if_matches(&mut self, plan: &ResourcePlan) {
        if self.plan() == Some(plan) {
            self.dirty = false;
        }
    }

    /// Make the live set match `plan`
    pub fn ensure<B>(&mut self, backend: &mut B, plan: &ResourcePlan) -> Result<EnsureOutcome, ProvisionError>
    where
        B: ShadowBackend<Resources = R>,
    {
        if !self.dirty && self.plan() == Some(plan) {
            return Ok(EnsureOutcome::Unchanged);
        }

        match backend.provision(plan) {
            Ok(resources) => {
                if let Some((old_plan, old)) = self.current.take() {
                    log::debug!("Releasing {}", old_plan);
                    backend.release(old);
                    self.stats.releases += 1;
                }
                log::info!("Provisioned {} on {}", plan, backend.name());
                self.current = Some((plan.clone(), resources));
                self.dirty = false;
                self.stats.provisions += 1;
                Ok(EnsureOutcome::Provisioned)
            }
            Err(e) => {
                self.stats.failures += 1;
                Err(e)
            }
        }
    }

    /// Release the live set, if any
    pub fn release_all<B>(&mut self, backend: &mut B)
    where
        B: ShadowBackend<Resources = R>,
    {
        if let Some((_, resources)) = self.current.take() {
            backend.release(resources);
            self.stats.releases += 1;
        }
    }

    /// Plan of the live set
    pub fn plan(&self) -> Option<&ResourcePlan> {
        self.current.as_ref().map(|(p, _)| p)
    }

    pub fn resources(&self) -> Option<&R> {
        self.current.as_ref().map(|(_, r)| r)
    }

    pub fn resources_mut(&mut self) -> Option<&mut R> {
        self.current.as_mut().map(|(_, r)| r)
    }

    pub fn stats(&self) -> LifecycleStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FrameStats, TargetImage};
    use crate::config::{ShadowAlgorithm, ShadowMapResolution};
    use crate::error::{PassError, TargetStatus};
    use crate::frame::FrameUniforms;
    use crate::pass::PassId;
    use crate::resource::ResourceKind;
    use umbra_core::Extent2d;

    /// Hands out numbered sets and fails above `max_resolution`
    struct Numbered {
        next: u32,
        live: Vec<u32>,
        max_resolution: u32,
    }

    impl ShadowBackend for Numbered {
        type Resources = u32;

        fn name(&self) -> &str {
            "numbered"
        }

        fn provision(&mut self, plan: &ResourcePlan) -> Result<u32, ProvisionError> {
            if plan.shadow_resolution.get() > self.max_resolution {
                return Err(ProvisionError::Incomplete {
                    resource: ResourceKind::DepthMap,
                    status: TargetStatus::ExceedsLimits,
                    detail: "too big".into(),
                });
            }
            self.next += 1;
            self.live.push(self.next);
            Ok(self.next)
        }

        fn release(&mut self, resources: u32) {
            self.live.retain(|r| *r != resources);
        }

        fn has_program(&self, _pass: PassId) -> bool {
            true
        }

        fn recompile(&mut self) -> usize {
            PassId::COUNT
        }

        fn begin_frame(&mut self, _frame: &FrameUniforms) {}

        fn reset_lists(&mut self, _resources: &mut u32) {}

        fn execute(&mut self, _: PassId, _: &mut u32, _: &FrameUniforms) -> Result<(), PassError> {
            Ok(())
        }

        fn end_frame(&mut self, _resources: &mut u32) -> FrameStats {
            FrameStats::default()
        }

        fn read_target(&mut self, _: &u32, kind: ResourceKind) -> Result<TargetImage, PassError> {
            Err(PassError::Readback {
                resource: kind,
                detail: "unsupported".into(),
            })
        }
    }

    fn plan(size: u32) -> ResourcePlan {
        ResourcePlan::new(
            ShadowAlgorithm::Standard,
            ShadowMapResolution::new(size).unwrap(),
            Extent2d::new(32, 32),
        )
    }

    fn backend() -> Numbered {
        Numbered {
            next: 0,
            live: Vec::new(),
            max_resolution: 1024,
        }
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut b = backend();
        let mut lc = ResourceLifecycle::new();
        assert_eq!(lc.ensure(&mut b, &plan(256)).unwrap(), EnsureOutcome::Provisioned);
        assert_eq!(lc.ensure(&mut b, &plan(256)).unwrap(), EnsureOutcome::Unchanged);
        assert_eq!(lc.stats().provisions, 1);
        assert_eq!(b.live, vec![1]);
    }

    #[test]
    fn test_change_replaces_set() {
        let mut b = backend();
        let mut lc = ResourceLifecycle::new();
        lc.ensure(&mut b, &plan(256)).unwrap();
        lc.ensure(&mut b, &plan(512)).unwrap();
        assert_eq!(b.live, vec![2]);
        assert_eq!(lc.resources(), Some(&2));
        assert_eq!(lc.stats(), LifecycleStats { provisions: 2, releases: 1, failures: 0 });
    }

    #[test]
    fn test_failure_keeps_last_good() {
        let mut b = backend();
        let mut lc = ResourceLifecycle::new();
        lc.ensure(&mut b, &plan(512)).unwrap();
        assert!(lc.ensure(&mut b, &plan(2048)).is_err());
        assert_eq!(lc.plan(), Some(&plan(512)));
        assert_eq!(b.live, vec![1]);
        assert_eq!(lc.stats().failures, 1);
    }

    #[test]
    fn test_invalidate_forces_one_reprovision() {
        let mut b = backend();
        let mut lc = ResourceLifecycle::new();
        lc.ensure(&mut b, &plan(256)).unwrap();
        lc.invalidate();
        assert!(lc.is_dirty());
        assert_eq!(lc.ensure(&mut b, &plan(256)).unwrap(), EnsureOutcome::Provisioned);
        assert_eq!(lc.ensure(&mut b, &plan(256)).unwrap(), EnsureOutcome::Unchanged);
        assert_eq!(lc.stats().provisions, 2);
    }

    #[test]
    fn test_release_all() {
        let mut b = backend();
        let mut lc = ResourceLifecycle::new();
        lc.ensure(&mut b, &plan(256)).unwrap();
        lc.release_all(&mut b);
        assert!(b.live.is_empty());
        assert!(lc.plan().is_none());
    }
}
