//! 资源状态跟踪
//!
//! 记录每个资源最后已知的 GPU 状态，在提交时检查屏障声明的前置状态。
//! 禁用时不做任何检查，也不记录状态。

use std::collections::HashMap;

use crate::core::error::GpuError;
use crate::gfx::backend::GpuDevice;
use crate::renderer::command::Command;
use crate::renderer::resource::{Resource, ResourceId, ResourceState, WeakResource};

struct TrackedResource<B: GpuDevice> {
    resource: WeakResource<B>,
    name: String,
    state: ResourceState,
}

/// 一次提交中通过检查、等待执行成功后写入的状态
pub struct PendingStates<B: GpuDevice> {
    states: HashMap<ResourceId, TrackedResource<B>>,
    barriers: usize,
}

impl<B: GpuDevice> PendingStates<B> {
    /// 通过检查的屏障数量
    pub fn barriers(&self) -> usize {
        self.barriers
    }
}

/// 资源状态跟踪器
///
/// 只保存资源的弱引用，资源释放后对应的条目在下一次写入时清除。
pub struct ResourceStateTracker<B: GpuDevice> {
    enabled: bool,
    states: HashMap<ResourceId, TrackedResource<B>>,
}

impl<B: GpuDevice> ResourceStateTracker<B> {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            states: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 仍然存活的被跟踪资源数量
    pub fn len(&self) -> usize {
        self.states.values().filter(|t| t.resource.is_alive()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 已知状态，未见过或已释放的资源返回 None
    pub fn state_of(&self, id: ResourceId) -> Option<ResourceState> {
        self.states
            .get(&id)
            .filter(|t| t.resource.is_alive())
            .map(|t| t.state)
    }

    /// 显式登记资源状态（例如重建后的后缓冲）
    pub fn register(&mut self, resource: &Resource<B>, state: ResourceState) {
        if !self.enabled {
            return;
        }
        self.prune();
        self.states.insert(
            resource.id(),
            TrackedResource {
                resource: resource.downgrade(),
                name: resource.name().to_string(),
                state,
            },
        );
    }

    /// 不再跟踪资源
    pub fn forget(&mut self, id: ResourceId) {
        self.states.remove(&id);
    }

    /// 清除已释放资源的条目，返回清除的数量
    pub fn prune(&mut self) -> usize {
        let before = self.states.len();
        self.states.retain(|_, t| t.resource.is_alive());
        before - self.states.len()
    }

    /// 按顺序检查命令中的屏障，不修改已知状态
    ///
    /// 未见过的资源以创建时的状态为起点。
    pub fn validate_commands<'a>(
        &self,
        commands: impl IntoIterator<Item = &'a Command<B>>,
    ) -> Result<PendingStates<B>, GpuError>
    where
        B: 'a,
    {
        let mut pending = PendingStates {
            states: HashMap::new(),
            barriers: 0,
        };
        if !self.enabled {
            return Ok(pending);
        }

        for command in commands {
            let Command::Barrier(barrier) = command else {
                continue;
            };
            let id = barrier.resource.id();
            let tracked = pending
                .states
                .get(&id)
                .map(|t| t.state)
                .or_else(|| self.state_of(id))
                .unwrap_or_else(|| barrier.resource.initial_state());

            if tracked != barrier.before {
                return Err(GpuError::ResourceStateMismatch {
                    resource: barrier.resource.name().to_string(),
                    declared: barrier.before,
                    tracked,
                });
            }

            pending.states.insert(
                id,
                TrackedResource {
                    resource: barrier.resource.downgrade(),
                    name: barrier.resource.name().to_string(),
                    state: barrier.after,
                },
            );
            pending.barriers += 1;
        }
        Ok(pending)
    }

    /// 写入已经执行的屏障结果
    pub fn commit(&mut self, pending: PendingStates<B>) -> usize {
        if !self.enabled {
            return 0;
        }
        self.prune();
        for (id, tracked) in pending.states {
            tracing::trace!(resource = %tracked.name, state = ?tracked.state, "Resource state updated");
            self.states.insert(id, tracked);
        }
        pending.barriers
    }

    /// 检查并立即写入
    pub fn apply_commands<'a>(&mut self, commands: impl IntoIterator<Item = &'a Command<B>>) -> Result<usize, GpuError>
    where
        B: 'a,
    {
        let pending = self.validate_commands(commands)?;
        Ok(self.commit(pending))
    }
}

/// 检查一段命令内每个资源的屏障链是否首尾相接
///
/// 返回第一个断开的位置：(资源名, 声明的前置状态, 上一个屏障的后置状态)。
pub fn find_broken_barrier_chain<B: GpuDevice>(commands: &[Command<B>]) -> Option<(String, ResourceState, ResourceState)> {
    let mut last: HashMap<ResourceId, ResourceState> = HashMap::new();
    for command in commands {
        if let Command::Barrier(barrier) = command {
            if let Some(previous) = last.insert(barrier.resource.id(), barrier.after) {
                if previous != barrier.before {
                    return Some((barrier.resource.name().to_string(), barrier.before, previous));
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::software::SoftwareDevice;
    use crate::renderer::command::TransitionBarrier;
    use crate::renderer::resource::{Format, HeapKind, ResourceDesc};
    use std::sync::Arc;

    fn barrier(resource: &Resource<SoftwareDevice>, before: ResourceState, after: ResourceState) -> Command<SoftwareDevice> {
        Command::Barrier(TransitionBarrier {
            resource: resource.clone(),
            before,
            after,
        })
    }

    fn texture(device: &Arc<SoftwareDevice>) -> Resource<SoftwareDevice> {
        Resource::create(
            device,
            ResourceDesc::texture2d("target", 2, 2, Format::Rgba8Unorm, HeapKind::Default, ResourceState::Present)
                .with_render_target(),
        )
        .unwrap()
    }

    #[test]
    fn test_tracker_follows_barriers_across_submissions() {
        let device = Arc::new(SoftwareDevice::new());
        let target = texture(&device);
        let mut tracker = ResourceStateTracker::new(true);

        let frame = vec![
            barrier(&target, ResourceState::Present, ResourceState::RenderTarget),
            barrier(&target, ResourceState::RenderTarget, ResourceState::Present),
        ];
        assert_eq!(tracker.apply_commands(&frame).unwrap(), 2);
        assert_eq!(tracker.state_of(target.id()), Some(ResourceState::Present));
        assert_eq!(tracker.apply_commands(&frame).unwrap(), 2);

        // 前置状态与实际不符
        let bad = vec![barrier(&target, ResourceState::RenderTarget, ResourceState::Present)];
        let err = tracker.apply_commands(&bad).unwrap_err();
        assert_eq!(
            err,
            GpuError::ResourceStateMismatch {
                resource: "target".into(),
                declared: ResourceState::RenderTarget,
                tracked: ResourceState::Present,
            }
        );
        // 失败的提交不改变状态
        assert_eq!(tracker.state_of(target.id()), Some(ResourceState::Present));
    }

    #[test]
    fn test_disabled_tracker_accepts_anything() {
        let device = Arc::new(SoftwareDevice::new());
        let target = texture(&device);
        let mut tracker = ResourceStateTracker::new(false);
        let bad = vec![barrier(&target, ResourceState::CopyDest, ResourceState::Present)];
        assert_eq!(tracker.apply_commands(&bad).unwrap(), 0);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_validate_does_not_commit_until_asked() {
        let device = Arc::new(SoftwareDevice::new());
        let target = texture(&device);
        let mut tracker = ResourceStateTracker::new(true);

        let frame = vec![barrier(&target, ResourceState::Present, ResourceState::RenderTarget)];
        let pending = tracker.validate_commands(&frame).unwrap();
        assert_eq!(pending.barriers(), 1);
        assert_eq!(tracker.state_of(target.id()), None);

        // 未写入时再次检查仍以初始状态为起点
        assert!(tracker.validate_commands(&frame).is_ok());

        assert_eq!(tracker.commit(pending), 1);
        assert_eq!(tracker.state_of(target.id()), Some(ResourceState::RenderTarget));
    }

    #[test]
    fn test_released_resources_are_pruned() {
        let device = Arc::new(SoftwareDevice::new());
        let mut tracker = ResourceStateTracker::new(true);
        let keep = texture(&device);
        tracker.register(&keep, ResourceState::Present);

        let mut ids = Vec::new();
        for _ in 0..100 {
            let temp = texture(&device);
            let frame = vec![barrier(&temp, ResourceState::Present, ResourceState::CopySource)];
            tracker.apply_commands(&frame).unwrap();
            ids.push(temp.id());
            // frame 与 temp 在此释放
        }

        assert!(ids.iter().all(|id| tracker.state_of(*id).is_none()));
        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.prune(), 1);
        assert_eq!(tracker.states.len(), 1);
        assert_eq!(tracker.state_of(keep.id()), Some(ResourceState::Present));
    }

    #[test]
    fn test_find_broken_chain() {
        let device = Arc::new(SoftwareDevice::new());
        let target = texture(&device);

        let good = vec![
            barrier(&target, ResourceState::Present, ResourceState::RenderTarget),
            barrier(&target, ResourceState::RenderTarget, ResourceState::Present),
        ];
        assert!(find_broken_barrier_chain(&good).is_none());

        let broken = vec![
            barrier(&target, ResourceState::Present, ResourceState::RenderTarget),
            barrier(&target, ResourceState::CopyDest, ResourceState::Present),
        ];
        let (name, declared, previous) = find_broken_barrier_chain(&broken).unwrap();
        assert_eq!(name, "target");
        assert_eq!(declared, ResourceState::CopyDest);
        assert_eq!(previous, ResourceState::RenderTarget);
    }
}
