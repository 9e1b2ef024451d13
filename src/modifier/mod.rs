//! 姿态修改器
//!
//! 每个修改器每帧经历三个阶段：
//! - Prepare: 采纳外部输入，交换双缓冲，判断本帧是否有效果
//! - Execute: 修改姿态（可以在工作线程上运行）
//! - Synchronize: 发布输出状态，清理已消费的缓冲
//!
//! Prepare 返回 false 时 Execute/Synchronize 仍会被调用，必须安全地什么都不做。

mod constraint;
mod dynamics;
mod ik_node;
mod limb_ik;
mod operator_queue;
mod stack;
mod transform_blender;

pub use constraint::{ConstraintAim, ConstraintAimDesc, ConstraintLine, ConstraintLineDesc, ConstraintPoint, ConstraintPointDesc, DrivenTwist, DrivenTwistDesc};
pub use dynamics::{DynamicsPendulum, DynamicsPendulumDesc, DynamicsSpring, DynamicsSpringDesc, LimitPlanes};
pub use ik_node::{Ik2Segments, Ik2SegmentsDesc, IkCcd, IkCcdDesc};
pub use limb_ik::{LimbIk, LimbIkSetup};
pub use operator_queue::{OperatorKind, OperatorQueue, StoreHandle, StoreSpace};
pub use stack::{PoseModifierSetup, PoseModifierSetupEntry, PoseModifierStack};
pub use transform_blender::{BlendTargetDesc, TransformBlender, TransformBlenderDesc};

use crate::aim::{AimClipTable, PlayingClip};
use crate::pose::PoseBuffer;
use crate::skeleton::{JointHierarchy, JointTransform};
use glam::Vec3;

// ============================================================================
// 修改器接口
// ============================================================================

/// 姿态修改器
pub trait PoseModifier: Send {
    /// 采纳输入并决定本帧是否生效
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool;

    /// 修改姿态，返回是否做了修改
    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool;

    /// 发布输出、清理缓冲
    fn synchronize(&mut self);
}

/// 每帧传给修改器的上下文
pub struct PoseModifierParams<'a> {
    pub hierarchy: &'a JointHierarchy,
    pub pose: &'a mut PoseBuffer,
    /// 角色在世界中的放置（不含缩放）
    pub location: JointTransform,
    /// 未经限制的帧时间，需要的修改器自行 clamp
    pub time_delta: f32,
    /// 瞄准片段表（只读上下文）
    pub clips: Option<&'a AimClipTable>,
    /// 本帧正在播放的片段
    pub playing: &'a [PlayingClip],
}

impl<'a> PoseModifierParams<'a> {
    pub fn new(hierarchy: &'a JointHierarchy, pose: &'a mut PoseBuffer) -> Self {
        Self {
            hierarchy,
            pose,
            location: JointTransform::IDENTITY,
            time_delta: 0.0,
            clips: None,
            playing: &[],
        }
    }

    pub fn with_location(mut self, location: JointTransform) -> Self {
        self.location = location;
        self
    }

    pub fn with_time_delta(mut self, time_delta: f32) -> Self {
        self.time_delta = time_delta;
        self
    }

    pub fn with_clips(mut self, clips: &'a AimClipTable, playing: &'a [PlayingClip]) -> Self {
        self.clips = Some(clips);
        self.playing = playing;
        self
    }
}

// ============================================================================
// 双缓冲
// ============================================================================

/// 双缓冲：外部写 `pending`，Execute 读 `active`
///
/// 角色互换只在 Prepare 里发生。
#[derive(Clone, Debug, Default)]
pub struct DoubleBuffer<T> {
    pending: T,
    active: T,
}

impl<T> DoubleBuffer<T> {
    pub fn new(pending: T, active: T) -> Self {
        Self { pending, active }
    }

    #[inline]
    pub fn pending(&self) -> &T {
        &self.pending
    }

    #[inline]
    pub fn pending_mut(&mut self) -> &mut T {
        &mut self.pending
    }

    #[inline]
    pub fn active(&self) -> &T {
        &self.active
    }

    #[inline]
    pub(crate) fn active_mut(&mut self) -> &mut T {
        &mut self.active
    }

    /// 交换（队列类数据：消费后清空）
    #[inline]
    pub(crate) fn swap(&mut self) {
        std::mem::swap(&mut self.pending, &mut self.active);
    }
}

impl<T: Clone> DoubleBuffer<T> {
    /// 锁存（状态类数据：pending 保留，active 取一份快照）
    #[inline]
    pub(crate) fn latch(&mut self) {
        self.active.clone_from(&self.pending);
    }
}

// ============================================================================
// 公共工具
// ============================================================================

/// 缺失配置的告警：每次从可用变为缺失时只告警一次
#[derive(Clone, Debug, Default)]
pub(crate) struct SetupWarning {
    warned: bool,
}

impl SetupWarning {
    pub(crate) fn missing(&mut self, tag: &str, what: &str) {
        if !self.warned {
            log::warn!("[{}] {}", tag, what);
            self.warned = true;
        }
    }

    pub(crate) fn available(&mut self) {
        self.warned = false;
    }
}

/// 按名称解析关节；空名称视为未设置
pub(crate) fn resolve_optional(hierarchy: &JointHierarchy, name: &Option<String>) -> Result<Option<usize>, String> {
    match name {
        Some(n) if !n.is_empty() => hierarchy
            .joint_index(n)
            .map(Some)
            .ok_or_else(|| format!("unknown joint '{}'", n)),
        _ => Ok(None),
    }
}

pub(crate) fn resolve_required(hierarchy: &JointHierarchy, name: &str) -> Result<usize, String> {
    hierarchy
        .joint_index(name)
        .ok_or_else(|| format!("unknown joint '{}'", name))
}

/// 权重乘以权重关节的相对平移 x（限制在 [0,1]）
pub(crate) fn scaled_weight(pose: &PoseBuffer, weight: f32, weight_joint: Option<usize>) -> f32 {
    match weight_joint.and_then(|j| pose.relative(j)) {
        Some(rel) => weight * rel.translation.x.clamp(0.0, 1.0),
        None => weight,
    }
}

/// 角色空间中的一个点：可选的关节 + 关节局部偏移 + 角色空间偏移
#[derive(Clone, Debug, Default)]
pub struct PointDesc {
    pub joint: Option<String>,
    pub local_offset: Vec3,
    pub world_offset: Vec3,
}

impl PointDesc {
    pub fn offset(offset: Vec3) -> Self {
        Self {
            joint: None,
            local_offset: Vec3::ZERO,
            world_offset: offset,
        }
    }

    pub fn joint(name: &str, local_offset: Vec3) -> Self {
        Self {
            joint: Some(name.to_string()),
            local_offset,
            world_offset: Vec3::ZERO,
        }
    }

    pub(crate) fn resolve(&self, hierarchy: &JointHierarchy) -> Result<ResolvedPoint, String> {
        Ok(ResolvedPoint {
            joint: resolve_optional(hierarchy, &self.joint)?,
            local_offset: self.local_offset,
            world_offset: self.world_offset,
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ResolvedPoint {
    pub joint: Option<usize>,
    pub local_offset: Vec3,
    pub world_offset: Vec3,
}

impl ResolvedPoint {
    pub(crate) fn evaluate(&self, pose: &PoseBuffer) -> Vec3 {
        let base = self
            .joint
            .and_then(|j| pose.absolute(j))
            .map(|abs| abs.transform_point(self.local_offset))
            .unwrap_or(self.local_offset);
        base + self.world_offset
    }
}
