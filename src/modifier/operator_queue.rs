//! 操作队列
//!
//! 其它系统通过它排队修改关节，不需要直接依赖姿态内部结构。
//! 本帧 push 的操作在下一次 Prepare 后的 Execute 中按 push 顺序执行。

use glam::{Quat, Vec3};

use super::{DoubleBuffer, PoseModifier, PoseModifierParams};
use crate::pose::PoseBuffer;
use crate::skeleton::{JointHierarchy, JointTransform};

/// 编辑操作类型
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorKind {
    OverrideRelative,
    OverrideAbsolute,
    /// 世界空间覆盖（先用角色放置变换转换到角色空间）
    OverrideWorld,
    AdditiveRelative,
    AdditiveAbsolute,
}

/// 读回的空间
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreSpace {
    Relative,
    Absolute,
    World,
}

/// 读回结果句柄
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StoreHandle {
    batch: u64,
    slot: usize,
}

#[derive(Clone, Copy, Debug)]
enum OperatorValue {
    Position(Vec3),
    Orientation(Quat),
}

#[derive(Clone, Copy, Debug)]
enum Operation {
    Edit {
        joint: usize,
        kind: OperatorKind,
        value: OperatorValue,
    },
    Store {
        joint: usize,
        space: StoreSpace,
        slot: usize,
    },
    ComputeAbsolute,
}

#[derive(Clone, Debug, Default)]
struct OperatorBatch {
    id: u64,
    ops: Vec<Operation>,
    store_count: usize,
}

impl OperatorBatch {
    fn reset(&mut self, id: u64) {
        self.id = id;
        self.ops.clear();
        self.store_count = 0;
    }
}

/// 操作队列
pub struct OperatorQueue {
    buffers: DoubleBuffer<OperatorBatch>,
    next_batch: u64,
    results: Vec<Option<JointTransform>>,
    results_batch: Option<u64>,
}

impl Default for OperatorQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorQueue {
    pub fn new() -> Self {
        let mut buffers = DoubleBuffer::<OperatorBatch>::default();
        buffers.pending_mut().reset(1);
        Self {
            buffers,
            next_batch: 2,
            results: Vec::new(),
            results_batch: None,
        }
    }

    // ========================================================================
    // 写入（作用于 pending 缓冲）
    // ========================================================================

    pub fn push_position(&mut self, joint: usize, kind: OperatorKind, value: Vec3) {
        self.buffers.pending_mut().ops.push(Operation::Edit {
            joint,
            kind,
            value: OperatorValue::Position(value),
        });
    }

    pub fn push_orientation(&mut self, joint: usize, kind: OperatorKind, value: Quat) {
        self.buffers.pending_mut().ops.push(Operation::Edit {
            joint,
            kind,
            value: OperatorValue::Orientation(value.normalize()),
        });
    }

    pub fn push_store_relative(&mut self, joint: usize) -> StoreHandle {
        self.push_store(joint, StoreSpace::Relative)
    }

    pub fn push_store_absolute(&mut self, joint: usize) -> StoreHandle {
        self.push_store(joint, StoreSpace::Absolute)
    }

    pub fn push_store_world(&mut self, joint: usize) -> StoreHandle {
        self.push_store(joint, StoreSpace::World)
    }

    pub fn push_store(&mut self, joint: usize, space: StoreSpace) -> StoreHandle {
        let batch = self.buffers.pending_mut();
        let slot = batch.store_count;
        batch.store_count += 1;
        batch.ops.push(Operation::Store { joint, space, slot });
        StoreHandle { batch: batch.id, slot }
    }

    /// 在操作序列的这个位置强制完整重算绝对姿态
    pub fn push_compute_absolute(&mut self) {
        self.buffers.pending_mut().ops.push(Operation::ComputeAbsolute);
    }

    /// 清空待执行的操作；已发出的句柄随之失效
    pub fn clear(&mut self) {
        let id = self.take_batch_id();
        self.buffers.pending_mut().reset(id);
    }

    /// 待执行的操作数
    pub fn pending_len(&self) -> usize {
        self.buffers.pending().ops.len()
    }

    /// 读回结果：只有消费该句柄的那次 Execute 之后、下一次 Execute 之前有效
    pub fn stored(&self, handle: StoreHandle) -> Option<JointTransform> {
        if self.results_batch != Some(handle.batch) {
            return None;
        }
        self.results.get(handle.slot).copied().flatten()
    }

    fn take_batch_id(&mut self) -> u64 {
        let id = self.next_batch;
        self.next_batch += 1;
        id
    }

    // ========================================================================
    // 执行
    // ========================================================================

    fn apply_edit(
        hierarchy: &JointHierarchy,
        pose: &mut PoseBuffer,
        location: &JointTransform,
        joint: usize,
        kind: OperatorKind,
        value: OperatorValue,
    ) {
        // 父关节本帧可能已被修改，先刷新
        pose.compute_joint_absolute(hierarchy, joint);

        match kind {
            OperatorKind::OverrideRelative | OperatorKind::AdditiveRelative => {
                let Some(mut rel) = pose.relative(joint).copied() else {
                    return;
                };
                let additive = kind == OperatorKind::AdditiveRelative;
                Self::write_field(&mut rel, value, additive);
                pose.set_joint_relative_transform(hierarchy, joint, rel);
            }
            OperatorKind::OverrideAbsolute | OperatorKind::AdditiveAbsolute | OperatorKind::OverrideWorld => {
                let Some(mut abs) = pose.absolute(joint).copied() else {
                    return;
                };
                let value = if kind == OperatorKind::OverrideWorld {
                    let to_local = location.inverse();
                    match value {
                        OperatorValue::Position(p) => OperatorValue::Position(to_local.transform_point(p)),
                        OperatorValue::Orientation(q) => OperatorValue::Orientation(to_local.rotation * q),
                    }
                } else {
                    value
                };
                let additive = kind == OperatorKind::AdditiveAbsolute;
                Self::write_field(&mut abs, value, additive);
                pose.set_joint_absolute_transform(hierarchy, joint, abs);
            }
        }
    }

    fn write_field(target: &mut JointTransform, value: OperatorValue, additive: bool) {
        match (value, additive) {
            (OperatorValue::Position(p), false) => target.translation = p,
            (OperatorValue::Position(p), true) => target.translation += p,
            (OperatorValue::Orientation(q), false) => target.rotation = q,
            (OperatorValue::Orientation(q), true) => target.rotation = (q * target.rotation).normalize(),
        }
    }
}

impl PoseModifier for OperatorQueue {
    fn prepare(&mut self, _params: &PoseModifierParams<'_>) -> bool {
        self.buffers.swap();
        let id = self.take_batch_id();
        self.buffers.pending_mut().reset(id);
        !self.buffers.active().ops.is_empty()
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let batch = self.buffers.active();
        // 上一次的读回结果到此失效
        self.results.clear();
        self.results_batch = None;
        if batch.ops.is_empty() {
            return false;
        }

        self.results.resize(batch.store_count, None);
        self.results_batch = Some(batch.id);

        let hierarchy = params.hierarchy;
        let joint_count = params.pose.joint_count();
        for op in &batch.ops {
            match *op {
                Operation::Edit { joint, kind, value } => {
                    if joint >= joint_count {
                        continue;
                    }
                    Self::apply_edit(hierarchy, params.pose, &params.location, joint, kind, value);
                }
                Operation::Store { joint, space, slot } => {
                    let stored = match space {
                        StoreSpace::Relative => params.pose.relative(joint).copied(),
                        StoreSpace::Absolute => params.pose.absolute(joint).copied(),
                        StoreSpace::World => params.pose.absolute(joint).map(|abs| params.location * *abs),
                    };
                    if let Some(result) = self.results.get_mut(slot) {
                        *result = stored;
                    }
                }
                Operation::ComputeAbsolute => {
                    params.pose.compute_absolute_pose(hierarchy, 0);
                }
            }
        }
        true
    }

    fn synchronize(&mut self) {
        self.buffers.active_mut().ops.clear();
    }
}
