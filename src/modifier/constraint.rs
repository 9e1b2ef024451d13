//! 约束类修改器：点约束、线约束、瞄准约束、驱动扭转
//!
//! 关节名称在第一次 Prepare 时解析；解析失败则 Prepare 返回 false 并告警一次，
//! 之后每帧重试。

use glam::{Mat3, Quat, Vec3};

use super::{resolve_optional, resolve_required, scaled_weight, PointDesc, PoseModifier, PoseModifierParams, ResolvedPoint, SetupWarning};
use crate::math::{nlerp, rotation_vector_to_vector};
use crate::skeleton::JointHierarchy;

/// 解析结果缓存 + 告警状态
struct Resolved<T> {
    runtime: Option<T>,
    warning: SetupWarning,
}

impl<T> Default for Resolved<T> {
    fn default() -> Self {
        Self {
            runtime: None,
            warning: SetupWarning::default(),
        }
    }
}

impl<T> Resolved<T> {
    fn prepare(&mut self, tag: &str, resolve: impl FnOnce() -> Result<T, String>) -> bool {
        if self.runtime.is_some() {
            return true;
        }
        match resolve() {
            Ok(rt) => {
                self.runtime = Some(rt);
                self.warning.available();
                true
            }
            Err(reason) => {
                self.warning.missing(tag, &reason);
                false
            }
        }
    }
}

/// 由主轴与参考上方向构造正交帧（列 = 主轴, 上, 侧）
fn frame_from_axes(primary: Vec3, up: Vec3) -> Quat {
    let x = primary.try_normalize().unwrap_or(Vec3::X);
    let mut y = up.try_normalize().unwrap_or(Vec3::Y);
    if x.dot(y).abs() > 0.9999 {
        y = y.any_orthonormal_vector();
    }
    let z = x.cross(y).normalize();
    let y = z.cross(x).normalize();
    Quat::from_mat3(&Mat3::from_cols(x, y, z)).normalize()
}

// ============================================================================
// 点约束
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct ConstraintPointDesc {
    pub node: String,
    pub point: PointDesc,
    pub weight: f32,
    pub weight_joint: Option<String>,
}

#[derive(Clone, Copy)]
struct PointRuntime {
    node: usize,
    point: ResolvedPoint,
    weight_joint: Option<usize>,
}

/// 把关节的绝对位置拉向一个点
pub struct ConstraintPoint {
    pub desc: ConstraintPointDesc,
    resolved: Resolved<PointRuntime>,
}

impl ConstraintPoint {
    pub fn new(desc: ConstraintPointDesc) -> Self {
        Self {
            desc,
            resolved: Resolved::default(),
        }
    }
}

impl PoseModifier for ConstraintPoint {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        let desc = &self.desc;
        let h = params.hierarchy;
        self.resolved.prepare("ConstraintPoint", || {
            Ok(PointRuntime {
                node: resolve_required(h, &desc.node)?,
                point: desc.point.resolve(h)?,
                weight_joint: resolve_optional(h, &desc.weight_joint)?,
            })
        })
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(rt) = self.resolved.runtime else {
            return false;
        };
        let pose = &mut *params.pose;
        let weight = scaled_weight(pose, self.desc.weight, rt.weight_joint);
        let Some(node) = pose.absolute(rt.node).copied() else {
            return false;
        };
        let point = rt.point.evaluate(pose);
        pose.set_joint_absolute_position(params.hierarchy, rt.node, node.translation.lerp(point, weight))
    }

    fn synchronize(&mut self) {}
}

// ============================================================================
// 线约束
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct ConstraintLineDesc {
    pub node: String,
    pub start_point: PointDesc,
    pub end_point: PointDesc,
    /// 在线段上的位置（0 = 起点，1 = 终点）
    pub weight: f32,
    pub weight_joint: Option<String>,
}

#[derive(Clone, Copy)]
struct LineRuntime {
    node: usize,
    start: ResolvedPoint,
    end: ResolvedPoint,
    weight_joint: Option<usize>,
}

/// 把关节放到两点之间的线段上
pub struct ConstraintLine {
    pub desc: ConstraintLineDesc,
    resolved: Resolved<LineRuntime>,
}

impl ConstraintLine {
    pub fn new(desc: ConstraintLineDesc) -> Self {
        Self {
            desc,
            resolved: Resolved::default(),
        }
    }
}

impl PoseModifier for ConstraintLine {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        let desc = &self.desc;
        let h = params.hierarchy;
        self.resolved.prepare("ConstraintLine", || {
            Ok(LineRuntime {
                node: resolve_required(h, &desc.node)?,
                start: desc.start_point.resolve(h)?,
                end: desc.end_point.resolve(h)?,
                weight_joint: resolve_optional(h, &desc.weight_joint)?,
            })
        })
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(rt) = self.resolved.runtime else {
            return false;
        };
        let pose = &mut *params.pose;
        let weight = scaled_weight(pose, self.desc.weight, rt.weight_joint);
        let start = rt.start.evaluate(pose);
        let end = rt.end.evaluate(pose);
        pose.set_joint_absolute_position(params.hierarchy, rt.node, start.lerp(end, weight))
    }

    fn synchronize(&mut self) {}
}

// ============================================================================
// 瞄准约束
// ============================================================================

#[derive(Clone, Debug)]
pub struct ConstraintAimDesc {
    pub node: String,
    pub target: PointDesc,
    pub up: PointDesc,
    /// 关节局部空间中要对准目标的轴
    pub aim_vector: Vec3,
    /// 关节局部空间中要朝向上方参考点的轴
    pub up_vector: Vec3,
    pub weight: f32,
    pub weight_joint: Option<String>,
}

impl Default for ConstraintAimDesc {
    fn default() -> Self {
        Self {
            node: String::new(),
            target: PointDesc::default(),
            up: PointDesc::default(),
            aim_vector: Vec3::X,
            up_vector: Vec3::Y,
            weight: 1.0,
            weight_joint: None,
        }
    }
}

#[derive(Clone, Copy)]
struct AimRuntime {
    node: usize,
    target: ResolvedPoint,
    up: ResolvedPoint,
    weight_joint: Option<usize>,
    frame: Quat,
}

/// 让关节的一个轴对准目标点，另一个轴朝向上方参考点
pub struct ConstraintAim {
    pub desc: ConstraintAimDesc,
    resolved: Resolved<AimRuntime>,
}

impl ConstraintAim {
    pub fn new(desc: ConstraintAimDesc) -> Self {
        Self {
            desc,
            resolved: Resolved::default(),
        }
    }
}

impl PoseModifier for ConstraintAim {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        let desc = &self.desc;
        let h = params.hierarchy;
        self.resolved.prepare("ConstraintAim", || {
            Ok(AimRuntime {
                node: resolve_required(h, &desc.node)?,
                target: desc.target.resolve(h)?,
                up: desc.up.resolve(h)?,
                weight_joint: resolve_optional(h, &desc.weight_joint)?,
                frame: frame_from_axes(desc.aim_vector, desc.up_vector),
            })
        })
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(rt) = self.resolved.runtime else {
            return false;
        };
        let pose = &mut *params.pose;
        let Some(origin) = pose.absolute(rt.node).copied() else {
            return false;
        };
        let target = rt.target.evaluate(pose);
        let up = rt.up.evaluate(pose);

        let aim = frame_from_axes(target - origin.translation, up - origin.translation);
        let orientation = aim * rt.frame.conjugate();
        let weight = scaled_weight(pose, self.desc.weight, rt.weight_joint);
        let orientation = nlerp(origin.rotation, orientation, weight);
        pose.set_joint_absolute_orientation(params.hierarchy, rt.node, orientation)
    }

    fn synchronize(&mut self) {}
}

// ============================================================================
// 驱动扭转
// ============================================================================

#[derive(Clone, Debug)]
pub struct DrivenTwistDesc {
    pub source: String,
    pub target: String,
    /// 目标关节局部空间中跟随源关节摆动的轴
    pub target_vector: Vec3,
    pub weight: f32,
    pub weight_joint: Option<String>,
}

impl Default for DrivenTwistDesc {
    fn default() -> Self {
        Self {
            source: String::new(),
            target: String::new(),
            target_vector: Vec3::X,
            weight: 1.0,
            weight_joint: None,
        }
    }
}

#[derive(Clone, Copy)]
struct TwistRuntime {
    source: usize,
    target: usize,
    weight_joint: Option<usize>,
}

/// 目标关节跟随源关节的扭转，但指向轴保持在默认姿态方向上
pub struct DrivenTwist {
    pub desc: DrivenTwistDesc,
    resolved: Resolved<TwistRuntime>,
}

impl DrivenTwist {
    pub fn new(desc: DrivenTwistDesc) -> Self {
        Self {
            desc,
            resolved: Resolved::default(),
        }
    }

    fn compute(&self, hierarchy: &JointHierarchy, pose: &crate::pose::PoseBuffer, rt: TwistRuntime) -> Option<Quat> {
        let source_absolute = pose.absolute(rt.source)?.rotation;
        let source_default = hierarchy.default_absolute(rt.source)?.rotation;
        let target_relative_default = hierarchy.default_relative(rt.target)?.rotation;
        let target_absolute_default = hierarchy.default_absolute(rt.target)?.rotation;
        let target_parent = pose.parent_absolute_safe(hierarchy, rt.target).rotation;

        // 默认相对姿态放到当前父关节下
        let rest = target_parent * target_relative_default;
        // 目标关节随源关节整体转动
        let driven = source_absolute * (source_default.conjugate() * target_absolute_default);

        let axis = self.desc.target_vector;
        let swing = rotation_vector_to_vector((driven * axis).normalize(), (rest * axis).normalize());
        let weight = scaled_weight(pose, self.desc.weight, rt.weight_joint);
        Some(nlerp(rest, swing * driven, weight))
    }
}

impl PoseModifier for DrivenTwist {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        let desc = &self.desc;
        let h = params.hierarchy;
        self.resolved.prepare("DrivenTwist", || {
            Ok(TwistRuntime {
                source: resolve_required(h, &desc.source)?,
                target: resolve_required(h, &desc.target)?,
                weight_joint: resolve_optional(h, &desc.weight_joint)?,
            })
        })
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(rt) = self.resolved.runtime else {
            return false;
        };
        let Some(orientation) = self.compute(params.hierarchy, params.pose, rt) else {
            return false;
        };
        params
            .pose
            .set_joint_absolute_orientation(params.hierarchy, rt.target, orientation)
    }

    fn synchronize(&mut self) {}
}
