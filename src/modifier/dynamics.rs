//! 二次动力学修改器：弹簧（位置）与摆锤（朝向）
//!
//! 状态保存在世界空间，角色移动时会产生惯性。第一次执行时状态直接对齐到
//! 静止位置，不会从原点弹过来。

use bitflags::bitflags;
use glam::{Quat, Vec3};

use super::{resolve_required, PoseModifier, PoseModifierParams, SetupWarning};
use crate::config::get_config;
use crate::math::rotation_vector_to_vector;

bitflags! {
    /// 半空间限制：置位的轴要求偏移落在该轴的正（或负）侧
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct LimitPlanes: u8 {
        const X_POSITIVE = 1 << 0;
        const X_NEGATIVE = 1 << 1;
        const Y_POSITIVE = 1 << 2;
        const Y_NEGATIVE = 1 << 3;
        const Z_POSITIVE = 1 << 4;
        const Z_NEGATIVE = 1 << 5;
    }
}

impl LimitPlanes {
    /// 把偏移投影回允许的半空间内，并去掉速度上指向平面的分量
    ///
    /// `space` 是平面法线所在坐标系的旋转。
    fn apply(self, space: Quat, offset: &mut Vec3, velocity: &mut Vec3) {
        let planes = [
            (Self::X_POSITIVE, Vec3::X),
            (Self::X_NEGATIVE, Vec3::NEG_X),
            (Self::Y_POSITIVE, Vec3::Y),
            (Self::Y_NEGATIVE, Vec3::NEG_Y),
            (Self::Z_POSITIVE, Vec3::Z),
            (Self::Z_NEGATIVE, Vec3::NEG_Z),
        ];
        for (flag, axis) in planes {
            if !self.contains(flag) {
                continue;
            }
            let normal = space * axis;
            let d = normal.dot(*offset);
            if d <= 0.0 {
                *offset -= normal * d;
                *velocity -= normal * velocity.dot(normal);
            }
        }
    }
}

// ============================================================================
// 弹簧
// ============================================================================

#[derive(Clone, Debug)]
pub struct DynamicsSpringDesc {
    pub node: String,
    /// 与静止位置的最大距离，0 = 不限制
    pub length: f32,
    pub stiffness: f32,
    pub damping: f32,
    /// 世界空间重力加速度
    pub gravity: Vec3,
    /// 父关节空间中静止位置的偏移
    pub position_offset: Vec3,
    /// 在关节自身坐标系下的半空间限制
    pub limit_planes: LimitPlanes,
}

impl Default for DynamicsSpringDesc {
    fn default() -> Self {
        Self {
            node: String::new(),
            length: 0.0,
            stiffness: 100.0,
            damping: 10.0,
            gravity: Vec3::ZERO,
            position_offset: Vec3::ZERO,
            limit_planes: LimitPlanes::empty(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct SpringState {
    position: Vec3,
    velocity: Vec3,
}

/// 关节位置跟随动画结果的阻尼弹簧
pub struct DynamicsSpring {
    pub desc: DynamicsSpringDesc,
    node: Option<usize>,
    state: Option<SpringState>,
    warning: SetupWarning,
}

impl DynamicsSpring {
    pub fn new(desc: DynamicsSpringDesc) -> Self {
        Self {
            desc,
            node: None,
            state: None,
            warning: SetupWarning::default(),
        }
    }

    /// 清除速度与位置，下一次执行重新对齐到静止位置
    pub fn reset(&mut self) {
        self.state = None;
    }
}

impl PoseModifier for DynamicsSpring {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        if self.node.is_some() {
            return true;
        }
        match resolve_required(params.hierarchy, &self.desc.node) {
            Ok(node) => {
                self.node = Some(node);
                self.warning.available();
                true
            }
            Err(reason) => {
                self.warning.missing("DynamicsSpring", &reason);
                false
            }
        }
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(node) = self.node else {
            return false;
        };
        let hierarchy = params.hierarchy;
        let location = params.location;
        let pose = &mut *params.pose;
        let Some(absolute) = pose.absolute(node).copied() else {
            return false;
        };
        let dt = get_config().clamp_time_delta(params.time_delta);
        let desc = &self.desc;

        let parent = pose.parent_absolute_safe(hierarchy, node);
        let rest = location.transform_point(absolute.translation + parent.rotation * desc.position_offset);

        let state = self.state.get_or_insert(SpringState {
            position: rest,
            velocity: Vec3::ZERO,
        });

        let acceleration = desc.gravity + (rest - state.position) * desc.stiffness - state.velocity * desc.damping;
        state.velocity += acceleration * dt;
        state.position += state.velocity * dt;

        // 长度限制
        let mut offset = state.position - rest;
        if desc.length > 0.0 {
            let length = offset.length();
            if length > desc.length {
                offset *= desc.length / length;
                state.velocity *= desc.length / length;
            }
        }

        desc.limit_planes
            .apply(location.rotation * absolute.rotation, &mut offset, &mut state.velocity);
        state.position = rest + offset;

        let local = location.inverse().transform_point(state.position);
        pose.set_joint_absolute_position(hierarchy, node, local)
    }

    fn synchronize(&mut self) {}
}

// ============================================================================
// 摆锤
// ============================================================================

#[derive(Clone, Debug)]
pub struct DynamicsPendulumDesc {
    pub node: String,
    /// 关节局部空间中摆锤指向的轴
    pub aim_vector: Vec3,
    /// 摆长（最小 0.1）
    pub length: f32,
    pub stiffness: f32,
    pub damping: f32,
    /// 世界空间重力加速度
    pub gravity: Vec3,
    /// 偏离静止方向的最大角度（度）
    pub limit_angle: f32,
    /// 限制锥体相对关节的旋转（欧拉角，度）
    pub limit_rotation_angles: Vec3,
    /// 在限制坐标系下的半空间限制
    pub limit_planes: LimitPlanes,
    /// 角色移动对摆锤的影响（逐分量）
    pub force_movement_multiplier: Vec3,
}

impl Default for DynamicsPendulumDesc {
    fn default() -> Self {
        Self {
            node: String::new(),
            aim_vector: Vec3::X,
            length: 1.0,
            stiffness: 10.0,
            damping: 1.0,
            gravity: Vec3::ZERO,
            limit_angle: 45.0,
            limit_rotation_angles: Vec3::ZERO,
            limit_planes: LimitPlanes::empty(),
            force_movement_multiplier: Vec3::ONE,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct PendulumRuntime {
    node: usize,
    half_angle_cos: f32,
    limit_angle: f32,
    limit_rotation: Quat,
}

#[derive(Clone, Copy, Debug)]
struct PendulumState {
    /// 角色空间中的摆锤末端
    position: Vec3,
    /// 同一点在世界空间中的位置，用来检测角色的移动
    position_world: Vec3,
    velocity: Vec3,
}

/// 关节朝向受摆锤末端牵引
pub struct DynamicsPendulum {
    pub desc: DynamicsPendulumDesc,
    runtime: Option<PendulumRuntime>,
    state: Option<PendulumState>,
    warning: SetupWarning,
}

impl DynamicsPendulum {
    pub fn new(desc: DynamicsPendulumDesc) -> Self {
        Self {
            desc,
            runtime: None,
            state: None,
            warning: SetupWarning::default(),
        }
    }

    pub fn reset(&mut self) {
        self.state = None;
    }

    /// 方向超出锥体时拉回到锥面上
    fn apply_cone(runtime: &PendulumRuntime, limit_rotation: Quat, target_direction: Vec3, direction: &mut Vec3, velocity: &mut Vec3) {
        let limit_direction = limit_rotation.conjugate() * *direction;
        let motion_half_angle_cos = rotation_vector_to_vector(target_direction, limit_direction).w;
        if motion_half_angle_cos >= runtime.half_angle_cos {
            return;
        }
        *velocity -= target_direction * velocity.dot(target_direction).max(0.0);
        let axis = target_direction.cross(limit_direction);
        let axis = if axis.length_squared() > 1.0e-12 {
            axis.normalize()
        } else {
            target_direction.any_orthonormal_vector()
        };
        *direction = limit_rotation * (Quat::from_axis_angle(axis, runtime.limit_angle) * target_direction);
    }
}

impl PoseModifier for DynamicsPendulum {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        if self.runtime.is_some() {
            return true;
        }
        match resolve_required(params.hierarchy, &self.desc.node) {
            Ok(node) => {
                let limit_angle = self.desc.limit_angle.to_radians();
                let angles = self.desc.limit_rotation_angles;
                self.runtime = Some(PendulumRuntime {
                    node,
                    half_angle_cos: (limit_angle * 0.5).cos().abs(),
                    limit_angle,
                    limit_rotation: Quat::from_rotation_x(angles.x.to_radians())
                        * Quat::from_rotation_y(angles.y.to_radians())
                        * Quat::from_rotation_z(angles.z.to_radians()),
                });
                self.warning.available();
                true
            }
            Err(reason) => {
                self.warning.missing("DynamicsPendulum", &reason);
                false
            }
        }
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(runtime) = self.runtime else {
            return false;
        };
        let hierarchy = params.hierarchy;
        let location = params.location;
        let pose = &mut *params.pose;
        let Some(node) = pose.absolute(runtime.node).copied() else {
            return false;
        };
        let desc = &self.desc;
        let dt = get_config().clamp_time_delta(params.time_delta);

        // 限制坐标系放到角色空间：绕关节自身旋转 limit_rotation 的逆
        let limit_rotation = node.rotation * runtime.limit_rotation.conjugate() * node.rotation.conjugate();

        let length = desc.length.max(0.1);
        let aim = desc.aim_vector.try_normalize().unwrap_or(Vec3::X);
        let target_direction = node.rotation * aim;

        let state = self.state.get_or_insert_with(|| {
            let position = node.translation + target_direction * length;
            PendulumState {
                position,
                position_world: location.transform_point(position),
                velocity: Vec3::ZERO,
            }
        });

        let force_local = state.position - node.translation;
        let force_movement = location.inverse().transform_point(state.position_world) - state.position;
        let force_direction = force_local + force_movement * desc.force_movement_multiplier;

        // 刚度：把末端拉回静止方向
        let force_normalized = force_direction.normalize_or_zero();
        let move_direction = target_direction.cross(force_normalized).cross(force_direction);
        let tension = 1.0 - (target_direction.dot(force_normalized) + 1.0) * 0.5;
        state.velocity -= move_direction * (move_direction.length_squared() + f32::MIN_POSITIVE).sqrt().recip()
            * desc.stiffness
            * desc.stiffness
            * tension
            * dt;

        let mut direction = force_direction + state.velocity * dt;

        // 平面限制在关节的限制坐标系下进行
        let frame = limit_rotation * node.rotation;
        let mut frame_direction = frame.conjugate() * direction;
        let mut frame_velocity = frame.conjugate() * state.velocity;
        desc.limit_planes
            .apply(Quat::IDENTITY, &mut frame_direction, &mut frame_velocity);
        direction = (frame * frame_direction).normalize_or_zero();
        state.velocity = frame * frame_velocity;
        if direction == Vec3::ZERO {
            direction = target_direction;
        }

        Self::apply_cone(&runtime, limit_rotation, target_direction, &mut direction, &mut state.velocity);
        let rotation = rotation_vector_to_vector(target_direction, direction);
        let swung = rotation * target_direction * length;

        state.velocity = (swung - force_direction) / dt;
        state.position = node.translation + swung;
        state.position_world = location.transform_point(state.position);
        state.velocity += location.rotation.conjugate() * desc.gravity * dt;
        state.velocity *= (1.0 - desc.damping * dt).max(0.0);

        pose.set_joint_absolute_orientation(hierarchy, runtime.node, rotation * node.rotation)
    }

    fn synchronize(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::tests::branching_hierarchy;
    use crate::pose::PoseBuffer;
    use crate::skeleton::JointTransform;

    #[test]
    fn test_limit_planes_project() {
        let mut offset = Vec3::new(-1.0, 2.0, -3.0);
        let mut velocity = Vec3::new(-1.0, 0.0, 1.0);
        (LimitPlanes::X_POSITIVE | LimitPlanes::Z_NEGATIVE).apply(Quat::IDENTITY, &mut offset, &mut velocity);
        // x 被投影为 0；z 已经在负侧，不受影响
        assert!((offset - Vec3::new(0.0, 2.0, -3.0)).length() < 1e-6);
        assert!((velocity - Vec3::new(0.0, 0.0, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_spring_at_rest_stays() {
        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let mut spring = DynamicsSpring::new(DynamicsSpringDesc {
            node: "b".into(),
            ..Default::default()
        });
        for _ in 0..10 {
            pose.reset_to_default(&h);
            let mut params = PoseModifierParams::new(&h, &mut pose).with_time_delta(0.016);
            assert!(spring.prepare(&params));
            assert!(spring.execute(&mut params));
        }
        assert!((pose.absolute(3).unwrap().translation - Vec3::new(2.0, 0.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_spring_lags_behind_motion() {
        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let mut spring = DynamicsSpring::new(DynamicsSpringDesc {
            node: "b".into(),
            length: 0.5,
            ..Default::default()
        });
        let mut params = PoseModifierParams::new(&h, &mut pose).with_time_delta(0.016);
        spring.prepare(&params);
        spring.execute(&mut params);

        // 角色瞬移 +X 10：弹簧末端落后，但不超过长度限制
        pose.reset_to_default(&h);
        let location = JointTransform::from_translation(Vec3::new(10.0, 0.0, 0.0));
        let mut params = PoseModifierParams::new(&h, &mut pose)
            .with_time_delta(0.016)
            .with_location(location);
        spring.execute(&mut params);
        let b = pose.absolute(3).unwrap().translation;
        let lag = (b - Vec3::new(2.0, 0.0, 0.0)).length();
        assert!(lag > 0.1 && lag < 0.5 + 1e-4, "lag {}", lag);
        assert!(b.x < 2.0);
    }

    #[test]
    fn test_spring_gravity_with_plane() {
        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let mut spring = DynamicsSpring::new(DynamicsSpringDesc {
            node: "b".into(),
            length: 0.5,
            stiffness: 0.0,
            damping: 0.0,
            gravity: Vec3::new(0.0, -9.8, -9.8),
            limit_planes: LimitPlanes::Z_POSITIVE,
            ..Default::default()
        });
        for _ in 0..200 {
            pose.reset_to_default(&h);
            let mut params = PoseModifierParams::new(&h, &mut pose).with_time_delta(0.02);
            spring.prepare(&params);
            spring.execute(&mut params);
        }
        let b = pose.absolute(3).unwrap().translation;
        assert!(b.z.abs() < 1e-4);
        assert!((b.y + 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_pendulum_rest_is_identity() {
        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let mut pendulum = DynamicsPendulum::new(DynamicsPendulumDesc {
            node: "a".into(),
            ..Default::default()
        });
        for _ in 0..5 {
            pose.reset_to_default(&h);
            let mut params = PoseModifierParams::new(&h, &mut pose).with_time_delta(0.016);
            assert!(pendulum.prepare(&params));
            assert!(pendulum.execute(&mut params));
        }
        let q = pose.absolute(1).unwrap().rotation;
        assert!(q.dot(Quat::IDENTITY).abs() > 1.0 - 1e-5);
    }

    #[test]
    fn test_pendulum_gravity_respects_cone() {
        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let mut pendulum = DynamicsPendulum::new(DynamicsPendulumDesc {
            node: "a".into(),
            stiffness: 1.0,
            gravity: Vec3::new(0.0, -50.0, 0.0),
            limit_angle: 30.0,
            ..Default::default()
        });
        for _ in 0..120 {
            pose.reset_to_default(&h);
            let mut params = PoseModifierParams::new(&h, &mut pose).with_time_delta(0.016);
            pendulum.prepare(&params);
            pendulum.execute(&mut params);
        }
        let aim = pose.absolute(1).unwrap().rotation * Vec3::X;
        let angle = aim.dot(Vec3::X).clamp(-1.0, 1.0).acos();
        assert!(aim.y < 0.0);
        assert!(angle <= 30f32.to_radians() + 1e-3, "angle {}", angle.to_degrees());
        // 子关节跟随
        let b = pose.absolute(3).unwrap().translation;
        assert!(((b - Vec3::X).length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_unknown_node() {
        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let mut pendulum = DynamicsPendulum::new(DynamicsPendulumDesc::default());
        let mut params = PoseModifierParams::new(&h, &mut pose);
        assert!(!pendulum.prepare(&params));
        assert!(!pendulum.execute(&mut params));
    }
}
