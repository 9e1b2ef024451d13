//! 方向混合修改器（瞄准 / 注视）
//!
//! 每帧：
//! - 目标点转到角色空间，判定最小距离与视野
//! - 推进淡入淡出状态
//! - 对当前层上每个瞄准片段求极坐标并平滑，在网格上采样 4 个邻近节点
//! - 样本姿态按权重混合进相对姿态，再从起始关节重新组合绝对姿态

use std::f32::consts::{FRAC_PI_2, PI};

use glam::{Quat, Vec2, Vec3};

use super::clip::AimClip;
use super::smoothing::PolarSmoothingPool;
use crate::config::get_config;
use crate::math::{nlerp, polar_coordinates, smooth_cd};
use crate::modifier::{DoubleBuffer, PoseModifier, PoseModifierParams, SetupWarning};
use crate::pose::PoseBuffer;
use crate::skeleton::{DirectionalBlend, DirectionalSetup, JointHierarchy};

/// 两种实例共用一套实现，只是绑定不同
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DirectionalKind {
    Aim,
    Look,
}

impl DirectionalKind {
    fn tag(self) -> &'static str {
        match self {
            Self::Aim => "PoseBlenderAim",
            Self::Look => "PoseBlenderLook",
        }
    }

    fn setup(self, hierarchy: &JointHierarchy) -> Option<&DirectionalSetup> {
        match self {
            Self::Aim => hierarchy.aim_setup(),
            Self::Look => hierarchy.look_setup(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BlendState {
    #[default]
    Idle,
    FadingIn,
    Active,
    FadingOut,
}

/// 外部设置的参数（在 Prepare 中采纳）
#[derive(Clone, Debug)]
struct DirectionalInputs {
    enabled: bool,
    /// 世界空间目标点
    target: Vec3,
    layer: u32,
    /// 视野半角（弧度）
    fadeout_angle: f32,
    /// 淡出时间（秒）
    fade_out_time: f32,
    /// 淡入时间（秒）
    fade_in_time: f32,
    min_distance: f32,
    smooth_time: f32,
    max_radians_per_second: f32,
    polar_offset: Vec2,
}

impl Default for DirectionalInputs {
    fn default() -> Self {
        Self {
            enabled: false,
            target: Vec3::ZERO,
            layer: 0,
            fadeout_angle: PI,
            fade_out_time: 0.6,
            fade_in_time: 0.6,
            min_distance: 0.0,
            smooth_time: 0.1,
            max_radians_per_second: 2.0 * PI,
            polar_offset: Vec2::ZERO,
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
struct DirectionalOutput {
    blend: f32,
    blend_weight: f32,
    state: BlendState,
    polar: Vec2,
}

/// 本帧要混合的一个片段
struct ClipEvaluation<'a> {
    clip_id: u32,
    clip: &'a AimClip,
    blend: &'a DirectionalBlend,
    weight: f32,
    polar: Vec2,
}

pub struct DirectionalBlender {
    kind: DirectionalKind,
    inputs: DoubleBuffer<DirectionalInputs>,
    ready: bool,

    blend_weight: f32,
    state: BlendState,
    fov_fade: f32,
    fov_rate: f32,
    too_close: bool,
    pool: PolarSmoothingPool,
    samples: Vec<(usize, f32)>,

    staged: DirectionalOutput,
    output: DirectionalOutput,
    warning: SetupWarning,
}

impl DirectionalBlender {
    pub fn new(kind: DirectionalKind) -> Self {
        Self {
            kind,
            inputs: DoubleBuffer::default(),
            ready: false,
            blend_weight: 0.0,
            state: BlendState::Idle,
            fov_fade: 1.0,
            fov_rate: 0.0,
            too_close: false,
            pool: PolarSmoothingPool::default(),
            samples: Vec::with_capacity(16),
            staged: DirectionalOutput::default(),
            output: DirectionalOutput::default(),
            warning: SetupWarning::default(),
        }
    }

    pub fn kind(&self) -> DirectionalKind {
        self.kind
    }

    /// 立即回到空闲状态并丢弃平滑历史
    pub fn reset(&mut self) {
        self.blend_weight = 0.0;
        self.state = BlendState::Idle;
        self.fov_fade = 1.0;
        self.fov_rate = 0.0;
        self.too_close = false;
        self.pool.clear();
        self.staged = DirectionalOutput::default();
        self.output = DirectionalOutput::default();
    }

    // ========================================================================
    // 输入
    // ========================================================================

    pub fn set_state(&mut self, enabled: bool) {
        self.inputs.pending_mut().enabled = enabled;
    }

    /// 世界空间目标点
    pub fn set_target(&mut self, target: Vec3) {
        self.inputs.pending_mut().target = target;
    }

    pub fn set_layer(&mut self, layer: u32) {
        self.inputs.pending_mut().layer = layer;
    }

    /// 视野半角（弧度），目标超出后平滑淡出
    pub fn set_fadeout_angle(&mut self, radians: f32) {
        self.inputs.pending_mut().fadeout_angle = radians.max(0.0);
    }

    /// 淡出时间（秒）
    pub fn set_fade_out_speed(&mut self, seconds: f32) {
        self.inputs.pending_mut().fade_out_time = seconds.max(0.0);
    }

    /// 淡入时间（秒）
    pub fn set_fade_in_speed(&mut self, seconds: f32) {
        self.inputs.pending_mut().fade_in_time = seconds.max(0.0);
    }

    /// 目标比这个距离更近时立即淡出
    pub fn set_fade_out_min_distance(&mut self, distance: f32) {
        self.inputs.pending_mut().min_distance = distance.max(0.0);
    }

    pub fn set_polar_coordinates_smooth_time_seconds(&mut self, seconds: f32) {
        self.inputs.pending_mut().smooth_time = seconds.max(0.0);
    }

    pub fn set_polar_coordinates_max_radians_per_second(&mut self, radians: f32) {
        self.inputs.pending_mut().max_radians_per_second = radians;
    }

    pub fn set_polar_coordinates_offset(&mut self, offset: Vec2) {
        self.inputs.pending_mut().polar_offset = offset;
    }

    // ========================================================================
    // 输出（Synchronize 之后可读）
    // ========================================================================

    /// 总影响度：淡入权重 × 视野淡出 × 片段权重和
    pub fn blend(&self) -> f32 {
        self.output.blend
    }

    pub fn blend_weight(&self) -> f32 {
        self.output.blend_weight
    }

    pub fn state(&self) -> BlendState {
        self.output.state
    }

    /// 权重最大的片段的平滑极坐标
    pub fn polar_coordinates(&self) -> Vec2 {
        self.output.polar
    }

    // ========================================================================
    // 状态推进
    // ========================================================================

    fn update_distance_gate(&mut self, distance_sq: f32, min_distance: f32, hysteresis: f32) {
        if min_distance <= 0.0 {
            self.too_close = false;
            return;
        }
        let enter = min_distance * min_distance;
        let leave = (min_distance * (1.0 + hysteresis)).powi(2);
        self.too_close = if self.too_close {
            distance_sq < leave
        } else {
            distance_sq < enter
        };
    }

    fn update_weight(&mut self, desired: bool, time_delta: f32, inputs: &DirectionalInputs) {
        if desired {
            self.blend_weight = if inputs.fade_in_time > 0.0 {
                (self.blend_weight + time_delta / inputs.fade_in_time).min(1.0)
            } else {
                1.0
            };
            self.state = if self.blend_weight >= 1.0 {
                BlendState::Active
            } else {
                BlendState::FadingIn
            };
        } else {
            self.blend_weight = if self.too_close || inputs.fade_out_time <= 0.0 {
                0.0
            } else {
                (self.blend_weight - time_delta / inputs.fade_out_time).max(0.0)
            };
            self.state = if self.blend_weight <= 0.0 {
                BlendState::Idle
            } else {
                BlendState::FadingOut
            };
        }
    }

    /// 绑定不可用：淡入状态清零，本帧输出空闲
    fn stage_unavailable(&mut self) {
        self.blend_weight = 0.0;
        self.state = BlendState::Idle;
        self.staged = DirectionalOutput::default();
    }

    fn publish_idle(&mut self) {
        self.staged = DirectionalOutput {
            blend: 0.0,
            blend_weight: self.blend_weight,
            state: self.state,
            polar: self.staged.polar,
        };
    }
}

/// 目标在身后时，偏航钉在上一帧所在的一侧，避免穿过正后方时 ±π 翻转
///
/// 只由参考关节的前/后半平面（局部 -Y）判定"身后"；左右由上一帧偏航的符号给出，
/// 上下不影响偏航的 ±π 边界，不参与判定。
fn pin_behind(yaw: f32, previous: f32) -> f32 {
    if yaw.signum() != previous.signum() && yaw.abs() > FRAC_PI_2 && previous.abs() > FRAC_PI_2 {
        previous.signum() * PI
    } else {
        yaw
    }
}

/// 把一个片段的采样结果混合进相对姿态，返回受影响的最小关节索引
fn apply_clip(
    hierarchy: &JointHierarchy,
    pose: &mut PoseBuffer,
    setup: &DirectionalSetup,
    clip: &AimClip,
    samples: &[(usize, f32)],
    weight: f32,
) -> usize {
    let mut first = usize::MAX;
    let relative = pose.relative_pose_mut();

    for (r, joint) in setup.rotations.iter().enumerate() {
        let Some(default) = hierarchy.default_relative(joint.joint) else {
            continue;
        };
        let mut reference: Option<Quat> = None;
        let mut sum = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
        for &(i, w) in samples {
            let q = clip.poses[i].rotations[r];
            let align = *reference.get_or_insert(q);
            let q = if q.dot(align) < 0.0 { -q } else { q };
            sum = sum + q * w;
        }
        if sum.length_squared() < 1.0e-12 || joint.joint >= relative.len() {
            continue;
        }
        let blended = sum.normalize();
        let current = relative[joint.joint].rotation;
        relative[joint.joint].rotation = if clip.additive {
            current * nlerp(Quat::IDENTITY, blended, weight)
        } else if joint.additive {
            current * nlerp(Quat::IDENTITY, default.rotation.conjugate() * blended, weight)
        } else {
            nlerp(current, blended, weight)
        };
        first = first.min(joint.joint);
    }

    for (p, joint) in setup.positions.iter().enumerate() {
        let Some(default) = hierarchy.default_relative(joint.joint) else {
            continue;
        };
        let (sum, total) = samples.iter().fold((Vec3::ZERO, 0.0), |(sum, total), &(i, w)| {
            (sum + clip.poses[i].positions[p] * w, total + w)
        });
        if total <= 0.0 || joint.joint >= relative.len() {
            continue;
        }
        let blended = sum / total;
        let current = relative[joint.joint].translation;
        relative[joint.joint].translation = if clip.additive {
            current + blended * weight
        } else if joint.additive {
            current + (blended - default.translation) * weight
        } else {
            current.lerp(blended, weight)
        };
        first = first.min(joint.joint);
    }

    first
}

impl PoseModifier for DirectionalBlender {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        self.inputs.latch();
        let enabled = self.inputs.active().enabled;

        let has_setup = self.kind.setup(params.hierarchy).is_some_and(|s| !s.is_empty());
        if !has_setup {
            if enabled {
                self.warning.missing(self.kind.tag(), "skeleton has no directional setup");
            }
            self.ready = false;
            self.stage_unavailable();
            return false;
        }
        self.warning.available();
        self.ready = true;
        enabled || self.blend_weight > 0.0
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        if !self.ready {
            self.stage_unavailable();
            return false;
        }
        let hierarchy = params.hierarchy;
        let Some(setup) = self.kind.setup(hierarchy).filter(|s| !s.is_empty()) else {
            self.stage_unavailable();
            return false;
        };
        let config = get_config();
        let dt = config.clamp_time_delta(params.time_delta);
        let inputs = self.inputs.active().clone();
        let target = params.location.inverse().transform_point(inputs.target);

        // 当前层上能匹配到绑定的片段
        let mut evaluations: Vec<ClipEvaluation<'_>> = Vec::new();
        let mut mismatched = false;
        if let Some(clips) = params.clips {
            for playing in params.playing {
                if playing.layer != inputs.layer || playing.weight <= 0.0 {
                    continue;
                }
                let Some(clip) = clips.get(playing.clip_id) else {
                    continue;
                };
                let Some(blend) = setup.blend_for_token(clip.token_crc32) else {
                    continue;
                };
                if !clip.matches_setup(setup) {
                    mismatched = true;
                    continue;
                }
                evaluations.push(ClipEvaluation {
                    clip_id: playing.clip_id,
                    clip,
                    blend,
                    weight: playing.weight,
                    polar: Vec2::ZERO,
                });
            }
        }
        if mismatched {
            self.warning
                .missing(self.kind.tag(), "clip joint count does not match the directional setup");
        }

        // 距离与视野用第一个片段（或第一条绑定）的关节判定
        let gate = evaluations.first().map(|e| e.blend).unwrap_or(&setup.blends[0]);
        let pose = &*params.pose;
        let (Some(origin), Some(reference)) = (pose.absolute(gate.parameter_joint), pose.absolute(gate.reference_joint)) else {
            self.stage_unavailable();
            return false;
        };
        let direction = target - origin.translation;
        self.update_distance_gate(direction.length_squared(), inputs.min_distance, config.min_distance_hysteresis);

        let forward = reference.rotation * Vec3::Y;
        let in_view = direction.length_squared() <= config.degenerate_epsilon_sq
            || forward.angle_between(direction) <= inputs.fadeout_angle;
        smooth_cd(
            &mut self.fov_fade,
            &mut self.fov_rate,
            dt,
            if in_view { 1.0 } else { 0.0 },
            config.fov_smooth_time,
        );
        self.fov_fade = self.fov_fade.clamp(0.0, 1.0);

        self.update_weight(inputs.enabled && !self.too_close, dt, &inputs);

        if self.blend_weight <= 0.0 || evaluations.is_empty() {
            self.publish_idle();
            return false;
        }

        // 先求全部极坐标，再修改姿态
        for evaluation in &mut evaluations {
            let (Some(origin), Some(reference)) = (
                pose.absolute(evaluation.blend.parameter_joint),
                pose.absolute(evaluation.blend.reference_joint),
            ) else {
                evaluation.weight = 0.0;
                continue;
            };
            let offset = target - origin.translation;
            let local = (reference.rotation * evaluation.clip.frame).conjugate() * offset;
            if local.length_squared() <= config.degenerate_epsilon_sq {
                evaluation.weight = 0.0;
                continue;
            }

            let mut polar = polar_coordinates(local) + inputs.polar_offset;
            let clip_id = evaluation.clip_id;
            let behind = (reference.rotation.conjugate() * offset).y < 0.0;
            if behind {
                if let Some(previous) = self.pool.previous(clip_id) {
                    polar.x = pin_behind(polar.x, previous.x);
                }
            }
            polar.x = polar.x.clamp(-PI, PI);
            polar.y = polar.y.clamp(-FRAC_PI_2, FRAC_PI_2);
            evaluation.polar = self
                .pool
                .smooth(clip_id, polar, dt, inputs.smooth_time, inputs.max_radians_per_second);
        }

        let fade = self.blend_weight * self.fov_fade;
        let mut first = usize::MAX;
        let mut total_weight = 0.0;
        let mut best = (0.0, Vec2::ZERO);
        for evaluation in &evaluations {
            if evaluation.weight <= 0.0 {
                continue;
            }
            evaluation.clip.sample(evaluation.polar, &mut self.samples);
            let weight = (evaluation.weight * fade).clamp(0.0, 1.0);
            let touched = apply_clip(hierarchy, params.pose, setup, evaluation.clip, &self.samples, weight);
            first = first.min(touched).min(evaluation.blend.start_joint);
            total_weight += evaluation.weight;
            if evaluation.weight > best.0 {
                best = (evaluation.weight, evaluation.polar);
            }
        }

        if first != usize::MAX {
            params.pose.compute_absolute_pose(hierarchy, first);
        }

        self.staged = DirectionalOutput {
            blend: fade * total_weight.min(1.0),
            blend_weight: self.blend_weight,
            state: self.state,
            polar: best.1,
        };
        if config.debug_log {
            log::debug!(
                "[{}] weight {:.3} fov {:.3} polar {:?}",
                self.kind.tag(),
                self.blend_weight,
                self.fov_fade,
                best.1
            );
        }
        first != usize::MAX
    }

    fn synchronize(&mut self) {
        self.output = self.staged;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aim::{AimClipTable, AimPose, PlayingClip, PolarGridBuilder};
    use crate::skeleton::{
        AimRotJointDesc, DirectionalBlendDesc, DirectionalSetupDesc, JointHierarchyBuilder, JointTransform,
    };
    use std::f32::consts::FRAC_PI_4;

    const CLIP: u32 = 11;

    fn aiming_hierarchy() -> JointHierarchy {
        let mut b = JointHierarchyBuilder::new();
        b.add_joint("root", None, JointTransform::IDENTITY).unwrap();
        b.add_joint("spine", Some("root"), JointTransform::from_translation(Vec3::Z)).unwrap();
        b.add_joint("head", Some("spine"), JointTransform::from_translation(Vec3::Z * 0.5))
            .unwrap();
        b.set_aim_setup(DirectionalSetupDesc {
            blends: vec![DirectionalBlendDesc {
                anim_token: "AimPoses".into(),
                parameter_joint: "head".into(),
                start_joint: "spine".into(),
                reference_joint: "root".into(),
            }],
            rotations: vec![AimRotJointDesc {
                joint: "spine".into(),
                primary: true,
                additive: false,
            }],
            positions: vec![],
        });
        b.build().unwrap()
    }

    /// 3×3 格子，每个样本让脊柱的 +Y 指向对应的（偏航, 俯仰）
    fn clip_table() -> AimClipTable {
        let yaws = vec![-FRAC_PI_2, 0.0, FRAC_PI_2];
        let pitches = vec![-FRAC_PI_4, 0.0, FRAC_PI_4];
        let mut poses = Vec::new();
        for &pitch in &pitches {
            for &yaw in &yaws {
                poses.push(AimPose {
                    rotations: vec![Quat::from_rotation_z(yaw) * Quat::from_rotation_x(pitch)],
                    positions: vec![],
                });
            }
        }
        let grid = PolarGridBuilder::new(yaws, pitches).build(CLIP).unwrap();
        let mut table = AimClipTable::new();
        table.insert(CLIP, AimClip::new(CLIP, "AimPoses", false, Quat::IDENTITY, poses, grid).unwrap());
        table
    }

    const PLAYING: [PlayingClip; 1] = [PlayingClip {
        clip_id: CLIP,
        layer: 0,
        weight: 1.0,
    }];

    fn tick(blender: &mut DirectionalBlender, h: &JointHierarchy, pose: &mut PoseBuffer, table: &AimClipTable) -> bool {
        pose.reset_to_default(h);
        let mut params = PoseModifierParams::new(h, pose)
            .with_time_delta(1.0 / 30.0)
            .with_clips(table, &PLAYING);
        blender.prepare(&params);
        let modified = blender.execute(&mut params);
        blender.synchronize();
        modified
    }

    fn head_target(yaw: f32, distance: f32) -> Vec3 {
        Vec3::new(-yaw.sin(), yaw.cos(), 0.0) * distance + Vec3::new(0.0, 0.0, 1.5)
    }

    #[test]
    fn test_aim_blends_grid_samples() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_fade_in_speed(0.0);
        blender.set_target(head_target(FRAC_PI_4, 10.0));

        assert!(tick(&mut blender, &h, &mut pose, &table));
        let spine = pose.absolute(1).unwrap().rotation;
        assert!(spine.dot(Quat::from_rotation_z(FRAC_PI_4)).abs() > 1.0 - 1e-4);
        assert!((blender.blend() - 1.0).abs() < 1e-5);
        assert!((blender.polar_coordinates().x - FRAC_PI_4).abs() < 1e-4);
        assert_eq!(blender.state(), BlendState::Active);
        // 绕竖直轴旋转不移动头部
        assert!((pose.absolute(2).unwrap().translation - Vec3::new(0.0, 0.0, 1.5)).length() < 1e-5);
    }

    #[test]
    fn test_character_location_applied() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_fade_in_speed(0.0);
        // 角色朝左转 90°：世界空间正前方 (0,10) 在角色空间是右侧
        let location = JointTransform::from_rotation(Quat::from_rotation_z(FRAC_PI_2));
        blender.set_target(location.transform_point(head_target(-FRAC_PI_4, 10.0)));

        let mut params = PoseModifierParams::new(&h, &mut pose)
            .with_time_delta(1.0 / 30.0)
            .with_location(location)
            .with_clips(&table, &PLAYING);
        blender.prepare(&params);
        blender.execute(&mut params);
        blender.synchronize();
        assert!((blender.polar_coordinates().x + FRAC_PI_4).abs() < 1e-4);
    }

    #[test]
    fn test_fade_in_and_out() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_fade_in_speed(0.5);
        blender.set_fade_out_speed(0.5);
        blender.set_target(head_target(0.3, 10.0));

        tick(&mut blender, &h, &mut pose, &table);
        assert_eq!(blender.state(), BlendState::FadingIn);
        let first = blender.blend_weight();
        assert!(first > 0.0 && first < 0.1);

        for _ in 0..20 {
            tick(&mut blender, &h, &mut pose, &table);
        }
        assert_eq!(blender.state(), BlendState::Active);
        assert!((blender.blend_weight() - 1.0).abs() < 1e-6);

        blender.set_state(false);
        assert!(tick(&mut blender, &h, &mut pose, &table));
        assert_eq!(blender.state(), BlendState::FadingOut);
        for _ in 0..20 {
            tick(&mut blender, &h, &mut pose, &table);
        }
        assert_eq!(blender.state(), BlendState::Idle);
        assert_eq!(blender.blend(), 0.0);
    }

    #[test]
    fn test_min_distance_hysteresis() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_fade_in_speed(0.0);
        blender.set_fade_out_min_distance(1.0);

        blender.set_target(head_target(0.0, 0.5));
        assert!(!tick(&mut blender, &h, &mut pose, &table));
        assert_eq!(blender.blend_weight(), 0.0);

        // 仍在滞回带内
        blender.set_target(head_target(0.0, 1.05));
        assert!(!tick(&mut blender, &h, &mut pose, &table));

        blender.set_target(head_target(0.0, 1.2));
        assert!(tick(&mut blender, &h, &mut pose, &table));
        assert!((blender.blend_weight() - 1.0).abs() < 1e-6);

        // 进入阈值立即淡出，不走淡出时间
        blender.set_target(head_target(0.0, 0.9));
        tick(&mut blender, &h, &mut pose, &table);
        assert_eq!(blender.state(), BlendState::Idle);
    }

    #[test]
    fn test_field_of_view_fades_smoothly() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_fade_in_speed(0.0);
        blender.set_fadeout_angle(FRAC_PI_4);
        blender.set_target(head_target(PI * 0.75, 10.0));

        tick(&mut blender, &h, &mut pose, &table);
        let first = blender.blend();
        assert!(first > 0.0 && first < 1.0);
        for _ in 0..30 {
            tick(&mut blender, &h, &mut pose, &table);
        }
        assert!(blender.blend() < 0.05);
        // 显式开关不受影响
        assert!((blender.blend_weight() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_polar_wrap_behind() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_fade_in_speed(0.0);

        // 身后偏左
        blender.set_target(Vec3::new(-1.0, -10.0, 1.5));
        tick(&mut blender, &h, &mut pose, &table);
        let left = blender.polar_coordinates().x;
        assert!(left > 3.0);

        // 越过正后方到右侧：偏航不翻到 -π
        blender.set_target(Vec3::new(1.0, -10.0, 1.5));
        tick(&mut blender, &h, &mut pose, &table);
        let pinned = blender.polar_coordinates().x;
        assert!(pinned >= left && pinned <= PI + 1e-5, "yaw {}", pinned);
    }

    #[test]
    fn test_pin_behind() {
        assert!((pin_behind(-3.0, 3.0) - PI).abs() < 1e-6);
        assert!((pin_behind(3.0, -3.0) + PI).abs() < 1e-6);
        assert!((pin_behind(-0.5, 3.0) + 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_side_target_slightly_behind() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_fade_in_speed(0.0);
        blender.set_polar_coordinates_smooth_time_seconds(0.0);
        blender.set_polar_coordinates_max_radians_per_second(0.0);
        let side = FRAC_PI_2 + 0.05f32.atan();

        // 右前方
        blender.set_target(Vec3::new(10.0, 0.5, 1.5));
        tick(&mut blender, &h, &mut pose, &table);
        assert!((blender.polar_coordinates().x - (side - PI)).abs() < 1e-3);

        // 右侧稍靠后：仍在同一侧，偏航不被钉住
        blender.set_target(Vec3::new(10.0, -0.5, 1.5));
        tick(&mut blender, &h, &mut pose, &table);
        assert!((blender.polar_coordinates().x + side).abs() < 1e-3, "yaw {}", blender.polar_coordinates().x);

        // 从身后绕到左侧：保持在右侧的 -π
        blender.set_target(Vec3::new(-10.0, -0.5, 1.5));
        tick(&mut blender, &h, &mut pose, &table);
        assert!((blender.polar_coordinates().x + PI).abs() < 1e-5, "yaw {}", blender.polar_coordinates().x);
    }

    #[test]
    fn test_output_resets_when_setup_unavailable() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_fade_in_speed(0.0);
        blender.set_target(head_target(0.3, 10.0));
        assert!(tick(&mut blender, &h, &mut pose, &table));
        assert_eq!(blender.state(), BlendState::Active);

        // 同样的关节，但没有瞄准绑定
        let mut b = JointHierarchyBuilder::new();
        b.add_joint("root", None, JointTransform::IDENTITY).unwrap();
        b.add_joint("spine", Some("root"), JointTransform::from_translation(Vec3::Z)).unwrap();
        b.add_joint("head", Some("spine"), JointTransform::from_translation(Vec3::Z * 0.5))
            .unwrap();
        let bare = b.build().unwrap();
        let mut bare_pose = PoseBuffer::from_default(&bare);
        assert!(!tick(&mut blender, &bare, &mut bare_pose, &table));
        assert_eq!(blender.blend(), 0.0);
        assert_eq!(blender.blend_weight(), 0.0);
        assert_eq!(blender.state(), BlendState::Idle);

        // 绑定恢复后重新淡入
        assert!(tick(&mut blender, &h, &mut pose, &table));
        assert_eq!(blender.state(), BlendState::Active);
    }

    #[test]
    fn test_missing_setup() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut look = DirectionalBlender::new(DirectionalKind::Look);
        look.set_state(true);
        let mut params = PoseModifierParams::new(&h, &mut pose).with_clips(&table, &PLAYING);
        assert!(!look.prepare(&params));
        assert!(!look.execute(&mut params));
    }

    #[test]
    fn test_other_layer_ignored() {
        let h = aiming_hierarchy();
        let table = clip_table();
        let mut pose = PoseBuffer::from_default(&h);
        let mut blender = DirectionalBlender::new(DirectionalKind::Aim);
        blender.set_state(true);
        blender.set_layer(3);
        blender.set_target(head_target(0.5, 10.0));
        assert!(!tick(&mut blender, &h, &mut pose, &table));
        assert_eq!(pose.absolute(1).unwrap().rotation, Quat::IDENTITY);
    }
}
