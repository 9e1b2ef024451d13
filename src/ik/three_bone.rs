//! 三骨骼解析 IK（根、两个铰链、末端）
//!
//! 两个铰链的弯曲角在各自的收拢/张开限制之间同步插值，参数 t ∈ [-1, 1]
//! （-1 完全收拢，1 完全张开）。用平面模型计算末端距离，二分搜索 t 使距离匹配目标。
//!
//! 两个铰链绕同一根轴（第一铰链所在平面的法线）旋转。第二铰链的弯曲方向
//! 取链当前的方向：同向弯曲或 Z 字形（如动物后腿）。Z 字形够不到的近距离目标
//! 才改为同向弯曲。

use glam::{Quat, Vec3};

use super::{chain_valid, recompose_chain, recompose_limb_children, rotate_absolute};
use crate::config::get_config;
use crate::math::rotation_vector_to_vector;
use crate::pose::PoseBuffer;
use crate::skeleton::{JointHierarchy, ThreeBoneLimits};

/// 平面模型下根到末端距离的平方
///
/// `bend2` 带符号：与 `bend1` 同号表示同向弯曲，异号表示 Z 字形。
fn planar_distance_sq(la: f32, lb: f32, lc: f32, bend1: f32, bend2: f32) -> f32 {
    let x = la + lb * bend1.cos() + lc * (bend1 + bend2).cos();
    let y = lb * bend1.sin() + lc * (bend1 + bend2).sin();
    x * x + y * y
}

struct BendRange {
    close1: f32,
    open1: f32,
    close2: f32,
    open2: f32,
}

impl BendRange {
    fn new(limits: &ThreeBoneLimits) -> Self {
        let angle = |c: f32| c.clamp(-1.0, 1.0).acos();
        Self {
            close1: angle(limits.hinge1_close),
            open1: angle(limits.hinge1_open),
            close2: angle(limits.hinge2_close),
            open2: angle(limits.hinge2_open),
        }
    }

    fn at(&self, t: f32) -> (f32, f32) {
        let u = (t + 1.0) * 0.5;
        (
            self.close1 + (self.open1 - self.close1) * u,
            self.close2 + (self.open2 - self.close2) * u,
        )
    }
}

/// 二分搜索弯曲参数，返回（t, 距离平方的残差）
///
/// `sign` 为第二铰链相对第一铰链的弯曲方向（±1）。距离随 t 单调，方向不限。
fn search_bend(
    (la, lb, lc): (f32, f32, f32),
    distance_sq: f32,
    range: &BendRange,
    sign: f32,
    iterations: u32,
    tolerance_sq: f32,
) -> (f32, f32) {
    let eval = |t: f32| {
        let (b1, b2) = range.at(t);
        planar_distance_sq(la, lb, lc, b1, sign * b2)
    };

    let (close, open) = (eval(-1.0), eval(1.0));
    // lo 端距离较小，hi 端距离较大
    let (mut lo, mut hi, near, far) = if close <= open {
        (-1.0f32, 1.0f32, close, open)
    } else {
        (1.0f32, -1.0f32, open, close)
    };
    if distance_sq <= near {
        return (lo, near - distance_sq);
    }
    if distance_sq >= far {
        return (hi, distance_sq - far);
    }

    let mut t = 0.0;
    let mut residual = 0.0;
    for _ in 0..iterations {
        t = (lo + hi) * 0.5;
        let current = eval(t);
        residual = (current - distance_sq).abs();
        if residual < tolerance_sq {
            break;
        }
        if current < distance_sq {
            lo = t;
        } else {
            hi = t;
        }
    }
    (t, residual)
}

/// 三骨骼 IK
///
/// 末段视为刚性；目标超出总长时只拉伸末段。
pub fn solve_three_bone(
    hierarchy: &JointHierarchy,
    pose: &mut PoseBuffer,
    chain: &[usize],
    limb_children: &[usize],
    target: Vec3,
    limits: &ThreeBoneLimits,
) -> bool {
    let &[root, hinge1, hinge2, end] = chain else {
        return false;
    };
    if !chain_valid(hierarchy, pose, chain) || !target.is_finite() {
        return false;
    }

    let config = get_config();
    let eps = config.degenerate_epsilon_sq;

    let positions = |pose: &PoseBuffer| {
        let abs = pose.absolute_pose();
        [
            abs[root].translation,
            abs[hinge1].translation,
            abs[hinge2].translation,
            abs[end].translation,
        ]
    };

    let [p0, p1, p2, p3] = positions(pose);
    if (p3 - target).length_squared() < eps {
        return false;
    }
    let (a, b, c) = (p1 - p0, p2 - p1, p3 - p2);
    let distance_sq = (target - p0).length_squared();
    if a.length_squared() < eps || b.length_squared() < eps || c.length_squared() < eps || distance_sq < eps {
        return false;
    }

    let la = a.length();
    let lb = b.length();
    let mut lc = c.length();
    let distance = distance_sq.sqrt();

    // 末段拉伸
    if distance > la + lb + lc {
        let scale = ((distance - la - lb) / lc).clamp(1.0, config.three_bone_max_stretch);
        pose.relative_pose_mut()[end].translation *= scale;
        recompose_chain(hierarchy, pose, chain, 3);
        lc *= scale;
    }

    // 铰链轴：第一铰链平面的法线；a、b 共线时取第二铰链的平面
    let axis1 = [a.cross(b), b.cross(c)]
        .into_iter()
        .find(|n| n.length_squared() > 1.0e-12)
        .map(Vec3::normalize)
        .unwrap_or_else(|| a.normalize().any_orthonormal_vector());
    let current_sign = if axis1.dot(b.cross(c)) < -1.0e-6 { -1.0 } else { 1.0 };

    let range = BendRange::new(limits);
    let lengths = (la, lb, lc);
    let iterations = config.three_bone_search_iterations;
    let tolerance_sq = config.three_bone_tolerance_sq;
    let (mut t, residual) = search_bend(lengths, distance_sq, &range, current_sign, iterations, tolerance_sq);
    let mut sign = current_sign;
    if residual >= tolerance_sq {
        let (flipped_t, flipped_residual) = search_bend(lengths, distance_sq, &range, -current_sign, iterations, tolerance_sq);
        if flipped_residual < residual {
            t = flipped_t;
            sign = -current_sign;
        }
    }
    let (bend1, bend2) = range.at(t);

    // 第一铰链：绕公共轴转到目标弯曲角
    let [_, p1, p2, _] = positions(pose);
    let (a, b) = (p1 - p0, p2 - p1);
    let current1 = a.cross(b).dot(axis1).atan2(a.dot(b));
    rotate_absolute(hierarchy, pose, hinge1, Quat::from_axis_angle(axis1, bend1 - current1));
    recompose_chain(hierarchy, pose, chain, 2);

    // 第二铰链：末段方向 = 第二段绕公共轴再转带符号的弯曲角
    let [_, p1, p2, p3] = positions(pose);
    let (b, c) = (p2 - p1, p3 - p2);
    let desired = Quat::from_axis_angle(axis1, sign * bend2) * b.normalize();
    rotate_absolute(hierarchy, pose, hinge2, rotation_vector_to_vector(c.normalize(), desired));
    recompose_chain(hierarchy, pose, chain, 3);

    // 根部对准目标
    let [_, _, _, p3] = positions(pose);
    let from = p3 - p0;
    if from.length_squared() > eps {
        let root_rotation = rotation_vector_to_vector(from.normalize(), (target - p0) / distance);
        rotate_absolute(hierarchy, pose, root, root_rotation);
    }
    recompose_chain(hierarchy, pose, chain, 1);
    recompose_limb_children(hierarchy, pose, limb_children);

    if config.debug_log {
        let error = (pose.absolute_pose()[end].translation - target).length();
        log::debug!("[ThreeBoneIk] chain {:?} t {:.3} sign {} error {:.5}", chain, t, sign, error);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ik::tests::{assert_invariant, bent_chain};
    use crate::skeleton::{JointHierarchyBuilder, JointTransform};

    fn solve(target: Vec3) -> (JointHierarchy, PoseBuffer, bool) {
        let h = bent_chain(4, 20.0);
        let mut pose = PoseBuffer::from_default(&h);
        let chain = [0, 1, 2, 3];
        let children = h.limb_children(0, &chain);
        let solved = solve_three_bone(&h, &mut pose, &chain, &children, target, &ThreeBoneLimits::default());
        (h, pose, solved)
    }

    /// 第一铰链向 +Z 弯、第二铰链向 -Z 弯的 Z 字形链
    fn zigzag_chain() -> JointHierarchy {
        let mut b = JointHierarchyBuilder::new();
        b.add_joint("j0", None, JointTransform::IDENTITY).unwrap();
        b.add_joint("j1", Some("j0"), JointTransform::new(Quat::from_rotation_z(0.5), Vec3::X))
            .unwrap();
        b.add_joint("j2", Some("j1"), JointTransform::new(Quat::from_rotation_z(-0.5), Vec3::X))
            .unwrap();
        b.add_joint("j3", Some("j2"), JointTransform::from_translation(Vec3::X)).unwrap();
        b.build().unwrap()
    }

    #[test]
    fn test_search_bounds() {
        let range = BendRange::new(&ThreeBoneLimits::default());
        // 120° 收拢时三段首尾相接回到原点
        let (b1, b2) = range.at(-1.0);
        assert!(planar_distance_sq(1.0, 1.0, 1.0, b1, b2) < 1e-4);
        let (t, residual) = search_bend((1.0, 1.0, 1.0), 100.0, &range, 1.0, 30, 0.01);
        assert_eq!(t, 1.0);
        assert!(residual > 90.0);

        // Z 字形：距离平方 = 5 + 4cos θ，收拢时最近为 √3
        let (t, residual) = search_bend((1.0, 1.0, 1.0), 1.0, &range, -1.0, 30, 0.01);
        assert_eq!(t, -1.0);
        assert!((residual - 2.0).abs() < 1e-3);
        let (_, residual) = search_bend((1.0, 1.0, 1.0), 4.0, &range, -1.0, 30, 0.01);
        assert!(residual < 0.01);
    }

    #[test]
    fn test_zigzag_chain_keeps_shape() {
        crate::ik::tests::init_logger();
        let h = zigzag_chain();
        let chain = [0, 1, 2, 3];
        for target in [Vec3::new(1.2, 1.6, 0.0), Vec3::new(2.0, 0.5, 0.0), Vec3::new(0.5, -2.0, 0.3)] {
            let mut pose = PoseBuffer::from_default(&h);
            assert!(solve_three_bone(&h, &mut pose, &chain, &[], target, &ThreeBoneLimits::default()));
            let abs = pose.absolute_pose();
            assert!((abs[3].translation - target).length() < 5e-3, "target {:?} end {:?}", target, abs[3].translation);

            // 两个铰链仍然反向弯曲
            let a = abs[1].translation - abs[0].translation;
            let b = abs[2].translation - abs[1].translation;
            let c = abs[3].translation - abs[2].translation;
            assert!(a.cross(b).dot(b.cross(c)) < 0.0, "target {:?}", target);
            assert_invariant(&h, &pose);
        }
    }

    #[test]
    fn test_zigzag_chain_near_target_folds() {
        // Z 字形最近只能收拢到 √3，更近的目标改为同向弯曲
        let h = zigzag_chain();
        let chain = [0, 1, 2, 3];
        let target = Vec3::new(1.0, 0.0, 0.0);
        let mut pose = PoseBuffer::from_default(&h);
        assert!(solve_three_bone(&h, &mut pose, &chain, &[], target, &ThreeBoneLimits::default()));
        let abs = pose.absolute_pose();
        assert!((abs[3].translation - target).length() < 1e-2, "end {:?}", abs[3].translation);
        for i in 0..3 {
            let len = (abs[i + 1].translation - abs[i].translation).length();
            assert!((len - 1.0).abs() < 1e-4);
        }
        assert_invariant(&h, &pose);
    }

    #[test]
    fn test_reachable_targets() {
        for target in [Vec3::new(1.2, 1.6, 0.0), Vec3::new(2.0, 0.0, 0.0), Vec3::new(0.0, 0.0, 2.5)] {
            let (h, pose, solved) = solve(target);
            assert!(solved);
            let end = pose.absolute(3).unwrap().translation;
            assert!((end - target).length() < 5e-3, "target {:?} end {:?}", target, end);
            assert_invariant(&h, &pose);
        }
    }

    #[test]
    fn test_segment_lengths_preserved() {
        let (_, pose, _) = solve(Vec3::new(1.2, 1.6, 0.0));
        let abs = pose.absolute_pose();
        for i in 0..3 {
            let len = (abs[i + 1].translation - abs[i].translation).length();
            assert!((len - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_last_segment_stretch() {
        let target = Vec3::new(3.5, 0.0, 0.0);
        let (h, pose, solved) = solve(target);
        assert!(solved);
        let abs = pose.absolute_pose();
        let last = (abs[3].translation - abs[2].translation).length();
        assert!((last - 1.5).abs() < 1e-3);
        assert!((abs[3].translation - target).length() < 0.02);
        assert_invariant(&h, &pose);
    }

    #[test]
    fn test_degenerate_noop() {
        let h = bent_chain(4, 20.0);
        let mut pose = PoseBuffer::from_default(&h);
        let before = pose.clone();
        let chain = [0, 1, 2, 3];
        // 目标在根上
        assert!(!solve_three_bone(&h, &mut pose, &chain, &[], Vec3::ZERO, &ThreeBoneLimits::default()));
        assert_eq!(pose.absolute_pose(), before.absolute_pose());
        assert!(!solve_three_bone(&h, &mut pose, &chain[..3], &[], Vec3::X, &ThreeBoneLimits::default()));
    }
}
