//! 两骨骼解析 IK（根、铰链、末端）

use glam::{Quat, Vec3};

use super::{chain_valid, recompose_chain, recompose_limb_children, rotate_absolute};
use crate::config::get_config;
use crate::math::rotation_vector_to_vector;
use crate::pose::PoseBuffer;
use crate::skeleton::JointHierarchy;

/// 计算铰链与根的旋转（都在角色空间，左乘到绝对朝向上）
///
/// `p0/p1/p2` 是根、铰链、末端的位置。铰链旋转让 `|p0 → 末端|` 等于 `|p0 → target|`，
/// 根旋转再把末端方向转向目标。
pub fn compute_two_bone_rotations(p0: Vec3, p1: Vec3, p2: Vec3, target: Vec3) -> (Quat, Quat) {
    let a = p1 - p0;
    let b = p2 - p1;
    let la = a.length();
    let lb = b.length();
    let reach = (target - p0).length();

    // 余弦定理
    let cos_original = (a.dot(b) / (la * lb)).clamp(-1.0, 1.0);
    let d = reach.clamp((la - lb).abs(), la + lb);
    let cos_target = ((d * d - la * la - lb * lb) / (2.0 * la * lb)).clamp(-1.0, 1.0);
    let cos_delta = (cos_original * cos_target
        + ((1.0 - cos_original * cos_original) * (1.0 - cos_target * cos_target)).max(0.0).sqrt())
    .clamp(-1.0, 1.0);

    let n = a.cross(b);
    let axis = if n.length_squared() > 1.0e-12 {
        n.normalize()
    } else {
        a.normalize().any_orthonormal_vector()
    };
    // 绕 a×b 正向旋转会增大弯曲
    let sign = if cos_target < cos_original { 1.0 } else { -1.0 };
    let w = ((1.0 + cos_delta) * 0.5).sqrt();
    let s = ((1.0 - cos_delta) * 0.5).sqrt() * sign;
    let hinge = Quat::from_xyzw(axis.x * s, axis.y * s, axis.z * s, w).normalize();

    let end = p1 + hinge * b;
    let from = end - p0;
    let to = target - p0;
    let root = if from.length_squared() > 1.0e-10 && to.length_squared() > 1.0e-10 {
        rotation_vector_to_vector(from.normalize(), to.normalize())
    } else {
        Quat::IDENTITY
    };
    (hinge, root)
}

/// 两骨骼 IK
///
/// 目标超出臂长时先按比例拉伸两段骨骼（不超过配置上限），避免完全伸直时的跳变。
pub fn solve_two_bone(
    hierarchy: &JointHierarchy,
    pose: &mut PoseBuffer,
    chain: &[usize],
    limb_children: &[usize],
    target: Vec3,
) -> bool {
    let &[root, mid, end] = chain else {
        return false;
    };
    if !chain_valid(hierarchy, pose, chain) || !target.is_finite() {
        return false;
    }

    let config = get_config();
    let eps = config.degenerate_epsilon_sq;

    let abs = pose.absolute_pose();
    let p0 = abs[root].translation;
    let mut p1 = abs[mid].translation;
    let mut p2 = abs[end].translation;

    if (p2 - target).length_squared() < eps {
        return false;
    }
    let la_sq = (p1 - p0).length_squared();
    let lb_sq = (p2 - p1).length_squared();
    let reach_sq = (target - p0).length_squared();
    if la_sq < eps || lb_sq < eps || reach_sq < eps {
        return false;
    }

    // 软性过伸
    let max_length = la_sq.sqrt() + lb_sq.sqrt();
    let reach = reach_sq.sqrt();
    if reach > max_length {
        let scale = (reach / max_length).min(config.two_bone_max_stretch);
        let rel = pose.relative_pose_mut();
        rel[mid].translation *= scale;
        rel[end].translation *= scale;
        recompose_chain(hierarchy, pose, chain, 1);
        p1 = pose.absolute_pose()[mid].translation;
        p2 = pose.absolute_pose()[end].translation;
    }

    let (hinge, root_rotation) = compute_two_bone_rotations(p0, p1, p2, target);

    rotate_absolute(hierarchy, pose, mid, hinge);
    rotate_absolute(hierarchy, pose, root, root_rotation);
    recompose_chain(hierarchy, pose, chain, 1);
    recompose_limb_children(hierarchy, pose, limb_children);

    if config.debug_log {
        let error = (pose.absolute_pose()[end].translation - target).length();
        log::debug!("[TwoBoneIk] chain {:?} error {:.5}", chain, error);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ik::tests::{assert_invariant, bent_chain};

    fn solve(target: Vec3) -> (JointHierarchy, PoseBuffer, bool) {
        let h = bent_chain(3, 30.0);
        let mut pose = PoseBuffer::from_default(&h);
        let children = h.limb_children(0, &[0, 1, 2]);
        let solved = solve_two_bone(&h, &mut pose, &[0, 1, 2], &children, target);
        (h, pose, solved)
    }

    #[test]
    fn test_reachable_target() {
        let target = Vec3::new(1.9, 0.0, 0.0);
        let (h, pose, solved) = solve(target);
        assert!(solved);
        assert!((pose.absolute(2).unwrap().translation - target).length() < 1e-3);
        assert_invariant(&h, &pose);
    }

    #[test]
    fn test_reachable_off_axis() {
        let target = Vec3::new(0.3, 1.2, 0.5);
        let (h, pose, solved) = solve(target);
        assert!(solved);
        assert!((pose.absolute(2).unwrap().translation - target).length() < 1e-3);
        assert_invariant(&h, &pose);
    }

    #[test]
    fn test_unreachable_soft_stretch() {
        let (h, pose, solved) = solve(Vec3::new(3.0, 0.0, 0.0));
        assert!(solved);
        let end = pose.absolute(2).unwrap().translation;
        assert!(end.is_finite());
        // 拉伸到 1.25 倍，末端停在 2.5
        assert!((end - Vec3::new(2.5, 0.0, 0.0)).length() < 1e-3);
        assert!(end.x <= 2.5 + 1e-3);
        assert_invariant(&h, &pose);
    }

    #[test]
    fn test_idempotent() {
        let target = Vec3::new(1.2, 0.8, -0.3);
        let (h, mut pose, _) = solve(target);
        let once = pose.clone();
        let children = h.limb_children(0, &[0, 1, 2]);
        solve_two_bone(&h, &mut pose, &[0, 1, 2], &children, target);
        for (a, b) in once.absolute_pose().iter().zip(pose.absolute_pose()) {
            assert!((a.translation - b.translation).length() < 1e-4);
            assert!(a.rotation.dot(b.rotation).abs() > 1.0 - 1e-5);
        }
    }

    #[test]
    fn test_target_at_end_is_noop() {
        let h = bent_chain(3, 30.0);
        let mut pose = PoseBuffer::from_default(&h);
        let before = pose.clone();
        let end = pose.absolute(2).unwrap().translation;
        assert!(!solve_two_bone(&h, &mut pose, &[0, 1, 2], &[3], end));
        assert_eq!(pose.absolute_pose(), before.absolute_pose());
        assert_eq!(pose.relative_pose(), before.relative_pose());
    }

    #[test]
    fn test_malformed_chain() {
        let h = bent_chain(3, 30.0);
        let mut pose = PoseBuffer::from_default(&h);
        assert!(!solve_two_bone(&h, &mut pose, &[0, 1], &[], Vec3::X));
        assert!(!solve_two_bone(&h, &mut pose, &[0, 1, 42], &[], Vec3::X));
    }

    #[test]
    fn test_limb_children_follow() {
        let target = Vec3::new(0.5, 1.5, 0.0);
        let (h, pose, _) = solve(target);
        let extra = h.joint_index("extra").unwrap();
        let expected = *pose.absolute(1).unwrap() * *pose.relative(extra).unwrap();
        assert!((pose.absolute(extra).unwrap().translation - expected.translation).length() < 1e-5);
    }
}
