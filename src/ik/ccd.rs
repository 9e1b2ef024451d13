//! CCD（循环坐标下降）IK
//!
//! 每次迭代只旋转一个关节，把末端方向转向目标；旋转量按关节在链上的位置加权并限幅。
//! 迭代结束后把剩余误差平均分摊到链上各关节的平移，隐藏残差。

use glam::{Quat, Vec3};

use super::{chain_valid, recompose_chain, recompose_limb_children};
use crate::config::get_config;
use crate::math::{nlerp, rotation_vector_to_vector};
use crate::pose::PoseBuffer;
use crate::skeleton::{CcdParams, JointHierarchy};

/// 求解结果
#[derive(Clone, Copy, Debug)]
pub struct CcdReport {
    /// 实际消耗的迭代次数
    pub iterations: u32,
    /// 平移补偿之前的末端误差
    pub error: f32,
}

/// CCD IK（每步权重 1.0）
pub fn solve_ccd(
    hierarchy: &JointHierarchy,
    pose: &mut PoseBuffer,
    chain: &[usize],
    limb_children: &[usize],
    target: Vec3,
    params: &CcdParams,
) -> Option<CcdReport> {
    solve_ccd_weighted(hierarchy, pose, chain, limb_children, target, params, 1.0)
}

/// CCD IK，每步旋转再按 `weight` 从单位旋转插值
pub fn solve_ccd_weighted(
    hierarchy: &JointHierarchy,
    pose: &mut PoseBuffer,
    chain: &[usize],
    limb_children: &[usize],
    target: Vec3,
    params: &CcdParams,
    weight: f32,
) -> Option<CcdReport> {
    let count = chain.len();
    if count < 2 || !chain_valid(hierarchy, pose, chain) || !target.is_finite() {
        return None;
    }

    let config = get_config();
    let end = chain[count - 1];

    // 关节序号的权重基数（链长 + 1）
    let inv_links = 1.0 / (count as f32 + 1.0);
    let last_cycled = count as i32 - 3;

    let mut link = 0usize;
    let mut iterations = 0;
    let mut error = (pose.absolute_pose()[end].translation - target).length();

    for _ in 0..params.max_iterations {
        if error < params.threshold {
            break;
        }
        iterations += 1;

        let joint = chain[link];
        let joint_pos = pose.absolute_pose()[joint].translation;
        let to_end = (pose.absolute_pose()[end].translation - joint_pos).normalize_or_zero();
        let to_target = (target - joint_pos).normalize_or_zero();

        if to_end != Vec3::ZERO && to_target != Vec3::ZERO {
            let q = rotation_vector_to_vector(to_end, to_target);
            // 越靠近末端权重越大
            let joint_weight = (link as f32 + 1.0) * inv_links + config.ccd_base_weight;
            let t = (params.step_size * joint_weight).min(config.ccd_max_step);
            let q = Quat::from_xyzw(q.x * t, q.y * t, q.z * t, q.w.abs()).normalize();
            let q = nlerp(Quat::IDENTITY, q, weight);

            let parent = pose.parent_absolute_safe(hierarchy, joint);
            let abs_rotation = pose.absolute_pose()[joint].rotation;
            pose.relative_pose_mut()[joint].rotation = (parent.rotation.conjugate() * q * abs_rotation).normalize();
            recompose_chain(hierarchy, pose, chain, link);
        }

        error = (pose.absolute_pose()[end].translation - target).length();
        if error < params.threshold {
            break;
        }

        link += 1;
        if link as i32 > last_cycled {
            link = 0;
        }
    }

    // 平移补偿：剩余误差按链长平均分摊，总量不超过链长
    let slack: f32 = (1..count)
        .map(|k| (pose.absolute_pose()[chain[k]].translation - pose.absolute_pose()[chain[k - 1]].translation).length())
        .sum();
    let mut residual = target - pose.absolute_pose()[end].translation;
    let residual_len = residual.length();
    if residual_len > slack && residual_len > 0.0 {
        residual *= slack / residual_len;
    }
    let part = residual * inv_links;
    let mut offset = part;
    for &joint in chain {
        pose.absolute_pose_mut()[joint].translation += offset;
        offset += part;
        pose.compute_joint_relative(hierarchy, joint);
    }
    recompose_chain(hierarchy, pose, chain, 0);
    recompose_limb_children(hierarchy, pose, limb_children);

    if config.debug_log {
        log::debug!(
            "[CcdIk] chain {:?} iterations {} error {:.5}",
            chain,
            iterations,
            error
        );
    }

    Some(CcdReport { iterations, error })
}
