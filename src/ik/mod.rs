//! IK 求解器
//!
//! 三种求解器都是纯函数：输入层级、姿态、链（根 → 末端）、挂在链下的其它关节
//! 和角色空间中的目标点，直接修改姿态。
//!
//! 求解失败（链不合法、几何退化）时返回 false，姿态保持调用前的状态。

mod ccd;
mod three_bone;
mod two_bone;

pub use ccd::{solve_ccd, solve_ccd_weighted, CcdReport};
pub use three_bone::solve_three_bone;
pub use two_bone::{compute_two_bone_rotations, solve_two_bone};

use crate::pose::PoseBuffer;
use crate::skeleton::{IkSolverKind, JointHierarchy, LimbIkDefinition};
use glam::Vec3;

/// 按肢体定义的求解器类型分发
pub fn solve_limb(hierarchy: &JointHierarchy, pose: &mut PoseBuffer, limb: &LimbIkDefinition, target: Vec3) -> bool {
    match limb.solver {
        IkSolverKind::TwoBone => solve_two_bone(hierarchy, pose, &limb.chain, &limb.limb_children, target),
        IkSolverKind::ThreeBone(limits) => {
            solve_three_bone(hierarchy, pose, &limb.chain, &limb.limb_children, target, &limits)
        }
        IkSolverKind::Ccd(params) => {
            solve_ccd(hierarchy, pose, &limb.chain, &limb.limb_children, target, &params).is_some()
        }
    }
}

/// 链中所有索引都在范围内，且每个关节的父关节就是链上的前一个
pub(crate) fn chain_valid(hierarchy: &JointHierarchy, pose: &PoseBuffer, chain: &[usize]) -> bool {
    let n = pose.joint_count().min(hierarchy.joint_count());
    chain.iter().all(|&j| j < n)
        && chain
            .windows(2)
            .all(|pair| hierarchy.parent_index(pair[1]) == Some(pair[0]))
}

/// 从链的第 `from` 个关节开始，按相对变换重新组合绝对变换
pub(crate) fn recompose_chain(hierarchy: &JointHierarchy, pose: &mut PoseBuffer, chain: &[usize], from: usize) {
    for &joint in chain.iter().skip(from) {
        pose.compute_joint_absolute(hierarchy, joint);
    }
}

/// 重新组合挂在链下的关节（升序保证父先于子）
pub(crate) fn recompose_limb_children(hierarchy: &JointHierarchy, pose: &mut PoseBuffer, limb_children: &[usize]) {
    for &joint in limb_children {
        pose.compute_joint_absolute(hierarchy, joint);
    }
}

/// 在角色空间里左乘旋转，并由父关节反推相对变换
pub(crate) fn rotate_absolute(hierarchy: &JointHierarchy, pose: &mut PoseBuffer, joint: usize, rotation: glam::Quat) {
    let Some(abs) = pose.absolute_pose_mut().get_mut(joint) else {
        return;
    };
    abs.rotation = (rotation * abs.rotation).normalize();
    pose.compute_joint_relative(hierarchy, joint);
}
