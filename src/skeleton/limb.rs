//! 肢体 IK 定义
//!
//! 每个肢体用小写名称的 CRC32 作为句柄。链从根关节到末端执行器，
//! 在构建层级时沿父关节解析并校验长度。

use super::crc32::name_crc32;
use super::joint::Joint;
use crate::{PoseError, Result};

/// 肢体句柄（小写名称的 CRC32）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LimbHandle(pub u32);

impl LimbHandle {
    pub fn from_name(name: &str) -> Self {
        Self(name_crc32(name))
    }
}

/// 三骨骼求解的关节限制
///
/// 四个值都是弯曲角的余弦（弯曲角 = 两段骨骼方向的夹角，0 表示伸直）。
/// 这些是绑定相关的调参值，按肢体配置。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ThreeBoneLimits {
    /// 第一铰链完全收拢时的弯曲角余弦
    pub hinge1_close: f32,
    /// 第一铰链完全张开时的弯曲角余弦
    pub hinge1_open: f32,
    pub hinge2_close: f32,
    pub hinge2_open: f32,
}

impl Default for ThreeBoneLimits {
    fn default() -> Self {
        let open = 5.0f32.to_radians().cos();
        Self {
            hinge1_close: -0.5,
            hinge1_open: open,
            hinge2_close: -0.5,
            hinge2_open: open,
        }
    }
}

/// CCD 参数
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CcdParams {
    /// 最大迭代次数
    pub max_iterations: u32,
    /// 每次旋转的步长比例
    pub step_size: f32,
    /// 末端与目标的收敛距离
    pub threshold: f32,
}

impl Default for CcdParams {
    fn default() -> Self {
        Self {
            max_iterations: 30,
            step_size: 1.0,
            threshold: 0.01,
        }
    }
}

/// 求解器类型
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IkSolverKind {
    TwoBone,
    ThreeBone(ThreeBoneLimits),
    Ccd(CcdParams),
}

impl IkSolverKind {
    /// 该求解器要求的链长度范围
    fn chain_len_ok(&self, len: usize) -> bool {
        match self {
            IkSolverKind::TwoBone => len == 3,
            IkSolverKind::ThreeBone(_) => len == 4,
            IkSolverKind::Ccd(_) => len >= 2,
        }
    }
}

/// 肢体 IK 描述（按名称，构建时解析）
#[derive(Clone, Debug)]
pub struct LimbIkDesc {
    pub name: String,
    pub solver: IkSolverKind,
    pub root: String,
    pub end_effector: String,
}

impl LimbIkDesc {
    pub fn new(name: &str, solver: IkSolverKind, root: &str, end_effector: &str) -> Self {
        Self {
            name: name.to_string(),
            solver,
            root: root.to_string(),
            end_effector: end_effector.to_string(),
        }
    }
}

/// 已解析的肢体 IK 定义
#[derive(Clone, Debug)]
pub struct LimbIkDefinition {
    pub handle: LimbHandle,
    pub name: String,
    pub solver: IkSolverKind,
    /// 根 → 末端
    pub chain: Vec<usize>,
    /// 根关节子树中不属于链的关节（升序）
    pub limb_children: Vec<usize>,
}

/// 根据关节表解析肢体描述
pub(crate) fn resolve_limb(
    desc: &LimbIkDesc,
    joints: &[Joint],
    lookup: impl Fn(&str) -> Option<usize>,
) -> Result<LimbIkDefinition> {
    let invalid = |reason: String| PoseError::InvalidLimb {
        limb: desc.name.clone(),
        reason,
    };

    let root = lookup(&desc.root).ok_or_else(|| invalid(format!("unknown root joint '{}'", desc.root)))?;
    let end = lookup(&desc.end_effector)
        .ok_or_else(|| invalid(format!("unknown end effector '{}'", desc.end_effector)))?;

    // 从末端沿父关节回溯到根
    let mut chain = vec![end];
    let mut current = end;
    while current != root {
        match joints[current].parent_id() {
            Some(parent) => {
                chain.push(parent);
                current = parent;
            }
            None => {
                return Err(invalid(format!(
                    "'{}' is not an ancestor of '{}'",
                    desc.root, desc.end_effector
                )))
            }
        }
    }
    chain.reverse();

    if !desc.solver.chain_len_ok(chain.len()) {
        return Err(invalid(format!(
            "chain length {} does not fit solver {:?}",
            chain.len(),
            desc.solver
        )));
    }

    let limb_children = subtree_excluding(joints, root, &chain);

    Ok(LimbIkDefinition {
        handle: LimbHandle::from_name(&desc.name),
        name: desc.name.clone(),
        solver: desc.solver,
        chain,
        limb_children,
    })
}

/// `root` 子树中不在 `exclude` 里的关节，升序
///
/// 依赖拓扑顺序：父关节先于子关节被标记。
pub(crate) fn subtree_excluding(joints: &[Joint], root: usize, exclude: &[usize]) -> Vec<usize> {
    let mut in_subtree = vec![false; joints.len()];
    let mut result = Vec::new();
    if root >= joints.len() {
        return result;
    }
    in_subtree[root] = true;
    for j in (root + 1)..joints.len() {
        if let Some(parent) = joints[j].parent_id() {
            if in_subtree[parent] {
                in_subtree[j] = true;
                if !exclude.contains(&j) {
                    result.push(j);
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_case_insensitive() {
        assert_eq!(LimbHandle::from_name("LftArm01"), LimbHandle::from_name("lftarm01"));
    }

    #[test]
    fn test_default_limits_ordered() {
        let limits = ThreeBoneLimits::default();
        // 收拢时弯曲更多，余弦更小
        assert!(limits.hinge1_close < limits.hinge1_open);
        assert!(limits.hinge2_close < limits.hinge2_open);
    }

    #[test]
    fn test_chain_length_rules() {
        assert!(IkSolverKind::TwoBone.chain_len_ok(3));
        assert!(!IkSolverKind::TwoBone.chain_len_ok(4));
        assert!(IkSolverKind::ThreeBone(ThreeBoneLimits::default()).chain_len_ok(4));
        assert!(IkSolverKind::Ccd(CcdParams::default()).chain_len_ok(2));
        assert!(!IkSolverKind::Ccd(CcdParams::default()).chain_len_ok(1));
    }
}
