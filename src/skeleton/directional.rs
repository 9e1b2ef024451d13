//! 瞄准/注视姿态的关节绑定
//!
//! 描述结构按名称填写，构建层级时解析为索引。

use super::crc32::name_crc32;
use crate::{PoseError, Result};

/// 方向混合描述：哪个动画标记驱动，用哪些关节计算参数
#[derive(Clone, Debug)]
pub struct DirectionalBlendDesc {
    /// 片段标记（与 `AimClip::token` 的 CRC32 比较）
    pub anim_token: String,
    /// 极坐标原点所在关节
    pub parameter_joint: String,
    /// 起始关节：重新组合绝对姿态从这里开始
    pub start_joint: String,
    /// 参考关节：提供极坐标参考朝向与左右/前后/上下判定
    pub reference_joint: String,
}

/// 受瞄准姿态驱动旋转的关节
#[derive(Clone, Debug)]
pub struct AimRotJointDesc {
    pub joint: String,
    pub primary: bool,
    pub additive: bool,
}

/// 受瞄准姿态驱动位置的关节
#[derive(Clone, Debug)]
pub struct AimPosJointDesc {
    pub joint: String,
    pub additive: bool,
}

/// 瞄准或注视的完整绑定描述
#[derive(Clone, Debug, Default)]
pub struct DirectionalSetupDesc {
    pub blends: Vec<DirectionalBlendDesc>,
    pub rotations: Vec<AimRotJointDesc>,
    pub positions: Vec<AimPosJointDesc>,
}

// ============================================================================
// 解析后的数据
// ============================================================================

#[derive(Clone, Debug)]
pub struct DirectionalBlend {
    pub anim_token_crc32: u32,
    pub parameter_joint: usize,
    pub start_joint: usize,
    pub reference_joint: usize,
}

#[derive(Clone, Debug)]
pub struct AimRotJoint {
    pub joint: usize,
    pub primary: bool,
    pub additive: bool,
    /// 同一关节在位置列表中的下标
    pub position_slot: Option<usize>,
}

#[derive(Clone, Debug)]
pub struct AimPosJoint {
    pub joint: usize,
    pub additive: bool,
}

#[derive(Clone, Debug, Default)]
pub struct DirectionalSetup {
    pub blends: Vec<DirectionalBlend>,
    pub rotations: Vec<AimRotJoint>,
    pub positions: Vec<AimPosJoint>,
}

impl DirectionalSetup {
    /// 按片段标记查找混合描述
    pub fn blend_for_token(&self, token_crc32: u32) -> Option<&DirectionalBlend> {
        self.blends.iter().find(|b| b.anim_token_crc32 == token_crc32)
    }

    pub fn is_empty(&self) -> bool {
        self.blends.is_empty() || self.rotations.is_empty()
    }
}

impl DirectionalSetupDesc {
    pub(crate) fn resolve(&self, lookup: impl Fn(&str) -> Option<usize>) -> Result<DirectionalSetup> {
        let find = |name: &str| {
            lookup(name).ok_or_else(|| PoseError::InvalidDirectionalSetup(format!("unknown joint '{}'", name)))
        };

        let mut blends = Vec::with_capacity(self.blends.len());
        for b in &self.blends {
            blends.push(DirectionalBlend {
                anim_token_crc32: name_crc32(&b.anim_token),
                parameter_joint: find(&b.parameter_joint)?,
                start_joint: find(&b.start_joint)?,
                reference_joint: find(&b.reference_joint)?,
            });
        }

        let mut positions = Vec::with_capacity(self.positions.len());
        for p in &self.positions {
            positions.push(AimPosJoint {
                joint: find(&p.joint)?,
                additive: p.additive,
            });
        }

        let mut rotations = Vec::with_capacity(self.rotations.len());
        for r in &self.rotations {
            let joint = find(&r.joint)?;
            if rotations.iter().any(|e: &AimRotJoint| e.joint == joint) {
                return Err(PoseError::InvalidDirectionalSetup(format!(
                    "rotation joint '{}' listed twice",
                    r.joint
                )));
            }
            rotations.push(AimRotJoint {
                joint,
                primary: r.primary,
                additive: r.additive,
                position_slot: positions.iter().position(|p| p.joint == joint),
            });
        }

        Ok(DirectionalSetup {
            blends,
            rotations,
            positions,
        })
    }
}
