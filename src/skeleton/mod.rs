//! 骨骼层级
//!
//! - Joint: 单个关节的静态数据
//! - JointHierarchy: 拓扑有序的关节表 + 子关节索引 + 名称查找
//! - 肢体 IK 定义与瞄准/注视绑定在构建时解析

mod crc32;
mod directional;
mod hierarchy;
mod joint;
mod limb;
mod transform;

pub use crc32::{crc32, name_crc32};
pub use directional::{
    AimPosJoint, AimPosJointDesc, AimRotJoint, AimRotJointDesc, DirectionalBlend, DirectionalBlendDesc,
    DirectionalSetup, DirectionalSetupDesc,
};
pub use hierarchy::{JointHierarchy, JointHierarchyBuilder};
pub use joint::Joint;
pub use limb::{CcdParams, IkSolverKind, LimbHandle, LimbIkDefinition, LimbIkDesc, ThreeBoneLimits};
pub use transform::JointTransform;
