//! 骨骼姿态求值核心
//!
//! 一个角色每帧的处理流程：
//! - 外部动画混合写入相对姿态
//! - `PoseBuffer::compute_absolute_pose` 传播到绝对空间
//! - 姿态修改器按 Prepare → Execute → Synchronize 三个阶段依次执行
//!
//! 修改器包括：操作队列、肢体 IK、瞄准/注视混合、约束与动力学算子。

pub mod aim;
pub mod character;
pub mod config;
pub mod ik;
pub mod math;
pub mod modifier;
pub mod pose;
pub mod skeleton;

pub use aim::{AimClip, AimClipTable, DirectionalBlender, DirectionalKind, PlayingClip};
pub use character::{evaluate_characters, CharacterInstance};
pub use modifier::{
    LimbIk, OperatorQueue, PoseModifier, PoseModifierParams, PoseModifierSetup,
    PoseModifierStack, StoreHandle,
};
pub use pose::PoseBuffer;
pub use skeleton::{JointHierarchy, JointHierarchyBuilder, JointTransform, LimbHandle};

use thiserror::Error;

/// 构建期错误（每帧求值路径不返回错误）
#[derive(Debug, Error)]
pub enum PoseError {
    #[error("Hierarchy is empty")]
    EmptyHierarchy,

    #[error("Duplicate joint name: {0}")]
    DuplicateJoint(String),

    #[error("Unknown joint: {0}")]
    UnknownJoint(String),

    #[error("Joint {joint} references parent {parent} which is not stored before it")]
    NotTopological { joint: usize, parent: i32 },

    #[error("Limb IK '{limb}': {reason}")]
    InvalidLimb { limb: String, reason: String },

    #[error("Aim clip {clip}: {reason}")]
    InvalidAimClip { clip: u32, reason: String },

    #[error("Directional setup: {0}")]
    InvalidDirectionalSetup(String),
}

pub type Result<T> = std::result::Result<T, PoseError>;
