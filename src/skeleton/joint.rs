//! 关节节点
//!
//! Joint 是层级中的静态单元：名称、父子关系、默认姿态。
//! 运行时的变换数据不在这里，统一放在 `PoseBuffer` 中。

use super::transform::JointTransform;

/// 关节节点
///
/// 约定：
/// - 关节按拓扑顺序存储，父关节索引一定小于自身索引
/// - 子关节在 `children` 扁平数组中占据 `[child_offset, child_offset + child_count)`
#[derive(Clone, Debug)]
pub struct Joint {
    // ========================================
    // 标识
    // ========================================

    /// 关节名称
    pub name: String,

    /// 小写名称的 CRC32
    pub name_crc32: u32,

    /// 关节内部索引
    pub(crate) internal_id: usize,

    // ========================================
    // 层级
    // ========================================

    /// 父关节索引 (-1 表示根关节)
    pub parent_index: i32,

    /// 子关节在扁平子数组中的起始位置
    pub(crate) child_offset: usize,

    /// 直接子关节数量
    pub(crate) child_count: usize,

    // ========================================
    // 默认姿态
    // ========================================

    /// 相对父关节的默认变换
    pub default_relative: JointTransform,

    /// 角色空间的默认变换（build 时计算）
    pub default_absolute: JointTransform,
}

impl Joint {
    pub(crate) fn new(name: &str, index: usize, parent_index: i32, default_relative: JointTransform) -> Self {
        Self {
            name: name.to_string(),
            name_crc32: super::crc32::name_crc32(name),
            internal_id: index,
            parent_index,
            child_offset: 0,
            child_count: 0,
            default_relative,
            default_absolute: default_relative,
        }
    }

    /// 关节索引
    #[inline]
    pub fn index(&self) -> usize {
        self.internal_id
    }

    /// 父关节索引
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        if self.parent_index >= 0 {
            Some(self.parent_index as usize)
        } else {
            None
        }
    }

    /// 是否为根关节
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_index < 0
    }

    /// 直接子关节数量
    #[inline]
    pub fn child_count(&self) -> usize {
        self.child_count
    }
}
