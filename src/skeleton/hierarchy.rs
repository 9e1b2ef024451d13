//! 关节层级
//!
//! 每个骨架一份，构建后只读，可以在多个角色实例间用 `Arc` 共享。

use std::collections::HashMap;

use super::directional::{DirectionalSetup, DirectionalSetupDesc};
use super::joint::Joint;
use super::limb::{resolve_limb, subtree_excluding, LimbHandle, LimbIkDefinition, LimbIkDesc};
use super::transform::JointTransform;
use crate::{PoseError, Result};

/// 关节层级（只读）
#[derive(Clone, Debug)]
pub struct JointHierarchy {
    joints: Vec<Joint>,
    /// 扁平子关节数组，按 `Joint::child_offset/child_count` 切片
    children: Vec<usize>,
    name_to_index: HashMap<String, usize>,
    crc_to_index: HashMap<u32, usize>,
    limbs: HashMap<LimbHandle, LimbIkDefinition>,
    aim_setup: Option<DirectionalSetup>,
    look_setup: Option<DirectionalSetup>,
}

impl JointHierarchy {
    pub fn builder() -> JointHierarchyBuilder {
        JointHierarchyBuilder::new()
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    #[inline]
    pub fn joint(&self, index: usize) -> Option<&Joint> {
        self.joints.get(index)
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    /// 父关节索引，根关节或越界返回 None
    #[inline]
    pub fn parent_index(&self, index: usize) -> Option<usize> {
        self.joints.get(index).and_then(|j| j.parent_id())
    }

    /// 直接子关节
    pub fn children(&self, index: usize) -> &[usize] {
        match self.joints.get(index) {
            Some(j) => &self.children[j.child_offset..j.child_offset + j.child_count],
            None => &[],
        }
    }

    pub fn joint_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn joint_index_by_crc32(&self, crc: u32) -> Option<usize> {
        self.crc_to_index.get(&crc).copied()
    }

    pub fn default_relative(&self, index: usize) -> Option<&JointTransform> {
        self.joints.get(index).map(|j| &j.default_relative)
    }

    pub fn default_absolute(&self, index: usize) -> Option<&JointTransform> {
        self.joints.get(index).map(|j| &j.default_absolute)
    }

    pub fn limb(&self, handle: LimbHandle) -> Option<&LimbIkDefinition> {
        self.limbs.get(&handle)
    }

    pub fn limb_count(&self) -> usize {
        self.limbs.len()
    }

    pub fn aim_setup(&self) -> Option<&DirectionalSetup> {
        self.aim_setup.as_ref()
    }

    pub fn look_setup(&self) -> Option<&DirectionalSetup> {
        self.look_setup.as_ref()
    }

    /// `root` 子树中不属于 `chain` 的关节（升序）
    ///
    /// 修改器在运行时解析出的链也需要这个列表。
    pub fn limb_children(&self, root: usize, chain: &[usize]) -> Vec<usize> {
        subtree_excluding(&self.joints, root, chain)
    }

    /// 从 `end` 沿父关节回溯到 `root`，返回根 → 末端的链
    pub fn chain_between(&self, root: usize, end: usize) -> Option<Vec<usize>> {
        if root >= self.joints.len() || end >= self.joints.len() {
            return None;
        }
        let mut chain = vec![end];
        let mut current = end;
        while current != root {
            current = self.parent_index(current)?;
            chain.push(current);
        }
        chain.reverse();
        Some(chain)
    }
}

// ============================================================================
// 构建器
// ============================================================================

/// 层级构建器
#[derive(Default)]
pub struct JointHierarchyBuilder {
    joints: Vec<Joint>,
    name_to_index: HashMap<String, usize>,
    limbs: Vec<LimbIkDesc>,
    aim_setup: Option<DirectionalSetupDesc>,
    look_setup: Option<DirectionalSetupDesc>,
}

impl JointHierarchyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加关节，父关节必须已经添加
    pub fn add_joint(&mut self, name: &str, parent: Option<&str>, default_relative: JointTransform) -> Result<usize> {
        let parent_index = match parent {
            Some(p) => *self
                .name_to_index
                .get(p)
                .ok_or_else(|| PoseError::UnknownJoint(p.to_string()))? as i32,
            None => -1,
        };
        self.add_joint_with_parent_index(name, parent_index, default_relative)
    }

    /// 按父索引添加关节（导入已排好序的关节表时使用），顺序在 build 时校验
    pub fn add_joint_with_parent_index(
        &mut self,
        name: &str,
        parent_index: i32,
        default_relative: JointTransform,
    ) -> Result<usize> {
        if self.name_to_index.contains_key(name) {
            return Err(PoseError::DuplicateJoint(name.to_string()));
        }
        let index = self.joints.len();
        self.joints.push(Joint::new(name, index, parent_index, default_relative.normalized()));
        self.name_to_index.insert(name.to_string(), index);
        Ok(index)
    }

    pub fn add_limb_ik(&mut self, desc: LimbIkDesc) -> &mut Self {
        self.limbs.push(desc);
        self
    }

    pub fn set_aim_setup(&mut self, desc: DirectionalSetupDesc) -> &mut Self {
        self.aim_setup = Some(desc);
        self
    }

    pub fn set_look_setup(&mut self, desc: DirectionalSetupDesc) -> &mut Self {
        self.look_setup = Some(desc);
        self
    }

    pub fn build(self) -> Result<JointHierarchy> {
        let Self {
            mut joints,
            name_to_index,
            limbs,
            aim_setup,
            look_setup,
        } = self;

        if joints.is_empty() {
            return Err(PoseError::EmptyHierarchy);
        }

        // 拓扑顺序校验
        for (i, joint) in joints.iter().enumerate() {
            if joint.parent_index >= i as i32 {
                return Err(PoseError::NotTopological {
                    joint: i,
                    parent: joint.parent_index,
                });
            }
        }

        // 子关节数组（CSR）
        let mut counts = vec![0usize; joints.len()];
        for joint in &joints {
            if let Some(p) = joint.parent_id() {
                counts[p] += 1;
            }
        }
        let mut offset = 0;
        for (joint, &count) in joints.iter_mut().zip(&counts) {
            joint.child_offset = offset;
            joint.child_count = 0;
            offset += count;
        }
        let mut children = vec![0usize; offset];
        for i in 0..joints.len() {
            if let Some(p) = joints[i].parent_id() {
                let slot = joints[p].child_offset + joints[p].child_count;
                children[slot] = i;
                joints[p].child_count += 1;
            }
        }

        // 默认绝对姿态
        for i in 0..joints.len() {
            joints[i].default_absolute = match joints[i].parent_id() {
                Some(p) => (joints[p].default_absolute * joints[i].default_relative).normalized(),
                None => joints[i].default_relative,
            };
        }

        let mut crc_to_index = HashMap::with_capacity(joints.len());
        for joint in &joints {
            let previous = crc_to_index.insert(joint.name_crc32, joint.index());
            if previous.is_some() {
                log::warn!("[JointHierarchy] CRC32 collision on joint '{}'", joint.name);
            }
        }

        let lookup = |name: &str| name_to_index.get(name).copied();

        let mut limb_map = HashMap::with_capacity(limbs.len());
        for desc in &limbs {
            let def = resolve_limb(desc, &joints, &lookup)?;
            limb_map.insert(def.handle, def);
        }

        let aim_setup = aim_setup.map(|d| d.resolve(&lookup)).transpose()?;
        let look_setup = look_setup.map(|d| d.resolve(&lookup)).transpose()?;

        log::debug!(
            "[JointHierarchy] built {} joints, {} limbs",
            joints.len(),
            limb_map.len()
        );

        Ok(JointHierarchy {
            joints,
            children,
            name_to_index,
            crc_to_index,
            limbs: limb_map,
            aim_setup,
            look_setup,
        })
    }
}
