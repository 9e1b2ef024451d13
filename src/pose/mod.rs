//! 姿态缓冲
//!
//! 每个角色实例一份，保存相对（父空间）和绝对（角色空间）两套关节变换。
//!
//! 不变式：组合之后 `absolute[i] == absolute[parent(i)] * relative[i]`，
//! 根关节 `absolute[i] == relative[i]`。

use crate::skeleton::{JointHierarchy, JointTransform};
use glam::{Quat, Vec3};

/// 双表示姿态缓冲
#[derive(Clone, Debug, Default)]
pub struct PoseBuffer {
    relative: Vec<JointTransform>,
    absolute: Vec<JointTransform>,
}

impl PoseBuffer {
    /// 创建单位姿态
    pub fn new(joint_count: usize) -> Self {
        Self {
            relative: vec![JointTransform::IDENTITY; joint_count],
            absolute: vec![JointTransform::IDENTITY; joint_count],
        }
    }

    /// 以层级默认姿态初始化
    pub fn from_default(hierarchy: &JointHierarchy) -> Self {
        let mut pose = Self::new(hierarchy.joint_count());
        pose.reset_to_default(hierarchy);
        pose
    }

    #[inline]
    pub fn joint_count(&self) -> usize {
        self.relative.len()
    }

    #[inline]
    pub fn relative(&self, index: usize) -> Option<&JointTransform> {
        self.relative.get(index)
    }

    #[inline]
    pub fn absolute(&self, index: usize) -> Option<&JointTransform> {
        self.absolute.get(index)
    }

    pub fn relative_pose(&self) -> &[JointTransform] {
        &self.relative
    }

    pub fn absolute_pose(&self) -> &[JointTransform] {
        &self.absolute
    }

    /// 外部动画混合直接写入相对姿态（写完需调用 `compute_absolute_pose`）
    pub fn relative_pose_mut(&mut self) -> &mut [JointTransform] {
        &mut self.relative
    }

    /// 直接访问绝对姿态（写完需调用 `compute_relative_pose`）
    pub fn absolute_pose_mut(&mut self) -> &mut [JointTransform] {
        &mut self.absolute
    }

    /// 复制一整套相对姿态，长度不一致时只复制公共部分
    pub fn set_relative_pose(&mut self, relative: &[JointTransform]) {
        debug_assert_eq!(relative.len(), self.relative.len());
        let n = relative.len().min(self.relative.len());
        self.relative[..n].copy_from_slice(&relative[..n]);
    }

    /// 回到层级默认姿态
    pub fn reset_to_default(&mut self, hierarchy: &JointHierarchy) {
        let n = hierarchy.joint_count();
        self.relative.resize(n, JointTransform::IDENTITY);
        self.absolute.resize(n, JointTransform::IDENTITY);
        for (i, joint) in hierarchy.joints().iter().enumerate() {
            self.relative[i] = joint.default_relative;
            self.absolute[i] = joint.default_absolute;
        }
    }

    // ========================================================================
    // 组合
    // ========================================================================

    /// 从 `from` 开始按索引升序组合绝对姿态
    pub fn compute_absolute_pose(&mut self, hierarchy: &JointHierarchy, from: usize) {
        let n = self.relative.len().min(hierarchy.joint_count());
        for i in from..n {
            self.absolute[i] = match hierarchy.parent_index(i) {
                Some(p) => {
                    debug_assert!(p < i, "joint {} stored before its parent {}", i, p);
                    (self.absolute[p] * self.relative[i]).normalized()
                }
                None => self.relative[i],
            };
        }
    }

    /// 由绝对姿态反推相对姿态
    pub fn compute_relative_pose(&mut self, hierarchy: &JointHierarchy) {
        let n = self.relative.len().min(hierarchy.joint_count());
        for i in 0..n {
            self.relative[i] = match hierarchy.parent_index(i) {
                Some(p) => (self.absolute[p].inverse() * self.absolute[i]).normalized(),
                None => self.absolute[i],
            };
        }
    }

    /// 只重算单个关节的绝对变换（父关节视为已是最新）
    pub fn compute_joint_absolute(&mut self, hierarchy: &JointHierarchy, index: usize) {
        if index >= self.absolute.len() {
            return;
        }
        self.absolute[index] = match hierarchy.parent_index(index) {
            Some(p) => (self.absolute[p] * self.relative[index]).normalized(),
            None => self.relative[index],
        };
    }

    /// 只重算单个关节的相对变换
    pub fn compute_joint_relative(&mut self, hierarchy: &JointHierarchy, index: usize) {
        if index >= self.relative.len() {
            return;
        }
        self.relative[index] = match hierarchy.parent_index(index) {
            Some(p) => (self.absolute[p].inverse() * self.absolute[index]).normalized(),
            None => self.absolute[index],
        };
    }

    /// 重算 `index` 所有后代的绝对变换（不含自身）
    ///
    /// 用显式栈遍历子关节区间，深层级不会爆栈。
    pub fn compute_joint_children_absolute(&mut self, hierarchy: &JointHierarchy, index: usize) {
        if index >= self.absolute.len() {
            return;
        }
        let mut stack: Vec<usize> = hierarchy.children(index).iter().rev().copied().collect();
        while let Some(child) = stack.pop() {
            if let Some(p) = hierarchy.parent_index(child) {
                self.absolute[child] = (self.absolute[p] * self.relative[child]).normalized();
            }
            stack.extend(hierarchy.children(child).iter().rev());
        }
    }

    /// 父关节的绝对变换，根关节返回单位变换
    #[inline]
    pub fn parent_absolute_safe(&self, hierarchy: &JointHierarchy, index: usize) -> JointTransform {
        hierarchy
            .parent_index(index)
            .and_then(|p| self.absolute.get(p).copied())
            .unwrap_or(JointTransform::IDENTITY)
    }

    // ========================================================================
    // 相对空间写入
    // ========================================================================

    pub fn set_joint_relative_position(&mut self, hierarchy: &JointHierarchy, index: usize, position: Vec3) -> bool {
        let Some(mut value) = self.relative_in_range(index) else {
            return false;
        };
        value.translation = position;
        self.apply_relative(hierarchy, index, value);
        true
    }

    pub fn set_joint_relative_orientation(&mut self, hierarchy: &JointHierarchy, index: usize, orientation: Quat) -> bool {
        let Some(mut value) = self.relative_in_range(index) else {
            return false;
        };
        value.rotation = orientation.normalize();
        self.apply_relative(hierarchy, index, value);
        true
    }

    pub fn set_joint_relative_transform(&mut self, hierarchy: &JointHierarchy, index: usize, transform: JointTransform) -> bool {
        if self.relative_in_range(index).is_none() {
            return false;
        }
        self.apply_relative(hierarchy, index, transform.normalized());
        true
    }

    // ========================================================================
    // 绝对空间写入
    // ========================================================================

    pub fn set_joint_absolute_position(&mut self, hierarchy: &JointHierarchy, index: usize, position: Vec3) -> bool {
        let Some(mut value) = self.absolute_in_range(index) else {
            return false;
        };
        value.translation = position;
        self.apply_absolute(hierarchy, index, value);
        true
    }

    pub fn set_joint_absolute_orientation(&mut self, hierarchy: &JointHierarchy, index: usize, orientation: Quat) -> bool {
        let Some(mut value) = self.absolute_in_range(index) else {
            return false;
        };
        value.rotation = orientation.normalize();
        self.apply_absolute(hierarchy, index, value);
        true
    }

    pub fn set_joint_absolute_transform(&mut self, hierarchy: &JointHierarchy, index: usize, transform: JointTransform) -> bool {
        if self.absolute_in_range(index).is_none() {
            return false;
        }
        self.apply_absolute(hierarchy, index, transform.normalized());
        true
    }

    // ========================================================================
    // 内部
    // ========================================================================

    fn relative_in_range(&self, index: usize) -> Option<JointTransform> {
        debug_assert!(index < self.relative.len(), "joint index {} out of range", index);
        self.relative.get(index).copied()
    }

    fn absolute_in_range(&self, index: usize) -> Option<JointTransform> {
        debug_assert!(index < self.absolute.len(), "joint index {} out of range", index);
        self.absolute.get(index).copied()
    }

    fn apply_relative(&mut self, hierarchy: &JointHierarchy, index: usize, value: JointTransform) {
        self.relative[index] = value;
        self.compute_joint_absolute(hierarchy, index);
        self.compute_joint_children_absolute(hierarchy, index);
    }

    fn apply_absolute(&mut self, hierarchy: &JointHierarchy, index: usize, value: JointTransform) {
        self.absolute[index] = value;
        self.compute_joint_relative(hierarchy, index);
        self.compute_joint_children_absolute(hierarchy, index);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::skeleton::JointHierarchyBuilder;

    /// root → a → b, root → c → d
    pub(crate) fn branching_hierarchy() -> JointHierarchy {
        let mut b = JointHierarchyBuilder::new();
        let t = |x: f32, y: f32, z: f32| JointTransform::from_translation(Vec3::new(x, y, z));
        b.add_joint("root", None, t(0.0, 0.0, 0.0)).unwrap();
        b.add_joint("a", Some("root"), t(1.0, 0.0, 0.0)).unwrap();
        b.add_joint("c", Some("root"), t(0.0, 1.0, 0.0)).unwrap();
        b.add_joint("b", Some("a"), t(1.0, 0.0, 0.0)).unwrap();
        b.add_joint("d", Some("c"), t(0.0, 1.0, 0.0)).unwrap();
        b.build().unwrap()
    }

    fn check_invariant(h: &JointHierarchy, pose: &PoseBuffer) {
        for i in 0..h.joint_count() {
            let expected = match h.parent_index(i) {
                Some(p) => *pose.absolute(p).unwrap() * *pose.relative(i).unwrap(),
                None => *pose.relative(i).unwrap(),
            };
            let abs = pose.absolute(i).unwrap();
            assert!((abs.translation - expected.translation).length() < 1e-4, "joint {}", i);
            assert!(abs.rotation.dot(expected.rotation).abs() > 1.0 - 1e-4, "joint {}", i);
        }
    }

    fn scrambled_pose(h: &JointHierarchy) -> PoseBuffer {
        let mut pose = PoseBuffer::from_default(h);
        for (i, rel) in pose.relative_pose_mut().iter_mut().enumerate() {
            let f = i as f32 + 1.0;
            rel.rotation = Quat::from_euler(glam::EulerRot::XYZ, 0.3 * f, -0.2 * f, 0.1 * f);
            rel.translation += Vec3::new(0.1 * f, -0.05 * f, 0.2);
        }
        pose
    }

    #[test]
    fn test_compute_absolute_invariant() {
        let h = branching_hierarchy();
        let mut pose = scrambled_pose(&h);
        pose.compute_absolute_pose(&h, 0);
        check_invariant(&h, &pose);
    }

    #[test]
    fn test_relative_round_trip() {
        let h = branching_hierarchy();
        let mut pose = scrambled_pose(&h);
        let original = pose.relative_pose().to_vec();
        pose.compute_absolute_pose(&h, 0);
        pose.compute_relative_pose(&h);
        for (a, b) in original.iter().zip(pose.relative_pose()) {
            assert!((a.translation - b.translation).length() < 1e-4);
            assert!(a.rotation.dot(b.rotation).abs() > 1.0 - 1e-4);
        }
    }

    #[test]
    fn test_set_relative_updates_subtree_only() {
        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let a = h.joint_index("a").unwrap();
        let d = h.joint_index("d").unwrap();
        let d_before = *pose.absolute(d).unwrap();

        assert!(pose.set_joint_relative_orientation(&h, a, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2)));
        check_invariant(&h, &pose);

        // b 被转到 (1,1,0)
        let b = h.joint_index("b").unwrap();
        assert!((pose.absolute(b).unwrap().translation - Vec3::new(1.0, 1.0, 0.0)).length() < 1e-5);
        // 无关分支不动
        assert_eq!(*pose.absolute(d).unwrap(), d_before);
    }

    #[test]
    fn test_set_absolute_derives_relative() {
        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let c = h.joint_index("c").unwrap();
        assert!(pose.set_joint_absolute_position(&h, c, Vec3::new(0.0, 3.0, 0.0)));
        check_invariant(&h, &pose);
        assert!((pose.relative(c).unwrap().translation - Vec3::new(0.0, 3.0, 0.0)).length() < 1e-6);
        let d = h.joint_index("d").unwrap();
        assert!((pose.absolute(d).unwrap().translation - Vec3::new(0.0, 4.0, 0.0)).length() < 1e-6);
    }

    #[test]
    fn test_parent_absolute_safe_root() {
        let h = branching_hierarchy();
        let pose = PoseBuffer::from_default(&h);
        assert_eq!(pose.parent_absolute_safe(&h, 0), JointTransform::IDENTITY);
    }

    #[test]
    fn test_deep_chain_children_iterative() {
        let mut b = JointHierarchyBuilder::new();
        b.add_joint_with_parent_index("j0", -1, JointTransform::IDENTITY).unwrap();
        for i in 1..5000 {
            b.add_joint_with_parent_index(
                &format!("j{}", i),
                i as i32 - 1,
                JointTransform::from_translation(Vec3::X * 0.01),
            )
            .unwrap();
        }
        let h = b.build().unwrap();
        let mut pose = PoseBuffer::from_default(&h);
        pose.set_joint_relative_position(&h, 0, Vec3::new(0.0, 1.0, 0.0));
        let last = pose.absolute(4999).unwrap().translation;
        assert!((last - Vec3::new(49.99, 1.0, 0.0)).length() < 1e-2);
    }
}
