//! 关节变换（旋转 + 平移，无缩放）

use glam::{Mat4, Quat, Vec3};
use std::ops::Mul;

/// 关节变换
///
/// 组合规则：`(a * b).apply(p) == a.apply(b.apply(p))`
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointTransform {
    pub rotation: Quat,
    pub translation: Vec3,
}

impl Default for JointTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl JointTransform {
    pub const IDENTITY: Self = Self {
        rotation: Quat::IDENTITY,
        translation: Vec3::ZERO,
    };

    #[inline]
    pub fn new(rotation: Quat, translation: Vec3) -> Self {
        Self { rotation, translation }
    }

    #[inline]
    pub fn from_translation(translation: Vec3) -> Self {
        Self { rotation: Quat::IDENTITY, translation }
    }

    #[inline]
    pub fn from_rotation(rotation: Quat) -> Self {
        Self { rotation, translation: Vec3::ZERO }
    }

    /// 逆变换
    #[inline]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.conjugate();
        Self {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// 变换一个点
    #[inline]
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.rotation * point + self.translation
    }

    /// 只旋转一个方向向量
    #[inline]
    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        self.rotation * vector
    }

    /// 重新归一化旋转（抵消连乘累积的浮点漂移）
    #[inline]
    pub fn normalized(self) -> Self {
        Self {
            rotation: self.rotation.normalize(),
            translation: self.translation,
        }
    }

    /// 归一化线性插值：平移线性插值，旋转走最短弧 nlerp
    pub fn nlerp(&self, other: &Self, t: f32) -> Self {
        Self {
            rotation: crate::math::nlerp(self.rotation, other.rotation, t),
            translation: self.translation.lerp(other.translation, t),
        }
    }

    /// 旋转与平移都是有限值
    #[inline]
    pub fn is_finite(&self) -> bool {
        self.rotation.is_finite() && self.translation.is_finite()
    }

    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// 从矩阵分解（缩放被丢弃）
    #[inline]
    pub fn from_matrix(m: Mat4) -> Self {
        let (_, rotation, translation) = m.to_scale_rotation_translation();
        Self { rotation, translation }
    }
}

impl Mul for JointTransform {
    type Output = JointTransform;

    #[inline]
    fn mul(self, rhs: JointTransform) -> JointTransform {
        JointTransform {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation * rhs.translation + self.translation,
        }
    }
}

impl Mul<Vec3> for JointTransform {
    type Output = Vec3;

    #[inline]
    fn mul(self, rhs: Vec3) -> Vec3 {
        self.transform_point(rhs)
    }
}
