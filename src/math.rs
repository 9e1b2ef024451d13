//! 四元数与角度工具函数

use glam::{Quat, Vec2, Vec3};

/// 把单位向量 `v0` 转到单位向量 `v1` 的最短弧旋转
///
/// 两向量接近反向时旋转轴不稳定，改为绕任一正交轴转 180°。
pub fn rotation_vector_to_vector(v0: Vec3, v1: Vec3) -> Quat {
    let c = v0.dot(v1) + 1.0;
    if c > 1.0e-5 {
        let n = v0.cross(v1);
        Quat::from_xyzw(n.x, n.y, n.z, c).normalize()
    } else {
        let axis = v0.any_orthonormal_vector();
        Quat::from_xyzw(axis.x, axis.y, axis.z, 0.0)
    }
}

/// 归一化线性插值（自动选择最短弧）
pub fn nlerp(from: Quat, to: Quat, t: f32) -> Quat {
    let to = if from.dot(to) < 0.0 { -to } else { to };
    let q = from * (1.0 - t) + to * t;
    let len_sq = q.length_squared();
    if len_sq > 1.0e-12 {
        q * len_sq.sqrt().recip()
    } else {
        from
    }
}

/// 目标方向的极坐标（偏航, 俯仰）
///
/// 坐标系约定：+Y 向前，+Z 向上，+X 向右。
/// 偏航向左为正，范围 [-π, π]；俯仰向上为正，范围 [-π/2, π/2]。
pub fn polar_coordinates(direction: Vec3) -> Vec2 {
    let horizontal = (direction.x * direction.x + direction.y * direction.y).sqrt();
    Vec2::new(
        (-direction.x).atan2(direction.y),
        direction.z.atan2(horizontal),
    )
}

/// 临界阻尼平滑（标量）
///
/// `rate` 是平滑过程的速度状态，调用方负责在帧之间保存。
pub fn smooth_cd(value: &mut f32, rate: &mut f32, time_delta: f32, target: f32, smooth_time: f32) {
    if smooth_time > 0.0 {
        let omega = 2.0 / smooth_time;
        let x = omega * time_delta;
        let exp = 1.0 / (1.0 + x + 0.48 * x * x + 0.235 * x * x * x);
        let change = *value - target;
        let temp = (*rate + omega * change) * time_delta;
        *rate = (*rate - omega * temp) * exp;
        *value = target + (change + temp) * exp;
    } else if time_delta > 0.0 {
        *rate = (target - *value) / time_delta;
        *value = target;
    } else {
        *value = target;
        *rate = 0.0;
    }
}

/// 临界阻尼平滑（二维）
pub fn smooth_cd_vec2(value: &mut Vec2, rate: &mut Vec2, time_delta: f32, target: Vec2, smooth_time: f32) {
    smooth_cd(&mut value.x, &mut rate.x, time_delta, target.x, smooth_time);
    smooth_cd(&mut value.y, &mut rate.y, time_delta, target.y, smooth_time);
}
