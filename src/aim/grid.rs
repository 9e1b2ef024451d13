//! 极坐标网格
//!
//! 17×9 个节点覆盖偏航 [-π, π]、俯仰 [-π/2, π/2]，步长 π/8。
//! 每个节点存最多 4 个样本姿态的索引与定点权重（0x2000 = 1.0）。

use std::f32::consts::{FRAC_PI_2, FRAC_PI_8, PI};

use glam::Vec2;

use crate::{PoseError, Result};

pub const GRID_X: usize = 17;
pub const GRID_Y: usize = 9;
pub const GRID_STEP: f32 = FRAC_PI_8;

/// 定点权重的 1.0
pub const WEIGHT_ONE: i16 = 0x2000;
/// 未使用的样本槽
pub const UNUSED: u8 = 0xff;

/// 网格节点：最多 4 个样本的加权组合
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VirtualExample {
    pub indices: [u8; 4],
    pub weights: [i16; 4],
}

impl Default for VirtualExample {
    fn default() -> Self {
        Self {
            indices: [UNUSED; 4],
            weights: [0; 4],
        }
    }
}

impl VirtualExample {
    pub fn single(index: u8) -> Self {
        Self {
            indices: [index, UNUSED, UNUSED, UNUSED],
            weights: [WEIGHT_ONE, 0, 0, 0],
        }
    }

    /// 由浮点权重量化
    pub fn from_weights(entries: [(u8, f32); 4]) -> Self {
        let mut example = Self::default();
        for (slot, (index, weight)) in entries.into_iter().enumerate() {
            let fixed = (weight * WEIGHT_ONE as f32).round() as i16;
            if fixed != 0 {
                example.indices[slot] = index;
                example.weights[slot] = fixed;
            }
        }
        example
    }

    #[inline]
    pub fn weight(&self, slot: usize) -> f32 {
        self.weights[slot] as f32 / WEIGHT_ONE as f32
    }

    /// 有效的（索引, 权重）对
    pub fn entries(&self) -> impl Iterator<Item = (usize, f32)> + '_ {
        (0..4).filter_map(move |slot| {
            let index = self.indices[slot];
            (index != UNUSED && self.weights[slot] != 0).then(|| (index as usize, self.weight(slot)))
        })
    }
}

/// 极坐标在网格中的浮点坐标（已限制到网格范围内）
pub(crate) fn grid_position(polar: Vec2) -> Vec2 {
    Vec2::new(
        ((polar.x + PI) / GRID_STEP).clamp(0.0, (GRID_X - 1) as f32),
        ((polar.y + FRAC_PI_2) / GRID_STEP).clamp(0.0, (GRID_Y - 1) as f32),
    )
}

/// 双线性采样：返回各样本姿态的累计权重
pub(crate) fn sample_grid(grid: &[VirtualExample], polar: Vec2, out: &mut Vec<(usize, f32)>) {
    out.clear();
    if grid.len() != GRID_X * GRID_Y || !polar.is_finite() {
        return;
    }
    let p = grid_position(polar);
    let ix = (p.x.floor() as usize).min(GRID_X - 2);
    let iy = (p.y.floor() as usize).min(GRID_Y - 2);
    let fx = p.x - ix as f32;
    let fy = p.y - iy as f32;

    let corners = [
        (ix, iy, (1.0 - fx) * (1.0 - fy)),
        (ix + 1, iy, fx * (1.0 - fy)),
        (ix, iy + 1, (1.0 - fx) * fy),
        (ix + 1, iy + 1, fx * fy),
    ];
    for (x, y, w) in corners {
        if w <= 0.0 {
            continue;
        }
        for (index, weight) in grid[y * GRID_X + x].entries() {
            match out.iter_mut().find(|(i, _)| *i == index) {
                Some(entry) => entry.1 += weight * w,
                None => out.push((index, weight * w)),
            }
        }
    }
}

/// 由规则的样本姿态格子构造极坐标网格
///
/// 样本按行存放：`index = row * yaws.len() + column`，
/// 行对应俯仰（递增），列对应偏航（递增）。
#[derive(Clone, Debug)]
pub struct PolarGridBuilder {
    yaws: Vec<f32>,
    pitches: Vec<f32>,
}

impl PolarGridBuilder {
    pub fn new(yaws: Vec<f32>, pitches: Vec<f32>) -> Self {
        Self { yaws, pitches }
    }

    pub fn pose_count(&self) -> usize {
        self.yaws.len() * self.pitches.len()
    }

    fn validate(&self, clip: u32) -> Result<()> {
        let invalid = |reason: &str| PoseError::InvalidAimClip {
            clip,
            reason: reason.to_string(),
        };
        if self.yaws.is_empty() || self.pitches.is_empty() {
            return Err(invalid("sample lattice is empty"));
        }
        if self.pose_count() >= UNUSED as usize {
            return Err(invalid("too many sample poses"));
        }
        let increasing = |v: &[f32]| v.windows(2).all(|w| w[0] < w[1]);
        if !increasing(&self.yaws) || !increasing(&self.pitches) {
            return Err(invalid("lattice coordinates must be strictly increasing"));
        }
        Ok(())
    }

    /// 在一个轴上定位：返回（下标, 下标 + 1, 插值系数），超出范围时钳到端点
    fn locate(axis: &[f32], value: f32) -> (usize, usize, f32) {
        let last = axis.len() - 1;
        if last == 0 || value <= axis[0] {
            return (0, 0, 0.0);
        }
        if value >= axis[last] {
            return (last, last, 0.0);
        }
        let i = axis.windows(2).position(|w| value < w[1]).unwrap_or(last - 1);
        let t = (value - axis[i]) / (axis[i + 1] - axis[i]);
        (i, i + 1, t)
    }

    pub fn build(&self, clip: u32) -> Result<Vec<VirtualExample>> {
        self.validate(clip)?;
        let columns = self.yaws.len();
        let mut grid = Vec::with_capacity(GRID_X * GRID_Y);
        for gy in 0..GRID_Y {
            let pitch = -FRAC_PI_2 + gy as f32 * GRID_STEP;
            let (r0, r1, ty) = Self::locate(&self.pitches, pitch);
            for gx in 0..GRID_X {
                let yaw = -PI + gx as f32 * GRID_STEP;
                let (c0, c1, tx) = Self::locate(&self.yaws, yaw);
                let index = |r: usize, c: usize| (r * columns + c) as u8;
                grid.push(VirtualExample::from_weights([
                    (index(r0, c0), (1.0 - tx) * (1.0 - ty)),
                    (index(r0, c1), tx * (1.0 - ty)),
                    (index(r1, c0), (1.0 - tx) * ty),
                    (index(r1, c1), tx * ty),
                ]));
            }
        }
        Ok(grid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_4;

    fn lattice() -> PolarGridBuilder {
        PolarGridBuilder::new(vec![-FRAC_PI_2, 0.0, FRAC_PI_2], vec![-FRAC_PI_4, 0.0, FRAC_PI_4])
    }

    #[test]
    fn test_fixed_point_weight() {
        let example = VirtualExample::from_weights([(3, 0.25), (4, 0.75), (0, 0.0), (0, 0.0)]);
        assert_eq!(example.weights[0], 0x800);
        assert!((example.weight(1) - 0.75).abs() < 1e-6);
        assert_eq!(example.entries().count(), 2);
    }

    #[test]
    fn test_builder_grid_shape() {
        let grid = lattice().build(0).unwrap();
        assert_eq!(grid.len(), GRID_X * GRID_Y);
        // (0,0) 节点在格子中央：样本 4 权重 1
        let center: Vec<_> = grid[4 * GRID_X + 8].entries().collect();
        assert_eq!(center.len(), 1);
        assert_eq!(center[0].0, 4);
        assert!((center[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_sample_weights_sum_to_one() {
        let grid = lattice().build(0).unwrap();
        let mut out = Vec::new();
        for polar in [Vec2::new(0.3, -0.2), Vec2::new(-2.9, 1.4), Vec2::new(FRAC_PI_4, 0.0)] {
            sample_grid(&grid, polar, &mut out);
            let sum: f32 = out.iter().map(|(_, w)| w).sum();
            assert!((sum - 1.0).abs() < 1e-3, "polar {:?} sum {}", polar, sum);
        }
    }

    #[test]
    fn test_sample_midpoint() {
        let grid = lattice().build(0).unwrap();
        let mut out = Vec::new();
        sample_grid(&grid, Vec2::new(FRAC_PI_4, 0.0), &mut out);
        out.retain(|(_, w)| *w > 1e-3);
        out.sort_by_key(|(i, _)| *i);
        assert_eq!(out.len(), 2);
        assert_eq!((out[0].0, out[1].0), (4, 5));
        assert!((out[0].1 - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_builder_rejects_bad_lattice() {
        assert!(PolarGridBuilder::new(vec![], vec![0.0]).build(1).is_err());
        assert!(PolarGridBuilder::new(vec![0.5, 0.1], vec![0.0]).build(1).is_err());
    }
}
