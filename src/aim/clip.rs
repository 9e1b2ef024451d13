//! 瞄准姿态片段
//!
//! 片段数据由外部资源管线提供；这里只做校验与查询。

use std::collections::HashMap;

use glam::{Quat, Vec2, Vec3};

use super::grid::{sample_grid, VirtualExample, GRID_X, GRID_Y, UNUSED};
use crate::skeleton::{name_crc32, DirectionalSetup};
use crate::{PoseError, Result};

/// 一个样本姿态：旋转关节的相对旋转 + 位置关节的相对平移
#[derive(Clone, Debug, Default)]
pub struct AimPose {
    pub rotations: Vec<Quat>,
    pub positions: Vec<Vec3>,
}

#[derive(Clone, Debug)]
pub struct AimClip {
    /// 片段标记的 CRC32，用来匹配 `DirectionalBlend`
    pub token_crc32: u32,
    /// 样本存的是相对绑定姿态的增量
    pub additive: bool,
    /// 片段的参考朝向（相对参考关节）
    pub frame: Quat,
    pub poses: Vec<AimPose>,
    pub grid: Vec<VirtualExample>,
}

impl AimClip {
    /// 构造并校验网格
    pub fn new(id: u32, token: &str, additive: bool, frame: Quat, poses: Vec<AimPose>, grid: Vec<VirtualExample>) -> Result<Self> {
        let invalid = |reason: String| PoseError::InvalidAimClip { clip: id, reason };
        if poses.is_empty() {
            return Err(invalid("clip has no sample poses".into()));
        }
        if grid.len() != GRID_X * GRID_Y {
            return Err(invalid(format!("grid has {} nodes, expected {}", grid.len(), GRID_X * GRID_Y)));
        }
        for (node, example) in grid.iter().enumerate() {
            for slot in 0..4 {
                let index = example.indices[slot];
                if index != UNUSED && index as usize >= poses.len() {
                    return Err(invalid(format!("grid node {} references sample {}", node, index)));
                }
            }
        }
        let rotations = poses[0].rotations.len();
        let positions = poses[0].positions.len();
        if poses.iter().any(|p| p.rotations.len() != rotations || p.positions.len() != positions) {
            return Err(invalid("sample poses differ in joint count".into()));
        }
        Ok(Self {
            token_crc32: name_crc32(token),
            additive,
            frame: frame.normalize(),
            poses,
            grid,
        })
    }

    /// 检查样本姿态与瞄准/注视绑定的关节数一致
    pub fn matches_setup(&self, setup: &DirectionalSetup) -> bool {
        self.poses[0].rotations.len() == setup.rotations.len()
            && self.poses[0].positions.len() == setup.positions.len()
    }

    /// 极坐标处的样本权重
    pub fn sample(&self, polar: Vec2, out: &mut Vec<(usize, f32)>) {
        sample_grid(&self.grid, polar, out);
    }
}

/// 片段 ID → 片段
#[derive(Clone, Debug, Default)]
pub struct AimClipTable {
    clips: HashMap<u32, AimClip>,
}

impl AimClipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: u32, clip: AimClip) -> Option<AimClip> {
        self.clips.insert(id, clip)
    }

    pub fn get(&self, id: u32) -> Option<&AimClip> {
        self.clips.get(&id)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }
}

/// 本帧正在播放的片段
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlayingClip {
    pub clip_id: u32,
    pub layer: u32,
    pub weight: f32,
}
