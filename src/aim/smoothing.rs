//! 按片段保存的极坐标平滑状态
//!
//! 多个片段同时混合时各自平滑，互不干扰。容量固定，满了替换最久未用的条目。

use glam::Vec2;

use crate::math::smooth_cd_vec2;

pub const POOL_CAPACITY: usize = 16;

#[derive(Clone, Copy, Debug)]
struct SmoothingEntry {
    clip_id: u32,
    value: Vec2,
    rate: Vec2,
    last_used: u64,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct PolarSmoothingPool {
    entries: Vec<SmoothingEntry>,
    tick: u64,
}

impl PolarSmoothingPool {
    /// 上一次的平滑结果
    pub(crate) fn previous(&self, clip_id: u32) -> Option<Vec2> {
        self.entries.iter().find(|e| e.clip_id == clip_id).map(|e| e.value)
    }

    /// 平滑一步；片段第一次出现时直接跳到目标值
    ///
    /// `max_rate` 限制每秒的角度变化（弧度），非正数表示不限制。
    pub(crate) fn smooth(&mut self, clip_id: u32, target: Vec2, time_delta: f32, smooth_time: f32, max_rate: f32) -> Vec2 {
        self.tick += 1;
        let tick = self.tick;

        let Some(slot) = self.entries.iter().position(|e| e.clip_id == clip_id) else {
            let entry = SmoothingEntry {
                clip_id,
                value: target,
                rate: Vec2::ZERO,
                last_used: tick,
            };
            if self.entries.len() < POOL_CAPACITY {
                self.entries.push(entry);
            } else if let Some(oldest) = self.entries.iter_mut().min_by_key(|e| e.last_used) {
                *oldest = entry;
            }
            return target;
        };

        let entry = &mut self.entries[slot];
        let previous = entry.value;
        smooth_cd_vec2(&mut entry.value, &mut entry.rate, time_delta, target, smooth_time);
        if max_rate > 0.0 {
            let step = max_rate * time_delta;
            let delta = entry.value - previous;
            if delta.length() > step {
                entry.value = previous + delta.normalize() * step;
                entry.rate = delta.normalize() * max_rate;
            }
        }
        entry.last_used = tick;
        entry.value
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
