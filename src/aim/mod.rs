//! 瞄准 / 注视方向混合
//!
//! - clip: 瞄准姿态片段与片段表
//! - grid: 17×9 极坐标网格与构造器
//! - smoothing: 按片段保存的极坐标平滑状态
//! - blender: `DirectionalBlender` 修改器

mod blender;
mod clip;
mod grid;
mod smoothing;

pub use blender::{BlendState, DirectionalBlender, DirectionalKind};
pub use clip::{AimClip, AimClipTable, AimPose, PlayingClip};
pub use grid::{PolarGridBuilder, VirtualExample, GRID_STEP, GRID_X, GRID_Y, WEIGHT_ONE};
