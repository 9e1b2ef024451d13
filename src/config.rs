//! 姿态求值调参配置
//!
//! 所有参数扁平化，直接在代码中修改默认值即可。
//! 每个资源自带的数据（肢体定义、三骨骼关节限制、瞄准片段）不放在这里。

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// 姿态求值配置（扁平化，不嵌套）
#[derive(Debug, Clone)]
pub struct PoseConfig {
    // ========== 时间步长 ==========
    /// 最小时间步长（秒），默认 0.001（1000Hz）
    pub min_time_delta: f32,
    /// 最大时间步长（秒），默认 0.0333（30Hz）
    /// 卡顿帧的大步长会让阻尼平滑公式发散
    pub max_time_delta: f32,

    // ========== 退化判定 ==========
    /// 平方距离阈值，低于它视为"已到达"或"零长度"，默认 1e-5
    pub degenerate_epsilon_sq: f32,

    // ========== 两骨骼 IK ==========
    /// 目标超出臂长时的最大拉伸比例，默认 1.25（1.0 = 不拉伸）
    pub two_bone_max_stretch: f32,

    // ========== 三骨骼 IK ==========
    /// 末段骨骼最大拉伸比例，默认 1/0.55
    pub three_bone_max_stretch: f32,
    /// 二分搜索最大迭代次数，默认 30
    pub three_bone_search_iterations: u32,
    /// 二分搜索收敛容差（长度平方），默认 0.01
    pub three_bone_tolerance_sq: f32,

    // ========== CCD ==========
    /// 单步旋转阻尼上限，默认 0.4
    pub ccd_max_step: f32,
    /// 链上关节权重的起始偏移，默认 0.3
    pub ccd_base_weight: f32,

    // ========== 瞄准/注视 ==========
    /// 视野淡出平滑时间（秒），默认 0.2
    pub fov_smooth_time: f32,
    /// 最小距离淡出的滞回带（相对阈值的比例），默认 0.1
    pub min_distance_hysteresis: f32,

    // ========== 调试 ==========
    /// 是否输出每帧调试日志，默认 false
    pub debug_log: bool,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            // ====== 时间步长 ======
            min_time_delta: 0.001,
            max_time_delta: 0.0333,

            // ====== 退化判定 ======
            degenerate_epsilon_sq: 1.0e-5,

            // ====== 两骨骼 IK ======
            // 软性过伸：到达边界附近不会突然绷直
            two_bone_max_stretch: 1.25,

            // ====== 三骨骼 IK ======
            three_bone_max_stretch: 1.0 / 0.55,
            three_bone_search_iterations: 30,
            three_bone_tolerance_sq: 0.01,

            // ====== CCD ======
            ccd_max_step: 0.4,
            ccd_base_weight: 0.3,

            // ====== 瞄准/注视 ======
            fov_smooth_time: 0.2,
            min_distance_hysteresis: 0.1,

            // ====== 调试 ======
            debug_log: false,
        }
    }
}

impl PoseConfig {
    /// 把外部传入的时间步长限制到合理区间
    #[inline]
    pub fn clamp_time_delta(&self, time_delta: f32) -> f32 {
        time_delta.clamp(self.min_time_delta, self.max_time_delta)
    }
}

/// 全局配置实例
static POSE_CONFIG: Lazy<RwLock<PoseConfig>> = Lazy::new(|| {
    RwLock::new(PoseConfig::default())
});

/// 获取当前配置（只读）
pub fn get_config() -> PoseConfig {
    POSE_CONFIG.read().unwrap_or_else(|e| e.into_inner()).clone()
}

/// 手动设置配置（用于运行时调试）
pub fn set_config(config: PoseConfig) {
    *POSE_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = config;
}

/// 重置为默认配置
pub fn reset_config() {
    *POSE_CONFIG.write().unwrap_or_else(|e| e.into_inner()) = PoseConfig::default();
}
