//! 肢体 IK 修改器
//!
//! 外部每帧调用 `add_setup` 注册（肢体句柄, 目标点），Prepare 后的 Execute 依次求解。

use glam::Vec3;

use super::{DoubleBuffer, PoseModifier, PoseModifierParams, SetupWarning};
use crate::ik::solve_limb;
use crate::skeleton::LimbHandle;

/// 一次求解请求
#[derive(Clone, Copy, Debug)]
pub struct LimbIkSetup {
    pub handle: LimbHandle,
    /// 角色空间中的目标点
    pub target: Vec3,
}

#[derive(Default)]
pub struct LimbIk {
    setups: DoubleBuffer<Vec<LimbIkSetup>>,
    warning: SetupWarning,
}

impl LimbIk {
    pub fn new() -> Self {
        Self::default()
    }

    /// 肢体名称对应的句柄
    pub fn limb_handle(name: &str) -> LimbHandle {
        LimbHandle::from_name(name)
    }

    /// 注册一次求解，下一次 Prepare 后生效
    pub fn add_setup(&mut self, handle: LimbHandle, local_target: Vec3) {
        self.setups.pending_mut().push(LimbIkSetup {
            handle,
            target: local_target,
        });
    }

    pub fn pending_count(&self) -> usize {
        self.setups.pending().len()
    }
}

impl PoseModifier for LimbIk {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        self.setups.swap();
        self.setups.pending_mut().clear();

        let hierarchy = params.hierarchy;
        let before = self.setups.active().len();
        self.setups.active_mut().retain(|s| hierarchy.limb(s.handle).is_some());
        if self.setups.active().len() != before {
            self.warning.missing("LimbIk", "setup references a limb the skeleton does not define");
        } else if before > 0 {
            self.warning.available();
        }
        !self.setups.active().is_empty()
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let mut any = false;
        for setup in self.setups.active() {
            let Some(limb) = params.hierarchy.limb(setup.handle) else {
                continue;
            };
            any |= solve_limb(params.hierarchy, params.pose, limb, setup.target);
        }
        any
    }

    fn synchronize(&mut self) {
        self.setups.active_mut().clear();
    }
}
