//! 独立配置的 IK 节点修改器（不依赖骨架上的肢体定义）

use glam::Vec3;

use super::{resolve_optional, resolve_required, scaled_weight, PointDesc, PoseModifier, PoseModifierParams, ResolvedPoint, SetupWarning};
use crate::config::get_config;
use crate::ik::{compute_two_bone_rotations, rotate_absolute, solve_ccd_weighted};
use crate::skeleton::{CcdParams, JointHierarchy};

// ============================================================================
// 两段 IK
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct Ik2SegmentsDesc {
    pub root: String,
    pub link: String,
    pub end: String,
    /// 末端关节局部空间中的执行点偏移
    pub end_offset: Vec3,
    pub target: PointDesc,
    /// 0 = 保持末端当前位置，1 = 完全到达目标
    pub target_weight: f32,
    pub target_weight_joint: Option<String>,
}

#[derive(Clone, Copy, Debug)]
struct Ik2SegmentsRuntime {
    root: usize,
    link: usize,
    end: usize,
    target: ResolvedPoint,
    target_weight_joint: Option<usize>,
}

/// 两段 IK：铰链弯曲让长度匹配，根旋转对准方向（不拉伸）
pub struct Ik2Segments {
    pub desc: Ik2SegmentsDesc,
    runtime: Option<Ik2SegmentsRuntime>,
    warning: SetupWarning,
}

impl Ik2Segments {
    pub fn new(desc: Ik2SegmentsDesc) -> Self {
        Self {
            desc,
            runtime: None,
            warning: SetupWarning::default(),
        }
    }

    fn resolve(&self, hierarchy: &JointHierarchy) -> Result<Ik2SegmentsRuntime, String> {
        let root = resolve_required(hierarchy, &self.desc.root)?;
        let link = resolve_required(hierarchy, &self.desc.link)?;
        let end = resolve_required(hierarchy, &self.desc.end)?;
        let chain = hierarchy
            .chain_between(root, end)
            .ok_or_else(|| format!("'{}' is not an ancestor of '{}'", self.desc.root, self.desc.end))?;
        if link == root || link == end || !chain.contains(&link) {
            return Err(format!("'{}' is not between root and end", self.desc.link));
        }
        Ok(Ik2SegmentsRuntime {
            root,
            link,
            end,
            target: self.desc.target.resolve(hierarchy)?,
            target_weight_joint: resolve_optional(hierarchy, &self.desc.target_weight_joint)?,
        })
    }
}

impl PoseModifier for Ik2Segments {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        match self.resolve(params.hierarchy) {
            Ok(runtime) => {
                self.runtime = Some(runtime);
                self.warning.available();
                true
            }
            Err(reason) => {
                self.runtime = None;
                self.warning.missing("Ik2Segments", &reason);
                false
            }
        }
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(rt) = self.runtime else {
            return false;
        };
        let hierarchy = params.hierarchy;
        let pose = &mut *params.pose;
        let eps = get_config().degenerate_epsilon_sq;

        let weight = scaled_weight(pose, self.desc.target_weight, rt.target_weight_joint);
        let (Some(root), Some(link), Some(end)) = (pose.absolute(rt.root), pose.absolute(rt.link), pose.absolute(rt.end))
        else {
            return false;
        };
        let p0 = root.translation;
        let p1 = link.translation;
        let p2 = end.transform_point(self.desc.end_offset);
        let target = p2.lerp(rt.target.evaluate(pose), weight);

        if (p2 - target).length_squared() < eps
            || (p1 - p0).length_squared() < eps
            || (p2 - p1).length_squared() < eps
            || (target - p0).length_squared() < eps
        {
            return false;
        }

        let (hinge, root_rotation) = compute_two_bone_rotations(p0, p1, p2, target);
        rotate_absolute(hierarchy, pose, rt.link, hinge);
        rotate_absolute(hierarchy, pose, rt.root, root_rotation);
        pose.compute_joint_children_absolute(hierarchy, rt.root);
        true
    }

    fn synchronize(&mut self) {}
}

// ============================================================================
// CCD 节点
// ============================================================================

#[derive(Clone, Debug)]
pub struct IkCcdDesc {
    pub root: String,
    pub end: String,
    pub target: PointDesc,
    pub weight: f32,
    pub weight_joint: Option<String>,
    pub params: CcdParams,
}

#[derive(Clone, Debug)]
struct IkCcdRuntime {
    chain: Vec<usize>,
    limb_children: Vec<usize>,
    target: ResolvedPoint,
    weight_joint: Option<usize>,
}

pub struct IkCcd {
    pub desc: IkCcdDesc,
    runtime: Option<IkCcdRuntime>,
    warning: SetupWarning,
}

impl IkCcd {
    pub fn new(desc: IkCcdDesc) -> Self {
        Self {
            desc,
            runtime: None,
            warning: SetupWarning::default(),
        }
    }

    fn resolve(&self, hierarchy: &JointHierarchy) -> Result<IkCcdRuntime, String> {
        let root = resolve_required(hierarchy, &self.desc.root)?;
        let end = resolve_required(hierarchy, &self.desc.end)?;
        let chain = hierarchy
            .chain_between(root, end)
            .filter(|c| c.len() >= 2)
            .ok_or_else(|| format!("no chain from '{}' to '{}'", self.desc.root, self.desc.end))?;
        let limb_children = hierarchy.limb_children(root, &chain);
        Ok(IkCcdRuntime {
            chain,
            limb_children,
            target: self.desc.target.resolve(hierarchy)?,
            weight_joint: resolve_optional(hierarchy, &self.desc.weight_joint)?,
        })
    }
}

impl PoseModifier for IkCcd {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        // 链只在第一次或失败后重新解析
        if self.runtime.is_none() {
            match self.resolve(params.hierarchy) {
                Ok(runtime) => {
                    self.runtime = Some(runtime);
                    self.warning.available();
                }
                Err(reason) => {
                    self.warning.missing("IkCcd", &reason);
                    return false;
                }
            }
        }
        self.desc.weight > 0.0
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(rt) = self.runtime.as_ref() else {
            return false;
        };
        let weight = scaled_weight(params.pose, self.desc.weight, rt.weight_joint);
        if weight <= 0.0 {
            return false;
        }
        let target = rt.target.evaluate(params.pose);
        solve_ccd_weighted(
            params.hierarchy,
            params.pose,
            &rt.chain,
            &rt.limb_children,
            target,
            &self.desc.params,
            weight.min(1.0),
        )
        .is_some()
    }

    fn synchronize(&mut self) {}
}
