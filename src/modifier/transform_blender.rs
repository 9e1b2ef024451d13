//! 变换混合：被驱动关节的绝对变换由一组目标关节加权得到

use glam::{Quat, Vec3};

use super::{resolve_optional, resolve_required, scaled_weight, PoseModifier, PoseModifierParams, SetupWarning};
use crate::skeleton::JointTransform;

#[derive(Clone, Debug)]
pub struct BlendTargetDesc {
    pub enabled: bool,
    pub joint: String,
    pub weight: f32,
    pub weight_joint: Option<String>,
}

impl BlendTargetDesc {
    pub fn new(joint: &str, weight: f32) -> Self {
        Self {
            enabled: true,
            joint: joint.to_string(),
            weight,
            weight_joint: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransformBlenderDesc {
    pub node: String,
    /// 没有目标生效时的基准；未设置则使用被驱动关节自身
    pub default_target: Option<String>,
    /// 基准关节局部空间中的位置偏移
    pub default_offset: Vec3,
    pub targets: Vec<BlendTargetDesc>,
    /// true：按顺序逐个 nlerp；false：加权平均
    pub ordered: bool,
    pub weight: f32,
}

impl Default for TransformBlenderDesc {
    fn default() -> Self {
        Self {
            node: String::new(),
            default_target: None,
            default_offset: Vec3::ZERO,
            targets: Vec::new(),
            ordered: false,
            weight: 1.0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct BlendTarget {
    joint: usize,
    weight_joint: Option<usize>,
    weight: f32,
}

#[derive(Clone, Debug)]
struct BlenderRuntime {
    node: usize,
    default_target: Option<usize>,
    targets: Vec<BlendTarget>,
}

pub struct TransformBlender {
    pub desc: TransformBlenderDesc,
    runtime: Option<BlenderRuntime>,
    warning: SetupWarning,
}

impl TransformBlender {
    pub fn new(desc: TransformBlenderDesc) -> Self {
        Self {
            desc,
            runtime: None,
            warning: SetupWarning::default(),
        }
    }

    fn resolve(&self, params: &PoseModifierParams<'_>) -> Result<BlenderRuntime, String> {
        let hierarchy = params.hierarchy;
        let mut targets = Vec::with_capacity(self.desc.targets.len());
        for target in self.desc.targets.iter().filter(|t| t.enabled) {
            targets.push(BlendTarget {
                joint: resolve_required(hierarchy, &target.joint)?,
                weight_joint: resolve_optional(hierarchy, &target.weight_joint)?,
                weight: target.weight,
            });
        }
        Ok(BlenderRuntime {
            node: resolve_required(hierarchy, &self.desc.node)?,
            default_target: resolve_optional(hierarchy, &self.desc.default_target)?,
            targets,
        })
    }
}

impl PoseModifier for TransformBlender {
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        if self.runtime.is_none() {
            match self.resolve(params) {
                Ok(runtime) => {
                    self.runtime = Some(runtime);
                    self.warning.available();
                }
                Err(reason) => {
                    self.warning.missing("TransformBlender", &reason);
                    return false;
                }
            }
        }
        self.desc.weight > 0.0 && self.runtime.as_ref().is_some_and(|rt| !rt.targets.is_empty())
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let Some(rt) = self.runtime.as_ref() else {
            return false;
        };
        if rt.targets.is_empty() {
            return false;
        }
        let pose = &mut *params.pose;
        let Some(driven) = pose.absolute(rt.node).copied() else {
            return false;
        };
        let mut base = rt
            .default_target
            .and_then(|j| pose.absolute(j))
            .copied()
            .unwrap_or(driven);
        base.translation = base.transform_point(self.desc.default_offset);

        let weighted = rt.targets.iter().filter_map(|t| {
            let weight = scaled_weight(pose, t.weight, t.weight_joint);
            let transform = pose.absolute(t.joint)?;
            (weight > 0.0).then_some((*transform, weight))
        });

        let blended = if self.desc.ordered {
            weighted.fold(base, |acc, (transform, weight)| acc.nlerp(&transform, weight))
        } else {
            let mut translation = Vec3::ZERO;
            let mut rotation = Quat::from_xyzw(0.0, 0.0, 0.0, 0.0);
            let mut sum = 0.0;
            for (transform, weight) in weighted {
                translation += transform.translation * weight;
                let sign = if transform.rotation.dot(base.rotation) < 0.0 { -1.0 } else { 1.0 };
                rotation = rotation + transform.rotation * (weight * sign);
                sum += weight;
            }
            if sum > 0.0 {
                let average = JointTransform::new(rotation.normalize(), translation / sum);
                base.nlerp(&average, sum.clamp(0.0, 1.0))
            } else {
                base
            }
        };

        let result = driven.nlerp(&blended, self.desc.weight);
        pose.set_joint_absolute_transform(params.hierarchy, rt.node, result)
    }

    fn synchronize(&mut self) {}
}
