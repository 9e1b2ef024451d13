//! 角色实例：一份姿态 + 一组修改器
//!
//! 单个角色的求值严格按顺序进行；不同角色之间没有共享状态，可以并行。

use std::sync::Arc;

use rayon::prelude::*;

use crate::aim::{AimClipTable, DirectionalBlender, DirectionalKind, PlayingClip};
use crate::modifier::{LimbIk, OperatorQueue, PoseModifier, PoseModifierParams, PoseModifierSetup, PoseModifierStack};
use crate::pose::PoseBuffer;
use crate::skeleton::{JointHierarchy, JointTransform};

pub struct CharacterInstance {
    hierarchy: Arc<JointHierarchy>,
    pose: PoseBuffer,
    /// 角色在世界中的放置
    pub location: JointTransform,
    pub operator_queue: OperatorQueue,
    pub limb_ik: LimbIk,
    pub aim: DirectionalBlender,
    pub look: DirectionalBlender,
    /// 用户配置的修改器，在瞄准/注视之后、肢体 IK 之前执行
    pub modifiers: PoseModifierStack,
    /// 本帧正在播放的瞄准片段
    pub playing: Vec<PlayingClip>,
}

impl CharacterInstance {
    pub fn new(hierarchy: Arc<JointHierarchy>) -> Self {
        let pose = PoseBuffer::from_default(&hierarchy);
        Self {
            hierarchy,
            pose,
            location: JointTransform::IDENTITY,
            operator_queue: OperatorQueue::new(),
            limb_ik: LimbIk::new(),
            aim: DirectionalBlender::new(DirectionalKind::Aim),
            look: DirectionalBlender::new(DirectionalKind::Look),
            modifiers: PoseModifierStack::new(),
            playing: Vec::new(),
        }
    }

    /// 按配置表创建用户修改器
    pub fn with_setup(hierarchy: Arc<JointHierarchy>, setup: &PoseModifierSetup) -> Self {
        let mut instance = Self::new(hierarchy);
        instance.modifiers = setup.create_stack();
        instance
    }

    pub fn hierarchy(&self) -> &JointHierarchy {
        &self.hierarchy
    }

    pub fn pose(&self) -> &PoseBuffer {
        &self.pose
    }

    pub fn pose_mut(&mut self) -> &mut PoseBuffer {
        &mut self.pose
    }

    /// 写入动画混合的结果（相对姿态），下一次 `evaluate` 组合绝对姿态
    pub fn set_relative_pose(&mut self, relative: &[JointTransform]) {
        self.pose.set_relative_pose(relative);
    }

    /// 求值一帧：组合绝对姿态，然后所有修改器依次 Prepare → Execute → Synchronize
    ///
    /// 返回是否有修改器改动了姿态。
    pub fn evaluate(&mut self, time_delta: f32, clips: Option<&AimClipTable>) -> bool {
        let hierarchy: &JointHierarchy = &self.hierarchy;
        self.pose.compute_absolute_pose(hierarchy, 0);

        let mut params = PoseModifierParams::new(hierarchy, &mut self.pose)
            .with_location(self.location)
            .with_time_delta(time_delta);
        params.clips = clips;
        params.playing = &self.playing;

        let mut stages: [&mut dyn PoseModifier; 5] = [
            &mut self.aim,
            &mut self.look,
            &mut self.modifiers,
            &mut self.limb_ik,
            &mut self.operator_queue,
        ];

        for stage in stages.iter_mut() {
            stage.prepare(&params);
        }
        let mut modified = false;
        for stage in stages.iter_mut() {
            modified |= stage.execute(&mut params);
        }
        for stage in stages.iter_mut() {
            stage.synchronize();
        }
        modified
    }
}

/// 并行求值多个角色
pub fn evaluate_characters(characters: &mut [CharacterInstance], time_delta: f32, clips: Option<&AimClipTable>) {
    characters.par_iter_mut().for_each(|character| {
        character.evaluate(time_delta, clips);
    });
}
