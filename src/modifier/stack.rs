//! 修改器栈与修改器配置表

use super::{PoseModifier, PoseModifierParams};

/// 有序的修改器组合，每个阶段按顺序分发给所有子修改器
#[derive(Default)]
pub struct PoseModifierStack {
    modifiers: Vec<Box<dyn PoseModifier>>,
}

impl PoseModifierStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, modifier: Box<dyn PoseModifier>) {
        self.modifiers.push(modifier);
    }

    pub fn clear(&mut self) {
        self.modifiers.clear();
    }

    pub fn len(&self) -> usize {
        self.modifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modifiers.is_empty()
    }
}

impl PoseModifier for PoseModifierStack {
    /// 任一子修改器生效即返回 true，所有子修改器都会被调用
    fn prepare(&mut self, params: &PoseModifierParams<'_>) -> bool {
        let mut any = false;
        for modifier in &mut self.modifiers {
            any |= modifier.prepare(params);
        }
        any
    }

    fn execute(&mut self, params: &mut PoseModifierParams<'_>) -> bool {
        let mut any = false;
        for modifier in &mut self.modifiers {
            any |= modifier.execute(params);
        }
        any
    }

    fn synchronize(&mut self) {
        for modifier in &mut self.modifiers {
            modifier.synchronize();
        }
    }
}

// ============================================================================
// 配置表
// ============================================================================

/// 配置表中的一项
pub struct PoseModifierSetupEntry {
    pub enabled: bool,
    /// 构造一个新的修改器实例
    pub factory: Box<dyn Fn() -> Box<dyn PoseModifier> + Send + Sync>,
}

/// 修改器配置表：按顺序描述一个角色要用的修改器
///
/// 每个角色实例调用 `create_stack` 得到自己的一份（修改器带有每实例状态）。
#[derive(Default)]
pub struct PoseModifierSetup {
    entries: Vec<PoseModifierSetupEntry>,
}

impl PoseModifierSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F, M>(&mut self, enabled: bool, factory: F) -> &mut Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: PoseModifier + 'static,
    {
        self.entries.push(PoseModifierSetupEntry {
            enabled,
            factory: Box::new(move || Box::new(factory()) as Box<dyn PoseModifier>),
        });
        self
    }

    pub fn entries(&self) -> &[PoseModifierSetupEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [PoseModifierSetupEntry] {
        &mut self.entries
    }

    /// 用启用的项构造修改器栈
    pub fn create_stack(&self) -> PoseModifierStack {
        let mut stack = PoseModifierStack::new();
        for entry in self.entries.iter().filter(|e| e.enabled) {
            stack.push((entry.factory)());
        }
        stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pose::tests::branching_hierarchy;
    use crate::pose::PoseBuffer;
    use std::sync::{Arc, Mutex};

    struct Recorder {
        id: u32,
        log: Arc<Mutex<Vec<(u32, &'static str)>>>,
        active: bool,
    }

    impl PoseModifier for Recorder {
        fn prepare(&mut self, _params: &PoseModifierParams<'_>) -> bool {
            self.log.lock().unwrap().push((self.id, "prepare"));
            self.active
        }

        fn execute(&mut self, _params: &mut PoseModifierParams<'_>) -> bool {
            self.log.lock().unwrap().push((self.id, "execute"));
            self.active
        }

        fn synchronize(&mut self) {
            self.log.lock().unwrap().push((self.id, "synchronize"));
        }
    }

    #[test]
    fn test_stack_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = PoseModifierStack::new();
        for id in 0..2 {
            stack.push(Box::new(Recorder { id, log: log.clone(), active: id == 1 }));
        }

        let h = branching_hierarchy();
        let mut pose = PoseBuffer::from_default(&h);
        let mut params = PoseModifierParams::new(&h, &mut pose);
        assert!(stack.prepare(&params));
        assert!(stack.execute(&mut params));
        stack.synchronize();

        let log = log.lock().unwrap();
        assert_eq!(
            *log,
            vec![
                (0, "prepare"),
                (1, "prepare"),
                (0, "execute"),
                (1, "execute"),
                (0, "synchronize"),
                (1, "synchronize"),
            ]
        );
    }

    #[test]
    fn test_setup_skips_disabled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut setup = PoseModifierSetup::new();
        let l1 = log.clone();
        let l2 = log.clone();
        setup.add(true, move || Recorder { id: 0, log: l1.clone(), active: true });
        setup.add(false, move || Recorder { id: 1, log: l2.clone(), active: true });
        let stack = setup.create_stack();
        assert_eq!(stack.len(), 1);

        let mut stack = stack;
        stack.clear();
        assert!(stack.is_empty());
    }
}
