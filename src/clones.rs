use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::effect::Effect;
use crate::types::{TimeValue, ViewIdx};

/// Address of one render clone within a tree render: the node it snapshots
/// and the (time, view) the snapshot was taken for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderCloneKey {
    pub node: Uuid,
    pub time: TimeValue,
    pub view: ViewIdx,
}

struct RegisteredClone {
    main: Arc<dyn Effect>,
    clone: Arc<dyn Effect>,
}

/// Per-tree-render store of effect parameter snapshots, so concurrent tree
/// renders never observe each other's parameter mutations. Clones are
/// read-mostly during execution; the registry is only touched during
/// planning and teardown.
#[derive(Default)]
pub(crate) struct CloneRegistry {
    clones: HashMap<RenderCloneKey, RegisteredClone>,
}

impl CloneRegistry {
    /// Idempotent per key: the second call for the same key returns the clone
    /// registered by the first.
    pub(crate) fn get_or_create(
        &mut self,
        main: &Arc<dyn Effect>,
        key: RenderCloneKey,
    ) -> Arc<dyn Effect> {
        if let Some(registered) = self.clones.get(&key) {
            return registered.clone.clone();
        }
        let clone = main.create_render_clone(&key);
        debug_assert!(clone.is_render_clone());
        debug!("cloned {} for t={} v={}", main.label(), key.time, key.view.0);
        self.clones.insert(
            key,
            RegisteredClone {
                main: main.clone(),
                clone: clone.clone(),
            },
        );
        clone
    }

    pub(crate) fn register(
        &mut self,
        main: &Arc<dyn Effect>,
        key: RenderCloneKey,
        clone: Arc<dyn Effect>,
    ) {
        self.clones.entry(key).or_insert(RegisteredClone {
            main: main.clone(),
            clone,
        });
    }

    /// Ask each owning effect to drop the clone bound to this tree render,
    /// then release the registry's references.
    pub(crate) fn cleanup(&mut self) {
        for (key, registered) in self.clones.drain() {
            registered.main.remove_render_clone(&key);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.clones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::test_stubs::StubEffect;

    fn key(effect: &Arc<dyn Effect>, time: f64) -> RenderCloneKey {
        RenderCloneKey {
            node: effect.node_id(),
            time: TimeValue::from(time),
            view: ViewIdx(0),
        }
    }

    #[test]
    fn second_call_returns_existing_clone() {
        let effect = StubEffect::new_dyn("blur");
        let mut registry = CloneRegistry::default();

        let first = registry.get_or_create(&effect, key(&effect, 1.0));
        let second = registry.get_or_create(&effect, key(&effect, 1.0));
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn distinct_times_get_distinct_clones() {
        let effect = StubEffect::new_dyn("blur");
        let mut registry = CloneRegistry::default();

        let at_one = registry.get_or_create(&effect, key(&effect, 1.0));
        let at_two = registry.get_or_create(&effect, key(&effect, 2.0));
        assert!(!Arc::ptr_eq(&at_one, &at_two));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn cleanup_empties_the_registry() {
        let effect = StubEffect::new_dyn("blur");
        let mut registry = CloneRegistry::default();
        registry.get_or_create(&effect, key(&effect, 1.0));

        registry.cleanup();
        assert_eq!(registry.len(), 0);
    }
}
