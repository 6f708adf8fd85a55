//! Element queries: by id, by definition id, by predicate, marked descendants.

use std::rc::Rc;

use super::node::{ElementData, ElementId, RepeatingContext};
use super::tree::ElementTree;

impl ElementTree {
    /// Find an element by its (possibly rewritten) id.
    pub fn query_by_id(&self, id: &str) -> Option<(ElementId, &ElementData)> {
        let key = self.lookup(id)?;
        self.get(key).map(|data| (key, data))
    }

    /// Resolve a definition id the way a step inside `context` sees it.
    ///
    /// An exact id match wins. Otherwise, among the expanded copies of that
    /// definition, the one sharing `context` (the same repeating instance) is
    /// preferred, then the first copy in tree order.
    pub fn resolve_reference(
        &self,
        id: &str,
        context: Option<&Rc<RepeatingContext>>,
    ) -> Option<(ElementId, &ElementData)> {
        if let Some(found) = self.query_by_id(id) {
            return Some(found);
        }
        let copies = self.query_all(|data| data.original_id.as_deref() == Some(id));
        let chosen = context
            .and_then(|ctx| {
                copies.iter().copied().find(|&key| {
                    self.get(key)
                        .and_then(|data| data.context())
                        .is_some_and(|own| Rc::ptr_eq(own, ctx))
                })
            })
            .or_else(|| copies.first().copied())?;
        self.get(chosen).map(|data| (chosen, data))
    }

    /// All elements matching a predicate, in tree order.
    pub fn query_all(&self, predicate: impl Fn(&ElementData) -> bool) -> Vec<ElementId> {
        self.walk()
            .into_iter()
            .filter(|&id| self.get(id).is_some_and(&predicate))
            .collect()
    }

    /// First element at or below `start` (pre-order) carrying the flag `marker`.
    pub fn first_marked(&self, start: ElementId, marker: &str) -> Option<ElementId> {
        self.walk_depth_first(start)
            .into_iter()
            .find(|&id| self.get(id).is_some_and(|d| d.properties.is_marked(marker)))
    }
}
