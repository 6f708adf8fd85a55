//! Tree operations: build, insert, walk, convert back to definitions.

use std::collections::HashMap;

use slotmap::{SecondaryMap, SlotMap};

use super::definition::Element;
use super::node::{ElementData, ElementId};

/// Empty slice constant for returning when a node has no children.
const EMPTY_CHILDREN: &[ElementId] = &[];

/// An element tree backed by a slotmap arena.
///
/// All elements live in a single `SlotMap`. Parent/child relationships are
/// stored in secondary maps; string ids are indexed for O(1) lookup. A tree may
/// have several roots (the top-level elements of a screen).
#[derive(Debug, Clone)]
pub struct ElementTree {
    pub(crate) nodes: SlotMap<ElementId, ElementData>,
    children: SecondaryMap<ElementId, Vec<ElementId>>,
    parent: SecondaryMap<ElementId, ElementId>,
    roots: Vec<ElementId>,
    index: HashMap<String, ElementId>,
}

impl ElementTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            children: SecondaryMap::new(),
            parent: SecondaryMap::new(),
            roots: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Build an arena from nested definitions, preserving order.
    pub fn from_elements(elements: &[Element]) -> Self {
        let mut tree = Self::new();
        for element in elements {
            tree.insert_definition(None, element);
        }
        tree
    }

    fn insert_definition(&mut self, parent: Option<ElementId>, element: &Element) {
        let id = match parent {
            Some(p) => self.insert_child(p, element.to_data()),
            None => self.insert_root(element.to_data()),
        };
        for child in &element.children {
            self.insert_definition(Some(id), child);
        }
    }

    /// Insert a top-level element.
    pub fn insert_root(&mut self, data: ElementData) -> ElementId {
        let id = self.insert_node(data);
        self.roots.push(id);
        id
    }

    /// Insert an element as the last child of `parent`.
    ///
    /// If `parent` is not in the tree the element becomes a root.
    pub fn insert_child(&mut self, parent: ElementId, data: ElementData) -> ElementId {
        if !self.nodes.contains_key(parent) {
            return self.insert_root(data);
        }
        let id = self.insert_node(data);
        self.parent.insert(id, parent);
        if let Some(siblings) = self.children.get_mut(parent) {
            siblings.push(id);
        }
        id
    }

    fn insert_node(&mut self, data: ElementData) -> ElementId {
        let key = data.id.clone();
        let id = self.nodes.insert(data);
        self.children.insert(id, Vec::new());
        // First element wins on duplicate ids.
        self.index.entry(key).or_insert(id);
        id
    }

    /// Get the parent of an element, if it has one.
    pub fn parent(&self, id: ElementId) -> Option<ElementId> {
        self.parent.get(id).copied()
    }

    /// Get the children of an element. Returns an empty slice if the element has
    /// no children or does not exist.
    pub fn children(&self, id: ElementId) -> &[ElementId] {
        self.children
            .get(id)
            .map(Vec::as_slice)
            .unwrap_or(EMPTY_CHILDREN)
    }

    /// Walk from `id` up to its root, collecting ancestor ids.
    ///
    /// The returned vec does **not** include `id` itself; it starts with the
    /// immediate parent and ends at the root.
    pub fn ancestors(&self, id: ElementId) -> Vec<ElementId> {
        let mut result = Vec::new();
        let mut current = id;
        while let Some(p) = self.parent.get(current).copied() {
            result.push(p);
            current = p;
        }
        result
    }

    /// Immutable access to an element's data.
    pub fn get(&self, id: ElementId) -> Option<&ElementData> {
        self.nodes.get(id)
    }

    /// Mutable access to an element's data.
    ///
    /// Changing `data.id` through this handle does not update the id index.
    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut ElementData> {
        self.nodes.get_mut(id)
    }

    /// Top-level elements in order.
    pub fn roots(&self) -> &[ElementId] {
        &self.roots
    }

    /// Number of elements in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the tree is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up an element key by its string id.
    pub fn lookup(&self, id: &str) -> Option<ElementId> {
        self.index.get(id).copied()
    }

    /// Pre-order depth-first traversal starting from `start`.
    pub fn walk_depth_first(&self, start: ElementId) -> Vec<ElementId> {
        let mut result = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if !self.nodes.contains_key(current) {
                continue;
            }
            result.push(current);
            // Push children in reverse so the first child is visited first.
            for &child in self.children(current).iter().rev() {
                stack.push(child);
            }
        }
        result
    }

    /// Pre-order traversal of every root in order.
    pub fn walk(&self) -> Vec<ElementId> {
        self.roots
            .iter()
            .flat_map(|&root| self.walk_depth_first(root))
            .collect()
    }

    /// Convert the arena back into nested definitions.
    pub fn to_elements(&self) -> Vec<Element> {
        self.roots.iter().filter_map(|&r| self.to_element(r)).collect()
    }

    fn to_element(&self, id: ElementId) -> Option<Element> {
        let data = self.nodes.get(id)?;
        let mut element = Element::from_data(data);
        element.children = self
            .children(id)
            .iter()
            .filter_map(|&c| self.to_element(c))
            .collect();
        Some(element)
    }
}

impl Default for ElementTree {
    fn default() -> Self {
        Self::new()
    }
}
