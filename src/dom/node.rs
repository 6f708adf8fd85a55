//! Node types: ElementId, ElementData, properties, and row contexts.

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::condition::Condition;
use crate::source::{Filter, Record, SourceRef};

new_key_type! {
    /// Arena key for an element. Copy, lightweight (u64).
    pub struct ElementId;
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Element variant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    #[default]
    Container,
    Text,
    Input,
}

impl ElementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Container => "container",
            ElementKind::Text => "text",
            ElementKind::Input => "input",
        }
    }
}

/// Whether visibility is fixed or decided by conditions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderType {
    #[default]
    Fixed,
    Conditional,
}

/// What a container's children come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    #[default]
    Fixed,
    /// One instance per row of an external query.
    Repeating,
    /// The elements of another screen.
    Page,
}

/// Container behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    #[default]
    Basic,
    Tabs,
    Slider,
}

impl ContainerType {
    /// Whether the container keeps an active child selection.
    pub fn is_selectable(self) -> bool {
        matches!(self, ContainerType::Tabs | ContainerType::Slider)
    }

    /// Property holding the static default selection.
    pub fn active_key(self) -> Option<&'static str> {
        match self {
            ContainerType::Tabs => Some("activeTab"),
            ContainerType::Slider => Some("activeSlide"),
            ContainerType::Basic => None,
        }
    }

    /// Property marking the descendant that carries a child's value text.
    pub fn marker_key(self) -> Option<&'static str> {
        match self {
            ContainerType::Tabs => Some("isTabValue"),
            ContainerType::Slider => Some("isSlideText"),
            ContainerType::Basic => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// Bag of style and content attributes, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(serde_json::Map<String, serde_json::Value>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a property (builder).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Text form of a scalar property. Arrays and objects have none.
    pub fn get_text(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Whether a flag property is set (`true` or `"true"`).
    pub fn is_marked(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }

    /// Overlay every entry of `other` onto this bag.
    pub fn merge(&mut self, other: &Properties) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Keys whose values are strings.
    pub fn text_keys(&self) -> Vec<String> {
        self.0
            .iter()
            .filter(|(_, v)| v.is_string())
            .map(|(k, _)| k.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Container configs
// ---------------------------------------------------------------------------

/// Binding of a repeating container to an external table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepeatingConfig {
    pub source: SourceRef,
    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// Named values handed to an embedded page.
pub type Parameters = BTreeMap<String, String>;

/// Binding of a page container to another screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageConfig {
    pub screen_id: String,
    #[serde(default)]
    pub parameters: Parameters,
}

// ---------------------------------------------------------------------------
// RepeatingContext
// ---------------------------------------------------------------------------

/// Row data attached to one expanded instance of a repeating container.
///
/// Contexts chain outwards through `parent`, so an element inside nested
/// repeating containers can reach the row of any enclosing one.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatingContext {
    /// Original (definition) id of the repeating container.
    pub container_id: String,
    pub record: Record,
    pub row_index: usize,
    pub parent: Option<Rc<RepeatingContext>>,
}

impl RepeatingContext {
    /// Walk this context and its ancestors for the one bound to `container_id`.
    pub fn find(&self, container_id: &str) -> Option<&RepeatingContext> {
        let mut current = Some(self);
        while let Some(ctx) = current {
            if ctx.container_id == container_id {
                return Some(ctx);
            }
            current = ctx.parent.as_deref();
        }
        None
    }
}

// ---------------------------------------------------------------------------
// ElementData
// ---------------------------------------------------------------------------

/// Data associated with a single element in the arena.
#[derive(Debug, Clone)]
pub struct ElementData {
    /// Element id; rewritten for expanded copies.
    pub id: String,
    /// Definition id this element was copied from, if it was rewritten.
    pub original_id: Option<String>,
    pub kind: ElementKind,
    pub properties: Properties,
    pub render_type: RenderType,
    pub conditions: Vec<Condition>,
    pub content_type: ContentType,
    pub repeating_config: Option<RepeatingConfig>,
    pub page_config: Option<PageConfig>,
    pub container_type: ContainerType,
    /// Set on repeating instances.
    pub repeating_context: Option<Rc<RepeatingContext>>,
    /// Innermost enclosing row context.
    pub parent_repeating_context: Option<Rc<RepeatingContext>>,
    /// Parameters of the innermost enclosing page.
    pub parameters: Option<Rc<Parameters>>,
    /// Result of condition evaluation.
    pub visible: bool,
    /// Index of the condition that made this element visible.
    pub matched_condition: Option<usize>,
}

impl ElementData {
    /// Create element data with the given id and kind and default settings.
    pub fn new(id: impl Into<String>, kind: ElementKind) -> Self {
        Self {
            id: id.into(),
            original_id: None,
            kind,
            properties: Properties::new(),
            render_type: RenderType::Fixed,
            conditions: Vec::new(),
            content_type: ContentType::Fixed,
            repeating_config: None,
            page_config: None,
            container_type: ContainerType::Basic,
            repeating_context: None,
            parent_repeating_context: None,
            parameters: None,
            visible: true,
            matched_condition: None,
        }
    }

    /// Set a property (builder).
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Set the container type (builder).
    pub fn with_container_type(mut self, container_type: ContainerType) -> Self {
        self.container_type = container_type;
        self
    }

    /// The id of the definition this element came from.
    pub fn definition_id(&self) -> &str {
        self.original_id.as_deref().unwrap_or(&self.id)
    }

    /// The row context visible to this element: its own, else the enclosing one.
    pub fn context(&self) -> Option<&Rc<RepeatingContext>> {
        self.repeating_context
            .as_ref()
            .or(self.parent_repeating_context.as_ref())
    }

    /// The `text` property, if present.
    pub fn text(&self) -> Option<String> {
        self.properties.get_text("text")
    }
}
