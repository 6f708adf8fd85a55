//! Serializable screen definitions handed over by the persistence layer.
//!
//! These are plain owned trees. The engine never mutates a definition during
//! evaluation; it builds a fresh [`ElementTree`](super::ElementTree) instead.

use serde::{Deserialize, Serialize};

use super::node::{
    ContainerType, ContentType, ElementData, ElementKind, PageConfig, Properties, RenderType,
    RepeatingConfig,
};
use crate::calc::CalculationTable;
use crate::condition::Condition;
use crate::error::ConfigError;

/// One element of a screen definition, with its children.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Element>,
    #[serde(default)]
    pub render_type: RenderType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub content_type: ContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeating_config: Option<RepeatingConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_config: Option<PageConfig>,
    #[serde(default)]
    pub container_type: ContainerType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
}

impl Element {
    /// A basic container.
    pub fn container(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Container,
            ..Self::default()
        }
    }

    /// A text element with the given text.
    pub fn text(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Text,
            properties: Properties::new().with("text", text.into()),
            ..Self::default()
        }
    }

    /// An input element.
    pub fn input(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ElementKind::Input,
            ..Self::default()
        }
    }

    /// Append a child (builder).
    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    /// Append several children (builder).
    pub fn with_children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    /// Set a property (builder).
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key, value);
        self
    }

    /// Make visibility conditional on the given conditions (builder).
    pub fn with_conditions(mut self, conditions: impl IntoIterator<Item = Condition>) -> Self {
        self.render_type = RenderType::Conditional;
        self.conditions.extend(conditions);
        self
    }

    /// Bind this container to a table, one instance per row (builder).
    pub fn repeating(mut self, config: RepeatingConfig) -> Self {
        self.content_type = ContentType::Repeating;
        self.repeating_config = Some(config);
        self
    }

    /// Embed another screen in this container (builder).
    pub fn page(mut self, config: PageConfig) -> Self {
        self.content_type = ContentType::Page;
        self.page_config = Some(config);
        self
    }

    /// Set the container type (builder).
    pub fn with_container_type(mut self, container_type: ContainerType) -> Self {
        self.container_type = container_type;
        self
    }

    /// Depth-first search for an element by id.
    pub fn find(&self, id: &str) -> Option<&Element> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    /// Depth-first search for an element by id, mutably.
    pub fn find_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Arena data for this element, without its children.
    pub fn to_data(&self) -> ElementData {
        ElementData {
            id: self.id.clone(),
            original_id: self.original_id.clone(),
            kind: self.kind,
            properties: self.properties.clone(),
            render_type: self.render_type,
            conditions: self.conditions.clone(),
            content_type: self.content_type,
            repeating_config: self.repeating_config.clone(),
            page_config: self.page_config.clone(),
            container_type: self.container_type,
            ..ElementData::new(self.id.clone(), self.kind)
        }
    }

    /// Definition form of arena data, without children.
    pub fn from_data(data: &ElementData) -> Self {
        Self {
            id: data.id.clone(),
            kind: data.kind,
            properties: data.properties.clone(),
            children: Vec::new(),
            render_type: data.render_type,
            conditions: data.conditions.clone(),
            content_type: data.content_type,
            repeating_config: data.repeating_config.clone(),
            page_config: data.page_config.clone(),
            container_type: data.container_type,
            original_id: data.original_id.clone(),
        }
    }
}

/// A screen: an ordered list of top-level elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenDefinition {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub elements: Vec<Element>,
}

impl ScreenDefinition {
    pub fn new(id: impl Into<String>, elements: Vec<Element>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            elements,
        }
    }

    /// Depth-first search across all top-level elements.
    pub fn find(&self, id: &str) -> Option<&Element> {
        self.elements.iter().find_map(|el| el.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find_map(|el| el.find_mut(id))
    }
}

/// An app: its screens and its global calculation table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    #[serde(default)]
    pub screens: Vec<ScreenDefinition>,
    #[serde(default)]
    pub calculations: CalculationTable,
}

impl AppDefinition {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an app definition from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Add a screen (builder).
    pub fn with_screen(mut self, screen: ScreenDefinition) -> Self {
        self.screens.push(screen);
        self
    }

    /// Replace the calculation table (builder).
    pub fn with_calculations(mut self, calculations: CalculationTable) -> Self {
        self.calculations = calculations;
        self
    }

    pub fn screen(&self, id: &str) -> Option<&ScreenDefinition> {
        self.screens.iter().find(|s| s.id == id)
    }

    pub fn screen_mut(&mut self, id: &str) -> Option<&mut ScreenDefinition> {
        self.screens.iter_mut().find(|s| s.id == id)
    }

    /// Find an element by id in any screen.
    pub fn find_element(&self, id: &str) -> Option<&Element> {
        self.screens.iter().find_map(|s| s.find(id))
    }

    pub fn find_element_mut(&mut self, id: &str) -> Option<&mut Element> {
        self.screens.iter_mut().find_map(|s| s.find_mut(id))
    }
}
