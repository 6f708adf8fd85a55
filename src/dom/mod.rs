//! Element arena: slotmap-backed element tree, definitions, and queries.

pub mod definition;
pub mod node;
pub mod query;
pub mod tree;

pub use definition::{AppDefinition, Element, ScreenDefinition};
pub use node::{
    ContainerType, ContentType, ElementData, ElementId, ElementKind, PageConfig, Parameters,
    Properties, RenderType, RepeatingConfig, RepeatingContext,
};
pub use tree::ElementTree;
