//! Repeating and page expansion.
//!
//! Builds a fresh [`ElementTree`] from definition elements. A repeating
//! container is replaced by one sibling instance per row, and every element
//! under an instance gets a rewritten id plus the instance's row context. A
//! page container gets the elements of another screen as its children. The
//! definitions are only read; every output element is an owned copy.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::dom::{
    ContentType, Element, ElementData, ElementId, ElementTree, Parameters, RepeatingContext,
    ScreenDefinition,
};
use crate::error::{EngineError, QueryError};
use crate::source::{QueryCache, QueryKey, Record, Rows};

// ---------------------------------------------------------------------------
// RowData
// ---------------------------------------------------------------------------

/// Rows available to repeating containers during expansion.
pub trait RowData {
    /// Rows for a repeating container, `None` if nothing was loaded for it.
    fn rows_for(&self, container: &Element) -> Option<Result<Rows, QueryError>>;
}

impl RowData for QueryCache {
    fn rows_for(&self, container: &Element) -> Option<Result<Rows, QueryError>> {
        let config = container.repeating_config.as_ref()?;
        self.get(&QueryKey::new(config.source.clone(), config.filters.clone()))
    }
}

/// Rows keyed by container id.
impl RowData for HashMap<String, Vec<Record>> {
    fn rows_for(&self, container: &Element) -> Option<Result<Rows, QueryError>> {
        self.get(&container.id).map(|rows| Ok(Rc::new(rows.clone())))
    }
}

// ---------------------------------------------------------------------------
// Expansion
// ---------------------------------------------------------------------------

/// Expanded tree plus the failures met on the way, keyed by element id.
#[derive(Debug, Clone, Default)]
pub struct Expansion {
    pub tree: ElementTree,
    pub errors: Vec<(String, EngineError)>,
}

/// Expand `elements` against `data` with default settings.
pub fn expand<D: RowData + ?Sized>(elements: &[Element], data: &D) -> Expansion {
    Expander::new(data).run(elements)
}

/// What is in effect while expanding one subtree.
#[derive(Debug, Clone, Default)]
struct Scope {
    /// Appended to every element id.
    suffix: String,
    context: Option<Rc<RepeatingContext>>,
    parameters: Option<Rc<Parameters>>,
    /// Screens currently being embedded, outermost first.
    pages: Vec<String>,
}

/// Configurable expansion pass.
pub struct Expander<'a, D: RowData + ?Sized> {
    data: &'a D,
    screens: &'a [ScreenDefinition],
    root_screen: Option<String>,
    max_depth: usize,
    tree: ElementTree,
    errors: Vec<(String, EngineError)>,
}

impl<'a, D: RowData + ?Sized> Expander<'a, D> {
    pub fn new(data: &'a D) -> Self {
        Self {
            data,
            screens: &[],
            root_screen: None,
            max_depth: 32,
            tree: ElementTree::new(),
            errors: Vec::new(),
        }
    }

    /// Screens that page containers may embed (builder).
    pub fn with_screens(mut self, screens: &'a [ScreenDefinition]) -> Self {
        self.screens = screens;
        self
    }

    /// The screen being expanded, so a page embedding it is a cycle (builder).
    pub fn within_screen(mut self, screen_id: impl Into<String>) -> Self {
        self.root_screen = Some(screen_id.into());
        self
    }

    /// Maximum nesting of embedded pages (builder).
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn run(mut self, elements: &[Element]) -> Expansion {
        let scope = Scope {
            pages: self.root_screen.iter().cloned().collect(),
            ..Scope::default()
        };
        for element in elements {
            self.expand_into(None, element, &scope);
        }
        debug!(
            elements = self.tree.len(),
            errors = self.errors.len(),
            "expansion finished"
        );
        Expansion {
            tree: self.tree,
            errors: self.errors,
        }
    }

    fn expand_into(&mut self, parent: Option<ElementId>, element: &Element, scope: &Scope) {
        match element.content_type {
            ContentType::Repeating => self.expand_repeating(parent, element, scope),
            ContentType::Page => self.expand_page(parent, element, scope),
            ContentType::Fixed => {
                let data = copy(element, scope, format!("{}{}", element.id, scope.suffix));
                let key = self.insert(parent, data);
                for child in &element.children {
                    self.expand_into(Some(key), child, scope);
                }
            }
        }
    }

    fn expand_repeating(&mut self, parent: Option<ElementId>, element: &Element, scope: &Scope) {
        let scoped_id = format!("{}{}", element.id, scope.suffix);
        let rows = match self.data.rows_for(element) {
            Some(Ok(rows)) => rows,
            Some(Err(err)) => {
                warn!(container = %scoped_id, error = %err, "row fetch failed, rendering empty");
                self.errors.push((scoped_id.clone(), err.into()));
                Rows::default()
            }
            None => {
                debug!(container = %scoped_id, "no rows loaded");
                Rows::default()
            }
        };

        if rows.is_empty() {
            self.insert(parent, copy(element, scope, scoped_id));
            return;
        }

        let definition_id = element
            .original_id
            .clone()
            .unwrap_or_else(|| element.id.clone());
        for (i, record) in rows.iter().enumerate() {
            let context = Rc::new(RepeatingContext {
                container_id: definition_id.clone(),
                record: record.clone(),
                row_index: i,
                parent: scope.context.clone(),
            });
            let mut data = copy(
                element,
                scope,
                format!("{}_instance_{}{}", element.id, i, scope.suffix),
            );
            data.original_id = Some(definition_id.clone());
            data.repeating_context = Some(Rc::clone(&context));
            let key = self.insert(parent, data);

            let child_scope = Scope {
                suffix: format!("_repeat_{}_{}{}", element.id, i, scope.suffix),
                context: Some(context),
                ..scope.clone()
            };
            for child in &element.children {
                self.expand_into(Some(key), child, &child_scope);
            }
        }
    }

    fn expand_page(&mut self, parent: Option<ElementId>, element: &Element, scope: &Scope) {
        let scoped_id = format!("{}{}", element.id, scope.suffix);
        let key = self.insert(parent, copy(element, scope, scoped_id.clone()));
        let Some(config) = &element.page_config else {
            return;
        };

        if scope.pages.iter().any(|p| *p == config.screen_id) {
            warn!(container = %scoped_id, screen = %config.screen_id, "page cycle");
            self.errors.push((
                scoped_id,
                EngineError::PageCycle {
                    screen_id: config.screen_id.clone(),
                },
            ));
            return;
        }
        if scope.pages.len() >= self.max_depth {
            self.errors.push((
                scoped_id,
                EngineError::DepthExceeded {
                    limit: self.max_depth,
                },
            ));
            return;
        }
        let Some(screen) = self.screens.iter().find(|s| s.id == config.screen_id) else {
            self.errors.push((
                scoped_id,
                EngineError::MissingScreen {
                    screen_id: config.screen_id.clone(),
                },
            ));
            return;
        };

        let mut pages = scope.pages.clone();
        pages.push(config.screen_id.clone());
        let child_scope = Scope {
            suffix: format!("_page_{}{}", element.id, scope.suffix),
            context: scope.context.clone(),
            parameters: Some(Rc::new(config.parameters.clone())),
            pages,
        };
        for child in &screen.elements {
            self.expand_into(Some(key), child, &child_scope);
        }
    }

    fn insert(&mut self, parent: Option<ElementId>, data: ElementData) -> ElementId {
        match parent {
            Some(p) => self.tree.insert_child(p, data),
            None => self.tree.insert_root(data),
        }
    }
}

/// Arena copy of `element` under `scope`, with the given id.
fn copy(element: &Element, scope: &Scope, id: String) -> ElementData {
    let mut data = element.to_data();
    if id != element.id && data.original_id.is_none() {
        data.original_id = Some(element.id.clone());
    }
    data.id = id;
    data.parent_repeating_context = scope.context.clone();
    data.parameters = scope.parameters.clone();
    data
}
