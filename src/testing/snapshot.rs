//! Snapshot rendering helpers.
//!
//! Converts an evaluated [`ElementTree`] into an indented plain-text outline
//! suitable for snapshot testing and assertions.

use std::fmt::Write as _;

use crate::dom::{ElementId, ElementTree};

/// Render a tree as one line per element.
///
/// Each line is `<kind> #<id>`, followed by the quoted `text` property when
/// present and `[hidden]` when conditions hid the element. Children are
/// indented by two spaces. Lines are separated by `'\n'`; the final line has
/// no trailing newline.
///
/// # Examples
///
/// ```ignore
/// use screenflow::testing::render_to_string;
///
/// let output = render_to_string(&render.tree);
/// assert_eq!(output, "text #greeting \"Hello AB\"");
/// ```
pub fn render_to_string(tree: &ElementTree) -> String {
    let mut lines = Vec::with_capacity(tree.len());
    for &root in tree.roots() {
        render_node(tree, root, 0, &mut lines);
    }
    lines.join("\n")
}

fn render_node(tree: &ElementTree, id: ElementId, depth: usize, lines: &mut Vec<String>) {
    let Some(data) = tree.get(id) else {
        return;
    };
    let mut line = format!("{:indent$}{} #{}", "", data.kind.as_str(), data.id, indent = depth * 2);
    if let Some(text) = data.text() {
        let _ = write!(line, " {text:?}");
    }
    if !data.visible {
        line.push_str(" [hidden]");
    }
    lines.push(line);
    for &child in tree.children(id) {
        render_node(tree, child, depth + 1, lines);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
