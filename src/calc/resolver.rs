//! Value resolver: turns one step source into a [`Value`].

use std::fmt::Write as _;

use tracing::{debug, trace, warn};

use super::engine::{substitute_guarded, EvalGuard};
use super::step::{ContainerValueType, DatabaseAction, StepSource, ROW_NUMBER_COLUMN};
use crate::dom::{ElementData, ElementId, ElementKind};
use crate::env::EvaluationEnvironment;
use crate::error::{EngineError, QueryError, Result};
use crate::source::{QueryKey, Record};
use crate::value::Value;

/// Resolve a single step source with a fresh recursion guard.
pub fn resolve(source: &StepSource, env: &EvaluationEnvironment<'_>) -> Result<Value> {
    let mut guard = EvalGuard::new(env.config.max_depth);
    resolve_guarded(source, env, &mut guard)
}

/// Resolve a single step source inside an ongoing evaluation.
pub fn resolve_guarded(
    source: &StepSource,
    env: &EvaluationEnvironment<'_>,
    guard: &mut EvalGuard,
) -> Result<Value> {
    match source {
        StepSource::Custom { value } => substitute_guarded(value, env, guard).map(Value::Text),

        StepSource::Element {
            element_id,
            container_value_type,
        } => resolve_element(element_id, *container_value_type, env, guard),

        StepSource::Database { column, action, .. } => {
            let Some((source_ref, filters)) = source.query_source() else {
                return Ok(Value::Empty);
            };
            let key = QueryKey::new(source_ref, filters.to_vec());
            let rows = match env.queries.get(&key) {
                Some(Ok(rows)) => rows,
                Some(Err(err)) => return Err(err.into()),
                None => {
                    return Err(QueryError::NotLoaded {
                        table: key.source.table,
                    }
                    .into())
                }
            };
            let value = match action {
                DatabaseAction::Count => Value::Number(rows.len() as f64),
                DatabaseAction::Value => rows
                    .first()
                    .and_then(|row| cell(row, column.as_deref()))
                    .unwrap_or_default(),
                DatabaseAction::Values => {
                    let joined: Vec<String> = rows
                        .iter()
                        .filter_map(|row| cell(row, column.as_deref()))
                        .map(|v| v.to_string())
                        .collect();
                    Value::Text(joined.join(", "))
                }
            };
            Ok(value)
        }

        StepSource::RepeatingContainer {
            container_id,
            column,
        } => {
            let ctx = env
                .context
                .as_deref()
                .and_then(|ctx| ctx.find(container_id))
                .ok_or_else(|| EngineError::MissingContext {
                    container_id: container_id.clone(),
                })?;
            if column == ROW_NUMBER_COLUMN {
                return Ok(Value::Number((ctx.row_index + 1) as f64));
            }
            Ok(ctx.record.get(column).map(Value::from).unwrap_or_default())
        }

        StepSource::PassedParameter { name } => {
            match env.parameters.as_ref().and_then(|p| p.get(name)) {
                Some(raw) => substitute_guarded(raw, env, guard).map(Value::Text),
                None => {
                    trace!(parameter = %name, "parameter not passed");
                    Ok(Value::Empty)
                }
            }
        }

        StepSource::Timestamp { format } => {
            let now = env.facts.now;
            let Some(format) = format.as_deref().or(env.config.timestamp_format.as_deref()) else {
                return Ok(Value::Number(now.timestamp_millis() as f64));
            };
            let mut out = String::new();
            if write!(out, "{}", now.format(format)).is_err() {
                warn!(%format, "invalid timestamp format, using epoch milliseconds");
                return Ok(Value::Number(now.timestamp_millis() as f64));
            }
            Ok(Value::Text(out))
        }

        StepSource::ScreenWidth => Ok(Value::Number(f64::from(env.facts.viewport.width))),
        StepSource::ScreenHeight => Ok(Value::Number(f64::from(env.facts.viewport.height))),
    }
}

/// Column `column` of a record, or its first column.
fn cell(record: &Record, column: Option<&str>) -> Option<Value> {
    let json = match column {
        Some(name) => record.get(name)?,
        None => record.values().next()?,
    };
    Some(Value::from(json))
}

fn resolve_element(
    element_id: &str,
    value_type: Option<ContainerValueType>,
    env: &EvaluationEnvironment<'_>,
    guard: &mut EvalGuard,
) -> Result<Value> {
    let Some((key, data)) = env.tree.resolve_reference(element_id, env.context.as_ref()) else {
        debug!(element = element_id, "referenced element not found");
        return Ok(Value::Empty);
    };

    if data.container_type.is_selectable() {
        let index = env.selections.get(&data.id, env.tree);
        return match value_type.unwrap_or_default() {
            ContainerValueType::ActiveTabOrder => Ok(Value::Number((index + 1) as f64)),
            ContainerValueType::ActiveTabValue => active_value(key, data, index, env, guard),
        };
    }

    if data.kind == ElementKind::Input {
        let current = env
            .inputs
            .current_value(&data.id)
            .or_else(|| data.properties.get_text("value"))
            .unwrap_or_default();
        return Ok(Value::Text(current));
    }

    match data.text() {
        Some(text) => substitute_guarded(&text, &env.scoped_to(data), guard).map(Value::Text),
        None => Ok(Value::Empty),
    }
}

/// Text of the marked value element under the active child.
fn active_value(
    key: ElementId,
    container: &ElementData,
    index: usize,
    env: &EvaluationEnvironment<'_>,
    guard: &mut EvalGuard,
) -> Result<Value> {
    let Some(marker) = container.container_type.marker_key() else {
        return Ok(Value::Empty);
    };
    let marked = env
        .tree
        .children(key)
        .get(index)
        .and_then(|&child| env.tree.first_marked(child, marker))
        .and_then(|id| env.tree.get(id));
    let Some(marked) = marked else {
        return Ok(Value::Empty);
    };
    match marked.text() {
        Some(text) => substitute_guarded(&text, &env.scoped_to(marked), guard).map(Value::Text),
        None => Ok(Value::Empty),
    }
}
