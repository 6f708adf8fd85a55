//! Operator reducer: folds one resolved value into the running result.

use crate::calc::step::ConditionOperation;
use crate::error::{EngineError, Result};
use crate::value::Value;

/// Combine `acc` with `next` under `op`.
///
/// Arithmetic coerces both sides to numbers (non-numeric is `0`),
/// `concatenate` to text, logic to booleans. Comparisons are numeric when both
/// sides are numeric and trimmed-text otherwise.
pub fn reduce(acc: &Value, next: &Value, op: ConditionOperation) -> Result<Value> {
    let value = match op {
        ConditionOperation::Add => Value::Number(acc.to_number() + next.to_number()),
        ConditionOperation::Subtract => Value::Number(acc.to_number() - next.to_number()),
        ConditionOperation::Multiply => Value::Number(acc.to_number() * next.to_number()),
        ConditionOperation::Divide => {
            let divisor = next.to_number();
            if divisor == 0.0 {
                return Err(EngineError::DivisionByZero);
            }
            Value::Number(acc.to_number() / divisor)
        }
        ConditionOperation::Concatenate => Value::Text(format!("{acc}{next}")),
        ConditionOperation::And => Value::Bool(acc.is_truthy() && next.is_truthy()),
        ConditionOperation::Or => Value::Bool(acc.is_truthy() || next.is_truthy()),
        ConditionOperation::Equals => Value::Bool(acc.loose_eq(next)),
        ConditionOperation::NotEquals => Value::Bool(!acc.loose_eq(next)),
        ConditionOperation::GreaterThan => Value::Bool(acc.loose_cmp(next).is_gt()),
        ConditionOperation::LessThan => Value::Bool(acc.loose_cmp(next).is_lt()),
        ConditionOperation::GreaterEqual => Value::Bool(acc.loose_cmp(next).is_ge()),
        ConditionOperation::LessEqual => Value::Bool(acc.loose_cmp(next).is_le()),
    };
    Ok(value)
}
