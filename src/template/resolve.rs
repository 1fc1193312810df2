//! Implementation of the fixed-point parameter resolver.
//!
//! Parameter values may reference other parameters through `{name}`
//! placeholders or compute a value with `expr(...)`. The resolver repeatedly
//! substitutes what is already known until a pass changes nothing.

use indexmap::IndexMap;

use super::expr;
use super::expr::Expr;
use super::expr::ExprError;
use super::placeholder;
use crate::value::Value;

/// An error that occurs while resolving parameters.
#[derive(Debug, thiserror::Error)]
#[error("invalid expression for parameter `{name}`: {source}")]
pub struct ResolveError {
    /// The name of the parameter holding the expression.
    pub name: String,
    /// The expression error.
    #[source]
    pub source: ExprError,
}

/// The state of a single parameter during resolution.
#[derive(Debug, Clone, PartialEq)]
enum Slot {
    /// The value is final.
    Resolved(Value),
    /// The value still references other parameters.
    Pending(String),
}

impl Slot {
    /// Creates the initial slot for a declared value.
    fn new(value: Value) -> Self {
        match value {
            Value::String(s) if placeholder::has_placeholders(&s) || expr::body(&s).is_some() => {
                Self::Pending(s)
            }
            value => Self::Resolved(value),
        }
    }

    /// Converts the slot back into a value.
    fn into_value(self) -> Value {
        match self {
            Self::Resolved(value) => value,
            Self::Pending(s) => Value::String(s),
        }
    }
}

/// The result of resolving a set of parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// The resolved parameters, in declaration order.
    ///
    /// Parameters that could not be resolved keep their partially
    /// substituted text.
    pub params: IndexMap<String, Value>,
    /// The names of the parameters that could not be resolved.
    ///
    /// These are reported by the caller, which knows which job they belong
    /// to.
    pub unresolved: Vec<String>,
}

/// Resolves the given parameters to a fixed point.
///
/// Each pass substitutes placeholders referencing fully resolved
/// parameters and evaluates expressions whose referenced names are all
/// resolved. Resolution stops when a pass makes no change; at most one pass
/// more than the number of parameters is made.
///
/// Escaped braces are preserved, so resolving an already resolved set of
/// parameters returns it unchanged.
pub fn resolve(params: IndexMap<String, Value>) -> Result<Resolution, ResolveError> {
    let mut slots = params
        .into_iter()
        .map(|(name, value)| (name, Slot::new(value)))
        .collect::<IndexMap<_, _>>();

    let passes = slots.len() + 1;
    for _ in 0..passes {
        let mut changed = false;
        for index in 0..slots.len() {
            let Some((name, Slot::Pending(text))) = slots.get_index(index) else {
                continue;
            };

            let next = step(&slots, name, text)?;
            if let Some((_, slot)) = slots.get_index_mut(index)
                && *slot != next
            {
                *slot = next;
                changed = true;
            }
        }

        if !changed {
            break;
        }
    }

    let unresolved = slots
        .iter()
        .filter(|(_, slot)| matches!(slot, Slot::Pending(_)))
        .map(|(name, _)| name.clone())
        .collect::<Vec<_>>();

    Ok(Resolution {
        params: slots
            .into_iter()
            .map(|(name, slot)| (name, slot.into_value()))
            .collect(),
        unresolved,
    })
}

/// Performs one resolution step for a pending parameter.
fn step(slots: &IndexMap<String, Slot>, name: &str, text: &str) -> Result<Slot, ResolveError> {
    // A parameter never resolves against itself
    let lookup = |other: &str| match slots.get(other) {
        Some(Slot::Resolved(value)) if other != name => Some(value),
        _ => None,
    };

    let text = placeholder::interpolate(text, |other| lookup(other).map(ToString::to_string));
    let Some(body) = expr::body(&text) else {
        if placeholder::has_placeholders(&text) {
            return Ok(Slot::Pending(text));
        }

        return Ok(Slot::Resolved(Value::String(text)));
    };

    if placeholder::has_placeholders(body) {
        return Ok(Slot::Pending(text));
    }

    let parsed = Expr::parse(body).map_err(|source| ResolveError {
        name: name.to_string(),
        source,
    })?;

    if parsed.names().into_iter().any(|n| lookup(n).is_none()) {
        return Ok(Slot::Pending(text));
    }

    parsed
        .eval(&|n: &str| lookup(n).cloned())
        .map(Slot::Resolved)
        .map_err(|source| ResolveError {
            name: name.to_string(),
            source,
        })
}
