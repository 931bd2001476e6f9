//! Effect capabilities
//!
//! Every definition, execution and annotated sub-expression runs under an
//! active effect set. An `effects(...)` transform replaces the inherited set
//! (the last one attached wins); otherwise the entry definition gets the
//! entry defaults and everything else the general defaults.

use crate::parser::Transform;
use crate::{Error, Result};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

/// Closed effect vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Effect {
    /// Standard output
    IoOut,
    /// Standard error
    IoErr,
    /// Heap allocation (vectors, maps)
    HeapAlloc,
    /// PathSpace notifications
    PathspaceNotify,
    /// PathSpace insertion
    PathspaceInsert,
    /// PathSpace removal
    PathspaceTake,
    /// File writes
    FileWrite,
}

impl Effect {
    /// All recognised effects
    pub const ALL: [Effect; 7] = [
        Effect::IoOut,
        Effect::IoErr,
        Effect::HeapAlloc,
        Effect::PathspaceNotify,
        Effect::PathspaceInsert,
        Effect::PathspaceTake,
        Effect::FileWrite,
    ];

    /// Source spelling
    pub fn as_str(self) -> &'static str {
        match self {
            Effect::IoOut => "io_out",
            Effect::IoErr => "io_err",
            Effect::HeapAlloc => "heap_alloc",
            Effect::PathspaceNotify => "pathspace_notify",
            Effect::PathspaceInsert => "pathspace_insert",
            Effect::PathspaceTake => "pathspace_take",
            Effect::FileWrite => "file_write",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Effect::ALL.iter().copied().find(|e| e.as_str() == s).ok_or(())
    }
}

lazy_static! {
    /// Builtins gated on an effect
    static ref EFFECT_REQUIREMENTS: HashMap<&'static str, Effect> = {
        let mut m = HashMap::new();
        m.insert("print", Effect::IoOut);
        m.insert("print_line", Effect::IoOut);
        m.insert("print_error", Effect::IoErr);
        m.insert("print_line_error", Effect::IoErr);
        m.insert("vector", Effect::HeapAlloc);
        m.insert("map", Effect::HeapAlloc);
        m.insert("push", Effect::HeapAlloc);
        m.insert("reserve", Effect::HeapAlloc);
        m.insert("notify", Effect::PathspaceNotify);
        m.insert("insert", Effect::PathspaceInsert);
        m.insert("take", Effect::PathspaceTake);
        m
    };
}

/// Effect required by builtin `name`, if any
pub fn required_effect(name: &str) -> Option<Effect> {
    EFFECT_REQUIREMENTS.get(name).copied()
}

/// Active effect set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectSet(BTreeSet<Effect>);

impl EffectSet {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse capability names; unknown and repeated names are errors naming `context`
    pub fn parse<S: AsRef<str>>(names: &[S], context: &str) -> Result<Self> {
        let mut set = BTreeSet::new();
        for name in names {
            let name = name.as_ref();
            let effect = Effect::from_str(name).map_err(|_| {
                Error::effect(format!("invalid effects capability on {}: {}", context, name))
            })?;
            if !set.insert(effect) {
                return Err(Error::effect(format!(
                    "duplicate effects capability on {}: {}",
                    context, name
                )));
            }
        }
        Ok(Self(set))
    }

    /// Whether `effect` is active
    pub fn contains(&self, effect: Effect) -> bool {
        self.0.contains(&effect)
    }

    /// First member of `self` missing from `outer`
    pub fn first_outside(&self, outer: &EffectSet) -> Option<Effect> {
        self.0.iter().copied().find(|e| !outer.contains(*e))
    }

    /// Iterate in vocabulary order
    pub fn iter(&self) -> impl Iterator<Item = Effect> + '_ {
        self.0.iter().copied()
    }

    /// Number of active effects
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// No effects active
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<Effect> for EffectSet {
    fn from_iter<I: IntoIterator<Item = Effect>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// The last `effects(...)` transform in `transforms`, parsed
pub fn explicit_effects(transforms: &[Transform], context: &str) -> Result<Option<EffectSet>> {
    match transforms.iter().rev().find(|t| t.name == "effects") {
        Some(t) => EffectSet::parse(&t.arguments, context).map(Some),
        None => Ok(None),
    }
}

/// Active set for a definition or execution: explicit transform or `defaults`
pub fn resolve_active_effects(
    transforms: &[Transform],
    defaults: &EffectSet,
    context: &str,
) -> Result<EffectSet> {
    Ok(explicit_effects(transforms, context)?.unwrap_or_else(|| defaults.clone()))
}

/// Active set for an annotated sub-expression; must not widen `enclosing`
pub fn resolve_nested_effects(
    transforms: &[Transform],
    enclosing: &EffectSet,
    context: &str,
) -> Result<EffectSet> {
    match explicit_effects(transforms, context)? {
        Some(set) => {
            if let Some(extra) = set.first_outside(enclosing) {
                return Err(Error::effect(format!(
                    "execution effects must be a subset of enclosing effects on {}: {}",
                    context, extra
                )));
            }
            Ok(set)
        }
        None => Ok(enclosing.clone()),
    }
}

/// Fail unless the builtin `name` is permitted under `active`
pub fn require_effect(name: &str, active: &EffectSet) -> Result<()> {
    if let Some(effect) = required_effect(name) {
        if !active.contains(effect) {
            return Err(Error::effect(format!("{} requires {} effect", name, effect)));
        }
    }
    Ok(())
}
