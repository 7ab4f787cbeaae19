use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::core::{OrmError, Result};
use crate::document::Document;
use crate::session::Session;

/// Lifecycle event a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hook {
    Create,
    Save,
    Validate,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Pre,
    Post,
}

impl FromStr for Hook {
    type Err = OrmError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "create" => Ok(Self::Create),
            "save" => Ok(Self::Save),
            "validate" => Ok(Self::Validate),
            "remove" => Ok(Self::Remove),
            other => Err(OrmError::InvalidHook(other.to_string())),
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Save => "save",
            Self::Validate => "validate",
            Self::Remove => "remove",
        };
        write!(f, "{}", name)
    }
}

pub type HookFn =
    Arc<dyn for<'a> Fn(&'a mut Document, &'a Session) -> BoxFuture<'a, Result<()>> + Send + Sync>;

/// Boxes a hook callback, pinning down its higher-ranked signature.
pub fn hook_fn<F>(callback: F) -> HookFn
where
    F: for<'a> Fn(&'a mut Document, &'a Session) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    Arc::new(callback)
}

/// Ordered callback lists keyed by (hook, phase).
#[derive(Clone, Default)]
pub struct Hooks {
    entries: Vec<(Hook, Phase, HookFn)>,
}

impl Hooks {
    pub fn register(&mut self, hook: Hook, phase: Phase, callback: HookFn) {
        self.entries.push((hook, phase, callback));
    }

    /// Callbacks for one event, in registration order.
    pub fn matching(&self, hook: Hook, phase: Phase) -> Vec<HookFn> {
        self.entries
            .iter()
            .filter(|(h, p, _)| *h == hook && *p == phase)
            .map(|(_, _, callback)| callback.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn append(&mut self, other: &Hooks) {
        self.entries.extend(other.entries.iter().cloned());
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let events: Vec<String> = self
            .entries
            .iter()
            .map(|(hook, phase, _)| format!("{:?}:{}", phase, hook))
            .collect();
        f.debug_struct("Hooks").field("events", &events).finish()
    }
}
