//! Entity shape declarations.
//!
//! A [`Schema`] owns the fields of an entity together with everything
//! attached to them: lifecycle hooks, virtual properties, per-field
//! modifiers, instance methods, statics and composite indexes.

pub mod field;
pub mod hooks;
pub mod validation;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value as JsonValue;

use crate::core::{OrmError, Result, Value};
use crate::document::Document;
use crate::model::Model;
use crate::session::Session;

pub use field::{DefaultValue, Field, FieldConstraints, FieldKind, IndexKind};
pub use hooks::{Hook, HookFn, Hooks, Phase, hook_fn};

pub const DEFAULT_DISCRIMINATOR_KEY: &str = "type";

pub type ModifierFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;
pub type VirtualGetter = Arc<dyn Fn(&Document) -> JsonValue + Send + Sync>;
pub type VirtualSetter = Arc<dyn Fn(&mut Document, JsonValue) -> Result<()> + Send + Sync>;
pub type MethodFn = Arc<dyn Fn(&Document, &[JsonValue]) -> Result<JsonValue> + Send + Sync>;
pub type StaticFn =
    Arc<dyn for<'a> Fn(Model<'a>, Vec<JsonValue>) -> BoxFuture<'a, Result<JsonValue>> + Send + Sync>;

/// Custom getter/setter pair for one field.
#[derive(Clone, Default)]
pub struct Modifier {
    pub getter: Option<ModifierFn>,
    pub setter: Option<ModifierFn>,
}

/// Computed property that is never persisted.
#[derive(Clone, Default)]
pub struct Virtual {
    pub getter: Option<VirtualGetter>,
    pub setter: Option<VirtualSetter>,
}

/// Unique constraint or index spanning several fields.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeIndex {
    pub fields: Vec<String>,
    pub unique: bool,
    pub kind: IndexKind,
}

#[derive(Clone, Default)]
pub struct Schema {
    fields: BTreeMap<String, Field>,
    hooks: Hooks,
    virtuals: BTreeMap<String, Virtual>,
    methods: BTreeMap<String, MethodFn>,
    statics: BTreeMap<String, StaticFn>,
    modifiers: BTreeMap<String, Modifier>,
    composites: Vec<CompositeIndex>,
    discriminator_key: Option<String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, field: Field) -> Self {
        self.add_field(name, field);
        self
    }

    pub fn add_field(&mut self, name: &str, mut field: Field) -> &mut Self {
        field.bind_name(name);
        self.fields.insert(name.to_string(), field);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values()
    }

    /// Fields stored as columns of the owning table.
    pub fn column_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.values().filter(|field| field.has_column())
    }

    pub fn field_by_column(&self, column: &str) -> Option<&Field> {
        self.fields.values().find(|field| field.column == column)
    }

    pub fn pre<F>(&mut self, hook: Hook, callback: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Document, &'a Session) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.hooks.register(hook, Phase::Pre, Arc::new(callback));
        self
    }

    pub fn post<F>(&mut self, hook: Hook, callback: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Document, &'a Session) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.hooks.register(hook, Phase::Post, Arc::new(callback));
        self
    }

    /// Registers a hook by its name (`"save"`, `"validate"`, `"remove"`, `"create"`).
    pub fn hook_named<F>(&mut self, phase: Phase, name: &str, callback: F) -> Result<&mut Self>
    where
        F: for<'a> Fn(&'a mut Document, &'a Session) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        let hook: Hook = name.parse()?;
        self.hooks.register(hook, phase, Arc::new(callback));
        Ok(self)
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn virtual_get<F>(&mut self, name: &str, getter: F) -> &mut Self
    where
        F: Fn(&Document) -> JsonValue + Send + Sync + 'static,
    {
        self.virtuals.entry(name.to_string()).or_default().getter = Some(Arc::new(getter));
        self
    }

    pub fn virtual_set<F>(&mut self, name: &str, setter: F) -> &mut Self
    where
        F: Fn(&mut Document, JsonValue) -> Result<()> + Send + Sync + 'static,
    {
        self.virtuals.entry(name.to_string()).or_default().setter = Some(Arc::new(setter));
        self
    }

    pub fn virtual_field(&self, name: &str) -> Option<&Virtual> {
        self.virtuals.get(name)
    }

    pub fn virtual_names(&self) -> impl Iterator<Item = &str> {
        self.virtuals.keys().map(String::as_str)
    }

    /// Transforms the value read from `field`. Only one getter per field.
    pub fn getter<F>(&mut self, field: &str, getter: F) -> Result<&mut Self>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let modifier = self.modifiers.entry(field.to_string()).or_default();
        if modifier.getter.is_some() {
            return Err(OrmError::usage(format!("Getter already defined for field '{}'", field)));
        }
        modifier.getter = Some(Arc::new(getter));
        Ok(self)
    }

    /// Transforms the value written to `field`. Only one setter per field.
    pub fn setter<F>(&mut self, field: &str, setter: F) -> Result<&mut Self>
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        let modifier = self.modifiers.entry(field.to_string()).or_default();
        if modifier.setter.is_some() {
            return Err(OrmError::usage(format!("Setter already defined for field '{}'", field)));
        }
        modifier.setter = Some(Arc::new(setter));
        Ok(self)
    }

    pub fn modifier(&self, field: &str) -> Option<&Modifier> {
        self.modifiers.get(field)
    }

    pub fn method<F>(&mut self, name: &str, method: F) -> &mut Self
    where
        F: Fn(&Document, &[JsonValue]) -> Result<JsonValue> + Send + Sync + 'static,
    {
        self.methods.insert(name.to_string(), Arc::new(method));
        self
    }

    pub fn get_method(&self, name: &str) -> Option<&MethodFn> {
        self.methods.get(name)
    }

    pub fn static_fn<F>(&mut self, name: &str, callable: F) -> &mut Self
    where
        F: for<'a> Fn(Model<'a>, Vec<JsonValue>) -> BoxFuture<'a, Result<JsonValue>> + Send + Sync + 'static,
    {
        self.statics.insert(name.to_string(), Arc::new(callable));
        self
    }

    pub fn get_static(&self, name: &str) -> Option<&StaticFn> {
        self.statics.get(name)
    }

    pub fn unique_together(mut self, fields: &[&str]) -> Self {
        self.composites.push(CompositeIndex {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: true,
            kind: IndexKind::BTree,
        });
        self
    }

    pub fn index_together(mut self, fields: &[&str], kind: IndexKind) -> Self {
        self.composites.push(CompositeIndex {
            fields: fields.iter().map(|f| f.to_string()).collect(),
            unique: false,
            kind,
        });
        self
    }

    pub fn composites(&self) -> &[CompositeIndex] {
        &self.composites
    }

    /// Column holding the concrete type name when this schema starts or
    /// joins a discriminator chain.
    pub fn discriminator_key(mut self, key: &str) -> Self {
        self.discriminator_key = Some(key.to_string());
        self
    }

    pub fn get_discriminator_key(&self) -> Option<&str> {
        self.discriminator_key.as_deref()
    }

    /// Merges `own` on top of this schema without mutating either.
    ///
    /// Fields, virtuals, modifiers and methods of `own` win on name clashes;
    /// hooks run ancestor first. Statics and composite indexes belong to
    /// the declaring entity and are not inherited.
    pub fn extend(&self, own: &Schema) -> Schema {
        let mut merged = Schema {
            fields: self.fields.clone(),
            hooks: self.hooks.clone(),
            virtuals: self.virtuals.clone(),
            methods: self.methods.clone(),
            statics: own.statics.clone(),
            modifiers: self.modifiers.clone(),
            composites: own.composites.clone(),
            discriminator_key: own.discriminator_key.clone().or_else(|| self.discriminator_key.clone()),
        };
        merged.fields.extend(own.fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.hooks.append(&own.hooks);
        merged.virtuals.extend(own.virtuals.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.methods.extend(own.methods.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged.modifiers.extend(own.modifiers.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("fields", &self.fields.values().collect::<Vec<_>>())
            .field("hooks", &self.hooks)
            .field("virtuals", &self.virtuals.keys().collect::<Vec<_>>())
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .field("composites", &self.composites)
            .finish()
    }
}
