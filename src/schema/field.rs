use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::core::Value;
use crate::types::FieldType;

/// Index access method; Postgres b-tree unless overridden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexKind {
    #[default]
    BTree,
    Hash,
    Gist,
    Gin,
    Brin,
}

impl IndexKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::BTree => "btree",
            Self::Hash => "hash",
            Self::Gist => "gist",
            Self::Gin => "gin",
            Self::Brin => "brin",
        }
    }
}

/// Shape of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Scalar(FieldType),
    /// Single reference to another entity, stored as its id.
    Ref { target: String },
    /// Collection of another entity. Embedded collections are owned by the
    /// document; the others are resolved through a back-reference or a
    /// junction table.
    Many { target: String, embedded: bool },
}

pub type ValidatorFn = Arc<dyn Fn(&Value) -> bool + Send + Sync>;
pub type DefaultFn = Arc<dyn Fn() -> JsonValue + Send + Sync>;

#[derive(Clone)]
pub enum DefaultValue {
    Static(JsonValue),
    Computed(DefaultFn),
}

impl DefaultValue {
    pub fn resolve(&self) -> JsonValue {
        match self {
            Self::Static(value) => value.clone(),
            Self::Computed(compute) => compute(),
        }
    }
}

#[derive(Clone)]
pub(crate) struct CustomValidator {
    pub check: ValidatorFn,
    pub message: Option<String>,
}

/// Constraint requirements implied by a field declaration.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FieldConstraints {
    pub required: bool,
    pub unique: bool,
    pub index: Option<IndexKind>,
    pub reference: Option<String>,
}

/// One typed, constrained property of a schema.
#[derive(Clone)]
pub struct Field {
    pub(crate) name: String,
    pub(crate) column: String,
    pub(crate) kind: FieldKind,
    pub(crate) required: bool,
    pub(crate) unique: bool,
    pub(crate) index: Option<IndexKind>,
    pub(crate) choices: Option<Vec<Value>>,
    pub(crate) validator: Option<CustomValidator>,
    pub(crate) default: Option<DefaultValue>,
    pub(crate) cascade: bool,
    pub(crate) auto_populate: bool,
}

impl Field {
    pub fn new(field_type: FieldType) -> Self {
        Self::with_kind(FieldKind::Scalar(field_type))
    }

    fn with_kind(kind: FieldKind) -> Self {
        Self {
            name: String::new(),
            column: String::new(),
            kind,
            required: false,
            unique: false,
            index: None,
            choices: None,
            validator: None,
            default: None,
            cascade: false,
            auto_populate: false,
        }
    }

    pub fn boolean() -> Self {
        Self::new(FieldType::Boolean)
    }

    pub fn integer() -> Self {
        Self::new(FieldType::Integer)
    }

    pub fn float() -> Self {
        Self::new(FieldType::Float)
    }

    pub fn string() -> Self {
        Self::new(FieldType::string())
    }

    pub fn string_sized(size: usize) -> Self {
        Self::new(FieldType::string_sized(size))
    }

    pub fn text() -> Self {
        Self::new(FieldType::Text)
    }

    pub fn date() -> Self {
        Self::new(FieldType::Date)
    }

    pub fn json_array() -> Self {
        Self::new(FieldType::JsonArray(None))
    }

    /// Single-valued reference to `target`.
    pub fn reference(target: &str) -> Self {
        Self::with_kind(FieldKind::Ref {
            target: target.to_string(),
        })
    }

    /// Collection of `target` resolved by back-reference or junction table.
    pub fn many(target: &str) -> Self {
        Self::with_kind(FieldKind::Many {
            target: target.to_string(),
            embedded: false,
        })
    }

    /// Collection of `target` documents owned by this document.
    pub fn embedded(target: &str) -> Self {
        Self::with_kind(FieldKind::Many {
            target: target.to_string(),
            embedded: true,
        })
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn index(mut self) -> Self {
        self.index = Some(IndexKind::default());
        self
    }

    pub fn index_kind(mut self, kind: IndexKind) -> Self {
        self.index = Some(kind);
        self
    }

    /// Restricts values to the given set.
    pub fn one_of<I, V>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.choices = Some(choices.into_iter().map(Into::into).collect());
        self
    }

    /// Custom check; `message` may reference `{VALUE}` and `{FIELD}`.
    pub fn validate<F>(mut self, check: F, message: &str) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(CustomValidator {
            check: Arc::new(check),
            message: Some(message.to_string()),
        });
        self
    }

    pub fn validate_with<F>(mut self, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.validator = Some(CustomValidator {
            check: Arc::new(check),
            message: None,
        });
        self
    }

    pub fn default_value(mut self, value: impl Into<JsonValue>) -> Self {
        self.default = Some(DefaultValue::Static(value.into()));
        self
    }

    pub fn default_with<F>(mut self, compute: F) -> Self
    where
        F: Fn() -> JsonValue + Send + Sync + 'static,
    {
        self.default = Some(DefaultValue::Computed(Arc::new(compute)));
        self
    }

    /// Deleting the referenced row deletes this row as well.
    pub fn cascade(mut self) -> Self {
        self.cascade = true;
        self
    }

    /// Populate this relation on every query of the owning entity.
    pub fn auto_populate(mut self) -> Self {
        self.auto_populate = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column_name(&self) -> &str {
        &self.column
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_cascade(&self) -> bool {
        self.cascade
    }

    pub fn is_auto_populate(&self) -> bool {
        self.auto_populate
    }

    pub fn default(&self) -> Option<&DefaultValue> {
        self.default.as_ref()
    }

    pub fn choices(&self) -> Option<&[Value]> {
        self.choices.as_deref()
    }

    pub fn ref_target(&self) -> Option<&str> {
        match &self.kind {
            FieldKind::Ref { target } | FieldKind::Many { target, .. } => Some(target),
            FieldKind::Scalar(_) => None,
        }
    }

    pub fn is_multi(&self) -> bool {
        matches!(self.kind, FieldKind::Many { .. })
    }

    pub fn is_nested(&self) -> bool {
        matches!(self.kind, FieldKind::Many { embedded: true, .. })
    }

    /// Collections live outside the owner's table.
    pub fn has_column(&self) -> bool {
        !self.is_multi()
    }

    /// Scalar type of the stored column; references store an integer id.
    pub fn field_type(&self) -> Option<FieldType> {
        match &self.kind {
            FieldKind::Scalar(ty) => Some(ty.clone()),
            FieldKind::Ref { .. } => Some(FieldType::Integer),
            FieldKind::Many { .. } => None,
        }
    }

    pub fn constraints(&self) -> FieldConstraints {
        FieldConstraints {
            required: self.required,
            unique: self.unique,
            index: self.index,
            reference: match &self.kind {
                FieldKind::Ref { target } => Some(target.clone()),
                _ => None,
            },
        }
    }

    pub(crate) fn bind_name(&mut self, name: &str) {
        self.name = name.to_string();
        self.column = crate::core::naming::sanitize_name(name);
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("column", &self.column)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("unique", &self.unique)
            .field("index", &self.index)
            .field("cascade", &self.cascade)
            .field("auto_populate", &self.auto_populate)
            .finish()
    }
}
