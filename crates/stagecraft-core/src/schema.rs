//! Schema descriptors and schema-validated values.
//!
//! A `Schema` describes the object a stage expects back from the LLM: named,
//! typed fields, some required, possibly nested objects or arrays. It renders
//! itself as JSON Schema (`describe`) for the request and checks raw output
//! against itself (`validate`).
//!
//! Validation is additive-only. Declared fields are type-checked; any other
//! top-level field lands in the value's extension slot untouched. Stages use the
//! same slot to carry earlier results forward.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};

use crate::error::{SchemaError, StageError, StructuralError};

/// Type of a single schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    /// A string restricted to a fixed set of values.
    Enum(Vec<String>),
    Object(Arc<Schema>),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Parse a JSON Schema primitive type name.
    pub fn parse(field: &str, ty: &str) -> Result<Self, SchemaError> {
        match ty {
            "string" => Ok(Self::String),
            "integer" => Ok(Self::Integer),
            "number" => Ok(Self::Number),
            "boolean" => Ok(Self::Boolean),
            other => Err(SchemaError::UnsupportedType {
                field: field.to_string(),
                ty: other.to_string(),
            }),
        }
    }

    pub fn array_of(item: FieldType) -> Self {
        Self::Array(Box::new(item))
    }

    pub fn object(schema: Schema) -> Self {
        Self::Object(Arc::new(schema))
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::String | Self::Enum(_) => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object(_) => "object",
            Self::Array(_) => "array",
        }
    }

    fn describe(&self) -> Value {
        match self {
            Self::Enum(values) => json!({ "type": "string", "enum": values }),
            Self::Object(schema) => schema.describe(),
            Self::Array(item) => json!({ "type": "array", "items": item.describe() }),
            other => json!({ "type": other.type_name() }),
        }
    }

    /// Check `value` against this type, returning it with lax coercions applied
    /// (numeric and boolean strings). Problems are appended to `issues`.
    fn coerce(&self, path: &str, value: Value, issues: &mut Vec<String>) -> Value {
        match (self, value) {
            (Self::String, Value::String(s)) => Value::String(s),
            (Self::Enum(allowed), Value::String(s)) => {
                if !allowed.iter().any(|a| *a == s) {
                    issues.push(format!(
                        "field '{}' must be one of [{}], got '{}'",
                        path,
                        allowed.join(", "),
                        s
                    ));
                }
                Value::String(s)
            }
            (Self::Integer, Value::Number(n)) => {
                if n.is_i64() || n.is_u64() {
                    Value::Number(n)
                } else {
                    match n.as_f64().filter(|f| f.fract() == 0.0) {
                        Some(f) if (I64_LOWER..I64_UPPER).contains(&f) => json!(f as i64),
                        Some(_) => {
                            issues.push(format!("field '{}' integer {} out of range", path, n));
                            Value::Number(n)
                        }
                        None => {
                            issues.push(format!("field '{}' expected integer, got {}", path, n));
                            Value::Number(n)
                        }
                    }
                }
            }
            (Self::Integer, Value::String(s)) => match s.trim().parse::<i64>() {
                Ok(i) => json!(i),
                Err(_) => {
                    issues.push(format!("field '{}' expected integer, got string", path));
                    Value::String(s)
                }
            },
            (Self::Number, Value::Number(n)) => Value::Number(n),
            (Self::Number, Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(f) if f.is_finite() => json!(f),
                Ok(_) => {
                    issues.push(format!("field '{}' expected finite number, got '{}'", path, s));
                    Value::String(s)
                }
                Err(_) => {
                    issues.push(format!("field '{}' expected number, got string", path));
                    Value::String(s)
                }
            },
            (Self::Boolean, Value::Bool(b)) => Value::Bool(b),
            (Self::Boolean, Value::String(s)) => match s.trim() {
                "true" => Value::Bool(true),
                "false" => Value::Bool(false),
                _ => {
                    issues.push(format!("field '{}' expected boolean, got string", path));
                    Value::String(s)
                }
            },
            (Self::Object(schema), Value::Object(obj)) => {
                Value::Object(schema.coerce_object(path, obj, issues))
            }
            (Self::Array(item), Value::Array(items)) => Value::Array(
                items
                    .into_iter()
                    .enumerate()
                    .map(|(i, v)| item.coerce(&format!("{}[{}]", path, i), v, issues))
                    .collect(),
            ),
            (expected, other) => {
                issues.push(format!(
                    "field '{}' expected {}, got {}",
                    path,
                    expected.type_name(),
                    json_type_name(&other)
                ));
                other
            }
        }
    }
}

// `i64::MAX as f64` rounds up to 2^63, so the upper bound is exclusive.
const I64_LOWER: f64 = i64::MIN as f64;
const I64_UPPER: f64 = 9_223_372_036_854_775_808.0;

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A named field in a schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: FieldType,
    pub required: bool,
    pub description: Option<String>,
}

impl Field {
    pub fn required(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: true,
            description: None,
        }
    }

    pub fn optional(name: impl Into<String>, ty: FieldType) -> Self {
        Self {
            name: name.into(),
            ty,
            required: false,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Immutable description of an object shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    description: Option<String>,
    fields: Vec<Field>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            name: name.into(),
            description: None,
            fields: Vec::new(),
        }
    }

    /// Derive a descriptor from a Rust type's `JsonSchema` implementation.
    pub fn from_type<T: JsonSchema>() -> Result<Self, SchemaError> {
        let root = schemars::schema_for!(T);
        let name = T::schema_name();
        Self::from_json_schema(&name, root.as_value())
    }

    /// Build a descriptor from a JSON Schema document. `$ref`s are resolved
    /// against `$defs` (or `definitions`); recursive references are rejected.
    pub fn from_json_schema(name: &str, document: &Value) -> Result<Self, SchemaError> {
        let defs = document
            .get("$defs")
            .or_else(|| document.get("definitions"))
            .and_then(Value::as_object);
        let mut resolver = RefResolver {
            root: name.to_string(),
            defs,
            stack: vec![name.to_string()],
        };
        resolver.object(name, document)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `name` is a declared field of this schema.
    pub fn declares(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    /// Machine-readable shape as JSON Schema. Additional properties are allowed.
    pub fn describe(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &self.fields {
            let mut prop = field.ty.describe();
            if let (Some(desc), Some(obj)) = (&field.description, prop.as_object_mut()) {
                obj.insert("description".into(), Value::String(desc.clone()));
            }
            properties.insert(field.name.clone(), prop);
            if field.required {
                required.push(Value::String(field.name.clone()));
            }
        }

        let mut shape = json!({
            "title": self.name,
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": true,
        });
        if let (Some(desc), Some(obj)) = (&self.description, shape.as_object_mut()) {
            obj.insert("description".into(), Value::String(desc.clone()));
        }
        shape
    }

    /// Validate raw output. Succeeds only if every required field is present
    /// and every declared field has the declared type; all issues are reported.
    pub fn validate(&self, raw: Value) -> Result<TypedValue, StructuralError> {
        let obj = match raw {
            Value::Object(obj) => obj,
            other => {
                return Err(StructuralError::Malformed(format!(
                    "expected object for '{}', got {}",
                    self.name,
                    json_type_name(&other)
                )))
            }
        };

        let mut issues = Vec::new();
        let mut all = self.coerce_object("", obj, &mut issues);
        if !issues.is_empty() {
            return Err(StructuralError::SchemaMismatch {
                schema: self.name.clone(),
                issues,
            });
        }

        let mut fields = Map::new();
        for field in &self.fields {
            if let Some(value) = all.remove(&field.name) {
                fields.insert(field.name.clone(), value);
            }
        }

        Ok(TypedValue {
            schema: self.name.clone(),
            declared: self.fields.iter().map(|f| f.name.clone()).collect(),
            fields,
            extensions: all,
        })
    }

    fn coerce_object(
        &self,
        prefix: &str,
        mut obj: Map<String, Value>,
        issues: &mut Vec<String>,
    ) -> Map<String, Value> {
        for field in &self.fields {
            let path = if prefix.is_empty() {
                field.name.clone()
            } else {
                format!("{}.{}", prefix, field.name)
            };
            match obj.remove(&field.name) {
                None if field.required => {
                    issues.push(format!("missing required field '{}'", path));
                }
                None => {}
                Some(Value::Null) if field.required => {
                    issues.push(format!("required field '{}' is null", path));
                    obj.insert(field.name.clone(), Value::Null);
                }
                Some(Value::Null) => {
                    obj.insert(field.name.clone(), Value::Null);
                }
                Some(value) => {
                    let value = field.ty.coerce(&path, value, issues);
                    obj.insert(field.name.clone(), value);
                }
            }
        }
        obj
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Builder for `Schema`.
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    description: Option<String>,
    fields: Vec<Field>,
}

impl SchemaBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn required(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(Field::required(name, ty))
    }

    pub fn optional(self, name: impl Into<String>, ty: FieldType) -> Self {
        self.field(Field::optional(name, ty))
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn build(self) -> Result<Schema, SchemaError> {
        for (i, field) in self.fields.iter().enumerate() {
            if self.fields[..i].iter().any(|f| f.name == field.name) {
                return Err(SchemaError::DuplicateField {
                    schema: self.name,
                    field: field.name.clone(),
                });
            }
        }
        Ok(Schema {
            name: self.name,
            description: self.description,
            fields: self.fields,
        })
    }
}

/// Walks a JSON Schema document, inlining `$ref`s.
struct RefResolver<'a> {
    root: String,
    defs: Option<&'a Map<String, Value>>,
    stack: Vec<String>,
}

impl RefResolver<'_> {
    fn object(&mut self, name: &str, node: &Value) -> Result<Schema, SchemaError> {
        let obj = node
            .as_object()
            .ok_or_else(|| SchemaError::NotAnObject(name.to_string()))?;
        let properties = obj.get("properties").and_then(Value::as_object);
        let is_object = obj.get("type").and_then(Value::as_str) == Some("object");
        if properties.is_none() && !is_object {
            return Err(SchemaError::NotAnObject(name.to_string()));
        }

        let required: Vec<&str> = obj
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut builder = Schema::builder(name);
        if let Some(desc) = obj.get("description").and_then(Value::as_str) {
            builder = builder.description(desc);
        }

        for (field_name, prop) in properties.into_iter().flatten() {
            let (ty, nullable) = self.field_type(field_name, prop)?;
            let mut field = if required.contains(&field_name.as_str()) && !nullable {
                Field::required(field_name.clone(), ty)
            } else {
                Field::optional(field_name.clone(), ty)
            };
            if let Some(desc) = prop.get("description").and_then(Value::as_str) {
                field = field.with_description(desc);
            }
            builder = builder.field(field);
        }

        builder.build()
    }

    /// Returns the field type and whether `null` is an accepted value.
    fn field_type(&mut self, field: &str, node: &Value) -> Result<(FieldType, bool), SchemaError> {
        let unsupported = |ty: &str| SchemaError::UnsupportedType {
            field: field.to_string(),
            ty: ty.to_string(),
        };
        let obj = node.as_object().ok_or_else(|| unsupported("any"))?;

        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            return Ok((self.reference(reference)?, false));
        }

        for combinator in ["anyOf", "oneOf"] {
            if let Some(variants) = obj.get(combinator).and_then(Value::as_array) {
                let consts: Vec<String> = variants
                    .iter()
                    .filter_map(|v| v.get("const").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect();
                if !variants.is_empty() && consts.len() == variants.len() {
                    return Ok((FieldType::Enum(consts), false));
                }

                let non_null: Vec<&Value> =
                    variants.iter().filter(|v| !is_null_schema(v)).collect();
                if non_null.len() != 1 {
                    return Err(unsupported(combinator));
                }
                let (ty, inner_nullable) = self.field_type(field, non_null[0])?;
                return Ok((ty, inner_nullable || non_null.len() < variants.len()));
            }
        }

        if let Some(all) = obj.get("allOf").and_then(Value::as_array) {
            if all.len() == 1 {
                return self.field_type(field, &all[0]);
            }
            return Err(unsupported("allOf"));
        }

        let (ty_name, nullable) = match obj.get("type") {
            Some(Value::String(s)) => (s.as_str(), false),
            Some(Value::Array(types)) => {
                let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
                let non_null: Vec<&str> = names.iter().copied().filter(|t| *t != "null").collect();
                if non_null.len() != 1 {
                    return Err(unsupported(&names.join("|")));
                }
                (non_null[0], non_null.len() < names.len())
            }
            _ => return Err(unsupported("any")),
        };

        let ty = match ty_name {
            "array" => {
                let items = obj.get("items").ok_or_else(|| unsupported("array"))?;
                let (item, _) = self.field_type(field, items)?;
                FieldType::array_of(item)
            }
            "object" => FieldType::object(self.object(field, node)?),
            "string" => match obj.get("enum").and_then(Value::as_array) {
                Some(values) => FieldType::Enum(
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                ),
                None => FieldType::String,
            },
            other => FieldType::parse(field, other)?,
        };
        Ok((ty, nullable))
    }

    fn reference(&mut self, reference: &str) -> Result<FieldType, SchemaError> {
        if reference == "#" {
            return Err(SchemaError::SelfReferential(self.root.clone()));
        }
        let name = reference
            .strip_prefix("#/$defs/")
            .or_else(|| reference.strip_prefix("#/definitions/"))
            .ok_or_else(|| SchemaError::UnresolvedRef(reference.to_string()))?;
        if self.stack.iter().any(|s| s == name) {
            return Err(SchemaError::SelfReferential(name.to_string()));
        }
        let def = self
            .defs
            .and_then(|d| d.get(name))
            .ok_or_else(|| SchemaError::UnresolvedRef(reference.to_string()))?;

        self.stack.push(name.to_string());
        let resolved = self.field_type(name, def);
        self.stack.pop();
        resolved.map(|(ty, _)| ty)
    }
}

fn is_null_schema(node: &Value) -> bool {
    node.get("type").and_then(Value::as_str) == Some("null")
}

/// A value that passed validation against a schema, plus its extension slot.
///
/// Declared fields and extension fields are kept apart so that carried-forward
/// data can never shadow what the schema declares. Both are emitted side by side
/// by `to_value`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedValue {
    schema: String,
    declared: Vec<String>,
    fields: Map<String, Value>,
    extensions: Map<String, Value>,
}

impl TypedValue {
    pub fn schema_name(&self) -> &str {
        &self.schema
    }

    /// Look up a declared field, falling back to the extension slot.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key).or_else(|| self.extensions.get(key))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn extensions(&self) -> &Map<String, Value> {
        &self.extensions
    }

    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }

    /// Attach an opaque value under `key` in the extension slot. Overwrites an
    /// existing extension of the same name; refuses to shadow a declared field.
    pub fn attach(&mut self, key: impl Into<String>, value: Value) -> Result<(), StageError> {
        let key = key.into();
        if self.declared.iter().any(|d| *d == key) {
            return Err(StageError::ExtensionConflict(key));
        }
        self.extensions.insert(key, value);
        Ok(())
    }

    pub fn to_value(&self) -> Value {
        let mut obj = self.fields.clone();
        for (k, v) in &self.extensions {
            obj.insert(k.clone(), v.clone());
        }
        Value::Object(obj)
    }

    pub fn into_value(self) -> Value {
        let mut obj = self.fields;
        obj.extend(self.extensions);
        Value::Object(obj)
    }

    /// Deserialize into a concrete type. Extension fields are included, so a
    /// `#[serde(flatten)]` map on the target picks them up.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.to_value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    fn file_schema() -> Schema {
        Schema::builder("File")
            .required("path", FieldType::String)
            .required("purpose", FieldType::String)
            .build()
            .unwrap()
    }

    fn plan_schema() -> Schema {
        Schema::builder("Plan")
            .required("name", FieldType::String)
            .optional("version", FieldType::Integer)
            .required("files", FieldType::array_of(FieldType::object(file_schema())))
            .build()
            .unwrap()
    }

    #[test]
    fn test_describe_shape() {
        let shape = plan_schema().describe();
        assert_eq!(shape["type"], "object");
        assert_eq!(shape["title"], "Plan");
        assert_eq!(shape["additionalProperties"], true);
        assert_eq!(shape["required"], json!(["name", "files"]));
        assert_eq!(shape["properties"]["files"]["type"], "array");
        assert_eq!(
            shape["properties"]["files"]["items"]["properties"]["path"]["type"],
            "string"
        );
    }

    #[test]
    fn test_validate_ok() {
        let raw = json!({
            "name": "calc",
            "files": [{"path": "index.html", "purpose": "markup"}]
        });
        let typed = plan_schema().validate(raw).unwrap();
        assert_eq!(typed.schema_name(), "Plan");
        assert_eq!(typed.get("name"), Some(&json!("calc")));
        assert!(typed.extensions().is_empty());
    }

    #[test]
    fn test_validate_missing_required() {
        let err = plan_schema().validate(json!({"files": []})).unwrap_err();
        match err {
            StructuralError::SchemaMismatch { schema, issues } => {
                assert_eq!(schema, "Plan");
                assert_eq!(issues, vec!["missing required field 'name'"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_nested_type_mismatch() {
        let raw = json!({
            "name": "calc",
            "files": [{"path": "index.html", "purpose": 7}]
        });
        match plan_schema().validate(raw).unwrap_err() {
            StructuralError::SchemaMismatch { issues, .. } => {
                assert_eq!(issues, vec!["field 'files[0].purpose' expected string, got number"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_collects_all_issues() {
        let raw = json!({"files": "nope", "version": "x"});
        match plan_schema().validate(raw).unwrap_err() {
            StructuralError::SchemaMismatch { issues, .. } => assert_eq!(issues.len(), 3),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_validate_non_object() {
        let err = plan_schema().validate(json!([1, 2])).unwrap_err();
        assert!(matches!(err, StructuralError::Malformed(_)));
    }

    #[test]
    fn test_lax_coercion() {
        let schema = Schema::builder("Counts")
            .required("count", FieldType::Integer)
            .required("ratio", FieldType::Number)
            .required("done", FieldType::Boolean)
            .build()
            .unwrap();
        let typed = schema
            .validate(json!({"count": "3", "ratio": "0.5", "done": "true"}))
            .unwrap();
        assert_eq!(typed.get("count"), Some(&json!(3)));
        assert_eq!(typed.get("ratio"), Some(&json!(0.5)));
        assert_eq!(typed.get("done"), Some(&json!(true)));

        let typed = schema
            .validate(json!({"count": 4.0, "ratio": 1, "done": false}))
            .unwrap();
        assert_eq!(typed.get("count"), Some(&json!(4)));
    }

    #[test]
    fn test_non_finite_number_strings_rejected() {
        let schema = Schema::builder("Ratio")
            .required("ratio", FieldType::Number)
            .build()
            .unwrap();
        for raw in ["NaN", "inf", "infinity", "-Infinity"] {
            match schema.validate(json!({ "ratio": raw })).unwrap_err() {
                StructuralError::SchemaMismatch { issues, .. } => {
                    assert_eq!(issues.len(), 1, "{raw}");
                    assert!(issues[0].contains("finite"), "{raw}: {}", issues[0]);
                }
                other => panic!("unexpected error for {raw}: {other:?}"),
            }
        }
        let typed = schema.validate(json!({"ratio": "1e3"})).unwrap();
        assert_eq!(typed.get("ratio"), Some(&json!(1000.0)));
    }

    #[test]
    fn test_whole_float_outside_i64_rejected() {
        let schema = Schema::builder("Count")
            .required("n", FieldType::Integer)
            .build()
            .unwrap();
        for raw in [json!(1e20), json!(-1e20), json!(9.223372036854775808e18)] {
            match schema.validate(json!({ "n": raw })).unwrap_err() {
                StructuralError::SchemaMismatch { issues, .. } => {
                    assert!(issues[0].contains("out of range"), "{}", issues[0]);
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
        let typed = schema.validate(json!({"n": -9.223372036854775808e18})).unwrap();
        assert_eq!(typed.get("n"), Some(&json!(i64::MIN)));
    }

    #[test]
    fn test_optional_null_accepted() {
        let typed = plan_schema()
            .validate(json!({"name": "calc", "files": [], "version": null}))
            .unwrap();
        assert_eq!(typed.get("version"), Some(&Value::Null));
    }

    #[test]
    fn test_unknown_fields_go_to_extensions() {
        let typed = plan_schema()
            .validate(json!({"name": "calc", "files": [], "notes": "extra"}))
            .unwrap();
        assert!(typed.fields().get("notes").is_none());
        assert_eq!(typed.extension("notes"), Some(&json!("extra")));
    }

    #[test]
    fn test_attach_and_revalidate() {
        let mut typed = plan_schema()
            .validate(json!({"name": "calc", "files": []}))
            .unwrap();
        let upstream = json!({"title": "earlier", "steps": [1, 2, 3]});
        typed.attach("origin", upstream.clone()).unwrap();

        let again = plan_schema().validate(typed.to_value()).unwrap();
        assert_eq!(again.extension("origin"), Some(&upstream));
        assert_eq!(
            serde_json::to_string(again.extension("origin").unwrap()).unwrap(),
            serde_json::to_string(&upstream).unwrap()
        );
    }

    #[test]
    fn test_attach_refuses_declared_field() {
        let mut typed = plan_schema()
            .validate(json!({"name": "calc", "files": []}))
            .unwrap();
        let err = typed.attach("name", json!("other")).unwrap_err();
        assert!(matches!(err, StageError::ExtensionConflict(ref f) if f == "name"));
        // Absent optional fields are still declared.
        assert!(typed.attach("version", json!(2)).is_err());
    }

    #[test]
    fn test_builder_duplicate_field() {
        let err = Schema::builder("Dup")
            .required("a", FieldType::String)
            .optional("a", FieldType::Integer)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            SchemaError::DuplicateField {
                schema: "Dup".into(),
                field: "a".into()
            }
        );
    }

    #[test]
    fn test_unsupported_primitive() {
        let err = FieldType::parse("when", "datetime").unwrap_err();
        assert!(matches!(err, SchemaError::UnsupportedType { ref ty, .. } if ty == "datetime"));
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
    struct Step {
        /// Where the step applies.
        path: String,
        done: bool,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "snake_case")]
    enum Priority {
        Low,
        High,
    }

    #[derive(Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
    struct Checklist {
        title: String,
        owner: Option<String>,
        steps: Vec<Step>,
        priority: Priority,
        #[serde(flatten)]
        extra: Map<String, Value>,
    }

    #[test]
    fn test_from_type() {
        let schema = Schema::from_type::<Checklist>().unwrap();
        assert_eq!(schema.name(), "Checklist");
        assert!(schema.field("title").unwrap().required);
        assert!(!schema.field("owner").unwrap().required);
        assert_eq!(
            schema.field("priority").unwrap().ty,
            FieldType::Enum(vec!["low".into(), "high".into()])
        );
        match &schema.field("steps").unwrap().ty {
            FieldType::Array(item) => match item.as_ref() {
                FieldType::Object(step) => {
                    assert_eq!(step.name(), "Step");
                    assert_eq!(step.field("path").unwrap().description.as_deref(), Some("Where the step applies."));
                }
                other => panic!("unexpected item type: {other:?}"),
            },
            other => panic!("unexpected type: {other:?}"),
        }
    }

    #[test]
    fn test_decode_keeps_extensions() {
        let schema = Schema::from_type::<Checklist>().unwrap();
        let mut typed = schema
            .validate(json!({
                "title": "ship",
                "steps": [{"path": "a", "done": false}],
                "priority": "high"
            }))
            .unwrap();
        typed.attach("plan", json!({"name": "calc"})).unwrap();

        let decoded: Checklist = typed.decode().unwrap();
        assert_eq!(decoded.title, "ship");
        assert_eq!(decoded.priority, Priority::High);
        assert_eq!(decoded.extra.get("plan"), Some(&json!({"name": "calc"})));
    }

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Tree {
        label: String,
        children: Vec<Tree>,
    }

    #[test]
    fn test_self_referential_rejected() {
        let err = Schema::from_type::<Tree>().unwrap_err();
        assert!(matches!(err, SchemaError::SelfReferential(_)));
    }

    #[test]
    fn test_from_json_schema_refs() {
        let doc = json!({
            "type": "object",
            "properties": {
                "a": {"$ref": "#/$defs/A"},
                "b": {"anyOf": [{"$ref": "#/$defs/A"}, {"type": "null"}]},
                "c": {"type": ["integer", "null"]}
            },
            "required": ["a", "b", "c"],
            "$defs": {
                "A": {"type": "object", "properties": {"x": {"type": "number"}}, "required": ["x"]}
            }
        });
        let schema = Schema::from_json_schema("Root", &doc).unwrap();
        assert!(schema.field("a").unwrap().required);
        assert!(!schema.field("b").unwrap().required);
        assert!(!schema.field("c").unwrap().required);
        assert_eq!(schema.field("c").unwrap().ty, FieldType::Integer);
    }

    #[test]
    fn test_from_json_schema_errors() {
        let missing = json!({"type": "object", "properties": {"a": {"$ref": "#/$defs/Nope"}}});
        assert!(matches!(
            Schema::from_json_schema("R", &missing),
            Err(SchemaError::UnresolvedRef(_))
        ));

        let cyclic = json!({
            "type": "object",
            "properties": {"a": {"$ref": "#/$defs/A"}},
            "$defs": {"A": {"type": "object", "properties": {"next": {"$ref": "#/$defs/A"}}}}
        });
        assert_eq!(
            Schema::from_json_schema("R", &cyclic),
            Err(SchemaError::SelfReferential("A".into()))
        );

        let untyped = json!({"type": "object", "properties": {"a": {}}});
        assert!(matches!(
            Schema::from_json_schema("R", &untyped),
            Err(SchemaError::UnsupportedType { .. })
        ));

        assert!(matches!(
            Schema::from_json_schema("R", &json!({"type": "string"})),
            Err(SchemaError::NotAnObject(_))
        ));
    }
}
