// Typed tool arguments and the descriptors derived from them
//
// A tool is declared by its argument type: the type name is the tool name, the
// type's doc comment is the tool description, and its fields (with their serde
// defaults) are the input schema.

use crate::error::{FieldError, RegistryError, ToolError};
use crate::protocol::ToolSchema;
use jsonschema::error::ValidationErrorKind;
use jsonschema::{ValidationError, Validator};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::Any;
use std::fmt::Debug;

/// Type-erased, validated arguments on their way to a handler.
pub type BoxedArgs = Box<dyn Any + Send>;

/// Argument type of a tool.
///
/// Derive `Deserialize`, `Serialize` and `JsonSchema`, and give the type a doc
/// comment: it becomes the tool description.
pub trait ToolArgs: DeserializeOwned + Serialize + JsonSchema + Debug + Send + 'static {
    /// Checks that the schema cannot express. Return every violation found.
    fn check(&self) -> Vec<FieldError> {
        Vec::new()
    }
}

/// Derive the MCP descriptor of an argument type.
///
/// Pure and deterministic: the same type always yields the same descriptor.
pub fn describe<A: ToolArgs>() -> Result<ToolSchema, RegistryError> {
    let name = A::schema_name().to_string();

    let mut input_schema = serde_json::to_value(schemars::schema_for!(A)).map_err(|e| {
        RegistryError::InvalidSchema {
            tool: name.clone(),
            message: e.to_string(),
        }
    })?;
    let Some(object) = input_schema.as_object_mut() else {
        return Err(RegistryError::InvalidSchema {
            tool: name,
            message: "schema is not an object".to_string(),
        });
    };

    // Clients don't need the meta-schema, and title/description move up a level.
    // A doc comment that opens with a one-line paragraph arrives split in two.
    object.remove("$schema");
    bound_integers(object);
    let text = |value: Option<Value>| {
        value
            .and_then(|v| v.as_str().map(|s| s.trim().to_string()))
            .filter(|s| !s.is_empty())
    };
    let title = text(object.remove("title")).filter(|title| *title != name);
    let body = text(object.remove("description"));
    let description = match (title, body) {
        (Some(title), Some(body)) => format!("{}\n\n{}", title, body),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => String::new(),
    };

    if description.is_empty() {
        return Err(RegistryError::MissingDescription(name));
    }

    Ok(ToolSchema {
        name,
        description,
        input_schema,
    })
}

/// Name-side registry entry: descriptor plus a decoder into the argument type.
pub struct ArgumentSpec {
    schema: ToolSchema,
    validator: Validator,
    decode: fn(Value) -> Result<BoxedArgs, Vec<FieldError>>,
}

impl ArgumentSpec {
    pub fn of<A: ToolArgs>() -> Result<Self, RegistryError> {
        let schema = describe::<A>()?;
        let validator =
            jsonschema::validator_for(&schema.input_schema).map_err(|e| RegistryError::InvalidSchema {
                tool: schema.name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            schema,
            validator,
            decode: decode_boxed::<A>,
        })
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }

    pub fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    /// Validate a raw payload and decode it into the argument type.
    ///
    /// A missing or `null` payload counts as an empty object, so tools whose
    /// fields all have defaults can be called without arguments.
    pub fn decode(&self, raw: Value) -> Result<BoxedArgs, ToolError> {
        let raw = match raw {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };

        let mut errors: Vec<FieldError> =
            self.validator.iter_errors(&raw).map(field_error).collect();
        if errors.is_empty() {
            return (self.decode)(raw).map_err(ToolError::InvalidArguments);
        }

        // Run the semantic checks over the fields that did pass, so a single
        // response lists every problem with the payload.
        if let Some(stand_in) = self.stand_in(raw, &errors) {
            if let Err(more) = (self.decode)(stand_in) {
                for error in more {
                    let field = top_level(&error.field);
                    if !field.is_empty() && !errors.iter().any(|e| top_level(&e.field) == field) {
                        errors.push(error);
                    }
                }
            }
        }
        Err(ToolError::InvalidArguments(errors))
    }

    /// `raw` with every rejected field replaced: optional fields are dropped so
    /// their defaults apply, required ones get a neutral value of their type.
    fn stand_in(&self, raw: Value, errors: &[FieldError]) -> Option<Value> {
        let Value::Object(mut fields) = raw else {
            return None;
        };
        let input = &self.schema.input_schema;
        let required: Vec<&str> = input
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        for error in errors {
            let field = top_level(&error.field);
            if field.is_empty() {
                return None;
            }
            if required.contains(&field) {
                let property = input.get("properties")?.get(field)?;
                fields.insert(field.to_string(), neutral_value(property)?);
            } else {
                fields.remove(field);
            }
        }
        Some(Value::Object(fields))
    }
}

fn decode_boxed<A: ToolArgs>(raw: Value) -> Result<BoxedArgs, Vec<FieldError>> {
    let args: A =
        serde_json::from_value(raw).map_err(|e| vec![FieldError::new("", e.to_string())])?;

    let errors = args.check();
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(Box::new(args))
}

fn top_level(field: &str) -> &str {
    field.split_once('.').map_or(field, |(head, _)| head)
}

fn neutral_value(property: &Value) -> Option<Value> {
    if let Some(first) = property
        .get("enum")
        .and_then(Value::as_array)
        .and_then(|values| values.first())
    {
        return Some(first.clone());
    }

    let kind = match property.get("type")? {
        Value::String(kind) => kind.as_str(),
        Value::Array(kinds) => kinds.iter().filter_map(Value::as_str).find(|k| *k != "null")?,
        _ => return None,
    };
    Some(match kind {
        "integer" | "number" => Value::from(0),
        "string" => Value::from(""),
        "boolean" => Value::Bool(false),
        "array" => Value::Array(Vec::new()),
        "object" => Value::Object(serde_json::Map::new()),
        _ => Value::Null,
    })
}

/// Add explicit bounds to fixed-width integer formats. The validator does not
/// enforce `format`, and an out-of-range value would otherwise only fail in
/// serde, without a field name.
fn bound_integers(object: &mut serde_json::Map<String, Value>) {
    if let Some((minimum, maximum)) = object
        .get("format")
        .and_then(Value::as_str)
        .and_then(integer_range)
    {
        object.entry("minimum").or_insert(minimum);
        object.entry("maximum").or_insert(maximum);
    }

    for value in object.values_mut() {
        match value {
            Value::Object(child) => bound_integers(child),
            Value::Array(items) => items
                .iter_mut()
                .filter_map(Value::as_object_mut)
                .for_each(bound_integers),
            _ => {}
        }
    }
}

fn integer_range(format: &str) -> Option<(Value, Value)> {
    let (minimum, maximum): (Value, Value) = match format {
        "int8" => (i8::MIN.into(), i8::MAX.into()),
        "uint8" => (0.into(), u8::MAX.into()),
        "int16" => (i16::MIN.into(), i16::MAX.into()),
        "uint16" => (0.into(), u16::MAX.into()),
        "int32" => (i32::MIN.into(), i32::MAX.into()),
        "uint32" => (0.into(), u32::MAX.into()),
        "int64" | "int" => (i64::MIN.into(), i64::MAX.into()),
        "uint64" | "uint" => (0.into(), u64::MAX.into()),
        _ => return None,
    };
    Some((minimum, maximum))
}

fn field_error(error: ValidationError<'_>) -> FieldError {
    if let ValidationErrorKind::Required { property } = &error.kind {
        let field = property
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| property.to_string());
        return FieldError::new(field, "missing required field");
    }

    let field = error
        .instance_path
        .to_string()
        .trim_start_matches('/')
        .replace('/', ".");
    FieldError::new(field, error.to_string())
}
