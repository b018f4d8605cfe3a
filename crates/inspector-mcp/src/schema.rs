//! Result schemas.
//!
//! Every request names the shape its result must have. A result that does
//! not fit is reported as a schema mismatch instead of being handed to the
//! caller half-parsed.

use crate::error::{McpError, McpResult};
use jsonschema::Validator;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;

/// Validates and converts a raw JSON-RPC result.
pub trait ResultSchema: Send + Sync {
    type Output: Send;

    /// Parse `value`, returning a human-readable reason on mismatch.
    fn parse(&self, value: Value) -> Result<Self::Output, String>;
}

/// Schema backed by a serde type.
pub struct Typed<T>(PhantomData<fn() -> T>);

impl<T> Typed<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for Typed<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned + Send> ResultSchema for Typed<T> {
    type Output = T;

    fn parse(&self, value: Value) -> Result<T, String> {
        serde_json::from_value(value).map_err(|e| e.to_string())
    }
}

/// The empty result: any JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyResult;

impl ResultSchema for EmptyResult {
    type Output = ();

    fn parse(&self, value: Value) -> Result<(), String> {
        match value {
            Value::Object(_) => Ok(()),
            other => Err(format!("expected an object, got {}", other)),
        }
    }
}

/// Passes any result through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyResult;

impl ResultSchema for AnyResult {
    type Output = Value;

    fn parse(&self, value: Value) -> Result<Value, String> {
        Ok(value)
    }
}

/// Schema compiled from a JSON Schema document at runtime.
pub struct JsonSchema {
    validator: Validator,
}

impl JsonSchema {
    pub fn compile(schema: &Value) -> McpResult<Self> {
        let validator = jsonschema::validator_for(schema)
            .map_err(|e| McpError::InvalidConfig(format!("invalid JSON schema: {}", e)))?;
        Ok(Self { validator })
    }

    /// Check `instance`, collecting the first few violations.
    pub fn validate(&self, instance: &Value) -> Result<(), String> {
        if self.validator.is_valid(instance) {
            return Ok(());
        }
        let errors: Vec<String> = self
            .validator
            .iter_errors(instance)
            .take(5)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();
        Err(errors.join("; "))
    }
}

impl std::fmt::Debug for JsonSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonSchema").finish_non_exhaustive()
    }
}

impl ResultSchema for JsonSchema {
    type Output = Value;

    fn parse(&self, value: Value) -> Result<Value, String> {
        self.validate(&value)?;
        Ok(value)
    }
}
