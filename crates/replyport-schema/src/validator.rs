use jsonschema::Validator;
use serde_json::Value;

use crate::error::{Result, SchemaError};

/// Validate `value`, joining up to four error messages into one.
pub(crate) fn validate_value(name: &str, value: &Value, validator: &Validator) -> Result<()> {
    let mut errors = validator.iter_errors(value);
    if let Some(first) = errors.next() {
        let mut message = first.to_string();
        for err in errors.take(3) {
            message.push_str("; ");
            message.push_str(&err.to_string());
        }
        return Err(SchemaError::ValidationFailed {
            name: name.to_string(),
            message,
        });
    }

    Ok(())
}
