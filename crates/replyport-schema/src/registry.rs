use std::collections::HashMap;
use std::io::Read;
use std::path::Path;

use jsonschema::Validator;
use serde_json::{Map, Value};

use crate::config::RegistryConfig;
use crate::error::{Result, SchemaError};
use crate::validator::validate_value;

/// Name of the built-in schema for connect-time peer identities.
pub const PEER_IDENTITY: &str = "peer-identity";

/// `{ id, name, version }`, all non-empty strings. Extra fields are allowed.
pub const PEER_IDENTITY_SCHEMA: &str = r#"{
    "type": "object",
    "properties": {
        "id": { "type": "string", "minLength": 1 },
        "name": { "type": "string", "minLength": 1 },
        "version": { "type": "string", "minLength": 1 }
    },
    "required": ["id", "name", "version"]
}"#;

const SCHEMA_SUFFIX: &str = ".schema.json";

/// Name-keyed registry of compiled JSON Schema validators.
pub struct SchemaRegistry {
    validators: HashMap<String, Validator>,
    config: RegistryConfig,
}

impl SchemaRegistry {
    /// Create an empty registry with default config.
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    /// Create an empty registry with explicit config.
    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            validators: HashMap::new(),
            config,
        }
    }

    /// Create a registry holding the built-in schemas.
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        registry.register_builtins()?;
        Ok(registry)
    }

    /// Register the built-in schemas, replacing any with the same names.
    pub fn register_builtins(&mut self) -> Result<()> {
        self.register(PEER_IDENTITY, PEER_IDENTITY_SCHEMA)
    }

    /// Register a schema from a JSON string.
    pub fn register(&mut self, name: &str, schema_json: &str) -> Result<()> {
        let schema: Value = serde_json::from_str(schema_json)?;
        self.register_value(name, &schema)
    }

    /// Register a schema from a JSON value.
    pub fn register_value(&mut self, name: &str, schema: &Value) -> Result<()> {
        if !is_valid_name(name) {
            return Err(SchemaError::InvalidName(name.to_string()));
        }

        let mut schema_to_compile = schema.clone();
        if self.config.strict_mode {
            apply_strict_mode(&mut schema_to_compile);
        }

        let compiled = jsonschema::validator_for(&schema_to_compile)
            .map_err(|err| SchemaError::CompileFailed(err.to_string()))?;

        tracing::debug!(name, "registered schema");
        self.validators.insert(name.to_string(), compiled);
        Ok(())
    }

    /// Load `<name>.schema.json` files from a directory.
    pub fn from_directory(path: &Path) -> Result<Self> {
        Self::from_directory_with_config(path, RegistryConfig::default())
    }

    /// Load schemas from a directory with explicit config.
    pub fn from_directory_with_config(path: &Path, config: RegistryConfig) -> Result<Self> {
        let mut registry = Self::with_config(config);
        let mut loaded_schema_count = 0usize;

        let entries = std::fs::read_dir(path)
            .map_err(|err| SchemaError::LoadFailed(format!("{}: {err}", path.display())))?;

        for entry in entries {
            let entry = entry.map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            let Some(name) = file_name.strip_suffix(SCHEMA_SUFFIX) else {
                continue;
            };
            let entry_path = entry.path();
            let path_metadata = std::fs::symlink_metadata(&entry_path)
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;
            let file_type = path_metadata.file_type();

            if file_type.is_symlink() {
                return Err(SchemaError::LoadFailed(format!(
                    "refusing to load schema symlink: {file_name}"
                )));
            }
            if !file_type.is_file() {
                continue;
            }
            if !is_valid_name(name) {
                return Err(SchemaError::LoadFailed(format!(
                    "unrecognized schema filename: {file_name}"
                )));
            }

            loaded_schema_count = loaded_schema_count.saturating_add(1);
            if loaded_schema_count > registry.config.max_schemas_from_directory {
                return Err(SchemaError::LoadFailed(format!(
                    "schema count exceeds configured max ({}): {}",
                    registry.config.max_schemas_from_directory, loaded_schema_count
                )));
            }

            let file = std::fs::File::open(&entry_path).map_err(|err| {
                SchemaError::LoadFailed(format!(
                    "failed opening schema {}: {err}",
                    entry_path.display()
                ))
            })?;
            let opened_metadata = file
                .metadata()
                .map_err(|err| SchemaError::LoadFailed(err.to_string()))?;

            #[cfg(unix)]
            {
                if !same_file_identity(&path_metadata, &opened_metadata) {
                    return Err(SchemaError::LoadFailed(format!(
                        "schema file changed during load: {file_name}"
                    )));
                }
            }

            if opened_metadata.len() > registry.config.max_schema_file_size as u64 {
                return Err(SchemaError::LoadFailed(format!(
                    "schema file too large ({} bytes): {file_name}",
                    opened_metadata.len()
                )));
            }

            let max_bytes = registry.config.max_schema_file_size;
            let read_limit = u64::try_from(max_bytes.saturating_add(1)).unwrap_or(u64::MAX);
            let mut content = String::new();
            file.take(read_limit)
                .read_to_string(&mut content)
                .map_err(|err| {
                    SchemaError::LoadFailed(format!(
                        "failed reading schema {}: {err}",
                        entry_path.display()
                    ))
                })?;
            if content.len() > max_bytes {
                return Err(SchemaError::LoadFailed(format!(
                    "schema file too large while reading: {file_name}"
                )));
            }

            registry.register(name, &content)?;
        }

        Ok(registry)
    }

    /// Validate a value against the schema registered under `name`.
    pub fn validate(&self, name: &str, value: &Value) -> Result<()> {
        match self.validators.get(name) {
            Some(validator) => validate_value(name, value, validator),
            None if self.config.fail_on_missing_schema => {
                Err(SchemaError::NoSchema(name.to_string()))
            }
            None => Ok(()),
        }
    }

    /// Validate positional call arguments, checked as one JSON array.
    pub fn validate_args(&self, name: &str, args: &[Value]) -> Result<()> {
        if !self.validators.contains_key(name) && !self.config.fail_on_missing_schema {
            return Ok(());
        }
        self.validate(name, &Value::Array(args.to_vec()))
    }

    /// Check if a name has a registered schema.
    pub fn has_schema(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Names that have registered schemas, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.validators.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Get registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("names", &self.names())
            .field("config", &self.config)
            .finish()
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 128
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'))
}

fn apply_strict_mode(value: &mut Value) {
    match value {
        Value::Object(map) => {
            if is_object_schema(map) && !map.contains_key("additionalProperties") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));
            }

            recurse_object_schema_children(map);
        }
        Value::Array(items) => {
            for item in items {
                apply_strict_mode(item);
            }
        }
        _ => {}
    }
}

fn recurse_object_schema_children(map: &mut Map<String, Value>) {
    for key in [
        "properties",
        "patternProperties",
        "dependentSchemas",
        "$defs",
        "definitions",
    ] {
        if let Some(Value::Object(obj)) = map.get_mut(key) {
            for value in obj.values_mut() {
                apply_strict_mode(value);
            }
        }
    }

    for key in [
        "propertyNames",
        "additionalProperties",
        "unevaluatedProperties",
        "items",
        "contains",
        "additionalItems",
        "unevaluatedItems",
        "not",
        "if",
        "then",
        "else",
        "prefixItems",
        "allOf",
        "anyOf",
        "oneOf",
    ] {
        if let Some(value) = map.get_mut(key) {
            apply_strict_mode(value);
        }
    }
}

fn is_object_schema(map: &Map<String, Value>) -> bool {
    const OBJECT_KEYWORDS: [&str; 8] = [
        "properties",
        "patternProperties",
        "additionalProperties",
        "unevaluatedProperties",
        "required",
        "dependentRequired",
        "dependentSchemas",
        "propertyNames",
    ];

    match map.get("type") {
        Some(Value::String(kind)) => kind == "object",
        Some(Value::Array(items)) => items
            .iter()
            .any(|item| matches!(item, Value::String(kind) if kind == "object")),
        _ => OBJECT_KEYWORDS
            .iter()
            .any(|keyword| map.contains_key(*keyword)),
    }
}

#[cfg(unix)]
fn same_file_identity(
    path_metadata: &std::fs::Metadata,
    opened_metadata: &std::fs::Metadata,
) -> bool {
    use std::os::unix::fs::MetadataExt;
    path_metadata.dev() == opened_metadata.dev() && path_metadata.ino() == opened_metadata.ino()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;

    const OBJECT_SCHEMA: &str = r#"{
        "type": "object",
        "properties": {
            "tabId": { "type": "integer" },
            "url": { "type": "string" }
        },
        "required": ["tabId"]
    }"#;

    const RELOAD_ARGS: &str = r#"{
        "type": "array",
        "items": {
            "type": "object",
            "properties": { "tabId": { "type": "integer" } },
            "required": ["tabId"]
        },
        "minItems": 1
    }"#;

    #[test]
    fn register_and_validate() {
        let mut registry = SchemaRegistry::new();
        registry.register("tab", OBJECT_SCHEMA).unwrap();

        assert!(registry.validate("tab", &json!({"tabId": 7})).is_ok());
        assert!(matches!(
            registry.validate("tab", &json!({"tabId": "seven"})),
            Err(SchemaError::ValidationFailed { .. })
        ));
    }

    #[test]
    fn builtin_peer_identity() {
        let registry = SchemaRegistry::with_builtins().unwrap();
        let ok = json!({"id": "browser-1", "name": "Chrome", "version": "123"});
        assert!(registry.validate(PEER_IDENTITY, &ok).is_ok());

        let extra = json!({"id": "b", "name": "Firefox", "version": "1", "type": "firefox"});
        assert!(registry.validate(PEER_IDENTITY, &extra).is_ok());

        for bad in [
            json!({"id": "browser-1", "name": "Chrome"}),
            json!({"id": "", "name": "Chrome", "version": "123"}),
            json!({"id": 1, "name": "Chrome", "version": "123"}),
            json!("browser-1"),
        ] {
            assert!(registry.validate(PEER_IDENTITY, &bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn call_args_are_validated_as_array() {
        let mut registry = SchemaRegistry::new();
        registry.register("tabs:reload", RELOAD_ARGS).unwrap();

        assert!(registry
            .validate_args("tabs:reload", &[json!({"tabId": 7})])
            .is_ok());
        assert!(registry.validate_args("tabs:reload", &[]).is_err());
        assert!(registry
            .validate_args("tabs:reload", &[json!({"tabId": "x"})])
            .is_err());
        assert!(registry.validate_args("unknown", &[json!(1)]).is_ok());
    }

    #[test]
    fn missing_schema_permissive_passes() {
        let registry = SchemaRegistry::new();
        assert!(registry.validate("nothing", &json!({"any": "thing"})).is_ok());
    }

    #[test]
    fn missing_schema_strict_fails() {
        let registry = SchemaRegistry::with_config(RegistryConfig {
            fail_on_missing_schema: true,
            ..RegistryConfig::default()
        });

        assert!(matches!(
            registry.validate("nothing", &json!({})),
            Err(SchemaError::NoSchema(name)) if name == "nothing"
        ));
        assert!(registry.validate_args("nothing", &[]).is_err());
    }

    #[test]
    fn strict_mode_rejects_additional_properties() {
        let mut permissive = SchemaRegistry::new();
        permissive.register("tab", OBJECT_SCHEMA).unwrap();

        let mut strict = SchemaRegistry::with_config(RegistryConfig {
            strict_mode: true,
            ..RegistryConfig::default()
        });
        strict.register("tab", OBJECT_SCHEMA).unwrap();

        let payload = json!({"tabId": 1, "extra": true});
        assert!(permissive.validate("tab", &payload).is_ok());
        assert!(strict.validate("tab", &payload).is_err());
    }

    #[test]
    fn strict_mode_applies_nested_objects() {
        let schema = r#"{
            "type": "object",
            "properties": {
                "nested": {
                    "type": "object",
                    "properties": { "v": { "type": "integer" } },
                    "required": ["v"]
                }
            },
            "required": ["nested"]
        }"#;

        let mut strict = SchemaRegistry::with_config(RegistryConfig {
            strict_mode: true,
            ..RegistryConfig::default()
        });
        strict.register("n", schema).unwrap();

        assert!(strict.validate("n", &json!({"nested": {"v": 1}})).is_ok());
        assert!(strict
            .validate("n", &json!({"nested": {"v": 1, "extra": true}}))
            .is_err());
    }

    #[test]
    fn invalid_schema_fails_compile() {
        let mut registry = SchemaRegistry::new();
        assert!(matches!(
            registry.register("bad", r#"{"type":"definitely-not-a-type"}"#),
            Err(SchemaError::CompileFailed(_))
        ));
    }

    #[test]
    fn rejects_unusable_names() {
        let mut registry = SchemaRegistry::new();
        for name in ["", "a/b", "with space", "../up"] {
            assert!(matches!(
                registry.register(name, OBJECT_SCHEMA),
                Err(SchemaError::InvalidName(_))
            ));
        }
    }

    fn make_temp_schema_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "replyport-schema-{tag}-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_schema(dir: &Path, file_name: &str, contents: &str) {
        std::fs::write(dir.join(file_name), contents.as_bytes()).unwrap();
    }

    #[test]
    fn from_directory_loads_and_validates() {
        let dir = make_temp_schema_dir("from-directory");
        write_schema(&dir, "tab.schema.json", OBJECT_SCHEMA);
        write_schema(&dir, "tabs:reload.schema.json", RELOAD_ARGS);
        write_schema(&dir, "ignored.json", OBJECT_SCHEMA);

        let registry = SchemaRegistry::from_directory(&dir).unwrap();
        assert_eq!(registry.names(), vec!["tab", "tabs:reload"]);
        assert!(registry
            .validate_args("tabs:reload", &[json!({"tabId": 1})])
            .is_ok());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unusable_schema_file_name_errors() {
        let dir = make_temp_schema_dir("bad-name");
        write_schema(&dir, "has space.schema.json", OBJECT_SCHEMA);
        let result = SchemaRegistry::from_directory(&dir);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[cfg(unix)]
    #[test]
    fn symlinked_schema_is_rejected() {
        let dir = make_temp_schema_dir("symlink-schema");
        let target = dir.join("target.json");
        std::fs::write(&target, OBJECT_SCHEMA.as_bytes()).unwrap();
        std::os::unix::fs::symlink(&target, dir.join("tab.schema.json")).unwrap();

        let result = SchemaRegistry::from_directory(&dir);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn schema_count_limit_is_enforced() {
        let dir = make_temp_schema_dir("schema-count-limit");
        write_schema(&dir, "a.schema.json", OBJECT_SCHEMA);
        write_schema(&dir, "b.schema.json", OBJECT_SCHEMA);

        let config = RegistryConfig {
            max_schemas_from_directory: 1,
            ..RegistryConfig::default()
        };
        let result = SchemaRegistry::from_directory_with_config(&dir, config);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn schema_file_size_limit_is_enforced() {
        let dir = make_temp_schema_dir("schema-size-limit");
        write_schema(&dir, "tab.schema.json", OBJECT_SCHEMA);

        let config = RegistryConfig {
            max_schema_file_size: 8,
            ..RegistryConfig::default()
        };
        let result = SchemaRegistry::from_directory_with_config(&dir, config);
        assert!(matches!(result, Err(SchemaError::LoadFailed(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
