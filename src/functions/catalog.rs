//! Function catalog
//!
//! Static schema of every callable tool with typed parameter contracts.
//! The catalog doubles as the allow-list: a name that is not here is
//! rejected by the executor before argument validation.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Definition of one callable function, in the shape the chat API expects
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// All callable functions
pub fn catalog() -> Vec<FunctionDef> {
    vec![
        FunctionDef {
            name: "launch_application".to_string(),
            description: "Launch an application by its short name. Only whitelisted apps \
                (chrome, firefox, edge, vscode, notepad, calculator, explorer) can be launched."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "app_name": {
                        "type": "string",
                        "description": "Application name, e.g. 'chrome', 'vscode', 'notepad'"
                    },
                    "arguments": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Optional command-line arguments"
                    }
                },
                "required": ["app_name"]
            }),
        },
        FunctionDef {
            name: "open_file".to_string(),
            description: "Open a file or folder with its default application.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path to the file or folder (supports ~ for home)"
                    }
                },
                "required": ["path"]
            }),
        },
        FunctionDef {
            name: "open_url".to_string(),
            description: "Open a public http(s) URL in the default browser.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": {
                        "type": "string",
                        "description": "The URL to open"
                    }
                },
                "required": ["url"]
            }),
        },
        FunctionDef {
            name: "run_command".to_string(),
            description: "Run a read-only shell query (Get-*, dir, ls, echo and similar). \
                Destructive commands are rejected. Output is truncated.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": {
                        "type": "string",
                        "description": "The command to run"
                    }
                },
                "required": ["command"]
            }),
        },
        FunctionDef {
            name: "get_system_info".to_string(),
            description: "Get CPU, memory, and disk usage for this machine.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        FunctionDef {
            name: "get_time".to_string(),
            description: "Get the current time.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        FunctionDef {
            name: "get_date".to_string(),
            description: "Get the current date and day of week.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        FunctionDef {
            name: "list_files".to_string(),
            description: "List the contents of a directory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Directory to list"
                    }
                },
                "required": ["path"]
            }),
        },
        FunctionDef {
            name: "create_file".to_string(),
            description: "Create a new file with optional content. Maximum size 10 MiB.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of the file to create"
                    },
                    "content": {
                        "type": "string",
                        "description": "Initial content (defaults to empty)"
                    }
                },
                "required": ["path"]
            }),
        },
        FunctionDef {
            name: "read_file".to_string(),
            description: "Read a text file. Files over 10 MiB are rejected; returned content \
                is truncated to 1000 bytes but the true size is reported.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of the file to read"
                    }
                },
                "required": ["path"]
            }),
        },
        FunctionDef {
            name: "delete_file".to_string(),
            description: "Delete a file. Requires user confirmation.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {
                        "type": "string",
                        "description": "Path of the file to delete"
                    }
                },
                "required": ["path"]
            }),
        },
        FunctionDef {
            name: "move_file".to_string(),
            description: "Move or rename a file within the allowed directories.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "source": {
                        "type": "string",
                        "description": "Current path"
                    },
                    "destination": {
                        "type": "string",
                        "description": "New path"
                    }
                },
                "required": ["source", "destination"]
            }),
        },
        FunctionDef {
            name: "search_files".to_string(),
            description: "Search for files by name substring under a directory.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Name substring to look for"
                    },
                    "directory": {
                        "type": "string",
                        "description": "Directory to search (defaults to home)"
                    }
                },
                "required": ["query"]
            }),
        },
        FunctionDef {
            name: "manage_window".to_string(),
            description: "Minimize, maximize, close, or focus a window.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ["minimize", "maximize", "close", "focus"],
                        "description": "What to do with the window"
                    },
                    "title": {
                        "type": "string",
                        "description": "Window title to target (defaults to the active window)"
                    }
                },
                "required": ["action"]
            }),
        },
        FunctionDef {
            name: "set_volume".to_string(),
            description: "Set the system master volume. Values outside 0-100 are clamped.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "level": {
                        "type": "integer",
                        "description": "Volume level 0-100"
                    }
                },
                "required": ["level"]
            }),
        },
        FunctionDef {
            name: "get_volume".to_string(),
            description: "Get the current system master volume level.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        FunctionDef {
            name: "copy_to_clipboard".to_string(),
            description: "Copy text to the system clipboard.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "text": {
                        "type": "string",
                        "description": "Text to copy"
                    }
                },
                "required": ["text"]
            }),
        },
        FunctionDef {
            name: "get_clipboard".to_string(),
            description: "Get the current text contents of the system clipboard.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
        FunctionDef {
            name: "get_running_applications".to_string(),
            description: "List applications with visible windows.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}

/// Look up a function by name
pub fn find(name: &str) -> Option<FunctionDef> {
    catalog().into_iter().find(|f| f.name == name)
}

/// Tool definitions in chat-completions format
pub fn chat_tool_definitions() -> Vec<Value> {
    catalog()
        .into_iter()
        .map(|f| {
            json!({
                "type": "function",
                "function": {
                    "name": f.name,
                    "description": f.description,
                    "parameters": f.parameters,
                }
            })
        })
        .collect()
}

/// Tool definitions in the flattened shape the realtime session expects
pub fn realtime_tool_definitions() -> Vec<Value> {
    catalog()
        .into_iter()
        .map(|f| {
            json!({
                "type": "function",
                "name": f.name,
                "description": f.description,
                "parameters": f.parameters,
            })
        })
        .collect()
}

/// Validate arguments against a function's parameter schema: required keys
/// present, primitive types match, enum values allowed.
pub fn validate_args(def: &FunctionDef, args: &Value) -> Result<(), String> {
    let empty = serde_json::Map::new();
    let provided = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => return Err(format!("arguments must be an object, got {}", type_name(other))),
    };

    let required: Vec<&str> = def.parameters["required"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    for key in &required {
        if !provided.contains_key(*key) {
            return Err(format!("missing required argument '{}'", key));
        }
    }

    let properties = match def.parameters["properties"].as_object() {
        Some(props) => props,
        None => return Ok(()),
    };

    for (key, value) in provided {
        let schema = match properties.get(key) {
            Some(s) => s,
            // Extra keys from the model are tolerated
            None => continue,
        };

        if let Some(expected) = schema["type"].as_str() {
            let matches = match expected {
                "string" => value.is_string(),
                "integer" => value.is_i64() || value.is_u64(),
                "number" => value.is_number(),
                "boolean" => value.is_boolean(),
                "array" => value.is_array(),
                "object" => value.is_object(),
                _ => true,
            };
            if !matches {
                return Err(format!(
                    "argument '{}' should be {}, got {}",
                    key,
                    expected,
                    type_name(value)
                ));
            }
        }

        if let Some(allowed) = schema["enum"].as_array() {
            if !allowed.contains(value) {
                return Err(format!(
                    "argument '{}' must be one of {}",
                    key,
                    serde_json::to_string(allowed).unwrap_or_default()
                ));
            }
        }
    }

    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_unique() {
        let names: Vec<String> = catalog().into_iter().map(|f| f.name).collect();
        let mut deduped = names.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn test_find_known_and_unknown() {
        assert!(find("read_file").is_some());
        assert!(find("set_volume").is_some());
        assert!(find("format_disk").is_none());
    }

    #[test]
    fn test_validate_required_args() {
        let def = find("read_file").unwrap();
        assert!(validate_args(&def, &json!({"path": "/tmp/x"})).is_ok());
        assert!(validate_args(&def, &json!({})).is_err());
        assert!(validate_args(&def, &json!({"path": 42})).is_err());
    }

    #[test]
    fn test_validate_enum() {
        let def = find("manage_window").unwrap();
        assert!(validate_args(&def, &json!({"action": "minimize"})).is_ok());
        assert!(validate_args(&def, &json!({"action": "explode"})).is_err());
    }

    #[test]
    fn test_validate_no_params_function() {
        let def = find("get_time").unwrap();
        assert!(validate_args(&def, &json!({})).is_ok());
        assert!(validate_args(&def, &Value::Null).is_ok());
    }

    #[test]
    fn test_extra_keys_tolerated() {
        let def = find("get_volume").unwrap();
        assert!(validate_args(&def, &json!({"verbose": true})).is_ok());
    }

    #[test]
    fn test_tool_definition_shapes() {
        let chat = chat_tool_definitions();
        assert_eq!(chat[0]["type"], "function");
        assert!(chat[0]["function"]["name"].is_string());

        let realtime = realtime_tool_definitions();
        assert!(realtime[0]["name"].is_string());
        assert!(realtime[0].get("function").is_none());
    }
}
