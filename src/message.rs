//! Conversation turns exchanged with the model, in the Messages API wire shape.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

pub const PNG_MEDIA_TYPE: &str = "image/png";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

impl ImageSource {
    pub fn png(base64: impl Into<String>) -> Self {
        Self {
            kind: "base64".into(),
            media_type: PNG_MEDIA_TYPE.into(),
            data: base64.into(),
        }
    }
}

/// One typed unit of a turn's payload.
///
/// Blocks of a type the agent does not interpret are kept as raw JSON in
/// [`ContentBlock::Other`] and serialized back untouched.
#[derive(Clone, Debug, PartialEq)]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: Vec<ContentBlock>,
        is_error: bool,
    },
    Other(Value),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn png(base64: impl Into<String>) -> Self {
        ContentBlock::Image { source: ImageSource::png(base64) }
    }

    pub fn tool_use_id(&self) -> Option<&str> {
        match self {
            ContentBlock::ToolUse { id, .. } => Some(id),
            _ => None,
        }
    }

    fn to_value(&self) -> Value {
        match self {
            ContentBlock::Text { text } => json!({ "type": "text", "text": text }),
            ContentBlock::Image { source } => json!({ "type": "image", "source": source }),
            ContentBlock::ToolUse { id, name, input } => {
                json!({ "type": "tool_use", "id": id, "name": name, "input": input })
            }
            ContentBlock::ToolResult { tool_use_id, content, is_error } => {
                let mut v = json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content.iter().map(ContentBlock::to_value).collect::<Vec<_>>(),
                });
                if *is_error {
                    v["is_error"] = Value::Bool(true);
                }
                v
            }
            ContentBlock::Other(raw) => raw.clone(),
        }
    }

    fn from_value(v: Value) -> Result<Self, String> {
        let obj = match v.as_object() {
            Some(obj) => obj,
            None => return Err(format!("content block must be an object, got {v}")),
        };
        let kind = obj
            .get("type")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string();
        let block = match kind.as_str() {
            "text" => ContentBlock::Text { text: str_field(obj, "text")? },
            "image" => {
                let source = obj
                    .get("source")
                    .cloned()
                    .ok_or("image block missing source")?;
                let source: ImageSource =
                    serde_json::from_value(source).map_err(|e| format!("image source: {e}"))?;
                ContentBlock::Image { source }
            }
            "tool_use" => ContentBlock::ToolUse {
                id: str_field(obj, "id")?,
                name: str_field(obj, "name")?,
                input: obj.get("input").cloned().unwrap_or_else(|| json!({})),
            },
            "tool_result" => {
                let content = match obj.get("content") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .cloned()
                        .map(ContentBlock::from_value)
                        .collect::<Result<Vec<_>, _>>()?,
                    Some(Value::String(s)) => vec![ContentBlock::text(s.clone())],
                    _ => Vec::new(),
                };
                ContentBlock::ToolResult {
                    tool_use_id: str_field(obj, "tool_use_id")?,
                    content,
                    is_error: obj.get("is_error").and_then(|x| x.as_bool()).unwrap_or(false),
                }
            }
            _ => ContentBlock::Other(v),
        };
        Ok(block)
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Result<String, String> {
    obj.get(key)
        .and_then(|x| x.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| format!("content block missing string field `{key}`"))
}

impl Serialize for ContentBlock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ContentBlock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        ContentBlock::from_value(v).map_err(D::Error::custom)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Turn {
    pub fn user(content: Vec<ContentBlock>) -> Self {
        Self { role: Role::User, content }
    }

    pub fn assistant(content: Vec<ContentBlock>) -> Self {
        Self { role: Role::Assistant, content }
    }

    pub fn tool_uses(&self) -> impl Iterator<Item = &ContentBlock> {
        self.content
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolUse { .. }))
    }

    pub fn has_tool_use(&self) -> bool {
        self.tool_uses().next().is_some()
    }

    /// Text blocks joined by newlines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
