use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

const DEFAULT_SCROLL_AMOUNT: u32 = 3;
const LABEL_TEXT_LIMIT: usize = 40;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: i64,
    pub y: i64,
}

impl Coordinate {
    pub fn new(x: i64, y: i64) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

impl ScrollDirection {
    /// X11 pointer button that produces one wheel step in this direction.
    pub fn button(self) -> u8 {
        match self {
            ScrollDirection::Up => 4,
            ScrollDirection::Down => 5,
            ScrollDirection::Left => 6,
            ScrollDirection::Right => 7,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Left => "left",
            ScrollDirection::Right => "right",
        }
    }
}

/// The computer tool's action vocabulary.
///
/// Coordinates are passed to the input layer as given; nothing here checks
/// them against the display bounds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    LeftClick { coordinate: Option<Coordinate> },
    RightClick { coordinate: Option<Coordinate> },
    DoubleClick { coordinate: Option<Coordinate> },
    Type { text: String },
    Key { key: String },
    Scroll {
        coordinate: Option<Coordinate>,
        direction: ScrollDirection,
        amount: u32,
    },
    MouseMove { coordinate: Coordinate },
    Screenshot,
    CursorPosition,
    Unknown { name: String },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionParseError {
    #[error("tool input must be a JSON object")]
    NotAnObject,
    #[error("tool input is missing `action`")]
    MissingAction,
    #[error("`{action}` requires `{param}`")]
    MissingParam { action: String, param: &'static str },
    #[error("invalid `{param}`: {reason}")]
    InvalidParam { param: &'static str, reason: String },
}

impl Action {
    /// Normalizes a tool-use `input` object into an [`Action`].
    ///
    /// Coordinates are accepted as `[x, y]` or `{"x": .., "y": ..}`, numbers as
    /// JSON numbers or numeric strings. Action names outside the vocabulary
    /// become [`Action::Unknown`] rather than an error.
    pub fn from_input(input: &Value) -> Result<Self, ActionParseError> {
        let obj = input.as_object().ok_or(ActionParseError::NotAnObject)?;
        let name = obj
            .get("action")
            .and_then(|x| x.as_str())
            .ok_or(ActionParseError::MissingAction)?;

        let action = match name {
            "left_click" => Action::LeftClick { coordinate: coordinate(obj)? },
            "right_click" => Action::RightClick { coordinate: coordinate(obj)? },
            "double_click" => Action::DoubleClick { coordinate: coordinate(obj)? },
            "type" => Action::Type { text: required_str(obj, name, "text")? },
            "key" => {
                let key = obj
                    .get("key")
                    .or_else(|| obj.get("text"))
                    .and_then(|x| x.as_str())
                    .ok_or_else(|| ActionParseError::MissingParam {
                        action: name.to_string(),
                        param: "key",
                    })?;
                Action::Key { key: key.to_string() }
            }
            "scroll" => Action::Scroll {
                coordinate: coordinate(obj)?,
                direction: scroll_direction(obj)?,
                amount: match obj.get("amount").or_else(|| obj.get("scroll_amount")) {
                    Some(v) if !v.is_null() => scroll_amount(v)?,
                    _ => DEFAULT_SCROLL_AMOUNT,
                },
            },
            "mouse_move" => Action::MouseMove {
                coordinate: coordinate(obj)?.ok_or_else(|| ActionParseError::MissingParam {
                    action: name.to_string(),
                    param: "coordinate",
                })?,
            },
            "screenshot" => Action::Screenshot,
            "cursor_position" => Action::CursorPosition,
            other => Action::Unknown { name: other.to_string() },
        };
        Ok(action)
    }

    pub fn name(&self) -> &str {
        match self {
            Action::LeftClick { .. } => "left_click",
            Action::RightClick { .. } => "right_click",
            Action::DoubleClick { .. } => "double_click",
            Action::Type { .. } => "type",
            Action::Key { .. } => "key",
            Action::Scroll { .. } => "scroll",
            Action::MouseMove { .. } => "mouse_move",
            Action::Screenshot => "screenshot",
            Action::CursorPosition => "cursor_position",
            Action::Unknown { name } => name,
        }
    }

    /// Short human-readable description for progress displays.
    pub fn label(&self) -> String {
        fn at(c: &Option<Coordinate>) -> String {
            match c {
                Some(c) => format!(" at ({}, {})", c.x, c.y),
                None => String::new(),
            }
        }
        match self {
            Action::LeftClick { coordinate } => format!("Click{}", at(coordinate)),
            Action::RightClick { coordinate } => format!("Right-click{}", at(coordinate)),
            Action::DoubleClick { coordinate } => format!("Double-click{}", at(coordinate)),
            Action::Type { text } => {
                let shown: String = text.chars().take(LABEL_TEXT_LIMIT).collect();
                format!("Typing '{shown}'")
            }
            Action::Key { key } => format!("Key press: {key}"),
            Action::Scroll { direction, .. } => format!("Scroll {}", direction.as_str()),
            Action::MouseMove { coordinate } => {
                format!("Mouse move to ({}, {})", coordinate.x, coordinate.y)
            }
            Action::Screenshot => "Taking screenshot".to_string(),
            Action::CursorPosition => "Getting cursor position".to_string(),
            Action::Unknown { name } => name.clone(),
        }
    }
}

fn required_str(
    obj: &Map<String, Value>,
    action: &str,
    param: &'static str,
) -> Result<String, ActionParseError> {
    obj.get(param)
        .and_then(|x| x.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ActionParseError::MissingParam { action: action.to_string(), param })
}

fn coordinate(obj: &Map<String, Value>) -> Result<Option<Coordinate>, ActionParseError> {
    let v = match obj.get("coordinate") {
        None | Some(Value::Null) => return Ok(None),
        Some(v) => v,
    };
    let (x, y) = match v {
        Value::Array(items) if items.len() == 2 => (&items[0], &items[1]),
        Value::Object(map) => match (map.get("x"), map.get("y")) {
            (Some(x), Some(y)) => (x, y),
            _ => {
                return Err(ActionParseError::InvalidParam {
                    param: "coordinate",
                    reason: format!("expected x and y, got {v}"),
                })
            }
        },
        _ => {
            return Err(ActionParseError::InvalidParam {
                param: "coordinate",
                reason: format!("expected [x, y], got {v}"),
            })
        }
    };
    Ok(Some(Coordinate::new(
        integer(x, "coordinate")?,
        integer(y, "coordinate")?,
    )))
}

fn integer(v: &Value, param: &'static str) -> Result<i64, ActionParseError> {
    let parsed = match v {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| ActionParseError::InvalidParam {
        param,
        reason: format!("expected an integer, got {v}"),
    })
}

fn scroll_amount(v: &Value) -> Result<u32, ActionParseError> {
    let n = integer(v, "amount")?;
    u32::try_from(n).map_err(|_| ActionParseError::InvalidParam {
        param: "amount",
        reason: format!("{n} is not a click count"),
    })
}

fn scroll_direction(obj: &Map<String, Value>) -> Result<ScrollDirection, ActionParseError> {
    let raw = obj
        .get("direction")
        .or_else(|| obj.get("scroll_direction"))
        .and_then(|x| x.as_str())
        .ok_or_else(|| ActionParseError::MissingParam {
            action: "scroll".to_string(),
            param: "direction",
        })?;
    match raw {
        "up" => Ok(ScrollDirection::Up),
        "down" => Ok(ScrollDirection::Down),
        "left" => Ok(ScrollDirection::Left),
        "right" => Ok(ScrollDirection::Right),
        other => Err(ActionParseError::InvalidParam {
            param: "direction",
            reason: format!("unknown scroll direction `{other}`"),
        }),
    }
}

/// Parses `xdotool getmouselocation` output (`x:12 y:34 screen:0 window:5`).
pub fn parse_cursor_position(raw: &str) -> Option<(i64, i64)> {
    let mut x = None;
    let mut y = None;
    for field in raw.split_whitespace() {
        if let Some(v) = field.strip_prefix("x:") {
            x = v.parse().ok();
        } else if let Some(v) = field.strip_prefix("y:") {
            y = v.parse().ok();
        }
    }
    Some((x?, y?))
}
