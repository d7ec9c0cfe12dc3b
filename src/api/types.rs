//! Records exchanged with the review server.
//!
//! Only the fields the offline layer reads are typed; everything else is kept
//! in `extra` and written back unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A restaurant as served by `GET /restaurants`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Restaurant {
  pub id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub neighborhood: String,
  #[serde(default)]
  pub cuisine_type: String,
  /// The server echoes this back as "true"/"false" after a PUT
  #[serde(default, deserialize_with = "bool_or_string")]
  pub is_favorite: bool,
  /// Everything else, `photograph` included, exactly as the server sent it
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Restaurant {
  /// Photograph name; some servers send it as a number.
  pub fn photograph(&self) -> Option<String> {
    match self.extra.get("photograph")? {
      Value::String(s) => Some(s.clone()),
      Value::Number(n) => Some(n.to_string()),
      _ => None,
    }
  }
}

/// A review as served by `GET /reviews`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
  pub id: i64,
  #[serde(deserialize_with = "int_or_string")]
  pub restaurant_id: i64,
  #[serde(default)]
  pub name: String,
  #[serde(default, deserialize_with = "int_or_string")]
  pub rating: i64,
  #[serde(default)]
  pub comments: String,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

/// Body of `POST /reviews`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReview {
  pub restaurant_id: i64,
  pub name: String,
  pub rating: u8,
  pub comments: String,
}

fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Bool(b) => Ok(b),
    Value::String(s) => match s.trim() {
      "true" => Ok(true),
      "false" | "" => Ok(false),
      other => Err(serde::de::Error::custom(format!(
        "invalid boolean string: {}",
        other
      ))),
    },
    Value::Null => Ok(false),
    other => Err(serde::de::Error::custom(format!(
      "expected boolean, got {}",
      other
    ))),
  }
}

fn int_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
  D: Deserializer<'de>,
{
  match Value::deserialize(deserializer)? {
    Value::Number(n) => n
      .as_i64()
      .ok_or_else(|| serde::de::Error::custom(format!("expected integer, got {}", n))),
    Value::String(s) => s
      .trim()
      .parse()
      .map_err(|e| serde::de::Error::custom(format!("invalid integer '{}': {}", s, e))),
    other => Err(serde::de::Error::custom(format!(
      "expected integer, got {}",
      other
    ))),
  }
}
