use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique, never reused service identifier property.
pub const SERVICE_ID: &str = "service.id";
/// Integer ranking property; higher wins, absent or non-integer means 0.
pub const SERVICE_RANKING: &str = "service.ranking";
/// Interfaces a service was published under.
pub const OBJECT_CLASS: &str = "objectClass";

/// A single property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropValue {
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	List(Vec<PropValue>),
}

/// Property map with deterministic key order.
pub type Properties = BTreeMap<String, PropValue>;

impl PropValue {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Int(i) => Some(*i),
			_ => None,
		}
	}

	pub fn as_bool(&self) -> Option<bool> {
		match self {
			Self::Bool(b) => Some(*b),
			_ => None,
		}
	}
}

impl fmt::Display for PropValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bool(b) => write!(f, "{b}"),
			Self::Int(i) => write!(f, "{i}"),
			Self::Float(x) => write!(f, "{x}"),
			Self::Str(s) => f.write_str(s),
			Self::List(items) => {
				f.write_str("[")?;
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str("]")
			}
		}
	}
}

impl From<&str> for PropValue {
	fn from(value: &str) -> Self {
		Self::Str(value.to_string())
	}
}

impl From<String> for PropValue {
	fn from(value: String) -> Self {
		Self::Str(value)
	}
}

impl From<i64> for PropValue {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<i32> for PropValue {
	fn from(value: i32) -> Self {
		Self::Int(value.into())
	}
}

impl From<u64> for PropValue {
	fn from(value: u64) -> Self {
		i64::try_from(value).map_or_else(|_| Self::Float(value as f64), Self::Int)
	}
}

impl From<bool> for PropValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<f64> for PropValue {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

impl<T: Into<PropValue>> From<Vec<T>> for PropValue {
	fn from(values: Vec<T>) -> Self {
		Self::List(values.into_iter().map(Into::into).collect())
	}
}

/// Ranking carried by `props`; anything but an `i32`-sized integer counts as 0.
pub fn ranking_of(props: &Properties) -> i32 {
	props
		.get(SERVICE_RANKING)
		.and_then(PropValue::as_i64)
		.and_then(|rank| i32::try_from(rank).ok())
		.unwrap_or(0)
}

/// Builds a [`Properties`] map from `key => value` pairs.
#[macro_export]
macro_rules! props {
	() => { $crate::Properties::new() };
	($($key:expr => $value:expr),+ $(,)?) => {{
		let mut map = $crate::Properties::new();
		$( map.insert(::std::string::String::from($key), $crate::PropValue::from($value)); )+
		map
	}};
}
