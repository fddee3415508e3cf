use std::fmt;

use serde::{Deserialize, Serialize};

/// How many services a reference binds, and whether it needs at least one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Cardinality {
	#[serde(rename = "0..1")]
	Optional,
	#[default]
	#[serde(rename = "1..1")]
	Mandatory,
	#[serde(rename = "0..n")]
	Multiple,
	#[serde(rename = "1..n")]
	AtLeastOne,
}

impl Cardinality {
	pub const fn lower_bound(self) -> usize {
		match self {
			Self::Optional | Self::Multiple => 0,
			Self::Mandatory | Self::AtLeastOne => 1,
		}
	}

	pub const fn is_multiple(self) -> bool {
		matches!(self, Self::Multiple | Self::AtLeastOne)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Optional => "0..1",
			Self::Mandatory => "1..1",
			Self::Multiple => "0..n",
			Self::AtLeastOne => "1..n",
		}
	}
}

impl fmt::Display for Cardinality {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Whether bound services may change while the instance is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReferencePolicy {
	#[default]
	Static,
	Dynamic,
}

impl ReferencePolicy {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Static => "static",
			Self::Dynamic => "dynamic",
		}
	}
}

/// Whether a better candidate displaces a bound one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyOption {
	#[default]
	Reluctant,
	Greedy,
}

impl PolicyOption {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Reluctant => "reluctant",
			Self::Greedy => "greedy",
		}
	}
}

/// Declared dependency of a component on registry services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReferenceMetadata {
	/// Defaults to the interface name.
	#[serde(default)]
	pub name: String,
	/// Interface to track; `*` tracks every service.
	pub interface: String,
	#[serde(default)]
	pub cardinality: Cardinality,
	#[serde(default)]
	pub policy: ReferencePolicy,
	#[serde(default)]
	pub policy_option: PolicyOption,
	#[serde(default)]
	pub target: Option<String>,
	#[serde(default)]
	pub bind: Option<String>,
	#[serde(default)]
	pub unbind: Option<String>,
	#[serde(default)]
	pub updated: Option<String>,
	#[serde(default)]
	pub field: Option<String>,
	/// Constructor parameter index.
	#[serde(default)]
	pub parameter: Option<usize>,
}

impl ReferenceMetadata {
	pub fn new(name: impl Into<String>, interface: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			interface: interface.into(),
			cardinality: Cardinality::default(),
			policy: ReferencePolicy::default(),
			policy_option: PolicyOption::default(),
			target: None,
			bind: None,
			unbind: None,
			updated: None,
			field: None,
			parameter: None,
		}
	}

	pub fn cardinality(mut self, cardinality: Cardinality) -> Self {
		self.cardinality = cardinality;
		self
	}

	pub fn dynamic(mut self) -> Self {
		self.policy = ReferencePolicy::Dynamic;
		self
	}

	pub fn greedy(mut self) -> Self {
		self.policy_option = PolicyOption::Greedy;
		self
	}

	pub fn target(mut self, filter: impl Into<String>) -> Self {
		self.target = Some(filter.into());
		self
	}

	pub fn bind(mut self, method: impl Into<String>) -> Self {
		self.bind = Some(method.into());
		self
	}

	pub fn unbind(mut self, method: impl Into<String>) -> Self {
		self.unbind = Some(method.into());
		self
	}

	pub fn updated(mut self, method: impl Into<String>) -> Self {
		self.updated = Some(method.into());
		self
	}

	pub fn field(mut self, field: impl Into<String>) -> Self {
		self.field = Some(field.into());
		self
	}

	pub fn parameter(mut self, index: usize) -> Self {
		self.parameter = Some(index);
		self
	}

	pub fn is_dynamic(&self) -> bool {
		self.policy == ReferencePolicy::Dynamic
	}

	pub fn is_greedy(&self) -> bool {
		self.policy_option == PolicyOption::Greedy
	}

	/// Constructor-injected references cannot be rebound in place.
	pub fn is_constructor_bound(&self) -> bool {
		self.parameter.is_some()
	}
}
