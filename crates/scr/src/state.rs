use std::fmt;

use serde::{Serialize, Serializer};

/// Lifecycle state of one component configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentState {
	/// Not enabled, or torn down by a disable.
	Disabled,
	/// Policy `require` and no configuration is present.
	UnsatisfiedConfiguration,
	/// At least one reference is below its lower bound.
	UnsatisfiedReference,
	/// Every reference is satisfied; no instance exists yet.
	Satisfied,
	/// An instance exists and is bound.
	Active,
	/// The constructor or activate callback failed.
	FailedActivation,
	/// Configuration removed for good.
	Disposed,
}

impl ComponentState {
	/// Numeric state as reported in configuration DTOs. States that never appear in a
	/// DTO report 0.
	pub const fn code(self) -> u32 {
		match self {
			Self::UnsatisfiedConfiguration => 1,
			Self::UnsatisfiedReference => 2,
			Self::Satisfied => 4,
			Self::Active => 8,
			Self::FailedActivation => 16,
			Self::Disabled | Self::Disposed => 0,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Disabled => "disabled",
			Self::UnsatisfiedConfiguration => "unsatisfied configuration",
			Self::UnsatisfiedReference => "unsatisfied reference",
			Self::Satisfied => "satisfied",
			Self::Active => "active",
			Self::FailedActivation => "failed activation",
			Self::Disposed => "disposed",
		}
	}
}

impl fmt::Display for ComponentState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl Serialize for ComponentState {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_u32(self.code())
	}
}
