//! Component metadata.
//!
//! Descriptors are plain data: built in code with the chained setters, or
//! deserialized from TOML assemblies. [`ComponentDescriptor::validate`] normalizes
//! defaults and rejects inconsistent declarations before registration.

mod reference;

use std::collections::HashSet;

use keel_registry::{PropValue, Properties};
use serde::{Deserialize, Serialize};

pub use self::reference::{Cardinality, PolicyOption, ReferenceMetadata, ReferencePolicy};
use crate::ScrError;

/// When a configuration instance exists relative to configuration data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationPolicy {
	/// Use configuration when present, descriptor defaults otherwise.
	#[default]
	Optional,
	/// Only create configurations for present configuration data.
	Require,
	/// Never consult configuration data.
	Ignore,
}

impl ConfigurationPolicy {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Optional => "optional",
			Self::Require => "require",
			Self::Ignore => "ignore",
		}
	}
}

fn default_enabled() -> bool {
	true
}

/// Immutable declaration of one component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentDescriptor {
	pub name: String,
	/// Key of the component class; defaults to the component name.
	#[serde(default)]
	pub implementation: String,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
	/// Defaults to `true` exactly when no service is provided.
	#[serde(default)]
	pub immediate: Option<bool>,
	/// Interfaces the component publishes its service under.
	#[serde(default)]
	pub service: Vec<String>,
	#[serde(default)]
	pub configuration_policy: ConfigurationPolicy,
	/// Defaults to the component name.
	#[serde(default)]
	pub configuration_pid: Option<String>,
	#[serde(default)]
	pub properties: Properties,
	#[serde(default)]
	pub activate: Option<String>,
	#[serde(default)]
	pub deactivate: Option<String>,
	#[serde(default)]
	pub modified: Option<String>,
	/// Number of constructor parameters.
	#[serde(default)]
	pub init: usize,
	#[serde(default, rename = "reference")]
	pub references: Vec<ReferenceMetadata>,
}

impl ComponentDescriptor {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			implementation: String::new(),
			enabled: true,
			immediate: None,
			service: Vec::new(),
			configuration_policy: ConfigurationPolicy::default(),
			configuration_pid: None,
			properties: Properties::new(),
			activate: None,
			deactivate: None,
			modified: None,
			init: 0,
			references: Vec::new(),
		}
	}

	pub fn implementation(mut self, class: impl Into<String>) -> Self {
		self.implementation = class.into();
		self
	}

	pub fn disabled(mut self) -> Self {
		self.enabled = false;
		self
	}

	pub fn immediate(mut self, immediate: bool) -> Self {
		self.immediate = Some(immediate);
		self
	}

	pub fn provides(mut self, interface: impl Into<String>) -> Self {
		self.service.push(interface.into());
		self
	}

	pub fn configuration_policy(mut self, policy: ConfigurationPolicy) -> Self {
		self.configuration_policy = policy;
		self
	}

	pub fn configuration_pid(mut self, pid: impl Into<String>) -> Self {
		self.configuration_pid = Some(pid.into());
		self
	}

	pub fn property(mut self, key: impl Into<String>, value: impl Into<PropValue>) -> Self {
		self.properties.insert(key.into(), value.into());
		self
	}

	pub fn activate(mut self, method: impl Into<String>) -> Self {
		self.activate = Some(method.into());
		self
	}

	pub fn deactivate(mut self, method: impl Into<String>) -> Self {
		self.deactivate = Some(method.into());
		self
	}

	pub fn modified(mut self, method: impl Into<String>) -> Self {
		self.modified = Some(method.into());
		self
	}

	pub fn init(mut self, params: usize) -> Self {
		self.init = params;
		self
	}

	pub fn reference(mut self, reference: ReferenceMetadata) -> Self {
		self.references.push(reference);
		self
	}

	pub fn has_service(&self) -> bool {
		!self.service.is_empty()
	}

	pub fn is_immediate(&self) -> bool {
		self.immediate.unwrap_or(!self.has_service())
	}

	pub fn pid(&self) -> &str {
		self.configuration_pid.as_deref().unwrap_or(&self.name)
	}

	/// Fills defaults and checks declaration consistency.
	pub fn validate(&mut self) -> Result<(), ScrError> {
		if self.name.trim().is_empty() {
			return Err(ScrError::invalid(&self.name, "component name must not be empty"));
		}
		if self.implementation.is_empty() {
			self.implementation = self.name.clone();
		}
		if self.service.iter().any(|i| i.trim().is_empty()) {
			return Err(ScrError::invalid(&self.name, "service interface names must not be empty"));
		}
		if !self.is_immediate() && !self.has_service() {
			return Err(ScrError::invalid(&self.name, "a component without a service must be immediate"));
		}

		let mut names = HashSet::new();
		let mut parameters = HashSet::new();
		for reference in &mut self.references {
			if reference.interface.trim().is_empty() {
				return Err(ScrError::invalid(&self.name, "reference interface must not be empty"));
			}
			if reference.name.is_empty() {
				reference.name = reference.interface.clone();
			}
			if !names.insert(reference.name.clone()) {
				return Err(ScrError::invalid(&self.name, format!("duplicate reference name {:?}", reference.name)));
			}
			if let Some(index) = reference.parameter {
				if index >= self.init {
					return Err(ScrError::invalid(
						&self.name,
						format!(
							"reference {:?} uses constructor parameter {index} but init is {}",
							reference.name, self.init
						),
					));
				}
				if !parameters.insert(index) {
					return Err(ScrError::invalid(&self.name, format!("constructor parameter {index} is bound twice")));
				}
			}
		}
		Ok(())
	}
}
