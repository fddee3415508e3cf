//! Serializable snapshots for inspection.

use keel_registry::{Properties, ServiceEntry, ServiceId};
use serde::Serialize;

use crate::{Cardinality, ComponentDescriptor, ComponentState, ConfigurationPolicy, PolicyOption, ReferenceMetadata, ReferencePolicy};

/// Projection of a [`ComponentDescriptor`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentDescriptionDto {
	pub name: String,
	pub implementation: String,
	pub default_enabled: bool,
	pub immediate: bool,
	pub service_interfaces: Vec<String>,
	pub configuration_policy: ConfigurationPolicy,
	pub configuration_pid: String,
	pub properties: Properties,
	pub activate: Option<String>,
	pub deactivate: Option<String>,
	pub modified: Option<String>,
	pub init: usize,
	pub references: Vec<ReferenceDto>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReferenceDto {
	pub name: String,
	pub interface: String,
	pub cardinality: Cardinality,
	pub policy: ReferencePolicy,
	pub policy_option: PolicyOption,
	pub target: Option<String>,
	pub bind: Option<String>,
	pub unbind: Option<String>,
	pub updated: Option<String>,
	pub field: Option<String>,
	pub parameter: Option<usize>,
}

impl From<&ReferenceMetadata> for ReferenceDto {
	fn from(meta: &ReferenceMetadata) -> Self {
		Self {
			name: meta.name.clone(),
			interface: meta.interface.clone(),
			cardinality: meta.cardinality,
			policy: meta.policy,
			policy_option: meta.policy_option,
			target: meta.target.clone(),
			bind: meta.bind.clone(),
			unbind: meta.unbind.clone(),
			updated: meta.updated.clone(),
			field: meta.field.clone(),
			parameter: meta.parameter,
		}
	}
}

impl From<&ComponentDescriptor> for ComponentDescriptionDto {
	fn from(descriptor: &ComponentDescriptor) -> Self {
		Self {
			name: descriptor.name.clone(),
			implementation: descriptor.implementation.clone(),
			default_enabled: descriptor.enabled,
			immediate: descriptor.is_immediate(),
			service_interfaces: descriptor.service.clone(),
			configuration_policy: descriptor.configuration_policy,
			configuration_pid: descriptor.pid().to_string(),
			properties: descriptor.properties.clone(),
			activate: descriptor.activate.clone(),
			deactivate: descriptor.deactivate.clone(),
			modified: descriptor.modified.clone(),
			init: descriptor.init,
			references: descriptor.references.iter().map(ReferenceDto::from).collect(),
		}
	}
}

/// A registry entry as seen from a reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceReferenceDto {
	pub id: ServiceId,
	pub properties: Properties,
}

impl From<&ServiceEntry> for ServiceReferenceDto {
	fn from(entry: &ServiceEntry) -> Self {
		Self {
			id: entry.id(),
			properties: Properties::clone(entry.properties()),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SatisfiedReferenceDto {
	pub name: String,
	pub target: Option<String>,
	pub bound_services: Vec<ServiceReferenceDto>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnsatisfiedReferenceDto {
	pub name: String,
	pub target: Option<String>,
	/// Services matching the interface and target, fewer than the lower bound.
	pub target_services: Vec<ServiceReferenceDto>,
}

/// Snapshot of one component configuration.
///
/// `id` is `None` only for the placeholder reported while a component with policy
/// `require` waits for configuration data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentConfigurationDto {
	pub id: Option<u64>,
	pub name: String,
	/// Serialized as the numeric state code.
	pub state: ComponentState,
	pub properties: Properties,
	pub satisfied_references: Vec<SatisfiedReferenceDto>,
	pub unsatisfied_references: Vec<UnsatisfiedReferenceDto>,
	pub service: Option<ServiceId>,
	pub failure: Option<String>,
}

impl ComponentConfigurationDto {
	pub(crate) fn awaiting_configuration(descriptor: &ComponentDescriptor) -> Self {
		Self {
			id: None,
			name: descriptor.name.clone(),
			state: ComponentState::UnsatisfiedConfiguration,
			properties: descriptor.properties.clone(),
			satisfied_references: Vec::new(),
			unsatisfied_references: Vec::new(),
			service: None,
			failure: None,
		}
	}
}
