use std::any::Any;
use std::fmt;
use std::sync::Arc;

use keel_registry::{PropValue, Properties, ServiceEntry, ServiceId, ServiceInstance};
use serde::Serialize;

/// Why an instance is being deactivated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DeactivationReason {
	Unspecified,
	Disabled,
	ReferenceChanged,
	ConfigurationModified,
	ConfigurationDeleted,
	Disposed,
	RuntimeStopped,
}

impl DeactivationReason {
	pub const fn code(self) -> u8 {
		match self {
			Self::Unspecified => 0,
			Self::Disabled => 1,
			Self::ReferenceChanged => 2,
			Self::ConfigurationModified => 3,
			Self::ConfigurationDeleted => 4,
			Self::Disposed => 5,
			Self::RuntimeStopped => 6,
		}
	}

	pub const fn description(self) -> &'static str {
		match self {
			Self::Unspecified => "Unspecified",
			Self::Disabled => "Component disabled",
			Self::ReferenceChanged => "Bound reference changed",
			Self::ConfigurationModified => "Configuration modified",
			Self::ConfigurationDeleted => "Configuration deleted",
			Self::Disposed => "Component disposed",
			Self::RuntimeStopped => "Runtime stopped",
		}
	}
}

impl fmt::Display for DeactivationReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.description())
	}
}

/// A bound registry entry together with the object obtained for it.
#[derive(Clone)]
pub struct BoundService {
	entry: Arc<ServiceEntry>,
	instance: ServiceInstance,
}

impl BoundService {
	pub(crate) fn new(entry: Arc<ServiceEntry>, instance: ServiceInstance) -> Self {
		Self { entry, instance }
	}

	pub fn id(&self) -> ServiceId {
		self.entry.id()
	}

	pub fn ranking(&self) -> i32 {
		self.entry.ranking()
	}

	pub fn entry(&self) -> &Arc<ServiceEntry> {
		&self.entry
	}

	pub fn properties(&self) -> &Properties {
		self.entry.properties()
	}

	pub fn property(&self, key: &str) -> Option<&PropValue> {
		self.entry.property(key)
	}

	pub fn instance(&self) -> &ServiceInstance {
		&self.instance
	}

	pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
		Arc::clone(&self.instance).downcast::<T>().ok()
	}
}

impl fmt::Debug for BoundService {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BoundService")
			.field("id", &self.entry.id())
			.field("ranking", &self.entry.ranking())
			.finish()
	}
}

/// Value delivered to a field binding point or constructor parameter.
#[derive(Debug, Clone)]
pub enum FieldValue {
	/// Unary reference: the bound service, if any.
	Single(Option<BoundService>),
	/// Multiple reference: bound services, highest priority first.
	Multiple(Vec<BoundService>),
}

impl FieldValue {
	pub fn single(&self) -> Option<&BoundService> {
		match self {
			Self::Single(service) => service.as_ref(),
			Self::Multiple(services) => services.first(),
		}
	}

	pub fn services(&self) -> &[BoundService] {
		match self {
			Self::Single(service) => service.as_slice(),
			Self::Multiple(services) => services,
		}
	}
}

/// Constructor parameters resolved from constructor-bound references, by parameter index.
#[derive(Debug, Clone, Default)]
pub struct InitArgs {
	params: Vec<Option<FieldValue>>,
}

impl InitArgs {
	pub(crate) fn with_len(len: usize) -> Self {
		Self { params: vec![None; len] }
	}

	pub(crate) fn set(&mut self, index: usize, value: FieldValue) {
		if let Some(slot) = self.params.get_mut(index) {
			*slot = Some(value);
		}
	}

	pub fn len(&self) -> usize {
		self.params.len()
	}

	pub fn is_empty(&self) -> bool {
		self.params.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&FieldValue> {
		self.params.get(index).and_then(Option::as_ref)
	}

	pub fn single(&self, index: usize) -> Option<&BoundService> {
		self.get(index).and_then(FieldValue::single)
	}

	pub fn services(&self, index: usize) -> &[BoundService] {
		self.get(index).map_or(&[], FieldValue::services)
	}
}

/// Read-only view handed to constructors and lifecycle callbacks.
#[derive(Debug, Clone)]
pub struct ComponentContext {
	name: Arc<str>,
	id: u64,
	instance: u64,
	properties: Arc<Properties>,
}

impl ComponentContext {
	pub(crate) fn new(name: Arc<str>, id: u64, instance: u64, properties: Arc<Properties>) -> Self {
		Self {
			name,
			id,
			instance,
			properties,
		}
	}

	pub fn component_name(&self) -> &str {
		&self.name
	}

	/// Runtime-assigned id of the configuration (`component.id`).
	pub fn component_id(&self) -> u64 {
		self.id
	}

	/// Counts instances created for this configuration; starts at 1.
	pub fn instance_generation(&self) -> u64 {
		self.instance
	}

	pub fn properties(&self) -> &Properties {
		&self.properties
	}

	pub fn property(&self, key: &str) -> Option<&PropValue> {
		self.properties.get(key)
	}
}
