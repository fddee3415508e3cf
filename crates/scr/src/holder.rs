//! Per-descriptor owner of component configurations.
//!
//! The holder maps configuration data onto configurations: one default
//! configuration, plus one per factory configuration instance, according to the
//! descriptor's configuration policy. Changes are forwarded to the affected
//! configurations' actors; the holder itself never waits for them.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_registry::{PropValue, Properties};
use parking_lot::Mutex;

use crate::class::ResolvedClass;
use crate::component::ComponentConfiguration;
use crate::dto::ComponentConfigurationDto;
use crate::runtime::RuntimeShared;
use crate::{ComponentDescriptor, ConfigurationPolicy, DeactivationReason};

pub(crate) const SERVICE_PID: &str = "service.pid";
pub(crate) const FACTORY_PID: &str = "service.factoryPid";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ConfigKey {
	Default,
	Factory(String),
}

struct Slot {
	configuration: Arc<ComponentConfiguration>,
	config: Option<Properties>,
}

#[derive(Default)]
struct HolderState {
	enabled: bool,
	singleton: Option<Properties>,
	factory: BTreeMap<String, Properties>,
	slots: BTreeMap<ConfigKey, Slot>,
}

pub(crate) struct ComponentHolder {
	descriptor: Arc<ComponentDescriptor>,
	class: Arc<ResolvedClass>,
	shared: Arc<RuntimeShared>,
	state: Mutex<HolderState>,
}

impl ComponentHolder {
	pub(crate) fn new(descriptor: Arc<ComponentDescriptor>, class: Arc<ResolvedClass>, shared: Arc<RuntimeShared>) -> Self {
		Self {
			descriptor,
			class,
			shared,
			state: Mutex::new(HolderState::default()),
		}
	}

	pub(crate) fn descriptor(&self) -> &Arc<ComponentDescriptor> {
		&self.descriptor
	}

	pub(crate) fn is_enabled(&self) -> bool {
		self.state.lock().enabled
	}

	pub(crate) fn enable(&self) {
		let mut state = self.state.lock();
		if state.enabled {
			return;
		}
		state.enabled = true;
		tracing::debug!(component = %self.descriptor.name, "scr.holder.enable");
		self.reconcile(&mut state);
	}

	/// Disposes every configuration. A second call is a no-op.
	pub(crate) fn disable(&self, reason: DeactivationReason) {
		let mut state = self.state.lock();
		if !state.enabled {
			return;
		}
		state.enabled = false;
		tracing::debug!(component = %self.descriptor.name, %reason, "scr.holder.disable");
		for (_, slot) in std::mem::take(&mut state.slots) {
			slot.configuration.dispose(reason);
		}
	}

	pub(crate) fn set_configuration(&self, config: Option<Properties>) {
		let mut state = self.state.lock();
		state.singleton = config;
		if state.enabled {
			self.reconcile(&mut state);
		}
	}

	pub(crate) fn set_factory_configuration(&self, instance: &str, config: Option<Properties>) {
		let mut state = self.state.lock();
		match config {
			Some(config) => state.factory.insert(instance.to_string(), config),
			None => state.factory.remove(instance),
		};
		if state.enabled {
			self.reconcile(&mut state);
		}
	}

	pub(crate) fn configurations(&self) -> Vec<Arc<ComponentConfiguration>> {
		self.state.lock().slots.values().map(|slot| Arc::clone(&slot.configuration)).collect()
	}

	/// Snapshots of every configuration, or the placeholder of a component still
	/// waiting for required configuration.
	pub(crate) fn dtos(&self) -> Vec<ComponentConfigurationDto> {
		let state = self.state.lock();
		if !state.enabled {
			return Vec::new();
		}
		if state.slots.is_empty() && self.descriptor.configuration_policy == ConfigurationPolicy::Require {
			return vec![ComponentConfigurationDto::awaiting_configuration(&self.descriptor)];
		}
		state.slots.values().map(|slot| slot.configuration.dto()).collect()
	}

	fn singleton_config(&self, config: &Properties) -> Properties {
		let mut config = config.clone();
		config
			.entry(SERVICE_PID.to_string())
			.or_insert_with(|| PropValue::from(self.descriptor.pid()));
		config
	}

	fn factory_config(&self, instance: &str, config: &Properties) -> Properties {
		let mut config = config.clone();
		let pid = self.descriptor.pid();
		config.insert(SERVICE_PID.to_string(), PropValue::from(format!("{pid}~{instance}")));
		config.insert(FACTORY_PID.to_string(), PropValue::from(pid));
		config
	}

	fn desired(&self, state: &HolderState) -> BTreeMap<ConfigKey, Option<Properties>> {
		let factory = state
			.factory
			.iter()
			.map(|(instance, config)| (ConfigKey::Factory(instance.clone()), Some(self.factory_config(instance, config))));
		let singleton = state.singleton.as_ref().map(|config| self.singleton_config(config));
		match self.descriptor.configuration_policy {
			ConfigurationPolicy::Ignore => BTreeMap::from([(ConfigKey::Default, None)]),
			ConfigurationPolicy::Optional if state.factory.is_empty() => BTreeMap::from([(ConfigKey::Default, singleton)]),
			ConfigurationPolicy::Optional => factory.collect(),
			ConfigurationPolicy::Require => factory
				.chain(singleton.map(|config| (ConfigKey::Default, Some(config))))
				.collect(),
		}
	}

	fn reconcile(&self, state: &mut HolderState) {
		let desired = self.desired(state);
		let stale: Vec<ConfigKey> = state.slots.keys().filter(|key| !desired.contains_key(key)).cloned().collect();
		for key in stale {
			if let Some(slot) = state.slots.remove(&key) {
				tracing::debug!(component = %self.descriptor.name, id = slot.configuration.id(), ?key, "scr.holder.remove");
				slot.configuration.dispose(DeactivationReason::ConfigurationDeleted);
			}
		}
		for (key, config) in desired {
			match state.slots.get_mut(&key) {
				Some(slot) if slot.config == config => {}
				Some(slot) => {
					slot.config = config.clone();
					slot.configuration.configure(config);
				}
				None => {
					let configuration =
						ComponentConfiguration::new(Arc::clone(&self.descriptor), Arc::clone(&self.class), Arc::clone(&self.shared));
					tracing::debug!(component = %self.descriptor.name, id = configuration.id(), ?key, "scr.holder.create");
					configuration.enable(config.clone());
					state.slots.insert(key, Slot { configuration, config });
				}
			}
		}
	}
}
