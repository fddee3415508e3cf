//! Shared fixtures for runtime integration tests.

use std::sync::Arc;

use keel_registry::{PropValue, Properties, ServiceObject, ServiceRegistration, ServiceRegistry};
use keel_scr::{
	BoundService, ComponentClass, ComponentConfigurationDto, ComponentState, ConfigurationHandle, ReferenceMetadata, ScrConfig,
	ServiceComponentRuntime,
};
use parking_lot::Mutex;

pub type Log = Arc<Mutex<Vec<String>>>;

/// Service object published by tests and by recorder components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Named(pub String);

pub struct Harness {
	pub runtime: ServiceComponentRuntime,
	pub registry: ServiceRegistry,
	pub log: Log,
}

impl Harness {
	pub fn new() -> Self {
		Self::with_config(ScrConfig::default())
	}

	pub fn with_config(config: ScrConfig) -> Self {
		let _ = tracing_subscriber::fmt::try_init();
		let registry = ServiceRegistry::new();
		let runtime = ServiceComponentRuntime::new(registry.clone(), config).expect("valid runtime config");
		Self {
			runtime,
			registry,
			log: Log::default(),
		}
	}

	/// Publishes a [`Named`] object under `interface` with `name` set as a property.
	pub fn publish(&self, interface: &str, name: &str, mut props: Properties) -> ServiceRegistration {
		props.insert("name".to_string(), PropValue::from(name));
		self.registry
			.publish([interface], props, ServiceObject::shared(Named(name.to_string())))
			.expect("publish")
	}

	pub fn settle(&self) {
		assert!(self.runtime.settle(), "component actors did not settle");
	}

	/// Drains the event log.
	pub fn take(&self) -> Vec<String> {
		std::mem::take(&mut *self.log.lock())
	}

	pub fn configurations(&self, component: &str) -> Vec<ComponentConfigurationDto> {
		self.runtime.configurations(component).expect("registered component")
	}

	pub fn state(&self, component: &str) -> ComponentState {
		let configurations = self.configurations(component);
		assert_eq!(configurations.len(), 1, "expected one configuration of {component}");
		configurations[0].state
	}

	pub fn handle(&self, component: &str) -> ConfigurationHandle {
		let mut handles = self.runtime.handles(component).expect("registered component");
		assert_eq!(handles.len(), 1, "expected one configuration of {component}");
		handles.remove(0)
	}

	/// Names of the services bound to the live instance.
	pub fn bound(&self, component: &str) -> Vec<String> {
		self.handle(component)
			.with_instance(|recorder: &mut Recorder| recorder.bound.clone())
			.unwrap_or_default()
	}
}

/// Records every callback as `<event>#<instance generation>`.
pub struct Recorder {
	pub log: Log,
	pub generation: u64,
	pub bound: Vec<String>,
}

impl Recorder {
	fn record(&self, event: impl AsRef<str>) {
		self.log.lock().push(format!("{}#{}", event.as_ref(), self.generation));
	}
}

pub fn label(service: &BoundService) -> String {
	service
		.property("name")
		.map(ToString::to_string)
		.unwrap_or_else(|| service.id().to_string())
}

pub fn recorder(log: &Log) -> ComponentClass<Recorder> {
	let log = Arc::clone(log);
	ComponentClass::<Recorder>::new("recorder")
		.constructor(0, move |ctx, _| {
			let recorder = Recorder {
				log: Arc::clone(&log),
				generation: ctx.instance_generation(),
				bound: Vec::new(),
			};
			recorder.record("new");
			Ok(recorder)
		})
		.activate("activate", |r, _| {
			r.record("activate");
			Ok(())
		})
		.modified("modified", |r, _| {
			r.record("modified");
			Ok(())
		})
		.deactivate("deactivate", |r, _, reason| r.record(format!("deactivate({})", reason.code())))
		.method("bind", |r, service| {
			r.bound.push(label(service));
			r.record(format!("bind:{}", label(service)));
			Ok(())
		})
		.method("unbind", |r, service| {
			let name = label(service);
			r.bound.retain(|b| *b != name);
			r.record(format!("unbind:{name}"));
			Ok(())
		})
		.method("updated", |r, service| {
			r.record(format!("updated:{}", label(service)));
			Ok(())
		})
		.provides(|r| Arc::new(Named(format!("recorder#{}", r.generation))))
}

/// Reference wired to the recorder's bind, unbind and updated methods.
pub fn reference(name: &str, interface: &str) -> ReferenceMetadata {
	ReferenceMetadata::new(name, interface).bind("bind").unbind("unbind").updated("updated")
}
