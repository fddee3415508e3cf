//! Replays an assembly against a fresh registry and runtime.

use std::collections::HashMap;

use anyhow::{Context, bail};
use keel_registry::{ServiceLease, ServiceObject, ServiceRegistration, ServiceRegistry};
use keel_scr::{ComponentStatus, ScrConfig, ServiceComponentRuntime};
use serde::Serialize;

use crate::assembly::{Assembly, ConfigurationSpec, ServiceSpec, Step};
use crate::recorder::{Journal, class_for};

/// Journal lines produced by one step, plus a status snapshot when asked for.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
	pub step: String,
	pub events: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub status: Option<Vec<ComponentStatus>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
	pub steps: Vec<StepReport>,
	pub status: Vec<ComponentStatus>,
}

struct Runner {
	registry: ServiceRegistry,
	runtime: ServiceComponentRuntime,
	journal: Journal,
	services: HashMap<String, ServiceRegistration>,
	leases: HashMap<String, Vec<ServiceLease>>,
}

impl Runner {
	fn new(config: ScrConfig) -> anyhow::Result<Self> {
		let registry = ServiceRegistry::new();
		let runtime = ServiceComponentRuntime::new(registry.clone(), config)?;
		Ok(Self {
			registry,
			runtime,
			journal: Journal::default(),
			services: HashMap::new(),
			leases: HashMap::new(),
		})
	}

	fn configure(&self, spec: &ConfigurationSpec, delete: bool) {
		let properties = (!delete).then(|| spec.properties.clone());
		match &spec.instance {
			Some(instance) => self.runtime.update_factory_configuration(&spec.pid, instance, properties),
			None => self.runtime.update_configuration(&spec.pid, properties),
		}
	}

	fn publish(&mut self, spec: &ServiceSpec) -> anyhow::Result<()> {
		if self.services.contains_key(&spec.key) {
			bail!("service key {:?} is already published", spec.key);
		}
		let registration = self
			.registry
			.publish(spec.interfaces.iter().cloned(), spec.properties.clone(), ServiceObject::shared(spec.key.clone()))
			.with_context(|| format!("publishing {}", spec.key))?;
		tracing::debug!(key = %spec.key, service = %registration.id(), "keel.publish");
		self.services.insert(spec.key.clone(), registration);
		Ok(())
	}

	fn service(&self, key: &str) -> anyhow::Result<&ServiceRegistration> {
		self.services.get(key).with_context(|| format!("no service published under key {key:?}"))
	}

	/// Seeds configuration and services, then registers the components.
	fn load(&mut self, assembly: &Assembly) -> anyhow::Result<()> {
		for spec in &assembly.configurations {
			self.configure(spec, false);
		}
		for spec in &assembly.services {
			self.publish(spec)?;
		}
		for descriptor in &assembly.components {
			let class = class_for(descriptor, &self.journal);
			self.runtime
				.register(descriptor.clone(), class)
				.with_context(|| format!("registering component {}", descriptor.name))?;
		}
		Ok(())
	}

	fn apply(&mut self, step: &Step) -> anyhow::Result<()> {
		match step {
			Step::Publish { key, interfaces, properties } => self.publish(&ServiceSpec {
				key: key.clone(),
				interfaces: interfaces.clone(),
				properties: properties.clone(),
			})?,
			Step::Withdraw { key } => {
				let registration = self.services.remove(key).with_context(|| format!("no service published under key {key:?}"))?;
				registration.withdraw()?;
			}
			Step::SetProperties { key, properties } => self.service(key)?.set_properties(properties.clone())?,
			Step::Configure { pid, instance, properties } => self.configure(
				&ConfigurationSpec {
					pid: pid.clone(),
					instance: instance.clone(),
					properties: properties.clone(),
				},
				false,
			),
			Step::DeleteConfiguration { pid, instance } => self.configure(
				&ConfigurationSpec {
					pid: pid.clone(),
					instance: instance.clone(),
					properties: Default::default(),
				},
				true,
			),
			Step::Enable { component } => self.runtime.enable(component)?,
			Step::Disable { component } => self.runtime.disable(component)?,
			Step::Get { component } => {
				let service = self
					.runtime
					.configurations(component)?
					.iter()
					.find_map(|cfg| cfg.service)
					.with_context(|| format!("component {component} has no registered service"))?;
				let lease = self
					.registry
					.get_service(service)
					.with_context(|| format!("service {service} of component {component} could not be obtained"))?;
				self.leases.entry(component.clone()).or_default().push(lease);
			}
			Step::Release { component } => {
				let released = self.leases.remove(component).map_or(0, |leases| leases.len());
				tracing::debug!(%component, released, "keel.release");
			}
			Step::Status => {}
		}
		Ok(())
	}

	fn settle(&self) {
		if !self.runtime.settle() {
			tracing::warn!("keel.settle.timeout");
		}
	}

	fn report(&self, step: String, with_status: bool) -> StepReport {
		self.settle();
		StepReport {
			step,
			events: std::mem::take(&mut *self.journal.lock()),
			status: with_status.then(|| self.runtime.status()),
		}
	}
}

pub fn run(assembly: &Assembly, config: ScrConfig) -> anyhow::Result<Report> {
	let mut runner = Runner::new(config)?;
	runner.load(assembly)?;
	let mut steps = vec![runner.report("load".to_string(), false)];
	for (index, step) in assembly.steps.iter().enumerate() {
		tracing::info!(index, %step, "keel.step");
		runner
			.apply(step)
			.with_context(|| format!("step {} ({step})", index + 1))?;
		steps.push(runner.report(step.to_string(), matches!(step, Step::Status)));
	}
	let status = runner.runtime.status();
	runner.leases.clear();
	runner.runtime.shutdown();
	Ok(Report { steps, status })
}

/// Registers every component disabled against a scratch runtime, so declarations
/// and target filters are validated without activating anything.
pub fn check(assembly: &Assembly) -> anyhow::Result<usize> {
	let runtime = ServiceComponentRuntime::new(ServiceRegistry::new(), ScrConfig::default())?;
	let journal = Journal::default();
	for descriptor in &assembly.components {
		let mut descriptor = descriptor.clone();
		let class = class_for(&descriptor, &journal);
		let name = descriptor.name.clone();
		descriptor.enabled = false;
		runtime.register(descriptor, class).with_context(|| format!("component {name}"))?;
	}
	runtime.shutdown();
	Ok(assembly.components.len())
}
