//! Console status report.
//!
//! [`render_text`] prints disabled components, enabled components still waiting
//! for configuration, and every live configuration ordered by id.

use std::fmt::Write as _;

use keel_registry::Properties;
use serde::Serialize;

use crate::ComponentState;
use crate::dto::{ComponentConfigurationDto, ComponentDescriptionDto, ServiceReferenceDto};
use crate::holder::SERVICE_PID;
use crate::runtime::ServiceComponentRuntime;

const SEP: &str = "----------------------------------------------------------------------";
const SERVICE_DESCRIPTION: &str = "service.description";

/// One registered component with its current configurations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentStatus {
	pub description: ComponentDescriptionDto,
	pub enabled: bool,
	pub configurations: Vec<ComponentConfigurationDto>,
}

impl ServiceComponentRuntime {
	/// Status of every registered component, in registration order.
	pub fn status(&self) -> Vec<ComponentStatus> {
		self.descriptions()
			.into_iter()
			.map(|description| {
				let enabled = self.is_enabled(&description.name).unwrap_or(false);
				let configurations = self.configurations(&description.name).unwrap_or_default();
				ComponentStatus {
					description,
					enabled,
					configurations,
				}
			})
			.collect()
	}
}

fn state_str(state: ComponentState) -> String {
	match state {
		ComponentState::Active => "active".to_string(),
		ComponentState::Satisfied => "satisfied".to_string(),
		ComponentState::UnsatisfiedConfiguration => "unsatisfied (configuration)".to_string(),
		ComponentState::UnsatisfiedReference => "unsatisfied (reference)".to_string(),
		ComponentState::FailedActivation => "failed activation".to_string(),
		other => other.code().to_string(),
	}
}

pub fn render_text(components: &[ComponentStatus]) -> String {
	let mut disabled = Vec::new();
	let mut missing = Vec::new();
	let mut configurations = Vec::new();
	for status in components {
		if !status.enabled {
			disabled.push(&status.description);
			continue;
		}
		let live: Vec<(u64, &ComponentConfigurationDto)> = status
			.configurations
			.iter()
			.filter_map(|cfg| cfg.id.map(|id| (id, cfg)))
			.collect();
		if live.is_empty() {
			missing.push(&status.description);
		} else {
			configurations.extend(live.into_iter().map(|(id, cfg)| (id, cfg, &status.description)));
		}
	}
	configurations.sort_by_key(|(id, _, _)| *id);

	let mut out = String::new();
	for (title, group) in [
		("Disabled components:", &disabled),
		("Components with missing configuration in Config Admin:", &missing),
	] {
		if group.is_empty() {
			continue;
		}
		let _ = writeln!(out, "{SEP}\n{title}\n{SEP}");
		for description in group.iter() {
			write_description(&mut out, description);
		}
		out.push('\n');
	}

	let _ = writeln!(out, "{SEP}");
	if configurations.is_empty() {
		let _ = writeln!(out, "Status: No Component Configurations\n{SEP}");
		return out;
	}
	let _ = writeln!(out, "Component Configurations:\n{SEP}");
	for (id, cfg, description) in configurations {
		write_configuration(&mut out, id, cfg, description);
	}
	out
}

fn write_description(out: &mut String, description: &ComponentDescriptionDto) {
	let _ = writeln!(out, "{}", description.name);
	write_header(out, description);
	write_references(out, description, None);
	write_properties(out, &description.properties);
	out.push('\n');
}

fn write_configuration(out: &mut String, id: u64, cfg: &ComponentConfigurationDto, description: &ComponentDescriptionDto) {
	let _ = writeln!(out, "{id}=[{}]", description.name);
	let _ = writeln!(out, "  State={}", state_str(cfg.state));
	if cfg.state == ComponentState::FailedActivation {
		let _ = writeln!(out, "  Failure={}", cfg.failure.as_deref().unwrap_or("n/a"));
	}
	write_header(out, description);
	if let Some(service) = cfg.service {
		let _ = writeln!(out, "  ServiceId={service}");
	}
	write_references(out, description, Some(cfg));
	write_properties(out, &cfg.properties);
	out.push('\n');
}

fn write_header(out: &mut String, description: &ComponentDescriptionDto) {
	let _ = writeln!(out, "  DefaultState={}", if description.default_enabled { "enabled" } else { "disabled" });
	let _ = writeln!(out, "  Activation={}", if description.immediate { "immediate" } else { "delayed" });
	let _ = writeln!(out, "  ConfigurationPolicy={}", description.configuration_policy.as_str());
	if !description.service_interfaces.is_empty() {
		let _ = writeln!(out, "  Services={}", description.service_interfaces.join(", "));
	}
}

fn write_references(out: &mut String, description: &ComponentDescriptionDto, cfg: Option<&ComponentConfigurationDto>) {
	for reference in &description.references {
		let satisfied = cfg.and_then(|cfg| cfg.satisfied_references.iter().find(|r| r.name == reference.name));
		let _ = write!(out, "  Reference={}", reference.name);
		if cfg.is_some() {
			let _ = write!(out, ", {}", if satisfied.is_some() { "Satisfied" } else { "Unsatisfied" });
		}
		out.push('\n');
		let _ = writeln!(out, "    Service Name: {}", reference.interface);
		if let Some(target) = &reference.target {
			let _ = writeln!(out, "  Target Filter: {target}");
		}
		let _ = writeln!(out, "    Cardinality: {}", reference.cardinality);
		let _ = writeln!(out, "    Policy: {}", reference.policy.as_str());
		let _ = writeln!(out, "    Policy Option: {}", reference.policy_option.as_str());
		match satisfied {
			Some(satisfied) => {
				for service in &satisfied.bound_services {
					write_bound(out, service);
				}
			}
			None => {
				let _ = writeln!(out, "    No Services bound");
			}
		}
	}
}

fn write_bound(out: &mut String, service: &ServiceReferenceDto) {
	let _ = write!(out, "    Bound Service: ID {}", service.id);
	let label = [crate::activation::COMPONENT_NAME, SERVICE_PID, SERVICE_DESCRIPTION]
		.iter()
		.find_map(|key| service.properties.get(*key));
	if let Some(label) = label {
		let _ = write!(out, " ({label})");
	}
	out.push('\n');
}

fn write_properties(out: &mut String, properties: &Properties) {
	let _ = writeln!(out, "  Properties=");
	for (key, value) in properties {
		let _ = writeln!(out, "    {key}={value}");
	}
}
