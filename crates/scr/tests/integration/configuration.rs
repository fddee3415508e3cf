use keel_registry::{PropValue, props};
use keel_scr::{ComponentDescriptor, ComponentState, ConfigurationPolicy};
use pretty_assertions::assert_eq;

use crate::common::{Harness, recorder, reference};

fn retargetable(dynamic: bool) -> ComponentDescriptor {
	let log = reference("log", "api.Log").target("(name=a)");
	ComponentDescriptor::new("consumer")
		.modified("modified")
		.reference(if dynamic { log.dynamic() } else { log })
}

#[test]
fn dynamic_retarget_keeps_the_instance() {
	let h = Harness::new();
	h.runtime.register(retargetable(true), recorder(&h.log)).unwrap();
	let _a = h.publish("api.Log", "a", props! {});
	let _b = h.publish("api.Log", "b", props! {});
	h.settle();
	assert_eq!(h.take(), ["new#1", "bind:a#1", "activate#1"]);

	h.runtime.update_configuration("consumer", Some(props! { "log.target" => "(name=b)" }));
	h.settle();
	assert_eq!(h.take(), ["modified#1", "unbind:a#1", "bind:b#1"]);

	let dto = &h.configurations("consumer")[0];
	assert_eq!(dto.state, ComponentState::Active);
	assert_eq!(dto.satisfied_references[0].target.as_deref(), Some("(name=b)"));
	assert_eq!(dto.properties["service.pid"], PropValue::from("consumer"));
}

#[test]
fn static_retarget_replaces_the_instance() {
	let h = Harness::new();
	h.runtime.register(retargetable(false), recorder(&h.log)).unwrap();
	let _a = h.publish("api.Log", "a", props! {});
	let _b = h.publish("api.Log", "b", props! {});
	h.settle();
	h.take();

	h.runtime.update_configuration("consumer", Some(props! { "log.target" => "(name=b)" }));
	h.settle();
	assert_eq!(h.take(), ["deactivate(3)#1", "unbind:a#1", "new#2", "bind:b#2", "activate#2"]);
	assert_eq!(h.bound("consumer"), ["b"]);
}

#[test]
fn plain_property_change_calls_modified_only() {
	let h = Harness::new();
	h.runtime.register(retargetable(false), recorder(&h.log)).unwrap();
	let _a = h.publish("api.Log", "a", props! {});
	h.settle();
	h.take();

	h.runtime.update_configuration("consumer", Some(props! { "color" => "blue" }));
	h.settle();
	assert_eq!(h.take(), ["modified#1"]);

	h.runtime.update_configuration("consumer", Some(props! { "color" => "blue" }));
	h.settle();
	assert_eq!(h.take(), Vec::<String>::new());
	assert_eq!(h.configurations("consumer")[0].properties["color"], PropValue::from("blue"));
}

#[test]
fn missing_modified_callback_reactivates() {
	let h = Harness::new();
	h.runtime.register(ComponentDescriptor::new("plain"), recorder(&h.log)).unwrap();
	h.settle();
	assert_eq!(h.take(), ["new#1", "activate#1"]);

	h.runtime.update_configuration("plain", Some(props! { "color" => "red" }));
	h.settle();
	assert_eq!(h.take(), ["deactivate(3)#1", "new#2", "activate#2"]);
}

#[test]
fn ignore_policy_never_sees_configuration() {
	let h = Harness::new();
	let descriptor = ComponentDescriptor::new("deaf").configuration_policy(ConfigurationPolicy::Ignore);
	h.runtime.register(descriptor, recorder(&h.log)).unwrap();
	h.runtime.update_configuration("deaf", Some(props! { "color" => "red" }));
	h.settle();
	assert_eq!(h.take(), ["new#1", "activate#1"]);
	assert!(!h.configurations("deaf")[0].properties.contains_key("color"));
}

#[test]
fn required_configuration_creates_and_disposes_the_configuration() {
	let h = Harness::new();
	let descriptor = ComponentDescriptor::new("needy")
		.configuration_policy(ConfigurationPolicy::Require)
		.configuration_pid("needy.pid");
	h.runtime.register(descriptor, recorder(&h.log)).unwrap();
	h.settle();
	let waiting = h.configurations("needy");
	assert_eq!(waiting.len(), 1);
	assert_eq!(waiting[0].id, None);
	assert_eq!(waiting[0].state, ComponentState::UnsatisfiedConfiguration);
	assert_eq!(h.take(), Vec::<String>::new());

	h.runtime.update_configuration("needy.pid", Some(props! { "size" => 3 }));
	h.settle();
	assert_eq!(h.state("needy"), ComponentState::Active);
	assert_eq!(h.take(), ["new#1", "activate#1"]);

	h.runtime.update_configuration("needy.pid", None);
	h.settle();
	assert_eq!(h.take(), ["deactivate(4)#1"]);
	assert_eq!(h.configurations("needy")[0].id, None);
}

#[test]
fn stored_configuration_applies_at_registration() {
	let h = Harness::new();
	h.runtime.update_configuration("late", Some(props! { "size" => 7 }));
	let descriptor = ComponentDescriptor::new("late").configuration_policy(ConfigurationPolicy::Require);
	h.runtime.register(descriptor, recorder(&h.log)).unwrap();
	h.settle();
	let dto = &h.configurations("late")[0];
	assert_eq!(dto.state, ComponentState::Active);
	assert_eq!(dto.properties["size"], PropValue::Int(7));
}

#[test]
fn factory_configurations_are_independent() {
	let h = Harness::new();
	let descriptor = ComponentDescriptor::new("worker").configuration_policy(ConfigurationPolicy::Require);
	h.runtime.register(descriptor, recorder(&h.log)).unwrap();

	h.runtime.update_factory_configuration("worker", "one", Some(props! { "slot" => 1 }));
	h.runtime.update_factory_configuration("worker", "two", Some(props! { "slot" => 2 }));
	h.settle();
	let configurations = h.configurations("worker");
	assert_eq!(configurations.len(), 2);
	assert_ne!(configurations[0].id, configurations[1].id);
	let pids: Vec<_> = configurations.iter().map(|c| c.properties["service.pid"].to_string()).collect();
	assert_eq!(pids, ["worker~one", "worker~two"]);
	assert!(configurations.iter().all(|c| c.properties["service.factoryPid"] == PropValue::from("worker")));
	assert!(configurations.iter().all(|c| c.state == ComponentState::Active));

	h.runtime.update_factory_configuration("worker", "one", None);
	h.settle();
	let remaining = h.configurations("worker");
	assert_eq!(remaining.len(), 1);
	assert_eq!(remaining[0].properties["slot"], PropValue::Int(2));
	assert_eq!(h.take().iter().filter(|e| e.starts_with("deactivate(4)")).count(), 1);
}

#[test]
fn configured_target_that_does_not_parse_matches_nothing() {
	let h = Harness::new();
	h.runtime
		.register(ComponentDescriptor::new("consumer").reference(reference("log", "api.Log")), recorder(&h.log))
		.unwrap();
	let _a = h.publish("api.Log", "a", props! {});
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::Active);

	h.runtime.update_configuration("consumer", Some(props! { "log.target" => "(broken" }));
	h.settle();
	let dto = &h.configurations("consumer")[0];
	assert_eq!(dto.state, ComponentState::UnsatisfiedReference);
	assert_eq!(dto.unsatisfied_references[0].target.as_deref(), Some("(broken"));
}
