use keel_scr::{ComponentDescriptor, ComponentState, ScrConfig};
use pretty_assertions::assert_eq;

use crate::common::{Harness, Log, Named, recorder, reference};

fn provider() -> ComponentDescriptor {
	ComponentDescriptor::new("greeter").provides("api.Greeter")
}

#[test]
fn delayed_component_activates_on_first_use_and_releases_on_last() {
	let h = Harness::new();
	h.runtime.register(provider(), recorder(&h.log)).unwrap();
	h.settle();
	let dto = &h.configurations("greeter")[0];
	assert_eq!(dto.state, ComponentState::Satisfied);
	let service = dto.service.expect("service registered while satisfied");
	assert_eq!(h.take(), Vec::<String>::new());

	let first = h.registry.get_service(service).expect("service object");
	assert_eq!(first.downcast::<Named>().unwrap().0, "recorder#1");
	let second = h.registry.get_service(service).expect("service object");
	assert_eq!(h.state("greeter"), ComponentState::Active);
	assert_eq!(h.take(), ["new#1", "activate#1"]);

	drop(first);
	h.settle();
	assert_eq!(h.state("greeter"), ComponentState::Active);

	drop(second);
	h.settle();
	assert_eq!(h.take(), ["deactivate(0)#1"]);
	let dto = &h.configurations("greeter")[0];
	assert_eq!(dto.state, ComponentState::Satisfied);
	assert_eq!(dto.service, Some(service));

	let again = h.registry.get_service(service).expect("service object");
	assert_eq!(again.downcast::<Named>().unwrap().0, "recorder#2");
}

#[test]
fn keep_instances_holds_the_instance_after_release() {
	let h = Harness::with_config(ScrConfig {
		keep_instances: true,
		..ScrConfig::default()
	});
	h.runtime.register(provider(), recorder(&h.log)).unwrap();
	h.settle();
	let service = h.configurations("greeter")[0].service.unwrap();

	drop(h.registry.get_service(service));
	h.settle();
	assert_eq!(h.take(), ["new#1", "activate#1"]);
	assert_eq!(h.state("greeter"), ComponentState::Active);
}

#[test]
fn consumer_activation_pulls_the_delayed_provider() {
	let h = Harness::new();
	let provider_log = Log::default();
	h.runtime.register(provider(), recorder(&provider_log)).unwrap();
	h.runtime
		.register(
			ComponentDescriptor::new("consumer").reference(reference("greeter", "api.Greeter")),
			recorder(&h.log),
		)
		.unwrap();
	h.settle();

	assert_eq!(h.state("consumer"), ComponentState::Active);
	assert_eq!(h.state("greeter"), ComponentState::Active);
	assert_eq!(provider_log.lock().clone(), ["new#1", "activate#1"]);
	assert_eq!(h.take().len(), 3);

	h.runtime.disable("consumer").unwrap();
	h.settle();
	assert_eq!(h.state("greeter"), ComponentState::Satisfied);
	assert_eq!(provider_log.lock().last().map(String::as_str), Some("deactivate(0)#1"));
}

#[test]
fn disabling_a_delayed_provider_tears_down_its_consumer() {
	let h = Harness::new();
	let provider_log = Log::default();
	h.runtime.register(provider(), recorder(&provider_log)).unwrap();
	h.runtime
		.register(
			ComponentDescriptor::new("consumer").reference(reference("greeter", "api.Greeter")),
			recorder(&h.log),
		)
		.unwrap();
	h.settle();
	h.take();

	h.runtime.disable("greeter").unwrap();
	h.settle();
	let events = h.take();
	assert_eq!(events.len(), 2);
	assert_eq!(events[0], "deactivate(2)#1");
	assert!(events[1].starts_with("unbind:"), "{events:?}");
	assert_eq!(h.state("consumer"), ComponentState::UnsatisfiedReference);
	assert!(h.configurations("greeter").is_empty());
}
