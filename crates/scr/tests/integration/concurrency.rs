use std::sync::Arc;
use std::thread;

use keel_registry::{Interest, ServiceRegistration, props};
use keel_scr::{Cardinality, ComponentDescriptor, ComponentState, ScrConfig};
use pretty_assertions::assert_eq;

use crate::common::{Harness, Named, recorder, reference};

const THREADS: usize = 8;
const PER_THREAD: usize = 25;

#[test]
fn concurrent_churn_converges_to_the_surviving_services() {
	let h = Arc::new(Harness::new());
	h.runtime
		.register(
			ComponentDescriptor::new("collector").reference(reference("log", "api.Log").cardinality(Cardinality::Multiple).dynamic()),
			recorder(&h.log),
		)
		.unwrap();

	let workers: Vec<_> = (0..THREADS)
		.map(|t| {
			let h = Arc::clone(&h);
			thread::spawn(move || {
				let mut kept = Vec::new();
				for i in 0..PER_THREAD {
					let registration = h.publish("api.Log", &format!("t{t}-{i}"), props! {});
					if i % 3 == 0 {
						kept.push(registration);
					} else {
						registration.withdraw().unwrap();
					}
				}
				kept
			})
		})
		.collect();
	let kept: Vec<ServiceRegistration> = workers.into_iter().flat_map(|w| w.join().unwrap()).collect();
	h.settle();

	let mut expected: Vec<String> = h
		.registry
		.entries(&Interest::for_interface("api.Log"))
		.iter()
		.filter_map(|entry| entry.property("name").map(ToString::to_string))
		.collect();
	expected.sort();
	let mut bound = h.bound("collector");
	bound.sort();
	assert_eq!(bound.len(), kept.len());
	assert_eq!(bound, expected);
	assert_eq!(h.handle("collector").instance_generation(), Some(1));

	for registration in kept {
		registration.withdraw().unwrap();
	}
	h.settle();
	assert!(h.bound("collector").is_empty());
	assert_eq!(h.state("collector"), ComponentState::Active);
}

#[test]
fn racing_enable_and_disable_leave_a_consistent_state() {
	let h = Arc::new(Harness::with_config(ScrConfig {
		lock_timeout_ms: 500,
		..ScrConfig::default()
	}));
	h.runtime.register(ComponentDescriptor::new("toggled"), recorder(&h.log)).unwrap();

	let togglers: Vec<_> = (0..4)
		.map(|t| {
			let h = Arc::clone(&h);
			thread::spawn(move || {
				for i in 0..50 {
					if (i + t) % 2 == 0 {
						h.runtime.disable("toggled").unwrap();
					} else {
						h.runtime.enable("toggled").unwrap();
					}
				}
			})
		})
		.collect();
	for toggler in togglers {
		toggler.join().unwrap();
	}
	h.runtime.enable("toggled").unwrap();
	h.settle();

	assert_eq!(h.state("toggled"), ComponentState::Active);
	let events = h.take();
	let created = events.iter().filter(|e| e.starts_with("new#")).count();
	let deactivated = events.iter().filter(|e| e.starts_with("deactivate(")).count();
	assert!(created >= 1);
	assert!(deactivated <= created, "{events:?}");
	assert_eq!(created - deactivated, 1, "{events:?}");
}

#[test]
fn delayed_service_is_never_handed_out_after_its_deactivation() {
	let h = Arc::new(Harness::new());
	h.runtime
		.register(ComponentDescriptor::new("greeter").provides("api.Greeter"), recorder(&h.log))
		.unwrap();
	h.settle();
	let service = h.configurations("greeter")[0].service.expect("service registered while satisfied");

	let workers: Vec<_> = (0..4)
		.map(|_| {
			let h = Arc::clone(&h);
			thread::spawn(move || {
				for _ in 0..100 {
					let lease = h.registry.get_service(service).expect("service object");
					let name = lease.downcast::<Named>().unwrap().0.clone();
					let torn_down = format!("deactivate(0)#{}", name.trim_start_matches("recorder#"));
					assert!(!h.log.lock().contains(&torn_down), "{name} handed out after {torn_down}");
					drop(lease);
				}
			})
		})
		.collect();
	for worker in workers {
		worker.join().unwrap();
	}

	h.settle();
	let log = h.take();
	let created = log.iter().filter(|e| e.starts_with("new#")).count();
	let released = log.iter().filter(|e| e.starts_with("deactivate(0)#")).count();
	assert!(created >= 1);
	assert_eq!(created, released, "{log:?}");
	assert_eq!(h.state("greeter"), ComponentState::Satisfied);
}
