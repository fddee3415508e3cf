use std::sync::Arc;

use keel_registry::{Interest, SERVICE_RANKING, ServiceEvent, ServiceEventKind, ServiceListener, props};
use keel_scr::{Cardinality, ComponentDescriptor, ComponentState};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

use crate::common::{Harness, Log, recorder, reference};

fn consumer(reference: keel_scr::ReferenceMetadata) -> ComponentDescriptor {
	ComponentDescriptor::new("consumer").reference(reference)
}

#[test]
fn reluctant_dynamic_unary_survives_arrival_and_rebinds_on_withdrawal() {
	let h = Harness::new();
	h.runtime
		.register(consumer(reference("log", "api.Log").dynamic()), recorder(&h.log))
		.unwrap();
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::UnsatisfiedReference);

	let srv1 = h.publish("api.Log", "srv1", props! {});
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::Active);
	assert_eq!(h.take(), ["new#1", "bind:srv1#1", "activate#1"]);

	let _srv2 = h.publish("api.Log", "srv2", props! {});
	h.settle();
	assert_eq!(h.take(), Vec::<String>::new());
	assert_eq!(h.bound("consumer"), ["srv1"]);

	srv1.withdraw().unwrap();
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::Active);
	assert_eq!(h.take(), ["unbind:srv1#1", "bind:srv2#1"]);
	assert_eq!(h.bound("consumer"), ["srv2"]);
	assert_eq!(h.handle("consumer").instance_generation(), Some(1));
}

#[test]
fn reluctant_dynamic_unary_ignores_higher_ranked_arrival() {
	let h = Harness::new();
	h.runtime
		.register(consumer(reference("log", "api.Log").dynamic()), recorder(&h.log))
		.unwrap();
	let low = h.publish("api.Log", "low", props! {});
	h.settle();
	h.take();

	let _high = h.publish("api.Log", "high", props! { SERVICE_RANKING => 10 });
	h.settle();
	assert_eq!(h.take(), Vec::<String>::new());
	assert_eq!(h.bound("consumer"), ["low"]);

	low.withdraw().unwrap();
	h.settle();
	assert_eq!(h.take(), ["unbind:low#1", "bind:high#1"]);
}

#[test]
fn greedy_dynamic_unary_moves_to_a_later_higher_ranked_arrival() {
	let h = Harness::new();
	h.runtime
		.register(consumer(reference("log", "api.Log").dynamic().greedy()), recorder(&h.log))
		.unwrap();
	let _low = h.publish("api.Log", "low", props! {});
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::Active);
	assert_eq!(h.take(), ["new#1", "bind:low#1", "activate#1"]);

	let _high = h.publish("api.Log", "high", props! { SERVICE_RANKING => 10 });
	h.settle();
	assert_eq!(h.take(), ["unbind:low#1", "bind:high#1"]);
	assert_eq!(h.bound("consumer"), ["high"]);
	assert_eq!(h.handle("consumer").instance_generation(), Some(1));
}

#[test]
fn ranking_change_rebinds_a_greedy_dynamic_unary() {
	let h = Harness::new();
	h.runtime
		.register(consumer(reference("log", "api.Log").dynamic().greedy()), recorder(&h.log))
		.unwrap();
	let _low = h.publish("api.Log", "low", props! {});
	let high = h.publish("api.Log", "high", props! {});
	h.settle();
	assert_eq!(h.bound("consumer"), ["low"]);
	h.take();

	h.registry.set_ranking(high.id(), 10).unwrap();
	h.settle();
	assert_eq!(h.take(), ["unbind:low#1", "bind:high#1"]);
	assert_eq!(h.bound("consumer"), ["high"]);
	assert_eq!(h.handle("consumer").instance_generation(), Some(1));
}

#[test]
fn ranking_change_leaves_a_reluctant_dynamic_unary_alone() {
	let h = Harness::new();
	h.runtime
		.register(consumer(reference("log", "api.Log").dynamic()), recorder(&h.log))
		.unwrap();
	let _low = h.publish("api.Log", "low", props! {});
	let high = h.publish("api.Log", "high", props! {});
	h.settle();
	assert_eq!(h.bound("consumer"), ["low"]);
	h.take();

	h.registry.set_ranking(high.id(), 10).unwrap();
	h.settle();
	assert_eq!(h.take(), Vec::<String>::new());
	assert_eq!(h.bound("consumer"), ["low"]);
}

#[test]
fn static_reference_change_produces_a_new_instance() {
	let h = Harness::new();
	h.runtime
		.register(consumer(reference("log", "api.Log").greedy()), recorder(&h.log))
		.unwrap();
	let first = h.publish("api.Log", "first", props! {});
	h.settle();
	assert_eq!(h.take(), ["new#1", "bind:first#1", "activate#1"]);

	let _better = h.publish("api.Log", "better", props! { SERVICE_RANKING => 5 });
	h.settle();
	assert_eq!(
		h.take(),
		["deactivate(2)#1", "unbind:first#1", "new#2", "bind:better#2", "activate#2"]
	);

	first.withdraw().unwrap();
	h.settle();
	assert_eq!(h.take(), Vec::<String>::new());
	assert_eq!(h.bound("consumer"), ["better"]);
}

#[test]
fn static_withdrawal_of_bound_service_reactivates() {
	let h = Harness::new();
	h.runtime.register(consumer(reference("log", "api.Log")), recorder(&h.log)).unwrap();
	let a = h.publish("api.Log", "a", props! {});
	let _b = h.publish("api.Log", "b", props! {});
	h.settle();
	assert_eq!(h.bound("consumer"), ["a"]);
	h.take();

	a.withdraw().unwrap();
	h.settle();
	assert_eq!(h.take(), ["deactivate(2)#1", "unbind:a#1", "new#2", "bind:b#2", "activate#2"]);
	assert_eq!(h.handle("consumer").instance_generation(), Some(2));
}

#[test]
fn multiple_reference_unbinds_before_binding() {
	let h = Harness::new();
	let descriptor = consumer(
		reference("log", "api.Log")
			.cardinality(Cardinality::AtLeastOne)
			.dynamic()
			.target("(group=old)"),
	)
	.modified("modified");
	h.runtime.register(descriptor, recorder(&h.log)).unwrap();
	let _srv1 = h.publish("api.Log", "srv1", props! { "group" => "old" });
	let _srv2 = h.publish("api.Log", "srv2", props! { "group" => "new" });
	h.settle();
	assert_eq!(h.take(), ["new#1", "bind:srv1#1", "activate#1"]);

	h.runtime.update_configuration("consumer", Some(props! { "log.target" => "(group=new)" }));
	h.settle();
	assert_eq!(h.take(), ["modified#1", "unbind:srv1#1", "bind:srv2#1"]);
	assert_eq!(h.bound("consumer"), ["srv2"]);
}

#[test]
fn cardinality_minimum_gates_activation() {
	let h = Harness::new();
	let descriptor = consumer(reference("log", "api.Log").cardinality(Cardinality::Multiple).dynamic()).property("log.cardinality.minimum", 2);
	h.runtime.register(descriptor, recorder(&h.log)).unwrap();

	let one = h.publish("api.Log", "one", props! {});
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::UnsatisfiedReference);
	let unsatisfied = &h.configurations("consumer")[0].unsatisfied_references;
	assert_eq!(unsatisfied.len(), 1);
	assert_eq!(unsatisfied[0].target_services.len(), 1);

	let _two = h.publish("api.Log", "two", props! {});
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::Active);

	one.withdraw().unwrap();
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::UnsatisfiedReference);
	assert!(h.take().contains(&"deactivate(2)#1".to_string()));
}

struct WithdrawalProbe {
	log: Log,
}

impl ServiceListener for WithdrawalProbe {
	fn service_changed(&self, event: &ServiceEvent) {
		if event.kind == ServiceEventKind::Withdrawn {
			self.log.lock().push("service withdrawn".to_string());
		}
	}
}

#[test]
fn mandatory_loss_withdraws_own_service_before_teardown() {
	let h = Harness::new();
	let descriptor = consumer(reference("log", "api.Log")).provides("api.Greeter").immediate(true);
	h.runtime.register(descriptor, recorder(&h.log)).unwrap();
	let _probe = h.registry.subscribe(Interest::for_interface("api.Greeter"), Arc::new(WithdrawalProbe { log: Arc::clone(&h.log) }));

	let log = h.publish("api.Log", "log", props! {});
	h.settle();
	let dto = &h.configurations("consumer")[0];
	assert_eq!(dto.state, ComponentState::Active);
	assert!(dto.service.is_some());
	h.take();

	log.withdraw().unwrap();
	h.settle();
	assert_eq!(h.take(), ["service withdrawn", "deactivate(2)#1", "unbind:log#1"]);
	let dto = &h.configurations("consumer")[0];
	assert_eq!(dto.state, ComponentState::UnsatisfiedReference);
	assert_eq!(dto.service, None);
}

#[test]
fn property_change_on_bound_service_calls_updated() {
	let h = Harness::new();
	h.runtime
		.register(consumer(reference("log", "api.Log").dynamic()), recorder(&h.log))
		.unwrap();
	let log = h.publish("api.Log", "log", props! { "level" => 1 });
	h.settle();
	h.take();

	log.set_properties(props! { "name" => "log", "level" => 2 }).unwrap();
	h.settle();
	assert_eq!(h.take(), ["updated:log#1"]);
	let bound = &h.configurations("consumer")[0].satisfied_references[0].bound_services[0];
	assert_eq!(bound.properties["level"], keel_registry::PropValue::Int(2));
}

#[test]
fn target_filter_limits_candidates() {
	let h = Harness::new();
	h.runtime
		.register(consumer(reference("log", "api.Log").dynamic().target("(level>=2)")), recorder(&h.log))
		.unwrap();
	let _quiet = h.publish("api.Log", "quiet", props! { "level" => 1 });
	h.settle();
	assert_eq!(h.state("consumer"), ComponentState::UnsatisfiedReference);

	let _loud = h.publish("api.Log", "loud", props! { "level" => 3 });
	h.settle();
	assert_eq!(h.bound("consumer"), ["loud"]);
}

proptest! {
	#![proptest_config(ProptestConfig::with_cases(12))]

	#[test]
	fn greedy_unary_tracks_highest_ranked_candidate(ranks in proptest::collection::vec(-5i32..5, 2..6)) {
		let h = Harness::new();
		h.runtime
			.register(consumer(reference("log", "api.Log").dynamic().greedy()), recorder(&h.log))
			.unwrap();
		let registrations: Vec<_> = ranks
			.iter()
			.enumerate()
			.map(|(i, rank)| h.publish("api.Log", &format!("s{i}"), props! { SERVICE_RANKING => *rank }))
			.collect();
		h.settle();

		let best = |alive: &[usize]| {
			alive.iter().copied().max_by(|a, b| ranks[*a].cmp(&ranks[*b]).then(b.cmp(a))).map(|i| format!("s{i}"))
		};
		let mut alive: Vec<usize> = (0..ranks.len()).collect();
		prop_assert_eq!(h.bound("consumer"), best(&alive).into_iter().collect::<Vec<_>>());

		let top = ranks
			.iter()
			.enumerate()
			.max_by(|(a, ra), (b, rb)| ra.cmp(rb).then(b.cmp(a)))
			.map(|(i, _)| i)
			.unwrap();
		registrations[top].clone().withdraw().unwrap();
		alive.retain(|i| *i != top);
		h.settle();
		prop_assert_eq!(h.bound("consumer"), best(&alive).into_iter().collect::<Vec<_>>());
		prop_assert_eq!(h.handle("consumer").instance_generation(), Some(1));
	}
}
