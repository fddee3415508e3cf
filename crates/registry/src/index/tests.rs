use std::sync::atomic::AtomicUsize;

use pretty_assertions::assert_eq;
use proptest::prelude::*;

use super::*;
use crate::{ServiceFactory, ServiceInstance, props};

#[derive(Default)]
struct Recorder {
	opened: Mutex<Vec<ServiceId>>,
	events: Mutex<Vec<(ServiceEventKind, ServiceId)>>,
}

impl ServiceListener for Recorder {
	fn opened(&self, initial: &[Arc<ServiceEntry>]) {
		self.opened.lock().extend(initial.iter().map(|e| e.id()));
	}

	fn service_changed(&self, event: &ServiceEvent) {
		self.events.lock().push((event.kind, event.entry.id()));
	}
}

fn publish(registry: &ServiceRegistry, interface: &str, props: Properties) -> ServiceId {
	registry.publish([interface], props, ServiceObject::shared(())).unwrap().id()
}

#[test]
fn ids_are_monotonic_and_never_reused() {
	let registry = ServiceRegistry::new();
	let a = publish(&registry, "svc.A", props! {});
	registry.withdraw(a).unwrap();
	let b = publish(&registry, "svc.A", props! {});
	assert!(b > a);
	assert_eq!(registry.entry(b).unwrap().property(SERVICE_ID), Some(&PropValue::Int(b.get() as i64)));
	assert_eq!(registry.withdraw(a).unwrap_err(), RegistryError::UnknownService(a));
}

#[test]
fn listeners_see_initial_view_then_ordered_events_for_their_interest() {
	let registry = ServiceRegistry::new();
	let low = publish(&registry, "svc.A", props! { SERVICE_RANKING => 1 });
	let high = publish(&registry, "svc.A", props! { SERVICE_RANKING => 5 });
	publish(&registry, "svc.B", props! {});

	let recorder = Arc::new(Recorder::default());
	let _sub = registry.subscribe(Interest::for_interface("svc.A"), recorder.clone());
	assert_eq!(*recorder.opened.lock(), vec![high, low]);

	let third = publish(&registry, "svc.A", props! {});
	publish(&registry, "svc.B", props! {});
	registry.set_ranking(third, 9).unwrap();
	registry.withdraw(low).unwrap();

	assert_eq!(
		*recorder.events.lock(),
		vec![
			(ServiceEventKind::Published, third),
			(ServiceEventKind::Modified, third),
			(ServiceEventKind::Withdrawn, low),
		]
	);
}

#[test]
fn any_interest_sees_every_interface() {
	let registry = ServiceRegistry::new();
	let recorder = Arc::new(Recorder::default());
	let _sub = registry.subscribe(Interest::for_interface("*"), recorder.clone());
	let a = publish(&registry, "svc.A", props! {});
	let b = publish(&registry, "svc.B", props! {});
	assert_eq!(
		*recorder.events.lock(),
		vec![(ServiceEventKind::Published, a), (ServiceEventKind::Published, b)]
	);
}

#[test]
fn property_updates_bump_generation_and_keep_identity() {
	let registry = ServiceRegistry::new();
	let id = publish(&registry, "svc.A", props! { "color" => "red" });
	let updated = registry.set_ranking(id, 7).unwrap();
	assert_eq!(updated.id(), id);
	assert_eq!(updated.generation(), 1);
	assert_eq!(updated.ranking(), 7);
	assert_eq!(updated.property("color"), Some(&PropValue::from("red")));

	let replaced = registry.update_properties(id, props! { "color" => "blue" }).unwrap();
	assert_eq!(replaced.generation(), 2);
	assert_eq!(replaced.ranking(), 0);
	assert_eq!(replaced.property(OBJECT_CLASS), Some(&PropValue::from(vec!["svc.A"])));
}

#[test]
fn publish_requires_an_interface() {
	let registry = ServiceRegistry::new();
	let err = registry.publish(Vec::<String>::new(), props! {}, ServiceObject::shared(1_u8)).unwrap_err();
	assert_eq!(err, RegistryError::NoInterfaces);
}

#[test]
fn dropped_subscription_stops_notifications() {
	let registry = ServiceRegistry::new();
	let recorder = Arc::new(Recorder::default());
	let sub = registry.subscribe(Interest::for_interface("svc.A"), recorder.clone());
	publish(&registry, "svc.A", props! {});
	drop(sub);
	publish(&registry, "svc.A", props! {});
	assert_eq!(recorder.events.lock().len(), 1);
}

struct CancelOnFirst {
	sub: Mutex<Option<Subscription>>,
	seen: AtomicUsize,
}

impl ServiceListener for CancelOnFirst {
	fn service_changed(&self, _event: &ServiceEvent) {
		self.seen.fetch_add(1, Ordering::AcqRel);
		if let Some(sub) = self.sub.lock().take() {
			sub.cancel();
		}
	}
}

#[test]
fn cancel_from_inside_a_callback_does_not_deadlock() {
	let registry = ServiceRegistry::new();
	let listener = Arc::new(CancelOnFirst {
		sub: Mutex::new(None),
		seen: AtomicUsize::new(0),
	});
	let sub = registry.subscribe(Interest::for_interface("svc.A"), listener.clone());
	*listener.sub.lock() = Some(sub);
	publish(&registry, "svc.A", props! {});
	publish(&registry, "svc.A", props! {});
	assert_eq!(listener.seen.load(Ordering::Acquire), 1);
}

#[derive(Default)]
struct CountingFactory {
	gets: AtomicUsize,
	ungets: AtomicUsize,
}

impl ServiceFactory for CountingFactory {
	fn get_service(&self, _entry: &ServiceEntry) -> Option<ServiceInstance> {
		let n = self.gets.fetch_add(1, Ordering::AcqRel);
		Some(Arc::new(format!("object-{n}")))
	}

	fn unget_service(&self, _entry: &ServiceEntry, _instance: &ServiceInstance) {
		self.ungets.fetch_add(1, Ordering::AcqRel);
	}
}

#[test]
fn factory_objects_are_returned_when_the_lease_ends() {
	let registry = ServiceRegistry::new();
	let factory = Arc::new(CountingFactory::default());
	let id = registry
		.publish(["svc.Lazy"], props! {}, ServiceObject::Factory(factory.clone()))
		.unwrap()
		.id();

	let lease = registry.get_service(id).unwrap();
	assert_eq!(lease.downcast::<String>().as_deref().map(String::as_str), Some("object-0"));
	assert_eq!(factory.ungets.load(Ordering::Acquire), 0);
	lease.release();
	assert_eq!(factory.ungets.load(Ordering::Acquire), 1);

	let shared = registry.publish(["svc.Plain"], props! {}, ServiceObject::shared(5_u32)).unwrap();
	assert_eq!(registry.get_service(shared.id()).unwrap().downcast::<u32>().map(|v| *v), Some(5));
	shared.withdraw().unwrap();
	assert!(registry.get_service(id).is_some());
}

#[test]
fn concurrent_publishers_are_serialized_for_listeners() {
	let registry = ServiceRegistry::new();
	let recorder = Arc::new(Recorder::default());
	let _sub = registry.subscribe(Interest::for_interface("svc.A"), recorder.clone());

	let threads: Vec<_> = (0..8)
		.map(|_| {
			let registry = registry.clone();
			std::thread::spawn(move || {
				for _ in 0..50 {
					let id = publish(&registry, "svc.A", props! {});
					registry.withdraw(id).unwrap();
				}
			})
		})
		.collect();
	for thread in threads {
		thread.join().unwrap();
	}

	let events = recorder.events.lock();
	assert_eq!(events.len(), 800);
	for (i, (kind, id)) in events.iter().enumerate() {
		if *kind == ServiceEventKind::Withdrawn {
			assert!(events[..i].contains(&(ServiceEventKind::Published, *id)));
		}
	}
	assert!(registry.is_empty());
}

proptest! {
	#[test]
	fn entries_are_ordered_by_descending_rank_then_ascending_id(ranks in prop::collection::vec(-3_i32..3, 1..24)) {
		let registry = ServiceRegistry::new();
		let ids: Vec<_> = ranks.iter().map(|rank| publish(&registry, "svc.A", props! { SERVICE_RANKING => *rank })).collect();

		let mut expected: Vec<_> = ids.iter().copied().zip(ranks.iter().copied()).collect();
		expected.sort_by(|(a_id, a_rank), (b_id, b_rank)| b_rank.cmp(a_rank).then(a_id.cmp(b_id)));
		let actual: Vec<_> = registry.entries(&Interest::for_interface("svc.A")).iter().map(|e| (e.id(), e.ranking())).collect();
		prop_assert_eq!(actual, expected);
	}
}
