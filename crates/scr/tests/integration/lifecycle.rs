use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use keel_registry::props;
use keel_scr::{
	Cardinality, ComponentClass, ComponentDescriptor, ComponentError, ComponentState, FieldValue, ReferenceMetadata, ScrError, render_text,
};
use pretty_assertions::assert_eq;

use crate::common::{Harness, Log, label, recorder, reference};

#[test]
fn disabling_twice_deactivates_once() {
	let h = Harness::new();
	h.runtime.register(ComponentDescriptor::new("plain"), recorder(&h.log)).unwrap();
	h.settle();
	assert!(h.runtime.is_enabled("plain").unwrap());

	h.runtime.disable("plain").unwrap();
	h.runtime.disable("plain").unwrap();
	h.settle();
	assert_eq!(h.take(), ["new#1", "activate#1", "deactivate(1)#1"]);
	assert!(!h.runtime.is_enabled("plain").unwrap());
	assert!(h.configurations("plain").is_empty());

	h.runtime.enable("plain").unwrap();
	h.settle();
	assert_eq!(h.state("plain"), ComponentState::Active);
	assert_eq!(h.take(), ["new#1", "activate#1"]);
}

#[test]
fn default_disabled_component_waits_for_enable() {
	let h = Harness::new();
	h.runtime.register(ComponentDescriptor::new("later").disabled(), recorder(&h.log)).unwrap();
	h.settle();
	assert!(h.configurations("later").is_empty());
	assert_eq!(h.take(), Vec::<String>::new());

	h.runtime.enable("later").unwrap();
	h.settle();
	assert_eq!(h.state("later"), ComponentState::Active);
}

#[test]
fn failed_activation_is_reported_and_retried_on_the_next_change() {
	let h = Harness::new();
	let failing = Arc::new(AtomicBool::new(true));
	let flag = Arc::clone(&failing);
	let log = Arc::clone(&h.log);
	let class = ComponentClass::<Vec<String>>::new("flaky").constructor(0, move |ctx, _| {
		if flag.load(Ordering::Acquire) {
			return Err(ComponentError::new("not yet"));
		}
		log.lock().push(format!("new#{}", ctx.instance_generation()));
		Ok(Vec::new())
	});
	let descriptor = ComponentDescriptor::new("flaky").reference(
		ReferenceMetadata::new("log", "api.Log")
			.cardinality(Cardinality::Multiple)
			.dynamic(),
	);
	h.runtime.register(descriptor, class).unwrap();
	h.settle();
	let dto = &h.configurations("flaky")[0];
	assert_eq!(dto.state, ComponentState::FailedActivation);
	assert_eq!(dto.failure.as_deref(), Some("not yet"));

	failing.store(false, Ordering::Release);
	let _log = h.publish("api.Log", "log", props! {});
	h.settle();
	let dto = &h.configurations("flaky")[0];
	assert_eq!(dto.state, ComponentState::Active);
	assert_eq!(dto.failure, None);
	assert_eq!(h.take(), ["new#2"]);
}

#[test]
fn panicking_activate_leaves_the_configuration_failed() {
	let h = Harness::new();
	let class = ComponentClass::<()>::with_default("bomb").activate("activate", |_, _| panic!("boom"));
	h.runtime.register(ComponentDescriptor::new("bomb"), class).unwrap();
	h.settle();
	let dto = &h.configurations("bomb")[0];
	assert_eq!(dto.state, ComponentState::FailedActivation);
	assert!(dto.failure.as_deref().is_some_and(|f| f.contains("boom")), "{:?}", dto.failure);
}

#[test]
fn constructor_injection_resolves_parameters_before_construction() {
	let h = Harness::new();
	let log = Arc::clone(&h.log);
	let class = ComponentClass::<String>::new("injected").constructor(1, move |_, args| {
		let name = args.single(0).map(label).unwrap_or_default();
		log.lock().push(format!("new:{name}"));
		Ok(name)
	});
	let descriptor = ComponentDescriptor::new("injected")
		.init(1)
		.reference(ReferenceMetadata::new("log", "api.Log").dynamic().parameter(0));
	h.runtime.register(descriptor, class).unwrap();
	let a = h.publish("api.Log", "a", props! {});
	let _b = h.publish("api.Log", "b", props! {});
	h.settle();
	assert_eq!(h.take(), ["new:a"]);

	// Constructor-bound references cannot rebind in place.
	a.withdraw().unwrap();
	h.settle();
	assert_eq!(h.take(), ["new:b"]);
	let handle = h.handle("injected");
	assert_eq!(handle.with_instance(|name: &mut String| name.clone()), Some("b".to_string()));
	assert_eq!(handle.instance_generation(), Some(2));
}

#[test]
fn field_injection_sees_the_current_bound_set() {
	let h = Harness::new();
	let class = ComponentClass::<Vec<String>>::with_default("fields").field("logs", |logs, value: FieldValue| {
		*logs = value.services().iter().map(label).collect();
	});
	let descriptor = ComponentDescriptor::new("fields").reference(
		ReferenceMetadata::new("logs", "api.Log")
			.cardinality(Cardinality::Multiple)
			.dynamic()
			.field("logs"),
	);
	h.runtime.register(descriptor, class).unwrap();
	let _low = h.publish("api.Log", "low", props! {});
	let _high = h.publish("api.Log", "high", props! { "service.ranking" => 3 });
	h.settle();
	let handle = h.handle("fields");
	assert_eq!(handle.with_instance(|logs: &mut Vec<String>| logs.clone()), Some(vec!["high".to_string(), "low".to_string()]));
}

#[test]
fn unresolved_callback_names_are_skipped() {
	let h = Harness::new();
	let descriptor = ComponentDescriptor::new("sloppy")
		.activate("start")
		.reference(reference("log", "api.Log").dynamic().bind("attach"));
	h.runtime.register(descriptor, recorder(&h.log)).unwrap();
	let _log = h.publish("api.Log", "log", props! {});
	h.settle();
	assert_eq!(h.state("sloppy"), ComponentState::Active);
	assert_eq!(h.take(), ["new#1"]);
}

#[test]
fn registration_rejects_bad_declarations() {
	let h = Harness::new();
	h.runtime.register(ComponentDescriptor::new("one"), recorder(&h.log)).unwrap();
	assert!(matches!(
		h.runtime.register(ComponentDescriptor::new("one"), recorder(&h.log)),
		Err(ScrError::DuplicateComponent(name)) if name == "one"
	));
	assert!(matches!(
		h.runtime.register(
			ComponentDescriptor::new("bad").reference(ReferenceMetadata::new("log", "api.Log").target("(level")),
			recorder(&h.log),
		),
		Err(ScrError::InvalidTarget { .. })
	));
	assert!(matches!(
		h.runtime.register(ComponentDescriptor::new("arity").init(1), recorder(&h.log)),
		Err(ScrError::InvalidDescriptor { .. } | ScrError::ClassMismatch { .. })
	));
	assert!(matches!(
		h.runtime.register(ComponentDescriptor::new("faceless").provides("api.X"), ComponentClass::<()>::with_default("faceless")),
		Err(ScrError::ClassMismatch { .. })
	));
	assert!(matches!(h.runtime.enable("ghost"), Err(ScrError::UnknownComponent(_))));
}

#[test]
fn unregister_and_shutdown_dispose_configurations() {
	let h = Harness::new();
	let other: Log = Log::default();
	h.runtime.register(ComponentDescriptor::new("gone"), recorder(&h.log)).unwrap();
	h.runtime.register(ComponentDescriptor::new("last"), recorder(&other)).unwrap();
	h.settle();
	h.take();

	h.runtime.unregister("gone").unwrap();
	h.settle();
	assert_eq!(h.take(), ["deactivate(5)#1"]);
	assert!(h.runtime.description("gone").is_none());

	assert!(h.runtime.shutdown());
	assert_eq!(other.lock().last().map(String::as_str), Some("deactivate(6)#1"));
	assert!(matches!(
		h.runtime.register(ComponentDescriptor::new("late"), recorder(&h.log)),
		Err(ScrError::ShutDown)
	));
}

#[test]
fn inspection_reflects_runtime_changes() {
	let h = Harness::new();
	let before = h.runtime.change_count();
	h.runtime
		.register(
			ComponentDescriptor::new("consumer")
				.provides("api.Consumer")
				.immediate(true)
				.reference(reference("log", "api.Log")),
			recorder(&h.log),
		)
		.unwrap();
	h.runtime.register(ComponentDescriptor::new("idle").disabled(), recorder(&h.log)).unwrap();
	let _log = h.publish("api.Log", "log", props! {});
	h.settle();
	assert!(h.runtime.change_count() > before);

	let text = render_text(&h.runtime.status());
	let id = h.configurations("consumer")[0].id.unwrap();
	assert!(text.contains("Disabled components:"), "{text}");
	assert!(text.contains(&format!("{id}=[consumer]\n  State=active\n")), "{text}");
	assert!(text.contains("  Services=api.Consumer\n"), "{text}");
	assert!(text.contains("  Reference=log, Satisfied\n"), "{text}");

	let descriptions = h.runtime.descriptions();
	assert_eq!(descriptions.iter().map(|d| d.name.as_str()).collect::<Vec<_>>(), ["consumer", "idle"]);
	assert!(h.runtime.actor_records().iter().any(|r| r.name == format!("consumer#{id}")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn settle_async_waits_for_pending_activation() {
	let h = Harness::new();
	h.runtime.register(ComponentDescriptor::new("async"), recorder(&h.log)).unwrap();
	assert!(h.runtime.settle_async().await);
	assert_eq!(h.take(), ["new#1", "activate#1"]);

	let handle = h.handle("async");
	h.runtime.disable("async").unwrap();
	handle.flush().await;
	assert_eq!(h.take(), ["deactivate(1)#1"]);
	assert!(handle.actor_record().closed);
}
