//! The component class behind every assembly component.
//!
//! A recorder class is shaped after its descriptor: every callback name the
//! descriptor mentions is registered, and each invocation appends one line to the
//! shared [`Journal`].

use std::sync::Arc;

use keel_registry::ServiceInstance;
use keel_scr::{BoundService, ComponentClass, ComponentContext, ComponentDescriptor};
use parking_lot::Mutex;

pub type Journal = Arc<Mutex<Vec<String>>>;

pub struct Recorder {
	tag: String,
	journal: Journal,
}

impl Recorder {
	fn new(ctx: &ComponentContext, journal: &Journal) -> Self {
		Self {
			tag: format!("{}/{}#{}", ctx.component_name(), ctx.component_id(), ctx.instance_generation()),
			journal: Arc::clone(journal),
		}
	}

	fn record(&self, event: impl AsRef<str>) {
		self.journal.lock().push(format!("{} {}", self.tag, event.as_ref()));
	}
}

/// Short label for a bound service: its `name` property, else its id.
pub fn describe(service: &BoundService) -> String {
	match service.property("name") {
		Some(name) => format!("{name}({})", service.id()),
		None => service.id().to_string(),
	}
}

fn describe_all(services: &[BoundService]) -> String {
	services.iter().map(describe).collect::<Vec<_>>().join(", ")
}

pub fn class_for(descriptor: &ComponentDescriptor, journal: &Journal) -> ComponentClass<Recorder> {
	let construct_journal = Arc::clone(journal);
	let mut class = ComponentClass::<Recorder>::new("recorder")
		.constructor(descriptor.init, move |ctx, args| {
			let recorder = Recorder::new(ctx, &construct_journal);
			let params: Vec<String> = (0..args.len()).map(|i| format!("[{}]", describe_all(args.services(i)))).collect();
			recorder.record(format!("new({})", params.join(", ")));
			Ok(recorder)
		})
		.deactivate(descriptor.deactivate.clone().unwrap_or_else(|| "deactivate".to_string()), |r, _, reason| {
			r.record(format!("deactivate({})", reason.description()));
		})
		.provides(|r| Arc::new(r.tag.clone()) as ServiceInstance);

	let activate = descriptor.activate.clone().unwrap_or_else(|| "activate".to_string());
	let label = activate.clone();
	class = class.activate(activate, move |r, _| {
		r.record(&label);
		Ok(())
	});
	if let Some(modified) = &descriptor.modified {
		class = class.modified(modified.clone(), |r, ctx| {
			let keys: Vec<&str> = ctx.properties().keys().map(String::as_str).filter(|k| !k.starts_with("component.")).collect();
			r.record(format!("modified[{}]", keys.join(", ")));
			Ok(())
		});
	}

	for reference in &descriptor.references {
		for method in [&reference.bind, &reference.unbind, &reference.updated].into_iter().flatten() {
			let label = method.clone();
			class = class.method(method.clone(), move |r, service| {
				r.record(format!("{label} {}", describe(service)));
				Ok(())
			});
		}
		if let Some(field) = &reference.field {
			let label = field.clone();
			class = class.field(field.clone(), move |r, value| {
				r.record(format!("{label} = [{}]", describe_all(value.services())));
			});
		}
	}
	class
}
