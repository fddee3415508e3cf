use std::sync::OnceLock;

use tokio::task::JoinHandle;

use crate::TaskClass;

const DEFAULT_THREAD_NAME: &str = "component-actor";

static THREAD_NAME: OnceLock<String> = OnceLock::new();

/// Sets the thread name used by the global worker runtime.
///
/// Returns `false` when a name was already chosen, either explicitly or because
/// the runtime has started.
pub fn configure_global_runtime(thread_name: impl Into<String>) -> bool {
	THREAD_NAME.set(thread_name.into()).is_ok()
}

fn global_handle() -> tokio::runtime::Handle {
	static GLOBAL_RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
	let runtime = GLOBAL_RT.get_or_init(|| {
		let name = THREAD_NAME.get_or_init(|| DEFAULT_THREAD_NAME.to_string());
		tokio::runtime::Builder::new_multi_thread()
			.enable_all()
			.worker_threads(2)
			.thread_name(name.clone())
			.build()
			.expect("failed to build keel-worker global tokio runtime")
	});
	runtime.handle().clone()
}

fn runtime_handle() -> tokio::runtime::Handle {
	if let Ok(handle) = tokio::runtime::Handle::try_current() {
		return handle;
	}
	global_handle()
}

/// Spawns blocking work with shared worker classification metadata.
pub fn spawn_blocking<F, R>(class: TaskClass, f: F) -> JoinHandle<R>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn_blocking");
	runtime_handle().spawn_blocking(f)
}

/// Spawns blocking work on the global runtime so it outlives any runtime the caller entered.
///
/// Strand drain loops use this: a component actor keeps running after the test or
/// request runtime that first touched it shuts down.
pub fn spawn_detached_blocking<F>(class: TaskClass, f: F)
where
	F: FnOnce() + Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn_detached_blocking");
	drop(global_handle().spawn_blocking(f));
}
