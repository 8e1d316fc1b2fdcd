//! Startup ordering: the kernel allocates while creating a mutex, and that
//! allocation comes back through the port's malloc hooks before the mutex
//! exists.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, mpsc};
use std::thread;
use std::time::Duration;

use kclib::{
	ArenaConfig, ClibPort, GlobalRecursiveMutex, LockProvider, PerObjectRecursiveMutex, Phase,
};
use ksync::{MutexHandle, RecursiveMutexApi, SpinKernel, ThreadContexts};

const ARENA_START: usize = 0x1000_0000;
const ARENA_LEN: usize = 64 * 1024;
/// What the kernel allocates for one mutex control block.
const CONTROL_BLOCK: isize = 80;

type Hook = Box<dyn Fn() + Send + Sync>;

/// A kernel whose mutex creation runs a callback first, standing in for the
/// control-block allocation a real kernel makes.
struct AllocatingKernel {
	inner: SpinKernel<ThreadContexts>,
	on_create: OnceLock<Hook>,
	creates: AtomicUsize,
}

impl AllocatingKernel {
	fn new() -> Self {
		Self::from_inner(SpinKernel::new(ThreadContexts))
	}

	fn exhausted() -> Self {
		Self::from_inner(SpinKernel::with_capacity(ThreadContexts, 0))
	}

	fn from_inner(inner: SpinKernel<ThreadContexts>) -> Self {
		Self {
			inner,
			on_create: OnceLock::new(),
			creates: AtomicUsize::new(0),
		}
	}

	fn creates(&self) -> usize {
		self.creates.load(Ordering::SeqCst)
	}

	fn live(&self) -> usize {
		self.inner.live()
	}
}

impl RecursiveMutexApi for AllocatingKernel {
	type Handle = MutexHandle;
	type Contexts = ThreadContexts;

	fn contexts(&self) -> &ThreadContexts {
		self.inner.contexts()
	}

	fn create_recursive(&self) -> Option<MutexHandle> {
		self.creates.fetch_add(1, Ordering::SeqCst);
		if let Some(hook) = self.on_create.get() {
			hook();
		}
		self.inner.create_recursive()
	}

	fn delete(&self, handle: MutexHandle) {
		self.inner.delete(handle);
	}

	fn take_recursive(&self, handle: &MutexHandle) {
		self.inner.take_recursive(handle);
	}

	fn give_recursive(&self, handle: &MutexHandle) -> bool {
		self.inner.give_recursive(handle)
	}
}

fn arena() -> ArenaConfig {
	ArenaConfig::new(ARENA_START, ARENA_START + ARENA_LEN).unwrap()
}

/// Wire the kernel's create hook to a malloc that goes through `port`, and
/// record the phase each nested allocation observed.
fn allocate_on_create<P>(port: &Arc<ClibPort<P>>, kernel: &AllocatingKernel) -> Arc<Mutex<Vec<Phase>>>
where
	P: LockProvider + Send + Sync + 'static,
{
	let seen = Arc::new(Mutex::new(Vec::new()));
	let weak = Arc::downgrade(port);
	let record = Arc::clone(&seen);
	let hook: Hook = Box::new(move || {
		let Some(port) = weak.upgrade() else { return };
		record.lock().unwrap().push(port.phase());
		port.malloc_lock(None);
		port.env_lock(None);
		port.heap_grow(None, CONTROL_BLOCK).unwrap();
		port.env_unlock(None);
		port.malloc_unlock(None);
	});
	assert!(kernel.on_create.set(hook).is_ok());
	seen
}

/// Run `f` on a fresh thread and fail instead of hanging if it deadlocks.
fn within_deadline<F: FnOnce() + Send + 'static>(f: F) {
	let (tx, rx) = mpsc::channel();
	thread::spawn(move || {
		f();
		let _ = tx.send(());
	});
	rx.recv_timeout(Duration::from_secs(5))
		.expect("bootstrap did not finish (deadlock or panic)");
}

#[test]
fn per_object_first_malloc_lock_survives_nested_allocation() {
	let port = Arc::new(ClibPort::new(
		PerObjectRecursiveMutex::new(AllocatingKernel::new()),
		arena(),
	));
	let seen = allocate_on_create(&port, port.provider().kernel());

	let worker = Arc::clone(&port);
	within_deadline(move || {
		worker.malloc_lock(None);
		worker.heap_grow(None, 256).unwrap();
		worker.malloc_unlock(None);
	});

	let kernel = port.provider().kernel();
	assert_eq!(*seen.lock().unwrap(), vec![Phase::CreatingLocks]);
	assert_eq!(kernel.creates(), 1, "nested creation must be suppressed");
	assert_eq!(kernel.live(), 1);
	assert_eq!(port.phase(), Phase::Ready);
	assert_eq!(port.heap().used(), CONTROL_BLOCK as usize + 256);
}

#[test]
fn per_object_env_lock_is_created_after_bootstrap() {
	let port = Arc::new(ClibPort::new(
		PerObjectRecursiveMutex::new(AllocatingKernel::new()),
		arena(),
	));
	let seen = allocate_on_create(&port, port.provider().kernel());

	let worker = Arc::clone(&port);
	within_deadline(move || {
		worker.malloc_lock(None);
		worker.malloc_unlock(None);
		// The env lock was skipped inside the malloc lock's creation; this
		// is its first real use.
		worker.env_lock(None);
		worker.env_unlock(None);
	});

	assert_eq!(seen.lock().unwrap().len(), 2);
	assert_eq!(port.provider().kernel().live(), 2);
}

#[test]
fn global_init_survives_nested_allocation() {
	let port = Arc::new(ClibPort::new(
		GlobalRecursiveMutex::new(AllocatingKernel::new()),
		arena(),
	));
	let seen = allocate_on_create(&port, port.provider().kernel());

	let worker = Arc::clone(&port);
	within_deadline(move || worker.init());

	assert_eq!(*seen.lock().unwrap(), vec![Phase::CreatingLocks]);
	assert_eq!(port.phase(), Phase::Ready);
	assert_eq!(port.provider().kernel().live(), 1);
	assert_eq!(port.heap().used(), CONTROL_BLOCK as usize);
}

#[test]
fn global_locks_for_real_after_init() {
	let port = Arc::new(ClibPort::new(
		GlobalRecursiveMutex::new(AllocatingKernel::new()),
		arena(),
	));
	let _seen = allocate_on_create(&port, port.provider().kernel());

	// Early single-threaded allocations run unguarded.
	port.malloc_lock(None);
	port.heap_grow(None, 16).unwrap();
	port.malloc_unlock(None);
	assert_eq!(port.provider().kernel().live(), 0);

	port.init();

	port.malloc_lock(None);
	let mutex = port.provider().mutex().unwrap();
	assert_eq!(mutex.depth(), 1);
	port.malloc_unlock(None);
	assert_eq!(mutex.depth(), 0);
}

#[test]
fn creation_failure_degrades_without_retrying() {
	let port = Arc::new(ClibPort::new(
		PerObjectRecursiveMutex::new(AllocatingKernel::exhausted()),
		arena(),
	));
	let worker = Arc::clone(&port);
	within_deadline(move || {
		for _ in 0..3 {
			worker.malloc_lock(None);
			worker.heap_grow(None, 8).unwrap();
			worker.malloc_unlock(None);
		}
	});

	let kernel = port.provider().kernel();
	assert_eq!(kernel.creates(), 1);
	assert_eq!(kernel.live(), 0);
	assert_eq!(port.heap().used(), 24);
}

#[test]
fn concurrent_top_level_creations_both_get_a_mutex() {
	let (entered_tx, entered_rx) = mpsc::channel();
	let (resume_tx, resume_rx) = mpsc::channel::<()>();
	let entered_tx = Mutex::new(entered_tx);
	let resume_rx = Mutex::new(resume_rx);

	// Every kernel create parks until the test lets it finish.
	let kernel = AllocatingKernel::new();
	let hook: Hook = Box::new(move || {
		entered_tx.lock().unwrap().send(()).unwrap();
		resume_rx.lock().unwrap().recv().unwrap();
	});
	assert!(kernel.on_create.set(hook).is_ok());
	let port = Arc::new(ClibPort::new(PerObjectRecursiveMutex::new(kernel), arena()));

	let spawn_create = |port: &Arc<ClibPort<PerObjectRecursiveMutex<AllocatingKernel>>>| {
		let port = Arc::clone(port);
		let (tx, rx) = mpsc::channel();
		thread::spawn(move || {
			let mut slot = port.lock_create();
			let created = slot.is_some();
			port.lock_destroy(&mut slot);
			tx.send(created).unwrap();
		});
		rx
	};
	let deadline = Duration::from_secs(5);

	let first = spawn_create(&port);
	entered_rx
		.recv_timeout(deadline)
		.expect("first creator never reached the kernel");

	let second = spawn_create(&port);
	assert!(
		second.recv_timeout(Duration::from_millis(100)).is_err(),
		"second creator must wait for the window, not give up"
	);

	resume_tx.send(()).unwrap();
	assert_eq!(first.recv_timeout(deadline), Ok(true));

	entered_rx
		.recv_timeout(deadline)
		.expect("second creator never reached the kernel");
	resume_tx.send(()).unwrap();
	assert_eq!(second.recv_timeout(deadline), Ok(true));

	let kernel = port.provider().kernel();
	assert_eq!(kernel.creates(), 2);
	assert_eq!(kernel.live(), 0);
}
