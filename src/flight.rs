//! Keyed single-flight coordination.
//!
//! The first caller for a key starts the work; callers that arrive while it is running await
//! the same shared future and observe the identical success or failure. The flight removes its
//! own slot before publishing the result, so the next caller after completion starts a new
//! round. Dropping a waiting caller never cancels the flight while other callers still hold it.
//!
//! [`WriteEpoch`] orders a flight's final store write against writes made outside it, such as
//! a logout or a fresh consent: a flight only persists if no such write happened since it began.

// crates.io
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex as AsyncMutex;
// self
use crate::_prelude::*;

type SharedFlight<T> = Shared<BoxFuture<'static, Result<T>>>;

struct Slot<T> {
	id: u64,
	flight: SharedFlight<T>,
}

struct Slots<K, T> {
	next_id: u64,
	flights: HashMap<K, Slot<T>>,
}

/// Coalesces concurrent work per key.
pub struct SingleFlight<K, T> {
	slots: Arc<Mutex<Slots<K, T>>>,
}
impl<K, T> SingleFlight<K, T>
where
	K: 'static + Clone + Eq + Hash + Send,
	T: 'static + Clone + Send + Sync,
{
	/// Creates an empty coordinator.
	pub fn new() -> Self {
		Self { slots: Arc::new(Mutex::new(Slots { next_id: 0, flights: HashMap::new() })) }
	}

	/// Runs `work` for `key`, or joins the flight already running for it.
	///
	/// `work` is only invoked when no flight is in progress for `key`.
	pub async fn run<F, Fut>(&self, key: K, work: F) -> Result<T>
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = Result<T>>,
	{
		self.join_or_start(key, work).0.await
	}

	/// Like [`run`](Self::run) but also reports whether this caller started the flight.
	pub async fn run_reporting<F, Fut>(&self, key: K, work: F) -> (Result<T>, bool)
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = Result<T>>,
	{
		let (flight, leader) = self.join_or_start(key, work);

		(flight.await, leader)
	}

	/// Returns `true` if a flight is currently running for `key`.
	pub fn is_in_flight(&self, key: &K) -> bool {
		self.slots.lock().flights.contains_key(key)
	}

	/// Number of keys with a running flight.
	pub fn in_flight(&self) -> usize {
		self.slots.lock().flights.len()
	}

	fn join_or_start<F, Fut>(&self, key: K, work: F) -> (SharedFlight<T>, bool)
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = Result<T>>,
	{
		let mut slots = self.slots.lock();

		if let Some(slot) = slots.flights.get(&key) {
			return (slot.flight.clone(), false);
		}

		let id = slots.next_id;

		slots.next_id = slots.next_id.wrapping_add(1);

		let pending = work();
		let registry = Arc::clone(&self.slots);
		let slot_key = key.clone();
		let flight = async move {
			let result = pending.await;
			let mut slots = registry.lock();

			if slots.flights.get(&slot_key).is_some_and(|slot| slot.id == id) {
				slots.flights.remove(&slot_key);
			}

			result
		}
		.boxed()
		.shared();

		slots.flights.insert(key, Slot { id, flight: flight.clone() });

		(flight, true)
	}
}
impl<K, T> Default for SingleFlight<K, T>
where
	K: 'static + Clone + Eq + Hash + Send,
	T: 'static + Clone + Send + Sync,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<K, T> Debug for SingleFlight<K, T> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SingleFlight").field("in_flight", &self.slots.lock().flights.len()).finish()
	}
}

/// Generation counter serializing store writes for the keys a provider owns.
#[derive(Clone, Debug, Default)]
pub struct WriteEpoch(Arc<AsyncMutex<u64>>);
impl WriteEpoch {
	/// Generation a flight records before it reads the store.
	pub async fn current(&self) -> u64 {
		*self.0.lock().await
	}

	/// Runs an out-of-band `write` and invalidates every flight that started before it.
	pub async fn advance<F, Fut, T>(&self, write: F) -> T
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		let mut epoch = self.0.lock().await;

		*epoch = epoch.wrapping_add(1);

		write().await
	}

	/// Runs `write` only if the generation is still `observed`; returns `None` otherwise.
	pub async fn if_current<F, Fut, T>(&self, observed: u64, write: F) -> Option<T>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = T>,
	{
		let epoch = self.0.lock().await;

		if *epoch != observed {
			return None;
		}

		Some(write().await)
	}
}
