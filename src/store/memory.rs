//! Thread-safe in-process [`CredentialStore`].

// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{CredentialStore, StoreFuture, StoreKey},
};

type StoreMap = Arc<RwLock<HashMap<StoreKey, Credential>>>;

/// Keeps credentials in memory; the default backing store for service identities.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	/// Number of stored credentials.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` if nothing is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}

	/// Synchronous snapshot of one entry, for inspection in tests and tools.
	pub fn get(&self, key: &StoreKey) -> Option<Credential> {
		self.0.read().get(key).cloned()
	}
}
impl CredentialStore for MemoryStore {
	fn save<'a>(&'a self, key: &'a StoreKey, credential: Credential) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move {
			map.write().insert(key, credential);

			Ok(())
		})
	}

	fn fetch<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<Credential>> {
		Box::pin(async move { Ok(self.get(key)) })
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		let map = self.0.clone();

		Box::pin(async move { Ok(map.write().remove(key).is_some()) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn save_fetch_delete_round_trip() {
		let store = MemoryStore::default();
		let key = StoreKey::parse("sheets", "alice").expect("Store key fixture should be valid.");
		let other = StoreKey::parse("sheets", "bob").expect("Store key fixture should be valid.");
		let credential = Credential::builder()
			.access_token("alice-token")
			.refresh_token("alice-refresh")
			.expires_in(Duration::from_secs(3600))
			.build()
			.expect("Credential fixture should build.");

		store.save(&key, credential).await.expect("Save should succeed.");

		let fetched = store
			.fetch(&key)
			.await
			.expect("Fetch should succeed.")
			.expect("Saved credential should be present.");

		assert_eq!(fetched.access_token.expose(), "alice-token");
		assert!(store.fetch(&other).await.expect("Fetch should succeed.").is_none());
		assert!(store.delete(&key).await.expect("Delete should succeed."));
		assert!(!store.delete(&key).await.expect("Second delete should succeed."));
		assert!(store.is_empty());
	}
}
