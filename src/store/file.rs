//! JSON-file [`CredentialStore`] for command-line tools and long-lived desktop clients.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{CredentialStore, StoreError, StoreFuture, StoreKey},
};

/// Persists credentials to a JSON file after each mutation.
///
/// Writes go to a sibling `.tmp` file that is synced and then renamed over the target, so
/// readers never observe a half-written snapshot. On Unix the file is created with mode `0600`.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<HashMap<StoreKey, Credential>>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		let snapshot = load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Location of the backing file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn persist_locked(&self, contents: &HashMap<StoreKey, Credential>) -> Result<(), StoreError> {
		ensure_parent_exists(&self.path)?;

		let mut snapshot = contents.iter().collect::<Vec<_>>();

		snapshot.sort_by(|(a, _), (b, _)| a.cmp(b));

		let serialized =
			serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
				message: format!("Failed to serialize store snapshot: {e}"),
			})?;
		let mut tmp_path = self.path.clone();

		tmp_path.set_extension("tmp");

		{
			let mut file = create_private(&tmp_path).map_err(|e| StoreError::Backend {
				message: format!("Failed to create {}: {e}", tmp_path.display()),
			})?;

			file.write_all(&serialized).map_err(|e| StoreError::Backend {
				message: format!("Failed to write {}: {e}", tmp_path.display()),
			})?;
			file.sync_all().map_err(|e| StoreError::Backend {
				message: format!("Failed to sync {}: {e}", tmp_path.display()),
			})?;
		}

		fs::rename(&tmp_path, &self.path).map_err(|e| StoreError::Backend {
			message: format!("Failed to replace {}: {e}", self.path.display()),
		})
	}
}
impl CredentialStore for FileStore {
	fn save<'a>(&'a self, key: &'a StoreKey, credential: Credential) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			guard.insert(key.to_owned(), credential);
			self.persist_locked(&guard)
		})
	}

	fn fetch<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, Option<Credential>> {
		Box::pin(async move { Ok(self.inner.read().get(key).cloned()) })
	}

	fn delete<'a>(&'a self, key: &'a StoreKey) -> StoreFuture<'a, bool> {
		Box::pin(async move {
			let mut guard = self.inner.write();

			if guard.remove(key).is_none() {
				return Ok(false);
			}

			self.persist_locked(&guard)?;

			Ok(true)
		})
	}
}

fn load_snapshot(path: &Path) -> Result<HashMap<StoreKey, Credential>, StoreError> {
	let bytes = match fs::read(path) {
		Ok(bytes) => bytes,
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
		Err(e) =>
			return Err(StoreError::Backend {
				message: format!("Failed to read {}: {e}", path.display()),
			}),
	};

	if bytes.iter().all(u8::is_ascii_whitespace) {
		return Ok(HashMap::new());
	}

	let entries: Vec<(StoreKey, Credential)> =
		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})?;

	Ok(entries.into_iter().collect())
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}

#[cfg(unix)]
fn create_private(path: &Path) -> std::io::Result<File> {
	// std
	use std::os::unix::fs::OpenOptionsExt;

	fs::OpenOptions::new().write(true).create(true).truncate(true).mode(0o600).open(path)
}

#[cfg(not(unix))]
fn create_private(path: &Path) -> std::io::Result<File> {
	File::create(path)
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;

	fn temp_path(label: &str) -> PathBuf {
		let unique = format!(
			"sheets_broker_file_store_{label}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn credential(token: &str) -> Credential {
		Credential::builder()
			.access_token(token)
			.refresh_token("refresh-token")
			.scope(crate::auth::scope::SPREADSHEETS)
			.expires_in(Duration::from_secs(3600))
			.build()
			.expect("Failed to build file-store test credential.")
	}

	#[tokio::test]
	async fn save_and_reload_round_trip() {
		let path = temp_path("reload");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let key = StoreKey::parse("sheets-cli", "default").expect("Store key should be valid.");

		store.save(&key, credential("access-token")).await.expect("Save should succeed.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = reopened
			.fetch(&key)
			.await
			.expect("Fetch should succeed.")
			.expect("File store lost credential after reopen.");

		assert_eq!(fetched.access_token.expose(), "access-token");
		assert_eq!(fetched.refresh_token.as_ref().map(|t| t.expose()), Some("refresh-token"));
		assert!(!path.with_extension("tmp").exists(), "Temporary snapshot must be renamed away.");

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[tokio::test]
	async fn delete_persists_removal() {
		let path = temp_path("delete");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let key = StoreKey::parse("sheets-cli", "default").expect("Store key should be valid.");

		store.save(&key, credential("doomed")).await.expect("Save should succeed.");
		assert!(store.delete(&key).await.expect("Delete should succeed."));

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");

		assert!(reopened.fetch(&key).await.expect("Fetch should succeed.").is_none());

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[test]
	fn corrupt_snapshot_reports_serialization_error() {
		let path = temp_path("corrupt");

		fs::write(&path, b"{not json").expect("Fixture write should succeed.");

		let err = FileStore::open(&path).expect_err("Corrupt snapshot must be rejected.");

		assert!(matches!(err, StoreError::Serialization { .. }));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}
