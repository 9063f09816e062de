//! In-memory collection mirrored into persisted storage.

use color_eyre::Result;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::storage::Storage;
use super::traits::{Cacheable, SyncReport};

/// One cache's collection plus the flags that travel with it.
///
/// `loaded` means the in-memory state reflects persisted storage; `store`
/// refuses to write otherwise so an unhydrated cache never clobbers what is
/// on disk. `fetched` is the optional persisted "loaded from Redmine" flag
/// that statuses and users use to gate re-fetching.
#[derive(Debug, Clone)]
pub struct Collection<T: Cacheable> {
  items: Vec<T>,
  loaded: bool,
  fetched: bool,
  key: &'static str,
  fetched_key: Option<&'static str>,
}

impl<T: Cacheable> Collection<T> {
  pub fn new(key: &'static str) -> Self {
    Self {
      items: Vec::new(),
      loaded: false,
      fetched: false,
      key,
      fetched_key: None,
    }
  }

  /// Also persist a "fetched from remote" flag under `fetched_key`.
  pub fn with_fetched_flag(mut self, fetched_key: &'static str) -> Self {
    self.fetched_key = Some(fetched_key);
    self
  }

  /// Hydrate from storage. Does nothing once loaded.
  ///
  /// A corrupt document is logged and treated as empty; it is overwritten by
  /// the next successful sync.
  pub fn load_from_local_store(&mut self, storage: &dyn Storage) -> Result<()> {
    if self.loaded {
      return Ok(());
    }

    self.items = match storage.get_json::<Vec<T>>(self.key) {
      Ok(items) => items.unwrap_or_default(),
      Err(e) => {
        tracing::warn!(key = self.key, error = %e, "discarding unreadable cache slot");
        Vec::new()
      }
    };
    if let Some(flag) = self.fetched_key {
      self.fetched = storage.get_json::<bool>(flag).ok().flatten().unwrap_or(false);
    }
    self.loaded = true;
    Ok(())
  }

  /// Persist the collection. Skipped while not loaded.
  pub fn store(&self, storage: &dyn Storage) -> Result<()> {
    if !self.loaded {
      return Ok(());
    }
    storage.set_json(self.key, &self.items)?;
    if let Some(flag) = self.fetched_key {
      storage.set_json(flag, &self.fetched)?;
    }
    Ok(())
  }

  /// Empty the collection and drop its persisted slots.
  pub fn clear(&mut self, storage: &dyn Storage) -> Result<()> {
    self.items.clear();
    self.loaded = false;
    self.fetched = false;
    storage.remove(self.key)?;
    if let Some(flag) = self.fetched_key {
      storage.remove(flag)?;
    }
    Ok(())
  }

  pub fn is_loaded(&self) -> bool {
    self.loaded
  }

  pub fn is_fetched(&self) -> bool {
    self.fetched
  }

  pub fn set_fetched(&mut self, fetched: bool) {
    self.fetched = fetched;
  }

  /// Mark as loaded without reading storage, used after a remote fetch
  /// replaced everything.
  pub fn mark_loaded(&mut self) {
    self.loaded = true;
  }

  pub fn items(&self) -> &[T] {
    &self.items
  }

  pub fn items_mut(&mut self) -> &mut [T] {
    &mut self.items
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn get_by_id(&self, id: u64) -> Option<&T> {
    self.items.iter().find(|item| item.cache_id() == id)
  }

  pub fn get_by_id_mut(&mut self, id: u64) -> Option<&mut T> {
    self.items.iter_mut().find(|item| item.cache_id() == id)
  }

  pub fn push(&mut self, item: T) {
    self.items.push(item);
  }

  pub fn replace_all(&mut self, items: Vec<T>) {
    self.items = items;
  }

  /// Keep only the items `keep` accepts. Returns how many were dropped.
  pub fn retain(&mut self, keep: impl FnMut(&T) -> bool) -> usize {
    let before = self.items.len();
    self.items.retain(keep);
    before - self.items.len()
  }
}

/// Run a background refresh without blocking the caller. Failures are
/// logged; callers learn about fresh data from the notification bus.
pub fn spawn_refresh<F, E>(label: &'static str, refresh: F)
where
  F: Future<Output = std::result::Result<SyncReport, E>> + Send + 'static,
  E: std::fmt::Display + Send + 'static,
{
  let Ok(handle) = tokio::runtime::Handle::try_current() else {
    tracing::warn!(cache = label, "no async runtime, background refresh skipped");
    return;
  };
  handle.spawn(async move {
    match refresh.await {
      Ok(report) if report.skipped => {
        tracing::debug!(cache = label, "refresh already in progress")
      }
      Ok(report) => {
        tracing::debug!(cache = label, pages = report.pages, updated = report.updated, "refreshed")
      }
      Err(e) => tracing::warn!(cache = label, error = %e, "background refresh failed"),
    }
  });
}

/// Lock a cache mutex. Cache state is plain data, so a panic in another
/// holder leaves it usable.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// At-most-one concurrent sync per cache.
#[derive(Debug, Clone, Default)]
pub struct SyncFlag(Arc<AtomicBool>);

impl SyncFlag {
  /// Claim the flag. `None` while another sync holds it.
  pub fn try_begin(&self) -> Option<SyncGuard> {
    self
      .0
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .ok()
      .map(|_| SyncGuard(Arc::clone(&self.0)))
  }

  pub fn in_progress(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

/// Releases the owning [`SyncFlag`] on drop.
#[derive(Debug)]
pub struct SyncGuard(Arc<AtomicBool>);

impl Drop for SyncGuard {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}
