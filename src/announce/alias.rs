//! Display names for chat user ids.

use std::sync::Arc;

use tracing::debug;

use crate::announce::AnnouncementSink;
use crate::error::{Result, ResultExt};
use crate::events::keys;
use crate::store::KvStore;

/// `alias:<userId>` records. Aliases never expire.
pub struct AliasDirectory<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for AliasDirectory<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: KvStore + ?Sized> AliasDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn get(&self, user_id: &str) -> Result<Option<String>> {
        Ok(self.store.get(&keys::alias_key(user_id))?)
    }

    pub fn set(&self, user_id: &str, alias: &str) -> Result<()> {
        self.store
            .set(&keys::alias_key(user_id), alias, None)
            .with_context(|| format!("set alias of {user_id}"))
    }

    /// Stored alias, else the platform display name (which is then stored),
    /// else the raw id.
    pub fn resolve(&self, user_id: &str, sink: &dyn AnnouncementSink) -> Result<String> {
        if let Some(alias) = self.get(user_id)? {
            return Ok(alias);
        }
        match sink
            .display_name(user_id)
            .with_context(|| format!("look up user {user_id}"))?
        {
            Some(name) => {
                debug!(user_id, alias = %name, "caching display name as alias");
                self.set(user_id, &name)?;
                Ok(name)
            }
            None => Ok(user_id.to_owned()),
        }
    }
}
