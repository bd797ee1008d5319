//! Cache candidate resolution.
//!
//! An exact key is checked with a single point lookup. Failing that, one
//! listing under the longest prefix shared by all restore keys covers every
//! one of them. For the usual nested keys that is the least specific key.
//! Restore keys are then tried in caller order: an earlier key always beats
//! a later one, and within a key the most recently updated object wins.

use crate::keys::matches_prefix;
use crate::types::Resolution;
use keystash_core::{object_name, object_prefix, CacheObject, ObjectStore, Result};
use tracing::{debug, info};

pub struct Resolver<'a> {
    store: &'a dyn ObjectStore,
    bucket: &'a str,
    namespace: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn ObjectStore, bucket: &'a str, namespace: &'a str) -> Self {
        Self {
            store,
            bucket,
            namespace,
        }
    }

    pub async fn resolve(&self, exact_key: &str, restore_keys: &[String]) -> Result<Resolution> {
        let exact_name = object_name(self.namespace, exact_key);

        if let Some(object) = self.store.head(self.bucket, &exact_name).await? {
            info!(key = %exact_key, object = %object.name, "Found exact match");
            return Ok(Resolution::exact(object));
        }

        if restore_keys.is_empty() {
            debug!(key = %exact_key, "No exact match and no restore keys");
            return Ok(Resolution::none());
        }

        let shared = listing_prefix(restore_keys);
        let mut candidates = self
            .store
            .list(self.bucket, &object_prefix(self.namespace, shared))
            .await?;
        sort_most_recent_first(&mut candidates);
        debug!(candidates = candidates.len(), prefix = %shared, "Listed restore candidates");

        for restore_key in restore_keys {
            let prefix = object_prefix(self.namespace, restore_key);
            match candidates.iter().find(|c| matches_prefix(&c.name, &prefix)) {
                Some(object) => {
                    info!(restore_key = %restore_key, object = %object.name, "Found restore key match");
                    return Ok(Resolution::partial(object.clone()));
                }
                None => debug!(restore_key = %restore_key, "No candidate for restore key"),
            }
        }

        Ok(Resolution::none())
    }
}

/// Longest prefix shared by every restore key.
///
/// Equals the last key when each key extends the next one.
pub fn listing_prefix(restore_keys: &[String]) -> &str {
    let Some((first, rest)) = restore_keys.split_first() else {
        return "";
    };
    let mut len = first.len();
    for key in rest {
        len = first
            .char_indices()
            .zip(key.chars())
            .take_while(|((_, a), b)| a == b)
            .last()
            .map_or(0, |((i, a), _)| i + a.len_utf8())
            .min(len);
    }
    &first[..len]
}

/// Stable sort by `last_updated`, newest first.
pub fn sort_most_recent_first(objects: &mut [CacheObject]) {
    objects.sort_by(|a, b| b.last_updated.cmp(&a.last_updated));
}
