//! Watch-list to authority-index resolution

use crate::{AuthIndex, ValidatorId};
use indexmap::IndexSet;
use tracing::trace;

/// The configured set of validators to monitor, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchList {
    validators: IndexSet<ValidatorId>,
}

impl WatchList {
    /// Build a watch-list; duplicates are dropped
    pub fn new<I, V>(validators: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ValidatorId>,
    {
        Self {
            validators: validators.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `validator` is watched
    pub fn contains(&self, validator: &ValidatorId) -> bool {
        self.validators.contains(validator)
    }

    /// Watched validators in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &ValidatorId> {
        self.validators.iter()
    }

    /// Number of watched validators
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether nothing is watched
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }
}

/// Authority indices of the watched validators in `snapshot`, ascending.
///
/// The validator set can change at any session boundary, so callers resolve
/// against a fresh snapshot on every pass instead of caching indices.
pub fn resolve_auth_indices(snapshot: &[ValidatorId], watch_list: &WatchList) -> Vec<AuthIndex> {
    snapshot
        .iter()
        .enumerate()
        .filter(|(_, validator)| watch_list.contains(validator))
        .map(|(index, validator)| {
            trace!("resolved {} at auth index {}", validator, index);
            index as AuthIndex
        })
        .collect()
}
