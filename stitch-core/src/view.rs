use core::fmt;
use derive_more::{Deref, DerefMut, From, Into};
use std::collections::BTreeSet;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Identity of one acquisition of the specimen.
///
/// A view is the unit that receives its own placement in the global frame
/// (unless it is grouped with other views, in which case the whole group
/// shares one placement). The identity is only ever used as a lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ViewId {
    /// The timepoint this view was acquired at.
    pub timepoint: u32,
    /// The setup (angle/channel/illumination) this view was acquired with.
    pub setup: u32,
}

impl ViewId {
    pub fn new(timepoint: u32, setup: u32) -> Self {
        Self { timepoint, setup }
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tp{}/s{}", self.timepoint, self.setup)
    }
}

/// A set of views constrained to resolve to the same transform.
///
/// Groups may be supplied overlapping; the solver merges overlapping groups
/// into a disjoint partition before assigning optimization nodes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deref, DerefMut, From, Into)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct ViewGroup(pub BTreeSet<ViewId>);

impl ViewGroup {
    pub fn new(views: impl IntoIterator<Item = ViewId>) -> Self {
        Self(views.into_iter().collect())
    }
}

impl FromIterator<ViewId> for ViewGroup {
    fn from_iter<I: IntoIterator<Item = ViewId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
