use crate::{face::FaceToken, name::ContentName, tables::NameTable};

/// The Subscription Table: which faces want which content descriptors.
///
/// Entries are `(cd, face)` pairs, matched by prefix when fanning out
/// multicast traffic. Updates are reference counted per exact CD, so only
/// the first subscriber and the last unsubscriber of a CD change what has
/// to be announced upstream.
#[derive(Default)]
pub struct SubscriptionTable {
    table: NameTable<FaceToken>,
}

/// The net change to announce upstream after applying one ST update.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StDelta {
    pub added: Vec<ContentName>,
    pub removed: Vec<ContentName>,
}

impl StDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Applies the additions of `face`, then its removals, and returns the
    /// resulting delta.
    pub fn apply(
        &mut self,
        face: FaceToken,
        added: &[ContentName],
        removed: &[ContentName],
    ) -> StDelta {
        let mut delta = StDelta::default();

        for cd in added {
            let mut has_same_cd = false;
            let mut already_subscribed = false;
            for holder in self.table.exact_values(cd) {
                has_same_cd = true;
                if *holder == face {
                    already_subscribed = true;
                    break;
                }
            }
            if already_subscribed {
                continue;
            }
            self.table.add(cd, face);
            if !has_same_cd {
                delta.added.push(cd.clone());
            }
        }

        for cd in removed {
            if !self.table.remove(cd, &face) {
                continue;
            }
            if self.table.match_exact(cd).is_none() {
                delta.removed.push(cd.clone());
            }
        }

        delta
    }

    /// Faces subscribed to `cd` or to any of its prefixes, without duplicates.
    pub fn subscribers(&self, cd: &ContentName) -> Vec<FaceToken> {
        self.table
            .values_at_or_above(cd)
            .into_iter()
            .copied()
            .collect()
    }

    pub fn contains(&self, cd: &ContentName, face: FaceToken) -> bool {
        self.table.exact_values(cd).any(|f| *f == face)
    }

    /// Drops every entry held by `face`; returns the CDs that no face holds
    /// any more.
    pub fn remove_face(&mut self, face: FaceToken) -> Vec<ContentName> {
        let mut orphaned = self.table.remove_value(&face);
        orphaned.retain(|cd| self.table.match_exact(cd).is_none());
        orphaned
    }

    pub fn entries(&self) -> Vec<(ContentName, FaceToken)> {
        let mut entries = Vec::with_capacity(self.table.len());
        self.table
            .for_each(|name, face| entries.push((name.clone(), *face)));
        entries
    }
}
