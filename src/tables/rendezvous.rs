use tracing::warn;

use crate::{name::ContentName, tables::NameTable};

/// Static mapping from CD prefixes to the rendezvous point serving them.
pub struct RpMappingTable {
    table: NameTable<ContentName>,
}

impl Default for RpMappingTable {
    /// Everything maps to `/RP`.
    fn default() -> Self {
        let mut mapping = Self::empty();
        mapping.insert(ContentName::root(), ContentName::from_components(["RP"]));
        mapping
    }
}

impl RpMappingTable {
    pub fn empty() -> Self {
        Self {
            table: NameTable::new(),
        }
    }

    pub fn from_pairs<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (ContentName, ContentName)>,
    {
        let mut mapping = Self::empty();
        for (prefix, rp) in pairs {
            mapping.insert(prefix, rp);
        }
        mapping
    }

    /// Maps `prefix` to `rp`, replacing any RP previously mapped there.
    pub fn insert(&mut self, prefix: ContentName, rp: ContentName) {
        let previous: Vec<ContentName> = self.table.exact_values(&prefix).cloned().collect();
        for old in previous.iter() {
            self.table.remove(&prefix, old);
        }
        self.table.add(&prefix, rp);
    }

    pub fn rp_for(&self, cd: &ContentName) -> Option<&ContentName> {
        self.table.match_longest_prefix(cd).map(|m| m.value)
    }

    pub fn mappings(&self) -> Vec<(ContentName, ContentName)> {
        let mut mappings = Vec::with_capacity(self.table.len());
        self.table
            .for_each(|prefix, rp| mappings.push((prefix.clone(), rp.clone())));
        mappings
    }

    /// Groups `cds` by the RP serving each of them. Groups come out in the
    /// order their RP is first needed, and CDs keep their order within a
    /// group. CDs without any mapping are dropped.
    pub fn split_by_rp(&self, cds: &[ContentName]) -> Vec<(ContentName, Vec<ContentName>)> {
        let mut groups: Vec<(ContentName, Vec<ContentName>)> = Vec::new();
        for cd in cds {
            let rp = match self.rp_for(cd) {
                Some(rp) => rp,
                None => {
                    warn!(%cd, "No rendezvous point for content descriptor, dropping it");
                    continue;
                }
            };
            match groups.iter_mut().find(|(r, _)| r == rp) {
                Some((_, group)) => group.push(cd.clone()),
                None => groups.push((rp.clone(), vec![cd.clone()])),
            }
        }
        groups
    }
}
