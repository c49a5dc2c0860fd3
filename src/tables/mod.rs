pub mod rendezvous;
pub mod subscription;

use crate::name::{ContentName, NameComponent};

// A name-keyed trie. Every node corresponds to one name and holds the values
//  registered exactly at that name in insertion order. Children are kept
//  sorted by component so that a lookup costs O(depth * log(fanout)).

pub struct NameTable<V> {
    root: TableEntry<V>,
    len: usize,
}

/// A table entry found for a query name: the value and the number of
/// components of the key it was registered under.
#[derive(Debug)]
pub struct Match<'t, V> {
    pub prefix_len: usize,
    pub value: &'t V,
}

impl<'t, V> Clone for Match<'t, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'t, V> Copy for Match<'t, V> {}

impl<'t, V> Match<'t, V> {
    /// Whether the key of this entry is the query name itself.
    pub fn is_exact_for(&self, name: &ContentName) -> bool {
        self.prefix_len == name.component_count()
    }

    /// The key this entry was registered under, recovered from the query.
    pub fn key(&self, name: &ContentName) -> ContentName {
        name.prefix(self.prefix_len)
    }
}

impl<V> Default for NameTable<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> NameTable<V> {
    pub fn new() -> Self {
        Self {
            root: TableEntry::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the first entry registered at exactly `name`.
    pub fn match_exact(&self, name: &ContentName) -> Option<&V> {
        self.exact_values(name).next()
    }

    /// All entries registered at exactly `name`, in insertion order.
    pub fn exact_values(&self, name: &ContentName) -> impl Iterator<Item = &V> + '_ {
        self.entry(name)
            .into_iter()
            .flat_map(|entry| entry.values.iter())
    }

    /// The entry with the longest key that is a prefix of `name`. Ties at the
    /// same key are broken by insertion order.
    pub fn match_longest_prefix(&self, name: &ContentName) -> Option<Match<'_, V>> {
        self.matches_all(name).next()
    }

    /// Every entry whose key is a prefix of `name`, longest key first.
    pub fn matches_all(&self, name: &ContentName) -> impl Iterator<Item = Match<'_, V>> + '_ {
        self.path(name).into_iter().rev().flat_map(|(depth, entry)| {
            entry.values.iter().map(move |value| Match {
                prefix_len: depth,
                value,
            })
        })
    }

    /// Visits every entry, depth first, with its key.
    pub fn for_each<F>(&self, mut visit: F)
    where
        F: FnMut(&ContentName, &V),
    {
        self.root.for_each(&ContentName::root(), &mut visit)
    }

    fn entry(&self, name: &ContentName) -> Option<&TableEntry<V>> {
        let mut entry = &self.root;
        for component in name.components() {
            entry = entry.child(component)?;
        }
        Some(entry)
    }

    fn path(&self, name: &ContentName) -> Vec<(usize, &TableEntry<V>)> {
        let mut path = Vec::with_capacity(name.component_count() + 1);
        let mut entry = &self.root;
        path.push((0, entry));
        for (depth, component) in name.components().iter().enumerate() {
            match entry.child(component) {
                Some(child) => {
                    entry = child;
                    path.push((depth + 1, entry));
                }
                None => break,
            }
        }
        path
    }
}

impl<V: PartialEq> NameTable<V> {
    /// Inserts `(name, value)`. Returns false if the identical pair is
    /// already present, in which case the table is unchanged.
    pub fn add(&mut self, name: &ContentName, value: V) -> bool {
        let mut entry = &mut self.root;
        for component in name.components() {
            entry = entry.get_or_insert_child(component);
        }
        if entry.values.contains(&value) {
            return false;
        }
        entry.values.push(value);
        self.len += 1;
        true
    }

    /// Removes exactly the `(name, value)` pair, if present.
    pub fn remove(&mut self, name: &ContentName, value: &V) -> bool {
        let removed = self
            .root
            .remove(&mut name.components().iter(), value);
        if removed {
            self.len -= 1;
        }
        removed
    }

    /// Removes `value` under every name; returns the names it was removed from.
    pub fn remove_value(&mut self, value: &V) -> Vec<ContentName> {
        let mut removed = Vec::new();
        self.root
            .remove_everywhere(&ContentName::root(), value, &mut removed);
        self.len -= removed.len();
        removed
    }

    /// The distinct values of all entries whose key is a prefix of `name`,
    /// in the order `matches_all` first yields them.
    pub fn values_at_or_above(&self, name: &ContentName) -> Vec<&V> {
        let mut values: Vec<&V> = Vec::new();
        for m in self.matches_all(name) {
            if !values.contains(&m.value) {
                values.push(m.value);
            }
        }
        values
    }
}

struct TableEntry<V> {
    // In insertion order
    values: Vec<V>,
    // Ordered by component
    children: Vec<(NameComponent, TableEntry<V>)>,
}

impl<V> TableEntry<V> {
    fn new() -> Self {
        Self {
            values: Vec::new(),
            children: Vec::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.values.is_empty() && self.children.is_empty()
    }

    fn child(&self, component: &NameComponent) -> Option<&TableEntry<V>> {
        self.children
            .binary_search_by(|x| x.0.cmp(component))
            .ok()
            .map(|idx| &self.children[idx].1)
    }

    fn get_or_insert_child(&mut self, component: &NameComponent) -> &mut TableEntry<V> {
        let idx = match self.children.binary_search_by(|x| x.0.cmp(component)) {
            Ok(idx) => idx,
            Err(idx) => {
                self.children
                    .insert(idx, (component.clone(), TableEntry::new()));
                idx
            }
        };
        &mut self.children[idx].1
    }

    fn for_each<F>(&self, name_so_far: &ContentName, visit: &mut F)
    where
        F: FnMut(&ContentName, &V),
    {
        for value in self.values.iter() {
            visit(name_so_far, value);
        }
        for (component, child) in self.children.iter() {
            child.for_each(&name_so_far.adding_component(component.clone()), visit);
        }
    }
}

impl<V: PartialEq> TableEntry<V> {
    fn remove<'a, I>(&mut self, remaining_components: &mut I, value: &V) -> bool
    where
        I: Iterator<Item = &'a NameComponent>,
    {
        if let Some(component) = remaining_components.next() {
            let idx = match self.children.binary_search_by(|x| x.0.cmp(component)) {
                Ok(idx) => idx,
                Err(_) => return false,
            };
            let removed = self.children[idx].1.remove(remaining_components, value);
            // Clean up the child if it became empty
            if removed && self.children[idx].1.is_empty() {
                self.children.remove(idx);
            }
            removed
        } else {
            match self.values.iter().position(|v| v == value) {
                Some(index) => {
                    self.values.remove(index);
                    true
                }
                None => false,
            }
        }
    }

    fn remove_everywhere(
        &mut self,
        name_so_far: &ContentName,
        value: &V,
        removed: &mut Vec<ContentName>,
    ) {
        if let Some(index) = self.values.iter().position(|v| v == value) {
            self.values.remove(index);
            removed.push(name_so_far.clone());
        }
        for (component, child) in self.children.iter_mut() {
            child.remove_everywhere(&name_so_far.adding_component(component.clone()), value, removed);
        }
        self.children.retain(|c| !c.1.is_empty());
    }
}
