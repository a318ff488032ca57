//! Tag group mutations: add / remove / set deltas over named tag groups.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tag group name → tags.
pub type TagGroups = BTreeMap<String, BTreeSet<String>>;

/// A tag group delta.
///
/// A mutation produced by [`TagGroupsMutation::collapse`] is either a pure
/// `set` mutation or a pure `add`/`remove` mutation, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagGroupsMutation {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add: TagGroups,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remove: TagGroups,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub set: TagGroups,
}

fn single_group(group: &str, tags: impl IntoIterator<Item = String>) -> TagGroups {
    let mut map = TagGroups::new();
    map.insert(group.to_string(), tags.into_iter().collect());
    map
}

impl TagGroupsMutation {
    pub fn add_tags(group: &str, tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            add: single_group(group, tags),
            ..Self::default()
        }
    }

    pub fn remove_tags(group: &str, tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            remove: single_group(group, tags),
            ..Self::default()
        }
    }

    pub fn set_tags(group: &str, tags: impl IntoIterator<Item = String>) -> Self {
        Self {
            set: single_group(group, tags),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty() && self.set.is_empty()
    }

    /// Apply this mutation to `tag_groups` in place.
    ///
    /// `set` replaces a group wholesale, `add` unions, `remove` subtracts.
    /// Groups emptied by a removal are dropped.
    pub fn apply(&self, tag_groups: &mut TagGroups) {
        for (group, tags) in &self.set {
            tag_groups.insert(group.clone(), tags.clone());
        }

        for (group, tags) in &self.add {
            tag_groups
                .entry(group.clone())
                .or_default()
                .extend(tags.iter().cloned());
        }

        for (group, tags) in &self.remove {
            if let Some(existing) = tag_groups.get_mut(group) {
                for tag in tags {
                    existing.remove(tag);
                }
                if existing.is_empty() {
                    tag_groups.remove(group);
                }
            }
        }
    }

    /// Collapse a list of mutations into at most two equivalent mutations:
    /// one `set` mutation followed by one `add`/`remove` mutation.
    pub fn collapse(mutations: &[TagGroupsMutation]) -> Vec<TagGroupsMutation> {
        let mut add = TagGroups::new();
        let mut remove = TagGroups::new();
        let mut set = TagGroups::new();

        for mutation in mutations {
            // Within one mutation: set first, then add, then remove, matching the
            // order `apply` uses.
            for (group, tags) in &mutation.set {
                add.remove(group);
                remove.remove(group);
                set.insert(group.clone(), tags.clone());
            }

            for (group, tags) in &mutation.add {
                if let Some(existing) = set.get_mut(group) {
                    existing.extend(tags.iter().cloned());
                    continue;
                }
                if let Some(removed) = remove.get_mut(group) {
                    for tag in tags {
                        removed.remove(tag);
                    }
                }
                add.entry(group.clone())
                    .or_default()
                    .extend(tags.iter().cloned());
            }

            for (group, tags) in &mutation.remove {
                if let Some(existing) = set.get_mut(group) {
                    for tag in tags {
                        existing.remove(tag);
                    }
                    continue;
                }
                if let Some(added) = add.get_mut(group) {
                    for tag in tags {
                        added.remove(tag);
                    }
                }
                remove
                    .entry(group.clone())
                    .or_default()
                    .extend(tags.iter().cloned());
            }
        }

        add.retain(|_, tags| !tags.is_empty());
        remove.retain(|_, tags| !tags.is_empty());

        let mut collapsed = Vec::new();
        if !set.is_empty() {
            collapsed.push(TagGroupsMutation {
                set,
                ..Self::default()
            });
        }
        if !add.is_empty() || !remove.is_empty() {
            collapsed.push(TagGroupsMutation {
                add,
                remove,
                set: TagGroups::new(),
            });
        }
        collapsed
    }
}

// ============================================================================
// TagGroupsEditor
// ============================================================================

/// Accumulates tag group edits and hands the collapsed list to `on_apply`.
pub struct TagGroupsEditor<'a> {
    mutations: Vec<TagGroupsMutation>,
    on_apply: Box<dyn FnOnce(Vec<TagGroupsMutation>) -> Result<()> + 'a>,
}

fn clean_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    tags.into_iter()
        .map(|t| t.into().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

impl<'a> TagGroupsEditor<'a> {
    pub fn new(on_apply: impl FnOnce(Vec<TagGroupsMutation>) -> Result<()> + 'a) -> Self {
        Self {
            mutations: Vec::new(),
            on_apply: Box::new(on_apply),
        }
    }

    fn valid_group(group: &str) -> Option<String> {
        let group = group.trim();
        if group.is_empty() {
            tracing::warn!("ignoring tag group edit with a blank group name");
            None
        } else {
            Some(group.to_string())
        }
    }

    pub fn add_tag(self, group: &str, tag: &str) -> Self {
        self.add_tags(group, [tag])
    }

    pub fn add_tags<I, S>(mut self, group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = clean_tags(tags);
        if let Some(group) = Self::valid_group(group) {
            if !tags.is_empty() {
                self.mutations
                    .push(TagGroupsMutation::add_tags(&group, tags));
            }
        }
        self
    }

    pub fn remove_tag(self, group: &str, tag: &str) -> Self {
        self.remove_tags(group, [tag])
    }

    pub fn remove_tags<I, S>(mut self, group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = clean_tags(tags);
        if let Some(group) = Self::valid_group(group) {
            if !tags.is_empty() {
                self.mutations
                    .push(TagGroupsMutation::remove_tags(&group, tags));
            }
        }
        self
    }

    /// Replace the whole group. An empty `tags` clears it.
    pub fn set_tags<I, S>(mut self, group: &str, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let tags = clean_tags(tags);
        if let Some(group) = Self::valid_group(group) {
            self.mutations
                .push(TagGroupsMutation::set_tags(&group, tags));
        }
        self
    }

    pub fn apply(self) -> Result<()> {
        let collapsed = TagGroupsMutation::collapse(&self.mutations);
        if collapsed.is_empty() {
            return Ok(());
        }
        (self.on_apply)(collapsed)
    }
}
