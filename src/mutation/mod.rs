pub mod attributes;
pub mod tag_groups;

pub use attributes::{AttributeEditor, AttributeMutation};
pub use tag_groups::{TagGroups, TagGroupsEditor, TagGroupsMutation};
