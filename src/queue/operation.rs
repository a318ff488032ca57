//! `ContactOperation`: the closed set of queued identity mutations.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mutation::{AttributeMutation, TagGroupsMutation};

/// A pending identity mutation.
///
/// Wire form is adjacently tagged: `{"type":"IDENTIFY","payload":{...}}`.
/// `RESET` and `RESOLVE` carry no payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "UPPERCASE")]
pub enum ContactOperation {
    Identify {
        #[serde(rename = "identifier")]
        external_id: String,
    },
    Reset,
    Resolve,
    Update {
        #[serde(default)]
        tag_group_mutations: Vec<TagGroupsMutation>,
        #[serde(default)]
        attribute_mutations: Vec<AttributeMutation>,
    },
}

impl ContactOperation {
    pub fn identify(external_id: impl Into<String>) -> Self {
        Self::Identify {
            external_id: external_id.into(),
        }
    }

    pub fn update(
        tag_group_mutations: Vec<TagGroupsMutation>,
        attribute_mutations: Vec<AttributeMutation>,
    ) -> Self {
        Self::Update {
            tag_group_mutations,
            attribute_mutations,
        }
    }

    pub fn is_update(&self) -> bool {
        matches!(self, Self::Update { .. })
    }

    pub fn is_identify(&self) -> bool {
        matches!(self, Self::Identify { .. })
    }
}

impl fmt::Display for ContactOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identify { external_id } => write!(f, "Identify({external_id})"),
            Self::Reset => write!(f, "Reset"),
            Self::Resolve => write!(f, "Resolve"),
            Self::Update {
                tag_group_mutations,
                attribute_mutations,
            } => write!(
                f,
                "Update(tags={}, attributes={})",
                tag_group_mutations.len(),
                attribute_mutations.len()
            ),
        }
    }
}
