//! Object visibility.
//!
//! Written samples carry one of three states:
//! - Deferred: inherit from parent
//! - Hidden: explicitly hidden
//! - Visible: explicitly visible

use serde::Serialize;

/// Object visibility state, as written per sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(i8)]
pub enum ObjectVisibility {
    /// Visibility is deferred to parent.
    #[default]
    Deferred = -1,

    /// Object is explicitly hidden.
    Hidden = 0,

    /// Object is explicitly visible.
    Visible = 1,
}

impl ObjectVisibility {
    /// Parse from i8 value (as stored in property).
    pub fn from_i8(value: i8) -> Self {
        match value {
            0 => Self::Hidden,
            1 => Self::Visible,
            _ => Self::Deferred,
        }
    }

    /// Convert to i8 for storage.
    pub fn to_i8(self) -> i8 {
        self as i8
    }

    /// Visible samples defer to the parent, hidden ones are explicit.
    pub fn from_shown(shown: bool) -> Self {
        if shown {
            Self::Deferred
        } else {
            Self::Hidden
        }
    }

    /// Check if this is explicitly hidden.
    pub fn is_hidden(self) -> bool {
        matches!(self, Self::Hidden)
    }
}
