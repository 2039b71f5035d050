//! Value types shared across the engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One name-field occurrence on one document: the atomic unit of
/// disambiguation. Immutable once observed; the catalog resolves the
/// attached name string and field values.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Signature {
    /// Tag of the name field the occurrence was found in (e.g. 100 for a
    /// first author field, 700 for an additional author field).
    pub field_tag: u32,
    /// Identifier of the name-string row the occurrence points at.
    pub reference_id: u64,
    /// Identifier of the document carrying the occurrence.
    pub document_id: u64,
}

impl Signature {
    pub fn new(field_tag: u32, reference_id: u64, document_id: u64) -> Self {
        Self {
            field_tag,
            reference_id,
            document_id,
        }
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.field_tag, self.reference_id, self.document_id
        )
    }
}

/// Identifier of a curated person record. Only ever consumed: confirmed
/// and rejected assignments arrive keyed by person, and the engine never
/// allocates new ones.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PersonId(pub u64);

impl fmt::Display for PersonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "person-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_ordering_is_field_then_ref_then_doc() {
        let a = Signature::new(100, 1, 10);
        let b = Signature::new(100, 2, 10);
        let c = Signature::new(700, 1, 9);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn signature_display_is_compact() {
        assert_eq!(Signature::new(700, 3, 11).to_string(), "700:3:11");
    }
}
