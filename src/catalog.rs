//! The catalog boundary: everything the engine consumes but does not own.
//!
//! The real bibliographic store (documents, name strings, curation data)
//! lives outside this crate. [`Catalog`] is the read-only view the engine
//! needs; [`InMemoryCatalog`] backs the tests and the demo binary.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signature::{PersonId, Signature};

/// Read-only view of the bibliographic catalog.
///
/// Implementations must be cheap to query: comparator code calls these
/// methods inside the pairwise loop. All methods are total — unknown ids
/// return `None` or an empty collection, never panic.
pub trait Catalog: Sync {
    /// Every signature under consideration, in no particular order.
    fn signatures(&self) -> Vec<Signature>;

    /// The raw name string attached to a signature.
    fn name_of(&self, signature: &Signature) -> Option<String>;

    /// Last modification instant of a document, if known.
    fn document_modified(&self, document_id: u64) -> Option<DateTime<Utc>>;

    /// Name strings of all authors appearing on a document.
    fn author_names(&self, document_id: u64) -> Vec<String>;

    /// Keyword terms attached to a document.
    fn keywords(&self, document_id: u64) -> Vec<String>;

    /// Collaboration tag of a document, when it carries one.
    fn collaboration(&self, document_id: u64) -> Option<String>;

    /// Externally claimed author identifier attached to a signature
    /// (e.g. an ORCID), when one exists.
    fn external_id(&self, signature: &Signature) -> Option<String>;

    /// Manually confirmed `(signature, person)` assignments for one
    /// last-name group. Read-only input; never overwritten.
    fn confirmed(&self, group: &str) -> Vec<(Signature, PersonId)>;

    /// Manually rejected `(signature, person)` assignments for one
    /// last-name group: a curator asserted the signature is NOT that
    /// person.
    fn rejected(&self, group: &str) -> Vec<(Signature, PersonId)>;
}

/// Per-document record of an [`InMemoryCatalog`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub collaboration: Option<String>,
}

/// Per-signature record of an [`InMemoryCatalog`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub signature: Signature,
    pub name: String,
    #[serde(default)]
    pub external_id: Option<String>,
}

/// A complete catalog held in memory. Deserializable from JSON so the
/// demo binary can run against a fixture file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InMemoryCatalog {
    #[serde(default)]
    pub documents: HashMap<u64, DocumentRecord>,
    #[serde(default)]
    pub records: Vec<SignatureRecord>,
    #[serde(default)]
    pub confirmed: Vec<(Signature, PersonId)>,
    #[serde(default)]
    pub rejected: Vec<(Signature, PersonId)>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document; replaces any previous record under the id.
    pub fn add_document(&mut self, document_id: u64, record: DocumentRecord) -> &mut Self {
        self.documents.insert(document_id, record);
        self
    }

    /// Register a signature with its attached name string.
    pub fn add_signature(
        &mut self,
        signature: Signature,
        name: impl Into<String>,
    ) -> &mut Self {
        self.records.push(SignatureRecord {
            signature,
            name: name.into(),
            external_id: None,
        });
        self
    }

    /// Register a signature carrying an externally claimed id.
    pub fn add_signature_with_id(
        &mut self,
        signature: Signature,
        name: impl Into<String>,
        external_id: impl Into<String>,
    ) -> &mut Self {
        self.records.push(SignatureRecord {
            signature,
            name: name.into(),
            external_id: Some(external_id.into()),
        });
        self
    }

    pub fn confirm(&mut self, signature: Signature, person: PersonId) -> &mut Self {
        self.confirmed.push((signature, person));
        self
    }

    pub fn reject(&mut self, signature: Signature, person: PersonId) -> &mut Self {
        self.rejected.push((signature, person));
        self
    }

    fn record_of(&self, signature: &Signature) -> Option<&SignatureRecord> {
        self.records.iter().find(|r| r.signature == *signature)
    }

    fn group_of(&self, signature: &Signature) -> Option<String> {
        self.record_of(signature)
            .map(|r| crate::names::last_name_group(&r.name))
    }
}

impl Catalog for InMemoryCatalog {
    fn signatures(&self) -> Vec<Signature> {
        self.records.iter().map(|r| r.signature).collect()
    }

    fn name_of(&self, signature: &Signature) -> Option<String> {
        self.record_of(signature).map(|r| r.name.clone())
    }

    fn document_modified(&self, document_id: u64) -> Option<DateTime<Utc>> {
        self.documents.get(&document_id).and_then(|d| d.modified)
    }

    fn author_names(&self, document_id: u64) -> Vec<String> {
        self.documents
            .get(&document_id)
            .map(|d| d.authors.clone())
            .unwrap_or_default()
    }

    fn keywords(&self, document_id: u64) -> Vec<String> {
        self.documents
            .get(&document_id)
            .map(|d| d.keywords.clone())
            .unwrap_or_default()
    }

    fn collaboration(&self, document_id: u64) -> Option<String> {
        self.documents
            .get(&document_id)
            .and_then(|d| d.collaboration.clone())
    }

    fn external_id(&self, signature: &Signature) -> Option<String> {
        self.record_of(signature).and_then(|r| r.external_id.clone())
    }

    fn confirmed(&self, group: &str) -> Vec<(Signature, PersonId)> {
        self.confirmed
            .iter()
            .filter(|(sig, _)| self.group_of(sig).as_deref() == Some(group))
            .copied()
            .collect()
    }

    fn rejected(&self, group: &str) -> Vec<(Signature, PersonId)> {
        self.rejected
            .iter()
            .filter(|(sig, _)| self.group_of(sig).as_deref() == Some(group))
            .copied()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> InMemoryCatalog {
        let mut cat = InMemoryCatalog::new();
        cat.add_document(
            10,
            DocumentRecord {
                authors: vec!["Ellis, J.".into(), "Smith, A.".into()],
                keywords: vec!["qcd".into()],
                ..Default::default()
            },
        );
        cat.add_signature(Signature::new(100, 1, 10), "Ellis, John");
        cat.add_signature_with_id(Signature::new(700, 2, 10), "Smith, Alice", "0000-0001");
        cat
    }

    #[test]
    fn lookups_resolve_registered_data() {
        let cat = sample();
        let sig = Signature::new(100, 1, 10);
        assert_eq!(cat.name_of(&sig).as_deref(), Some("Ellis, John"));
        assert_eq!(cat.author_names(10).len(), 2);
        assert_eq!(
            cat.external_id(&Signature::new(700, 2, 10)).as_deref(),
            Some("0000-0001")
        );
    }

    #[test]
    fn unknown_ids_return_empty() {
        let cat = sample();
        assert!(cat.name_of(&Signature::new(100, 9, 9)).is_none());
        assert!(cat.keywords(99).is_empty());
        assert!(cat.document_modified(10).is_none());
    }

    #[test]
    fn curation_data_filters_by_group() {
        let mut cat = sample();
        cat.confirm(Signature::new(100, 1, 10), PersonId(7));
        assert_eq!(cat.confirmed("ellis").len(), 1);
        assert!(cat.confirmed("smith").is_empty());
    }
}
