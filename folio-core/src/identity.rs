use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::parse_str("3f0d1c8e-5b7a-5e21-9c44-8a1f2b6d7e90").expect("valid namespace UUID")
});

/// Content-derived fingerprint of a document, used as the partition key for persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentIdentity(String);

impl DocumentIdentity {
    pub fn new(fingerprint: impl Into<String>) -> Self {
        Self(fingerprint.into())
    }

    /// Derives an identity from raw document bytes. Same bytes, same identity.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Uuid::new_v5(&DOCUMENT_NAMESPACE, bytes).simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the rendering engine exposes once a document has parsed far enough to be fingerprinted.
pub trait DocumentHandle {
    fn fingerprint(&self) -> DocumentIdentity;
    fn page_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedDocument {
    pub identity: DocumentIdentity,
    pub page_count: usize,
}

/// Resolves a [`LoadedDocument`] once per load and replays it for repeated notifications.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    resolved: Option<LoadedDocument>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resolved document and whether it differs from the previously resolved one.
    pub fn resolve<H>(&mut self, handle: &H) -> (LoadedDocument, bool)
    where
        H: DocumentHandle + ?Sized,
    {
        let identity = handle.fingerprint();
        if let Some(existing) = &self.resolved {
            if existing.identity == identity {
                return (existing.clone(), false);
            }
        }

        let document = LoadedDocument {
            identity,
            page_count: handle.page_count(),
        };
        debug!(identity = %document.identity, pages = document.page_count, "resolved document");
        self.resolved = Some(document.clone());
        (document, true)
    }

    pub fn current(&self) -> Option<&LoadedDocument> {
        self.resolved.as_ref()
    }

    pub fn reset(&mut self) {
        self.resolved = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHandle {
        bytes: Vec<u8>,
        pages: usize,
    }

    impl DocumentHandle for FakeHandle {
        fn fingerprint(&self) -> DocumentIdentity {
            DocumentIdentity::from_bytes(&self.bytes)
        }

        fn page_count(&self) -> usize {
            self.pages
        }
    }

    #[test]
    fn identity_is_stable_for_same_bytes() {
        let first = DocumentIdentity::from_bytes(b"%PDF-1.7 first");
        let second = DocumentIdentity::from_bytes(b"%PDF-1.7 first");
        let other = DocumentIdentity::from_bytes(b"%PDF-1.7 other");

        assert_eq!(first, second);
        assert_ne!(first, other);
    }

    #[test]
    fn resolver_is_idempotent_for_the_same_document() {
        let handle = FakeHandle {
            bytes: b"doc".to_vec(),
            pages: 12,
        };
        let mut resolver = IdentityResolver::new();

        let (first, fresh) = resolver.resolve(&handle);
        assert!(fresh);
        assert_eq!(first.page_count, 12);

        let (again, fresh) = resolver.resolve(&handle);
        assert!(!fresh);
        assert_eq!(first, again);
    }

    #[test]
    fn resolver_reports_a_new_document() {
        let mut resolver = IdentityResolver::new();
        resolver.resolve(&FakeHandle {
            bytes: b"a".to_vec(),
            pages: 1,
        });
        let (doc, fresh) = resolver.resolve(&FakeHandle {
            bytes: b"b".to_vec(),
            pages: 4,
        });

        assert!(fresh);
        assert_eq!(doc.page_count, 4);
        assert_eq!(resolver.current(), Some(&doc));
    }
}
