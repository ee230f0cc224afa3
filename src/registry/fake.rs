use std::collections::{HashMap, HashSet};

use super::DigestLookup;
use crate::error::DigestError;

/// In-memory registry: known references resolve, everything else is
/// `NotFound` unless listed as unavailable.
#[derive(Debug, Clone, Default)]
pub struct FakeRegistry {
    pub digests: HashMap<String, String>,
    pub unavailable: HashSet<String>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_digest(mut self, reference: &str, digest: &str) -> Self {
        self.digests
            .insert(reference.to_string(), digest.to_string());
        self
    }

    pub fn with_unavailable(mut self, reference: &str) -> Self {
        self.unavailable.insert(reference.to_string());
        self
    }
}

impl DigestLookup for FakeRegistry {
    fn digest(&self, reference: &str) -> Result<String, DigestError> {
        if self.unavailable.contains(reference) {
            return Err(DigestError::Unavailable {
                reference: reference.to_string(),
                reason: "registry unreachable".to_string(),
            });
        }
        self.digests
            .get(reference)
            .cloned()
            .ok_or_else(|| DigestError::NotFound {
                reference: reference.to_string(),
            })
    }
}
