use std::path::PathBuf;
use roaring::RoaringTreemap;
use crate::core::error::{Error, Result};
use crate::core::types::InternalId;
use crate::query::ast::Operation;
use crate::storage::kv_store::KVStore;

/// Term → document-id-list store for one string field.
///
/// Backed by a plain KVStore keyed by term; the value is the ASCII
/// comma-separated list of internal ids. Exact matches are one lookup;
/// partial matches walk every live term, which is linear in the distinct
/// term count (accepted; a sorted term index is future work).
pub struct InvertedIndex {
    store: KVStore,
}

impl InvertedIndex {
    pub fn open(root: impl Into<PathBuf>, bucket_count: u32) -> Result<Self> {
        Ok(InvertedIndex {
            store: KVStore::open_with_buckets(root.into(), bucket_count)?,
        })
    }

    fn parse_ids(term: &str, raw: &str) -> Result<Vec<InternalId>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        raw.split(',')
            .map(|token| {
                token.parse::<InternalId>().map_err(|_| {
                    Error::corruption(format!(
                        "posting list for term '{}' holds invalid id '{}'",
                        term, token
                    ))
                })
            })
            .collect()
    }

    /// Append `id` to the term's posting list (or start one).
    pub fn add(&self, term: &str, id: InternalId) -> Result<()> {
        match self.store.get_string(term)? {
            Some(existing) => {
                self.store
                    .put_string(term, &format!("{},{}", existing, id), false)?;
            }
            None => {
                self.store.put_string(term, &id.to_string(), false)?;
            }
        }
        Ok(())
    }

    pub fn contains(&self, term: &str, id: InternalId) -> Result<bool> {
        Ok(self.ids(term)?.contains(&id))
    }

    /// Rewrite the posting list without `id`; drops the term entirely when
    /// the list empties.
    pub fn remove(&self, term: &str, id: InternalId) -> Result<()> {
        let ids = self.ids(term)?;
        let kept: Vec<String> = ids
            .into_iter()
            .filter(|existing| *existing != id)
            .map(|existing| existing.to_string())
            .collect();
        if kept.is_empty() {
            self.store.remove(term)?;
        } else {
            self.store.put_string(term, &kept.join(","), false)?;
        }
        Ok(())
    }

    pub fn ids(&self, term: &str) -> Result<Vec<InternalId>> {
        match self.store.get_string(term)? {
            Some(raw) => Self::parse_ids(term, &raw),
            None => Ok(Vec::new()),
        }
    }

    /// All live terms, via the key-value store's offset stream.
    pub fn terms(&self) -> Result<Vec<String>> {
        let mut terms = Vec::new();
        for offset in self.store.value_offsets()? {
            let (term, _) = self.store.entry_at(offset)?;
            terms.push(term);
        }
        Ok(terms)
    }

    /// Ids matching a string predicate. Equals is a single lookup; the
    /// partial operations union the posting lists of every matching term.
    pub fn matching_ids(&self, operation: Operation, value: &str) -> Result<Vec<InternalId>> {
        if operation == Operation::StringEquals {
            return self.ids(value);
        }
        let predicate = |term: &str| match operation {
            Operation::StringStartsWith => term.starts_with(value),
            Operation::StringEndsWith => term.ends_with(value),
            Operation::StringContains => term.contains(value),
            _ => false,
        };

        let mut merged = RoaringTreemap::new();
        for term in self.terms()? {
            if predicate(&term) {
                for id in self.ids(&term)? {
                    merged.insert(id);
                }
            }
        }
        Ok(merged.iter().collect())
    }

    pub fn commit(&self) -> Result<()> {
        self.store.commit()
    }

    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }
}
