//! Contact directory: raw backend entries folded into one record per canonical key.

use std::collections::HashMap;

use crate::identity::{CanonicalIdentity, Canonicalizer};
use crate::state::{CanonicalContact, Platform};

/// One directory row as reported by the backend, already shape-checked.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawContactEntry {
    pub platform: Platform,
    pub identifier: String,
    /// Other encodings the backend knows for the same person (e.g. the phone
    /// JID behind a linked ID).
    pub alternate_identifiers: Vec<String>,
    pub display_name: Option<String>,
    pub profile_picture: Option<String>,
    pub message_count: u64,
    pub last_message_time: i64,
}

impl RawContactEntry {
    fn identifiers(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.identifier.as_str())
            .chain(self.alternate_identifiers.iter().map(String::as_str))
    }
}

type DirKey = (Platform, String);

/// Fold `incoming` into `existing` for an already-resolved canonical key.
pub fn merge(
    canon: &Canonicalizer,
    key: &CanonicalIdentity,
    existing: Option<CanonicalContact>,
    incoming: &RawContactEntry,
) -> CanonicalContact {
    let platform = incoming.platform;
    let candidate = incoming
        .identifiers()
        .find(|raw| canon.is_dialable(platform, raw))
        .unwrap_or(incoming.identifier.as_str())
        .trim()
        .to_string();

    let Some(existing) = existing else {
        return CanonicalContact {
            platform,
            canonical_key: key.key.clone(),
            display_identifier: candidate,
            display_name: non_empty(incoming.display_name.clone()),
            profile_picture: non_empty(incoming.profile_picture.clone()),
            message_count: incoming.message_count,
            last_message_time: incoming.last_message_time,
            is_opaque: key.is_opaque,
        };
    };

    let keep_existing_display = canon.is_dialable(platform, &existing.display_identifier)
        || !canon.is_dialable(platform, &candidate);

    CanonicalContact {
        platform,
        canonical_key: key.key.clone(),
        display_identifier: if keep_existing_display {
            existing.display_identifier
        } else {
            candidate
        },
        display_name: existing
            .display_name
            .or_else(|| non_empty(incoming.display_name.clone())),
        profile_picture: existing
            .profile_picture
            .or_else(|| non_empty(incoming.profile_picture.clone())),
        message_count: existing.message_count.max(incoming.message_count),
        last_message_time: existing.last_message_time.max(incoming.last_message_time),
        is_opaque: key.is_opaque,
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

#[derive(Debug, Default)]
pub struct ContactDirectory {
    canon: Canonicalizer,
    contacts: Vec<CanonicalContact>,
    index: HashMap<DirKey, usize>,
    // opaque key -> dialable key, learned from entries that carry both.
    aliases: HashMap<DirKey, CanonicalIdentity>,
}

impl ContactDirectory {
    pub fn new(canon: Canonicalizer) -> Self {
        Self {
            canon,
            ..Default::default()
        }
    }

    pub fn canonicalizer(&self) -> &Canonicalizer {
        &self.canon
    }

    /// Canonical identity for a raw identifier, following learned aliases.
    pub fn resolve(&self, platform: Platform, raw: &str) -> CanonicalIdentity {
        let id = self.canon.canonicalize_for(platform, raw);
        self.follow_alias(platform, id)
    }

    fn follow_alias(&self, platform: Platform, id: CanonicalIdentity) -> CanonicalIdentity {
        if !id.is_opaque {
            return id;
        }
        self.aliases
            .get(&(platform, id.key.clone()))
            .cloned()
            .unwrap_or(id)
    }

    /// Resolve an entry's key and remember any opaque → dialable links it reveals.
    fn learn(&mut self, entry: &RawContactEntry) -> Option<CanonicalIdentity> {
        let ids: Vec<CanonicalIdentity> = entry
            .identifiers()
            .map(|raw| self.canon.canonicalize_for(entry.platform, raw))
            .filter(|id| !id.key.is_empty())
            .collect();
        let chosen = ids
            .iter()
            .find(|id| !id.is_opaque)
            .cloned()
            .or_else(|| ids.first().cloned())?;

        if !chosen.is_opaque {
            for id in ids.iter().filter(|id| id.is_opaque) {
                let alias = (entry.platform, id.key.clone());
                if let Some(prev) = self.aliases.get(&alias) {
                    if prev.key != chosen.key {
                        tracing::warn!(
                            opaque = %id.key,
                            previous = %prev.key,
                            next = %chosen.key,
                            "directory: opaque id relinked"
                        );
                    }
                }
                self.aliases.insert(alias, chosen.clone());
            }
        }
        Some(self.follow_alias(entry.platform, chosen))
    }

    /// Replace the directory with the fold of `entries`, in order.
    pub fn rebuild(&mut self, entries: &[RawContactEntry]) {
        let mut resolved = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.learn(entry) {
                Some(id) => resolved.push((entry, id)),
                None => tracing::debug!(raw = %entry.identifier, "directory: skipping empty identifier"),
            }
        }

        let mut contacts: Vec<CanonicalContact> = Vec::with_capacity(resolved.len());
        let mut index: HashMap<DirKey, usize> = HashMap::with_capacity(resolved.len());
        for (entry, id) in resolved {
            // Aliases learned later in this pass still apply.
            let id = self.follow_alias(entry.platform, id);
            let k = (entry.platform, id.key.clone());
            match index.get(&k) {
                Some(&i) => {
                    let existing = contacts[i].clone();
                    contacts[i] = merge(&self.canon, &id, Some(existing), entry);
                }
                None => {
                    index.insert(k, contacts.len());
                    contacts.push(merge(&self.canon, &id, None, entry));
                }
            }
        }

        tracing::debug!(
            entries = entries.len(),
            contacts = contacts.len(),
            "directory: rebuilt"
        );
        self.contacts = contacts;
        self.index = index;
    }

    pub fn get(&self, platform: Platform, key: &str) -> Option<&CanonicalContact> {
        self.index
            .get(&(platform, key.to_string()))
            .map(|&i| &self.contacts[i])
    }

    /// Every record, hidden noise included, in fold order.
    pub fn all(&self) -> &[CanonicalContact] {
        &self.contacts
    }

    /// Contacts shown to the operator: noise removed, most recent first.
    pub fn visible(&self) -> Vec<CanonicalContact> {
        let mut out: Vec<CanonicalContact> = self
            .contacts
            .iter()
            .filter(|c| !self.canon.is_noise(&c.canonical_key, c.is_opaque))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        out
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}
