//! Change lists: the modifications that turn an entry's baseline into its current state.

use crate::entry::Entry;
use crate::session::DirectoryModification;
use crate::Result;
use ipa_core::Error;

impl Entry {
    /// Diffs the raw view against the baseline taken by [`Entry::reset_modlist`].
    ///
    /// Value changes are computed by list membership so their order is preserved. A new value
    /// for a single-valued attribute is sent as a replace. Changes to `attributetypes` are
    /// ordered before everything else so schema updates add types before the classes that use
    /// them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OnlyOneValueAllowed`] when a single-valued attribute gains more than
    /// one value, or an encoding error for pending typed values.
    pub fn generate_modlist(&mut self) -> Result<Vec<DirectoryModification>> {
        let current = self.raw().to_map()?;
        let original = self.original().clone();

        let mut names: Vec<&String> = current.keys().chain(original.keys()).collect();
        names.sort();
        names.dedup();

        let mut modlist = Vec::new();
        for name in names {
            let new = current.get(name).map(Vec::as_slice).unwrap_or_default();
            let old = original.get(name).map(Vec::as_slice).unwrap_or_default();

            if !old.is_empty() && new.is_empty() {
                modlist.push(DirectoryModification::Delete {
                    attribute: name.clone(),
                    values: None,
                });
                continue;
            }
            if old.is_empty() && !new.is_empty() {
                modlist.push(DirectoryModification::Replace {
                    attribute: name.clone(),
                    values: new.to_vec(),
                });
                continue;
            }

            let adds: Vec<Vec<u8>> = new.iter().filter(|v| !old.contains(v)).cloned().collect();
            let dels: Vec<Vec<u8>> = old.iter().filter(|v| !new.contains(v)).cloned().collect();

            if !adds.is_empty() && self.codec().single_value(name) == Some(true) {
                if adds.len() > 1 {
                    return Err(Error::OnlyOneValueAllowed {
                        attr: name.clone(),
                    });
                }
                modlist.push(DirectoryModification::Replace {
                    attribute: name.clone(),
                    values: adds,
                });
                continue;
            }

            if !adds.is_empty() {
                modlist.push(DirectoryModification::Add {
                    attribute: name.clone(),
                    values: adds,
                });
            }
            if !dels.is_empty() {
                modlist.push(DirectoryModification::Delete {
                    attribute: name.clone(),
                    values: Some(dels),
                });
            }
        }

        modlist.sort_by_key(|m| !m.attribute().eq_ignore_ascii_case("attributetypes"));
        Ok(modlist)
    }
}
