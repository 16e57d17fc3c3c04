//! Binary member resolution inside release archives
//!
//! Maps requested binary names to the archive members that carry them.
//! A single-file archive matches whatever its one member is called; in
//! larger archives basename matches are tie-broken by the execute bit.

use tracing::debug;

use crate::archive::Archive;
use crate::errors::{ResolveError, Result};

/// Resolve the archive members that are the requested binaries
///
/// Returns one member per binary name, in the same order.
pub fn resolve(archive: &Archive, binary_names: &[String]) -> Result<Vec<String>> {
    let members = archive.file_members()?;

    if members.len() == 1 {
        if binary_names.len() > 1 {
            return Err(ResolveError::SingleMemberArchive {
                member: members[0].clone(),
            }
            .into());
        }
        // a lone member is the binary no matter how it is named
        return Ok(members);
    }

    let mut resolved = Vec::new();
    for binary_name in binary_names {
        let mut candidates = archive.names_by_filename(binary_name)?;

        if candidates.len() > 1 {
            debug!(
                "tie-breaking {} candidates for {} by execute bit",
                candidates.len(),
                binary_name
            );
            candidates.retain(|member| {
                archive
                    .member_mode(member)
                    .map(|mode| mode & 0o111 != 0)
                    .unwrap_or(false)
            });
            if candidates.len() != 1 {
                return Err(ResolveError::BinaryAmbiguous { candidates }.into());
            }
        }

        if candidates.is_empty() {
            return Err(ResolveError::BinaryNotFound {
                name: binary_name.clone(),
            }
            .into());
        }

        resolved.push(candidates.remove(0));
    }

    Ok(resolved)
}
