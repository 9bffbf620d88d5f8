//! Library linking for creation bytecode
//!
//! Solidity leaves a 40-character placeholder wherever a library address is
//! needed. When the compiler reports link references the exact byte ranges are
//! patched; otherwise placeholders of the form `__$<tag>$__` are located by the
//! tag derived from the library name.

use super::{Artifact, LinkReferences};
use crate::error::{DeployerError, DeployerResult};

use ethers::types::{Address, Bytes};
use regex::{NoExpand, Regex};
use sha3::{Digest, Keccak256};
use std::collections::BTreeMap;

/// Hex characters of the keccak digest used as a placeholder tag
pub const PLACEHOLDER_TAG_LEN: usize = 34;

/// Placeholder tag for a library.
///
/// Names already wrapped in `$` are used literally, anything else is hashed.
pub fn placeholder_tag(library: &str) -> String {
    if library.len() > 1 && library.starts_with('$') && library.ends_with('$') {
        return library[1..library.len() - 1].to_string();
    }

    let digest = Keccak256::digest(library.as_bytes());
    hex::encode(digest)[..PLACEHOLDER_TAG_LEN].to_string()
}

/// Link `libraries` into a hex bytecode template.
///
/// The result is still hex text; only the patched ranges differ from the template.
pub fn link_bytecode(
    template: &str,
    libraries: &BTreeMap<String, Address>,
    link_references: Option<&LinkReferences>,
) -> DeployerResult<String> {
    if libraries.is_empty() {
        return Ok(template.to_string());
    }

    match link_references {
        Some(references) => link_with_references(template, references, libraries),
        None => {
            let mut bytecode = template.to_string();
            for (library, address) in libraries {
                bytecode = link_placeholder(&bytecode, library, address)?;
            }
            Ok(bytecode)
        }
    }
}

/// Link an artifact's creation code and decode it into bytes
pub fn link_libraries(
    artifact: &Artifact,
    libraries: &BTreeMap<String, Address>,
) -> DeployerResult<Bytes> {
    let linked = link_bytecode(
        &artifact.bytecode,
        libraries,
        artifact.link_references.as_ref(),
    )?;
    decode_bytecode(&linked)
}

/// Decode hex bytecode, rejecting leftover placeholders
pub fn decode_bytecode(bytecode: &str) -> DeployerResult<Bytes> {
    let body = bytecode.strip_prefix("0x").unwrap_or(bytecode);
    if let Some(pos) = body.find("__$") {
        return Err(DeployerError::UnlinkedBytecode(format!(
            "unresolved library placeholder at hex offset {}",
            pos
        )));
    }

    hex::decode(body)
        .map(Bytes::from)
        .map_err(|e| DeployerError::UnlinkedBytecode(e.to_string()))
}

fn address_hex(address: &Address) -> String {
    hex::encode(address.as_bytes())
}

fn link_with_references(
    template: &str,
    references: &LinkReferences,
    libraries: &BTreeMap<String, Address>,
) -> DeployerResult<String> {
    let prefix = if template.starts_with("0x") { 2 } else { 0 };
    let mut bytecode = template.to_string();

    for file_references in references.values() {
        for (library, fixups) in file_references {
            let Some(address) = libraries.get(library) else {
                continue;
            };
            let replacement = address_hex(address);

            for fixup in fixups {
                let begin = prefix + fixup.start * 2;
                let end = prefix + (fixup.start + fixup.length) * 2;
                if bytecode.get(begin..end).is_none() {
                    return Err(DeployerError::LinkReferenceOutOfRange {
                        library: library.clone(),
                        start: fixup.start,
                        length: fixup.length,
                    });
                }
                bytecode.replace_range(begin..end, &replacement);
            }
        }
    }

    Ok(bytecode)
}

fn link_placeholder(bytecode: &str, library: &str, address: &Address) -> DeployerResult<String> {
    let tag = placeholder_tag(library);
    let pattern = Regex::new(&format!(r"_+\${}\$_+", regex::escape(&tag)))
        .map_err(|e| DeployerError::Internal(format!("placeholder pattern: {}", e)))?;

    if !pattern.is_match(bytecode) {
        return Err(DeployerError::Link {
            library: library.to_string(),
            tag,
        });
    }

    let replacement = address_hex(address);
    Ok(pattern
        .replace_all(bytecode, NoExpand(&replacement))
        .into_owned())
}
