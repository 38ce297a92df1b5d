//! Validation of client-supplied names.
//!
//! Namespaces, pod names, container names and container ids become path
//! components of bundle directories and youki state roots, so each must be a
//! single plain component. Names additionally exclude [`ID_SEPARATOR`], which
//! keeps `<pod>_<container>` ids unique within a namespace.

use crate::error::{Error, Result};

/// Joins pod and container name into a container id.
pub const ID_SEPARATOR: char = '_';

/// Longest accepted name or id, leaving room for bundle file names.
const MAX_LEN: usize = 200;

fn is_component(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= MAX_LEN
        && !value.starts_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ID_SEPARATOR))
}

/// Namespace, pod or container name: letters, digits, `-` and `.`, not
/// starting with `.`.
pub fn is_valid_name(value: &str) -> bool {
    is_component(value) && !value.contains(ID_SEPARATOR)
}

/// Container id: like a name, but may contain [`ID_SEPARATOR`].
pub fn is_valid_id(value: &str) -> bool {
    is_component(value)
}

pub fn check_name(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::MissingField(field));
    }
    if !is_valid_name(value) {
        return Err(Error::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}

pub fn check_id(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::MissingField(field));
    }
    if !is_valid_id(value) {
        return Err(Error::InvalidName {
            field,
            value: value.to_string(),
        });
    }
    Ok(())
}
