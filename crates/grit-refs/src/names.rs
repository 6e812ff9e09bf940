use crate::error::{RefError, RefResult};

/// Validate a full ref name.
///
/// Rules follow the reference implementation: no empty components, no `..`,
/// no control characters or spaces, no leading/trailing slash, no trailing
/// `.lock`, none of the bytes `~ ^ : ? * [ \`.
pub fn validate_ref_name(name: &str) -> RefResult<()> {
    let invalid = |_: &str| RefError::InvalidName(name.to_string());

    if name.is_empty() || name.starts_with('/') || name.ends_with('/') {
        return Err(invalid(name));
    }
    if name.contains("..") || name.contains("//") {
        return Err(invalid(name));
    }
    if name.ends_with('.') || name.ends_with(".lock") {
        return Err(invalid(name));
    }
    for ch in name.chars() {
        if ch.is_control() || ch == ' ' {
            return Err(invalid(name));
        }
        if matches!(ch, '~' | '^' | ':' | '?' | '*' | '[' | '\\') {
            return Err(invalid(name));
        }
    }
    for component in name.split('/') {
        if component.is_empty() || component.starts_with('.') {
            return Err(invalid(name));
        }
    }
    Ok(())
}
