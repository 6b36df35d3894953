//! Debug formatting helpers for [`custom_debug_derive`].

use std::fmt;

/// Prints a fixed placeholder instead of the value.
///
/// Use with `#[debug(with = "crate::fmt::redacted")]` on secrets.
pub fn redacted<T>(_value: &T, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("<redacted>")
}

/// Prints only the keys of a list of key/value pairs.
///
/// Use with `#[debug(with = "crate::fmt::field_names")]` on form data that may carry secrets.
#[allow(clippy::ptr_arg)] // signature must match the field type exactly
pub fn field_names(value: &Vec<(String, String)>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_list()
        .entries(value.iter().map(|(name, _)| name))
        .finish()
}
