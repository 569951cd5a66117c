//! File name safety for the shared send/receive directories.

use std::path::{Component, Path};

use crate::error::TransferError;

/// Accepts only a bare file name. Anything that would resolve outside the
/// designated directory (separators, `..`, absolute paths) is refused.
pub fn safe_file_name(name: &str) -> Result<&str, TransferError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        _ => Err(TransferError::UnsafeFileName(name.to_string())),
    }
}
