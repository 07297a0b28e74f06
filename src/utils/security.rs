use std::fmt;
use std::path::{Component, Path};

use unicode_normalization::UnicodeNormalization;

//===============
// Name Handling
//===============
#[derive(Debug, PartialEq, Eq)]
pub enum NameValidationError {
    ContainsParentDir,
    AbsolutePath,
    ContainsSeparator,
    NullByte,
    Empty,
}

impl fmt::Display for NameValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameValidationError::ContainsParentDir => {
                write!(f, "Name contains parent directory (..)")
            }
            NameValidationError::AbsolutePath => write!(f, "Name is an absolute path"),
            NameValidationError::ContainsSeparator => write!(f, "Name contains a path separator"),
            NameValidationError::NullByte => write!(f, "Name contains null byte"),
            NameValidationError::Empty => write!(f, "Name is empty"),
        }
    }
}

impl std::error::Error for NameValidationError {}

// Multipart file names travel as a single component.
// Decomposed input is composed to NFC before validation.
pub fn upload_file_name(name: &str) -> Result<String, NameValidationError> {
    let name: String = name.nfc().collect();

    if name.trim().is_empty() {
        return Err(NameValidationError::Empty);
    }

    // rust uses C-style APIs so \0 can end str early
    if name.contains('\0') {
        return Err(NameValidationError::NullByte);
    }

    let mut components = Path::new(&name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        (Some(Component::ParentDir), _) => return Err(NameValidationError::ContainsParentDir),
        (Some(Component::RootDir) | Some(Component::Prefix(_)), _) => {
            return Err(NameValidationError::AbsolutePath)
        }
        _ => return Err(NameValidationError::ContainsSeparator),
    }

    Ok(name)
}

// Final component of a local path, for uploads without an explicit name.
pub fn display_name(path: &Path) -> Option<String> {
    path.file_name().map(|n| n.to_string_lossy().into_owned())
}
