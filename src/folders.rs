//! Restricting which local folders documents may be read from.
//!
//! Whoever drives this tool may not be the person who owns the machine, so we
//! let the owner name the folders we're allowed to upload from. With no
//! folders configured, everything is allowed.

use std::{env, path};

use crate::prelude::*;

/// The set of folders we may read documents from.
#[derive(Clone, Debug, Default)]
pub struct AllowedFolders {
    folders: Vec<PathBuf>,
}

impl AllowedFolders {
    /// Build from user-supplied folder names, which may start with `~`.
    pub fn new<I, S>(folders: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let folders = folders
            .into_iter()
            .map(|folder| normalize(&expand_home(folder.as_ref())))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { folders })
    }

    /// Allow everything.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// The normalized, absolute folder paths.
    pub fn folders(&self) -> &[PathBuf] {
        &self.folders
    }

    /// Is `path` inside one of our folders?
    pub fn permits(&self, path: &Path) -> Result<bool> {
        if self.folders.is_empty() {
            return Ok(true);
        }
        let path = normalize(path)?;
        Ok(self.folders.iter().any(|folder| path.starts_with(folder)))
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_home(folder: &str) -> PathBuf {
    let Some(rest) = folder.strip_prefix('~') else {
        return PathBuf::from(folder);
    };
    match env::var_os("HOME").or_else(|| env::var_os("USERPROFILE")) {
        Some(home) => {
            let rest = rest.trim_start_matches(['/', '\\']);
            PathBuf::from(home).join(rest)
        }
        None => PathBuf::from(folder),
    }
}

/// Make `path` absolute, resolving symlinks when it exists, so that
/// `starts_with` comparisons can't be fooled by `..` or links.
fn normalize(path: &Path) -> Result<PathBuf> {
    match path.canonicalize() {
        Ok(path) => Ok(path),
        Err(_) => path::absolute(path)
            .with_context(|| format!("Failed to resolve path {}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrestricted_permits_everything() {
        let folders = AllowedFolders::unrestricted();
        assert!(folders.permits(Path::new("/etc/passwd")).unwrap());
    }

    #[test]
    fn test_permits_only_inside_folders() {
        let allowed = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let inside = allowed.path().join("invoice.pdf");
        let outside = other.path().join("invoice.pdf");
        std::fs::write(&inside, b"pdf").unwrap();
        std::fs::write(&outside, b"pdf").unwrap();

        let folders =
            AllowedFolders::new([allowed.path().to_string_lossy().into_owned()]).unwrap();
        assert!(folders.permits(&inside).unwrap());
        assert!(!folders.permits(&outside).unwrap());

        // `..` must not escape the folder.
        let sneaky = allowed
            .path()
            .join("..")
            .join(other.path().file_name().unwrap())
            .join("invoice.pdf");
        assert!(!folders.permits(&sneaky).unwrap());
    }

    #[test]
    fn test_expand_home() {
        let Some(home) = env::var_os("HOME") else {
            return;
        };
        assert_eq!(
            expand_home("~/Documents"),
            PathBuf::from(home).join("Documents")
        );
        assert_eq!(expand_home("/srv/docs"), PathBuf::from("/srv/docs"));
    }
}
