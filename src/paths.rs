/// Path helpers shared by the output and resolver layers
use rand::distr::Alphanumeric;
use rand::Rng;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

/// Short random token used to keep concurrent temp and staging paths apart
pub fn random_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect()
}

/// Append `.{suffix}` to the full file name (`a/b.cs` + `x.tmp` = `a/b.cs.x.tmp`)
pub fn append_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Resolve `.` and `..` components without touching the filesystem
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join `path` onto `base` unless it is already absolute, then normalize
pub fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        normalize_lexically(path)
    } else {
        normalize_lexically(&base.join(path))
    }
}

/// Case-insensitive lookup key for a path
pub fn path_key(path: &Path) -> String {
    normalize_lexically(path).to_string_lossy().to_lowercase()
}

/// Delete a file, treating "already gone" as success
pub fn remove_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_suffix_keeps_extension() {
        assert_eq!(
            append_suffix(Path::new("/p/Model.cs"), "ab12.rewrite.tmp"),
            PathBuf::from("/p/Model.cs.ab12.rewrite.tmp")
        );
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(
            normalize_lexically(Path::new("/p/scripts/../lib/./a.cs")),
            PathBuf::from("/p/lib/a.cs")
        );
        assert_eq!(
            absolutize(Path::new("out/x.txt"), Path::new("/p")),
            PathBuf::from("/p/out/x.txt")
        );
    }

    #[test]
    fn test_random_tokens_differ() {
        let a = random_token();
        let b = random_token();
        assert_eq!(a.len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn test_path_key_is_case_insensitive() {
        assert_eq!(path_key(Path::new("/P/A.CS")), path_key(Path::new("/p/./a.cs")));
    }
}
