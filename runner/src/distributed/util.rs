use std::{
    ffi::{OsStr, OsString},
    os::unix::prelude::OsStrExt,
    path::Path,
};
use tracing::{error, trace};

/// prefix `name` with `prefix`
pub fn with_prefix(prefix: &OsStr, name: &OsStr) -> OsString {
    let mut joined = OsString::with_capacity(prefix.len() + name.len());
    joined.push(prefix);
    joined.push(name);

    joined
}

/// remove `prefix` from `name`, `None` if `name` doesn't start with it
pub fn strip_prefix(name: &OsStr, prefix: &OsStr) -> Option<OsString> {
    // We have to jump around types a bit since indexing is messy with OsStr types
    name.as_bytes()
        .strip_prefix(prefix.as_bytes())
        .map(|stripped| OsStr::from_bytes(stripped).to_os_string())
}

/// rename a file, which is atomic as long as both paths live on the same file system
pub fn rename(from: &Path, to: &Path) -> std::io::Result<()> {
    std::fs::rename(from, to).map(|()| trace!(from = ?from, to = ?to, "Renamed file"))
}

/// host name of this node, used to tell ranks apart in logs and rendezvous files
pub fn hostname() -> String {
    match nix::unistd::gethostname() {
        Ok(hostname) => hostname.to_string_lossy().into_owned(),
        Err(error) => {
            error!(error = ?error, "Failed to retrieve hostname: {error}");

            "unknown".to_owned()
        }
    }
}
