//! Per-host bearer token cache on local storage.
//!
//! Tokens are stored one file per host under the platform cache directory
//! (`~/.cache/bmckit` on Linux). File names are `token_<hex(host)>`, which
//! maps every host to a distinct name; the bare `token` file is the legacy
//! default entry that lookups fall back to when no host-specific entry
//! exists.

use std::path::{Path, PathBuf};

use crate::AuthError;

const LEGACY_ENTRY: &str = "token";
const ENTRY_PREFIX: &str = "token_";

/// File-backed token cache, one entry per host.
///
/// Writes are atomic (temp file + rename) so concurrent re-authentication
/// against the same host never leaves a partially written token behind.
pub struct TokenCache {
    dir: PathBuf,
}

impl TokenCache {
    /// Opens the cache in the platform cache directory.
    ///
    /// If the directory cannot be determined or created, falls back to the
    /// current working directory rather than failing; a missing cache only
    /// costs a re-authentication.
    pub fn new() -> Self {
        let dir = match cache_dir() {
            Some(base) => {
                let dir = base.join("bmckit");
                match std::fs::create_dir_all(&dir) {
                    Ok(()) => dir,
                    Err(e) => {
                        tracing::warn!(error = %e, dir = %dir.display(),
                            "cannot create cache directory, using working directory");
                        PathBuf::from(".")
                    }
                }
            }
            None => PathBuf::from("."),
        };
        Self { dir }
    }

    /// Opens the cache in an explicit directory.
    ///
    /// The directory is created if it does not exist; creation failure falls
    /// back to the working directory like [`new`](Self::new).
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(error = %e, dir = %dir.display(),
                "cannot create cache directory, using working directory");
            return Self {
                dir: PathBuf::from("."),
            };
        }
        Self { dir }
    }

    fn entry_path(&self, host: &str) -> PathBuf {
        if host.is_empty() {
            self.dir.join(LEGACY_ENTRY)
        } else {
            self.dir
                .join(format!("{ENTRY_PREFIX}{}", hex::encode(host)))
        }
    }

    /// Returns the cached token for `host`.
    ///
    /// A miss on a host-specific entry falls back to the legacy default
    /// entry (caches written by older tools held a single token).
    pub fn get(&self, host: &str) -> Result<String, AuthError> {
        match read_token(&self.entry_path(host)) {
            Ok(token) => Ok(token),
            Err(AuthError::TokenNotFound) if !host.is_empty() => {
                read_token(&self.entry_path(""))
            }
            Err(e) => Err(e),
        }
    }

    /// Stores `token` for `host`, replacing any previous entry.
    ///
    /// The token is written to a uniquely named temp file and renamed into
    /// place, so concurrent re-authentications against the same host never
    /// observe a partial token or clobber each other's writes in flight.
    pub fn put(&self, host: &str, token: &str) -> Result<(), AuthError> {
        use std::io::Write;

        let path = self.entry_path(host);
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(token.as_bytes())?;
        restrict_permissions(tmp.path())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        tracing::debug!(host = %host, "cached token");
        Ok(())
    }

    /// Deletes the entry for `host`. An absent entry is not an error.
    pub fn delete(&self, host: &str) -> Result<(), AuthError> {
        match std::fs::remove_file(self.entry_path(host)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Lists the hosts with cached tokens.
    ///
    /// The legacy default entry is reported as `"default"`. Entries whose
    /// names cannot be decoded are listed under their raw file name.
    pub fn hosts(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };

        let mut hosts = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == LEGACY_ENTRY {
                hosts.push("default".to_string());
            } else if let Some(encoded) = name.strip_prefix(ENTRY_PREFIX) {
                match hex::decode(encoded)
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
                {
                    Some(host) => hosts.push(host),
                    None => hosts.push(name.into_owned()),
                }
            }
        }
        hosts.sort();
        hosts
    }

    /// Deletes every cached token, including the legacy entry.
    pub fn delete_all(&self) -> Result<(), AuthError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name == LEGACY_ENTRY || name.starts_with(ENTRY_PREFIX) {
                std::fs::remove_file(entry.path())?;
            }
        }
        Ok(())
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}

fn read_token(path: &Path) -> Result<String, AuthError> {
    match std::fs::read_to_string(path) {
        Ok(token) => Ok(token),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(AuthError::TokenNotFound),
        Err(e) => Err(e.into()),
    }
}

/// Restricts a token file to owner read/write.
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Returns the platform-specific cache directory.
fn cache_dir() -> Option<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        std::env::var("XDG_CACHE_HOME")
            .ok()
            .map(PathBuf::from)
            .or_else(|| {
                std::env::var("HOME")
                    .ok()
                    .map(|h| PathBuf::from(h).join(".cache"))
            })
    }

    #[cfg(target_os = "windows")]
    {
        std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library").join("Caches"))
    }
}
