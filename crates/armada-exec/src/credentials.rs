use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

fn default_ssh_port() -> u16 {
    22
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_file: Option<PathBuf>,
}

/// Address → login credential, persisted with owner-only permissions.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
    entries: BTreeMap<String, Credential>,
}

impl CredentialStore {
    /// Open the store, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let entries = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => BTreeMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| anyhow::anyhow!("malformed credential store {}: {e}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
        };
        Ok(Self { path, entries })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, address: &str) -> Option<&Credential> {
        self.entries.get(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    pub fn set(&mut self, address: impl Into<String>, cred: Credential) -> anyhow::Result<()> {
        self.entries.insert(address.into(), cred);
        self.save()
    }

    pub fn remove(&mut self, address: &str) -> anyhow::Result<bool> {
        let existed = self.entries.remove(address).is_some();
        if existed {
            self.save()?;
        }
        Ok(existed)
    }

    /// Move the credential for `old` to `new` after a device changed address.
    /// Returns false (and writes nothing) when `old` has no entry.
    pub fn rekey(&mut self, old: &str, new: &str) -> anyhow::Result<bool> {
        let Some(cred) = self.entries.remove(old) else {
            return Ok(false);
        };
        self.entries.insert(new.to_string(), cred);
        self.save()?;
        Ok(true)
    }

    fn save(&self) -> anyhow::Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.entries)?;
        write_private(&self.path, &bytes)
    }
}

/// Write via a temp file created with mode 0600, then rename into place.
fn write_private(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("tmp");

    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(0o600);
    }
    let mut f = opts.open(&tmp)?;
    f.write_all(bytes)?;
    f.sync_all()?;
    drop(f);

    fs::rename(&tmp, path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
