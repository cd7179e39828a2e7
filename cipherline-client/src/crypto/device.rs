use std::fs;
use std::io::Write;
use std::path::Path;

use keyring::Entry;
use rand::RngCore;
use tracing::{info, warn};

use crate::error::StorageError;

const KEYRING_SERVICE: &str = "cipherline";
const KEYRING_DEVICE_ACCOUNT: &str = "device-secret";
const DEVICE_SECRET_FILE: &str = "device.secret";

/// Load the device secret used to seal persisted keys, creating it on first run.
///
/// The OS keyring (Windows Credential Manager, macOS Keychain, Linux kernel
/// keyring) is preferred. When it is unavailable, or does not hand back what
/// was just written, the secret falls back to an owner-only file in `data_dir`.
pub fn load_or_create_device_secret(data_dir: &Path) -> Result<[u8; 32], StorageError> {
    match load_or_create_in_keyring() {
        Ok(secret) => Ok(secret),
        Err(e) => {
            warn!(error = %e, "keyring unavailable, using device secret file");
            load_or_create_in_file(&data_dir.join(DEVICE_SECRET_FILE))
        }
    }
}

fn decode_secret(key_hex: &str) -> Result<[u8; 32], StorageError> {
    let bytes = hex::decode(key_hex.trim())
        .map_err(|e| StorageError::Malformed(format!("device secret: {}", e)))?;
    bytes
        .try_into()
        .map_err(|_| StorageError::Malformed("device secret length".to_string()))
}

fn generate_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

fn load_or_create_in_keyring() -> Result<[u8; 32], StorageError> {
    let entry = Entry::new(KEYRING_SERVICE, KEYRING_DEVICE_ACCOUNT)?;

    match entry.get_password() {
        Ok(key_hex) => decode_secret(&key_hex),
        Err(keyring::Error::NoEntry) => {
            let secret = generate_secret();
            entry.set_password(&hex::encode(secret))?;

            // Some backends accept writes without persisting them
            let stored = decode_secret(&entry.get_password()?)?;
            if stored != secret {
                return Err(StorageError::Malformed(
                    "keyring did not retain device secret".to_string(),
                ));
            }
            info!("created device secret in OS keyring");
            Ok(secret)
        }
        Err(e) => Err(e.into()),
    }
}

/// An unreadable secret file is replaced; keys sealed under the old secret
/// then fail to unseal and the session restore discards them.
fn load_or_create_in_file(path: &Path) -> Result<[u8; 32], StorageError> {
    if path.exists() {
        let decoded = fs::read(path)
            .map_err(StorageError::from)
            .and_then(|raw| decode_secret(&String::from_utf8_lossy(&raw)));
        match decoded {
            Ok(secret) => return Ok(secret),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "replacing unreadable device secret file");
                fs::remove_file(path)?;
            }
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let secret = generate_secret();
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(hex::encode(secret).as_bytes())?;
    file.sync_all()?;

    info!(path = %path.display(), "created device secret file");
    Ok(secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_secret_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEVICE_SECRET_FILE);

        let first = load_or_create_in_file(&path).unwrap();
        let second = load_or_create_in_file(&path).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_garbage_file_secret_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEVICE_SECRET_FILE);
        fs::write(&path, "zz").unwrap();

        let recovered = load_or_create_in_file(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), hex::encode(recovered));
        assert_eq!(load_or_create_in_file(&path).unwrap(), recovered);
    }

    #[cfg(unix)]
    #[test]
    fn test_replaced_file_secret_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEVICE_SECRET_FILE);
        fs::write(&path, [0xffu8, 0xfe, 0x00]).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();

        load_or_create_in_file(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_file_secret_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEVICE_SECRET_FILE);
        load_or_create_in_file(&path).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
