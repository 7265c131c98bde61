use std::collections::HashMap;
use std::sync::RwLock;

use base64::engine::general_purpose::URL_SAFE_NO_PAD as Base64Engine;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::HephaestusError;

use super::Role;

/// A single service-account trust record, as loaded from the signed keystore file.
#[derive(Debug, Clone)]
pub struct ServiceAccountKey {
    pub key_id: String,
    pub principal: String,
    pub roles: Vec<Role>,
    pub secret: Vec<u8>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl ServiceAccountKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|exp| now >= exp).unwrap_or(false)
    }
}

#[derive(Deserialize)]
struct KeystoreFile {
    keys: Vec<KeyRecord>,
}

#[derive(Deserialize)]
struct KeyRecord {
    key_id: String,
    principal: String,
    roles: Vec<String>,
    secret: String,
    expires_at: Option<DateTime<Utc>>,
}

/// Loads and holds the service-account trust root, reloadable at runtime.
pub struct Keystore {
    path: String,
    keys: RwLock<HashMap<String, ServiceAccountKey>>,
}

impl Keystore {
    pub fn load(path: &str) -> Result<Self, HephaestusError> {
        let keys = read_keys(path)?;
        Ok(Self {
            path: path.to_string(),
            keys: RwLock::new(keys),
        })
    }

    pub fn reload(&self) -> Result<(), HephaestusError> {
        let fresh = read_keys(&self.path)?;
        let mut guard = self
            .keys
            .write()
            .map_err(|_| HephaestusError::Internal("keystore lock poisoned".into()))?;
        *guard = fresh;
        Ok(())
    }

    pub fn get(&self, key_id: &str) -> Option<ServiceAccountKey> {
        self.keys.read().ok()?.get(key_id).cloned()
    }
}

fn read_keys(path: &str) -> Result<HashMap<String, ServiceAccountKey>, HephaestusError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| HephaestusError::Internal(format!("failed to read keystore {path}: {e}")))?;
    let parsed: KeystoreFile = serde_json::from_str(&raw)
        .map_err(|e| HephaestusError::Internal(format!("malformed keystore {path}: {e}")))?;

    let mut keys = HashMap::with_capacity(parsed.keys.len());
    for record in parsed.keys {
        let roles = record
            .roles
            .iter()
            .map(|r| r.parse())
            .collect::<Result<Vec<Role>, _>>()?;
        if roles.is_empty() {
            return Err(HephaestusError::Internal(format!(
                "key '{}' has no granted roles",
                record.key_id
            )));
        }
        let secret = Base64Engine.decode(record.secret.as_bytes()).map_err(|e| {
            HephaestusError::Internal(format!("key '{}' has malformed secret: {e}", record.key_id))
        })?;
        keys.insert(
            record.key_id.clone(),
            ServiceAccountKey {
                key_id: record.key_id,
                principal: record.principal,
                roles,
                secret,
                expires_at: record.expires_at,
            },
        );
    }
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_keystore(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_valid_keystore() {
        let secret = Base64Engine.encode(b"0123456789abcdef0123456789abcdef");
        let file = write_keystore(&format!(
            r#"{{"keys":[{{"key_id":"k1","principal":"svc@example.com","roles":["guard-rails","cleanup"],"secret":"{secret}"}}]}}"#
        ));
        let keystore = Keystore::load(file.path().to_str().unwrap()).unwrap();
        let key = keystore.get("k1").unwrap();
        assert_eq!(key.principal, "svc@example.com");
        assert_eq!(key.roles.len(), 2);
    }

    #[test]
    fn rejects_key_with_no_roles() {
        let secret = Base64Engine.encode(b"0123456789abcdef0123456789abcdef");
        let file = write_keystore(&format!(
            r#"{{"keys":[{{"key_id":"k1","principal":"svc@example.com","roles":[],"secret":"{secret}"}}]}}"#
        ));
        let result = Keystore::load(file.path().to_str().unwrap());
        assert!(result.is_err());
    }

    #[test]
    fn reload_picks_up_new_contents() {
        let secret = Base64Engine.encode(b"0123456789abcdef0123456789abcdef");
        let mut file = write_keystore(&format!(
            r#"{{"keys":[{{"key_id":"k1","principal":"a","roles":["cleanup"],"secret":"{secret}"}}]}}"#
        ));
        let keystore = Keystore::load(file.path().to_str().unwrap()).unwrap();
        assert!(keystore.get("k2").is_none());

        file.as_file_mut().set_len(0).unwrap();
        use std::io::Seek;
        file.as_file_mut().seek(std::io::SeekFrom::Start(0)).unwrap();
        write!(
            file,
            r#"{{"keys":[{{"key_id":"k2","principal":"b","roles":["cleanup"],"secret":"{secret}"}}]}}"#
        )
        .unwrap();
        keystore.reload().unwrap();
        assert!(keystore.get("k2").is_some());
    }
}
