//! Booth identity store
//!
//! A JSON array of registration records in one file. The newest record is
//! the active identity. Writes go to a temporary file that is renamed over
//! the original, so readers never see a half-written array.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// One booth registration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub booth_name: String,
    /// Free text, or `"<lat>,<lng>"`
    pub location: String,
    #[serde(default)]
    pub encrypted_data: String,
    /// Unix seconds, as a string
    #[serde(default)]
    pub created_at: String,
}

/// Body of `POST /api/identity`
#[derive(Debug, Deserialize)]
struct Registration {
    #[serde(default)]
    booth_name: String,
    #[serde(default)]
    location: Option<Location>,
    #[serde(default)]
    encrypted_data: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Location {
    Text(String),
    Coords { lat: Coordinate, lng: Coordinate },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Coordinate {
    Number(serde_json::Number),
    Text(String),
}

impl Coordinate {
    fn into_string(self) -> String {
        match self {
            Coordinate::Number(n) => n.to_string(),
            Coordinate::Text(s) => s,
        }
    }
}

impl IdentityRecord {
    /// Build a record from a registration body
    ///
    /// Returns `None` unless both `booth_name` and `location` are present and
    /// non-empty.
    pub fn from_registration(body: &[u8]) -> Result<Option<Self>> {
        let registration: Registration = serde_json::from_slice(body)?;

        let location = match registration.location {
            Some(Location::Text(text)) => text,
            Some(Location::Coords { lat, lng }) => {
                format!("{},{}", lat.into_string(), lng.into_string())
            }
            None => String::new(),
        };
        let booth_name = registration.booth_name.trim().to_string();
        if booth_name.is_empty() || location.trim().is_empty() {
            return Ok(None);
        }

        Ok(Some(Self {
            booth_name,
            location,
            encrypted_data: registration.encrypted_data.unwrap_or_default(),
            created_at: unix_seconds().to_string(),
        }))
    }
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// File-backed identity records
#[derive(Debug)]
pub struct IdentityStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl IdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, oldest first; a missing file is an empty store
    pub async fn load(&self) -> Result<Vec<IdentityRecord>> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) if raw.iter().all(u8::is_ascii_whitespace) => Ok(Vec::new()),
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether at least one record exists
    ///
    /// An unreadable or corrupt file counts as no identity.
    pub async fn has_identity(&self) -> bool {
        match self.load().await {
            Ok(records) => !records.is_empty(),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Identity store unreadable");
                false
            }
        }
    }

    /// Newest record
    pub async fn latest(&self) -> Option<IdentityRecord> {
        self.load().await.ok()?.pop()
    }

    /// Append a record
    pub async fn save(&self, record: IdentityRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.load().await?;
        records.push(record);
        let encoded = serde_json::to_vec_pretty(&records)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &encoded).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Io(e));
        }

        tracing::info!(path = %self.path.display(), records = records.len(), "Booth identity saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> IdentityRecord {
        IdentityRecord {
            booth_name: name.to_string(),
            location: "Lobby".to_string(),
            encrypted_data: String::new(),
            created_at: "1700000000".to_string(),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = IdentityStore::new(dir.path().join("booth_identity.json"));

        assert!(store.load().await.unwrap().is_empty());
        assert!(!store.has_identity().await);
        assert!(store.latest().await.is_none());
    }

    #[tokio::test]
    async fn test_save_appends_and_latest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("booth_identity.json");
        let store = IdentityStore::new(&path);

        store.save(record("first")).await.unwrap();
        store.save(record("second")).await.unwrap();

        assert!(store.has_identity().await);
        assert_eq!(store.load().await.unwrap().len(), 2);
        assert_eq!(store.latest().await.unwrap().booth_name, "second");
        assert!(!path.with_extension("json.tmp").exists());

        let on_disk: Vec<IdentityRecord> =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(on_disk[0].booth_name, "first");
    }

    #[tokio::test]
    async fn test_empty_array_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("booth_identity.json");
        std::fs::write(&path, "[]").unwrap();

        let store = IdentityStore::new(&path);
        assert!(!store.has_identity().await);
    }

    #[tokio::test]
    async fn test_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("booth_identity.json");
        std::fs::write(&path, "[{\"booth_name\":").unwrap();

        let store = IdentityStore::new(&path);
        assert!(!store.has_identity().await);
        assert!(store.save(record("x")).await.is_err());
    }

    #[test]
    fn test_registration_with_text_location() {
        let body = br#"{"booth_name":"Booth A","location":"Hall 2","encrypted_data":"abc"}"#;
        let record = IdentityRecord::from_registration(body).unwrap().unwrap();
        assert_eq!(record.booth_name, "Booth A");
        assert_eq!(record.location, "Hall 2");
        assert_eq!(record.encrypted_data, "abc");
        assert!(record.created_at.parse::<u64>().unwrap() > 0);
    }

    #[test]
    fn test_registration_with_coordinates() {
        let body = br#"{"booth_name":"Booth B","location":{"lat":-6.2,"lng":"106.8"}}"#;
        let record = IdentityRecord::from_registration(body).unwrap().unwrap();
        assert_eq!(record.location, "-6.2,106.8");
        assert_eq!(record.encrypted_data, "");
    }

    #[test]
    fn test_registration_missing_fields() {
        assert!(IdentityRecord::from_registration(br#"{"booth_name":"A"}"#)
            .unwrap()
            .is_none());
        assert!(IdentityRecord::from_registration(br#"{"location":"x"}"#)
            .unwrap()
            .is_none());
        assert!(IdentityRecord::from_registration(b"not json").is_err());
    }
}
