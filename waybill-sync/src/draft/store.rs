use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;
use waybill::FormType;

use super::{Draft, DraftError};

/// Durable slot holding at most one draft per form type.
#[async_trait]
pub trait DraftStore: Send + Sync {
    /// Read the draft for a form type, if any.
    async fn load(&self, form_type: &FormType) -> Result<Option<Draft>, DraftError>;

    /// Write a draft, replacing any previous one of the same form type.
    async fn save(&self, draft: &Draft) -> Result<(), DraftError>;

    /// Remove the draft for a form type. Removing nothing is not an error.
    async fn delete(&self, form_type: &FormType) -> Result<(), DraftError>;
}

/// Drafts kept in process memory, serialized as they would be on disk.
#[derive(Debug, Default)]
pub struct MemoryDraftStore {
    slots: DashMap<FormType, String>,
}

impl MemoryDraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, form_type: &FormType) -> bool {
        self.slots.contains_key(form_type)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[async_trait]
impl DraftStore for MemoryDraftStore {
    async fn load(&self, form_type: &FormType) -> Result<Option<Draft>, DraftError> {
        // Clone out so no shard lock is held while decoding
        let Some(json) = self.slots.get(form_type).map(|slot| slot.value().clone()) else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_str(&json)?))
    }

    async fn save(&self, draft: &Draft) -> Result<(), DraftError> {
        let json = serde_json::to_string(draft)?;
        self.slots.insert(draft.form_type.clone(), json);
        Ok(())
    }

    async fn delete(&self, form_type: &FormType) -> Result<(), DraftError> {
        self.slots.remove(form_type);
        Ok(())
    }
}

/// One JSON file per form type under a directory.
///
/// Writes go to a temporary file that is then renamed over the slot, so a
/// crash mid-write leaves the previous draft intact.
#[derive(Debug, Clone)]
pub struct FileDraftStore {
    directory: PathBuf,
}

impl FileDraftStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of the slot for a form type.
    ///
    /// Form types are used verbatim as file names, so only ASCII letters,
    /// digits, `-` and `_` are accepted.
    pub fn slot_path(&self, form_type: &FormType) -> Result<PathBuf, DraftError> {
        Ok(self
            .directory
            .join(format!("{}.draft.json", file_stem(form_type)?)))
    }
}

fn file_stem(form_type: &FormType) -> Result<&str, DraftError> {
    let name = form_type.as_str();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(name)
    } else {
        Err(DraftError::InvalidFormType(form_type.clone()))
    }
}

#[async_trait]
impl DraftStore for FileDraftStore {
    async fn load(&self, form_type: &FormType) -> Result<Option<Draft>, DraftError> {
        match tokio::fs::read(self.slot_path(form_type)?).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, draft: &Draft) -> Result<(), DraftError> {
        tokio::fs::create_dir_all(&self.directory).await?;

        let path = self.slot_path(&draft.form_type)?;
        let tmp = self
            .directory
            .join(format!(".{}.draft.tmp", file_stem(&draft.form_type)?));
        let bytes = serde_json::to_vec(draft)?;

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(path = %path.display(), bytes = bytes.len(), "Wrote draft file");
        Ok(())
    }

    async fn delete(&self, form_type: &FormType) -> Result<(), DraftError> {
        match tokio::fs::remove_file(self.slot_path(form_type)?).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
