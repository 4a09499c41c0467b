use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use mailroom_common::{Mail, Message, internal};
use mailroom_tracing::traced;
use serde::Deserialize;
use tokio::fs;

use crate::{
    SerializationError, SpoolError, ValidationError, r#trait::BackingStore, types::SpooledMailId,
};

const SENSITIVE_PREFIXES: [&str; 9] = [
    "/etc", "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/boot", "/sys", "/proc", "/dev",
];

/// File-based backing store
///
/// Each mail is stored as two files named by its ULID:
/// - `{id}.eml`: the raw message bytes
/// - `{id}.bin`: the rest of the mail, bincode encoded
///
/// Writes go to `.tmp_` files which are then renamed into place, so a crash
/// never leaves a half written entry visible. Deletes rename to `.deleted`
/// first; leftovers are removed by [`FileBackingStore::init`].
#[derive(Debug, Clone)]
pub struct FileBackingStore {
    path: PathBuf,
}

impl Default for FileBackingStore {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/spool/mailroom"),
        }
    }
}

impl<'de> Deserialize<'de> for FileBackingStore {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct FileBackingStoreHelper {
            path: PathBuf,
        }

        let helper = FileBackingStoreHelper::deserialize(deserializer)?;
        Self::validate_path(&helper.path).map_err(serde::de::Error::custom)?;

        Ok(Self { path: helper.path })
    }
}

impl FileBackingStore {
    /// Reject relative paths, `..` components and system directories
    fn validate_path(path: &Path) -> Result<(), ValidationError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(ValidationError::ParentDirectory(path.display().to_string()));
        }

        if !path.is_absolute() {
            return Err(ValidationError::NotAbsolute(path.display().to_string()));
        }

        if let Some(prefix) = SENSITIVE_PREFIXES
            .iter()
            .find(|prefix| path.starts_with(prefix))
        {
            return Err(ValidationError::SystemDirectory {
                prefix: *prefix,
                path: path.display().to_string(),
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn builder() -> FileBackingStoreBuilder {
        FileBackingStoreBuilder::default()
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the spool directory if needed and clear out interrupted deletes
    ///
    /// # Errors
    /// If the directory cannot be created, or the path is not a directory
    pub fn init(&self) -> crate::Result<()> {
        internal!("Initialising spool at {}", self.path.display());

        if !self.path.try_exists()? {
            internal!("{} does not exist, creating...", self.path.display());
            std::fs::create_dir_all(&self.path)?;
        } else if !self.path.is_dir() {
            return Err(ValidationError::NotDirectory(self.path.display().to_string()).into());
        }

        self.cleanup_deleted_files()
    }

    fn cleanup_deleted_files(&self) -> crate::Result<()> {
        let mut cleaned = 0;

        for entry in std::fs::read_dir(&self.path)? {
            let entry = entry?;
            if entry.file_name().to_string_lossy().ends_with(".deleted") {
                std::fs::remove_file(entry.path())?;
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            internal!(
                level = INFO,
                "Cleaned up {cleaned} orphaned .deleted files from spool"
            );
        }

        Ok(())
    }

    fn paths(&self, id: &SpooledMailId) -> (PathBuf, PathBuf) {
        (
            self.path.join(format!("{id}.eml")),
            self.path.join(format!("{id}.bin")),
        )
    }

    /// Write both files of `id` through temporary files
    async fn store(&self, id: &SpooledMailId, mail: &Mail) -> crate::Result<()> {
        let mut envelope = mail.clone();
        let message = envelope.take_message();
        let metadata = bincode::serde::encode_to_vec(&envelope, bincode::config::standard())?;

        let (data_path, meta_path) = self.paths(id);
        let temp_data_path = self.path.join(format!(".tmp_{id}.eml"));
        let temp_meta_path = self.path.join(format!(".tmp_{id}.bin"));

        fs::write(
            &temp_data_path,
            message.as_ref().map_or(&[][..], Message::as_bytes),
        )
        .await?;
        fs::write(&temp_meta_path, &metadata).await?;

        fs::rename(&temp_data_path, &data_path).await?;
        fs::rename(&temp_meta_path, &meta_path).await?;

        Ok(())
    }
}

#[async_trait]
impl BackingStore for FileBackingStore {
    #[traced(instrument(level = tracing::Level::DEBUG, skip(self, mail)), timing(precision = "ms"))]
    async fn write(&self, mail: &Mail) -> crate::Result<SpooledMailId> {
        let id = SpooledMailId::generate();
        let (data_path, meta_path) = self.paths(&id);

        if fs::try_exists(&data_path).await.unwrap_or(false)
            || fs::try_exists(&meta_path).await.unwrap_or(false)
        {
            return Err(SpoolError::Internal(format!("ULID collision detected: {id}")));
        }

        self.store(&id, mail).await?;

        internal!(
            level = DEBUG,
            "Spooled mail {} as {id} to {}",
            mail.name(),
            data_path.display()
        );

        Ok(id)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip(self)), timing(precision = "ms"))]
    async fn list(&self) -> crate::Result<Vec<SpooledMailId>> {
        let mut entries = fs::read_dir(&self.path).await?;
        let mut ids = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let filename = entry.file_name();
            let filename = filename.to_string_lossy();

            if filename.ends_with(".bin")
                && !filename.starts_with(".tmp_")
                && let Some(id) = SpooledMailId::from_filename(&filename)
            {
                ids.push(id);
            }
        }

        ids.sort();
        internal!(level = DEBUG, "Found {} mails in spool", ids.len());

        Ok(ids)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(id = %id)), timing(precision = "ms"))]
    async fn read(&self, id: &SpooledMailId) -> crate::Result<Mail> {
        let (data_path, meta_path) = self.paths(id);

        let metadata = match fs::read(&meta_path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let (mut mail, read): (Mail, usize) =
            bincode::serde::decode_from_slice(&metadata, bincode::config::standard())?;
        if read != metadata.len() {
            return Err(SerializationError::Corrupted(format!(
                "{id}.bin has {} trailing bytes",
                metadata.len() - read
            ))
            .into());
        }

        let data = fs::read(&data_path).await?;
        if !data.is_empty() {
            mail.set_message(Message::from(data));
        }

        internal!(level = DEBUG, "Read mail {id} from spool");

        Ok(mail)
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(id = %id)), timing(precision = "ms"))]
    async fn update(&self, id: &SpooledMailId, mail: &Mail) -> crate::Result<()> {
        let (_, meta_path) = self.paths(id);
        if !fs::try_exists(&meta_path).await? {
            return Err(SpoolError::NotFound(id.clone()));
        }

        self.store(id, mail).await
    }

    #[traced(instrument(level = tracing::Level::DEBUG, skip_all, fields(id = %id)), timing(precision = "ms"))]
    async fn delete(&self, id: &SpooledMailId) -> crate::Result<()> {
        let (data_path, meta_path) = self.paths(id);
        let deleted_data_path = self.path.join(format!("{id}.eml.deleted"));
        let deleted_meta_path = self.path.join(format!("{id}.bin.deleted"));

        match fs::rename(&meta_path, &deleted_meta_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SpoolError::NotFound(id.clone()));
            }
            Err(e) => return Err(e.into()),
        }
        fs::rename(&data_path, &deleted_data_path).await?;

        fs::remove_file(&deleted_meta_path).await?;
        fs::remove_file(&deleted_data_path).await?;

        internal!(level = DEBUG, "Deleted mail {id} from spool");

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FileBackingStoreBuilder {
    path: PathBuf,
}

impl FileBackingStoreBuilder {
    #[must_use]
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// # Errors
    /// If the path is relative, contains `..` or is a system directory
    pub fn build(self) -> crate::Result<FileBackingStore> {
        FileBackingStore::validate_path(&self.path)?;
        Ok(FileBackingStore { path: self.path })
    }
}
