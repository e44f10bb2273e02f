//! Where job bytes live: results, uploads and backup documents.
//!
//! The runtime only ever talks to the [`FileManager`] trait; the bundled
//! [`LocalFileManager`] keeps everything under one root directory and
//! writes backups through a tempfile plus atomic rename, so a crash
//! mid-write can never clobber the previous good document.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupScope {
    /// One document for the whole service.
    Service,
    /// One document per user, keyed by owner id.
    User(String),
}

/// A writer whose content only becomes visible on `commit`.
pub trait AtomicWriter: Write + Send {
    fn commit(self: Box<Self>) -> io::Result<()>;
}

pub trait FileManager: Send + Sync {
    fn open_result(&self, job_id: &str, result_id: &str) -> io::Result<Box<dyn Write + Send>>;

    /// Where a result written through [`open_result`](Self::open_result)
    /// can later be fetched from.
    fn result_location(&self, job_id: &str, result_id: &str) -> String;

    fn open_upload(&self, job_id: &str, name: &str) -> io::Result<Box<dyn Read + Send>>;

    fn delete_job_files(&self, job_id: &str) -> io::Result<()>;

    fn open_backup(&self, scope: &BackupScope) -> io::Result<Box<dyn AtomicWriter>>;

    /// `None` when no backup exists yet for the scope.
    fn read_backup(&self, scope: &BackupScope) -> io::Result<Option<Box<dyn Read>>>;

    /// Every scope a backup document exists for.
    fn backup_scopes(&self) -> io::Result<Vec<BackupScope>>;
}

/// Plain directory layout: `jobs/<job>/<result>` for results and uploads,
/// `backups/*.json` for backup documents.
pub struct LocalFileManager {
    root: PathBuf,
}

impl LocalFileManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFileManager { root: root.into() }
    }

    fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join("jobs").join(sanitize(job_id))
    }

    fn backup_dir(&self) -> PathBuf {
        self.root.join("backups")
    }

    fn backup_path(&self, scope: &BackupScope) -> PathBuf {
        match scope {
            BackupScope::Service => self.backup_dir().join("service.json"),
            BackupScope::User(owner) => self
                .backup_dir()
                .join(format!("user_{}.json", sanitize(owner))),
        }
    }
}

/// Keep ids filesystem-safe.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

struct TempFileWriter {
    file: Option<tempfile::NamedTempFile>,
    target: PathBuf,
}

impl Write for TempFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file
            .as_mut()
            .expect("writer used after commit")
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file
            .as_mut()
            .expect("writer used after commit")
            .flush()
    }
}

impl AtomicWriter for TempFileWriter {
    fn commit(mut self: Box<Self>) -> io::Result<()> {
        let file = self.file.take().expect("writer committed once");
        file.persist(&self.target).map_err(|err| err.error)?;
        Ok(())
    }
}

impl FileManager for LocalFileManager {
    fn open_result(&self, job_id: &str, result_id: &str) -> io::Result<Box<dyn Write + Send>> {
        let dir = self.job_dir(job_id);
        fs::create_dir_all(&dir)?;
        let file = fs::File::create(dir.join(sanitize(result_id)))?;
        Ok(Box::new(file))
    }

    fn result_location(&self, job_id: &str, result_id: &str) -> String {
        self.job_dir(job_id)
            .join(sanitize(result_id))
            .to_string_lossy()
            .into_owned()
    }

    fn open_upload(&self, job_id: &str, name: &str) -> io::Result<Box<dyn Read + Send>> {
        let path = self.job_dir(job_id).join(sanitize(name));
        Ok(Box::new(fs::File::open(path)?))
    }

    fn delete_job_files(&self, job_id: &str) -> io::Result<()> {
        let dir = self.job_dir(job_id);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn open_backup(&self, scope: &BackupScope) -> io::Result<Box<dyn AtomicWriter>> {
        let dir = self.backup_dir();
        fs::create_dir_all(&dir)?;
        let file = tempfile::NamedTempFile::new_in(&dir)?;
        Ok(Box::new(TempFileWriter {
            file: Some(file),
            target: self.backup_path(scope),
        }))
    }

    fn read_backup(&self, scope: &BackupScope) -> io::Result<Option<Box<dyn Read>>> {
        match fs::File::open(self.backup_path(scope)) {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn backup_scopes(&self) -> io::Result<Vec<BackupScope>> {
        let dir = self.backup_dir();
        let mut scopes = Vec::new();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(scopes),
            Err(err) => return Err(err),
        };
        for entry in entries {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if name == "service.json" {
                scopes.push(BackupScope::Service);
            } else if let Some(owner) = name
                .strip_prefix("user_")
                .and_then(|rest| rest.strip_suffix(".json"))
            {
                scopes.push(BackupScope::User(owner.to_string()));
            }
        }
        Ok(scopes)
    }
}

/// Convenience for collaborators that already have a directory.
impl From<&Path> for LocalFileManager {
    fn from(root: &Path) -> Self {
        LocalFileManager::new(root)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_backup_write_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LocalFileManager::new(dir.path());

        let mut writer = manager.open_backup(&BackupScope::Service).unwrap();
        writer.write_all(b"{\"jobs\": []}").unwrap();
        // Nothing visible until commit.
        assert!(manager.read_backup(&BackupScope::Service).unwrap().is_none());
        writer.commit().unwrap();

        let mut content = String::new();
        manager
            .read_backup(&BackupScope::Service)
            .unwrap()
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "{\"jobs\": []}");

        // An uncommitted writer must not clobber the good document.
        let mut writer = manager.open_backup(&BackupScope::Service).unwrap();
        writer.write_all(b"{\"jobs\": [truncated").unwrap();
        drop(writer);
        let mut content = String::new();
        manager
            .read_backup(&BackupScope::Service)
            .unwrap()
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "{\"jobs\": []}");
    }

    #[test]
    fn test_job_files_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LocalFileManager::new(dir.path());

        let mut writer = manager.open_result("job-1", "result").unwrap();
        writer.write_all(b"rows").unwrap();
        drop(writer);
        assert!(std::path::Path::new(&manager.result_location("job-1", "result")).exists());

        manager.delete_job_files("job-1").unwrap();
        assert!(!std::path::Path::new(&manager.result_location("job-1", "result")).exists());
        // Deleting twice stays quiet.
        manager.delete_job_files("job-1").unwrap();
    }

    #[test]
    fn test_backup_scopes_enumeration() {
        let dir = tempfile::tempdir().unwrap();
        let manager = LocalFileManager::new(dir.path());
        assert_eq!(manager.backup_scopes().unwrap(), vec![]);

        manager
            .open_backup(&BackupScope::Service)
            .unwrap()
            .commit()
            .unwrap();
        manager
            .open_backup(&BackupScope::User("alice".to_string()))
            .unwrap()
            .commit()
            .unwrap();

        let mut scopes = manager.backup_scopes().unwrap();
        scopes.sort_by_key(|scope| match scope {
            BackupScope::Service => String::new(),
            BackupScope::User(owner) => owner.clone(),
        });
        assert_eq!(
            scopes,
            vec![
                BackupScope::Service,
                BackupScope::User("alice".to_string())
            ]
        );
    }
}
