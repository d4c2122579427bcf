//! Uploaded files: spooling multipart parts to temp files and moving them into place.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::form::FilePart;

/// Size of each write while spooling an upload to disk.
const SPOOL_CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no file was uploaded under field {field:?}")]
    MissingField { field: String },

    #[error("file {path} is not a regular file")]
    NotRegular { path: PathBuf },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl UploadError {
    fn io(path: &Path) -> impl FnOnce(io::Error) -> Self + '_ {
        move |source| Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Metadata for an upload that has been written to a temp file.
///
/// The temp file is owned by the caller: move it with [`move_file`], copy it with
/// [`copy_file`], or delete it. Nothing cleans it up automatically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub full_path: PathBuf,
    pub name: String,
    pub name_without_extension: String,
    pub extension: String,
    pub size: u64,
}

/// Writes `part` to a uniquely named file in the system temp directory.
pub(crate) async fn spool(part: &FilePart) -> Result<UploadedFile, UploadError> {
    spool_into(part, &std::env::temp_dir()).await
}

pub(crate) async fn spool_into(part: &FilePart, dir: &Path) -> Result<UploadedFile, UploadError> {
    let original = Path::new(&part.filename);
    // Browsers may send a full client path; only the last component is kept.
    let name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = Path::new(&name)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name_without_extension = Path::new(&name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let temp_name = if extension.is_empty() {
        uuid::Uuid::new_v4().to_string()
    } else {
        format!("{}.{extension}", uuid::Uuid::new_v4())
    };
    let full_path = dir.join(temp_name);

    let mut file = fs::File::create(&full_path)
        .await
        .map_err(UploadError::io(&full_path))?;
    for chunk in part.data.chunks(SPOOL_CHUNK) {
        file.write_all(chunk)
            .await
            .map_err(UploadError::io(&full_path))?;
    }
    file.flush().await.map_err(UploadError::io(&full_path))?;

    let size = fs::metadata(&full_path)
        .await
        .map_err(UploadError::io(&full_path))?
        .len();

    Ok(UploadedFile {
        full_path,
        name,
        name_without_extension,
        extension,
        size,
    })
}

/// Copies `source` into `dest_dir` (created if missing), keeping its file name.
///
/// Returns the path of the copy.
pub async fn copy_file(
    source: impl AsRef<Path>,
    dest_dir: impl AsRef<Path>,
) -> Result<PathBuf, UploadError> {
    let source = source.as_ref();
    let dest_dir = dest_dir.as_ref();

    let meta = fs::metadata(source).await.map_err(UploadError::io(source))?;
    if !meta.is_file() {
        return Err(UploadError::NotRegular {
            path: source.to_path_buf(),
        });
    }

    fs::create_dir_all(dest_dir)
        .await
        .map_err(UploadError::io(dest_dir))?;
    let file_name = source.file_name().ok_or_else(|| UploadError::NotRegular {
        path: source.to_path_buf(),
    })?;
    let dest = dest_dir.join(file_name);
    fs::copy(source, &dest).await.map_err(UploadError::io(&dest))?;
    Ok(dest)
}

/// Moves `source` into `dest_dir` (created if missing), keeping its file name.
///
/// Copies then removes rather than renaming, so it works across filesystems
/// (the temp directory is often a separate mount).
pub async fn move_file(
    source: impl AsRef<Path>,
    dest_dir: impl AsRef<Path>,
) -> Result<PathBuf, UploadError> {
    let source = source.as_ref();
    let dest = copy_file(source, dest_dir).await?;
    fs::remove_file(source)
        .await
        .map_err(UploadError::io(source))?;
    Ok(dest)
}
