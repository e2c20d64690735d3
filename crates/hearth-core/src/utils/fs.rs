use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::fs;

/// Recursively copy `src` into `dst`, creating `dst` if needed.
/// Returns the number of files copied.
pub async fn copy_dir_all(src: &Path, dst: &Path) -> io::Result<usize> {
    copy_dir_boxed(src.to_path_buf(), dst.to_path_buf()).await
}

fn copy_dir_boxed(src: PathBuf, dst: PathBuf) -> Pin<Box<dyn Future<Output = io::Result<usize>> + Send>> {
    Box::pin(async move {
        fs::create_dir_all(&dst).await?;
        let mut copied = 0;
        let mut entries = fs::read_dir(&src).await?;
        while let Some(entry) = entries.next_entry().await? {
            let from = entry.path();
            let to = dst.join(entry.file_name());
            if entry.file_type().await?.is_dir() {
                copied += copy_dir_boxed(from, to).await?;
            } else {
                fs::copy(&from, &to).await?;
                copied += 1;
            }
        }
        Ok(copied)
    })
}

/// Remove a directory tree, treating a missing directory as success
pub async fn remove_dir_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Checks that `path` exists and is a regular file
pub async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Checks that `path` exists and is a directory
pub async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}
