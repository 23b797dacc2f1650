//! Local filesystem convenience wrappers around the core upload/download
//! engine in `client.rs`. These compose the generic `AsyncRead`/
//! `AsyncWrite` transfer primitives with `tokio::fs`, the "local
//! filesystem adapter" spec §1 calls out as an external collaborator
//! rather than part of the core transfer engine itself.

use std::io::SeekFrom;
use std::path::Path;

use tokio::fs;
use tokio::io::AsyncSeekExt;

use crate::client::FtpClient;
use crate::error::FtpResult;

impl FtpClient {
    /// Upload a local file to `remote_path` from the start (`STOR`).
    pub async fn upload_file(&mut self, local_path: &str, remote_path: &str) -> FtpResult<u64> {
        let file = fs::File::open(local_path).await?;
        self.upload(file, remote_path, 0, false).await
    }

    /// Resume an interrupted upload, picking up from wherever the
    /// server's copy of `remote_path` currently ends.
    pub async fn resume_upload_file(&mut self, local_path: &str, remote_path: &str) -> FtpResult<u64> {
        let offset = if self.features.size {
            self.size(remote_path).await.unwrap_or(0)
        } else {
            0
        };
        let mut file = fs::File::open(local_path).await?;
        if offset > 0 {
            file.seek(SeekFrom::Start(offset)).await?;
        }
        self.upload(file, remote_path, offset, false).await
    }

    /// Append a local file's contents to an existing remote file (`APPE`).
    pub async fn append_file(&mut self, local_path: &str, remote_path: &str) -> FtpResult<u64> {
        let file = fs::File::open(local_path).await?;
        self.upload(file, remote_path, 0, true).await
    }

    /// Download `remote_path` to `local_path` from the start, creating
    /// any missing parent directories.
    pub async fn download_file(&mut self, remote_path: &str, local_path: &str) -> FtpResult<u64> {
        self.download_file_from(remote_path, local_path, 0).await
    }

    /// Resume an interrupted download from the local file's current size.
    pub async fn resume_download_file(&mut self, remote_path: &str, local_path: &str) -> FtpResult<u64> {
        let offset = match fs::metadata(local_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        self.download_file_from(remote_path, local_path, offset).await
    }

    async fn download_file_from(&mut self, remote_path: &str, local_path: &str, start_at: u64) -> FtpResult<u64> {
        let file = if start_at > 0 {
            fs::OpenOptions::new().write(true).append(true).open(local_path).await?
        } else {
            if let Some(parent) = Path::new(local_path).parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).await?;
                }
            }
            fs::File::create(local_path).await?
        };
        self.download(remote_path, file, start_at).await
    }
}

#[cfg(test)]
mod tests {
    // Filesystem-backed transfers need a live FTP session and a real
    // disk; exercised end-to-end by the `docker-e2e` feature, not here.
}
