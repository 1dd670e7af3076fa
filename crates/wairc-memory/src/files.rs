//! Disk-backed file host.
//!
//! Files live in one flat directory named after their content hash
//! (URL-safe base64, no padding) plus an extension. A separate static HTTP
//! server exposes that directory; this module only manages the files and
//! the URLs they are reachable at.

use async_trait::async_trait;
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::RwLock,
};
use tracing::{debug, info};
use wairc_core::{
    config::FilesConfig,
    error::WaircError,
    shellexpand,
    traits::{FileHost, HostedFile},
};

pub struct FileServer {
    dir: PathBuf,
    base_url: String,
    files: RwLock<HashMap<String, HostedFile>>,
}

impl FileServer {
    /// Create the directory if needed and index the files already in it.
    pub fn new(config: &FilesConfig) -> Result<Self, WaircError> {
        let dir = PathBuf::from(shellexpand(&config.dir));
        std::fs::create_dir_all(&dir)
            .map_err(|e| WaircError::Files(format!("failed to create {}: {e}", dir.display())))?;

        let scheme = if config.https { "https" } else { "http" };
        let base_url = if config.port == 80 {
            format!("{scheme}://{}", config.host)
        } else {
            format!("{scheme}://{}:{}", config.host, config.port)
        };

        let server = Self {
            dir,
            base_url,
            files: RwLock::new(HashMap::new()),
        };
        let found = server.rescan()?;
        info!("File host at {} indexed {found} files", server.dir.display());
        Ok(server)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn rescan(&self) -> Result<usize, WaircError> {
        let entries = std::fs::read_dir(&self.dir)?;
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());

        for entry in entries.flatten() {
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let (stem, ext) = match name.rsplit_once('.') {
                Some((stem, ext)) => (stem, ext),
                None => (name.as_str(), ""),
            };
            let Ok(bytes) = URL_SAFE_NO_PAD.decode(stem) else {
                debug!("skipping foreign file {name}");
                continue;
            };
            let hash = STANDARD.encode(bytes);
            let file = self.make_file(&hash, ext)?;
            files.insert(hash, file);
        }
        Ok(files.len())
    }

    fn make_file(&self, hash: &str, ext: &str) -> Result<HostedFile, WaircError> {
        if hash.is_empty() {
            return Err(WaircError::Files("hash is empty".into()));
        }

        let url_hash = match STANDARD.decode(hash) {
            Ok(bytes) => URL_SAFE_NO_PAD.encode(bytes),
            Err(_) => hash.to_string(),
        };
        let fname = if ext.is_empty() {
            url_hash
        } else {
            format!("{url_hash}.{ext}")
        };

        Ok(HostedFile {
            hash: hash.to_string(),
            path: self.dir.join(&fname),
            url: format!("{}/{fname}", self.base_url),
        })
    }
}

#[async_trait]
impl FileHost for FileServer {
    async fn add_blob(
        &self,
        hash: &str,
        ext: &str,
        bytes: &[u8],
    ) -> Result<HostedFile, WaircError> {
        if bytes.is_empty() {
            return Err(WaircError::Files("bytes are empty".into()));
        }
        let file = self.make_file(hash, ext)?;

        tokio::fs::write(&file.path, bytes)
            .await
            .map_err(|e| WaircError::Files(format!("failed to write {}: {e}", file.path.display())))?;

        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(file.hash.clone(), file.clone());
        Ok(file)
    }

    async fn remove_file(&self, file: &HostedFile) -> Result<(), WaircError> {
        tokio::fs::remove_file(&file.path)
            .await
            .map_err(|e| WaircError::Files(format!("failed to remove {}: {e}", file.path.display())))?;

        self.files
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&file.hash);
        Ok(())
    }

    fn file_by_hash(&self, hash: &str) -> Option<HostedFile> {
        self.files
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(hash)
            .cloned()
    }
}

/// File extension for a media attachment: from the MIME subtype, falling
/// back to the original file name.
pub fn media_extension(mime_type: &str, filename: &str) -> String {
    let from_mime = mime_type
        .split(';')
        .next()
        .and_then(|m| m.split_once('/'))
        .map(|(_, sub)| sub.trim())
        .unwrap_or("");
    if !from_mime.is_empty() {
        return from_mime.to_string();
    }

    Path::new(filename)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default()
}
