use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use crate::config::Settings;
use crate::fetch::Pacer;

/// Local image directory keyed by a filename derived from each URL.
///
/// A file already present under the derived name is returned without any
/// network access, so a remote image that changes behind an unchanged URL
/// path is never refreshed.
pub struct ImageCache {
    dir: PathBuf,
    client: reqwest::Client,
    pacer: Pacer,
    pub downloaded: usize,
    pub cached: usize,
    pub failed: usize,
}

impl ImageCache {
    pub fn new(dir: impl AsRef<Path>, client: reqwest::Client, settings: &Settings) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create image dir {}", dir.display()))?;
        Ok(ImageCache {
            dir,
            client,
            pacer: Pacer::new(settings.image_delay()),
            downloaded: 0,
            cached: 0,
            failed: 0,
        })
    }

    pub fn local_path(&self, url: &str) -> PathBuf {
        self.dir.join(file_name_for(url))
    }

    /// Local path for `url`, downloading it on a cache miss. Failures are
    /// logged and yield `None`.
    pub async fn fetch(&mut self, url: &str) -> Option<PathBuf> {
        if url.is_empty() {
            return None;
        }
        let path = self.local_path(url);
        if path.exists() {
            self.cached += 1;
            return Some(path);
        }

        self.pacer.wait().await;
        match self.download(url, &path).await {
            Ok(()) => {
                self.downloaded += 1;
                debug!("Saved {} -> {}", url, path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to download image {}: {:#}", url, e);
                self.failed += 1;
                None
            }
        }
    }

    /// Stream into `<name>.part`, then rename, so an interrupted download is
    /// never mistaken for a cached file.
    async fn download(&self, url: &str, path: &Path) -> Result<()> {
        let mut response = self.client.get(url).send().await?.error_for_status()?;

        let part = PathBuf::from(format!("{}.part", path.display()));
        let result = async {
            let mut file = tokio::fs::File::create(&part).await?;
            while let Some(chunk) = response.chunk().await? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        tokio::fs::rename(&part, path)
            .await
            .with_context(|| format!("Failed to move {} into place", part.display()))?;
        Ok(())
    }
}

/// Last URL path segment, or `img_<hash>.jpg` when there is none.
pub fn file_name_for(url: &str) -> String {
    let segment = match Url::parse(url) {
        Ok(u) => u
            .path_segments()
            .and_then(|mut s| s.next_back())
            .map(str::to_string),
        Err(_) => url
            .split(['?', '#'])
            .next()
            .and_then(|p| p.rsplit('/').next())
            .map(str::to_string),
    };

    match segment.map(|s| sanitize(&s)).filter(|s| !s.is_empty() && s != "." && s != "..") {
        Some(name) => name,
        None => {
            let digest = hex::encode(Sha256::digest(url.as_bytes()));
            format!("img_{}.jpg", &digest[..16])
        }
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
            _ => '_',
        })
        .collect()
}

/// Absolute form of a possibly relative image URL.
pub fn resolve_url(base: &str, raw: &str) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    match Url::parse(raw) {
        Ok(u) => Some(u.into()),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            Url::parse(base).ok()?.join(raw).ok().map(String::from)
        }
        Err(_) => None,
    }
}
