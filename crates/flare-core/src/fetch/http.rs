//! HTTP package registry client.
//!
//! A registry serves, per package version, an `index.json` listing the
//! files the package provides, then each file as a plain download. Entries
//! suffixed `.gz` are stored compressed and are decompressed into the
//! cache on extraction.

use std::fs::File;
use std::io;
use std::path::Path;
use std::time::Duration;

use flate2::read::GzDecoder;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::fetch::{FetchCache, PackageFetcher, PackageId};
use crate::manifest::LibraryRef;

/// Per-version index document served by the registry.
#[derive(Debug, Deserialize)]
struct PackageIndex {
    files: Vec<String>,
}

/// Fetches packages from an HTTP registry.
pub struct HttpFetcher {
    base_url: String,
    cache: FetchCache,
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    /// Create a fetcher against the registry at `base_url`.
    pub fn new(base_url: impl Into<String>, cache: FetchCache) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| Error::Fetch {
                package: String::new(),
                message: format!("cannot build HTTP client: {}", e),
            })?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            cache,
            client,
        })
    }

    fn file_url(&self, package: &PackageId, file: &str) -> String {
        format!(
            "{}/{}/{}/{}",
            self.base_url, package.name, package.version, file
        )
    }

    fn fetch_error(package: &PackageId, message: impl Into<String>) -> Error {
        Error::Fetch {
            package: package.to_string(),
            message: message.into(),
        }
    }

    fn fetch_index(&self, package: &PackageId) -> Result<PackageIndex> {
        let url = self.file_url(package, "index.json");
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|e| Self::fetch_error(package, format!("transport failure: {}", e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Self::fetch_error(package, "package or version does not exist"));
        }
        if !response.status().is_success() {
            return Err(Self::fetch_error(
                package,
                format!("registry returned {}", response.status()),
            ));
        }

        response
            .json()
            .map_err(|e| Self::fetch_error(package, format!("malformed index: {}", e)))
    }

    fn download_file(&self, package: &PackageId, file: &str, dir: &Path) -> Result<()> {
        let url = self.file_url(package, file);
        tracing::debug!("downloading {}", url);

        let response = self
            .client
            .get(&url)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Self::fetch_error(package, format!("download failed: {}", e)))?;

        let mut reader: Box<dyn io::Read> = Box::new(response);
        let target_name = match file.strip_suffix(".gz") {
            Some(stripped) => {
                reader = Box::new(GzDecoder::new(reader));
                stripped
            }
            None => file,
        };

        let target = dir.join(target_name);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut reader, &mut out)
            .map_err(|e| Self::fetch_error(package, format!("write failed: {}", e)))?;
        Ok(())
    }
}

impl PackageFetcher for HttpFetcher {
    fn fetch(&self, package: &PackageId) -> Result<Vec<LibraryRef>> {
        self.cache.populate(package, |dir| {
            let index = self.fetch_index(package)?;
            for file in &index.files {
                // Registry indexes use forward slashes; reject anything
                // that would escape the cache entry.
                if file.starts_with('/') || file.split('/').any(|c| c == "..") {
                    return Err(Self::fetch_error(
                        package,
                        format!("index lists invalid path {:?}", file),
                    ));
                }
                self.download_file(package, file, dir)?;
            }
            Ok(())
        })?;

        self.cache.libraries(package)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_url_layout() {
        let temp = tempfile::TempDir::new().unwrap();
        let cache = FetchCache::new(temp.path()).unwrap();
        let fetcher = HttpFetcher::new("https://registry.example/v1/", cache).unwrap();

        let pkg = PackageId::new("json-tools", "1.0.0");
        assert_eq!(
            fetcher.file_url(&pkg, "index.json"),
            "https://registry.example/v1/json-tools/1.0.0/index.json"
        );
    }

    #[test]
    fn test_index_parse() {
        let index: PackageIndex =
            serde_json::from_str(r#"{"files":["libjson.so.gz","libyaml.so"]}"#).unwrap();
        assert_eq!(index.files.len(), 2);
    }
}
