use anyhow::{Context, Result};
use clap::crate_version;
use futures::prelude::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use std::{
    collections::BTreeSet,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::io::AsyncWriteExt;

use crate::catalog::Catalog;
use crate::config::{DownloadConfig, LinkedDownloadConfig};
use crate::listing::{linked_images, read_cp1251, read_list, ZipListingEntry};
use crate::ozi::rename_image_reference;
use crate::remote_zip::{RangeSource, RemoteZip};

const ZERO_DURATION: Duration = Duration::from_secs(0);

/// Prefix of archive members holding sheet images and calibration files.
const ARCHIVE_MAPS_DIR: &str = "maps";

/// Counters of a download run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DownloadSummary {
    pub downloaded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub bytes: u64,
}

impl DownloadSummary {
    pub fn log(&self) {
        info!(
            "downloaded {} files ({}), skipped {}, failed {}",
            self.downloaded,
            pretty_bytes::converter::convert(self.bytes as f64),
            self.skipped,
            self.failed
        );
    }
}

fn default_headers() -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.append(
        USER_AGENT,
        HeaderValue::from_str(&format!("topo-sheets_rs_{}", crate_version!()))
            .context("invalid user agent")?,
    );
    Ok(headers)
}

/// Async client for plain file downloads.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if timeout > ZERO_DURATION {
        builder = builder.timeout(timeout);
    }

    builder
        .default_headers(default_headers()?)
        .build()
        .with_context(|| "failed creating HTTP client")
}

/// Blocking client for range requests into remote archives.
///
/// Must not be created or dropped on an async executor thread.
pub fn blocking_client(timeout: Duration) -> Result<reqwest::blocking::Client> {
    let mut builder = reqwest::blocking::Client::builder();
    builder = builder.timeout(if timeout > ZERO_DURATION {
        Some(timeout)
    } else {
        None
    });

    builder
        .default_headers(default_headers()?)
        .build()
        .with_context(|| "failed creating HTTP client")
}

fn progress_bar(len: u64) -> Result<ProgressBar> {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:60.cyan/blue} {pos:>7}/{len:7} ETA: {eta} {msg}")?
            .progress_chars("##-"),
    );
    Ok(pb)
}

/// Lists the members of every archive in `urls` without downloading them.
///
/// Archives that cannot be read are logged and contribute no entries.
pub fn list_zip_contents(
    client: &reqwest::blocking::Client,
    urls: &[String],
) -> Vec<ZipListingEntry> {
    let mut entries = Vec::new();

    for url in urls {
        info!("Processing {}...", url);
        match RemoteZip::open_url(client.clone(), url) {
            Ok(zip) => entries.extend(zip.names().into_iter().map(|filename| ZipListingEntry {
                url: url.clone(),
                filename,
            })),
            Err(e) => warn!("Error processing {}: {}", url, e),
        }
    }

    entries
}

/// Output names of one sheet pulled from an archive.
struct SheetFiles {
    image_member: String,
    map_member: String,
    image_name: String,
    image_out: PathBuf,
    map_out: PathBuf,
}

impl SheetFiles {
    fn new(id: &str, filename: &str, raw_dir: &Path) -> Self {
        let ext = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("gif");
        let image_name = format!("{}.{}", id, ext);
        let map_filename = Path::new(filename).with_extension("map");

        Self {
            image_member: format!("{}/{}", ARCHIVE_MAPS_DIR, filename),
            map_member: format!("{}/{}", ARCHIVE_MAPS_DIR, map_filename.display()),
            image_out: raw_dir.join(&image_name),
            map_out: raw_dir.join(format!("{}.map", id)),
            image_name,
        }
    }

    fn all_exist(&self) -> bool {
        self.image_out.exists() && self.map_out.exists()
    }
}

/// Extracts one sheet's image and calibration file from an opened archive.
///
/// The image is stored as `<id>.<ext>` and the calibration file as
/// `<id>.map`, with its image reference rewritten to the new name.
fn extract_sheet<S: RangeSource>(
    zip: &mut RemoteZip<S>,
    filename: &str,
    files: &SheetFiles,
    summary: &mut DownloadSummary,
) -> Result<()> {
    let members = [
        (files.image_member.as_str(), files.image_out.as_path(), false),
        (files.map_member.as_str(), files.map_out.as_path(), true),
    ];

    for (member, out, is_map) in members {
        if out.exists() {
            info!("Skipping {}, already exists at {}", member, out.display());
            summary.skipped += 1;
            continue;
        }

        let content = match zip
            .read(member)
            .with_context(|| format!("failed extracting {}", member))?
        {
            Some(content) if is_map => {
                rename_image_reference(&content, filename, &files.image_name)
            }
            Some(content) => content,
            None => {
                warn!("{} not found in archive", member);
                summary.failed += 1;
                continue;
            }
        };

        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent).context("failed to create output directory")?;
        }
        fs::write(out, &content).with_context(|| format!("failed writing {}", out.display()))?;
        info!("Extracted {} to {}", member, out.display());
        summary.downloaded += 1;
        summary.bytes += content.len() as u64;
    }

    Ok(())
}

/// Pulls the image and calibration file of every catalog entry out of its
/// remote archive. Existing files are kept.
pub fn download_archives(
    client: &reqwest::blocking::Client,
    catalog: &Catalog,
    cfg: &DownloadConfig,
) -> Result<DownloadSummary> {
    let pb = progress_bar(catalog.len() as u64)?;
    let mut summary = DownloadSummary::default();

    for (id, record) in pb.wrap_iter(catalog.sheets.iter()) {
        let (url, filename) = match (&record.url, &record.filename) {
            (Some(url), Some(filename)) => (url, filename),
            _ => continue,
        };
        pb.set_message(id.clone());

        let files = SheetFiles::new(id, filename, &cfg.raw_dir);
        if files.all_exist() {
            info!("Skipping {} from {}, all files already exist", id, url);
            summary.skipped += 2;
            continue;
        }

        let res = RemoteZip::open_url(client.clone(), url)
            .with_context(|| format!("failed opening archive {}", url))
            .and_then(|mut zip| extract_sheet(&mut zip, filename, &files, &mut summary));
        if let Err(e) = res {
            warn!("Error processing {} from {}: {:#}", id, url, e);
            summary.failed += 1;
        }
    }

    pb.finish_and_clear();
    Ok(summary)
}

/// Streams `url` into `target`, through a temporary file so an interrupted
/// download is not mistaken for a finished one.
async fn download_file(client: &reqwest::Client, url: &str, target: &Path) -> Result<u64> {
    let partial = target.with_extension("part");

    let mut stream = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("failed fetching {}", url))?
        .error_for_status()
        .with_context(|| format!("received invalid status code fetching {}", url))?
        .bytes_stream();

    let mut file = tokio::fs::File::create(&partial).await?;
    let mut written = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.with_context(|| format!("failed streaming {} to disk", url))?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&partial, target).await?;
    Ok(written)
}

/// Downloads `(url, target)` pairs one after the other, skipping targets
/// that already exist.
pub async fn download_files(
    client: &reqwest::Client,
    files: Vec<(String, PathBuf)>,
) -> Result<DownloadSummary> {
    let pb = progress_bar(files.len() as u64)?;
    let mut summary = DownloadSummary::default();

    for (url, target) in files {
        pb.inc(1);
        if target.exists() {
            summary.skipped += 1;
            continue;
        }
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create output directory")?;
        }

        pb.set_message(url.clone());
        match download_file(client, &url, &target).await {
            Ok(bytes) => {
                summary.downloaded += 1;
                summary.bytes += bytes;
            }
            Err(e) => {
                warn!("Failed to download {}: {:#}", url, e);
                summary.failed += 1;
            }
        }
    }

    pb.finish_and_clear();
    Ok(summary)
}

/// Downloads every record's `url` to `<raw_dir>/<id>.jpg`.
pub async fn download_images(catalog: &Catalog, cfg: &DownloadConfig) -> Result<DownloadSummary> {
    let files = catalog
        .sheets
        .iter()
        .filter_map(|(id, record)| {
            let url = record.url.clone()?;
            Some((url, cfg.raw_dir.join(format!("{}.jpg", id))))
        })
        .collect();

    download_files(&http_client(cfg.timeout)?, files).await
}

/// Downloads the listed sheets linked from a listing page, copying their
/// calibration files next to them.
pub async fn download_linked(cfg: &LinkedDownloadConfig) -> Result<DownloadSummary> {
    let wanted: BTreeSet<String> = read_list(&cfg.list)
        .with_context(|| format!("failed reading {}", cfg.list.display()))?
        .into_iter()
        .collect();
    let page = read_cp1251(&cfg.page)
        .with_context(|| format!("failed reading {}", cfg.page.display()))?;
    let raw_dir = &cfg.download.raw_dir;
    fs::create_dir_all(raw_dir).context("failed to create output directory")?;

    let mut files = Vec::new();
    for image in linked_images(&page, &cfg.base_url) {
        if !wanted.contains(&format!("{}.jpg", image.id)) {
            continue;
        }

        let map = cfg.maps_dir.join(format!("{}.map", image.raw_id));
        if map.exists() {
            fs::copy(&map, raw_dir.join(format!("{}.map", image.id)))
                .with_context(|| format!("failed copying {}", map.display()))?;
        }

        files.push((image.url, raw_dir.join(format!("{}.jpg", image.id))));
    }

    download_files(&http_client(cfg.download.timeout)?, files).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote_zip::tests::MemorySource;
    use encoding_rs::WINDOWS_1251;
    use std::io::{Cursor, Write};
    use zip::{write::FileOptions, ZipWriter};

    fn archive() -> RemoteZip<MemorySource> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        writer.start_file("maps/n37-001.gif", FileOptions::default()).unwrap();
        writer.write_all(b"GIF89a").unwrap();
        writer.start_file("maps/n37-001.map", FileOptions::default()).unwrap();
        let (map, _, _) = WINDOWS_1251.encode("OziExplorer Map Data File Version 2.2\r\nЛист\r\nn37-001.gif\r\n");
        writer.write_all(&map).unwrap();
        let data = writer.finish().unwrap().into_inner();
        RemoteZip::open(MemorySource::new(data)).unwrap()
    }

    #[test]
    fn extracts_image_and_renamed_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let files = SheetFiles::new("N37-001", "n37-001.gif", dir.path());
        let mut summary = DownloadSummary::default();

        extract_sheet(&mut archive(), "n37-001.gif", &files, &mut summary).unwrap();

        assert_eq!(summary.downloaded, 2);
        assert_eq!(fs::read(dir.path().join("N37-001.gif")).unwrap(), b"GIF89a");
        let map = fs::read(dir.path().join("N37-001.map")).unwrap();
        let (text, _, _) = WINDOWS_1251.decode(&map);
        assert!(text.contains("\r\nN37-001.gif\r\n"));
        assert!(text.contains("Лист"));
        assert!(files.all_exist());
    }

    #[test]
    fn keeps_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("N37-001.gif"), b"local").unwrap();
        let files = SheetFiles::new("N37-001", "n37-001.gif", dir.path());
        let mut summary = DownloadSummary::default();

        extract_sheet(&mut archive(), "n37-001.gif", &files, &mut summary).unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.downloaded, 1);
        assert_eq!(fs::read(dir.path().join("N37-001.gif")).unwrap(), b"local");
    }

    #[test]
    fn missing_member_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let files = SheetFiles::new("N38-001", "n38-001.gif", dir.path());
        let mut summary = DownloadSummary::default();

        extract_sheet(&mut archive(), "n38-001.gif", &files, &mut summary).unwrap();

        assert_eq!(summary.failed, 2);
        assert!(!files.all_exist());
    }
}
