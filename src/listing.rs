//! Source listings: HTML index pages, zip member listings and the
//! catalogs built from them.

use encoding_rs::WINDOWS_1251;
use lazy_static::lazy_static;
use log::{debug, info};
use regex::Regex;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fs, io,
    path::Path,
};

use crate::catalog::{Catalog, SheetRecord};
use crate::error::Result;
use crate::sheet_id::{self, Series};

lazy_static! {
    static ref ANCHOR: Regex = Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap();
    static ref HREF: Regex =
        Regex::new(r#"(?i)\bhref\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#).unwrap();
    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
}

/// Reads a cp1251-encoded text file.
pub fn read_cp1251(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    let (text, _, _) = WINDOWS_1251.decode(&bytes);
    Ok(text.into_owned())
}

/// Reads a list file: one entry per line, blank lines ignored.
pub fn read_list(path: &Path) -> Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

/// A link in an HTML page.
#[derive(Clone, Debug, PartialEq)]
pub struct Anchor {
    pub href: Option<String>,
    pub text: String,
}

/// Extracts all `<a>` elements of a page, with the inner markup stripped
/// from their text.
pub fn anchors(html: &str) -> Vec<Anchor> {
    ANCHOR
        .captures_iter(html)
        .map(|caps| {
            let href = HREF.captures(&caps[1]).and_then(|h| {
                h.get(1)
                    .or_else(|| h.get(2))
                    .or_else(|| h.get(3))
                    .map(|m| m.as_str().to_owned())
            });
            let text = TAG.replace_all(&caps[2], "").replace("&amp;", "&");

            Anchor {
                href,
                text: text.trim().to_owned(),
            }
        })
        .collect()
}

/// Resolves a possibly relative link against the page it appeared on.
pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .ok()
        .map(String::from)
}

/// Last path segment of a file name or URL.
fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Base name without its last extension.
fn stem(path: &str) -> &str {
    let name = base_name(path);
    match name.rsplit_once('.') {
        Some((s, _)) if !s.is_empty() => s,
        _ => name,
    }
}

/// Stems of the files in `dir` that carry extension `ext`.
pub fn dir_stems(dir: &Path, ext: &str) -> Result<BTreeSet<String>> {
    let mut stems = BTreeSet::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map_or(false, |e| e == ext) {
            if let Some(s) = path.file_stem().and_then(|s| s.to_str()) {
                stems.insert(s.to_owned());
            }
        }
    }
    Ok(stems)
}

/// Builds a catalog from a listing page whose link texts are raw sheet
/// identifiers of `series`.
///
/// `map_stems` are the lowercased stems of locally available calibration
/// files; a record's `map_exists` is set when every member sheet has one.
pub fn html_catalog(
    html: &str,
    series: Series,
    base_url: &str,
    map_stems: &BTreeSet<String>,
) -> Catalog {
    let mut catalog = Catalog::new();

    for anchor in anchors(html) {
        let href = match &anchor.href {
            Some(h) if !h.is_empty() => h,
            _ => continue,
        };
        if !series.matches(&anchor.text) {
            continue;
        }
        let url = match resolve_url(base_url, href) {
            Some(u) => u,
            None => {
                debug!("cannot resolve link {:?}", href);
                continue;
            }
        };

        let map_exists = sheet_id::raw_members(&anchor.text)
            .iter()
            .all(|m| map_stems.contains(&m.to_lowercase()));

        catalog.insert(
            sheet_id::normalize(&anchor.text),
            SheetRecord {
                url: Some(url),
                map_exists: Some(map_exists),
                ..Default::default()
            },
        );
    }

    catalog
}

/// Stems of all `.jpg` links of a page.
pub fn html_jpg_stems(html: &str) -> BTreeSet<String> {
    anchors(html)
        .into_iter()
        .filter_map(|a| a.href)
        .filter(|h| h.contains(".jpg"))
        .map(|h| stem(&h).to_owned())
        .collect()
}

/// An image link of a listing page together with its sheet identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedImage {
    pub raw_id: String,
    pub id: String,
    pub url: String,
}

/// All `.jpg` links of a page, resolved against `base_url`.
pub fn linked_images(html: &str, base_url: &str) -> Vec<LinkedImage> {
    anchors(html)
        .into_iter()
        .filter_map(|a| {
            let href = a.href?;
            if !href.to_lowercase().ends_with(".jpg") || a.text.is_empty() {
                return None;
            }
            Some(LinkedImage {
                id: sheet_id::normalize(&a.text),
                url: resolve_url(base_url, &href)?,
                raw_id: a.text,
            })
        })
        .collect()
}

/// One member of a remote archive, as written by `list-zip`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ZipListingEntry {
    pub url: String,
    pub filename: String,
}

pub fn read_zip_listing(path: &Path) -> Result<Vec<ZipListingEntry>> {
    let mut reader = csv::Reader::from_path(path)?;
    let entries: Vec<ZipListingEntry> = reader
        .deserialize()
        .collect::<std::result::Result<_, csv::Error>>()?;
    Ok(entries)
}

/// Writes a listing with a `url,filename` header, even when empty.
pub fn write_zip_listing<W: io::Write>(out: W, entries: &[ZipListingEntry]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(["url", "filename"])?;
    for entry in entries {
        writer.write_record([&entry.url, &entry.filename])?;
    }
    writer.flush()?;
    Ok(())
}

/// Archive members that never hold a sheet image.
pub fn should_skip(filename: &str) -> bool {
    filename.ends_with('/')
        || filename.ends_with("--coverage.gif")
        || filename.ends_with(".kml")
        || filename.ends_with(".html")
        || filename.ends_with("mapstor.gif")
}

/// Builds a catalog from an archive listing.
///
/// Sheet ids and the edition year come from the `--` separated parts of
/// the image name and of the archive name. Images without ids or year are
/// dropped; when several images cover the same sheets the newest wins.
pub fn listing_catalog(entries: &[ZipListingEntry]) -> Catalog {
    // later rows for the same member replace the url, not the position
    let mut files: Vec<(&str, &str)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for entry in entries {
        if should_skip(&entry.filename) {
            continue;
        }
        match index.get(entry.filename.as_str()) {
            Some(&i) => files[i].1 = entry.url.as_str(),
            None => {
                index.insert(entry.filename.as_str(), files.len());
                files.push((entry.filename.as_str(), entry.url.as_str()));
            }
        }
    }

    let mut catalog = Catalog::new();

    for (filename, url) in files {
        if !filename.ends_with(".gif") {
            continue;
        }
        let image = base_name(filename);
        let parts = image
            .trim_end_matches(".gif")
            .split("--")
            .chain(stem(url).split("--"));

        let mut ids: Vec<String> = Vec::new();
        let mut year = None;
        for part in parts {
            if year.is_none() {
                year = sheet_id::extract_year(part);
            }
            for id in sheet_id::ids_from_archive_part(part) {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }

        if ids.is_empty() {
            info!("Skipping {} as it has no discernible ID", image);
            continue;
        }
        let year = match year {
            Some(y) => sheet_id::collapse_year_range(&y),
            None => {
                info!("Skipping {} as it has no year information", image);
                continue;
            }
        };

        ids.sort();
        let key = ids.join("_");

        let newer = match catalog.get(&key).and_then(|r| r.year.as_deref()) {
            Some(prev) => sheet_id::first_year(prev) < sheet_id::first_year(&year),
            None => true,
        };
        if !newer {
            continue;
        }

        catalog.insert(
            key.clone(),
            SheetRecord {
                url: Some(url.to_owned()),
                year: Some(year),
                filename: Some(image.to_owned()),
                id: Some(key),
                ..Default::default()
            },
        );
    }

    catalog
}

/// Image stems in a listing that have no calibration file next to them.
pub fn images_without_calibration(entries: &[ZipListingEntry]) -> BTreeSet<String> {
    let mut images = BTreeSet::new();
    let mut maps = BTreeSet::new();

    for entry in entries {
        let name = &entry.filename;
        if name.contains("mapstor") || name.contains("coverage") {
            continue;
        }
        if name.ends_with(".gif") {
            images.insert(stem(name).to_owned());
        } else if name.ends_with(".map") {
            maps.insert(stem(name).to_owned());
        }
    }

    images.difference(&maps).cloned().collect()
}

/// Stems of the first column of a CSV file with a header row.
pub fn listing_stems(path: &Path) -> Result<BTreeSet<String>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut stems = BTreeSet::new();
    for record in reader.records() {
        if let Some(first) = record?.get(0) {
            stems.insert(stem(first).to_owned());
        }
    }
    Ok(stems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreeset;

    const PAGE: &str = r#"<html><body>
<table><tr>
<td><a href="/maps/m37-001-1.jpg">m-37-001-1</a></td>
<td><A HREF='q39-013-1_2.jpg'> <b>q-39-013-1_2</b> </A></td>
<td><a href="index.html">Home</a></td>
<td><a name="top">m-37-002-1</a></td>
</tr></table>
</body></html>"#;

    const BASE: &str = "https://maps.example.net/soviet/map50k.html";

    fn entry(url: &str, filename: &str) -> ZipListingEntry {
        ZipListingEntry {
            url: url.to_owned(),
            filename: filename.to_owned(),
        }
    }

    #[test]
    fn extracts_anchors() {
        let links = anchors(PAGE);
        assert_eq!(links.len(), 4);
        assert_eq!(links[1].href.as_deref(), Some("q39-013-1_2.jpg"));
        assert_eq!(links[1].text, "q-39-013-1_2");
        assert_eq!(links[3].href, None);
    }

    #[test]
    fn html_catalog_checks_calibration_files() {
        let maps = btreeset! {"m-37-001-1".to_owned(), "q-39-013-1".to_owned()};
        let catalog = html_catalog(PAGE, Series::K50, BASE, &maps);

        assert_eq!(catalog.len(), 2);
        let single = catalog.get("M37-001-1").unwrap();
        assert_eq!(
            single.url.as_deref(),
            Some("https://maps.example.net/maps/m37-001-1.jpg")
        );
        assert_eq!(single.map_exists, Some(true));

        let double = catalog.get("Q39-013-1_Q39-013-2").unwrap();
        assert_eq!(
            double.url.as_deref(),
            Some("https://maps.example.net/soviet/q39-013-1_2.jpg")
        );
        assert_eq!(double.map_exists, Some(false));
    }

    #[test]
    fn wrong_series_is_ignored() {
        let catalog = html_catalog(PAGE, Series::K100, BASE, &BTreeSet::new());
        assert!(catalog.is_empty());
    }

    #[test]
    fn jpg_links() {
        assert_eq!(
            html_jpg_stems(PAGE),
            btreeset! {"m37-001-1".to_owned(), "q39-013-1_2".to_owned()}
        );
        let linked = linked_images(PAGE, BASE);
        assert_eq!(linked.len(), 2);
        assert_eq!(linked[0].id, "M37-001-1");
        assert_eq!(linked[0].raw_id, "m-37-001-1");
    }

    #[test]
    fn skips_non_sheet_members() {
        assert!(should_skip("maps/"));
        assert!(should_skip("maps/l37--coverage.gif"));
        assert!(should_skip("index.html"));
        assert!(should_skip("l37.kml"));
        assert!(should_skip("maps/mapstor.gif"));
        assert!(!should_skip("maps/l37-129.gif"));
    }

    #[test]
    fn listing_catalog_keeps_newest_edition() {
        let entries = vec![
            entry("https://h/a/l37-129--(1985).zip", "maps/l37-129.gif"),
            entry("https://h/a/l37-129--(1985).zip", "maps/l37-129.map"),
            entry("https://h/b/x.zip", "maps/l37-129--(1990).gif"),
            entry("https://h/c/p35.zip", "maps/p35-143_144--(1975-1975).gif"),
            entry("https://h/c/p35.zip", "maps/"),
            entry("https://h/c/p35.zip", "maps/p35--coverage.gif"),
            entry("https://h/d/archive.zip", "maps/l38-001.gif"),
            entry("https://h/d/archive.zip", "maps/overview--(1980).gif"),
        ];

        let catalog = listing_catalog(&entries);
        assert_eq!(catalog.len(), 2);

        let l37 = catalog.get("L37-129").unwrap();
        assert_eq!(l37.year.as_deref(), Some("1990"));
        assert_eq!(l37.filename.as_deref(), Some("l37-129--(1990).gif"));
        assert_eq!(l37.url.as_deref(), Some("https://h/b/x.zip"));

        let p35 = catalog.get("P35-143_P35-144").unwrap();
        assert_eq!(p35.year.as_deref(), Some("1975"));
        assert_eq!(p35.id.as_deref(), Some("P35-143_P35-144"));
    }

    #[test]
    fn finds_images_without_calibration() {
        let entries = vec![
            entry("u", "maps/a.gif"),
            entry("u", "maps/a.map"),
            entry("u", "maps/b.gif"),
            entry("u", "maps/mapstor.gif"),
            entry("u", "maps/b--coverage.gif"),
        ];
        assert_eq!(
            images_without_calibration(&entries),
            btreeset! {"b".to_owned()}
        );
    }

    #[test]
    fn zip_listing_round_trip_keeps_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zip_files.csv");

        write_zip_listing(fs::File::create(&path).unwrap(), &[]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "url,filename\n");

        let entries = vec![entry("https://h/a.zip", "maps/a, b.gif")];
        write_zip_listing(fs::File::create(&path).unwrap(), &entries).unwrap();
        assert_eq!(read_zip_listing(&path).unwrap(), entries);
    }
}
