use std::{path::PathBuf, time::Duration};

use crate::pipeline::OutputLayout;
use crate::sheet_id::Series;
use crate::tools::GdalOptions;

/// What to do when a sheet fails to process.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FailurePolicy {
    /// Log the failure and go on with the next sheet.
    Continue,
    /// Abort the batch.
    Halt,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        FailurePolicy::Continue
    }
}

/// Sheet processing configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessConfig {
    /// Directory holding the downloaded images and calibration files.
    pub raw_dir: PathBuf,

    /// Extension of the images to process when no list is given.
    pub extension: String,

    /// File with image names (relative to `raw_dir`) to process instead
    /// of the whole directory.
    pub from_list: Option<PathBuf>,

    /// Per-image overrides, keyed by image file name.
    pub special_cases: PathBuf,

    /// Sheet ids to skip, one per line.
    pub bad_sheets: PathBuf,

    /// Catalog whose records become the cutline feature properties.
    pub catalog: PathBuf,

    /// Value of the `source_type` feature property.
    pub source_type: String,

    pub layout: OutputLayout,

    pub gdal: GdalOptions,

    pub failure_policy: FailurePolicy,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            raw_dir: "data/raw".into(),
            extension: "gif".into(),
            from_list: None,
            special_cases: "special_cases.json".into(),
            bad_sheets: "bad_sheets.txt".into(),
            catalog: "data/sheet_map.json".into(),
            source_type: "mapstor".into(),
            layout: OutputLayout::default(),
            gdal: GdalOptions::default(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// Configuration of the HTML listing catalog builder.
#[derive(Clone, Debug, PartialEq)]
pub struct HtmlCatalogConfig {
    /// Saved listing page, cp1251 encoded.
    pub page: PathBuf,

    /// URL the page was saved from, used to resolve relative links.
    pub base_url: String,

    pub series: Series,

    /// Directory with the locally available calibration files.
    pub maps_dir: PathBuf,

    pub output: PathBuf,
}

/// Configuration of the downloaders.
#[derive(Clone, Debug, PartialEq)]
pub struct DownloadConfig {
    /// Where downloaded images and calibration files go.
    pub raw_dir: PathBuf,

    /// Timeout for a single request.
    ///
    /// Pass the zero duration to disable the timeout.
    pub timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            raw_dir: "data/raw".into(),
            timeout: Duration::from_secs(0),
        }
    }
}

/// Configuration of the linked image downloader.
#[derive(Clone, Debug, PartialEq)]
pub struct LinkedDownloadConfig {
    /// Sheet file names (`<id>.jpg`) to download.
    pub list: PathBuf,

    /// Saved listing page, cp1251 encoded.
    pub page: PathBuf,

    /// Prefix for the page's links.
    pub base_url: String,

    /// Directory with calibration files named by raw sheet id.
    pub maps_dir: PathBuf,

    pub download: DownloadConfig,
}

/// Configuration of the per-sheet tiler run.
#[derive(Clone, Debug, PartialEq)]
pub struct TilingConfig {
    /// Directory with the published GeoTIFFs.
    pub tiffs_dir: PathBuf,

    /// Output directory of the tiler.
    pub tiles_dir: PathBuf,

    /// Scratch directory; every sheet gets its own subdirectory.
    pub temp_dir: PathBuf,

    /// Tiler invocation with the placeholders `{tiles_dir}`, `{tiffs_dir}`,
    /// `{name}`, `{attribution}`, `{min_zoom}` and `{max_zoom}`.
    pub command: String,

    pub attribution: String,

    pub min_zoom: u8,

    pub max_zoom: u8,
}

pub const DEFAULT_TILER_COMMAND: &str = "tile --tiles-dir {tiles_dir} --tiffs-dir {tiffs_dir} \
    --name {name} --description {name} --attribution {attribution} \
    --max-zoom {max_zoom} --min-zoom {min_zoom}";

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            tiffs_dir: "export/gtiffs".into(),
            tiles_dir: "export/tiles".into(),
            temp_dir: "temp".into(),
            command: DEFAULT_TILER_COMMAND.to_owned(),
            attribution: "Russian Topo Maps".to_owned(),
            min_zoom: 15,
            max_zoom: 15,
        }
    }
}
