//! Harvest, reconcile and georeference scanned Soviet topographic map sheets.
//!
//! The crate covers the whole path from a remote sheet archive to web map
//! tiles: listing and downloading sheets, keeping catalogs of what exists
//! where, reading OziExplorer calibration files, warping each sheet into
//! Web Mercator with GDAL and finally tiling the published GeoTIFFs.
//!
//! Every step reads and writes plain files (catalog JSON, listing CSV,
//! override JSON, raster artifacts), so steps can be rerun on their own.
//! Raster work is done by the GDAL command line tools, which must be on
//! `PATH`.
//!
//! # Usage
//!
//! The `topo-sheets` binary exposes one subcommand per step. It features a
//! helpful CLI you can access via `-h` / `--help`.
//!
//! # CLI Example
//!
//! ```bash
//! topo-sheets list-zip urls.txt data/zip_files.csv
//! topo-sheets catalog-listing data/zip_files.csv data/sheet_map.json
//! topo-sheets download-archives data/sheet_map.json
//! topo-sheets process --extension gif
//! topo-sheets tile-tiffs
//! ```
//!
//! # Library Example
//! ```rust
//! use topo_sheets::{sheet_id::normalize, Catalog, GkZone, SheetRecord};
//!
//! let mut catalog = Catalog::new();
//! catalog.insert(
//!     normalize("q-39-013_014"),
//!     SheetRecord {
//!         year: Some("1985".into()),
//!         ..Default::default()
//!     },
//! );
//!
//! assert!(catalog.member_ids().contains("Q39-014"));
//! assert_eq!(GkZone::for_longitude(37.5).central_meridian(), 39);
//! ```

pub mod affine;
pub mod antimeridian;
pub mod catalog;
pub mod config;
mod error;
pub mod fetch;
pub mod gk;
pub mod listing;
pub mod ozi;
pub mod pipeline;
pub mod process;
pub mod remote_zip;
pub mod sheet;
pub mod sheet_id;
pub mod tiling;
pub mod tools;

pub use catalog::{Catalog, SheetRecord};
pub use config::{
    DownloadConfig, FailurePolicy, HtmlCatalogConfig, LinkedDownloadConfig, ProcessConfig,
    TilingConfig,
};
pub use error::{Error, Result};
pub use gk::{GkZone, Projection, ZoneProjection};
pub use pipeline::{OutputLayout, SheetPipeline, Stage};
pub use sheet::{SheetGeometry, SheetOverride};
pub use tools::{GdalOptions, ProcessRunner, ToolCommand, ToolRunner};
