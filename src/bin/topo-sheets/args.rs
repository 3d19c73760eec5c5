use clap::{
    app_from_crate, crate_authors, crate_description, crate_name, crate_version, AppSettings,
    Arg, ArgMatches, SubCommand,
};
use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::validators::*;
use topo_sheets::{
    config::DownloadConfig, FailurePolicy, HtmlCatalogConfig, LinkedDownloadConfig,
    ProcessConfig, TilingConfig,
};

const VERBOSE_ARG: &str = "verbose";
const INPUT_ARG: &str = "input";
const SECOND_INPUT_ARG: &str = "second_input";
const OUTPUT_ARG: &str = "output";
const TIMEOUT_ARG: &str = "timeout";
const RAW_DIR_ARG: &str = "raw_dir";
const MAPS_DIR_ARG: &str = "maps_dir";
const PAGE_ARG: &str = "page";
const BASE_URL_ARG: &str = "base_url";
const SERIES_ARG: &str = "series";
const EXTENSION_ARG: &str = "extension";
const FROM_LIST_ARG: &str = "from_list";
const SPECIAL_CASES_ARG: &str = "special_cases";
const BAD_SHEETS_ARG: &str = "bad_sheets";
const CATALOG_ARG: &str = "catalog";
const SOURCE_TYPE_ARG: &str = "source_type";
const WORK_DIR_ARG: &str = "work_dir";
const BOUNDS_DIR_ARG: &str = "bounds_dir";
const EXPORT_DIR_ARG: &str = "export_dir";
const CACHE_MAX_ARG: &str = "cache_max";
const WARP_CACHE_ARG: &str = "warp_cache";
const WARP_MEMORY_ARG: &str = "warp_memory";
const THREADS_ARG: &str = "threads";
const HALT_ON_ERROR_ARG: &str = "halt_on_error";
const TIFFS_DIR_ARG: &str = "tiffs_dir";
const TILES_DIR_ARG: &str = "tiles_dir";
const TEMP_DIR_ARG: &str = "temp_dir";
const TILER_COMMAND_ARG: &str = "tiler_command";
const ATTRIBUTION_ARG: &str = "attribution";
const MIN_ZOOM_ARG: &str = "min_zoom";
const MAX_ZOOM_ARG: &str = "max_zoom";

const LIST_ZIP_CMD: &str = "list-zip";
const CATALOG_HTML_CMD: &str = "catalog-html";
const CATALOG_LISTING_CMD: &str = "catalog-listing";
const DOWNLOAD_ARCHIVES_CMD: &str = "download-archives";
const DOWNLOAD_IMAGES_CMD: &str = "download-images";
const DOWNLOAD_LINKED_CMD: &str = "download-linked";
const DIFF_CATALOGS_CMD: &str = "diff-catalogs";
const CHECK_HTML_MAPS_CMD: &str = "check-html-maps";
const CHECK_PAIRS_CMD: &str = "check-pairs";
const CHECK_LISTING_CMD: &str = "check-listing";
const PROCESS_CMD: &str = "process";
const ANTIMERIDIAN_CMD: &str = "antimeridian";
const TILE_TIFFS_CMD: &str = "tile-tiffs";

const DEFAULT_MAPS_DIR: &str = "data/maps";

pub enum Command {
    ListZip {
        urls: PathBuf,
        output: PathBuf,
        timeout: Duration,
    },
    CatalogHtml(HtmlCatalogConfig),
    CatalogListing {
        listing: PathBuf,
        output: PathBuf,
    },
    DownloadArchives {
        catalog: PathBuf,
        download: DownloadConfig,
    },
    DownloadImages {
        catalog: PathBuf,
        download: DownloadConfig,
    },
    DownloadLinked(LinkedDownloadConfig),
    DiffCatalogs {
        a: PathBuf,
        b: PathBuf,
    },
    CheckHtmlMaps {
        page: PathBuf,
        maps_dir: PathBuf,
    },
    CheckPairs {
        listing: PathBuf,
    },
    CheckListing {
        info: PathBuf,
        listing: PathBuf,
    },
    Process(ProcessConfig),
    Antimeridian {
        list: PathBuf,
        raw_dir: PathBuf,
    },
    TileTiffs(TilingConfig),
}

pub struct Args {
    pub verbose: bool,
    pub command: Command,
}

impl Args {
    pub fn parse() -> Self {
        let matches = get_matches();
        let verbose = matches.is_present(VERBOSE_ARG)
            || matches
                .subcommand()
                .1
                .map_or(false, |m| m.is_present(VERBOSE_ARG));

        let command = match matches.subcommand() {
            (LIST_ZIP_CMD, Some(m)) => Command::ListZip {
                urls: path(m, INPUT_ARG),
                output: path(m, OUTPUT_ARG),
                timeout: timeout(m),
            },
            (CATALOG_HTML_CMD, Some(m)) => Command::CatalogHtml(HtmlCatalogConfig {
                page: path(m, INPUT_ARG),
                output: path(m, OUTPUT_ARG),
                base_url: string(m, BASE_URL_ARG),
                series: parsed(m, SERIES_ARG).unwrap_or(topo_sheets::sheet_id::Series::K100),
                maps_dir: path_or(m, MAPS_DIR_ARG, DEFAULT_MAPS_DIR),
            }),
            (CATALOG_LISTING_CMD, Some(m)) => Command::CatalogListing {
                listing: path(m, INPUT_ARG),
                output: path(m, OUTPUT_ARG),
            },
            (DOWNLOAD_ARCHIVES_CMD, Some(m)) => Command::DownloadArchives {
                catalog: path(m, INPUT_ARG),
                download: download_config(m),
            },
            (DOWNLOAD_IMAGES_CMD, Some(m)) => Command::DownloadImages {
                catalog: path(m, INPUT_ARG),
                download: download_config(m),
            },
            (DOWNLOAD_LINKED_CMD, Some(m)) => Command::DownloadLinked(LinkedDownloadConfig {
                list: path(m, INPUT_ARG),
                page: path(m, PAGE_ARG),
                base_url: string(m, BASE_URL_ARG),
                maps_dir: path_or(m, MAPS_DIR_ARG, DEFAULT_MAPS_DIR),
                download: download_config(m),
            }),
            (DIFF_CATALOGS_CMD, Some(m)) => Command::DiffCatalogs {
                a: path(m, INPUT_ARG),
                b: path(m, SECOND_INPUT_ARG),
            },
            (CHECK_HTML_MAPS_CMD, Some(m)) => Command::CheckHtmlMaps {
                page: path(m, INPUT_ARG),
                maps_dir: path_or(m, MAPS_DIR_ARG, DEFAULT_MAPS_DIR),
            },
            (CHECK_PAIRS_CMD, Some(m)) => Command::CheckPairs {
                listing: path(m, INPUT_ARG),
            },
            (CHECK_LISTING_CMD, Some(m)) => Command::CheckListing {
                info: path(m, INPUT_ARG),
                listing: path(m, SECOND_INPUT_ARG),
            },
            (PROCESS_CMD, Some(m)) => Command::Process(process_config(m)),
            (ANTIMERIDIAN_CMD, Some(m)) => Command::Antimeridian {
                list: path(m, INPUT_ARG),
                raw_dir: path_or(m, RAW_DIR_ARG, "data/raw"),
            },
            (TILE_TIFFS_CMD, Some(m)) => Command::TileTiffs(tiling_config(m)),
            // `SubcommandRequiredElseHelp` rules this out
            _ => unreachable!(),
        };

        Self { verbose, command }
    }
}

fn string(m: &ArgMatches, name: &str) -> String {
    m.value_of(name).unwrap_or_default().to_owned()
}

fn path(m: &ArgMatches, name: &str) -> PathBuf {
    PathBuf::from(m.value_of(name).unwrap_or_default())
}

fn path_or(m: &ArgMatches, name: &str, default: &str) -> PathBuf {
    PathBuf::from(m.value_of(name).unwrap_or(default))
}

/// The value of an argument whose validator already checked it parses.
fn parsed<T: FromStr>(m: &ArgMatches, name: &str) -> Option<T> {
    m.value_of(name).and_then(|v| v.parse().ok())
}

fn timeout(m: &ArgMatches) -> Duration {
    Duration::from_secs(parsed(m, TIMEOUT_ARG).unwrap_or(0))
}

fn download_config(m: &ArgMatches) -> DownloadConfig {
    let mut cfg = DownloadConfig {
        timeout: timeout(m),
        ..Default::default()
    };
    if let Some(dir) = m.value_of(RAW_DIR_ARG) {
        cfg.raw_dir = dir.into();
    }
    cfg
}

fn process_config(m: &ArgMatches) -> ProcessConfig {
    let mut cfg = ProcessConfig::default();

    if let Some(v) = m.value_of(RAW_DIR_ARG) {
        cfg.raw_dir = v.into();
    }
    if let Some(v) = m.value_of(EXTENSION_ARG) {
        cfg.extension = v.trim_start_matches('.').to_owned();
    }
    cfg.from_list = m.value_of(FROM_LIST_ARG).map(PathBuf::from);
    if let Some(v) = m.value_of(SPECIAL_CASES_ARG) {
        cfg.special_cases = v.into();
    }
    if let Some(v) = m.value_of(BAD_SHEETS_ARG) {
        cfg.bad_sheets = v.into();
    }
    if let Some(v) = m.value_of(CATALOG_ARG) {
        cfg.catalog = v.into();
    }
    if let Some(v) = m.value_of(SOURCE_TYPE_ARG) {
        cfg.source_type = v.to_owned();
    }

    if let Some(v) = m.value_of(WORK_DIR_ARG) {
        cfg.layout.work_dir = v.into();
    }
    if let Some(v) = m.value_of(BOUNDS_DIR_ARG) {
        cfg.layout.bounds_dir = v.into();
    }
    if let Some(v) = m.value_of(EXPORT_DIR_ARG) {
        cfg.layout.export_dir = v.into();
    }

    if let Some(v) = parsed(m, CACHE_MAX_ARG) {
        cfg.gdal.translate_cache_mb = v;
    }
    if let Some(v) = parsed(m, WARP_CACHE_ARG) {
        cfg.gdal.warp_cache_mb = v;
    }
    if let Some(v) = parsed(m, WARP_MEMORY_ARG) {
        cfg.gdal.warp_memory_mb = v;
    }
    if let Some(v) = m.value_of(THREADS_ARG) {
        cfg.gdal.threads = v.to_owned();
    }

    if m.is_present(HALT_ON_ERROR_ARG) {
        cfg.failure_policy = FailurePolicy::Halt;
    }

    cfg
}

fn tiling_config(m: &ArgMatches) -> TilingConfig {
    let mut cfg = TilingConfig::default();

    if let Some(v) = m.value_of(TIFFS_DIR_ARG) {
        cfg.tiffs_dir = v.into();
    }
    if let Some(v) = m.value_of(TILES_DIR_ARG) {
        cfg.tiles_dir = v.into();
    }
    if let Some(v) = m.value_of(TEMP_DIR_ARG) {
        cfg.temp_dir = v.into();
    }
    if let Some(v) = m.value_of(TILER_COMMAND_ARG) {
        cfg.command = v.to_owned();
    }
    if let Some(v) = m.value_of(ATTRIBUTION_ARG) {
        cfg.attribution = v.to_owned();
    }
    if let Some(v) = parsed(m, MIN_ZOOM_ARG) {
        cfg.min_zoom = v;
    }
    if let Some(v) = parsed(m, MAX_ZOOM_ARG) {
        cfg.max_zoom = v;
    }

    cfg
}

fn input<'a, 'b>(help: &'a str) -> Arg<'a, 'b> {
    Arg::with_name(INPUT_ARG).help(help).required(true).index(1)
}

fn second_input<'a, 'b>(help: &'a str) -> Arg<'a, 'b> {
    Arg::with_name(SECOND_INPUT_ARG)
        .help(help)
        .required(true)
        .index(2)
}

fn output<'a, 'b>(help: &'a str) -> Arg<'a, 'b> {
    Arg::with_name(OUTPUT_ARG).help(help).required(true).index(2)
}

fn timeout_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name(TIMEOUT_ARG)
        .help("The timeout (in seconds) for a single request. Pass 0 for no timeout.")
        .validator(is_numeric_min(0))
        .default_value("0")
        .takes_value(true)
        .short("t")
        .long("timeout")
}

fn raw_dir_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name(RAW_DIR_ARG)
        .help("Directory holding sheet images and calibration files [default: data/raw]")
        .takes_value(true)
        .long("raw-dir")
}

fn maps_dir_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name(MAPS_DIR_ARG)
        .help("Directory with locally available calibration files [default: data/maps]")
        .takes_value(true)
        .long("maps-dir")
}

fn base_url_arg<'a, 'b>() -> Arg<'a, 'b> {
    Arg::with_name(BASE_URL_ARG)
        .help("URL the listing page was saved from, used to resolve its links")
        .required(true)
        .takes_value(true)
        .long("base-url")
}

fn mb_arg<'a, 'b>(name: &'a str, long: &'a str, help: &'a str) -> Arg<'a, 'b> {
    Arg::with_name(name)
        .help(help)
        .validator(is_numeric_min(1))
        .takes_value(true)
        .long(long)
}

fn value_arg<'a, 'b>(name: &'a str, long: &'a str, help: &'a str) -> Arg<'a, 'b> {
    Arg::with_name(name).help(help).takes_value(true).long(long)
}

fn get_matches() -> ArgMatches<'static> {
    app_from_crate!()
        .setting(AppSettings::GlobalVersion)
        .setting(AppSettings::VersionlessSubcommands)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name(VERBOSE_ARG)
                .help("Log debug output. RUST_LOG takes precedence.")
                .global(true)
                .short("v")
                .long("verbose"),
        )
        .subcommand(
            SubCommand::with_name(LIST_ZIP_CMD)
                .about("Lists the members of remote zip archives without downloading them")
                .arg(input("File with one archive URL per line"))
                .arg(output("CSV file to write `url,filename` rows to"))
                .arg(timeout_arg()),
        )
        .subcommand(
            SubCommand::with_name(CATALOG_HTML_CMD)
                .about("Builds a sheet catalog from a saved HTML listing page")
                .arg(input("Listing page (cp1251)"))
                .arg(output("Catalog JSON to write"))
                .arg(base_url_arg())
                .arg(
                    Arg::with_name(SERIES_ARG)
                        .help("Map series of the listing, `50k` or `100k`")
                        .validator(is_series)
                        .default_value("100k")
                        .takes_value(true)
                        .long("series"),
                )
                .arg(maps_dir_arg()),
        )
        .subcommand(
            SubCommand::with_name(CATALOG_LISTING_CMD)
                .about("Builds a sheet catalog from a zip listing CSV")
                .arg(input("Listing CSV written by list-zip"))
                .arg(output("Catalog JSON to write")),
        )
        .subcommand(
            SubCommand::with_name(DOWNLOAD_ARCHIVES_CMD)
                .about("Extracts sheet images and calibration files from remote archives")
                .arg(input("Catalog JSON with `url` and `filename` per sheet"))
                .arg(raw_dir_arg())
                .arg(timeout_arg()),
        )
        .subcommand(
            SubCommand::with_name(DOWNLOAD_IMAGES_CMD)
                .about("Downloads the image of every catalog entry to <raw-dir>/<id>.jpg")
                .arg(input("Catalog JSON with a `url` per sheet"))
                .arg(raw_dir_arg())
                .arg(timeout_arg()),
        )
        .subcommand(
            SubCommand::with_name(DOWNLOAD_LINKED_CMD)
                .about("Downloads listed sheet images linked from a listing page")
                .arg(input("File with one `<id>.jpg` name per line"))
                .arg(
                    value_arg(PAGE_ARG, "page", "Listing page (cp1251)").required(true),
                )
                .arg(base_url_arg())
                .arg(maps_dir_arg())
                .arg(raw_dir_arg())
                .arg(timeout_arg()),
        )
        .subcommand(
            SubCommand::with_name(DIFF_CATALOGS_CMD)
                .about("Prints the sheets of the first catalog missing from the second")
                .arg(input("Catalog JSON to check"))
                .arg(second_input("Catalog JSON to check against")),
        )
        .subcommand(
            SubCommand::with_name(CHECK_HTML_MAPS_CMD)
                .about("Compares the .jpg links of a page with local calibration files")
                .arg(input("Listing page (cp1251)"))
                .arg(maps_dir_arg()),
        )
        .subcommand(
            SubCommand::with_name(CHECK_PAIRS_CMD)
                .about("Prints images of a zip listing that have no calibration file")
                .arg(input("Listing CSV written by list-zip")),
        )
        .subcommand(
            SubCommand::with_name(CHECK_LISTING_CMD)
                .about("Prints the catalog sheets that also appear in a listing CSV")
                .arg(input("Catalog JSON"))
                .arg(second_input("CSV whose first column holds file names")),
        )
        .subcommand(
            SubCommand::with_name(PROCESS_CMD)
                .about("Georeferences and warps sheet images into web-ready GeoTIFFs")
                .arg(raw_dir_arg())
                .arg(value_arg(
                    EXTENSION_ARG,
                    "extension",
                    "Extension of the images to process [default: gif]",
                ))
                .arg(
                    value_arg(
                        FROM_LIST_ARG,
                        "from-list",
                        "File with image names to process instead of the whole raw directory",
                    )
                    .env("FROM_LIST"),
                )
                .arg(value_arg(
                    SPECIAL_CASES_ARG,
                    "special-cases",
                    "Per-image overrides [default: special_cases.json]",
                ))
                .arg(value_arg(
                    BAD_SHEETS_ARG,
                    "bad-sheets",
                    "Sheet ids to skip [default: bad_sheets.txt]",
                ))
                .arg(value_arg(
                    CATALOG_ARG,
                    "catalog",
                    "Catalog providing the feature properties [default: data/sheet_map.json]",
                ))
                .arg(value_arg(
                    SOURCE_TYPE_ARG,
                    "source-type",
                    "Value of the `source_type` property [default: mapstor]",
                ))
                .arg(value_arg(
                    WORK_DIR_ARG,
                    "work-dir",
                    "Per-sheet intermediate files [default: work]",
                ))
                .arg(value_arg(
                    BOUNDS_DIR_ARG,
                    "bounds-dir",
                    "Sheet boundary GeoJSON sequences [default: bounds]",
                ))
                .arg(value_arg(
                    EXPORT_DIR_ARG,
                    "export-dir",
                    "Published GeoTIFFs [default: export/gtiffs]",
                ))
                .arg(mb_arg(
                    CACHE_MAX_ARG,
                    "cache-max",
                    "GDAL cache (MB) for translate steps [default: 128]",
                ))
                .arg(mb_arg(
                    WARP_CACHE_ARG,
                    "warp-cache",
                    "GDAL cache (MB) for warp steps [default: 1024]",
                ))
                .arg(mb_arg(
                    WARP_MEMORY_ARG,
                    "warp-memory",
                    "gdalwarp working memory (MB) [default: 1024]",
                ))
                .arg(
                    value_arg(
                        THREADS_ARG,
                        "threads",
                        "Warp threads, a number or ALL_CPUS [default: ALL_CPUS]",
                    )
                    .validator(is_thread_count),
                )
                .arg(
                    Arg::with_name(HALT_ON_ERROR_ARG)
                        .help("Stop at the first sheet that fails instead of skipping it")
                        .long("halt-on-error"),
                ),
        )
        .subcommand(
            SubCommand::with_name(ANTIMERIDIAN_CMD)
                .about("Prints split overrides for sheets crossing the 180th meridian")
                .arg(input("File with one image name per line"))
                .arg(raw_dir_arg()),
        )
        .subcommand(
            SubCommand::with_name(TILE_TIFFS_CMD)
                .about("Runs the tiler over every published GeoTIFF")
                .arg(value_arg(
                    TIFFS_DIR_ARG,
                    "tiffs-dir",
                    "Published GeoTIFFs [default: export/gtiffs]",
                ))
                .arg(value_arg(
                    TILES_DIR_ARG,
                    "tiles-dir",
                    "Tiler output directory [default: export/tiles]",
                ))
                .arg(value_arg(
                    TEMP_DIR_ARG,
                    "temp-dir",
                    "Scratch directory [default: temp]",
                ))
                .arg(value_arg(
                    TILER_COMMAND_ARG,
                    "command",
                    "Tiler command with `{tiles_dir}`, `{tiffs_dir}`, `{name}`, `{attribution}`, `{min_zoom}` and `{max_zoom}` placeholders",
                ))
                .arg(value_arg(
                    ATTRIBUTION_ARG,
                    "attribution",
                    "Attribution passed to the tiler [default: Russian Topo Maps]",
                ))
                .arg(
                    value_arg(MIN_ZOOM_ARG, "min-zoom", "The minimum zoom level [default: 15]")
                        .validator(is_zoom),
                )
                .arg(
                    value_arg(MAX_ZOOM_ARG, "max-zoom", "The maximum zoom level [default: 15]")
                        .validator(is_zoom),
                ),
        )
        .get_matches()
}
