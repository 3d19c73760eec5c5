mod args;
mod validators;

use anyhow::{Context, Result};
use args::{Args, Command};
use log::{info, warn};
use std::{collections::BTreeSet, fs, io, path::Path, time::Duration};
use tokio::task::spawn_blocking;

use topo_sheets::{
    antimeridian::antimeridian_overrides,
    catalog::missing_sheets,
    fetch,
    listing::{self, ZipListingEntry},
    process::process_sheets,
    tiling::tile_tiffs,
    Catalog, DownloadConfig, GkZone, HtmlCatalogConfig, ProcessConfig, ProcessRunner,
    TilingConfig, ZoneProjection,
};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match args.command {
        Command::ListZip {
            urls,
            output,
            timeout,
        } => spawn_blocking(move || list_zip(&urls, &output, timeout)).await?,
        Command::CatalogHtml(cfg) => catalog_html(&cfg),
        Command::CatalogListing { listing, output } => catalog_listing(&listing, &output),
        Command::DownloadArchives { catalog, download } => {
            spawn_blocking(move || download_archives(&catalog, &download)).await?
        }
        Command::DownloadImages { catalog, download } => {
            let catalog = load_catalog(&catalog)?;
            fetch::download_images(&catalog, &download).await?.log();
            Ok(())
        }
        Command::DownloadLinked(cfg) => {
            fetch::download_linked(&cfg).await?.log();
            Ok(())
        }
        Command::DiffCatalogs { a, b } => diff_catalogs(&a, &b),
        Command::CheckHtmlMaps { page, maps_dir } => check_html_maps(&page, &maps_dir),
        Command::CheckPairs { listing } => check_pairs(&listing),
        Command::CheckListing { info, listing } => check_listing(&info, &listing),
        Command::Process(cfg) => spawn_blocking(move || process(&cfg)).await?,
        Command::Antimeridian { list, raw_dir } => {
            spawn_blocking(move || antimeridian(&list, &raw_dir)).await?
        }
        Command::TileTiffs(cfg) => spawn_blocking(move || tile(&cfg)).await?,
    }
}

fn load_catalog(path: &Path) -> Result<Catalog> {
    Catalog::load(path).with_context(|| format!("failed reading catalog {}", path.display()))
}

fn save_catalog(catalog: &Catalog, path: &Path) -> Result<()> {
    catalog
        .save(path)
        .with_context(|| format!("failed writing catalog {}", path.display()))?;
    info!("Wrote {} sheets to {}", catalog.len(), path.display());
    Ok(())
}

fn list_zip(urls: &Path, output: &Path, timeout: Duration) -> Result<()> {
    let urls = listing::read_list(urls)
        .with_context(|| format!("failed reading {}", urls.display()))?;
    let client = fetch::blocking_client(timeout)?;

    let entries: Vec<ZipListingEntry> = fetch::list_zip_contents(&client, &urls);

    let file = fs::File::create(output)
        .with_context(|| format!("failed creating {}", output.display()))?;
    listing::write_zip_listing(file, &entries)
        .with_context(|| format!("failed writing {}", output.display()))?;
    info!("Listed {} archive members", entries.len());
    Ok(())
}

fn catalog_html(cfg: &HtmlCatalogConfig) -> Result<()> {
    let page = listing::read_cp1251(&cfg.page)
        .with_context(|| format!("failed reading {}", cfg.page.display()))?;

    let map_stems = match listing::dir_stems(&cfg.maps_dir, "map") {
        Ok(stems) => stems.iter().map(|s| s.to_lowercase()).collect(),
        Err(e) => {
            warn!("cannot read {}: {}", cfg.maps_dir.display(), e);
            BTreeSet::new()
        }
    };

    let catalog = listing::html_catalog(&page, cfg.series, &cfg.base_url, &map_stems);
    save_catalog(&catalog, &cfg.output)
}

fn catalog_listing(input: &Path, output: &Path) -> Result<()> {
    let entries = listing::read_zip_listing(input)
        .with_context(|| format!("failed reading {}", input.display()))?;
    save_catalog(&listing::listing_catalog(&entries), output)
}

fn download_archives(catalog: &Path, cfg: &DownloadConfig) -> Result<()> {
    let catalog = load_catalog(catalog)?;
    let client = fetch::blocking_client(cfg.timeout)?;
    fetch::download_archives(&client, &catalog, cfg)?.log();
    Ok(())
}

fn diff_catalogs(a: &Path, b: &Path) -> Result<()> {
    let missing = missing_sheets(&load_catalog(a)?, &load_catalog(b)?);

    for sheet in &missing {
        println!(
            "{}\t{}\tmap_exists={}",
            sheet.member,
            sheet.owner,
            sheet
                .map_exists
                .map_or_else(|| "unknown".to_owned(), |m| m.to_string())
        );
    }
    eprintln!("{} sheets missing", missing.len());
    Ok(())
}

fn check_html_maps(page: &Path, maps_dir: &Path) -> Result<()> {
    let html = listing::read_cp1251(page)
        .with_context(|| format!("failed reading {}", page.display()))?;
    let jpgs = listing::html_jpg_stems(&html);
    let maps = listing::dir_stems(maps_dir, "map")
        .with_context(|| format!("failed reading {}", maps_dir.display()))?;

    let without_map: Vec<_> = jpgs.difference(&maps).collect();
    let without_jpg: Vec<_> = maps.difference(&jpgs).collect();

    println!("{} linked images without a calibration file:", without_map.len());
    for stem in &without_map {
        println!("  {}", stem);
    }
    println!("{} calibration files without a linked image:", without_jpg.len());
    for stem in &without_jpg {
        println!("  {}", stem);
    }
    Ok(())
}

fn check_pairs(input: &Path) -> Result<()> {
    let entries = listing::read_zip_listing(input)
        .with_context(|| format!("failed reading {}", input.display()))?;
    let unpaired = listing::images_without_calibration(&entries);

    for stem in &unpaired {
        println!("{}", stem);
    }
    eprintln!("{} images without calibration file", unpaired.len());
    Ok(())
}

fn check_listing(info: &Path, input: &Path) -> Result<()> {
    let catalog = load_catalog(info)?;
    let stems = listing::listing_stems(input)
        .with_context(|| format!("failed reading {}", input.display()))?;

    let common: Vec<_> = catalog
        .sheets
        .keys()
        .filter(|id| stems.contains(*id))
        .collect();
    for id in &common {
        println!("{}", id);
    }
    eprintln!("{} of {} sheets found in listing", common.len(), catalog.len());
    Ok(())
}

fn process(cfg: &ProcessConfig) -> Result<()> {
    let summary = process_sheets(cfg, &ProcessRunner, |geometry| {
        ZoneProjection::new(GkZone::for_ring(&geometry.cutline))
    })?;

    if !summary.failed_sheets.is_empty() {
        warn!("failed sheets: {}", summary.failed_sheets.join(", "));
    }
    Ok(())
}

fn antimeridian(list: &Path, raw_dir: &Path) -> Result<()> {
    let names = listing::read_list(list)
        .with_context(|| format!("failed reading {}", list.display()))?;
    let overrides = antimeridian_overrides(&names, raw_dir)?;

    serde_json::to_writer_pretty(io::stdout().lock(), &overrides)
        .context("failed writing overrides")?;
    println!();
    Ok(())
}

fn tile(cfg: &TilingConfig) -> Result<()> {
    let summary = tile_tiffs(cfg, &ProcessRunner)?;

    info!(
        "Tiled {} of {} sheets, {} failed",
        summary.succeeded,
        summary.total,
        summary.failed_sheets.len()
    );
    if !summary.failed_sheets.is_empty() {
        warn!("failed sheets: {}", summary.failed_sheets.join(", "));
    }
    Ok(())
}
