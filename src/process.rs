use anyhow::Context;
use log::{error, info, warn};
use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};
use walkdir::WalkDir;

use crate::catalog::Catalog;
use crate::config::{FailurePolicy, ProcessConfig};
use crate::error::Result;
use crate::gk::Projection;
use crate::listing::read_list;
use crate::pipeline::{SheetJob, SheetPipeline, DEFAULT_JPEG_QUALITY};
use crate::sheet::{expand_parts, load_special_cases, SheetGeometry, SheetOverride};
use crate::tools::ToolRunner;

/// Outcome of a batch run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchSummary {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failed_sheets: Vec<String>,
}

/// Images to process: the names in `from_list` relative to the raw
/// directory, or every image with the configured extension below it.
pub fn find_images(cfg: &ProcessConfig) -> Result<Vec<PathBuf>> {
    if let Some(list) = &cfg.from_list {
        return Ok(read_list(list)?
            .iter()
            .map(|name| cfg.raw_dir.join(name))
            .collect());
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(&cfg.raw_dir).sort_by_file_name() {
        let entry = entry.map_err(std::io::Error::from)?;
        let path = entry.path();
        if entry.file_type().is_file()
            && path.extension().map_or(false, |e| e == cfg.extension.as_str())
        {
            images.push(path.to_owned());
        }
    }
    Ok(images)
}

/// Sheet ids that are known to be unprocessable; a missing file means none.
pub fn read_bad_sheets(path: &Path) -> Result<HashSet<String>> {
    if !path.exists() {
        return Ok(HashSet::new());
    }
    Ok(read_list(path)?.into_iter().collect())
}

/// Resolves the geometry of one sheet and collects its feature properties.
///
/// This reads the calibration file (unless the override carries corner
/// GCPs), so an unsupported datum is reported here, before any external
/// tool is run.
pub fn prepare_job(
    id: &str,
    image: &Path,
    over: &SheetOverride,
    record_id: &str,
    catalog: &Catalog,
    source_type: &str,
) -> Result<SheetJob> {
    let geometry = SheetGeometry::resolve(image, over)?;

    let mut properties = catalog
        .get(record_id)
        .map(|r| r.properties())
        .unwrap_or_default();
    properties.insert("source_type".into(), source_type.into());
    if let Some(title) = &geometry.title {
        properties.insert("maptitle".into(), title.as_str().into());
    }

    Ok(SheetJob {
        id: id.to_owned(),
        image: image.to_owned(),
        geometry,
        properties,
        jpeg_quality: over.jpeg_export_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
    })
}

fn process_sheet<P, R, F>(
    cfg: &ProcessConfig,
    job: &SheetJob,
    runner: &R,
    projection_for: &F,
) -> Result<()>
where
    P: Projection,
    R: ToolRunner,
    F: Fn(&SheetGeometry) -> Result<P>,
{
    let projection = projection_for(&job.geometry)?;
    info!("{}: working CRS {}", job.id, projection.definition());

    SheetPipeline::new(&cfg.gdal, &projection, runner).run(job, &cfg.layout.sheet(&job.id))?;
    Ok(())
}

/// Runs the warp pipeline over all images of a batch.
///
/// `projection_for` picks the working projection of a sheet from its
/// geometry. With [`FailurePolicy::Halt`] the first failing sheet aborts the
/// batch; otherwise failures are logged and counted.
pub fn process_sheets<P, R, F>(
    cfg: &ProcessConfig,
    runner: &R,
    projection_for: F,
) -> anyhow::Result<BatchSummary>
where
    P: Projection,
    R: ToolRunner,
    F: Fn(&SheetGeometry) -> Result<P>,
{
    let images = find_images(cfg).context("failed listing images")?;
    info!("Found {} {} files", images.len(), cfg.extension);

    let special_cases = load_special_cases(&cfg.special_cases).with_context(|| {
        format!("failed reading special cases from {}", cfg.special_cases.display())
    })?;
    let bad_sheets = read_bad_sheets(&cfg.bad_sheets).context("failed reading bad sheets")?;

    let catalog = if cfg.catalog.exists() {
        Catalog::load(&cfg.catalog)
            .with_context(|| format!("failed reading catalog {}", cfg.catalog.display()))?
    } else {
        warn!("catalog {} not found, sheets get no properties", cfg.catalog.display());
        Catalog::new()
    };

    let total = images.len();
    let mut summary = BatchSummary::default();

    for image in &images {
        let name = match image.file_name().and_then(|n| n.to_str()) {
            Some(n) => n,
            None => continue,
        };
        info!(
            "==========  Processed: {}/{} Success: {} Failed: {} processing {} ==========",
            summary.processed, total, summary.succeeded, summary.failed, name
        );

        let id = match image.file_stem().and_then(|s| s.to_str()) {
            Some(s) => s,
            None => continue,
        };
        if bad_sheets.contains(id) {
            info!("skipping known bad sheet {}", id);
            continue;
        }
        if catalog.get(id).is_none() && !catalog.is_empty() {
            warn!("{} is not in the catalog", id);
        }

        let over = special_cases.get(name).cloned().unwrap_or_default();

        for (sheet_id, sheet_over) in expand_parts(id, &over) {
            let res = prepare_job(&sheet_id, image, &sheet_over, id, &catalog, &cfg.source_type)
                .and_then(|job| process_sheet(cfg, &job, runner, &projection_for));
            summary.processed += 1;

            match res {
                Ok(()) => summary.succeeded += 1,
                Err(e) => {
                    error!("processing {} failed: {}", sheet_id, e);
                    summary.failed += 1;
                    summary.failed_sheets.push(sheet_id.clone());

                    if cfg.failure_policy == FailurePolicy::Halt {
                        return Err(anyhow::Error::new(e)
                            .context(format!("processing {} failed", image.display())));
                    }
                }
            }
        }
    }

    info!(
        "Processed {} images, failed_count {}, success_count {}",
        summary.processed, summary.failed, summary.succeeded
    );

    Ok(summary)
}
