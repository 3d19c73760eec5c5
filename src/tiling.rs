use anyhow::{anyhow, Context, Result};
use log::{error, info};
use maplit::hashmap;
use std::{fs, path::Path};
use strfmt::strfmt;

use crate::config::TilingConfig;
use crate::tools::{ToolCommand, ToolRunner};

/// Outcome of a tiling run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TilingSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed_sheets: Vec<String>,
}

/// Fills in the tiler command template for one sheet.
///
/// The template is split on whitespace before placeholders are replaced,
/// so substituted values never break into several arguments.
pub fn tiler_command(cfg: &TilingConfig, tiffs_dir: &Path, name: &str) -> Result<ToolCommand> {
    let vars = hashmap! {
        "tiles_dir".to_owned() => cfg.tiles_dir.display().to_string(),
        "tiffs_dir".to_owned() => tiffs_dir.display().to_string(),
        "name".to_owned() => name.to_owned(),
        "attribution".to_owned() => cfg.attribution.clone(),
        "min_zoom".to_owned() => cfg.min_zoom.to_string(),
        "max_zoom".to_owned() => cfg.max_zoom.to_string(),
    };

    let mut tokens = cfg.command.split_whitespace();
    let program = tokens.next().ok_or_else(|| anyhow!("tiler command is empty"))?;

    let args = tokens
        .map(|t| strfmt(t, &vars))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("failed formatting tiler command")?;

    Ok(ToolCommand::new(program).args(args))
}

fn tile_one<R: ToolRunner>(cfg: &TilingConfig, runner: &R, tiff: &Path, name: &str) -> Result<()> {
    let sheet_dir = cfg.temp_dir.join(name);
    fs::create_dir_all(&sheet_dir)
        .with_context(|| format!("failed creating {}", sheet_dir.display()))?;

    let file_name = tiff
        .file_name()
        .ok_or_else(|| anyhow!("{} has no file name", tiff.display()))?;
    fs::copy(tiff, sheet_dir.join(file_name))
        .with_context(|| format!("failed copying {}", tiff.display()))?;

    runner.run(&tiler_command(cfg, &sheet_dir, name)?)?;

    fs::remove_dir_all(&sheet_dir)
        .with_context(|| format!("failed removing {}", sheet_dir.display()))?;
    Ok(())
}

/// Tiles every GeoTIFF of the export directory, one sheet at a time.
pub fn tile_tiffs<R: ToolRunner>(cfg: &TilingConfig, runner: &R) -> Result<TilingSummary> {
    let mut tiffs = Vec::new();
    for entry in fs::read_dir(&cfg.tiffs_dir)
        .with_context(|| format!("failed reading {}", cfg.tiffs_dir.display()))?
    {
        let path = entry?.path();
        if path.extension().map_or(false, |e| e == "tif") {
            tiffs.push(path);
        }
    }
    tiffs.sort();

    let mut summary = TilingSummary {
        total: tiffs.len(),
        ..Default::default()
    };

    for (i, tiff) in tiffs.iter().enumerate() {
        let name = tiff
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match tile_one(cfg, runner, tiff, &name) {
            Ok(()) => summary.succeeded += 1,
            Err(e) => {
                error!("Failed to tile {}: {:#}", name, e);
                summary.failed_sheets.push(name);
            }
        }

        info!(
            "Progress: {:.2}% ({}/{})",
            (i + 1) as f64 / summary.total as f64 * 100.0,
            i + 1,
            summary.total
        );
    }

    Ok(summary)
}
