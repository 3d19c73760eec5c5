//! External GDAL/OGR tool invocations.
//!
//! Commands are assembled as argument vectors and handed to a
//! [`ToolRunner`], so the pipeline can be exercised without the tools.

use log::debug;
use maplit::btreemap;
use std::{
    collections::BTreeMap,
    fmt,
    path::{Path, PathBuf},
    process::Command,
};

use crate::error::{Error, Result};
use crate::gk::{DISPLAY_CRS, PULKOVO_1942_CRS, WGS84_CRS};

/// One external program invocation.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCommand {
    pub program: String,
    pub args: Vec<String>,
    /// The file the command produces.
    pub output: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_owned(),
            args: Vec::new(),
            output: None,
        }
    }

    pub fn arg<S: ToString>(mut self, arg: S) -> Self {
        self.args.push(arg.to_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.args.extend(args.into_iter().map(|a| a.to_string()));
        self
    }

    pub fn path(self, path: &Path) -> Self {
        self.arg(path.display())
    }

    /// `--config KEY VALUE`
    pub fn config(self, key: &str, value: &str) -> Self {
        self.args(["--config", key, value])
    }

    /// `-co KEY=VALUE` for every entry
    pub fn creation_options(mut self, options: &BTreeMap<&str, String>) -> Self {
        for (k, v) in options {
            self = self.arg("-co").arg(format!("{}={}", k, v));
        }
        self
    }

    pub fn output(mut self, path: &Path) -> Self {
        self.output = Some(path.to_owned());
        self
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Runs external commands to completion.
pub trait ToolRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<()>;
}

/// Runs commands as blocking child processes.
#[derive(Clone, Debug, Default)]
pub struct ProcessRunner;

impl ToolRunner for ProcessRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<()> {
        debug!("running {}", cmd);

        let status = Command::new(&cmd.program)
            .args(&cmd.args)
            .env("GDAL_PAM_ENABLED", "NO")
            .status()?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::ToolFailed {
                tool: cmd.program.clone(),
                status: status.to_string(),
            })
        }
    }
}

/// Cache, thread and memory settings passed to GDAL.
#[derive(Clone, Debug, PartialEq)]
pub struct GdalOptions {
    pub translate_cache_mb: u32,
    pub warp_cache_mb: u32,
    pub warp_memory_mb: u32,
    /// A thread count or `ALL_CPUS`.
    pub threads: String,
}

impl Default for GdalOptions {
    fn default() -> Self {
        Self {
            translate_cache_mb: 128,
            warp_cache_mb: 1024,
            warp_memory_mb: 1024,
            threads: "ALL_CPUS".to_owned(),
        }
    }
}

fn warp_creation_options() -> BTreeMap<&'static str, String> {
    btreemap! {
        "COMPRESS" => "DEFLATE".to_owned(),
        "PREDICTOR" => "2".to_owned(),
        "TILED" => "YES".to_owned(),
        "BIGTIFF" => "IF_SAFER".to_owned(),
    }
}

impl GdalOptions {
    fn warp_base(&self) -> ToolCommand {
        ToolCommand::new("gdalwarp")
            .arg("-overwrite")
            .arg("-multi")
            .arg("-wo")
            .arg(format!("NUM_THREADS={}", self.threads))
            .config("GDAL_CACHEMAX", &self.warp_cache_mb.to_string())
            .arg("-wm")
            .arg(self.warp_memory_mb)
            .arg("-dstalpha")
    }

    /// Attaches projected GCPs to an image without resampling.
    pub fn georeference(
        &self,
        src: &Path,
        dst: &Path,
        gcps: &[((f64, f64), (f64, f64))],
        srs: &str,
    ) -> ToolCommand {
        let options = btreemap! {
            "TILED" => "YES".to_owned(),
            "COMPRESS" => "DEFLATE".to_owned(),
            "PREDICTOR" => "2".to_owned(),
        };

        let mut cmd = ToolCommand::new("gdal_translate")
            .creation_options(&options)
            .config("GDAL_CACHEMAX", &self.translate_cache_mb.to_string())
            .config("GDAL_NUM_THREADS", &self.threads);
        for &((col, row), (x, y)) in gcps {
            cmd = cmd.arg("-gcp").args([col, row, x, y]);
        }

        cmd.args(["-a_srs", srs])
            .args(["-of", "GTiff"])
            .path(src)
            .path(dst)
            .output(dst)
    }

    /// Thin-plate-spline resampling onto a regular grid in the working CRS.
    pub fn first_warp(&self, src: &Path, dst: &Path, srs: &str, res: (f64, f64)) -> ToolCommand {
        self.warp_base()
            .arg("-tps")
            .arg("-tr")
            .args([res.0, res.1])
            .args(["-r", "bilinear"])
            .args(["-t_srs", srs])
            .args(["-s_srs", srs])
            .creation_options(&warp_creation_options())
            .path(src)
            .path(dst)
            .output(dst)
    }

    /// Reprojection to the display CRS, cropped to the sheet cutline.
    pub fn final_warp(&self, src: &Path, dst: &Path, srs: &str, cutline: &Path) -> ToolCommand {
        self.warp_base()
            .args(["-r", "bilinear"])
            .args(["-t_srs", DISPLAY_CRS])
            .args(["-s_srs", srs])
            .creation_options(&warp_creation_options())
            .arg("-cutline")
            .path(cutline)
            .args(["-cutline_srs", PULKOVO_1942_CRS])
            .arg("-crop_to_cutline")
            .config("GDALWARP_IGNORE_BAD_CUTLINE", "YES")
            .args(["-wo", "CUTLINE_ALL_TOUCHED=TRUE"])
            .path(src)
            .path(dst)
            .output(dst)
    }

    /// Sheet boundary as newline-delimited GeoJSON in WGS 84.
    pub fn bounds(&self, cutline: &Path, dst: &Path) -> ToolCommand {
        ToolCommand::new("ogr2ogr")
            .args(["-t_srs", WGS84_CRS])
            .args(["-s_srs", PULKOVO_1942_CRS])
            .args(["-f", "GeoJSONSeq"])
            .path(dst)
            .path(cutline)
            .output(dst)
    }

    /// JPEG-compressed GeoTIFF with the alpha band turned into a mask.
    pub fn publish(&self, src: &Path, dst: &Path, jpeg_quality: u8) -> ToolCommand {
        let options = btreemap! {
            "TILED" => "YES".to_owned(),
            "COMPRESS" => "JPEG".to_owned(),
            "JPEG_QUALITY" => jpeg_quality.to_string(),
            "PHOTOMETRIC" => "YCBCR".to_owned(),
        };

        ToolCommand::new("gdal_translate")
            .args(["-b", "1", "-b", "2", "-b", "3", "-mask", "4"])
            .creation_options(&options)
            .config("GDAL_TIFF_INTERNAL_MASK", "YES")
            .config("GDAL_CACHEMAX", &self.translate_cache_mb.to_string())
            .path(src)
            .path(dst)
            .output(dst)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{cell::RefCell, fs};

    /// Records commands and creates their outputs instead of running them.
    #[derive(Default)]
    pub(crate) struct RecordingRunner {
        pub commands: RefCell<Vec<ToolCommand>>,
        pub fail_on: Option<&'static str>,
    }

    impl RecordingRunner {
        pub fn programs(&self) -> Vec<String> {
            self.commands
                .borrow()
                .iter()
                .map(|c| c.program.clone())
                .collect()
        }
    }

    impl ToolRunner for RecordingRunner {
        fn run(&self, cmd: &ToolCommand) -> Result<()> {
            self.commands.borrow_mut().push(cmd.clone());
            if self.fail_on == Some(cmd.program.as_str()) {
                return Err(Error::ToolFailed {
                    tool: cmd.program.clone(),
                    status: "exit status: 1".to_owned(),
                });
            }
            if let Some(out) = &cmd.output {
                fs::write(out, b"")?;
            }
            Ok(())
        }
    }

    #[test]
    fn georeference_command() {
        let cmd = GdalOptions::default().georeference(
            Path::new("w/full.jpg"),
            Path::new("w/georef.tif"),
            &[((1.0, 2.0), (7500000.0, 6200000.5))],
            "+proj=tmerc +lon_0=39",
        );
        assert_eq!(cmd.program, "gdal_translate");
        let line = cmd.to_string();
        assert!(line.contains("-gcp 1 2 7500000 6200000.5"), "{}", line);
        assert!(line.contains("-a_srs \"+proj=tmerc +lon_0=39\""), "{}", line);
        assert!(line.contains("--config GDAL_CACHEMAX 128"), "{}", line);
        assert!(line.ends_with("w/full.jpg w/georef.tif"), "{}", line);
        assert_eq!(cmd.output.as_deref(), Some(Path::new("w/georef.tif")));
    }

    #[test]
    fn final_warp_uses_all_touched_cutline() {
        let cmd = GdalOptions::default().final_warp(
            Path::new("warped.tif"),
            Path::new("final.tif"),
            "SRS",
            Path::new("cutline.geojson"),
        );
        let line = cmd.to_string();
        assert!(line.contains("-t_srs EPSG:3857 -s_srs SRS"), "{}", line);
        assert!(line.contains("-cutline cutline.geojson -cutline_srs EPSG:4284 -crop_to_cutline"));
        assert!(line.contains("-wo CUTLINE_ALL_TOUCHED=TRUE"));
        assert!(line.contains("-dstalpha"));
    }

    #[test]
    fn first_warp_resolution() {
        let cmd = GdalOptions::default().first_warp(
            Path::new("georef.tif"),
            Path::new("warped.tif"),
            "SRS",
            (1.25, 1.5),
        );
        assert!(cmd.to_string().contains("-tps -tr 1.25 1.5 -r bilinear"));
    }
}
