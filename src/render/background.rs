use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::error::{RenderError, RenderResult};
use crate::process::{wait_or_kill, CancelToken, Toolchain};
use crate::scratch::ScratchDir;

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mkv", "mov", "webm", "avi", "m4v"];

/// Seek position for the representative preview frame.
const PREVIEW_SEEK_SECS: u32 = 10;

/// How much of a video background to extract.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ExtractMode {
    /// A single representative frame.
    Preview,
    /// Every frame, resampled to the output frame rate.
    Full { fps: f32 },
}

/// Ordered raster paths for one background. Empty means solid black.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackgroundFrames {
    frames: Vec<PathBuf>,
}

impl BackgroundFrames {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_paths(frames: Vec<PathBuf>) -> Self {
        Self { frames }
    }

    pub fn frames(&self) -> &[PathBuf] {
        &self.frames
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn first(&self) -> Option<&Path> {
        self.frames.first().map(PathBuf::as_path)
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.frames.get(index).map(PathBuf::as_path)
    }
}

pub fn is_video(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| VIDEO_EXTENSIONS.iter().any(|v| v.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Extracted preview frame name, unique per source path so the raster cache
/// never confuses two videos sharing a file stem.
fn preview_file_name(video: &Path) -> String {
    let stem = video
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "background".into());
    let mut hasher = DefaultHasher::new();
    video.hash(&mut hasher);
    format!("preview-{stem}-{:016x}.jpg", hasher.finish())
}

/// Resolves a background spec into frame paths, extracting video frames into
/// a scratch directory owned by this source.
pub struct BackgroundSource {
    tools: Toolchain,
    label: &'static str,
    scratch: Option<ScratchDir>,
}

impl BackgroundSource {
    /// `label` names the scratch directory, so concurrent lanes never share one.
    pub fn new(tools: Toolchain, label: &'static str) -> Self {
        Self {
            tools,
            label,
            scratch: None,
        }
    }

    /// Resolve `spec`. Extraction failures degrade to an empty set.
    pub fn resolve(&mut self, spec: Option<&Path>, mode: ExtractMode, cancel: &CancelToken) -> BackgroundFrames {
        let Some(path) = spec.filter(|p| !p.as_os_str().is_empty()) else {
            return BackgroundFrames::empty();
        };
        if !is_video(path) {
            return BackgroundFrames {
                frames: vec![path.to_path_buf()],
            };
        }

        match self.extract(path, mode, cancel) {
            Ok(frames) => {
                log::info!("Background video {}: {} frame(s)", path.display(), frames.len());
                BackgroundFrames { frames }
            }
            Err(err) => {
                log::warn!("{err}; using a solid background");
                self.close();
                BackgroundFrames::empty()
            }
        }
    }

    fn extract(&mut self, video: &Path, mode: ExtractMode, cancel: &CancelToken) -> RenderResult<Vec<PathBuf>> {
        self.scratch = None;
        let scratch = ScratchDir::recreate(self.label)
            .map_err(|e| RenderError::extraction(format!("failed to create scratch directory: {e}")))?;

        match mode {
            ExtractMode::Preview => {
                let target = scratch.path().join(preview_file_name(video));
                let seeked = self.run_extraction(
                    video,
                    &["-ss", &PREVIEW_SEEK_SECS.to_string(), "-vframes", "1"],
                    &target,
                    cancel,
                );
                if matches!(seeked, Err(RenderError::Cancelled)) {
                    return Err(RenderError::Cancelled);
                }
                if scratch.sorted_files()?.is_empty() {
                    // clip shorter than the seek position
                    if let Err(err) = seeked {
                        log::debug!("Seeked preview extraction failed: {err}");
                    }
                    self.run_extraction(video, &["-vframes", "1"], &target, cancel)?;
                }
            }
            ExtractMode::Full { fps } => {
                let target = scratch.path().join("frame%06d.jpg");
                self.run_extraction(video, &["-vf", &format!("fps={fps}")], &target, cancel)?;
            }
        }

        let frames = scratch.sorted_files()?;
        self.scratch = Some(scratch);
        if frames.is_empty() {
            return Err(RenderError::extraction(format!(
                "no frames extracted from {}",
                video.display()
            )));
        }
        Ok(frames)
    }

    fn run_extraction(&self, video: &Path, options: &[&str], target: &Path, cancel: &CancelToken) -> RenderResult<()> {
        let mut cmd = self.tools.command();
        cmd.args(["-hide_banner", "-loglevel", "error"])
            .arg("-i")
            .arg(video)
            .arg("-y")
            .args(options)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        log::debug!("Extracting background frames: {:?}", cmd);

        let mut child = cmd
            .spawn()
            .map_err(|e| RenderError::extraction(format!("failed to spawn frame extraction: {e}")))?;
        match wait_or_kill(&mut child, cancel)? {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(RenderError::extraction(format!(
                "frame extraction exited with {status}"
            ))),
            None => Err(RenderError::Cancelled),
        }
    }

    /// Delete the scratch directory holding extracted frames.
    pub fn close(&mut self) {
        self.scratch = None;
    }
}

/// Most recent decoded-and-resized background raster, keyed by
/// (path, resolution). The only cross-call cache in the pipeline.
#[derive(Default)]
pub struct RasterCache {
    key: Option<(PathBuf, u32, u32)>,
    image: Option<RgbImage>,
    loads: usize,
}

impl RasterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Background raster of exactly `width`x`height`: black when `frame` is
    /// `None` or undecodable, otherwise the (cached) resized image.
    pub fn raster(&mut self, frame: Option<&Path>, width: u32, height: u32) -> RgbImage {
        let Some(path) = frame else {
            return RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
        };

        let hit = matches!(&self.key, Some((p, w, h)) if p == path && *w == width && *h == height);
        if hit {
            if let Some(image) = &self.image {
                return image.clone();
            }
        }

        self.loads += 1;
        match image::open(path) {
            Ok(img) => {
                let mut rgb = img.to_rgb8();
                if rgb.dimensions() != (width, height) {
                    rgb = imageops::resize(&rgb, width, height, FilterType::Lanczos3);
                }
                self.key = Some((path.to_path_buf(), width, height));
                self.image = Some(rgb.clone());
                rgb
            }
            Err(err) => {
                log::warn!("Failed to load background {}: {}", path.display(), err);
                self.key = None;
                self.image = None;
                RgbImage::from_pixel(width, height, Rgb([0, 0, 0]))
            }
        }
    }

    /// Number of decode/resize passes performed so far.
    pub fn loads(&self) -> usize {
        self.loads
    }
}
