use crossbeam::channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::thread::JoinHandle;
use std::time::Duration;

use super::background::{BackgroundSource, ExtractMode};
use super::compositor::FrameCompositor;
use crate::audio::features::{preview_spectrum, Spectrum};
use crate::config::BarStyle;
use crate::process::{CancelToken, Toolchain};
use crate::request::PreviewRequest;

pub const DEFAULT_CADENCE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug)]
pub enum PreviewEvent {
    Ready(RgbImage),
}

/// Cheap handle for enqueuing preview requests from any thread.
#[derive(Clone)]
pub struct PreviewSender(Sender<PreviewRequest>);

impl PreviewSender {
    pub fn enqueue(&self, request: PreviewRequest) {
        // only fails once the pipeline is gone
        let _ = self.0.send(request);
    }
}

/// Coalescing preview renderer: each consumption step renders only the
/// newest queued request with a synthetic spectrum.
pub struct PreviewPipeline {
    requests: Receiver<PreviewRequest>,
    sender: Sender<PreviewRequest>,
    background: BackgroundSource,
    compositor: FrameCompositor,
    spectrum: Spectrum,
    rendered: usize,
}

impl PreviewPipeline {
    pub fn new(tools: Toolchain, bars: BarStyle) -> Self {
        let (sender, requests) = unbounded();
        Self {
            requests,
            sender,
            background: BackgroundSource::new(tools, "preview"),
            compositor: FrameCompositor::new(bars),
            spectrum: preview_spectrum(),
            rendered: 0,
        }
    }

    pub fn sender(&self) -> PreviewSender {
        PreviewSender(self.sender.clone())
    }

    pub fn enqueue(&self, request: PreviewRequest) {
        let _ = self.sender.send(request);
    }

    /// One consumption step. `None` when nothing was queued.
    pub fn process(&mut self) -> Option<RgbImage> {
        let mut request = self.requests.try_recv().ok()?;
        let mut discarded = 0usize;
        while let Ok(newer) = self.requests.try_recv() {
            request = newer;
            discarded += 1;
        }
        if discarded > 0 {
            log::debug!("Preview: skipped {discarded} stale request(s)");
        }
        Some(self.render(&request))
    }

    pub fn render(&mut self, request: &PreviewRequest) -> RgbImage {
        let frames = self
            .background
            .resolve(request.background_path(), ExtractMode::Preview, &CancelToken::new());
        let frame = self
            .compositor
            .composite(frames.first(), &request.style, &self.spectrum);
        self.rendered += 1;
        scale_to_fit(&frame, request.preview_width, request.preview_height)
    }

    /// Previews rendered so far.
    pub fn rendered(&self) -> usize {
        self.rendered
    }

    /// Run the consumption step every `cadence` on a dedicated thread.
    pub fn spawn(mut self, cadence: Duration, events: Sender<PreviewEvent>) -> std::io::Result<PreviewWorker> {
        let sender = self.sender();
        let (shutdown, shutdown_rx) = bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name("preview".into())
            .spawn(move || loop {
                match shutdown_rx.recv_timeout(cadence) {
                    Err(RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
                if let Some(image) = self.process() {
                    if events.send(PreviewEvent::Ready(image)).is_err() {
                        break;
                    }
                }
            })?;
        Ok(PreviewWorker {
            sender,
            shutdown,
            thread,
        })
    }
}

pub struct PreviewWorker {
    sender: PreviewSender,
    shutdown: Sender<()>,
    thread: JoinHandle<()>,
}

impl PreviewWorker {
    pub fn enqueue(&self, request: PreviewRequest) {
        self.sender.enqueue(request);
    }

    pub fn shutdown(self) {
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            log::warn!("Preview worker panicked");
        }
    }
}

/// Largest size within `max_width`x`max_height` keeping the aspect ratio.
pub fn fit_within(width: u32, height: u32, max_width: u32, max_height: u32) -> (u32, u32) {
    if width == 0 || height == 0 || max_width == 0 || max_height == 0 {
        return (width.max(1), height.max(1));
    }
    let scale = (max_width as f32 / width as f32).min(max_height as f32 / height as f32);
    let w = ((width as f32 * scale).round() as u32).clamp(1, max_width);
    let h = ((height as f32 * scale).round() as u32).clamp(1, max_height);
    (w, h)
}

pub fn scale_to_fit(image: &RgbImage, max_width: u32, max_height: u32) -> RgbImage {
    let (w, h) = fit_within(image.width(), image.height(), max_width, max_height);
    if (w, h) == image.dimensions() {
        return image.clone();
    }
    imageops::resize(image, w, h, FilterType::CatmullRom)
}
