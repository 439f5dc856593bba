use crossbeam::channel::{unbounded, Receiver, Sender};
use image::RgbImage;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::background::{BackgroundFrames, BackgroundSource, ExtractMode};
use super::compositor::FrameCompositor;
use crate::audio::analysis::SpectrumAnalyzer;
use crate::audio::decode::{AudioDecoder, PcmBuffer};
use crate::config::{BackgroundLoop, RenderOptions};
use crate::encode::ffmpeg::{select_audio_codec, EncodeJob, EncoderSink};
use crate::encode::FrameSink;
use crate::error::{RenderError, RenderResult};
use crate::process::{CancelToken, Toolchain};
use crate::request::{FrameStyle, RenderRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    LoadingBackground,
    LoadingAudio,
    Encoding,
    Finalizing,
    Done,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RenderEvent {
    State(RenderState),
    Progress { percent: u8, status: String },
    Completed { output: PathBuf },
    Failed { status: String, detail: String },
}

/// Where each output frame's background comes from.
pub enum BackgroundPlan {
    /// Background and title composited once, reused for every frame.
    Static(RgbImage),
    /// A video background, advancing one extracted frame per output frame.
    Sequence {
        frames: BackgroundFrames,
        next: usize,
        policy: BackgroundLoop,
    },
}

impl BackgroundPlan {
    pub fn new(
        frames: BackgroundFrames,
        compositor: &mut FrameCompositor,
        style: &FrameStyle,
        policy: BackgroundLoop,
    ) -> Self {
        if frames.len() < 2 {
            Self::Static(compositor.base_frame(frames.first(), style))
        } else {
            Self::Sequence {
                frames,
                next: 0,
                policy,
            }
        }
    }

    fn next_base(&mut self, compositor: &mut FrameCompositor, style: &FrameStyle) -> RgbImage {
        match self {
            Self::Static(image) => image.clone(),
            Self::Sequence { frames, next, policy } => {
                let index = sequence_index(*next, frames.len(), *policy);
                *next += 1;
                compositor.base_frame(frames.get(index), style)
            }
        }
    }
}

/// Background frame used for output frame `n`.
fn sequence_index(n: usize, len: usize, policy: BackgroundLoop) -> usize {
    match policy {
        BackgroundLoop::Freeze => n.min(len.saturating_sub(1)),
        BackgroundLoop::Wrap => n % len.max(1),
    }
}

/// One full render: decode, analyze, composite, encode.
pub struct RenderPipeline {
    tools: Toolchain,
    options: RenderOptions,
    events: Sender<RenderEvent>,
    cancel: CancelToken,
    state: RenderState,
    progress: Option<u8>,
}

impl RenderPipeline {
    pub fn new(tools: Toolchain, options: RenderOptions, events: Sender<RenderEvent>, cancel: CancelToken) -> Self {
        Self {
            tools,
            options,
            events,
            cancel,
            state: RenderState::Idle,
            progress: None,
        }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    /// Render `request`, emitting state, progress and a final
    /// completion or failure notification.
    pub fn run(&mut self, request: &RenderRequest) -> RenderResult<PathBuf> {
        match self.execute(request) {
            Ok(()) => {
                self.enter(RenderState::Done);
                log::info!("Done! Output: {}", request.output.display());
                self.send(RenderEvent::Completed {
                    output: request.output.clone(),
                });
                Ok(request.output.clone())
            }
            Err(err) => {
                self.enter(RenderState::Failed);
                let mut detail = err.to_string();
                if let Some(diag) = err.diagnostics().filter(|d| !d.trim().is_empty()) {
                    detail.push('\n');
                    detail.push_str(diag.trim_end());
                }
                log::error!("Render failed: {detail}");
                self.send(RenderEvent::Failed {
                    status: err.status(),
                    detail,
                });
                Err(err)
            }
        }
    }

    fn execute(&mut self, request: &RenderRequest) -> RenderResult<()> {
        request.validate()?;
        self.progress = None;

        self.enter(RenderState::LoadingBackground);
        self.report(0, "Loading background image…".into());
        // dropping `background` removes extracted frames on every exit path
        let mut background = BackgroundSource::new(self.tools.clone(), "render");
        let frames = background.resolve(
            request.background_path(),
            ExtractMode::Full { fps: request.fps },
            &self.cancel,
        );
        self.check_cancel()?;
        let mut compositor = FrameCompositor::new(self.options.bars.clone());
        let mut plan = BackgroundPlan::new(frames, &mut compositor, &request.style, self.options.background_loop);

        self.enter(RenderState::LoadingAudio);
        self.send(RenderEvent::Progress {
            percent: 0,
            status: "Loading audio file…".into(),
        });
        let pcm = AudioDecoder::new(self.tools.clone()).decode(&request.input, &self.cancel)?;

        self.enter(RenderState::Encoding);
        let job = EncodeJob {
            width: request.style.width,
            height: request.style.height,
            fps: request.fps,
            input_audio: request.input.clone(),
            output: request.output.clone(),
            audio_codec: select_audio_codec(&self.tools, &self.options.encode.audio_codec),
            settings: self.options.encode.clone(),
        };
        let mut sink = EncoderSink::start(&self.tools, &job, &self.cancel)?;
        if let Err(err) = self.encode(&pcm, &request.style, &mut plan, &mut compositor, &mut sink) {
            sink.kill();
            return Err(err);
        }

        self.enter(RenderState::Finalizing);
        sink.finish()?;
        background.close();
        self.report(100, "100%".into());
        Ok(())
    }

    /// Stream one composited frame per analysis window into `sink`.
    /// Returns the number of frames written.
    pub fn encode<S: FrameSink>(
        &mut self,
        pcm: &PcmBuffer,
        style: &FrameStyle,
        plan: &mut BackgroundPlan,
        compositor: &mut FrameCompositor,
        sink: &mut S,
    ) -> RenderResult<usize> {
        let window = self.options.samples_per_frame.max(1);
        let mut analyzer = SpectrumAnalyzer::new(window, self.options.smooth_down, self.options.smooth_up);
        let total = pcm.len();
        let mut written = 0;

        log::info!(
            "Encoding {} frames of {} samples ({:.1}s)",
            total.div_ceil(window),
            window,
            pcm.duration_secs()
        );

        for offset in (0..total).step_by(window) {
            self.check_cancel()?;
            let spectrum = analyzer.analyze(pcm.samples(), offset);
            let mut frame = plan.next_base(compositor, style);
            compositor.draw_bars(&mut frame, spectrum, style.bar_color);
            sink.write_frame(frame.as_raw())?;
            written += 1;

            let percent = (offset as f64 / total as f64 * 100.0).floor() as u8;
            self.report(percent, format!("{percent}%"));
        }
        Ok(written)
    }

    fn check_cancel(&self) -> RenderResult<()> {
        if self.cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        Ok(())
    }

    fn enter(&mut self, next: RenderState) {
        log::debug!("Render state: {:?} -> {:?}", self.state, next);
        self.state = next;
        self.send(RenderEvent::State(next));
    }

    /// Emit progress only when it moves forward.
    fn report(&mut self, percent: u8, status: String) {
        if self.progress.is_some_and(|p| percent <= p) {
            return;
        }
        self.progress = Some(percent);
        self.send(RenderEvent::Progress { percent, status });
    }

    fn send(&self, event: RenderEvent) {
        // a dropped receiver just means nobody is listening
        let _ = self.events.send(event);
    }
}

/// The render lane: at most one render at a time, each on its own thread.
pub struct RenderLane {
    tools: Toolchain,
    busy: Arc<AtomicBool>,
}

pub struct RenderHandle {
    events: Receiver<RenderEvent>,
    cancel: CancelToken,
    thread: JoinHandle<RenderResult<PathBuf>>,
}

struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl RenderLane {
    pub fn new(tools: Toolchain) -> Self {
        Self {
            tools,
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Start rendering `request`, or fail with [`RenderError::Busy`].
    pub fn submit(&self, request: RenderRequest, options: RenderOptions) -> RenderResult<RenderHandle> {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(RenderError::Busy);
        }
        let guard = BusyGuard(self.busy.clone());

        let (tx, rx) = unbounded();
        let cancel = CancelToken::new();
        let worker_cancel = cancel.clone();
        let tools = self.tools.clone();

        let thread = std::thread::Builder::new()
            .name("render".into())
            .spawn(move || {
                let _guard = guard;
                RenderPipeline::new(tools, options, tx, worker_cancel).run(&request)
            })?;

        Ok(RenderHandle {
            events: rx,
            cancel,
            thread,
        })
    }
}

impl RenderHandle {
    pub fn events(&self) -> &Receiver<RenderEvent> {
        &self.events
    }

    /// Request cooperative cancellation; subprocesses are killed.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    pub fn join(self) -> RenderResult<PathBuf> {
        self.thread
            .join()
            .unwrap_or_else(|_| Err(RenderError::Io(std::io::Error::other("render thread panicked"))))
    }
}
