use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::process::{ChildStdin, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

use super::FrameSink;
use crate::config::EncodeSettings;
use crate::error::{RenderError, RenderResult};
use crate::process::{kill_quietly, wait_or_kill_when, CancelToken, Toolchain};

/// Everything the encoder invocation depends on for one render.
#[derive(Clone, Debug)]
pub struct EncodeJob {
    pub width: u32,
    pub height: u32,
    pub fps: f32,
    pub input_audio: PathBuf,
    pub output: PathBuf,
    /// Resolved audio codec, after capability probing.
    pub audio_codec: String,
    pub settings: EncodeSettings,
}

/// Upgrade a plain `aac` request to `libfdk_aac` when the toolchain has it.
pub fn select_audio_codec(tools: &Toolchain, requested: &str) -> String {
    if requested == "aac" && tools.has_encoder("libfdk_aac") {
        log::info!("Using libfdk_aac audio encoder");
        return "libfdk_aac".into();
    }
    requested.to_string()
}

/// The encoder invocation for `job`: raw frames on stdin, audio file second.
pub fn encoder_command(tools: &Toolchain, job: &EncodeJob) -> Command {
    let mut cmd = tools.command();
    cmd.args(["-hide_banner", "-loglevel", "error"])
        .args(["-f", "rawvideo", "-vcodec", "rawvideo"])
        .args(["-s", format!("{}x{}", job.width, job.height).as_str()])
        .args(["-pix_fmt", "rgb24"])
        .args(["-r", job.fps.to_string().as_str()])
        .args(["-i", "-"])
        .arg("-i")
        .arg(&job.input_audio)
        .args(["-acodec", job.audio_codec.as_str()]);
    if !job.audio_codec.starts_with("pcm") {
        cmd.args(["-b:a", job.settings.audio_bitrate.as_str()]);
    }
    cmd.args(["-vcodec", job.settings.video_codec.as_str()])
        .args(["-pix_fmt", job.settings.pix_fmt.as_str()])
        .args(["-preset", job.settings.preset.as_str()])
        .args(["-crf", job.settings.crf.to_string().as_str()]);
    if job.audio_codec == "aac" && has_extension(&job.output, "mp4") {
        cmd.args(["-strict", "-2"]);
    }
    cmd.arg("-y").arg(&job.output);
    cmd
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

/// External encoder fed raw RGB24 frames on stdin, muxing in the original audio.
///
/// The child is owned by a waiter thread that kills it when the render is
/// cancelled or the sink aborts, which also unblocks a stalled write.
pub struct EncoderSink {
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
    waiter: Option<JoinHandle<io::Result<Option<ExitStatus>>>>,
    cancel: CancelToken,
    abort: CancelToken,
    frame_len: usize,
}

impl EncoderSink {
    pub fn start(tools: &Toolchain, job: &EncodeJob, cancel: &CancelToken) -> RenderResult<Self> {
        let mut cmd = encoder_command(tools, job);
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        log::info!("Starting encoder: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            RenderError::encode_start(format!(
                "failed to spawn {} (is it installed?): {e}",
                tools.binary().display()
            ))
        })?;

        let Some(stdin) = child.stdin.take() else {
            kill_quietly(&mut child);
            return Err(RenderError::encode_start("encoder stdin not available"));
        };
        let stderr = child.stderr.take().map(|pipe| {
            std::thread::spawn(move || {
                let mut collected = String::new();
                for line in BufReader::new(pipe).lines().map_while(Result::ok) {
                    log::debug!("encoder: {line}");
                    collected.push_str(&line);
                    collected.push('\n');
                }
                collected
            })
        });

        let abort = CancelToken::new();
        let waiter = {
            let (cancel, abort) = (cancel.clone(), abort.clone());
            std::thread::spawn(move || {
                let mut child = child;
                wait_or_kill_when(&mut child, || cancel.is_cancelled() || abort.is_cancelled())
            })
        };

        log::info!(
            "Encoder started: {}x{} @ {}fps, video={}, audio={}",
            job.width,
            job.height,
            job.fps,
            job.settings.video_codec,
            job.audio_codec
        );

        Ok(Self {
            stdin: Some(stdin),
            stderr,
            waiter: Some(waiter),
            cancel: cancel.clone(),
            abort,
            frame_len: job.width as usize * job.height as usize * 3,
        })
    }

    /// Close stdin, drain diagnostics and wait for the encoder to exit.
    pub fn finish(mut self) -> RenderResult<()> {
        drop(self.stdin.take());
        let status = self.wait()?;
        let diagnostics = self.collect_diagnostics();

        if !diagnostics.trim().is_empty() {
            log::info!("Encoder output:\n{}", diagnostics.trim_end());
        }
        match status {
            None => Err(RenderError::Cancelled),
            Some(status) if !status.success() => Err(RenderError::EncodeFinish {
                status: status.to_string(),
                diagnostics,
            }),
            Some(_) => {
                log::info!("Encoding complete");
                Ok(())
            }
        }
    }

    /// Terminate the encoder without waiting for it to finish the file.
    pub fn kill(mut self) {
        self.abort_and_wait();
    }

    fn abort_and_wait(&mut self) {
        self.abort.cancel();
        drop(self.stdin.take());
        if let Err(err) = self.wait() {
            log::debug!("Encoder wait after abort failed: {err}");
        }
    }

    /// Exit status, or `None` if the encoder was killed.
    fn wait(&mut self) -> RenderResult<Option<ExitStatus>> {
        let Some(waiter) = self.waiter.take() else {
            return Ok(None);
        };
        match waiter.join() {
            Ok(result) => Ok(result?),
            Err(_) => Err(RenderError::Io(io::Error::other("encoder waiter panicked"))),
        }
    }

    fn collect_diagnostics(&mut self) -> String {
        self.stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default()
    }
}

impl FrameSink for EncoderSink {
    fn write_frame(&mut self, rgb: &[u8]) -> RenderResult<()> {
        if rgb.len() != self.frame_len {
            return Err(RenderError::invalid(format!(
                "frame is {} bytes, encoder expects {}",
                rgb.len(),
                self.frame_len
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RenderError::EncodeWrite {
                message: "encoder input already closed".into(),
                diagnostics: String::new(),
            });
        };

        if let Err(err) = stdin.write_all(rgb) {
            // either the encoder exited on its own or it was killed on cancel
            self.abort_and_wait();
            if self.cancel.is_cancelled() {
                return Err(RenderError::Cancelled);
            }
            let diagnostics = self.collect_diagnostics();
            log::error!("Encoder write failed: {err}\n{}", diagnostics.trim_end());
            return Err(RenderError::EncodeWrite {
                message: err.to_string(),
                diagnostics,
            });
        }
        Ok(())
    }
}

impl Drop for EncoderSink {
    fn drop(&mut self) {
        if self.waiter.is_some() {
            self.abort_and_wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(output: &str, audio_codec: &str) -> EncodeJob {
        EncodeJob {
            width: 1280,
            height: 720,
            fps: 30.0,
            input_audio: PathBuf::from("song.mp3"),
            output: PathBuf::from(output),
            audio_codec: audio_codec.into(),
            settings: EncodeSettings::default(),
        }
    }

    fn joined(job: &EncodeJob) -> String {
        encoder_command(&Toolchain::with_binary("ffmpeg"), job)
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn raw_rgb_video_on_stdin_and_audio_file_second() {
        let args = joined(&job("out.mkv", "aac"));
        assert!(args.contains("-f rawvideo -vcodec rawvideo -s 1280x720 -pix_fmt rgb24 -r 30 -i -"));
        assert!(args.contains("-i song.mp3 -acodec aac -b:a 192k"));
        assert!(args.contains("-vcodec libx264 -pix_fmt yuv420p -preset medium -crf 20"));
        assert!(args.ends_with("-y out.mkv"));
        assert!(!args.contains("-strict"));
    }

    #[test]
    fn aac_in_mp4_needs_strict_flag() {
        let args = joined(&job("out.MP4", "aac"));
        assert!(args.contains("-strict -2 -y out.MP4"));
        let args = joined(&job("out.mp4", "libfdk_aac"));
        assert!(!args.contains("-strict"));
    }

    #[test]
    fn pcm_audio_has_no_bitrate() {
        let args = joined(&job("out.mkv", "pcm_s16le"));
        assert!(args.contains("-acodec pcm_s16le -vcodec"));
        assert!(!args.contains("-b:a"));
    }

    #[test]
    fn codec_selection_falls_back_without_toolchain() {
        let tools = Toolchain::with_binary("/nonexistent/audiovis-ffmpeg");
        assert_eq!(select_audio_codec(&tools, "aac"), "aac");
        assert_eq!(select_audio_codec(&tools, "pcm_s16le"), "pcm_s16le");
    }

    #[test]
    fn missing_encoder_fails_to_start() {
        let tools = Toolchain::with_binary("/nonexistent/audiovis-ffmpeg");
        let err = EncoderSink::start(&tools, &job("out.mp4", "aac"), &CancelToken::new())
            .err()
            .unwrap();
        assert!(matches!(err, RenderError::EncodeStart(_)));
    }

    #[cfg(unix)]
    mod with_script {
        use super::*;
        use crate::process::tests::script_tool;
        use std::time::{Duration, Instant};

        fn fixture(name: &str) -> PathBuf {
            let dir = std::env::temp_dir().join(format!("audiovis-fixture-{}-{}", name, std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }

        fn small_job() -> EncodeJob {
            EncodeJob {
                width: 64,
                height: 48,
                ..job("out.mkv", "aac")
            }
        }

        #[test]
        fn frames_drain_and_finish_cleanly() {
            let dir = fixture("encode-ok");
            let tools = script_tool(&dir, "exec cat >/dev/null");
            let mut sink = EncoderSink::start(&tools, &small_job(), &CancelToken::new()).unwrap();
            for _ in 0..5 {
                sink.write_frame(&[7u8; 64 * 48 * 3]).unwrap();
            }
            sink.finish().unwrap();
            std::fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn nonzero_exit_after_eof_fails_with_diagnostics() {
            let dir = fixture("encode-finish");
            let tools = script_tool(&dir, "cat >/dev/null\necho 'muxer failed' >&2\nexit 1");
            let mut sink = EncoderSink::start(&tools, &small_job(), &CancelToken::new()).unwrap();
            sink.write_frame(&[0u8; 64 * 48 * 3]).unwrap();
            let err = sink.finish().unwrap_err();
            assert!(matches!(err, RenderError::EncodeFinish { .. }));
            assert!(err.diagnostics().unwrap().contains("muxer failed"));
            std::fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn early_exit_surfaces_as_write_error() {
            let dir = fixture("encode-early");
            let tools = script_tool(&dir, "echo 'unknown codec' >&2\nexit 1");
            let mut sink = EncoderSink::start(&tools, &job("out.mkv", "aac"), &CancelToken::new()).unwrap();
            let frame = vec![0u8; 1280 * 720 * 3];
            let err = (0..20)
                .find_map(|_| sink.write_frame(&frame).err())
                .unwrap();
            assert!(matches!(err, RenderError::EncodeWrite { .. }));
            assert!(err.diagnostics().unwrap().contains("unknown codec"));
            std::fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn cancel_unblocks_a_stalled_write() {
            let dir = fixture("encode-stall");
            let tools = script_tool(&dir, "exec sleep 30");
            let cancel = CancelToken::new();
            let mut sink = EncoderSink::start(&tools, &job("out.mkv", "aac"), &cancel).unwrap();
            let trigger = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                trigger.cancel();
            });

            let started = Instant::now();
            let err = sink.write_frame(&vec![0u8; 1280 * 720 * 3]).unwrap_err();
            assert!(matches!(err, RenderError::Cancelled));
            assert!(started.elapsed() < Duration::from_secs(10));
            std::fs::remove_dir_all(&dir).unwrap();
        }
    }
}
