use std::io::Read;
use std::path::Path;
use std::process::Stdio;

use crate::error::{RenderError, RenderResult};
use crate::process::{kill_quietly, wait_or_kill, CancelToken, Toolchain};

pub const SAMPLE_RATE: u32 = 44_100;

/// Four seconds of s16le mono per read.
const CHUNK_BYTES: usize = SAMPLE_RATE as usize * 2 * 4;

/// Mono signed 16-bit samples at [`SAMPLE_RATE`], followed by one second of
/// silence so the spectrum can decay at the end of the track.
#[derive(Clone, Debug)]
pub struct PcmBuffer {
    samples: Vec<i16>,
}

impl PcmBuffer {
    /// Wrap decoded samples, appending the trailing second of silence.
    pub fn from_decoded(mut samples: Vec<i16>) -> Self {
        samples.resize(samples.len() + SAMPLE_RATE as usize, 0);
        Self { samples }
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / SAMPLE_RATE as f32
    }
}

pub struct AudioDecoder {
    tools: Toolchain,
}

impl AudioDecoder {
    pub fn new(tools: Toolchain) -> Self {
        Self { tools }
    }

    pub fn decode(&self, path: &Path, cancel: &CancelToken) -> RenderResult<PcmBuffer> {
        let mut child = self
            .tools
            .command()
            .arg("-i")
            .arg(path)
            .args(["-f", "s16le", "-acodec", "pcm_s16le"])
            .args(["-ar", &SAMPLE_RATE.to_string(), "-ac", "1", "-"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RenderError::decode(format!(
                    "failed to spawn {} (is it installed?): {e}",
                    self.tools.binary().display()
                ))
            })?;

        let Some(stdout) = child.stdout.take() else {
            kill_quietly(&mut child);
            return Err(RenderError::decode("decoder stdout not available"));
        };
        // a blocked read cannot observe the cancel flag, so the pipe is
        // drained on its own thread while this one can kill the decoder
        let reader = match std::thread::Builder::new()
            .name("decode-reader".into())
            .spawn(move || read_samples(stdout))
        {
            Ok(handle) => handle,
            Err(err) => {
                kill_quietly(&mut child);
                return Err(err.into());
            }
        };

        let status = wait_or_kill(&mut child, cancel)
            .map_err(|e| RenderError::decode(format!("failed to wait for decoder: {e}")));
        let samples = reader
            .join()
            .unwrap_or_else(|_| Err(std::io::Error::other("decoder reader panicked")));

        let status = match status? {
            Some(status) => status,
            None => return Err(RenderError::Cancelled),
        };
        if cancel.is_cancelled() {
            return Err(RenderError::Cancelled);
        }
        if !status.success() {
            return Err(RenderError::decode(format!(
                "decoder exited with {} for {}",
                status,
                path.display()
            )));
        }
        let samples =
            samples.map_err(|e| RenderError::decode(format!("failed to read decoder output: {e}")))?;

        let pcm = PcmBuffer::from_decoded(samples);
        log::info!(
            "Decoded audio: {} samples, {}Hz, {:.1}s (incl. 1s tail)",
            pcm.len(),
            SAMPLE_RATE,
            pcm.duration_secs()
        );
        Ok(pcm)
    }
}

/// Read s16le samples until end of stream, in [`CHUNK_BYTES`] reads.
fn read_samples(mut stdout: impl Read) -> std::io::Result<Vec<i16>> {
    let mut samples: Vec<i16> = Vec::new();
    let mut chunk = vec![0u8; CHUNK_BYTES];
    let mut carry: Option<u8> = None;
    loop {
        let read = match stdout.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        carry = append_le_samples(&mut samples, carry, &chunk[..read]);
    }
    Ok(samples)
}

/// Append little-endian i16 samples from `bytes`, stitching a byte left over
/// from the previous read. Returns the new leftover byte, if any.
fn append_le_samples(samples: &mut Vec<i16>, carry: Option<u8>, bytes: &[u8]) -> Option<u8> {
    let mut bytes = bytes;
    if let Some(low) = carry {
        match bytes.split_first() {
            Some((&high, rest)) => {
                samples.push(i16::from_le_bytes([low, high]));
                bytes = rest;
            }
            None => return Some(low),
        }
    }
    let pairs = bytes.chunks_exact(2);
    let leftover = pairs.remainder().first().copied();
    samples.extend(pairs.map(|p| i16::from_le_bytes([p[0], p[1]])));
    leftover
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_buffer_appends_one_second_of_silence() {
        let pcm = PcmBuffer::from_decoded(vec![1, -1, 2]);
        assert_eq!(pcm.len(), 3 + SAMPLE_RATE as usize);
        assert_eq!(&pcm.samples()[..3], &[1, -1, 2]);
        assert!(pcm.samples()[3..].iter().all(|&s| s == 0));
    }

    #[test]
    fn samples_split_across_reads_are_stitched() {
        let encoded: Vec<u8> = [1000i16, -2, 32767, -32768]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let mut samples = Vec::new();
        let carry = append_le_samples(&mut samples, None, &encoded[..3]);
        assert_eq!(carry, Some(encoded[2]));
        let carry = append_le_samples(&mut samples, carry, &encoded[3..]);
        assert_eq!(carry, None);
        assert_eq!(samples, vec![1000, -2, 32767, -32768]);
    }

    #[test]
    fn missing_decoder_is_a_decode_error() {
        let decoder = AudioDecoder::new(Toolchain::with_binary("/nonexistent/audiovis-ffmpeg"));
        let err = decoder
            .decode(Path::new("song.mp3"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, RenderError::Decode(_)));
    }

    #[test]
    fn reads_whole_stream_in_chunks() {
        let bytes: Vec<u8> = (0..CHUNK_BYTES + 5).map(|i| i as u8).collect();
        let samples = read_samples(&bytes[..]).unwrap();
        assert_eq!(samples.len(), (CHUNK_BYTES + 5) / 2);
        assert_eq!(samples[0], i16::from_le_bytes([0, 1]));
    }

    #[cfg(unix)]
    mod with_script {
        use super::*;
        use crate::process::tests::script_tool;
        use std::time::{Duration, Instant};

        fn fixture(name: &str) -> std::path::PathBuf {
            let dir = std::env::temp_dir().join(format!("audiovis-fixture-{}-{}", name, std::process::id()));
            std::fs::create_dir_all(&dir).unwrap();
            dir
        }

        #[test]
        fn decodes_stdout_and_pads_a_second() {
            let dir = fixture("decode-ok");
            let decoder = AudioDecoder::new(script_tool(&dir, "head -c 8820 /dev/zero"));
            let pcm = decoder.decode(Path::new("song.mp3"), &CancelToken::new()).unwrap();
            assert_eq!(pcm.len(), 4410 + SAMPLE_RATE as usize);
            std::fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn failing_decoder_is_a_decode_error() {
            let dir = fixture("decode-fail");
            let decoder = AudioDecoder::new(script_tool(&dir, "exit 1"));
            let err = decoder.decode(Path::new("song.mp3"), &CancelToken::new()).unwrap_err();
            assert!(matches!(err, RenderError::Decode(_)));
            std::fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn cancel_kills_a_stalled_decoder() {
            let dir = fixture("decode-stall");
            let decoder = AudioDecoder::new(script_tool(&dir, "exec sleep 30"));
            let cancel = CancelToken::new();
            let trigger = cancel.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                trigger.cancel();
            });

            let started = Instant::now();
            let err = decoder.decode(Path::new("song.mp3"), &cancel).unwrap_err();
            assert!(matches!(err, RenderError::Cancelled));
            assert!(started.elapsed() < Duration::from_secs(10));
            std::fs::remove_dir_all(&dir).unwrap();
        }

        #[test]
        fn cancelled_decode_never_reports_success() {
            let dir = fixture("decode-cancelled");
            let decoder = AudioDecoder::new(script_tool(&dir, "head -c 8820 /dev/zero"));
            let cancel = CancelToken::new();
            cancel.cancel();
            let err = decoder.decode(Path::new("song.mp3"), &cancel).unwrap_err();
            assert!(matches!(err, RenderError::Cancelled));
            std::fs::remove_dir_all(&dir).unwrap();
        }
    }
}
