//! Frame sources feeding the driver.
//!
//! Video files and capture devices are decoded by an `ffmpeg` subprocess on a
//! reader thread; whole frames cross a bounded channel so the render thread
//! never sees a partially written frame. Still images are decoded once with
//! `image`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, bail, Context, Result};
use image::ImageReader;
use tracing::{debug, info, warn};

use crate::error_codes::{CodedError, RESOURCE_SOURCE_UNAVAILABLE};

const FRAME_CHANNEL_DEPTH: usize = 2;
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp"];

/// One decoded frame, tightly packed RGBA8, top row first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl VideoFrame {
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self> {
        let expected = frame_byte_len(width, height)?;
        if rgba.len() != expected {
            bail!(
                "frame {}x{} needs {} bytes of rgba, got {}",
                width,
                height,
                expected,
                rgba.len()
            );
        }
        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    pub fn solid(width: u32, height: u32, color: [u8; 4]) -> Self {
        let rgba = color
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 4)
            .collect();
        Self {
            width,
            height,
            rgba,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = ((y * self.width + x) * 4) as usize;
        let mut pixel = [0; 4];
        pixel.copy_from_slice(&self.rgba[start..start + 4]);
        Some(pixel)
    }
}

fn frame_byte_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|pixels| pixels.checked_mul(4))
        .ok_or_else(|| anyhow!("frame size {width}x{height} overflows"))
}

/// A producer of decoded frames, polled once per tick.
pub trait FrameSource {
    fn label(&self) -> &str;

    /// Pull any frames decoded since the last call. Never blocks.
    fn poll(&mut self) {}

    /// Frame dimensions, once known.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Latest frame, or `None` while nothing has been decoded yet.
    fn current_frame(&self) -> Option<&VideoFrame>;

    /// Exclusive sources (capture devices) must be released before another
    /// one is acquired.
    fn is_exclusive(&self) -> bool {
        false
    }

    fn release(&mut self) {}
}

pub struct StillImageSource {
    label: String,
    frame: VideoFrame,
}

impl StillImageSource {
    pub fn open(path: &Path) -> Result<Self> {
        let image = ImageReader::open(path)
            .with_context(|| format!("failed opening {}", path.display()))?
            .decode()
            .with_context(|| format!("failed decoding {}", path.display()))?
            .into_rgba8();
        let (width, height) = image.dimensions();
        let frame = VideoFrame::new(width, height, image.into_raw())?;
        Ok(Self {
            label: path.display().to_string(),
            frame,
        })
    }

    pub fn from_frame(label: impl Into<String>, frame: VideoFrame) -> Self {
        Self {
            label: label.into(),
            frame,
        }
    }
}

impl FrameSource for StillImageSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.frame.width, self.frame.height))
    }

    fn current_frame(&self) -> Option<&VideoFrame> {
        Some(&self.frame)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaInput {
    File(PathBuf),
    Webcam(String),
}

impl MediaInput {
    fn label(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Webcam(device) => format!("webcam:{device}"),
        }
    }

    fn input_args(&self) -> Vec<String> {
        match self {
            // paced at the native frame rate; no autorotate so frames keep the
            // coded size ffprobe reports
            Self::File(path) => vec![
                "-re".to_owned(),
                "-noautorotate".to_owned(),
                "-i".to_owned(),
                path.display().to_string(),
            ],
            Self::Webcam(device) => {
                let mut args = webcam_format_args();
                args.push("-i".to_owned());
                args.push(device.clone());
                args
            }
        }
    }

    fn probe_args(&self) -> Vec<String> {
        match self {
            Self::File(path) => vec![path.display().to_string()],
            Self::Webcam(device) => {
                let mut args = webcam_format_args();
                args.push(device.clone());
                args
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub const DEFAULT_WEBCAM_DEVICE: &str = "/dev/video0";
#[cfg(target_os = "macos")]
pub const DEFAULT_WEBCAM_DEVICE: &str = "0";
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub const DEFAULT_WEBCAM_DEVICE: &str = "video=Integrated Camera";

#[cfg(target_os = "linux")]
fn webcam_format_args() -> Vec<String> {
    vec!["-f".to_owned(), "v4l2".to_owned()]
}

#[cfg(target_os = "macos")]
fn webcam_format_args() -> Vec<String> {
    vec![
        "-f".to_owned(),
        "avfoundation".to_owned(),
        "-framerate".to_owned(),
        "30".to_owned(),
    ]
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn webcam_format_args() -> Vec<String> {
    vec!["-f".to_owned(), "dshow".to_owned()]
}

pub struct FfmpegSource {
    label: String,
    exclusive: bool,
    width: u32,
    height: u32,
    receiver: Receiver<Vec<u8>>,
    worker: Option<JoinHandle<Result<()>>>,
    child: Option<Child>,
    latest: Option<VideoFrame>,
    finished: bool,
}

impl FfmpegSource {
    pub fn open(input: &MediaInput) -> Result<Self> {
        let label = input.label();
        let (width, height) = probe_dimensions(input)
            .map_err(|error| source_unavailable(&label, &format!("{error:#}")))?;
        let frame_size = frame_byte_len(width, height)?;

        let mut child = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .args(input.input_args())
            .arg("-an")
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|error| source_unavailable(&label, &format!("failed to spawn ffmpeg: {error}")))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("failed to capture ffmpeg stdout"))?;
        let (sender, receiver) = mpsc::sync_channel::<Vec<u8>>(FRAME_CHANNEL_DEPTH);

        let worker = thread::Builder::new()
            .name("glyphcast-ffmpeg-decoder".to_owned())
            .spawn(move || {
                loop {
                    let mut buffer = vec![0u8; frame_size];
                    match stdout.read_exact(&mut buffer) {
                        Ok(()) => {
                            if sender.send(buffer).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                        Err(e) => return Err(anyhow!("failed to read from ffmpeg: {e}")),
                    }
                }
                Ok(())
            })
            .context("failed to spawn ffmpeg reader thread")?;

        info!(source = %label, width, height, "opened ffmpeg source");
        Ok(Self {
            label,
            exclusive: matches!(input, MediaInput::Webcam(_)),
            width,
            height,
            receiver,
            worker: Some(worker),
            child: Some(child),
            latest: None,
            finished: false,
        })
    }

    fn join_worker(&mut self) {
        let Some(handle) = self.worker.take() else {
            return;
        };
        match handle.join() {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(source = %self.label, "decoder stopped: {error:#}"),
            Err(_) => warn!(source = %self.label, "ffmpeg reader thread panicked"),
        }
    }
}

impl FrameSource for FfmpegSource {
    fn label(&self) -> &str {
        &self.label
    }

    fn poll(&mut self) {
        if self.finished {
            return;
        }
        loop {
            match self.receiver.try_recv() {
                Ok(rgba) => {
                    self.latest = Some(VideoFrame {
                        width: self.width,
                        height: self.height,
                        rgba,
                    });
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    info!(source = %self.label, "end of stream; holding last frame");
                    self.finished = true;
                    self.join_worker();
                    break;
                }
            }
        }
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        Some((self.width, self.height))
    }

    fn current_frame(&self) -> Option<&VideoFrame> {
        self.latest.as_ref()
    }

    fn is_exclusive(&self) -> bool {
        self.exclusive
    }

    fn release(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        debug!(source = %self.label, "releasing ffmpeg source");
        let _ = child.kill();
        let _ = child.wait();
        // unblock a reader parked on a full channel before joining it
        let (_, disconnected) = mpsc::sync_channel(0);
        drop(std::mem::replace(&mut self.receiver, disconnected));
        self.join_worker();
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        self.release();
    }
}

fn source_unavailable(label: &str, detail: &str) -> anyhow::Error {
    CodedError::resource(
        RESOURCE_SOURCE_UNAVAILABLE,
        format!("cannot open source '{label}': {detail}"),
    )
    .into()
}

fn probe_dimensions(input: &MediaInput) -> Result<(u32, u32)> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height")
        .arg("-of")
        .arg("csv=p=0:s=x")
        .args(input.probe_args())
        .stdin(Stdio::null())
        .output()
        .context("failed to run ffprobe")?;
    if !output.status.success() {
        bail!(
            "ffprobe exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    parse_dimensions(&String::from_utf8_lossy(&output.stdout))
}

/// Parses ffprobe's `WIDTHxHEIGHT` output (first non-empty line).
pub fn parse_dimensions(raw: &str) -> Result<(u32, u32)> {
    let line = raw
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("no video stream found"))?;
    let (width_raw, height_raw) = line
        .split_once('x')
        .ok_or_else(|| anyhow!("unexpected dimensions '{line}': expected WIDTHxHEIGHT"))?;
    let width = width_raw
        .trim()
        .parse::<u32>()
        .with_context(|| format!("invalid width in '{line}'"))?;
    let height = height_raw
        .trim()
        .trim_end_matches('x')
        .parse::<u32>()
        .with_context(|| format!("invalid height in '{line}'"))?;
    if width == 0 || height == 0 {
        bail!("video stream reports empty dimensions {width}x{height}");
    }
    Ok((width, height))
}

/// What the user asked to play.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRequest {
    Video(PathBuf),
    Image(PathBuf),
    Webcam(String),
}

impl SourceRequest {
    /// `webcam`, `webcam:<device>`, an image path, or a video path.
    pub fn parse(raw: &str) -> Result<Self> {
        let value = raw.trim();
        if value.is_empty() {
            bail!("source cannot be empty");
        }
        if value.eq_ignore_ascii_case("webcam") {
            return Ok(Self::Webcam(DEFAULT_WEBCAM_DEVICE.to_owned()));
        }
        if let Some(device) = value.strip_prefix("webcam:") {
            let device = device.trim();
            if device.is_empty() {
                bail!("invalid source '{}': missing webcam device", raw);
            }
            return Ok(Self::Webcam(device.to_owned()));
        }
        Ok(Self::from_path(Path::new(value)))
    }

    pub fn from_path(path: &Path) -> Self {
        let is_image = path
            .extension()
            .and_then(|extension| extension.to_str())
            .map(|extension| {
                IMAGE_EXTENSIONS
                    .iter()
                    .any(|known| extension.eq_ignore_ascii_case(known))
            })
            .unwrap_or(false);
        if is_image {
            Self::Image(path.to_path_buf())
        } else {
            Self::Video(path.to_path_buf())
        }
    }

    pub fn open(&self) -> Result<Box<dyn FrameSource>> {
        match self {
            Self::Image(path) => Ok(Box::new(StillImageSource::open(path).map_err(|error| {
                source_unavailable(&path.display().to_string(), &format!("{error:#}"))
            })?)),
            Self::Video(path) => Ok(Box::new(FfmpegSource::open(&MediaInput::File(
                path.clone(),
            ))?)),
            Self::Webcam(device) => Ok(Box::new(FfmpegSource::open(&MediaInput::Webcam(
                device.clone(),
            ))?)),
        }
    }
}

/// The one bound source. Exclusive sources are released before the next
/// acquisition starts; others stay bound until the replacement is acquired.
#[derive(Default)]
pub struct SourceSlot {
    current: Option<Box<dyn FrameSource>>,
}

impl SourceSlot {
    pub fn switch_to<F>(&mut self, acquire: F) -> Result<()>
    where
        F: FnOnce() -> Result<Box<dyn FrameSource>>,
    {
        if self
            .current
            .as_ref()
            .is_some_and(|current| current.is_exclusive())
        {
            self.release();
        }

        let next = acquire()?;
        if let Some(mut previous) = self.current.take() {
            previous.release();
        }
        info!(source = next.label(), "bound frame source");
        self.current = Some(next);
        Ok(())
    }

    pub fn current_mut(&mut self) -> Option<&mut (dyn FrameSource + 'static)> {
        self.current.as_deref_mut()
    }

    pub fn label(&self) -> Option<&str> {
        self.current.as_deref().map(|source| source.label())
    }

    pub fn release(&mut self) {
        if let Some(mut current) = self.current.take() {
            info!(source = current.label(), "released frame source");
            current.release();
        }
    }
}

impl Drop for SourceSlot {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct TrackedSource {
        name: &'static str,
        exclusive: bool,
        log: Rc<RefCell<Vec<String>>>,
        frame: VideoFrame,
    }

    impl FrameSource for TrackedSource {
        fn label(&self) -> &str {
            self.name
        }

        fn dimensions(&self) -> Option<(u32, u32)> {
            Some((1, 1))
        }

        fn current_frame(&self) -> Option<&VideoFrame> {
            Some(&self.frame)
        }

        fn is_exclusive(&self) -> bool {
            self.exclusive
        }

        fn release(&mut self) {
            self.log.borrow_mut().push(format!("release {}", self.name));
        }
    }

    fn tracked(
        name: &'static str,
        exclusive: bool,
        log: &Rc<RefCell<Vec<String>>>,
    ) -> Result<Box<dyn FrameSource>> {
        log.borrow_mut().push(format!("acquire {name}"));
        Ok(Box::new(TrackedSource {
            name,
            exclusive,
            log: Rc::clone(log),
            frame: VideoFrame::solid(1, 1, [0, 0, 0, 255]),
        }))
    }

    #[test]
    fn exclusive_source_is_released_before_next_acquire() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut slot = SourceSlot::default();
        slot.switch_to(|| tracked("cam-a", true, &log)).expect("first");
        slot.switch_to(|| tracked("cam-b", true, &log)).expect("second");

        assert_eq!(
            *log.borrow(),
            vec!["acquire cam-a", "release cam-a", "acquire cam-b"]
        );
        assert_eq!(slot.label(), Some("cam-b"));
    }

    #[test]
    fn shared_source_survives_failed_switch() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut slot = SourceSlot::default();
        slot.switch_to(|| tracked("clip", false, &log)).expect("first");

        let result = slot.switch_to(|| Err(anyhow!("device busy")));
        assert!(result.is_err());
        assert_eq!(slot.label(), Some("clip"));
        assert!(slot.current_mut().is_some());
    }

    #[test]
    fn exclusive_source_is_gone_after_failed_switch() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut slot = SourceSlot::default();
        slot.switch_to(|| tracked("cam", true, &log)).expect("first");

        assert!(slot.switch_to(|| Err(anyhow!("device busy"))).is_err());
        assert!(slot.current_mut().is_none());
        assert_eq!(*log.borrow(), vec!["acquire cam", "release cam"]);
    }

    #[test]
    fn shared_source_released_after_replacement_acquired() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut slot = SourceSlot::default();
        slot.switch_to(|| tracked("clip", false, &log)).expect("first");
        slot.switch_to(|| tracked("cam", true, &log)).expect("second");
        assert_eq!(
            *log.borrow(),
            vec!["acquire clip", "acquire cam", "release clip"]
        );
    }

    #[test]
    fn file_input_disables_autorotate_before_input() {
        let args = MediaInput::File(PathBuf::from("portrait.mp4")).input_args();
        let noautorotate = args
            .iter()
            .position(|arg| arg == "-noautorotate")
            .expect("file input must disable autorotate");
        let input = args.iter().position(|arg| arg == "-i").expect("input flag");
        assert!(noautorotate < input, "{args:?}");
        assert_eq!(args[input + 1], "portrait.mp4");
    }

    #[test]
    fn parse_dimensions_accepts_ffprobe_output() {
        assert_eq!(parse_dimensions("1920x1080\n").expect("dims"), (1920, 1080));
        assert_eq!(parse_dimensions("\n640x480x\n").expect("dims"), (640, 480));
        assert!(parse_dimensions("").is_err());
        assert!(parse_dimensions("0x480").is_err());
        assert!(parse_dimensions("wide").is_err());
    }

    #[test]
    fn source_request_classifies_inputs() {
        assert_eq!(
            SourceRequest::parse("webcam").expect("parses"),
            SourceRequest::Webcam(DEFAULT_WEBCAM_DEVICE.to_owned())
        );
        assert_eq!(
            SourceRequest::parse("webcam:/dev/video2").expect("parses"),
            SourceRequest::Webcam("/dev/video2".to_owned())
        );
        assert_eq!(
            SourceRequest::parse("clip.MP4").expect("parses"),
            SourceRequest::Video(PathBuf::from("clip.MP4"))
        );
        assert_eq!(
            SourceRequest::parse("still.PNG").expect("parses"),
            SourceRequest::Image(PathBuf::from("still.PNG"))
        );
        assert!(SourceRequest::parse("webcam:").is_err());
        assert!(SourceRequest::parse("  ").is_err());
    }

    #[test]
    fn still_image_source_decodes_png() {
        let dir = tempfile::tempdir().expect("tempdir should create");
        let path = dir.path().join("gray.png");
        image::RgbaImage::from_pixel(4, 3, image::Rgba([128, 128, 128, 255]))
            .save(&path)
            .expect("png should write");

        let source = StillImageSource::open(&path).expect("still should open");
        assert_eq!(source.dimensions(), Some((4, 3)));
        let frame = source.current_frame().expect("frame ready");
        assert_eq!(frame.pixel(3, 2), Some([128, 128, 128, 255]));
    }

    #[test]
    fn missing_image_is_a_resource_error() {
        let error = match SourceRequest::Image(PathBuf::from("/definitely/missing.png")).open() {
            Ok(_) => panic!("missing file must not open"),
            Err(error) => error,
        };
        let coded = crate::error_codes::find_coded_error(&error).expect("coded");
        assert_eq!(coded.code, RESOURCE_SOURCE_UNAVAILABLE);
    }

    #[test]
    fn video_frame_rejects_wrong_length() {
        assert!(VideoFrame::new(2, 2, vec![0; 15]).is_err());
        let frame = VideoFrame::new(2, 1, vec![1, 2, 3, 4, 5, 6, 7, 8]).expect("frame");
        assert_eq!(frame.pixel(1, 0), Some([5, 6, 7, 8]));
        assert_eq!(frame.pixel(2, 0), None);
    }
}
