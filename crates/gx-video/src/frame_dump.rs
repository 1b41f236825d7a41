//! Asynchronous frame dumping and screenshots.
//!
//! Encoding runs on a dedicated worker thread. The main thread hands a
//! readback buffer over a depth-1 channel and the worker acknowledges each
//! buffer on a second depth-1 channel, so dumping lags presentation by at
//! most one frame and never queues unboundedly. The main thread only
//! blocks on the acknowledgement when it needs the buffer slot back, when
//! a synchronous screenshot was requested, or at shutdown.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{info, warn};

use crate::config::{FrameDumpConfig, FrameDumpFormat};
use crate::error::VideoError;

/// One presented frame's pixels, handed to the worker.
pub struct FrameData {
    /// Linear RGBA8, `stride` bytes per row.
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    /// Guest tick counter at presentation, the frame's timestamp.
    pub ticks: u64,
    pub frame_number: u64,
    /// Write into the dump sequence. False for screenshot-only frames.
    pub dump: bool,
}

enum WorkerMsg {
    Frame(FrameData),
    Stop,
}

pub struct FrameDumper {
    start_tx: Sender<WorkerMsg>,
    done_rx: Receiver<()>,
    worker: Option<JoinHandle<()>>,
    /// A frame has been sent whose acknowledgement is still pending.
    in_flight: bool,
    screenshot_request: Arc<Mutex<Option<PathBuf>>>,
    failed: Arc<AtomicBool>,
}

impl FrameDumper {
    pub fn new(config: FrameDumpConfig) -> Self {
        let (start_tx, start_rx) = bounded::<WorkerMsg>(1);
        let (done_tx, done_rx) = bounded::<()>(1);
        let screenshot_request = Arc::new(Mutex::new(None));
        let failed = Arc::new(AtomicBool::new(false));

        let worker = {
            let screenshot_request = Arc::clone(&screenshot_request);
            let failed = Arc::clone(&failed);
            std::thread::Builder::new()
                .name("frame-dump".into())
                .spawn(move || run_worker(config, start_rx, done_tx, screenshot_request, failed))
                .ok()
        };
        if worker.is_none() {
            warn!("could not spawn frame dump worker; dumping disabled");
            failed.store(true, Ordering::Relaxed);
        }

        Self {
            start_tx,
            done_rx,
            worker,
            in_flight: false,
            screenshot_request,
            failed,
        }
    }

    /// True once an I/O failure has disabled dumping.
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }

    /// Wait for the previous frame's encode to finish. Called at the start
    /// of each swap so the buffer slot is free before a new readback.
    pub fn flush(&mut self) {
        if self.in_flight {
            let _ = self.done_rx.recv();
            self.in_flight = false;
        }
    }

    /// Hand a frame to the worker. Blocks only if the previous frame is
    /// still being encoded.
    pub fn queue_frame(&mut self, frame: FrameData) {
        if self.worker.is_none() || self.has_failed() {
            return;
        }
        self.flush();
        if self.start_tx.send(WorkerMsg::Frame(frame)).is_ok() {
            self.in_flight = true;
        }
    }

    /// Request that the next queued frame also be written to `path`. The
    /// caller then queues a frame and calls [`flush`](Self::flush) if it
    /// wants the screenshot synchronously.
    pub fn request_screenshot(&self, path: PathBuf) {
        if let Ok(mut slot) = self.screenshot_request.lock() {
            *slot = Some(path);
        }
    }

    pub fn screenshot_pending(&self) -> bool {
        self.screenshot_request
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }

    /// Drain the pipeline and join the worker.
    pub fn shutdown(&mut self) {
        self.flush();
        if let Some(worker) = self.worker.take() {
            let _ = self.start_tx.send(WorkerMsg::Stop);
            let _ = worker.join();
        }
    }
}

impl Drop for FrameDumper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    config: FrameDumpConfig,
    start_rx: Receiver<WorkerMsg>,
    done_tx: Sender<()>,
    screenshot_request: Arc<Mutex<Option<PathBuf>>>,
    failed: Arc<AtomicBool>,
) {
    if config.format == FrameDumpFormat::Video {
        // No video encoder is wired up; frames land as an image sequence.
        warn!("video dump format unavailable, falling back to image sequence");
    }

    loop {
        let msg = match start_rx.recv() {
            Ok(msg) => msg,
            Err(_) => break,
        };
        let frame = match msg {
            WorkerMsg::Frame(frame) => frame,
            WorkerMsg::Stop => break,
        };

        let screenshot = screenshot_request
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(path) = screenshot {
            match write_png(&path, &frame) {
                Ok(()) => info!(path = %path.display(), "screenshot saved"),
                Err(err) => warn!(%err, "screenshot failed"),
            }
        }

        if frame.dump && !failed.load(Ordering::Relaxed) {
            let path = frame_path(&config, &frame);
            if let Err(err) = write_png(&path, &frame) {
                warn!(%err, "frame dump failed, disabling dumping");
                failed.store(true, Ordering::Relaxed);
            }
        }

        let _ = done_tx.send(());
    }
}

fn frame_path(config: &FrameDumpConfig, frame: &FrameData) -> PathBuf {
    let name = format!("frame_{:06}_{}.png", frame.frame_number, frame.ticks);
    let mut path = config.directory.join(name);
    if !config.silent_overwrite {
        let mut n = 1;
        while path.exists() {
            path = config
                .directory
                .join(format!("frame_{:06}_{}_{}.png", frame.frame_number, frame.ticks, n));
            n += 1;
        }
    }
    path
}

fn write_png(path: &Path, frame: &FrameData) -> Result<(), VideoError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let row = frame.width as usize * 4;
    let packed;
    let data: &[u8] = if frame.stride == row {
        &frame.pixels
    } else {
        packed = frame
            .pixels
            .chunks(frame.stride)
            .take(frame.height as usize)
            .flat_map(|r| &r[..row])
            .copied()
            .collect::<Vec<u8>>();
        &packed
    };

    image::save_buffer(
        path,
        data,
        frame.width,
        frame.height,
        image::ExtendedColorType::Rgba8,
    )
    .map_err(|source| VideoError::ImageWrite {
        path: path.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid_frame(number: u64, rgba: [u8; 4]) -> FrameData {
        let (w, h) = (8u32, 8u32);
        let mut pixels = Vec::with_capacity((w * h * 4) as usize);
        for _ in 0..w * h {
            pixels.extend_from_slice(&rgba);
        }
        FrameData {
            pixels,
            width: w,
            height: h,
            stride: w as usize * 4,
            ticks: number * 1000,
            frame_number: number,
            dump: true,
        }
    }

    #[test]
    fn frames_land_on_disk_after_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let mut dumper = FrameDumper::new(FrameDumpConfig {
            format: FrameDumpFormat::ImageSequence,
            directory: dir.path().to_owned(),
            silent_overwrite: true,
        });

        dumper.queue_frame(solid_frame(0, [255, 0, 0, 255]));
        dumper.queue_frame(solid_frame(1, [0, 255, 0, 255]));
        dumper.shutdown();

        assert!(dir.path().join("frame_000000_0.png").exists());
        assert!(dir.path().join("frame_000001_1000.png").exists());
        assert!(!dumper.has_failed());
    }

    #[test]
    fn screenshot_request_is_consumed_once() {
        let dir = tempfile::tempdir().unwrap();
        let mut dumper = FrameDumper::new(FrameDumpConfig {
            format: FrameDumpFormat::ImageSequence,
            directory: dir.path().to_owned(),
            silent_overwrite: true,
        });

        let shot = dir.path().join("shot.png");
        dumper.request_screenshot(shot.clone());
        dumper.queue_frame(solid_frame(0, [1, 2, 3, 255]));
        dumper.flush();

        assert!(shot.exists());
        assert!(!dumper.screenshot_pending());

        let img = image::open(&shot).unwrap().to_rgba8();
        assert_eq!(img.get_pixel(0, 0).0, [1, 2, 3, 255]);
    }

    #[test]
    fn overwrite_avoidance_picks_a_fresh_name() {
        let dir = tempfile::tempdir().unwrap();
        let config = FrameDumpConfig {
            format: FrameDumpFormat::ImageSequence,
            directory: dir.path().to_owned(),
            silent_overwrite: false,
        };
        std::fs::write(dir.path().join("frame_000000_0.png"), b"occupied").unwrap();

        let mut dumper = FrameDumper::new(config);
        dumper.queue_frame(solid_frame(0, [9, 9, 9, 255]));
        dumper.shutdown();

        assert_eq!(
            std::fs::read(dir.path().join("frame_000000_0.png")).unwrap(),
            b"occupied"
        );
        assert!(dir.path().join("frame_000000_0_1.png").exists());
    }
}
