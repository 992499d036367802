//! Live webcam capture
//!
//! The camera handle stays on a dedicated thread for its whole life; the
//! device object only exchanges requests with that thread, so it can be
//! moved between scheduler workers freely.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;
use tracing::{debug, error, info, warn};

use crate::device::{CaptureDevice, CaptureOpener};
use crate::frame::now_ns;
use crate::{CameraConfig, CameraError, VideoFrame};

enum Request {
    Read(mpsc::Sender<Result<VideoFrame, CameraError>>),
    Release,
}

/// Webcam driver wrapper
pub struct WebcamDevice {
    requests: mpsc::Sender<Request>,
    worker: Option<JoinHandle<()>>,
    timeout: Duration,
}

impl WebcamDevice {
    /// Open the webcam and start streaming
    pub fn open(config: &CameraConfig) -> Result<Self, CameraError> {
        let (request_tx, request_rx) = mpsc::channel::<Request>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CameraError>>();
        let config = config.clone();
        let timeout = Duration::from_millis(config.read_timeout_ms);

        let worker = std::thread::Builder::new()
            .name(format!("webcam-{}", config.device_index))
            .spawn(move || serve(config, request_rx, ready_tx))
            .map_err(|e| CameraError::Open(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                requests: request_tx,
                worker: Some(worker),
                timeout,
            }),
            Ok(Err(e)) => {
                let _ = worker.join();
                Err(e)
            }
            Err(_) => {
                let _ = worker.join();
                Err(CameraError::Open("camera thread exited during startup".into()))
            }
        }
    }
}

fn serve(
    config: CameraConfig,
    requests: mpsc::Receiver<Request>,
    ready: mpsc::Sender<Result<(), CameraError>>,
) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match Camera::new(CameraIndex::Index(config.device_index), requested) {
        Ok(camera) => camera,
        Err(e) => {
            error!("Failed to open webcam {}: {}", config.device_index, e);
            let _ = ready.send(Err(CameraError::Open(e.to_string())));
            return;
        }
    };

    if let Err(e) = camera.open_stream() {
        error!("Failed to start webcam stream: {}", e);
        let _ = ready.send(Err(CameraError::Open(e.to_string())));
        return;
    }

    info!("Opened webcam {} ({})", config.device_index, camera.info().human_name());
    let _ = ready.send(Ok(()));

    let mut sequence = 0u32;
    while let Ok(request) = requests.recv() {
        match request {
            Request::Read(reply) => {
                let result = camera
                    .frame()
                    .and_then(|buffer| buffer.decode_image::<RgbFormat>())
                    .map_err(|e| CameraError::Stream(e.to_string()))
                    .and_then(|img| {
                        let mut frame = VideoFrame::from_rgb_image(img, sequence);
                        if frame.is_empty() {
                            return Err(CameraError::EmptyFrame);
                        }
                        if frame.width != config.width || frame.height != config.height {
                            frame = frame.resize(config.width, config.height);
                        }
                        frame.timestamp_ns = now_ns();
                        Ok(frame)
                    });
                sequence = sequence.wrapping_add(1);
                let _ = reply.send(result);
            }
            Request::Release => break,
        }
    }

    if let Err(e) = camera.stop_stream() {
        warn!("Failed to stop webcam stream: {}", e);
    }
    debug!("Webcam {} thread exiting", config.device_index);
}

impl CaptureDevice for WebcamDevice {
    fn read_frame(&mut self) -> Result<VideoFrame, CameraError> {
        if self.worker.is_none() {
            return Err(CameraError::NotInitialized);
        }

        let (reply_tx, reply_rx) = mpsc::channel();
        self.requests
            .send(Request::Read(reply_tx))
            .map_err(|_| CameraError::Stream("camera thread stopped".into()))?;

        match reply_rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(CameraError::Timeout),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(CameraError::Stream("camera thread stopped".into()))
            }
        }
    }

    fn release(&mut self) -> Result<(), CameraError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        let _ = self.requests.send(Request::Release);
        worker
            .join()
            .map_err(|_| CameraError::Stream("camera thread panicked".into()))
    }

    fn is_open(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for WebcamDevice {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!("Failed to release webcam: {}", e);
        }
    }
}

/// Opens the configured webcam for each session
#[derive(Debug, Clone, Default)]
pub struct WebcamOpener;

impl CaptureOpener for WebcamOpener {
    fn open(&self, config: &CameraConfig) -> Result<Box<dyn CaptureDevice>, CameraError> {
        Ok(Box::new(WebcamDevice::open(config)?))
    }
}
