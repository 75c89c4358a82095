//! Submission queue, fences and the GPU timeline thread.
//!
//! The timeline executes items strictly in submission order. Completion is
//! only observable through fences.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::device::DeviceError;

use super::command::CommandList;
use super::exec::Executor;
use super::resource::ResourceCell;
use super::state::ResourceState;

/// Pixels of a presented back buffer.
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub back_buffer_index: usize,
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA8 rows.
    pub pixels: Vec<u8>,
}

/// Receives back buffers when the timeline reaches a present.
pub trait PresentSink: Send + Sync {
    fn present(&self, frame: PresentedFrame);
}

/// Removal state shared by the device, its queue and its fences.
#[derive(Debug, Default)]
pub(crate) struct DeviceStatus {
    removed: Mutex<Option<String>>,
}

impl DeviceStatus {
    pub(crate) fn remove(&self, reason: String) {
        let mut removed = self.removed.lock();
        if removed.is_none() {
            log::error!("device removed: {reason}");
            *removed = Some(reason);
        }
    }

    pub(crate) fn check(&self) -> Result<(), DeviceError> {
        match self.removed.lock().as_ref() {
            Some(reason) => Err(DeviceError::Removed {
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[derive(Debug)]
struct FenceShared {
    completed: Mutex<u64>,
    reached: Condvar,
}

impl FenceShared {
    fn advance(&self, value: u64) {
        let mut completed = self.completed.lock();
        if value > *completed {
            *completed = value;
        }
        self.reached.notify_all();
    }
}

/// Monotonic GPU completion counter.
#[derive(Debug, Clone)]
pub struct Fence {
    shared: Arc<FenceShared>,
    status: Arc<DeviceStatus>,
}

impl Fence {
    pub(crate) fn new(initial: u64, status: Arc<DeviceStatus>) -> Self {
        Self {
            shared: Arc::new(FenceShared {
                completed: Mutex::new(initial),
                reached: Condvar::new(),
            }),
            status,
        }
    }

    /// Last value the GPU timeline signaled. Reads `u64::MAX` once the device is removed.
    pub fn completed_value(&self) -> u64 {
        *self.shared.completed.lock()
    }

    /// Blocks until the completed value reaches `value`. There is no timeout.
    pub fn wait(&self, value: u64) -> Result<(), DeviceError> {
        let mut completed = self.shared.completed.lock();
        while *completed < value {
            self.shared.reached.wait(&mut completed);
        }
        drop(completed);
        self.status.check()
    }
}

enum QueueItem {
    Execute {
        list: CommandList,
        serial: u64,
    },
    Signal {
        fence: Arc<FenceShared>,
        value: u64,
    },
    Present {
        back_buffer: Arc<ResourceCell>,
        index: usize,
        sink: Arc<dyn PresentSink>,
    },
}

/// Timeline behaviour switches taken from `DeviceInit`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TimelineConfig {
    pub validation: bool,
    pub latency: Option<Duration>,
}

/// The device's single direct queue.
pub struct CommandQueue {
    sender: Option<Sender<QueueItem>>,
    worker: Option<JoinHandle<()>>,
    status: Arc<DeviceStatus>,
    next_serial: AtomicU64,
    retired_serial: Arc<AtomicU64>,
}

impl CommandQueue {
    pub(crate) fn new(status: Arc<DeviceStatus>, config: TimelineConfig) -> Result<Self> {
        let (sender, receiver) = channel::unbounded();
        let retired_serial = Arc::new(AtomicU64::new(0));

        let worker = {
            let status = status.clone();
            let retired = retired_serial.clone();
            std::thread::Builder::new()
                .name("ember-gpu-timeline".to_string())
                .spawn(move || run_timeline(receiver, status, retired, config))
                .context("failed to spawn GPU timeline thread")?
        };

        Ok(Self {
            sender: Some(sender),
            worker: Some(worker),
            status,
            next_serial: AtomicU64::new(1),
            retired_serial,
        })
    }

    fn send(&self, item: QueueItem) -> Result<(), DeviceError> {
        self.status.check()?;
        let sent = self.sender.as_ref().map(|s| s.send(item).is_ok());
        if sent != Some(true) {
            let reason = "GPU timeline terminated".to_string();
            self.status.remove(reason.clone());
            return Err(DeviceError::Removed { reason });
        }
        Ok(())
    }

    /// Submits a closed command list. Returns its submission serial.
    pub fn execute(&self, list: CommandList) -> Result<u64, DeviceError> {
        let serial = self.next_serial.fetch_add(1, Ordering::AcqRel);
        self.send(QueueItem::Execute { list, serial })?;
        Ok(serial)
    }

    /// Enqueues a signal that sets `fence` to `value` once all prior work retires.
    pub fn signal(&self, fence: &Fence, value: u64) -> Result<(), DeviceError> {
        self.send(QueueItem::Signal {
            fence: fence.shared.clone(),
            value,
        })
    }

    pub(crate) fn present(
        &self,
        back_buffer: Arc<ResourceCell>,
        index: usize,
        sink: Arc<dyn PresentSink>,
    ) -> Result<(), DeviceError> {
        self.send(QueueItem::Present {
            back_buffer,
            index,
            sink,
        })
    }

    /// Highest submission serial the timeline has finished with.
    pub(crate) fn retired_serial(&self) -> u64 {
        self.retired_serial.load(Ordering::Acquire)
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        // Closing the channel lets the timeline drain and exit.
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("GPU timeline thread panicked");
            }
        }
    }
}

fn run_timeline(
    receiver: Receiver<QueueItem>,
    status: Arc<DeviceStatus>,
    retired: Arc<AtomicU64>,
    config: TimelineConfig,
) {
    let mut executor = Executor::new(config.validation);

    for item in receiver {
        match item {
            QueueItem::Execute { list, serial } => {
                if let Some(latency) = config.latency {
                    std::thread::sleep(latency);
                }
                if status.check().is_ok() {
                    if let Err(err) = executor.execute(&list) {
                        status.remove(format!("{err:#}"));
                    }
                }
                retired.store(serial, Ordering::Release);
            }
            QueueItem::Signal { fence, value } => {
                let value = if status.check().is_ok() { value } else { u64::MAX };
                log::trace!("timeline signal {value}");
                fence.advance(value);
            }
            QueueItem::Present {
                back_buffer,
                index,
                sink,
            } => {
                if status.check().is_err() {
                    continue;
                }
                match present_pixels(&back_buffer, index, config.validation) {
                    Ok(frame) => sink.present(frame),
                    Err(reason) => status.remove(reason),
                }
            }
        }
    }

    log::debug!("GPU timeline drained");
}

fn present_pixels(
    back_buffer: &ResourceCell,
    index: usize,
    validation: bool,
) -> Result<PresentedFrame, String> {
    if back_buffer.is_released() {
        return Err(format!("present of released back buffer '{}'", back_buffer.name()));
    }
    if validation && back_buffer.actual_state() != ResourceState::Present {
        return Err(format!(
            "present of '{}' in state {} (expected Present)",
            back_buffer.name(),
            back_buffer.actual_state()
        ));
    }
    let (width, height) = back_buffer.desc().extent(0);
    Ok(PresentedFrame {
        back_buffer_index: index,
        width,
        height,
        pixels: back_buffer.data().clone(),
    })
}
