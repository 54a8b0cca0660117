//! Bridge between the engine's push-style sample callback and a pull-style
//! audio output device.
//!
//! Both sides run on the same logical thread but are driven by independent
//! clocks (display refresh vs. the device's buffer callback). A bounded ring
//! buffer absorbs the skew: the producer overwrites the oldest samples when
//! it runs ahead, the consumer gets silence when it runs dry.

use ringbuf::{
    HeapRb,
    traits::{Consumer, Observer, RingBuffer},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AudioDeviceError, SessionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AudioMode {
    #[default]
    Auto,
    Disabled,
}

/// Platform audio output.
///
/// After `open` succeeds the platform starts calling back into the session
/// for sample blocks ([`AudioBridge::pull_into`]); after `close` it must stop.
pub trait AudioDevice {
    fn open(&mut self, sample_rate: u32) -> Result<(), AudioDeviceError>;
    fn close(&mut self);
}

/// Device for hosts without audio output. Opening it always fails, which
/// puts the bridge in video-only mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudioDevice;

impl AudioDevice for NoAudioDevice {
    fn open(&mut self, _sample_rate: u32) -> Result<(), AudioDeviceError> {
        Err(AudioDeviceError("no audio output on this host".to_string()))
    }

    fn close(&mut self) {}
}

/// Bounded queue of interleaved stereo samples.
///
/// Capacity is always even so stereo pairs never split when the oldest
/// samples are overwritten.
pub struct SampleQueue {
    ring: HeapRb<f32>,
}

impl SampleQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_multiple_of(2);
        Self {
            ring: HeapRb::new(capacity),
        }
    }

    /// Capacity for `seconds` of stereo audio at `sample_rate`.
    pub fn for_duration(sample_rate: u32, seconds: f32) -> Self {
        let samples = (sample_rate as f32 * seconds * 2.0).ceil() as usize;
        Self::new(samples)
    }

    #[inline]
    pub fn push(&mut self, left: f32, right: f32) {
        self.ring.push_overwrite(left);
        self.ring.push_overwrite(right);
    }

    /// Fills `out` from the front of the queue, padding with silence.
    /// Returns how many queued samples were consumed.
    pub fn pop_into(&mut self, out: &mut [f32]) -> usize {
        let filled = self.ring.pop_slice(out);
        out[filled..].fill(0.0);
        filled
    }

    pub fn clear(&mut self) {
        while self.ring.try_pop().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Not opened yet.
    Closed,
    Open,
    /// Opening failed; the session runs without sound.
    Unavailable,
    /// Audio switched off by configuration.
    Disabled,
    /// Closed for good; `initialize` never reopens it.
    TornDown,
}

pub struct AudioBridge {
    queue: SampleQueue,
    device: Box<dyn AudioDevice>,
    state: DeviceState,
    sample_rate: u32,
}

impl AudioBridge {
    pub fn new(
        device: Box<dyn AudioDevice>,
        mode: AudioMode,
        sample_rate: u32,
        queue_seconds: f32,
    ) -> Self {
        let state = match mode {
            AudioMode::Auto => DeviceState::Closed,
            AudioMode::Disabled => DeviceState::Disabled,
        };
        Self {
            queue: SampleQueue::for_duration(sample_rate, queue_seconds),
            device,
            state,
            sample_rate,
        }
    }

    /// Opens the output device. Must run from a user gesture on platforms
    /// that gate audio behind one.
    ///
    /// Idempotent: an open device is left alone, and a device that already
    /// failed is not retried. The failure is only returned the first time.
    pub fn initialize(&mut self) -> Result<(), SessionError> {
        if self.state != DeviceState::Closed {
            return Ok(());
        }

        match self.device.open(self.sample_rate) {
            Ok(()) => {
                debug!(sample_rate = self.sample_rate, "audio device opened");
                self.state = DeviceState::Open;
                Ok(())
            }
            Err(err) => {
                warn!(%err, "audio unavailable, continuing without sound");
                self.state = DeviceState::Unavailable;
                self.queue.clear();
                Err(SessionError::AudioUnavailable {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Producer side, called for every sample pair the engine generates.
    #[inline]
    pub fn enqueue(&mut self, left: f32, right: f32) {
        if matches!(
            self.state,
            DeviceState::Unavailable | DeviceState::Disabled | DeviceState::TornDown
        ) {
            return;
        }
        self.queue
            .push(left.clamp(-1.0, 1.0), right.clamp(-1.0, 1.0));
    }

    /// Consumer side: fills `out` with interleaved stereo samples. Never
    /// blocks; missing samples are silence.
    pub fn pull_into(&mut self, out: &mut [f32]) -> usize {
        self.queue.pop_into(out)
    }

    /// Allocating variant of [`Self::pull_into`] for `frames` stereo frames.
    pub fn pull_block(&mut self, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames * 2];
        self.queue.pop_into(&mut out);
        out
    }

    /// Drops everything queued (reset, state load).
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Closes the device for good. Safe to call repeatedly; later
    /// `initialize` calls are no-ops.
    pub fn teardown(&mut self) {
        if self.state == DeviceState::Open {
            self.device.close();
            debug!("audio device closed");
        }
        self.state = DeviceState::TornDown;
        self.queue.clear();
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }
}
