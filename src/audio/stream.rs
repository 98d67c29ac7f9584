// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

use std::error::Error;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tracing::{error, info, warn};

use super::thread_priority::{configure_thread_priority, render_thread_priority, rt_audio_enabled};
use super::RingBuffer;
use crate::engine::SoundEngine;
use crate::render::RenderPool;

/// How long the producer waits when the ring is full.
const PRODUCER_BACKOFF: Duration = Duration::from_micros(500);

/// Plays output 0 of an engine on the default output device.
///
/// A producer thread renders whole engine buffers into a ring that the
/// device callback drains, so the callback never renders or allocates.
pub struct Playback {
    running: Arc<AtomicBool>,
    underruns: Arc<AtomicU64>,
    producer: Option<thread::JoinHandle<()>>,
    // Dropping the stream closes the device.
    _stream: cpal::Stream,
}

impl Playback {
    /// Starts playback. `before_block` runs on the producer thread ahead of
    /// every rendered block, which is where control calls belong when they
    /// must line up with rendered time.
    pub fn start(
        engine: Arc<SoundEngine>,
        pool: Arc<RenderPool>,
        latency: Duration,
        mut before_block: impl FnMut(&SoundEngine) + Send + 'static,
    ) -> Result<Self, Box<dyn Error>> {
        let channels = engine
            .output_channels(0)
            .ok_or("the engine has no audio output")?;
        let sample_rate = engine.sample_rate();
        let block_frames = engine.samples_per_buffer();

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or("no default output device")?;

        let latency_samples = (latency.as_secs_f64() * sample_rate as f64) as usize * channels;
        let ring = Arc::new(RingBuffer::new(latency_samples.max(block_frames * channels * 2)));
        let running = Arc::new(AtomicBool::new(true));
        let underruns = Arc::new(AtomicU64::new(0));

        let producer = {
            let ring = ring.clone();
            let running = running.clone();
            let priority = render_thread_priority();
            let rt_audio = rt_audio_enabled();
            thread::Builder::new()
                .name("windchest-producer".to_string())
                .spawn(move || {
                    configure_thread_priority(priority, rt_audio, "producer");
                    let block_samples = block_frames * channels;
                    let mut scratch = vec![0.0f32; block_samples];
                    while running.load(Ordering::Acquire) {
                        if ring.space() >= block_samples {
                            before_block(&engine);
                            pool.get_samples(&engine, &mut scratch, block_frames);
                            ring.write(&scratch);
                        } else {
                            spin_sleep::sleep(PRODUCER_BACKOFF);
                        }
                    }
                })?
        };

        let config = cpal::StreamConfig {
            channels: channels as u16,
            sample_rate: sample_rate as cpal::SampleRate,
            buffer_size: cpal::BufferSize::Default,
        };
        let stream = {
            let ring = ring.clone();
            let underruns = underruns.clone();
            device.build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let read = ring.read(data);
                    if read < data.len() {
                        data[read..].fill(0.0);
                        underruns.fetch_add(1, Ordering::Relaxed);
                    }
                },
                |err| error!("CPAL output stream error: {}", err),
                None,
            )?
        };
        stream.play()?;
        info!(
            host = host.id().name(),
            channels,
            sample_rate,
            ring = ring.capacity(),
            "CPAL output stream started"
        );

        Ok(Self {
            running,
            underruns,
            producer: Some(producer),
            _stream: stream,
        })
    }

    /// Callbacks that found the ring short of samples.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(producer) = self.producer.take() {
            if producer.join().is_err() {
                warn!("Producer thread panicked");
            }
        }
        let underruns = self.underruns();
        if underruns > 0 {
            warn!(underruns, "Playback had underruns");
        }
    }
}
