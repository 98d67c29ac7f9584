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
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

use windchest::audio::Playback;
use windchest::config::EngineConfig;
use windchest::demo::{DemoOrgan, Score, ScorePlayer};
use windchest::engine::{MeterInfo, SoundEngine};
use windchest::render::RenderPool;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A real-time pipe organ sampler."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validates an engine config and prints the resolved layout.
    Check {
        /// The path to the engine config.
        config: PathBuf,
    },
    /// Renders the demo score to a WAV file.
    Render {
        /// The path to the engine config.
        config: PathBuf,
        /// The WAV file to write.
        output: PathBuf,
        /// Length of the demo score in seconds.
        #[arg(short, long, default_value_t = 12.0)]
        seconds: f64,
        /// A WAV file to add as an extra rank.
        #[arg(long)]
        sample: Option<PathBuf>,
    },
    /// Plays the demo score on the default output device.
    Play {
        /// The path to the engine config.
        config: PathBuf,
        /// Length of the demo score in seconds.
        #[arg(short, long, default_value_t = 12.0)]
        seconds: f64,
        /// A WAV file to add as an extra rank.
        #[arg(long)]
        sample: Option<PathBuf>,
    },
}

#[derive(Serialize)]
struct Layout<'a> {
    sample_rate: u32,
    buffer_size: usize,
    polyphony: usize,
    release_groups: usize,
    tremulants: Vec<&'a str>,
    windchests: Vec<&'a str>,
    audio_groups: &'a [String],
    outputs: Vec<OutputLayout<'a>>,
    reverb: bool,
}

#[derive(Serialize)]
struct OutputLayout<'a> {
    name: &'a str,
    channels: usize,
    latency_ms: u128,
}

/// Everything needed to play the demo score.
struct Demo {
    engine: Arc<SoundEngine>,
    pool: Arc<RenderPool>,
    player: ScorePlayer,
}

impl Demo {
    fn new(
        config: &EngineConfig,
        seconds: f64,
        sample: Option<&Path>,
    ) -> Result<Self, Box<dyn Error>> {
        let setup = config.to_setup()?;
        let organ = DemoOrgan::new(setup.sample_rate, setup.windchests.len(), sample)?;
        let score = Score::demo(
            Duration::from_secs_f64(seconds.max(0.0)),
            organ.ranks.len(),
            setup.tremulants.len(),
        );
        let engine = Arc::new(SoundEngine::new(&setup, Arc::new(organ.instrument))?);
        let pool = Arc::new(RenderPool::new(config.engine().render_threads())?);
        Ok(Self {
            engine,
            pool,
            player: ScorePlayer::new(score, organ.ranks),
        })
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { config } => {
            let config = EngineConfig::load(&config)?;
            let setup = config.to_setup()?;
            let layout = Layout {
                sample_rate: setup.sample_rate,
                buffer_size: setup.samples_per_buffer,
                polyphony: setup.hard_polyphony,
                release_groups: setup.extra_release_groups + 1,
                tremulants: config.tremulants().iter().map(|t| t.name()).collect(),
                windchests: config.windchests().iter().map(|w| w.name()).collect(),
                audio_groups: config.audio_groups(),
                outputs: config
                    .outputs()
                    .iter()
                    .map(|output| {
                        Ok(OutputLayout {
                            name: output.name(),
                            channels: output.channels(),
                            latency_ms: output.latency()?.as_millis(),
                        })
                    })
                    .collect::<Result<_, windchest::config::ConfigError>>()?,
                reverb: setup.reverb.is_some(),
            };
            print!("{}", serde_yml::to_string(&layout)?);
        }
        Commands::Render {
            config,
            output,
            seconds,
            sample,
        } => {
            let config = EngineConfig::load(&config)?;
            let Demo {
                engine,
                pool,
                mut player,
            } = Demo::new(&config, seconds, sample.as_deref())?;
            let channels = engine.output_channels(0).ok_or("the engine has no audio output")?;
            let spec = hound::WavSpec {
                channels: channels as u16,
                sample_rate: engine.sample_rate(),
                bits_per_sample: 32,
                sample_format: hound::SampleFormat::Float,
            };
            let mut writer = hound::WavWriter::create(&output, spec)?;

            // Render past the end of the score so releases can finish.
            let frames = engine.samples_per_buffer();
            let tail = engine.sample_rate() as usize * 2;
            let mut remaining = (seconds.max(0.0) * engine.sample_rate() as f64) as usize + tail;
            let mut buffer = vec![0.0f32; frames * channels];
            let mut meter = MeterInfo::default();
            while remaining > 0 {
                let block = remaining.min(frames);
                player.apply(&engine, block);
                let info = pool.get_samples(&engine, &mut buffer, block);
                meter = meter.merge(info);
                for sample in &buffer[..block * channels] {
                    writer.write_sample(*sample)?;
                }
                remaining -= block;
            }
            writer.finalize()?;
            info!(
                path = %output.display(),
                peak_left = meter.meter_left,
                peak_right = meter.meter_right,
                voices = engine.active_voices(),
                "Rendered demo score"
            );
        }
        Commands::Play {
            config,
            seconds,
            sample,
        } => {
            let config = EngineConfig::load(&config)?;
            let latency = config
                .outputs()
                .first()
                .map(|output| output.latency())
                .transpose()?
                .unwrap_or(Duration::from_millis(50));
            let Demo {
                engine,
                pool,
                mut player,
            } = Demo::new(&config, seconds, sample.as_deref())?;
            let frames = engine.samples_per_buffer();
            let playback = Playback::start(engine.clone(), pool, latency, move |engine| {
                player.apply(engine, frames)
            })?;
            std::thread::sleep(Duration::from_secs_f64(seconds.max(0.0) + 2.0));
            info!(
                underruns = playback.underruns(),
                peak_left = engine.meter().meter_left,
                "Playback finished"
            );
        }
    }
    Ok(())
}
