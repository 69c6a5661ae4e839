use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley::config::{PlaybackConfig, SegmenterConfig};
use parley::voice::{
    AudioFormat, EnergyClassifier, FrameSource, MicrophoneSource, OutputSink, PlaybackQueue,
    Segment, SpeakerSink, StopSignal, VoiceSegmenter, WavFileSink, WavFileSource, decode_wav,
    f32_to_pcm16,
};
use parley::Config;

/// Extra time allowed past the queued audio's duration when draining
const DRAIN_GRACE: Duration = Duration::from_secs(5);

/// Parley - speech segmentation and queued playback
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/parley/config.toml)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Segment microphone speech into WAV files until interrupted
    Listen {
        /// Directory for segment files
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
        /// Stop after this many segments
        #[arg(short, long)]
        max_segments: Option<usize>,
    },
    /// Segment a recorded 16-bit WAV file
    Segment {
        /// Input WAV file
        input: PathBuf,
        /// Directory for segment files
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
    /// Play WAV files through the playback queue
    Play {
        /// WAV files, played in order
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Write to a WAV file instead of the speaker
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Play every captured segment back (loopback)
    Echo {
        /// Write to a WAV file instead of the speaker
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Test speaker output
    TestSpeaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley=info",
        1 => "info,parley=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded configuration");

    match cli.command {
        Command::Listen {
            out_dir,
            max_segments,
        } => {
            let out_dir = out_dir.unwrap_or_else(|| config.segments_dir.clone());
            listen(config.segmenter, out_dir, max_segments).await
        }
        Command::Segment { input, out_dir } => {
            let out_dir = out_dir.unwrap_or_else(|| config.segments_dir.clone());
            segment_file(&config.segmenter, &input, &out_dir)
        }
        Command::Play { files, output } => play_files(&config.playback, &files, output),
        Command::Echo { output } => echo(config, output).await,
        Command::TestSpeaker => test_speaker(&config.playback),
    }
}

/// Trigger `stop` on Ctrl-C
fn stop_on_ctrl_c(stop: StopSignal) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("stopped by user");
            stop.trigger();
        }
    });
}

/// Segment the microphone into WAV files
async fn listen(
    config: SegmenterConfig,
    out_dir: PathBuf,
    max_segments: Option<usize>,
) -> anyhow::Result<()> {
    std::fs::create_dir_all(&out_dir)?;
    let stop = StopSignal::new();
    stop_on_ctrl_c(stop.clone());

    // cpal input streams aren't Send; open and read on the blocking thread
    let written = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
        let source = MicrophoneSource::open(config.format())?;
        let classifier = EnergyClassifier::new(config.vad_mode, config.channels);
        let mut segmenter = VoiceSegmenter::new(&config, classifier)?;

        println!("Listening... press Ctrl-C to stop");
        let written = save_segments(&mut segmenter, source, stop, &out_dir, max_segments)?;
        Ok(written)
    })
    .await??;

    println!("Saved {written} segment(s)");
    Ok(())
}

/// Segment a WAV file into WAV files
fn segment_file(config: &SegmenterConfig, input: &Path, out_dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(out_dir)?;
    let source = WavFileSource::open(input)?;
    let format = source.format();

    let config = SegmenterConfig {
        sample_rate: format.sample_rate,
        channels: format.channels,
        ..config.clone()
    };
    let classifier = EnergyClassifier::new(config.vad_mode, config.channels);
    let mut segmenter = VoiceSegmenter::new(&config, classifier)?;

    let written = save_segments(&mut segmenter, source, StopSignal::new(), out_dir, None)?;
    println!("Saved {written} segment(s) from {}", input.display());
    Ok(())
}

fn save_segments<S: FrameSource>(
    segmenter: &mut VoiceSegmenter<EnergyClassifier>,
    source: S,
    stop: StopSignal,
    out_dir: &Path,
    max_segments: Option<usize>,
) -> anyhow::Result<usize> {
    let mut written = 0;
    for segment in segmenter.segments(source).with_stop(stop) {
        let path = write_segment(out_dir, written, &segment?)?;
        written += 1;
        println!("RECORDING_SAVED:{}", path.display());

        if max_segments.is_some_and(|max| written >= max) {
            break;
        }
    }
    Ok(written)
}

fn write_segment(out_dir: &Path, index: usize, segment: &Segment) -> anyhow::Result<PathBuf> {
    let encoded = segment.encode()?;
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = out_dir.join(format!(
        "segment_{timestamp}_{index:03}.{}",
        encoded.container.as_str()
    ));
    std::fs::write(&path, &encoded.data)?;

    tracing::info!(
        path = %path.display(),
        frames = segment.frame_count(),
        duration_ms = segment.duration_ms(),
        "segment saved"
    );
    Ok(path)
}

/// Build a playback queue writing to the speaker or a WAV file
fn open_queue(config: &PlaybackConfig, output: Option<PathBuf>) -> anyhow::Result<PlaybackQueue> {
    let format = config.format();
    let queue = match output {
        Some(path) => PlaybackQueue::new(config, move || {
            let sink: Box<dyn OutputSink> = Box::new(WavFileSink::create(&path, format)?);
            Ok(sink)
        })?,
        None => PlaybackQueue::new(config, move || {
            let sink: Box<dyn OutputSink> = Box::new(SpeakerSink::open(format)?);
            Ok(sink)
        })?,
    };
    Ok(queue)
}

/// Play WAV files in order
fn play_files(config: &PlaybackConfig, files: &[PathBuf], output: Option<PathBuf>) -> anyhow::Result<()> {
    let mut buffers = Vec::with_capacity(files.len());
    let mut format: Option<AudioFormat> = None;

    for path in files {
        let (file_format, pcm) = decode_wav(&std::fs::read(path)?)?;
        if let Some(expected) = format {
            if expected != file_format {
                tracing::warn!(
                    path = %path.display(),
                    ?file_format,
                    ?expected,
                    "format differs from first file, skipping"
                );
                continue;
            }
        } else {
            format = Some(file_format);
        }
        buffers.push(pcm);
    }

    let Some(format) = format else {
        anyhow::bail!("no playable files");
    };

    let config = PlaybackConfig {
        sample_rate: format.sample_rate,
        channels: format.channels,
        ..config.clone()
    };
    let total: usize = buffers.iter().map(Vec::len).sum();

    let mut queue = open_queue(&config, output)?;
    queue.start()?;
    for pcm in buffers {
        queue.enqueue(pcm);
    }

    let budget = Duration::from_millis(format.duration_ms(total)) + DRAIN_GRACE;
    if !queue.wait_idle(budget) {
        tracing::warn!(status = ?queue.status(), pending = queue.len(), "playback did not drain");
    }
    queue.stop()?;
    Ok(())
}

/// Loop captured segments straight back to the playback queue
async fn echo(config: Config, output: Option<PathBuf>) -> anyhow::Result<()> {
    let stop = StopSignal::new();
    stop_on_ctrl_c(stop.clone());

    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let seg_config = config.segmenter;
        let play_config = PlaybackConfig {
            sample_rate: seg_config.sample_rate,
            channels: seg_config.channels,
            ..config.playback
        };

        let mut queue = open_queue(&play_config, output)?;
        queue.start()?;
        let player = queue.handle();

        let source = MicrophoneSource::open(seg_config.format())?;
        let classifier = EnergyClassifier::new(seg_config.vad_mode, seg_config.channels);
        let mut segmenter = VoiceSegmenter::new(&seg_config, classifier)?;

        println!("Echoing speech... press Ctrl-C to stop");
        for segment in segmenter.segments(source).with_stop(stop) {
            let segment = segment?;
            tracing::info!(duration_ms = segment.duration_ms(), "echoing segment");
            player.enqueue(segment.pcm());

            if player.status() == parley::WorkerStatus::Failed {
                tracing::warn!("playback worker failed, restarting");
                queue.stop()?;
                queue.start()?;
            }
        }

        queue.stop()?;
        Ok(())
    })
    .await?
}

/// Test speaker output with a sine wave
fn test_speaker(config: &PlaybackConfig) -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (config.sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / config.sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    let mono = PlaybackConfig {
        channels: 1,
        ..config.clone()
    };
    let mut queue = open_queue(&mono, None)?;
    queue.start()?;

    println!("Playing {} samples at {} Hz...", samples.len(), config.sample_rate);
    queue.enqueue(f32_to_pcm16(&samples));

    if !queue.wait_idle(Duration::from_secs(2) + DRAIN_GRACE) {
        tracing::warn!(status = ?queue.status(), "tone did not finish playing");
    }
    queue.stop()?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}
