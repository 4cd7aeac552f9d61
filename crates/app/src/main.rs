use std::path::{Path, PathBuf};
use std::sync::Arc;

use backdrop_core::{
    render::SoftwareDevice, Anchor, AudioEngine, Canvas, CanvasLayerFactory, CanvasLayout,
    EngineCommand, EngineConfig, EnergyExtractor, FileArtwork, FilePreferences,
    MemoryPreferences, PaletteDeriver, PlaybackEvent, Recorder, RecordingSettings,
    RendererChoice, SharedEnergy, VisualEngine, VisualError,
};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

fn main() -> backdrop_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Render(args) => run_render(args),
        Commands::Palette { artwork, seed } => run_palette(artwork.as_deref(), &seed),
        Commands::Config { out } => EngineConfig::default().save(&out),
    }
}

fn run_render(args: RenderArgs) -> backdrop_core::Result<()> {
    let mut config = match args.config.as_deref() {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(renderer) = args.renderer {
        config.engine.renderer = renderer.into();
    }

    let (samples, sample_rate) = read_mono(&args.input)?;
    config.analyser.sample_rate = sample_rate;
    let fps = args.fps.max(1);
    let chunk = (sample_rate / fps).max(1) as usize;
    let total = args
        .frames
        .map(|n| n as usize)
        .unwrap_or_else(|| samples.len().div_ceil(chunk));
    tracing::info!(input = ?args.input, sample_rate, fps, frames = total, "rendering");

    let audio = AudioEngine::new(&config.analyser);
    let energy = SharedEnergy::new(EnergyExtractor::new(audio.analysis(), config.energy.clone()));
    let layout = CanvasLayout::new(args.width, args.height, args.dpr);
    let canvas = Canvas::new(layout).with_shading(Box::new(SoftwareDevice::new()));
    let factory = CanvasLayerFactory::new(canvas).with_overlay(Arc::new(page_anchors(layout)), layout);

    let palette = PaletteDeriver::new(FileArtwork::new("."), config.palette.clone())
        .derive(args.artwork.as_deref().and_then(Path::to_str), &args.seed);

    let mut engine = match args.prefs.as_deref() {
        Some(path) => VisualEngine::new(config, Arc::new(energy), factory, FilePreferences::open(path)?),
        None => VisualEngine::new(config, Arc::new(energy), factory, MemoryPreferences::new()),
    }
    .with_audio(audio.clone());
    engine.set_palette(palette);
    if let Some(mode) = args.mode {
        engine.set_mode(mode)?;
    }

    let mut recorder = Recorder::new(RecordingSettings {
        output_dir: args.out,
        fps,
        prefix: "frame".to_string(),
    });
    recorder.start()?;
    engine.apply(EngineCommand::TogglePlayback)?;

    let frame_ms = 1000.0 / fps as f64;
    for (index, block) in samples
        .chunks(chunk)
        .chain(std::iter::repeat(&[][..]))
        .take(total)
        .enumerate()
    {
        audio.push_samples(block)?;
        engine.frame(index as f64 * frame_ms);
        recorder.capture(&engine)?;
    }

    audio.end()?;
    engine.on_playback(PlaybackEvent::Ended)?;
    recorder.stop()?;
    tracing::info!(frames = recorder.frames_written(), mode = engine.mode(), "render complete");
    Ok(())
}

fn run_palette(artwork: Option<&Path>, seed: &str) -> backdrop_core::Result<()> {
    let deriver = PaletteDeriver::new(FileArtwork::new("."), EngineConfig::default().palette);
    let palette = deriver.derive(artwork.and_then(Path::to_str), seed);
    println!("{}", serde_json::to_string_pretty(&palette)?);
    Ok(())
}

/// Decodes a WAV file and averages its channels.
fn read_mono(path: &Path) -> backdrop_core::Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path).map_err(wav_error)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(wav_error)?,
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(wav_error)?
        }
    };
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

fn wav_error(err: hound::Error) -> VisualError {
    VisualError::msg(format!("wav decode failed: {err}"))
}

/// Stand-ins for the page elements the overlay connects: player, brand
/// mark, latest-track label and a row of track tiles.
fn page_anchors(layout: CanvasLayout) -> impl Fn() -> Vec<Anchor> {
    let (w, h) = (layout.css_width, layout.css_height);
    move || {
        let mut anchors = vec![
            Anchor::new(w * 0.82, h * 0.78),
            Anchor::new(w * 0.12, h * 0.12),
            Anchor::new(w * 0.50, h * 0.30),
        ];
        anchors.extend((0..4).map(|i| Anchor::new(w * (0.2 + 0.2 * i as f32), h * 0.58)));
        anchors
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Headless host for the audio-reactive backdrop", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Play a WAV file through the engine and write the frames as PNGs.
    Render(RenderArgs),
    /// Print the palette derived from artwork or a seed string.
    Palette {
        /// Artwork image; the seed is used when it cannot be decoded.
        #[arg(long)]
        artwork: Option<PathBuf>,
        #[arg(long, default_value = "backdrop")]
        seed: String,
    },
    /// Write the default engine configuration.
    Config {
        #[arg(long, default_value = "backdrop.json")]
        out: PathBuf,
    },
}

#[derive(clap::Args, Debug)]
struct RenderArgs {
    /// WAV file to play.
    input: PathBuf,
    /// Directory receiving the numbered frames.
    #[arg(long, default_value = "frames")]
    out: PathBuf,
    /// Number of frames; defaults to the length of the input.
    #[arg(long)]
    frames: Option<u32>,
    #[arg(long, default_value_t = 60)]
    fps: u32,
    #[arg(long, default_value_t = 320.0)]
    width: f32,
    #[arg(long, default_value_t = 180.0)]
    height: f32,
    #[arg(long, default_value_t = 1.0)]
    dpr: f32,
    #[arg(long, value_enum)]
    renderer: Option<RendererArg>,
    /// Initial visual mode; wrapped into the renderer's mode count.
    #[arg(long, allow_negative_numbers = true)]
    mode: Option<i64>,
    #[arg(long)]
    artwork: Option<PathBuf>,
    /// Seed for the fallback palette.
    #[arg(long, default_value = "backdrop")]
    seed: String,
    #[arg(long)]
    config: Option<PathBuf>,
    /// Preference file holding the persisted mode.
    #[arg(long)]
    prefs: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum RendererArg {
    Auto,
    Shader,
    #[value(name = "canvas2d")]
    Canvas2d,
    #[value(name = "none")]
    Off,
}

impl From<RendererArg> for RendererChoice {
    fn from(arg: RendererArg) -> Self {
        match arg {
            RendererArg::Auto => RendererChoice::Auto,
            RendererArg::Shader => RendererChoice::Shader,
            RendererArg::Canvas2d => RendererChoice::Canvas2d,
            RendererArg::Off => RendererChoice::None,
        }
    }
}
