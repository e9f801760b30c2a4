//! Afterimage: effect-chain video compositor CLI.

use afterimage::capture::{list_cameras, SourceSpec};
use afterimage::config::{AppConfig, BackendKind, ConfigOverrides};
use afterimage::effect::{Chain, EffectKind};
use afterimage::mode::Mode;
use afterimage::output::{HeadlessOutput, OutputBackend, WindowConfig, WindowRenderer};
use afterimage::preset::{PresetError, PresetStore};
use afterimage::session::{AppCompositor, Session};
use afterimage::shader::{Compositor, CpuBackend, WgpuBackend};
use afterimage::utils::FpsCounter;
use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

/// Where composited frames go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    /// Display in a window (default)
    Window,
    /// Render offscreen; see --frames and --snapshot
    Headless,
}

/// Real-time effect-chain compositor with temporal feedback.
#[derive(Parser, Debug)]
#[command(name = "afterimage")]
#[command(about = "Run live video through a chain of shader effects")]
struct Args {
    /// YAML config file; watched and re-applied on change
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source to play instead of the configured ones: a camera index,
    /// a video file, or "pattern"
    #[arg(short, long)]
    input: Option<String>,

    /// Viewport width
    #[arg(long)]
    width: Option<u32>,

    /// Viewport height
    #[arg(long)]
    height: Option<u32>,

    /// Target frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Render backend
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Output mode
    #[arg(long, value_enum, default_value = "window")]
    output: OutputMode,

    /// Starting chain mode
    #[arg(long, value_enum)]
    mode: Option<Mode>,

    /// Stop after this many rendered frames
    #[arg(long)]
    frames: Option<u64>,

    /// Write the last composite to this PNG on exit (headless output)
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// List available cameras and exit
    #[arg(long)]
    list_devices: bool,

    /// List effect kinds and their parameters and exit
    #[arg(long)]
    list_effects: bool,

    /// Preset store file, instead of presets_path from the config
    #[arg(long)]
    presets: Option<PathBuf>,

    /// Start with this preset's chain
    #[arg(long)]
    preset: Option<String>,

    /// Save the configured chain as a preset and exit
    #[arg(long, value_name = "NAME")]
    save_preset: Option<String>,

    /// Import a preset exported by --export-preset and exit
    #[arg(long, value_name = "FILE")]
    import_preset: Option<PathBuf>,

    /// Write a preset to <export-dir>/<NAME>.json and exit
    #[arg(long, value_name = "NAME")]
    export_preset: Option<String>,

    /// Directory for --export-preset
    #[arg(long, default_value = ".")]
    export_dir: PathBuf,

    /// Delete a preset and exit
    #[arg(long, value_name = "NAME")]
    delete_preset: Option<String>,

    /// List saved presets and exit
    #[arg(long)]
    list_presets: bool,
}

fn parse_input(input: &str) -> SourceSpec {
    if input.eq_ignore_ascii_case("pattern") {
        SourceSpec::Pattern
    } else if let Ok(device) = input.parse() {
        SourceSpec::Camera { device }
    } else {
        SourceSpec::Clip { path: PathBuf::from(input), looping: true }
    }
}

/// Command-line values that replace the config file's.
fn overrides_from(args: &Args) -> ConfigOverrides {
    ConfigOverrides {
        sources: args.input.as_deref().map(|input| vec![parse_input(input)]),
        width: args.width,
        height: args.height,
        fps: args.fps,
        backend: args.backend,
        mode: args.mode,
        presets_path: args.presets.clone(),
        chain: None,
    }
}

/// The config file as loaded, plus the overrides to apply on top of it.
/// `--preset` becomes the override chain.
fn resolve_config(args: &Args) -> Result<(AppConfig, ConfigOverrides)> {
    let file = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let mut overrides = overrides_from(args);
    if let Some(name) = &args.preset {
        let mut effective = file.clone();
        overrides.apply(&mut effective);
        let store = open_store(&effective)?;
        let entries = store.get(name).ok_or_else(|| PresetError::NotFound(name.clone()))?;
        overrides.chain = Some(entries.to_vec());
    }
    Ok((file, overrides))
}

fn open_store(config: &AppConfig) -> Result<PresetStore> {
    let path = config
        .presets_path
        .as_ref()
        .ok_or_else(|| anyhow!("No preset store: pass --presets or set presets_path in the config"))?;
    Ok(PresetStore::open(path)?)
}

/// Run the preset management flags. Returns false when none were given.
fn run_preset_commands(args: &Args, config: &AppConfig) -> Result<bool> {
    let requested = args.save_preset.is_some()
        || args.import_preset.is_some()
        || args.export_preset.is_some()
        || args.delete_preset.is_some()
        || args.list_presets;
    if !requested {
        return Ok(false);
    }
    let mut store = open_store(config)?;

    if let Some(name) = &args.save_preset {
        store.save(name, &Chain::from_entries(&config.chain))?;
        println!("Saved preset \"{}\"", name.trim());
    }
    if let Some(file) = &args.import_preset {
        let name = store.import_file(file)?;
        println!("Imported preset \"{}\"", name);
    }
    if let Some(name) = &args.export_preset {
        let target = store.export_to_dir(name, &args.export_dir)?;
        println!("Exported preset \"{}\" to {}", name, target.display());
    }
    if let Some(name) = &args.delete_preset {
        store.delete(name)?;
        println!("Deleted preset \"{}\"", name);
    }
    if args.list_presets {
        println!("Presets in {}:", store.path().map(|p| p.display().to_string()).unwrap_or_default());
        for name in store.names() {
            let count = store.get(name).map_or(0, <[_]>::len);
            println!("  {:<24} {} effect(s)", name, count);
        }
    }
    Ok(true)
}

fn print_effects() {
    println!("Available effects:");
    for kind in EffectKind::ALL {
        println!("  {:<16} {}", kind.id(), kind.display_name());
        for spec in kind.schema() {
            println!(
                "      {:<10} default {:<6} range [{}, {}] step {}",
                spec.name, spec.default, spec.min, spec.max, spec.step
            );
        }
    }
}

/// Application state for the event loop.
struct AfterimageApp {
    session: Session,
    window_config: WindowConfig,
    frame_limit: Option<u64>,
    window: Option<Arc<Window>>,
    renderer: Option<WindowRenderer>,
    compositor: Option<AppCompositor>,
    last_frame_time: Instant,
    frame_duration: Duration,
    present_fps: FpsCounter,
}

impl AfterimageApp {
    fn new(session: Session, frame_limit: Option<u64>) -> Self {
        let config = session.config();
        let window_config = WindowConfig {
            width: config.width,
            height: config.height,
            ..WindowConfig::default()
        };
        let frame_duration = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
        Self {
            session,
            window_config,
            frame_limit,
            window: None,
            renderer: None,
            compositor: None,
            last_frame_time: Instant::now(),
            frame_duration,
            present_fps: FpsCounter::default(),
        }
    }

    /// Create the renderer and a compositor sized to the window.
    fn initialize(&mut self, window: Arc<Window>) -> Result<()> {
        let renderer = WindowRenderer::new(window.clone())?;
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));

        let compositor = match self.session.config().backend {
            BackendKind::Gpu => {
                let context = renderer.context();
                let backend = WgpuBackend::new(context.device.clone(), context.queue.clone())?;
                AppCompositor::Gpu(Compositor::new(backend, width, height))
            }
            BackendKind::Cpu => AppCompositor::Cpu(Compositor::new(CpuBackend::new(), width, height)),
        };
        info!("Compositor ready on the {} backend at {}x{}", compositor.backend_name(), width, height);

        self.renderer = Some(renderer);
        self.compositor = Some(compositor);
        self.window = Some(window);
        Ok(())
    }

    /// Returns false once the frame limit is reached.
    fn process_frame(&mut self) -> bool {
        let (Some(renderer), Some(compositor)) = (&mut self.renderer, &mut self.compositor) else {
            return true;
        };

        // The window size drives the viewport here.
        let _ = self.session.take_viewport_request();
        if let Some(composite) = self.session.step(compositor) {
            if let Err(e) = renderer.write_frame(&composite) {
                error!("Render error: {}", e);
            }
            if let Some(fps) = self.present_fps.update() {
                debug!("[Perf] Presenting at {:.2} FPS", fps);
            }
        }
        self.frame_limit.is_none_or(|limit| compositor.frames_rendered() < limit)
    }
}

impl ApplicationHandler for AfterimageApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window = match event_loop.create_window(self.window_config.attributes()) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };
        if let Err(e) = self.initialize(window) {
            error!("Initialization error: {:#}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Window closed");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(renderer) = &mut self.renderer {
                    renderer.resize(size);
                }
                if let Some(compositor) = &mut self.compositor {
                    compositor.resize(size.width, size.height);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= self.frame_duration {
                    self.last_frame_time = now;
                    if !self.process_frame() {
                        info!("Frame limit reached");
                        event_loop.exit();
                        return;
                    }
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.list_devices {
        println!("Available cameras:");
        match list_cameras() {
            Ok(devices) => {
                for device in devices {
                    println!("  [{}] {}", device.index, device.name);
                }
            }
            Err(e) => eprintln!("Failed to list devices: {}", e),
        }
        return Ok(());
    }
    if args.list_effects {
        print_effects();
        return Ok(());
    }

    let (file_config, overrides) = resolve_config(&args)?;
    let mut config = file_config.clone();
    overrides.apply(&mut config);
    if run_preset_commands(&args, &config)? {
        return Ok(());
    }

    info!("Starting Afterimage...");
    let session = Session::new(file_config, args.config.clone(), overrides);

    match args.output {
        OutputMode::Window => run_window_mode(session, args.frames),
        OutputMode::Headless => run_headless_mode(session, args.frames, args.snapshot),
    }
}

fn run_window_mode(session: Session, frame_limit: Option<u64>) -> Result<()> {
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = AfterimageApp::new(session, frame_limit);
    event_loop.run_app(&mut app)?;
    Ok(())
}

fn run_headless_mode(mut session: Session, frame_limit: Option<u64>, snapshot: Option<PathBuf>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let config = session.config().clone();
    let mut compositor = AppCompositor::headless(config.backend, config.width, config.height)?;
    let mut output = HeadlessOutput::new(snapshot);
    let frame_duration = Duration::from_secs_f64(1.0 / config.fps.max(1) as f64);
    let mut fps_counter = FpsCounter::default();
    info!("Rendering headless on the {} backend at {} fps", compositor.backend_name(), config.fps);

    while running.load(Ordering::SeqCst) {
        if frame_limit.is_some_and(|limit| compositor.frames_rendered() >= limit) {
            break;
        }
        let frame_start = Instant::now();

        if let Some((width, height)) = session.take_viewport_request() {
            compositor.resize(width, height);
        }
        if let Some(composite) = session.step(&mut compositor) {
            output.write_frame(&composite)?;
            if let Some(fps) = fps_counter.update() {
                debug!("[Perf] Headless: {:.2} FPS", fps);
            }
        }

        let elapsed = frame_start.elapsed();
        if elapsed < frame_duration {
            thread::sleep(frame_duration - elapsed);
        }
    }

    info!("Rendered {} frame(s)", output.frames_written());
    output.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn args(extra: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("afterimage").chain(extra.iter().copied())).unwrap()
    }

    fn effective(args: &Args) -> AppConfig {
        let (mut config, overrides) = resolve_config(args).unwrap();
        overrides.apply(&mut config);
        config
    }

    #[test]
    fn test_input_parsing() {
        assert_eq!(parse_input("PATTERN"), SourceSpec::Pattern);
        assert_eq!(parse_input("2"), SourceSpec::Camera { device: 2 });
        assert_eq!(parse_input("a.mp4"), SourceSpec::Clip { path: "a.mp4".into(), looping: true });
    }

    #[test]
    fn test_preset_commands_drive_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let store_path = dir.path().join("presets.json");
        let store = store_path.to_str().unwrap();
        let out_dir = dir.path().join("out");
        fs::create_dir(&out_dir).unwrap();

        assert!(!run_preset_commands(&args(&[]), &AppConfig::default()).unwrap());

        let save = args(&["--presets", store, "--save-preset", "starter"]);
        assert!(run_preset_commands(&save, &effective(&save)).unwrap());
        let chain = effective(&args(&["--presets", store, "--preset", "starter"])).chain;
        let kinds = |entries: &[afterimage::effect::ChainEntry]| entries.iter().map(|e| e.kind.clone()).collect::<Vec<_>>();
        assert_eq!(kinds(&chain), kinds(&AppConfig::default().chain));

        let export = args(&["--presets", store, "--export-preset", "starter", "--export-dir", out_dir.to_str().unwrap()]);
        run_preset_commands(&export, &effective(&export)).unwrap();
        let exported = out_dir.join("starter.json");
        assert!(exported.exists());

        let delete = args(&["--presets", store, "--delete-preset", "starter"]);
        run_preset_commands(&delete, &effective(&delete)).unwrap();
        assert!(PresetStore::open(&store_path).unwrap().is_empty());

        let import = args(&["--presets", store, "--import-preset", exported.to_str().unwrap(), "--list-presets"]);
        run_preset_commands(&import, &effective(&import)).unwrap();
        assert_eq!(PresetStore::open(&store_path).unwrap().names().collect::<Vec<_>>(), vec!["starter"]);
    }

    #[test]
    fn test_preset_commands_need_a_store() {
        let list = args(&["--list-presets"]);
        assert!(run_preset_commands(&list, &effective(&list)).is_err());
        assert!(resolve_config(&args(&["--preset", "missing"])).is_err());

        let dir = tempfile::tempdir().unwrap();
        let store = dir.path().join("presets.json");
        assert!(resolve_config(&args(&["--presets", store.to_str().unwrap(), "--preset", "missing"])).is_err());
    }

    #[test]
    fn test_overrides_come_from_flags() {
        let parsed = args(&["--input", "pattern", "--width", "320", "--mode", "freestyle"]);
        let overrides = overrides_from(&parsed);
        assert_eq!(overrides.sources, Some(vec![SourceSpec::Pattern]));
        assert_eq!(overrides.width, Some(320));
        assert_eq!(overrides.height, None);
        assert_eq!(overrides.mode, Some(Mode::Freestyle));
        assert_eq!(overrides.chain, None);
    }
}
