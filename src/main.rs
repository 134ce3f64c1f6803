use framedex::cli::{Args, Command};
use framedex::frame::FrameBuffer;
use framedex::{EngineConfig, FrameSlice, VideoEngine};

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::time::Duration;

fn init_logging(args: &Args) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt.clone().unwrap_or_else(|| PathBuf::from("framedex.log"));
        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging, RUST_LOG wins when set
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn load_time_map(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not a JSON array of numbers", path.display()))
}

fn save_png(buffer: &FrameBuffer, path: &Path) -> Result<()> {
    let image = image::RgbImage::from_raw(buffer.width() as u32, buffer.height() as u32, buffer.to_rgb8())
        .context("Frame buffer does not match its dimensions")?;
    image
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!("Wrote {}", path.display());
    Ok(())
}

fn print_info(engine: &mut VideoEngine, file: &Path, stream: usize, wait: Option<Duration>) -> Result<()> {
    if let Some(timeout) = wait {
        if !engine.wait_for_index(timeout) {
            info!("Index not complete after {:?}", timeout);
        }
    }
    let info = engine.info().clone();
    let progress = engine.index_progress();
    let report = serde_json::json!({
        "file": file.display().to_string(),
        "stream": stream,
        "width": info.width,
        "height": info.height,
        "fps": info.fps,
        "time_base": [info.time_base.0, info.time_base.1],
        "start_pts": info.start_pts,
        "declared_frames": info.declared_frames,
        "estimated_frames": info.estimated_frames,
        "time_digits": info.time_digits(),
        "frame_count": engine.len(),
        "index": {
            "frames": progress.frames,
            "keyframes": progress.keyframes,
            "complete": progress.complete,
        },
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args)?;
    debug!("Command-line args: {:?}", args);

    let config = EngineConfig::resolve(args.config.clone()).context("Failed to load engine config")?;

    match args.command {
        Command::Info {
            file,
            wait,
            timeout_secs,
        } => {
            let mut engine = VideoEngine::open_with_config(&file, args.stream, None, config)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let wait = wait.then(|| Duration::from_secs(timeout_secs));
            print_info(&mut engine, &file, args.stream, wait)?;
            engine.close();
        }
        Command::Frame {
            file,
            time,
            ordinal,
            time_map,
            output,
        } => {
            let times = time_map.as_deref().map(load_time_map).transpose()?;
            let mut engine = VideoEngine::open_with_config(&file, args.stream, times, config)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let ordinal = match (time, ordinal) {
                (Some(ts), _) => engine.ordinal_at(ts),
                (None, Some(o)) => o,
                (None, None) => 0,
            };
            let frame = engine
                .frame(ordinal)
                .with_context(|| format!("Failed to decode frame {}", ordinal))?;
            save_png(&frame.pixels, &output)?;
            info!("Frame {} (pts {}) -> {}", ordinal, frame.pts, output.display());
            engine.close();
        }
        Command::Slice {
            file,
            start,
            stop,
            step,
            out_dir,
            prefix,
        } => {
            let mut engine = VideoEngine::open_with_config(&file, args.stream, None, config)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let slice = FrameSlice { start, stop, step };
            let stack = engine.read_slice(slice).context("Failed to read frames")?;
            std::fs::create_dir_all(&out_dir)
                .with_context(|| format!("Failed to create {}", out_dir.display()))?;
            for (i, ordinal) in stack.ordinals.iter().enumerate() {
                let Some(data) = stack.frame(i) else { continue };
                let buffer = FrameBuffer::from_vec(stack.width, stack.height, data.to_vec())?;
                save_png(&buffer, &out_dir.join(format!("{}_{:06}.png", prefix, ordinal)))?;
            }
            println!("{} frames written to {}", stack.count, out_dir.display());
            engine.close();
        }
    }
    Ok(())
}
