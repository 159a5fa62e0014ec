mod cli;

use anistream::{
    config,
    job::JobRegistry,
    pipeline::{PackagingMode, StreamPipeline},
    probe::TrackInspector,
    tools,
};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::time::Duration;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG if set, otherwise pick defaults from the verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "anistream=trace".to_string()
        } else {
            "anistream=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Process {
            stream_id,
            url,
            adaptive,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(process_stream(
                &stream_id,
                &url,
                adaptive,
                cli.config.as_deref(),
            ))
        }
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, json, cli.config.as_deref()))
        }
        Commands::Cleanup {
            stream_id,
            max_age_minutes,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(cleanup(
                stream_id.as_deref(),
                max_age_minutes,
                cli.config.as_deref(),
            ))
        }
        Commands::CheckTools => check_tools(),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("anistream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn process_stream(
    stream_id: &str,
    url: &str,
    adaptive: bool,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = JobRegistry::new();
    let pipeline = StreamPipeline::new(&config, registry)?;

    let mode = if adaptive {
        PackagingMode::Adaptive
    } else {
        PackagingMode::SingleRendition
    };

    let output = pipeline.process(stream_id, url, mode).await?;

    println!("Stream ready: {}", output.master_playlist.display());
    println!("Renditions: {}", output.renditions.join(", "));
    if let Some(video) = &output.tracks.video {
        println!("Video: {} {}x{}", video.codec, video.width, video.height);
    }
    println!("Audio tracks: {}", output.tracks.audio.len());

    Ok(())
}

async fn probe_file(
    file: &std::path::Path,
    json: bool,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let config = config::load_config_or_default(config_path)?;
    let inspector = TrackInspector::new(config.tracks);
    let info = inspector.inspect(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    println!("Container: {}", info.container);
    if let Some(duration) = info.duration_secs {
        let secs = duration as u64;
        let mins = secs / 60;
        let hours = mins / 60;
        println!("Duration: {:02}:{:02}:{:02}", hours, mins % 60, secs % 60);
    }

    match &info.video {
        Some(video) => {
            print!("Video: {} {}x{}", video.codec, video.width, video.height);
            if let Some(fps) = video.frame_rate {
                print!(" {:.3} fps", fps);
            }
            println!();
        }
        None => println!("Video: none"),
    }

    println!("\nAudio Tracks: {}", info.audio.len());
    for track in &info.audio {
        print!("  [{}] {} \"{}\" ({})", track.index, track.codec, track.title, track.language);
        if let Some(channels) = track.channels {
            print!(" {}ch", channels);
        }
        if track.default {
            print!(" [default]");
        }
        println!();
    }

    println!("\nSubtitle Tracks: {}", info.subtitles.len());
    for track in &info.subtitles {
        print!("  [{}] {} \"{}\" ({})", track.index, track.codec, track.title, track.language);
        if track.forced {
            print!(" [forced]");
        }
        if track.default {
            print!(" [default]");
        }
        println!();
    }

    Ok(())
}

async fn cleanup(
    stream_id: Option<&str>,
    max_age_minutes: Option<u64>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let config = config::load_config_or_default(config_path)?;
    let registry = JobRegistry::new();
    let pipeline = StreamPipeline::new(&config, registry)?;

    match stream_id {
        Some(id) => {
            pipeline.cleanup_one(id).await?;
            println!("Removed stream {}", id);
        }
        None => {
            let minutes = max_age_minutes.unwrap_or(config.storage.retention_minutes);
            let removed = pipeline
                .cleanup_stale(Duration::from_secs(minutes * 60))
                .await;
            println!("Removed {} stale stream(s)", removed);
        }
    }

    Ok(())
}

fn check_tools() -> Result<()> {
    println!("Checking external tools...\n");

    let tools = tools::check_tools();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);

        if let Some(ref version) = tool.version {
            print!(" ({})", version);
        }

        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }

        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to enable packaging.");
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            println!("  Storage root: {}", config.storage.root.display());
            println!("  Retention: {} minutes", config.storage.retention_minutes);
            println!("  Segment duration: {}s", config.packaging.segment_duration_secs);
            println!("  Ladder rungs: {}", config.packaging.ladder.len());
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            println!("  Storage root: {}", config.storage.root.display());
            println!("  Retention: {} minutes", config.storage.retention_minutes);
        }
    }

    Ok(())
}
