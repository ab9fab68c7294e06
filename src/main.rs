mod cli;

use scenestream::{config, server, tools};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use scenestream_transcode::profile::profiles;

async fn start_server(
    host: Option<String>,
    port: Option<u16>,
    config_path: Option<&std::path::Path>,
) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }
    config::validate_config(&config)?;

    tracing::info!("Starting Scenestream server");
    tracing::info!(
        "Server will listen on {}:{}",
        config.server.host,
        config.server.port
    );
    tracing::info!("Transcode output in {:?}", config.transcode.work_dir);

    server::start_server(config).await
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "scenestream=trace,scenestream_transcode=trace,scenestream_common=debug,tower_http=debug".to_string()
        } else {
            "scenestream=debug,scenestream_transcode=debug,scenestream_common=info,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate { path } => {
            let path = path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Qualities => {
            print_qualities();
            Ok(())
        }
        Commands::Version => {
            println!("scenestream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&std::path::Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let configured = config::load_config_or_default(config_path)?
        .transcode
        .ffmpeg_path;
    let tool = tools::check_ffmpeg(configured.as_deref());

    let status = if tool.available { "✓" } else { "✗" };
    print!("{} {}", status, tool.name);
    if let Some(ref version) = tool.version {
        print!(" ({})", version);
    }
    if let Some(ref path) = tool.path {
        print!(" - {}", path.display());
    }
    println!();

    println!();
    if tool.available {
        println!("All required tools are available!");
    } else {
        println!("ffmpeg is missing. Every encoder launch will fail until it is installed.");
    }

    Ok(())
}

fn validate_config(path: Option<&std::path::Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            config::Config::default()
        }
    };

    println!("  Server: {}:{}", config.server.host, config.server.port);
    println!("  Auth enabled: {}", config.server.auth.enabled);
    println!("  API keys: {}", config.server.auth.api_keys.len());
    println!("  Work dir: {}", config.transcode.work_dir.display());
    println!(
        "  Default qualities: {}",
        config.transcode.default_qualities.join(", ")
    );
    println!(
        "  Segment duration: {}s",
        config.transcode.segment_duration_secs
    );
    println!(
        "  Idle threshold: {}s (swept every {}s)",
        config.janitor.idle_threshold_secs, config.janitor.interval_secs
    );
    println!("  Source: {:?}", config.source.kind);

    Ok(())
}

fn print_qualities() {
    println!(
        "{:<7} {:>10} {:>8} {:>8} {:>8} {:>6} {:>6}",
        "label", "resolution", "video", "maxrate", "bufsize", "audio", "rate"
    );
    for p in profiles() {
        println!(
            "{:<7} {:>10} {:>8} {:>8} {:>8} {:>6} {:>6}",
            p.quality.label(),
            format!("{}x{}", p.width, p.height),
            p.video_bitrate_kbps,
            p.max_rate_kbps,
            p.buffer_size_kbps,
            p.audio_bitrate_kbps,
            p.audio_sample_rate
        );
    }
}
