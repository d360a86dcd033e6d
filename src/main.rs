mod cli;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use dms::AppContext;
use dms_av::{format_duration_sexagesimal, Profile, SessionState, ToolRegistry, TranscodeRequest};
use dms_core::config::Config;
use tokio::io::{AsyncWrite, AsyncWriteExt};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "dms=trace,dms_av=trace,dms_probe=debug,dms_core=debug,dms_upnp=debug,dms_cache=debug"
                .to_string()
        } else {
            "dms=info,dms_av=info,dms_probe=warn,dms_core=warn,dms_upnp=info".to_string()
        }
    });

    // Media may go to stdout, so logs always go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Probe { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(probe_file(&file, cli.config.as_deref(), json))
        }
        Commands::Plan { file, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(plan_file(&file, cli.config.as_deref(), json))
        }
        Commands::Transcode {
            file,
            profile,
            start,
            length,
            output,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(transcode_file(
                &file,
                cli.config.as_deref(),
                profile,
                start,
                length,
                output,
                cli.verbose,
            ))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("dms {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn context(config_path: Option<&Path>) -> Result<AppContext> {
    let config = Config::load_or_default(config_path);
    Ok(AppContext::new(config)?)
}

async fn probe_file(file: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let ctx = context(config_path)?;
    let report = ctx.prober.probe(file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("File: {}", file.display());
    if let Some(ref format) = report.format.format_name {
        println!("Container: {format}");
    }
    if let Some(duration) = report.format.duration {
        println!("Duration: {}", format_duration_sexagesimal(duration));
    }
    if let Some(size) = report.format.size {
        println!("Size: {size} bytes");
    }
    if let Some(bit_rate) = report.format.bit_rate {
        println!("Bit rate: {} kb/s", bit_rate / 1000);
    }

    println!("\nStreams: {}", report.streams.len());
    for stream in &report.streams {
        println!("  [{}] {} {}", stream.index, stream.codec_type, stream.codec_name);
    }

    Ok(())
}

async fn plan_file(file: &Path, config_path: Option<&Path>, json: bool) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let ctx = context(config_path)?;
    let report = ctx.prober.probe(file).await?;
    let directives = dms_av::plan::plan(&report.streams);

    if json {
        println!("{}", serde_json::to_string_pretty(&directives)?);
        return Ok(());
    }

    let dropped = report.streams.len() - directives.len();
    println!("{} of {} streams mapped", directives.len(), report.streams.len());
    for directive in &directives {
        println!("  [{}] {}", directive.stream_index, directive.encoder_args.join(" "));
    }
    if dropped > 0 {
        println!("  ({dropped} streams dropped)");
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn transcode_file(
    file: &Path,
    config_path: Option<&Path>,
    profile: Option<Profile>,
    start: Duration,
    length: Option<Duration>,
    output: Option<PathBuf>,
    verbose: bool,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {:?}", file);
    }

    let ctx = context(config_path)?;
    let profile = match profile {
        Some(p) => p,
        None => ctx.default_profile()?,
    };

    let mut request = TranscodeRequest::new(file, profile).starting_at(start);
    if let Some(length) = length {
        request = request.with_length(length);
    }

    let diagnostics: Box<dyn AsyncWrite + Send + Unpin> = if verbose {
        Box::new(tokio::io::stderr())
    } else {
        Box::new(tokio::io::sink())
    };

    let mut stream = ctx.start_transcode(&request, diagnostics).await?;
    let mut state = stream.state();

    let bytes = match output.as_deref() {
        Some(path) if path != Path::new("-") => {
            let mut out = tokio::fs::File::create(path).await?;
            let n = tokio::io::copy(&mut stream, &mut out).await?;
            out.flush().await?;
            n
        }
        _ => {
            let mut out = tokio::io::stdout();
            let n = tokio::io::copy(&mut stream, &mut out).await?;
            out.flush().await?;
            n
        }
    };

    // Keep the stream alive until the encoder is reaped; dropping it kills
    // the process.
    let finished = state.wait_for(SessionState::is_terminal).await?.clone();
    drop(stream);

    match finished {
        SessionState::Failed(reason) => {
            anyhow::bail!("{profile} transcode failed after {bytes} bytes: {reason}")
        }
        _ => {
            tracing::info!(bytes, profile = %profile, "transcode complete");
            Ok(())
        }
    }
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all();
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
        println!("Some tools are missing. Install them to enable all features.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };

    println!("  Default profile: {}", config.transcode.default_profile);
    match config.transcode.threads {
        Some(threads) => println!("  Encoder threads: {threads}"),
        None => println!("  Encoder threads: auto"),
    }
    println!("  Probe cache capacity: {}", config.cache.probe_capacity);
    println!(
        "  Subscription timeout: {}s (min {}s, max {}s)",
        config.eventing.default_timeout_secs,
        config.eventing.min_timeout_secs,
        config.eventing.max_timeout_secs
    );

    if let Err(e) = config.transcode.default_profile.parse::<Profile>() {
        anyhow::bail!("{e}");
    }

    let warnings = config.validate();
    if !warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &warnings {
            println!("  - {warning}");
        }
    }

    Ok(())
}
