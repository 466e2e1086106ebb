use std::{
    error::Error,
    path::{Path, PathBuf},
    process,
    sync::Arc,
};

use clap::{command, Parser, ValueHint};
use futures_util::StreamExt;
use log::{debug, error, info, LevelFilter};
use tokio::io::AsyncWriteExt;
use url::Url;

use relayer::{
    cache::DirCache,
    config::Config,
    engine::Engine,
    source::DataSpec,
    store::MemoryStore,
    track::{Locality, TrackId},
};

/// Profile to display when not built in release mode.
#[cfg(debug_assertions)]
const BUILD_PROFILE: &str = "debug";
/// Profile to display when not built release mode.
#[cfg(not(debug_assertions))]
const BUILD_PROFILE: &str = "release";

/// Group name for mutually exclusive logging options.
const ARGS_GROUP_LOGGING: &str = "logging";

/// Command line arguments as parsed by `clap`.
#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    ///
    /// TOML file with settings that override the defaults.
    #[arg(short, long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Base URL of the catalog
    #[arg(long, value_name = "URL", value_hint = ValueHint::Url, env = "RELAYER_CATALOG")]
    catalog: Option<Url>,

    /// Directory to cache fetched bytes in
    #[arg(long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    cache_dir: Option<PathBuf>,

    /// Local library to fall back to
    ///
    /// Files in this directory are matched by title when a track cannot be
    /// fetched from the catalog.
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath)]
    library: Option<PathBuf>,

    /// Directory to write fetched tracks to
    #[arg(short, long, value_name = "DIR", value_hint = ValueHint::DirPath, default_value = ".")]
    output: PathBuf,

    /// Suppresses all output except warnings and errors.
    #[arg(short, long, default_value_t = false, group = ARGS_GROUP_LOGGING)]
    quiet: bool,

    /// Enable verbose logging
    ///
    /// Specify twice for trace logging.
    #[arg(short, long, action = clap::ArgAction::Count, group = ARGS_GROUP_LOGGING)]
    verbose: u8,

    /// Tracks to fetch, in queue order
    #[arg(required = true, value_name = "TRACK")]
    tracks: Vec<TrackId>,
}

/// Initializes the logger facade.
///
/// The logging level is determined as follows, in order of precedence from
/// highest to lowest:
/// 1. Command line arguments
/// 2. `RUST_LOG` environment variable
/// 3. Hard coded default
///
/// # Panics
///
/// Panics when a logger facade is already initialized.
fn init_logger(config: &Args) {
    let mut logger = env_logger::Builder::from_env(
        // Note: if you change the default logging level here, then you should
        // probably also change the verbosity levels below.
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    if config.quiet || config.verbose > 0 {
        let level = match config.verbose {
            // Quiet and verbose are mutually exclusive.
            0 => LevelFilter::Warn,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };

        // Filter log messages of external crates.
        logger.filter_module(module_path!(), level);
    }

    logger.init();
}

/// File name to write `track` to.
fn file_name(track: &TrackId) -> String {
    match track.locality() {
        Locality::Local(path) => path
            .file_name()
            .map_or_else(|| String::from("local"), |name| name.to_string_lossy().into_owned()),
        Locality::Remote(id) | Locality::Downloaded(id) => {
            id.replace(['/', '\\', ':'], "_")
        }
    }
}

/// Fetches `track` window by window into `output`.
async fn fetch(
    engine: &Engine,
    track: &TrackId,
    output: &Path,
) -> relayer::error::Result<(PathBuf, u64)> {
    let path = output.join(file_name(track));
    let mut file = tokio::fs::File::create(&path).await?;
    let mut position = 0;

    loop {
        let media = engine.open(DataSpec::new(track.clone()).at(position)).await?;
        let content_length = media.content_length();
        let requested = media.spec().length;

        let mut read = 0;
        let mut stream = media.into_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            read += chunk.len() as u64;
        }
        position += read;

        // Unbounded and short reads both ran into the end of the track.
        if read == 0
            || requested.is_none_or(|length| read < length)
            || content_length.is_some_and(|total| position >= total)
        {
            break;
        }
    }

    file.flush().await?;
    Ok((path, position))
}

/// Fetches every track in order, keeping the cache on the current and next.
async fn fetch_all(
    engine: &Engine,
    tracks: &[TrackId],
    output: &Path,
) -> Result<(), Box<dyn Error>> {
    let mut failed = 0;

    for (i, track) in tracks.iter().enumerate() {
        let next = tracks.get(i + 1).cloned();
        engine.on_transition(Some(track.clone()), next).await;

        match fetch(engine, track, output).await {
            Ok((path, length)) => info!("{track}: wrote {length} bytes to {}", path.display()),
            Err(e) => {
                error!("{track}: {e}");
                failed += 1;
            }
        }
    }

    if failed > 0 {
        return Err(format!("{failed} of {} tracks failed", tracks.len()).into());
    }
    Ok(())
}

/// Main application loop.
///
/// # Errors
///
/// Returns an error when the configuration is invalid, or when any track
/// could not be fetched.
async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(catalog) = args.catalog {
        config.catalog_url = Some(catalog);
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }
    config.validate()?;

    let store = Arc::new(MemoryStore::new());
    if let Some(library) = &args.library {
        let found = store.scan_dir(library).await?;
        info!("found {found} files in {}", library.display());
    }

    let cache = Arc::new(DirCache::new(&config.cache_dir));
    let engine = Engine::with_http(&config, store, cache)?;

    tokio::fs::create_dir_all(&args.output).await?;

    let result = tokio::select! {
        // Prioritize shutdown signals.
        biased;

        _ = tokio::signal::ctrl_c() => {
            info!("shutting down gracefully");
            Ok(())
        }

        result = fetch_all(&engine, &args.tracks, &args.output) => result,
    };

    engine.shutdown().await;
    result
}

/// Main entry point of the application.
///
/// This function initializes the logger facade, parses the command line
/// arguments, and fetches the requested tracks.
#[tokio::main]
async fn main() {
    // `clap` handles our command line arguments and help text.
    let args = Args::parse();
    init_logger(&args);

    // Dump command line arguments before we do anything more.
    // This aids in debugging of whatever comes next.
    debug!("Command {:#?}", args);

    let cmd = command!();
    let name = cmd.get_name().to_string();
    let version = cmd.get_version().unwrap_or("UNKNOWN").to_string();

    info!("starting {name}/{version}; {BUILD_PROFILE}");

    if let Err(e) = run(args).await {
        error!("{e}");
        process::exit(1);
    }
}
