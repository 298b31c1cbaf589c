//! ocidiff: compare OCI container images semantically.
//!
//! Images are read from OCI image layout directories (as produced by e.g.
//! `skopeo copy docker://IMAGE oci:DIR`). Exit code 0 means no differences,
//! 1 means differences were found, 2 means an unrecoverable error.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ocidiff::{
    diff, parse_platform, ContentStore, Descriptor, DiffError, IgnoranceOptions, MatchAny,
    MatchSet, OciLayoutStore, Options, Platform, PlatformMatcher, VerboseEventHandler,
};

#[derive(Parser)]
#[command(name = "ocidiff")]
#[command(about = "Compare OCI container images semantically", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff two images stored as OCI image layout directories
    #[command(
        after_help = "Examples:\n  \
        # Strict comparison\n  ocidiff diff ./alpine-a ./alpine-b\n\n  \
        # Ignore cosmetic differences, dump conflicting files to ./report\n  \
        ocidiff diff --semantic --report-dir ./report ./alpine-a ./alpine-b"
    )]
    Diff(DiffArgs),
}

#[derive(Args)]
struct DiffArgs {
    /// First image (OCI image layout directory)
    image0: PathBuf,

    /// Second image (OCI image layout directory)
    image1: PathBuf,

    /// Ignore timestamps
    #[arg(long)]
    ignore_timestamps: bool,

    /// Ignore history
    #[arg(long)]
    ignore_history: bool,

    /// Ignore file order in tar layers
    #[arg(long)]
    ignore_file_order: bool,

    /// Ignore redundant bits of file mode
    #[arg(long)]
    ignore_file_mode_redundant_bits: bool,

    /// Ignore image name annotations
    #[arg(long)]
    ignore_image_name: bool,

    /// Ignore the tar encoder format of layer entries
    #[arg(long)]
    ignore_tar_format: bool,

    /// Strip leading "/" and "./" from tar entry names
    #[arg(long)]
    canonical_paths: bool,

    /// [Recommended] Alias for --ignore-*=true --canonical-paths
    #[arg(long)]
    semantic: bool,

    /// Platform(s) to compare, as os/arch[/variant] (default: all)
    #[arg(long)]
    platform: Vec<String>,

    /// Print every event verbosely instead of the summary table
    #[arg(long)]
    verbose: bool,

    /// Write the event tree as JSON to the specified path
    #[arg(long)]
    report_file: Option<PathBuf>,

    /// Create a detailed report (including differing files) in the
    /// specified directory
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

impl DiffArgs {
    fn ignorance(&self) -> IgnoranceOptions {
        let mut opts = if self.semantic {
            IgnoranceOptions::semantic()
        } else {
            IgnoranceOptions::default()
        };
        opts.ignore_timestamps |= self.ignore_timestamps;
        opts.ignore_history |= self.ignore_history;
        opts.ignore_file_order |= self.ignore_file_order;
        opts.ignore_file_mode_redundant_bits |= self.ignore_file_mode_redundant_bits;
        opts.ignore_image_name |= self.ignore_image_name;
        opts.ignore_tar_format |= self.ignore_tar_format;
        opts.canonical_paths |= self.canonical_paths;
        opts
    }
}

/// Serves blobs from either of the two opened layouts; both sides of a
/// digest-addressed comparison can share one logical store.
struct PairStore {
    stores: [OciLayoutStore; 2],
}

impl ContentStore for PairStore {
    fn open<'a>(
        &'a self,
        desc: &Descriptor,
    ) -> ocidiff::Result<Box<dyn Read + Send + 'a>> {
        match self.stores[0].open(desc) {
            Err(DiffError::Unavailable(_)) => self.stores[1].open(desc),
            other => other,
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let code = match run(cli) {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{err:#}");
            2
        }
    };
    std::process::exit(code);
}

fn init_logging(debug: bool) {
    use tracing_subscriber::EnvFilter;
    let default_level = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Diff(args) => run_diff(args),
    }
}

fn run_diff(args: DiffArgs) -> Result<i32> {
    let store0 = OciLayoutStore::open_layout(&args.image0)
        .with_context(|| format!("failed to open image 0 at {}", args.image0.display()))?;
    let store1 = OciLayoutStore::open_layout(&args.image1)
        .with_context(|| format!("failed to open image 1 at {}", args.image1.display()))?;
    let descs = [store0.root_descriptor(), store1.root_descriptor()];
    tracing::debug!("input 0: {} ({})", args.image0.display(), descs[0].digest);
    tracing::debug!("input 1: {} ({})", args.image1.display(), descs[1].digest);
    let store = PairStore {
        stores: [store0, store1],
    };

    let platforms = args
        .platform
        .iter()
        .map(|spec| {
            parse_platform(spec)
                .with_context(|| format!("invalid platform {spec:?}, expected os/arch[/variant]"))
        })
        .collect::<Result<Vec<Platform>>>()?;
    let matcher: Box<dyn PlatformMatcher> = if platforms.is_empty() {
        Box::new(MatchAny)
    } else {
        Box::new(MatchSet::new(platforms))
    };

    let options = Options {
        ignorance: args.ignorance(),
        event_handler: args.verbose.then(|| {
            Arc::new(VerboseEventHandler) as Arc<dyn ocidiff::EventHandler>
        }),
        report_file: args.report_file.clone(),
        report_dir: args.report_dir.clone(),
        cancel: None,
    };

    let outcome = diff(&store, descs, &*matcher, &options)?;
    if let Some(err) = &outcome.walk_error {
        tracing::error!("{err}");
    }
    let code = outcome.exit_code();
    if code != 0 {
        tracing::debug!("exiting with code {code}");
    }
    Ok(code)
}
