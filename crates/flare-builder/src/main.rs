//! Flare builder - build-phase CLI.
//!
//! Resolves the declared package closure, trial-compiles the function
//! against it, and persists the function specification into the deploy
//! package. Runs once per deployment, typically inside the build
//! container with `SRC_PKG` and `DEPLOY_PKG` set by the surrounding
//! tooling.

mod declarations;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;

use flare_core::{BuildEngine, DirFetcher, Error, FetchCache, HttpFetcher, PackageFetcher, PackageLayout};

#[derive(Parser)]
#[command(name = "flare-builder")]
#[command(about = "Build a Flare function package")]
#[command(version)]
struct Cli {
    /// Source package directory (defaults to $SRC_PKG)
    #[arg(long)]
    src_pkg: Option<PathBuf>,

    /// Deploy package directory (defaults to $DEPLOY_PKG, then to the
    /// source package for in-place builds)
    #[arg(long)]
    deploy_pkg: Option<PathBuf>,

    /// Base URL of the binary package registry
    #[arg(long, conflicts_with = "registry_dir")]
    registry_url: Option<String>,

    /// Local directory serving as the package registry
    #[arg(long)]
    registry_dir: Option<PathBuf>,

    /// Fetch cache directory
    #[arg(long, default_value = "/tmp/flare-fetch-cache")]
    cache_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(tracing::Level::DEBUG.into())
    } else {
        tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let src_pkg = match cli.src_pkg.or_else(|| env_path("SRC_PKG")) {
        Some(path) => path,
        None => bail!("no source package: pass --src-pkg or set SRC_PKG"),
    };
    let deploy_pkg = cli
        .deploy_pkg
        .or_else(|| env_path("DEPLOY_PKG"))
        .unwrap_or_else(|| src_pkg.clone());

    let layout = PackageLayout::new(&src_pkg);
    let packages = declarations::read_packages(&layout.packages_file())?;
    let exclusions = declarations::read_exclusions(&layout.excludes_file())?;
    tracing::info!(
        "building {} ({} packages, {} exclusions)",
        src_pkg.display(),
        packages.len(),
        exclusions.len()
    );

    let cache = FetchCache::new(&cli.cache_dir)
        .with_context(|| format!("cannot open fetch cache at {}", cli.cache_dir.display()))?;
    let fetcher: Box<dyn PackageFetcher> = match (cli.registry_url, cli.registry_dir) {
        (Some(url), _) => Box::new(HttpFetcher::new(url, cache)?),
        (None, Some(dir)) => Box::new(DirFetcher::new(dir, cache)),
        (None, None) => {
            if packages.is_empty() {
                // No declared packages, no registry needed.
                Box::new(DirFetcher::new(PathBuf::from("/nonexistent"), cache))
            } else {
                bail!("packages declared but no registry: pass --registry-url or --registry-dir");
            }
        }
    };

    let engine = BuildEngine::new(&src_pkg, &deploy_pkg)?;
    match engine.build(&packages, &exclusions, fetcher.as_ref()) {
        Ok(spec) => {
            println!(
                "built {} ({} libraries, content hash {})",
                spec.function_name,
                spec.libraries.len(),
                spec.content_hash
            );
            Ok(())
        }
        Err(e) => {
            if let Some(diagnostics) = e.render_diagnostics() {
                eprintln!("compilation failed:");
                eprintln!("{}", diagnostics);
            }
            match e {
                Error::Compile(_) => bail!("build failed: function did not compile"),
                other => Err(other.into()),
            }
        }
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
