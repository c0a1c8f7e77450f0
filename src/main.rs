//! RawGrab CLI
//!
//! Command-line interface for raw NTFS file extraction.

use clap::{Parser, Subcommand};
use console::style;
use indicatif::HumanDuration;
use rawgrab::logging::{self, LogLevel};
use rawgrab::{format_size, CollectConfig, CollectSummary, Collector, ManifestResolver, RawVolume};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// RawGrab - forensic raw file extraction
///
/// Copies files off NTFS volumes by reading their clusters directly,
/// including files the running system keeps locked.
#[derive(Parser)]
#[command(name = "rawgrab")]
#[command(author = "RawGrab Contributors")]
#[command(version)]
#[command(about = "Raw NTFS file extraction", long_about = None)]
struct Cli {
    /// Log file (default: rawgrab.log next to the executable)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Minimum level written to the log file
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a volume's boot sector and print its geometry
    Vbr {
        /// Volume to open (drive letter on Windows, device or image path elsewhere)
        #[arg(short, long)]
        volume: String,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Collect every file listed in an extent manifest
    Extract {
        /// JSON manifest of files and their extents
        #[arg(short, long)]
        manifest: PathBuf,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Collect live files, locating their clusters through the filesystem (Windows)
    Copy {
        /// Full paths (C:\... or %SystemDrive%\...)
        #[arg(required = true)]
        paths: Vec<String>,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(clap::Args)]
struct OutputArgs {
    /// Output directory
    #[arg(short, long)]
    output: PathBuf,

    /// Bytes requested per read
    #[arg(long, default_value = "32768")]
    buffer_size: usize,

    /// Skip raw access and copy every file through the filesystem
    #[arg(long)]
    no_raw: bool,

    /// Fail files that cannot be read raw instead of copying them normally
    #[arg(long)]
    no_fallback: bool,

    /// Write all files directly into the output directory
    #[arg(long)]
    flat: bool,

    /// Write a JSON Lines report of every file
    #[arg(long)]
    report: Option<PathBuf>,
}

impl OutputArgs {
    fn config(&self) -> CollectConfig {
        CollectConfig {
            buffer_size: self.buffer_size,
            use_raw: !self.no_raw,
            allow_api_fallback: !self.no_fallback,
            preserve_paths: !self.flat,
            show_progress: true,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let log_path = cli.log_file.clone().unwrap_or_else(logging::default_log_path);
    logging::init(&log_path, cli.log_level);
    logging::info("MAIN", &format!("RawGrab {} starting up", rawgrab::VERSION));

    let result = match cli.command {
        Commands::Vbr { volume, json } => cmd_vbr(&volume, json),

        Commands::Extract { manifest, output } => cmd_extract(&manifest, &output),

        Commands::Copy { paths, output } => cmd_copy(&paths, &output),
    };

    if let Err(e) = result {
        logging::error("MAIN", &e.to_string());
        logging::flush();
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }
    logging::flush();
}

/// Boot sector command implementation
fn cmd_vbr(volume: &str, json: bool) -> rawgrab::Result<()> {
    let handle = RawVolume::acquire(volume)?;
    let geometry = *handle.geometry();
    handle.close();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "volume": volume,
                "geometry": geometry,
            })
        );
        return Ok(());
    }

    println!(
        "{} Boot sector of {}",
        style("→").cyan().bold(),
        style(volume).yellow()
    );
    println!();
    println!("  {} {}", style("Bytes/sector:").bold(), geometry.bytes_per_sector());
    println!(
        "  {} {}",
        style("Sectors/cluster:").bold(),
        geometry.sectors_per_cluster()
    );
    println!(
        "  {} {}",
        style("Cluster size:").bold(),
        style(format_size(geometry.bytes_per_cluster() as u64)).yellow()
    );
    println!(
        "  {} {}",
        style("MFT record size:").bold(),
        format_size(geometry.mft_record_size() as u64)
    );
    println!(
        "  {} cluster {} (byte {:#x})",
        style("MFT:").bold(),
        geometry.mft_cluster_offset(),
        geometry.mft_offset()
    );
    println!(
        "  {} {}",
        style("Clusters/index record:").bold(),
        geometry.clusters_per_index_record()
    );

    Ok(())
}

/// Manifest extraction command implementation
fn cmd_extract(manifest: &Path, args: &OutputArgs) -> rawgrab::Result<()> {
    let resolver = ManifestResolver::from_file(manifest)?;
    let requests = resolver.requests();

    println!(
        "{} Extracting {} files from {}",
        style("→").cyan().bold(),
        style(requests.len()).yellow(),
        style(manifest.display()).cyan()
    );

    let start = Instant::now();
    let mut collector = Collector::new(resolver, &args.output).with_config(args.config());
    if let Some(report) = &args.report {
        collector = collector.with_report(report)?;
    }
    let summary = collector.run(&requests)?;

    print_summary(&summary, start, &args.output);
    print_failures(&collector);
    Ok(())
}

/// Live copy command implementation
#[cfg(windows)]
fn cmd_copy(paths: &[String], args: &OutputArgs) -> rawgrab::Result<()> {
    use rawgrab::collect::{requests_from_paths, RetrievalPointerResolver};

    let requests = requests_from_paths(paths)?;

    println!(
        "{} Copying {} files",
        style("→").cyan().bold(),
        style(requests.len()).yellow()
    );

    let start = Instant::now();
    let mut collector =
        Collector::new(RetrievalPointerResolver, &args.output).with_config(args.config());
    if let Some(report) = &args.report {
        collector = collector.with_report(report)?;
    }
    let summary = collector.run(&requests)?;

    print_summary(&summary, start, &args.output);
    print_failures(&collector);
    Ok(())
}

#[cfg(not(windows))]
fn cmd_copy(_paths: &[String], _args: &OutputArgs) -> rawgrab::Result<()> {
    Err(rawgrab::RawGrabError::Windows(
        "live copy needs FSCTL_GET_RETRIEVAL_POINTERS; use extract with a manifest".to_string(),
    ))
}

fn print_summary(summary: &CollectSummary, start: Instant, output: &Path) {
    println!();
    println!(
        "{} Collection complete in {}",
        style("✓").green().bold(),
        style(HumanDuration(start.elapsed())).cyan()
    );
    println!();
    println!("  {} {}", style("Requested:").bold(), summary.requested);
    println!("  {} {}", style("Raw:").bold(), style(summary.collected_raw).green());
    println!("  {} {}", style("Filesystem:").bold(), summary.collected_api);
    if summary.failed > 0 {
        println!("  {} {}", style("Failed:").bold(), style(summary.failed).red());
    }
    println!(
        "  {} {}",
        style("Total Size:").bold(),
        style(format_size(summary.bytes)).yellow()
    );
    println!("  {} {}", style("Output:").bold(), output.display());
}

fn print_failures<R: rawgrab::ExtentResolver>(collector: &Collector<R>) {
    let failed: Vec<_> = collector
        .records()
        .iter()
        .filter(|r| r.status == rawgrab::collect::Status::Failed)
        .collect();
    if failed.is_empty() {
        return;
    }

    println!();
    for record in failed {
        let kind = record.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
        println!(
            "  {} {} [{}] {}",
            style("✗").red(),
            style(&record.path).cyan(),
            style(kind).yellow(),
            style(record.error.as_deref().unwrap_or("unknown error")).dim()
        );
    }
}
