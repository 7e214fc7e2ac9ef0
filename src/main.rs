use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use etagcheck::{
    generate_manifest, load_manifest, queue_manifest, write_manifest, ChecksumEngine,
    CheckpointStore, CsvReport, HttpFingerprintSource, ProgressObserver, ReportSink,
    TracingObserver, VerificationObserver, VerificationOrchestrator, VerificationSession,
    VerifyConfig,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "etagcheck")]
#[command(about = "Verify files transferred to S3-compatible storage against their ETags", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify the files listed in manifests, or resume a saved session
    Verify {
        /// Bucket holding the transferred files
        #[arg(short, long, required_unless_present = "session")]
        bucket: Option<String>,

        /// S3-compatible endpoint (path-style)
        #[arg(long, default_value = "https://s3.amazonaws.com")]
        endpoint: String,

        /// Root folder of the local files
        #[arg(long)]
        local_root: Option<PathBuf>,

        /// Key prefix of the remote files
        #[arg(long)]
        remote_root: Option<String>,

        /// File manifest CSV (repeatable)
        #[arg(short = 'i', long = "manifest", required_unless_present = "session")]
        manifests: Vec<PathBuf>,

        /// Session checkpoint to resume
        #[arg(short, long)]
        session: Option<PathBuf>,

        /// Output directory for the verification report
        #[arg(short, long)]
        output_dir: PathBuf,

        /// Directory for session checkpoints
        #[arg(long, default_value = "tmp")]
        checkpoint_dir: PathBuf,
    },
    /// Write a manifest of the files under a local folder
    Manifest {
        /// Folder to list
        #[arg(short, long)]
        root: PathBuf,

        /// Output directory for the manifest
        #[arg(short, long)]
        output_dir: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let show_progress = !args.verbose && atty::is(atty::Stream::Stderr);

    // Initialize tracing
    let log_level = if args.verbose {
        "debug"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(format!("etagcheck={}", log_level))
        .init();

    match args.command {
        Command::Verify {
            bucket,
            endpoint,
            local_root,
            remote_root,
            manifests,
            session,
            output_dir,
            checkpoint_dir,
        } => {
            let config = VerifyConfig {
                endpoint,
                bucket: bucket.unwrap_or_default(),
                local_root,
                remote_root,
                checkpoint_dir,
                ..VerifyConfig::default()
            };
            verify(config, manifests, session, output_dir, show_progress).await
        }
        Command::Manifest { root, output_dir } => manifest(root, output_dir).await,
    }
}

async fn verify(
    config: VerifyConfig,
    manifests: Vec<PathBuf>,
    resume: Option<PathBuf>,
    output_dir: PathBuf,
    show_progress: bool,
) -> anyhow::Result<()> {
    if let Some(root) = &config.local_root {
        if !root.is_dir() {
            bail!("The local root folder {} must be an existing directory", root.display());
        }
    }

    let mut session = match &resume {
        Some(path) => {
            info!("Resuming session from {}", path.display());
            CheckpointStore::load(path)
                .with_context(|| format!("Failed to load session {}", path.display()))?
        }
        None => VerificationSession::new(config.target()),
    };

    for manifest in &manifests {
        let rows = load_manifest(manifest)?;
        let added = queue_manifest(&mut session, rows)
            .with_context(|| format!("Failed to queue {}", manifest.display()))?;
        info!("Queued {} files from {}", added, manifest.display());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_on_signal = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping after the current file");
            stop_on_signal.store(true, Ordering::SeqCst);
        }
    });

    let orchestrator = VerificationOrchestrator::new(
        HttpFingerprintSource::new(&config)?,
        ChecksumEngine::new(config.part_sizes.clone()),
        CheckpointStore::new(&config.checkpoint_dir),
    )
    .with_stop_flag(stop);

    let mut observer: Box<dyn VerificationObserver> = if show_progress {
        Box::new(ProgressObserver::new())
    } else {
        Box::new(TracingObserver)
    };
    let summary = orchestrator.run(&mut session, observer.as_mut()).await?;

    let mut report = CsvReport::new(&output_dir);
    report.write_report(&session.merge_completed_and_failed())?;
    if let Some(path) = report.written() {
        eprintln!("📄 Report written to {}", path.display());
    }

    if summary.stopped {
        eprintln!(
            "⏸️  Stopped with {} files remaining; resume with --session {}",
            summary.remaining,
            CheckpointStore::new(&config.checkpoint_dir)
                .path_for(&session)
                .display()
        );
    }
    if summary.failed > 0 {
        eprintln!("❌ {} files failed verification", summary.failed);
        std::process::exit(1);
    }
    info!("✅ Verification completed successfully!");
    Ok(())
}

async fn manifest(root: PathBuf, output_dir: PathBuf) -> anyhow::Result<()> {
    if !root.is_dir() {
        bail!("The root folder {} must be an existing directory", root.display());
    }
    std::fs::create_dir_all(&output_dir)?;

    let root_name = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("root")
        .to_string();
    let output = output_dir.join(format!("file-manifest.{}.csv", root_name));

    let entries = tokio::task::spawn_blocking(move || {
        generate_manifest(&root, &ChecksumEngine::default())
    })
    .await??;

    info!("Writing output file {}", output.display());
    let file = std::fs::File::create(&output)?;
    write_manifest(std::io::BufWriter::new(file), &entries)?;
    eprintln!("📄 Manifest of {} files written to {}", entries.len(), output.display());
    Ok(())
}
