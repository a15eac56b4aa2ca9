//! CLI entry point: download a single URL, or a `--manifest` batch. Flag
//! semantics and error cases ported from
//! `examples/original_source/tests/test_cli.py::test_cli_args_and_config`.

use std::path::PathBuf;
use std::sync::Arc;

use structopt::StructOpt;

use blobfetch::http::Client;
use blobfetch::orchestrator::progress::Progress;
use blobfetch::orchestrator::{self, GivenChecksum};

#[derive(StructOpt)]
#[structopt(
    name = "blobfetch",
    about = "Concurrent range-fetch downloader for GCS/S3 pre-signed URLs, with streaming checksum verification."
)]
struct Args {
    /// URL to download. Mutually exclusive with --manifest.
    url: Option<String>,

    /// JSON array of {url, filepath, checksum, checksum-algorithm} entries.
    #[structopt(short = "m", long = "manifest", parse(from_os_str))]
    manifest: Option<PathBuf>,

    /// Destination path or directory. Defaults to the object's inferred name
    /// in the current directory.
    #[structopt(long = "filepath", parse(from_os_str))]
    filepath: Option<PathBuf>,

    #[structopt(long = "checksum")]
    checksum: Option<String>,

    #[structopt(long = "checksum-algorithm")]
    checksum_algorithm: Option<String>,

    /// Number of concurrent range fetches for objects above the multipart
    /// threshold.
    #[structopt(long = "concurrency", default_value = "4")]
    concurrency: u32,

    /// Objects at or below this size skip concurrent range-fetching
    /// entirely.
    #[structopt(long = "multipart-threshold", default_value = "134217728")]
    multipart_threshold: u64,

    #[structopt(short = "v", parse(from_occurrences))]
    verbose: u8,

    /// With --manifest, keep going after a single entry fails instead of
    /// aborting the whole run.
    #[structopt(short = "c", long = "continue-after-error")]
    continue_after_error: bool,
}

fn validate(args: &Args) -> std::result::Result<(), String> {
    if args.manifest.is_none() && args.url.is_none() {
        return Err("must supply either a url or --manifest".to_string());
    }
    if args.manifest.is_some() && args.url.is_some() {
        return Err("cannot supply a positional url together with --manifest".to_string());
    }
    if args.concurrency == 0 {
        return Err("--concurrency must be at least 1".to_string());
    }
    if args.continue_after_error && args.manifest.is_none() {
        return Err("--continue-after-error only applies to --manifest downloads".to_string());
    }
    match (&args.checksum, &args.checksum_algorithm) {
        (Some(_), None) => return Err("--checksum requires --checksum-algorithm".to_string()),
        (None, Some(_)) => return Err("--checksum-algorithm requires --checksum".to_string()),
        (Some(_), Some(alg)) => {
            alg.parse::<blobfetch::checksum::Algorithm>()
                .map_err(|e| e.to_string())?;
        }
        (None, None) => {}
    }
    Ok(())
}

fn main() {
    let args = Args::from_args();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(msg) = validate(&args) {
        eprintln!("error: {msg}");
        std::process::exit(1);
    }

    let exit_code = smol::block_on(run(args));
    std::process::exit(exit_code);
}

async fn run(args: Args) -> i32 {
    let client = Arc::new(Client::new());

    if let Some(manifest_path) = &args.manifest {
        return run_manifest(client, manifest_path, &args).await;
    }
    run_single(client, args).await
}

async fn run_manifest(
    client: Arc<Client>,
    manifest_path: &PathBuf,
    args: &Args,
) -> i32 {
    let _ = &client; // orchestrator::download builds its own client internally
    let document = match std::fs::read_to_string(manifest_path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("error reading manifest: {e}");
            return 1;
        }
    };
    let manifest = match orchestrator::manifest::parse(&document) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    match orchestrator::download(
        &manifest,
        args.concurrency,
        args.multipart_threshold,
        args.continue_after_error,
    )
    .await
    {
        Ok(outcome) => {
            for (url, err) in &outcome.failures {
                eprintln!("failed: {url} ({err})");
            }
            outcome.exit_code()
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}

async fn run_single(client: Arc<Client>, args: Args) -> i32 {
    let url = args.url.clone().expect("validated: url present without --manifest");
    let given = match (&args.checksum, &args.checksum_algorithm) {
        (Some(value), Some(alg)) => match alg.parse() {
            Ok(algorithm) => Some(GivenChecksum {
                value: value.clone(),
                algorithm,
            }),
            Err(e) => {
                eprintln!("error: {e}");
                return 1;
            }
        },
        _ => None,
    };

    let filepath_str = args.filepath.as_ref().and_then(|p| p.to_str());
    let target = match orchestrator::resolve_target(&client, &url, filepath_str).await {
        Ok(t) => t,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };
    let size = match client.size(&url).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| url.clone());
    let mut progress = Progress::bar(&name, size);

    let result = if size <= args.multipart_threshold {
        orchestrator::oneshot(client, &url, &target, given, Some(&mut progress)).await
    } else {
        let chunk_size = if args.concurrency == 1 {
            orchestrator::DEFAULT_CHUNK_SIZE_KEEP_ALIVE
        } else {
            orchestrator::DEFAULT_CHUNK_SIZE
        };
        orchestrator::multipart(client, &url, &target, chunk_size, args.concurrency, given, Some(&mut progress))
            .await
    };
    progress.finish();

    match result {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    }
}
