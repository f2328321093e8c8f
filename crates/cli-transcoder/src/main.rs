use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use log::{error, info};
use transcoder::{
    config::{validate_directories, PipelineConfig, RunOptions},
    encoder::{Encoder, FfmpegEncoder},
    pipeline::run_pipeline,
    storage::{DisabledStore, ObjectStore, S3Store},
    ConfigError, ProcessingParams,
};

/// Transcode a media library with ffmpeg and store it in object storage
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(group(ArgGroup::new("target").required(true).args(["bucket_name", "disable_upload"])))]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Show additional information
    #[arg(short, long)]
    verbose: bool,

    /// Report intended actions without taking any
    #[arg(long)]
    noop: bool,

    /// Delete temporary output even when its upload failed
    #[arg(long)]
    force_cleanup: bool,

    /// Source directory for media to be transcoded
    #[arg(short = 's', long = "source-dir", default_value = ".")]
    src_dir: PathBuf,

    /// Directory for temporary (and, without upload, final) output
    #[arg(short = 'd', long = "destination-dir", default_value = "/tmp/")]
    dst_dir: PathBuf,

    /// Subdirectory name to ignore
    #[arg(short, long, default_value = "extras")]
    ignored_subdir: String,

    /// Prefix replacing the source directory in object names
    #[arg(short, long, default_value = "")]
    obj_prefix: String,

    /// Target bucket
    #[arg(short, long)]
    bucket_name: Option<String>,

    /// Store files under the destination directory instead of uploading
    #[arg(long)]
    disable_upload: bool,

    /// Extension of the media files to be transcoded
    #[arg(short = 'e', long, default_value = "mkv")]
    file_extension: String,

    /// Video codec for transcoding
    #[arg(long, default_value = "copy")]
    video_codec: String,

    /// Pixel format for transcoding
    #[arg(long)]
    pix_fmt: Option<String>,

    /// Comma-separated languages of the streams to keep
    #[arg(short, long = "languages", value_delimiter = ',', default_value = "pol,eng")]
    langs: Vec<String>,

    /// Target width
    #[arg(long, default_value_t = 1920)]
    width: u32,

    /// Target height
    #[arg(long, default_value_t = 1080)]
    height: u32,

    /// Scale inputs to width x height
    #[arg(long)]
    resize: bool,

    /// Concatenate files within the same directory
    #[arg(long)]
    concat: bool,

    /// Quantization parameter
    #[arg(long, conflicts_with = "crf")]
    qp: Option<u32>,

    /// Constant rate factor
    #[arg(long)]
    crf: Option<u32>,

    /// Number of parallel workers (overrides the config file)
    #[arg(long)]
    workers: Option<usize>,

    /// Head-check lock and object before each job instead of trusting the start-of-run listing
    #[arg(long)]
    recheck_remote: bool,
}

fn exit_with(err: ConfigError) -> ! {
    error!("{}", err);
    std::process::exit(err.exit_code());
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; --verbose only changes the default
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_secs()
        .init();

    if let Err(e) = validate_directories(&args.src_dir, &args.dst_dir) {
        exit_with(e);
    }

    let params = match ProcessingParams::new(
        args.resize,
        args.width,
        args.height,
        args.video_codec.clone(),
        args.pix_fmt.clone(),
        args.langs.clone(),
        args.qp,
        args.crf,
    ) {
        Ok(params) => params,
        Err(e) => exit_with(e),
    };

    let cfg = match PipelineConfig::load_config(args.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => exit_with(ConfigError::Invalid(format!("{:#}", e))),
    };
    let workers = args.workers.unwrap_or(cfg.workers).max(1);

    let opts = RunOptions {
        src_dir: args.src_dir,
        dst_dir: args.dst_dir,
        ignored_subdir: args.ignored_subdir,
        obj_prefix: args.obj_prefix,
        file_extension: args.file_extension,
        concat: args.concat,
        bucket_name: args.bucket_name,
        force_cleanup: args.force_cleanup,
        noop: args.noop,
        verbose: args.verbose,
        recheck_remote: args.recheck_remote,
    };

    info!("Transcoder starting");
    info!("  Source dir: {}", opts.src_dir.display());
    info!("  Destination dir: {}", opts.dst_dir.display());
    match &opts.bucket_name {
        Some(bucket) => info!("  Bucket: {}", bucket),
        None => info!("  Upload disabled, storing locally"),
    }
    info!("  Workers: {}", workers);

    let store: Arc<dyn ObjectStore> = if opts.upload_enabled() {
        let storage = cfg.storage.clone().with_env_overrides();
        Arc::new(S3Store::new(&storage, cfg.multipart_threshold_bytes, cfg.multipart_chunk_bytes).await)
    } else {
        Arc::new(DisabledStore)
    };
    let encoder: Arc<dyn Encoder> = Arc::new(FfmpegEncoder::new(&cfg.ffmpeg_bin, &cfg.ffprobe_bin));

    let summary = run_pipeline(&opts, params, store, encoder, workers)
        .await
        .context("Pipeline run failed")?;

    if !summary.all_succeeded() {
        info!("{} job(s) need attention, see messages above", summary.failed());
    }
    Ok(())
}
