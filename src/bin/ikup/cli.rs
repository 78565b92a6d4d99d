//! Argument definitions for the `ikup` binary (spec §6 "CLI surface").
//!
//! Grounded on `examples/original_source/ikup/cli.py`'s `argparse` setup
//! (subcommand list, per-group flag sharing) translated into `clap`
//! derive the way `c896b850_Enet4-dicom-rs__fromimage`'s `App` and
//! `honeycomb-Technolgies-Krusty`'s `krusty-cli` `Cli`/`Commands` do:
//! a top-level `Parser` with a `Subcommand` enum, flag groups shared via
//! `#[command(flatten)]` rather than argparse's per-parser loops.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ikup",
    version,
    about = "Display raster images in a terminal via the Kitty Graphics Protocol",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the config file (overrides `$IKUP_CONFIG` and the default
    /// search path).
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase log verbosity (repeatable).
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Decrease log verbosity (repeatable).
    #[arg(short = 'q', long, global = true, action = clap::ArgAction::Count)]
    pub quiet: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assign an id (if needed), upload (if needed), and display an image.
    Display(DisplayArgs),
    /// Assign an id (if needed) and upload an image, without displaying it.
    Upload(UploadArgs),
    /// Assign an id to an image without uploading or displaying anything.
    GetId(GetIdArgs),
    /// Print the placeholder sequence for an already-known image id.
    Placeholder(PlaceholderArgs),
    /// List known images.
    List(FilterArgs),
    /// Forget one or more images (drop local bookkeeping).
    Forget(FilterArgs),
    /// Mark one or more images as dirty, forcing re-upload on next use.
    Dirty(FilterArgs),
    /// Force a re-upload of one or more images.
    Reupload(FilterArgs),
    /// Re-upload images that need it; skip the ones that don't.
    Fix(FilterArgs),
    /// Remove old session databases and trim the current one.
    Cleanup,
    /// Print the resolved configuration as TOML.
    DumpConfig(DumpConfigArgs),
    /// Print diagnostic information about the current session.
    Status,
    /// Show extended help for a topic (currently: `print`).
    Help { topic: Option<String> },
}

/// Every subcommand name, used by `main` to decide whether the first
/// argument needs an implicit `display` inserted (`cli.py`'s
/// `sys.argv.insert(1, "display")` fallback).
pub const COMMAND_NAMES: &[&str] = &[
    "display",
    "upload",
    "get-id",
    "placeholder",
    "list",
    "forget",
    "dirty",
    "reupload",
    "fix",
    "cleanup",
    "dump-config",
    "status",
    "help",
];

#[derive(Args, Clone, Default)]
pub struct ImageSizeArgs {
    /// Number of columns to fit the image to.
    #[arg(short = 'c', long, value_name = "W")]
    pub cols: Option<u32>,
    /// Number of rows to fit the image to.
    #[arg(short = 'r', long, value_name = "H")]
    pub rows: Option<u32>,
    /// Maximum number of columns. `auto` uses the terminal width.
    #[arg(long, value_name = "W")]
    pub max_cols: Option<String>,
    /// Maximum number of rows. `auto` uses the terminal height.
    #[arg(long, value_name = "H")]
    pub max_rows: Option<String>,
    /// Scale images by this factor (multiplied with `global_scale`).
    #[arg(short = 's', long, value_name = "S")]
    pub scale: Option<f64>,
}

#[derive(Args, Clone, Default)]
pub struct IdArgs {
    /// Force the assigned id to this value (decimal or `0x`-prefixed hex).
    /// Cannot be combined with more than one image.
    #[arg(long, value_name = "ID")]
    pub force_id: Option<String>,
    /// The id feature-space to use for automatically assigned ids.
    #[arg(long, value_name = "24bit|256|8bit")]
    pub id_space: Option<String>,
    /// Binary digits fixing the high bits of automatically assigned ids.
    #[arg(long, value_name = "BITS")]
    pub id_subspace: Option<String>,
}

#[derive(Args, Clone, Default)]
pub struct UploadTuningArgs {
    /// The upload method to use.
    #[arg(short = 'm', long, value_name = "auto|file|stream|temp-file")]
    pub upload_method: Option<String>,
    /// Whether to allow concurrent direct uploads of distinct ids.
    #[arg(long, value_name = "auto|true|false")]
    pub allow_concurrent_uploads: Option<String>,
    /// Whether to mark images uploaded (vs. dirty) after a successful send.
    #[arg(long, value_name = "true|false")]
    pub mark_uploaded: Option<String>,
}

#[derive(Args, Clone, Default)]
pub struct CommandStreamArgs {
    /// The tty/file/pipe to send graphics commands to (default: stdout).
    #[arg(short = 'O', long, value_name = "FILE")]
    pub out_command: Option<PathBuf>,
}

#[derive(Args, Clone, Default)]
pub struct DisplayStreamArgs {
    /// The tty/file/pipe to print the image placeholder to (default: stdout).
    #[arg(short = 'o', long, value_name = "FILE")]
    pub out_display: Option<PathBuf>,
    /// Use line feeds instead of cursor movement between placeholder rows.
    #[arg(long, default_value = "auto", value_name = "auto|true|false")]
    pub use_line_feeds: String,
}

/// Images to upload/display, or known ids in the form `id:1234` / `id:0xABC`.
#[derive(Args, Clone, Default)]
pub struct ImagesArg {
    pub images: Vec<String>,
}

#[derive(Args)]
pub struct DisplayArgs {
    #[command(flatten)]
    pub images: ImagesArg,
    #[command(flatten)]
    pub size: ImageSizeArgs,
    #[command(flatten)]
    pub id: IdArgs,
    #[command(flatten)]
    pub upload_tuning: UploadTuningArgs,
    #[command(flatten)]
    pub out_command: CommandStreamArgs,
    #[command(flatten)]
    pub out_display: DisplayStreamArgs,
    /// Force (re)upload.
    #[arg(short = 'f', long, conflicts_with = "no_upload")]
    pub force_upload: bool,
    /// Disable uploading (just assign an id and display the placeholder).
    #[arg(short = 'n', long, conflicts_with = "force_upload")]
    pub no_upload: bool,
    /// Dump the resolved config to stdout before executing.
    #[arg(long)]
    pub dump_config: bool,
}

#[derive(Args)]
pub struct UploadArgs {
    #[command(flatten)]
    pub images: ImagesArg,
    #[command(flatten)]
    pub size: ImageSizeArgs,
    #[command(flatten)]
    pub id: IdArgs,
    #[command(flatten)]
    pub upload_tuning: UploadTuningArgs,
    #[command(flatten)]
    pub out_command: CommandStreamArgs,
    /// Force (re)upload.
    #[arg(short = 'f', long)]
    pub force_upload: bool,
    /// Dump the resolved config to stdout before executing.
    #[arg(long)]
    pub dump_config: bool,
}

#[derive(Args)]
pub struct GetIdArgs {
    #[command(flatten)]
    pub images: ImagesArg,
    #[command(flatten)]
    pub size: ImageSizeArgs,
    #[command(flatten)]
    pub id: IdArgs,
    /// Dump the resolved config to stdout before executing.
    #[arg(long)]
    pub dump_config: bool,
}

#[derive(Args)]
pub struct PlaceholderArgs {
    /// A known image id (decimal or `0x`-prefixed hex).
    pub id: String,
    /// Number of columns of the placeholder.
    #[arg(short = 'c', long, value_name = "W")]
    pub cols: u32,
    /// Number of rows of the placeholder.
    #[arg(short = 'r', long, value_name = "H")]
    pub rows: u32,
    #[command(flatten)]
    pub out_display: DisplayStreamArgs,
    /// Dump the resolved config to stdout before executing.
    #[arg(long)]
    pub dump_config: bool,
}

#[derive(Args)]
pub struct FilterArgs {
    /// Image files or known ids (`id:1234` / `id:0xABC`) to affect.
    pub images: Vec<String>,
    /// Explicitly affect all images.
    #[arg(short = 'a', long)]
    pub all: bool,
    /// Affect images last touched before this Unix timestamp.
    #[arg(long, value_name = "TIME")]
    pub older: Option<i64>,
    /// Affect images last touched after this Unix timestamp.
    #[arg(long, value_name = "TIME")]
    pub newer: Option<i64>,
    /// Affect only the N most recently touched images matching the criteria.
    #[arg(short = 'l', long, value_name = "N")]
    pub last: Option<u64>,
    /// Affect every matching image except the N most recently touched ones.
    #[arg(short = 'e', long, value_name = "N")]
    pub except_last: Option<u64>,
    /// Print information per image according to FORMAT (`ikup help print`).
    #[arg(short = 'p', long, value_name = "FORMAT")]
    pub print: Option<String>,
    /// Don't print the affected image ids.
    #[arg(short = 'q', long)]
    pub quiet: bool,
    /// Print full details (ids, upload status, a preview) for each image.
    #[arg(short = 'V', long)]
    pub verbose: bool,
    #[command(flatten)]
    pub out_display: DisplayStreamArgs,
    #[command(flatten)]
    pub out_command: CommandStreamArgs,
    #[command(flatten)]
    pub upload_tuning: UploadTuningArgs,
    /// Maximum number of columns for the verbose-mode preview.
    #[arg(long, value_name = "W")]
    pub max_cols: Option<String>,
    /// Maximum number of rows for the verbose-mode preview.
    #[arg(long, value_name = "H")]
    pub max_rows: Option<String>,
    /// Dump the resolved config to stdout before executing.
    #[arg(long)]
    pub dump_config: bool,
}

#[derive(Args)]
pub struct DumpConfigArgs {
    /// Also print where each value came from (default/file/env/CLI).
    #[arg(long)]
    pub provenance: bool,
    /// Omit keys still at their default value.
    #[arg(long)]
    pub skip_default: bool,
}
