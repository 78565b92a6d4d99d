//! Subcommand dispatch (spec §6 "CLI surface").
//!
//! Grounded on `examples/original_source/ikup/cli.py`'s `handle_command`,
//! `foreach`, `dump_config`, `status` and `cleanup` functions: the same
//! id-vs-path argument resolution, per-image try/continue error handling,
//! and query/filter semantics, translated onto [`ikup::terminal::Session`].

use std::fs::File;
use std::io::{self, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use ikup::config::Config;
use ikup::error::{Error, Result};
use ikup::id::IdFeatureSpace;
use ikup::terminal::{ImageInstance, Session};
use ikup::upload::UploadStatus;

use crate::cli::*;
use crate::format_spec::{self, FormatContext, FormatInstance, HELP_PRINT};

/// `"id:1234"` / `"0xABC"` / a bare decimal -> the id it names.
pub fn parse_as_id(image: &str) -> Option<u32> {
    let image = image.strip_prefix("id:").unwrap_or(image);
    if let Some(hex) = image.strip_prefix("0x").or_else(|| image.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).ok()
    } else {
        image.parse().ok()
    }
}

fn parse_force_id(raw: &str) -> Result<u32> {
    parse_as_id(raw).ok_or_else(|| Error::InvalidConfig(format!("invalid --force-id value: '{raw}'")))
}

fn open_output(path: &Option<PathBuf>) -> Result<Box<dyn Write>> {
    match path {
        Some(p) => Ok(Box::new(File::create(p)?)),
        None => Ok(Box::new(io::stdout())),
    }
}

fn resolve_use_line_feeds(raw: &str, out_display: &Option<PathBuf>) -> bool {
    match raw {
        "auto" => out_display.is_some() || !io::stdout().is_terminal(),
        other => other == "true",
    }
}

/// `None`/`"auto"` defer to config; anything else is a one-shot override for
/// this call only (`get_image_instance`'s `max_cols`/`max_rows` parameters).
fn resolve_max(raw: &Option<String>) -> Result<Option<u32>> {
    match raw.as_deref() {
        None | Some("auto") => Ok(None),
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| Error::InvalidConfig(format!("invalid value: '{s}'"))),
    }
}

fn apply_id_overrides(config: &mut Config, id: &IdArgs) -> Result<()> {
    if let Some(v) = &id.id_space {
        config.apply_str("id_space", v, "set via command line")?;
    }
    if let Some(v) = &id.id_subspace {
        config.apply_str("id_subspace", v, "set via command line")?;
    }
    Ok(())
}

fn apply_upload_tuning_overrides(config: &mut Config, t: &UploadTuningArgs) -> Result<()> {
    if let Some(v) = &t.upload_method {
        config.apply_str("upload_method", v, "set via command line")?;
    }
    if let Some(v) = &t.allow_concurrent_uploads {
        config.apply_str("allow_concurrent_uploads", v, "set via command line")?;
    }
    if let Some(v) = &t.mark_uploaded {
        config.apply_str("mark_uploaded", v, "set via command line")?;
    }
    Ok(())
}

fn apply_scale_override(config: &mut Config, scale: Option<f64>) -> Result<()> {
    if let Some(s) = scale {
        config.apply_str("scale", &s.to_string(), "set via command line")?;
    }
    Ok(())
}

fn maybe_dump_config(session: &Session, dump_config: bool) {
    if dump_config {
        print!("{}", session.config().to_toml_string(true, false));
    }
}

/// Resolve one CLI image argument to an [`ImageInstance`], the way
/// `cli.py`'s `handle_command` does: an existing path is built fresh, an
/// `id:...`/decimal/hex argument is looked up. `Ok(None)` means "skip this
/// one, a message was already printed" (a per-image error, not fatal);
/// `Err` propagates an I/O/image decode failure for the caller to report.
fn resolve_instance(
    session: &mut Session,
    image: &str,
    cols: Option<u32>,
    rows: Option<u32>,
    max_cols: Option<u32>,
    max_rows: Option<u32>,
    force_id: Option<u32>,
) -> Result<Option<ImageInstance>> {
    let path = Path::new(image);
    if !path.exists() {
        if let Some(id) = parse_as_id(image) {
            if force_id.is_some() {
                eprintln!("error: cannot use --force-id and specify an id at the same time");
                return Ok(None);
            }
            return match session.get_image_instance_by_id(id)? {
                Some(inst) => Ok(Some(inst)),
                None => {
                    eprintln!("error: id is not assigned or assignment is broken: {id}");
                    Ok(None)
                }
            };
        }
    }
    let inst = match force_id {
        Some(id) => session.force_assign_id(path, id, cols, rows, max_cols, max_rows)?,
        None => session.get_image_instance(path, cols, rows, max_cols, max_rows)?,
    };
    Ok(Some(inst))
}

pub fn run_display(mut config: Config, args: DisplayArgs) -> Result<i32> {
    if args.images.images.len() > 1 && args.id.force_id.is_some() {
        return Err(Error::InvalidConfig(
            "cannot use --force-id and specify more than one image at the same time".into(),
        ));
    }
    apply_id_overrides(&mut config, &args.id)?;
    apply_upload_tuning_overrides(&mut config, &args.upload_tuning)?;
    apply_scale_override(&mut config, args.size.scale)?;
    if args.force_upload {
        config.apply_str("force_upload", "true", "set via command line")?;
    }

    let force_id = args.id.force_id.as_deref().map(parse_force_id).transpose()?;
    let max_cols = resolve_max(&args.size.max_cols)?;
    let max_rows = resolve_max(&args.size.max_rows)?;
    let mut session = Session::new(config)?;
    maybe_dump_config(&session, args.dump_config);

    let mut out_display = open_output(&args.out_display.out_display)?;
    let mut out_command = open_output(&args.out_command.out_command)?;
    let use_line_feeds = resolve_use_line_feeds(&args.out_display.use_line_feeds, &args.out_display.out_display);

    let mut had_errors = false;
    for image in &args.images.images {
        match resolve_instance(&mut session, image, args.size.cols, args.size.rows, max_cols, max_rows, force_id) {
            Ok(Some(mut inst)) => {
                let result = if args.no_upload {
                    session.display_only(&inst, &mut out_display, use_line_feeds)
                } else {
                    session
                        .upload(&mut inst, &mut out_command)
                        .and_then(|_| session.display_only(&inst, &mut out_display, use_line_feeds))
                };
                if let Err(e) = result {
                    eprintln!("error: failed to display {image}: {e}");
                    had_errors = true;
                }
            }
            Ok(None) => had_errors = true,
            Err(e) => {
                eprintln!("error: failed to process {image}: {e}");
                had_errors = true;
            }
        }
    }
    session.maybe_cleanup_current_database()?;
    Ok(if had_errors { 1 } else { 0 })
}

pub fn run_upload(mut config: Config, args: UploadArgs) -> Result<i32> {
    if args.images.images.len() > 1 && args.id.force_id.is_some() {
        return Err(Error::InvalidConfig(
            "cannot use --force-id and specify more than one image at the same time".into(),
        ));
    }
    apply_id_overrides(&mut config, &args.id)?;
    apply_upload_tuning_overrides(&mut config, &args.upload_tuning)?;
    apply_scale_override(&mut config, args.size.scale)?;
    if args.force_upload {
        config.apply_str("force_upload", "true", "set via command line")?;
    }

    let force_id = args.id.force_id.as_deref().map(parse_force_id).transpose()?;
    let max_cols = resolve_max(&args.size.max_cols)?;
    let max_rows = resolve_max(&args.size.max_rows)?;
    let mut session = Session::new(config)?;
    maybe_dump_config(&session, args.dump_config);

    let mut out_command = open_output(&args.out_command.out_command)?;

    let mut had_errors = false;
    for image in &args.images.images {
        match resolve_instance(&mut session, image, args.size.cols, args.size.rows, max_cols, max_rows, force_id) {
            Ok(Some(mut inst)) => {
                if let Err(e) = session.upload(&mut inst, &mut out_command) {
                    eprintln!("error: failed to upload {image}: {e}");
                    had_errors = true;
                }
            }
            Ok(None) => had_errors = true,
            Err(e) => {
                eprintln!("error: failed to process {image}: {e}");
                had_errors = true;
            }
        }
    }
    session.maybe_cleanup_current_database()?;
    Ok(if had_errors { 1 } else { 0 })
}

pub fn run_get_id(mut config: Config, args: GetIdArgs) -> Result<i32> {
    if args.images.images.len() > 1 && args.id.force_id.is_some() {
        return Err(Error::InvalidConfig(
            "cannot use --force-id and specify more than one image at the same time".into(),
        ));
    }
    apply_id_overrides(&mut config, &args.id)?;
    apply_scale_override(&mut config, args.size.scale)?;

    let force_id = args.id.force_id.as_deref().map(parse_force_id).transpose()?;
    let max_cols = resolve_max(&args.size.max_cols)?;
    let max_rows = resolve_max(&args.size.max_rows)?;
    let mut session = Session::new(config)?;
    maybe_dump_config(&session, args.dump_config);

    let mut had_errors = false;
    for image in &args.images.images {
        match resolve_instance(&mut session, image, args.size.cols, args.size.rows, max_cols, max_rows, force_id) {
            Ok(Some(inst)) => println!("{}", inst.id),
            Ok(None) => had_errors = true,
            Err(e) => {
                eprintln!("error: failed to process {image}: {e}");
                had_errors = true;
            }
        }
    }
    session.maybe_cleanup_current_database()?;
    Ok(if had_errors { 1 } else { 0 })
}

pub fn run_placeholder(config: Config, args: PlaceholderArgs) -> Result<i32> {
    let Some(id) = parse_as_id(&args.id) else {
        return Err(Error::InvalidConfig(format!("invalid id: '{}'", args.id)));
    };
    let session = Session::new(config)?;
    maybe_dump_config(&session, args.dump_config);

    let Some(mut inst) = session.get_image_instance_by_id(id)? else {
        eprintln!("error: id is not assigned or assignment is broken: {id}");
        return Ok(1);
    };
    inst.cols = args.cols;
    inst.rows = args.rows;

    let mut out_display = open_output(&args.out_display.out_display)?;
    let use_line_feeds = resolve_use_line_feeds(&args.out_display.use_line_feeds, &args.out_display.out_display);
    session.display_only(&inst, &mut out_display, use_line_feeds)?;
    Ok(0)
}

pub fn run_cleanup(config: Config) -> Result<i32> {
    let mut session = Session::new(config)?;
    let removed = session.cleanup_old_databases()?;
    for path in &removed {
        println!("removed {}", path.display());
    }
    session.cleanup_current_database()?;
    session.cleanup_cache()?;
    Ok(0)
}

pub fn run_dump_config(config: Config, args: DumpConfigArgs) -> Result<i32> {
    print!("{}", config.to_toml_string(args.provenance, args.skip_default));
    Ok(0)
}

fn time_ago(now: i64, then: i64) -> String {
    let diff = (now - then).max(0);
    if diff < 60 {
        format!("{diff}s ago")
    } else if diff < 3600 {
        format!("{}m ago", diff / 60)
    } else if diff < 86400 {
        format!("{}h ago", diff / 3600)
    } else {
        format!("{}d ago", diff / 86400)
    }
}

fn now_epoch() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn subspace_byte(id: u32) -> u32 {
    match IdFeatureSpace::from_id(id) {
        Some(IdFeatureSpace::Color8Plus4th) => (id >> 24) & 0xFF,
        _ => id & 0xFF,
    }
}

/// `cli.py`'s `foreach`: resolve the `--all`/images/query selection against
/// `session.list_ids()` (newest-`atime`-first), tracking which explicitly
/// named images/ids were never matched.
#[allow(clippy::too_many_arguments)]
fn select_matching(
    session: &mut Session,
    command: &str,
    images: &[String],
    all: bool,
    older: Option<i64>,
    newer: Option<i64>,
    last: Option<u64>,
    except_last: Option<u64>,
) -> Result<(Vec<(u32, String, i64)>, Vec<String>)> {
    let query_specified = older.is_some() || newer.is_some() || last.is_some() || except_last.is_some();
    if !images.is_empty() && all {
        return Err(Error::InvalidConfig(
            "cannot use --all and specify images/ids at the same time".into(),
        ));
    }
    if !images.is_empty() && query_specified {
        return Err(Error::InvalidConfig(
            "cannot specify images/ids and a query (--older/--newer/--last/--except-last) at the same time".into(),
        ));
    }
    let mut all = all;
    if images.is_empty() && !query_specified && !all {
        if command == "list" {
            all = true;
        } else {
            return Err(Error::InvalidConfig(
                "must specify images/ids, a query, or --all".into(),
            ));
        }
    }

    enum Target {
        Id(u32),
        Path(String),
    }
    let mut targets = Vec::new();
    for image in images {
        let path = Path::new(image);
        if !path.exists() {
            if let Some(id) = parse_as_id(image) {
                targets.push(Target::Id(id));
                continue;
            }
        }
        let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        targets.push(Target::Path(abs.to_string_lossy().into_owned()));
    }
    let image_ids: Vec<u32> = targets
        .iter()
        .filter_map(|t| if let Target::Id(id) = t { Some(*id) } else { None })
        .collect();
    let image_paths: Vec<String> = targets
        .iter()
        .filter_map(|t| if let Target::Path(p) = t { Some(p.clone()) } else { None })
        .collect();
    let mut not_encountered: Vec<String> = targets
        .iter()
        .map(|t| match t {
            Target::Id(id) => id.to_string(),
            Target::Path(p) => p.clone(),
        })
        .collect();

    let mut matched = Vec::new();
    let mut index: u64 = 0;
    for (id, description, atime) in session.list_ids()? {
        if all {
            matched.push((id, description, atime));
            continue;
        }
        let mut hit = false;
        if image_ids.contains(&id) {
            not_encountered.retain(|s| s != &id.to_string());
            hit = true;
        }
        if !image_paths.is_empty() {
            if let Some(inst) = session.get_image_instance_by_id(id)? {
                let path_str = inst.source_path.to_string_lossy().into_owned();
                if image_paths.contains(&path_str) {
                    not_encountered.retain(|s| s != &path_str);
                    hit = true;
                }
            }
        }
        if hit {
            matched.push((id, description, atime));
            continue;
        }
        if !query_specified {
            continue;
        }
        if let Some(newer) = newer {
            if atime <= newer {
                break;
            }
        }
        if let Some(older) = older {
            if atime >= older {
                continue;
            }
        }
        index += 1;
        if let Some(last) = last {
            if index > last {
                break;
            }
        }
        if let Some(except_last) = except_last {
            if index <= except_last {
                continue;
            }
        }
        matched.push((id, description, atime));
    }

    Ok((matched, not_encountered))
}

#[allow(clippy::too_many_arguments)]
pub fn run_filter(command: &str, mut config: Config, args: FilterArgs) -> Result<i32> {
    apply_upload_tuning_overrides(&mut config, &args.upload_tuning)?;
    let mut session = Session::new(config)?;
    maybe_dump_config(&session, args.dump_config);

    let (matched, not_encountered) = select_matching(
        &mut session,
        command,
        &args.images,
        args.all,
        args.older,
        args.newer,
        args.last,
        args.except_last,
    )?;

    let mut out_display = open_output(&args.out_display.out_display)?;
    let mut out_command = open_output(&args.out_command.out_command)?;
    let use_line_feeds = resolve_use_line_feeds(&args.out_display.use_line_feeds, &args.out_display.out_display);
    let max_cols = resolve_max(&args.max_cols)?.unwrap_or(session.config().max_cols.unwrap_or(session.config().fallback_max_cols));
    let max_rows = resolve_max(&args.max_rows)?.unwrap_or(session.config().max_rows.unwrap_or(session.config().fallback_max_rows));

    let mut had_errors = false;
    for missing in &not_encountered {
        eprintln!("error: image/id not found in the db: {missing}");
        had_errors = true;
    }

    for (id, description, atime) in matched {
        let inst = session.get_image_instance_by_id(id)?;

        if command == "fix" {
            let needs = match &inst {
                Some(i) => session.needs_uploading(i)?,
                None => true,
            };
            if !needs {
                continue;
            }
        }

        match command {
            "forget" => {
                session.forget(id, false)?;
            }
            "dirty" => session.mark_dirty(id)?,
            "reupload" | "fix" => {
                if let Some(mut i) = inst.clone() {
                    if let Err(e) = session.force_upload(&mut i, &mut out_command) {
                        eprintln!("error: failed to reupload id {id}: {e}");
                        had_errors = true;
                        continue;
                    }
                } else {
                    eprintln!("error: could not recover image info for id {id}, skipping reupload");
                    had_errors = true;
                    continue;
                }
            }
            _ => {}
        }

        if args.quiet {
            continue;
        }

        let format_instance = inst.as_ref().map(|i| FormatInstance {
            path: i.source_path.to_str().unwrap_or(""),
            mtime: i.source_mtime,
            cols: i.cols,
            rows: i.rows,
        });
        let ctx = FormatContext {
            id,
            description: &description,
            atime,
            instance: format_instance,
        };

        if !args.verbose {
            let line = match &args.print {
                Some(template) => format_spec::format(template, &ctx)?,
                None => format_spec::format("%i\t%cx%r\t%P", &ctx)?,
            };
            if command == "list" {
                writeln!(out_display, "{line}")?;
            } else {
                writeln!(out_display, "{command} {line}")?;
            }
            continue;
        }

        let now = now_epoch();
        let sb = subspace_byte(id);
        writeln!(
            out_display,
            "\x1b[1mID: {id}\x1b[0m = 0x{id:08x}  subspace_byte: {sb} = 0x{sb:02x}  atime: {}",
            time_ago(now, atime)
        )?;
        writeln!(out_display, "  {description}")?;
        for info in session.get_upload_infos(id)? {
            let status_text = match info.status {
                UploadStatus::Uploaded => "uploaded to",
                UploadStatus::Uploading => "uploading (in progress) to",
                UploadStatus::Dirty => "dirty on",
            };
            writeln!(
                out_display,
                "  {status_text} {}  size: {} bytes  {}  bytes_ago: {}  uploads_ago: {}",
                info.terminal_id,
                info.size_bytes,
                time_ago(now, info.upload_time),
                info.bytes_ago,
                info.uploads_ago,
            )?;
            if info.description != description {
                writeln!(out_display, "    (description mismatch: {})", info.description)?;
            }
        }
        match &inst {
            None => {
                writeln!(out_display, "  \x1b[38;5;1mcould not recover image info from the description\x1b[0m")?;
            }
            Some(i) => {
                let mut preview = i.clone();
                let cropped = preview.cols > max_cols || preview.rows > max_rows;
                preview.cols = preview.cols.min(max_cols);
                preview.rows = preview.rows.min(max_rows);
                if let Err(e) = session.display_only(&preview, &mut out_display, use_line_feeds) {
                    writeln!(out_display, "  \x1b[38;5;1mcould not display: {e}\x1b[0m")?;
                } else if cropped {
                    writeln!(out_display, "  (cropped to {}x{} for this preview)", preview.cols, preview.rows)?;
                }
            }
        }
        writeln!(out_display, "{}", "-".repeat(max_cols.min(80) as usize))?;
    }

    session.maybe_cleanup_current_database()?;
    Ok(if had_errors { 1 } else { 0 })
}

pub fn run_status(config: Config) -> Result<i32> {
    let session = Session::new(config)?;
    let config = session.config();
    println!("terminal_name: {}", session.terminal_info().terminal_name);
    println!("terminal_id: {}", session.terminal_info().terminal_id);
    println!("session_id: {}", session.terminal_info().session_id);
    println!("inside_tmux: {}", session.inside_tmux());
    println!("num_tmux_layers: {}", session.num_tmux_layers());
    println!("inside_ssh: {}", session.inside_ssh());
    let (cell_w, cell_h) = session.get_cell_size();
    println!("cell_size: {cell_w}x{cell_h}");
    println!(
        "max_cols x max_rows: {}x{}",
        config.max_cols.unwrap_or(config.fallback_max_cols),
        config.max_rows.unwrap_or(config.fallback_max_rows)
    );
    println!("id_space: {}  id_subspace: {}", config.id_space, config.id_subspace);
    println!("supported_formats: {}", session.get_supported_formats().join(", "));
    println!("upload_method: {:?}", session.get_upload_method());
    println!("allow_concurrent_uploads: {}", session.get_allow_concurrent_uploads());
    println!("max_upload_size: {} bytes", session.get_max_upload_size());
    let db_path = config.id_database_dir.join(format!("{}.db", config.session_id));
    println!("database: {}", db_path.display());
    let (cached_images, cached_bytes) = session.get_cache_stats()?;
    println!("cache: {cached_images} images, {cached_bytes} bytes in {}", config.cache_dir.display());

    if let Ok(entries) = std::fs::read_dir(&config.id_database_dir) {
        let mut dbs: Vec<(PathBuf, u64, std::time::SystemTime)> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("db"))
            .filter_map(|p| {
                let meta = std::fs::metadata(&p).ok()?;
                Some((p, meta.len(), meta.modified().ok()?))
            })
            .collect();
        dbs.sort_by_key(|(_, _, mtime)| std::cmp::Reverse(*mtime));
        println!("session databases:");
        for (path, len, mtime) in dbs {
            let age = mtime.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64;
            println!("  {} ({len} bytes, {})", path.display(), time_ago(now_epoch(), age));
        }
    }
    Ok(0)
}

pub fn run_help(topic: Option<String>) -> i32 {
    match topic.as_deref() {
        None | Some("") => {
            println!("Subcommands: {}", COMMAND_NAMES.join(", "));
            println!("Run `ikup <subcommand> --help` for its flags, or `ikup help print` for the --print mini-language.");
            0
        }
        Some("print") => {
            print!("{HELP_PRINT}");
            0
        }
        Some(other) => {
            eprintln!("error: no help available for topic '{other}'");
            2
        }
    }
}
