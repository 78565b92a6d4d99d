//! §5 orchestrator: wires id allocation, conversion caching, upload
//! coordination, and placeholder rendering into the operations the CLI
//! calls (spec §5 "IkupTerminal").
//!
//! Grounded on `examples/original_source/ikup/ikup_terminal.py`'s
//! `IkupTerminal`/`ImageInstance`: the `__init__` detection dance,
//! `assign_id`/`get_id_space`/`get_subspace`, `get_image_instance`,
//! `needs_uploading`, `upload`/`_upload`/`_transmit_file_or_bytes`,
//! `upload_and_display`, `display_only`, `get_optimal_cols_and_rows`,
//! `cleanup_old_databases`/`cleanup_current_database`/`cleanup_cache`, and
//! `_move_cursor_to_final_position`. `check_response`'s actual terminal
//! read-back is left to the CLI layer (it needs raw-mode tty access this
//! library-level type has no business owning); see DESIGN.md.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use crate::cache::{self, ConversionCacheStore, ConvertRequest};
use crate::config::Config;
use crate::detection::{self, TerminalInfo};
use crate::error::{Error, Result};
use crate::geometry::{self, FitInput};
use crate::id::{IdFeatureSpace, IdStore, IdSubspace};
use crate::image_codec;
use crate::placeholder::{self, PlaceRect};
use crate::protocol::{
    DeleteCommand, DeleteTarget, Format, Medium, PlacementData, Quietness, TransmitCommand,
};
use crate::upload::{self, ReuploadThresholds, TransmissionMedium, UploadInfo, UploadOutcome, UploadStatus, UploadStore};

/// Where the cursor ends up after a display, relative to the image's
/// bounding box (spec §5 "Cursor positioning").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalCursorPos {
    BottomLeft,
    BottomRight,
    TopLeft,
    TopRight,
}

/// A resolved, ready-to-upload-or-display image: an assigned id plus the
/// cell rectangle it occupies (spec §5 "ImageInstance").
#[derive(Debug, Clone)]
pub struct ImageInstance {
    pub id: u32,
    pub description: String,
    pub source_path: PathBuf,
    pub source_mtime: i64,
    pub cols: u32,
    pub rows: u32,
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn file_mtime(path: &Path) -> Result<i64> {
    let meta = fs::metadata(path)?;
    Ok(meta
        .modified()?
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64)
}

/// Encodes everything that changes what gets displayed into one string, so
/// a changed crop/size/source earns a fresh id instead of silently reusing
/// a stale one (spec §4.B "description", matching `build_image_instance`'s
/// id key).
fn make_description(path: &str, mtime: i64, cols: u32, rows: u32) -> String {
    format!("{path}:{mtime}:{cols}x{rows}")
}

/// Reverses [`make_description`]: `{path}:{mtime}:{cols}x{rows}` -> parts.
/// Returns `None` for a description this tool didn't produce (e.g. an id
/// some other process assigned through a different scheme).
fn parse_description(description: &str) -> Option<(String, i64, u32, u32)> {
    let (rest, dims) = description.rsplit_once(':')?;
    let (cols, rows) = dims.split_once('x')?;
    let cols: u32 = cols.parse().ok()?;
    let rows: u32 = rows.parse().ok()?;
    let (path, mtime) = rest.rsplit_once(':')?;
    let mtime: i64 = mtime.parse().ok()?;
    Some((path.to_string(), mtime, cols, rows))
}

fn parse_id_space(name: &str) -> Result<IdFeatureSpace> {
    match name {
        "24bit" => Ok(IdFeatureSpace::Color24Plus4th),
        "256" => Ok(IdFeatureSpace::Color8Plus4th),
        "8bit" => Ok(IdFeatureSpace::Color8),
        other => Err(Error::InvalidConfig(format!("unknown id_space '{other}'"))),
    }
}

/// A string of binary digits, e.g. `"0110"` (spec §6 "Config file": `k` is
/// the string's length, `v` its value), or empty for the whole
/// feature-space.
fn parse_id_subspace(raw: &str) -> Result<IdSubspace> {
    if raw.is_empty() {
        return Ok(IdSubspace::whole_space());
    }
    if raw.len() > 8 || !raw.bytes().all(|b| b == b'0' || b == b'1') {
        return Err(Error::InvalidConfig(format!(
            "id_subspace must be at most 8 binary digits, got '{raw}'"
        )));
    }
    let k = raw.len() as u32;
    let v = u32::from_str_radix(raw, 2)
        .map_err(|_| Error::InvalidConfig(format!("invalid id_subspace '{raw}'")))?;
    Ok(IdSubspace { k, value: v })
}

fn parse_background(hex: &str) -> Option<(u8, u8, u8)> {
    let hex = hex.trim_start_matches('#');
    if hex.len() != 6 {
        return None;
    }
    Some((
        u8::from_str_radix(&hex[0..2], 16).ok()?,
        u8::from_str_radix(&hex[2..4], 16).ok()?,
        u8::from_str_radix(&hex[4..6], 16).ok()?,
    ))
}

/// Orchestrates id allocation, conversion caching, upload coordination, and
/// placeholder display for one terminal session (spec §5 "IkupTerminal").
pub struct Session {
    config: Config,
    terminal_info: TerminalInfo,
    inside_tmux: bool,
    inside_ssh: bool,
    num_tmux_layers: u32,
    cell_size: (f64, f64),
    id_store: IdStore,
    cache_store: ConversionCacheStore,
    upload_store: UploadStore,
}

impl Session {
    /// `IkupTerminal.__init__`: detect the terminal (unless the config
    /// already pins one down and `redetect_terminal` is off), open the
    /// session's stores, and resolve the `auto` geometry/transport knobs
    /// that don't change for the session's lifetime.
    pub fn new(mut config: Config) -> Result<Self> {
        let terminal_info = if !config.terminal_id.is_empty() && !config.redetect_terminal {
            TerminalInfo {
                terminal_name: config.terminal_name.clone(),
                terminal_id: config.terminal_id.clone(),
                session_id: config.session_id.clone(),
            }
        } else {
            detection::detect_terminal_info()
        };
        config.terminal_name = terminal_info.terminal_name.clone();
        config.terminal_id = terminal_info.terminal_id.clone();
        config.session_id = terminal_info.session_id.clone();

        let inside_tmux = detection::is_inside_tmux();
        let inside_ssh = detection::is_inside_ssh();
        let num_tmux_layers = config
            .num_tmux_layers
            .unwrap_or(if inside_tmux { 1 } else { 0 });

        let cell_size = match config.cell_size {
            Some(size) => (size.width as f64, size.height as f64),
            None => detection::detect_cell_size()
                .map(|(w, h)| (w as f64, h as f64))
                .unwrap_or((
                    config.fallback_cell_size.width as f64,
                    config.fallback_cell_size.height as f64,
                )),
        };

        fs::create_dir_all(&config.id_database_dir)?;
        let db_path = config
            .id_database_dir
            .join(format!("{}.db", config.session_id));
        let id_store = IdStore::open(&db_path, config.max_ids_per_subspace)?;
        let upload_store = UploadStore::open(&db_path)?;
        let cache_store = ConversionCacheStore::open(&config.cache_dir)?;

        Ok(Self {
            config,
            terminal_info,
            inside_tmux,
            inside_ssh,
            num_tmux_layers,
            cell_size,
            id_store,
            cache_store,
            upload_store,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn terminal_info(&self) -> &TerminalInfo {
        &self.terminal_info
    }

    pub fn inside_tmux(&self) -> bool {
        self.inside_tmux
    }

    pub fn inside_ssh(&self) -> bool {
        self.inside_ssh
    }

    pub fn num_tmux_layers(&self) -> u32 {
        self.num_tmux_layers
    }

    pub fn get_cell_size(&self) -> (f64, f64) {
        self.cell_size
    }

    /// `get_id_space()`/`get_subspace()` combined.
    fn id_space_and_subspace(&self) -> Result<(IdFeatureSpace, IdSubspace)> {
        let fs = parse_id_space(&self.config.id_space)?;
        let sub = parse_id_subspace(&self.config.id_subspace)?;
        Ok((fs, sub))
    }

    /// `assign_id(description)` (spec §5, backed by [`crate::id::IdStore`]).
    pub fn assign_id(&mut self, description: &str) -> Result<u32> {
        let (fs, sub) = self.id_space_and_subspace()?;
        self.id_store.get_id(description, fs, sub, true)
    }

    /// `get_optimal_cols_and_rows` (spec §4.F, given pixel size and the
    /// session's resolved cell size).
    pub fn get_optimal_cols_and_rows(
        &self,
        width_px: u32,
        height_px: u32,
        cols: Option<u32>,
        rows: Option<u32>,
        max_cols: Option<u32>,
        max_rows: Option<u32>,
    ) -> Result<(u32, u32)> {
        let max_cols = max_cols
            .or(self.config.max_cols)
            .unwrap_or(self.config.fallback_max_cols);
        let max_rows = max_rows
            .or(self.config.max_rows)
            .unwrap_or(self.config.fallback_max_rows);
        geometry::fit(FitInput {
            width_px: width_px as f64,
            height_px: height_px as f64,
            cell_w: self.cell_size.0,
            cell_h: self.cell_size.1,
            cols,
            rows,
            max_cols,
            max_rows,
            scale: self.config.scale,
            global_scale: self.config.global_scale,
        })
    }

    /// `build_image_instance`/`get_image_instance`: decode just enough of
    /// the source image to size it, resolve `(cols, rows)`, and assign its
    /// id (spec §5 "ImageInstance").
    pub fn get_image_instance(
        &mut self,
        path: &Path,
        cols: Option<u32>,
        rows: Option<u32>,
        max_cols: Option<u32>,
        max_rows: Option<u32>,
    ) -> Result<ImageInstance> {
        if !path.exists() {
            return Err(Error::FileMissing(path.to_path_buf()));
        }
        let mtime = file_mtime(path)?;
        let bytes = fs::read(path)?;
        let orientation = image_codec::exif_orientation(&bytes);
        let handle = image_codec::decode_bytes(&bytes)?;
        let (width_px, height_px) =
            image_codec::real_size(handle.width(), handle.height(), orientation);

        let (fit_cols, fit_rows) =
            self.get_optimal_cols_and_rows(width_px, height_px, cols, rows, max_cols, max_rows)?;

        let path_str = path.to_string_lossy().to_string();
        let description = make_description(&path_str, mtime, fit_cols, fit_rows);
        let id = self.assign_id(&description)?;

        Ok(ImageInstance {
            id,
            description,
            source_path: path.to_path_buf(),
            source_mtime: mtime,
            cols: fit_cols,
            rows: fit_rows,
        })
    }

    /// `ImageInstance.from_info`: reconstruct an instance from an
    /// already-assigned id, for CLI arguments of the form `id:1234`.
    pub fn get_image_instance_by_id(&self, id: u32) -> Result<Option<ImageInstance>> {
        let Some((description, _atime)) = self.id_store.get_info(id)? else {
            return Ok(None);
        };
        let Some((path, mtime, cols, rows)) = parse_description(&description) else {
            return Ok(None);
        };
        Ok(Some(ImageInstance {
            id,
            description,
            source_path: PathBuf::from(path),
            source_mtime: mtime,
            cols,
            rows,
        }))
    }

    /// `--force-id`: assign `id` unconditionally to the image at `path`,
    /// overwriting whatever was previously stored there (spec §4.B `set_id`).
    pub fn force_assign_id(
        &mut self,
        path: &Path,
        id: u32,
        cols: Option<u32>,
        rows: Option<u32>,
        max_cols: Option<u32>,
        max_rows: Option<u32>,
    ) -> Result<ImageInstance> {
        if !path.exists() {
            return Err(Error::FileMissing(path.to_path_buf()));
        }
        let mtime = file_mtime(path)?;
        let bytes = fs::read(path)?;
        let orientation = image_codec::exif_orientation(&bytes);
        let handle = image_codec::decode_bytes(&bytes)?;
        let (width_px, height_px) =
            image_codec::real_size(handle.width(), handle.height(), orientation);
        let (fit_cols, fit_rows) =
            self.get_optimal_cols_and_rows(width_px, height_px, cols, rows, max_cols, max_rows)?;
        let path_str = path.to_string_lossy().to_string();
        let description = make_description(&path_str, mtime, fit_cols, fit_rows);
        self.id_store.set_id(id, &description)?;
        Ok(ImageInstance {
            id,
            description,
            source_path: path.to_path_buf(),
            source_mtime: mtime,
            cols: fit_cols,
            rows: fit_rows,
        })
    }

    /// Every terminal's upload record for `id` (spec §6 "`list` verbose mode").
    pub fn get_upload_infos(&self, id: u32) -> Result<Vec<upload::UploadInfo>> {
        self.upload_store.get_upload_infos(id)
    }

    pub fn get_supported_formats(&self) -> Vec<String> {
        self.config
            .supported_formats
            .clone()
            .unwrap_or_else(|| vec!["PNG".to_string()])
    }

    fn pick_format(&self) -> String {
        self.get_supported_formats()
            .into_iter()
            .next()
            .unwrap_or_else(|| "PNG".to_string())
    }

    /// `get_upload_method()`, with `auto` resolved against the detected SSH
    /// state (spec §4.D "Transport selection").
    pub fn get_upload_method(&self) -> TransmissionMedium {
        TransmissionMedium::from_str_opt(&self.config.upload_method)
            .unwrap_or_default()
            .resolve(self.inside_ssh)
    }

    pub fn get_max_upload_size(&self) -> u64 {
        upload::max_upload_size(
            self.get_upload_method(),
            self.config.stream_max_size,
            self.config.file_max_size,
        )
    }

    /// `get_allow_concurrent_uploads()`: direct (in-band) uploads can't
    /// safely interleave on one stream, but file-based ones (independent
    /// paths) can, unless the config pins a value explicitly.
    pub fn get_allow_concurrent_uploads(&self) -> bool {
        self.config.allow_concurrent_uploads.unwrap_or(matches!(
            self.get_upload_method(),
            TransmissionMedium::File | TransmissionMedium::TempFile
        ))
    }

    /// `needs_uploading(id)` (spec §4.D "Freshness predicate").
    pub fn needs_uploading(&self, instance: &ImageInstance) -> Result<bool> {
        if self.config.force_upload {
            return Ok(true);
        }
        let thresholds = ReuploadThresholds {
            max_bytes_ago: self.config.reupload_max_bytes_ago,
            max_uploads_ago: self.config.reupload_max_uploads_ago,
            max_seconds_ago: self.config.reupload_max_seconds_ago,
        };
        upload::needs_uploading(
            &self.upload_store,
            instance.id,
            &self.terminal_info.terminal_id,
            &instance.description,
            &thresholds,
        )
    }

    pub fn get_upload_info(&self, image_id: u32) -> Result<Option<UploadInfo>> {
        self.upload_store
            .get_upload_info(image_id, &self.terminal_info.terminal_id)
    }

    /// `upload(instance)`: convert (via the cache), claim the upload slot,
    /// transmit, and retry from id assignment if the claim was stolen out
    /// from under us mid-transfer (spec §4.D, `UploadOutcome::RetryAssignId`).
    pub fn upload(&mut self, instance: &mut ImageInstance, out: &mut impl Write) -> Result<()> {
        const MAX_REASSIGN_ATTEMPTS: u32 = 8;

        for _ in 0..MAX_REASSIGN_ATTEMPTS {
            if !self.config.force_upload && !self.needs_uploading(instance)? {
                return Ok(());
            }

            let format_name = self.pick_format();
            let format = image_codec::format_from_name(&format_name)
                .ok_or_else(|| Error::InvalidConfig(format!("unsupported format '{format_name}'")))?;

            let handle = image_codec::decode(&instance.source_path)?;
            let max_size = self.get_max_upload_size();
            let converted_path = cache::convert(
                &mut self.cache_store,
                &handle,
                ConvertRequest {
                    src_path: &instance.source_path.to_string_lossy(),
                    src_mtime: instance.source_mtime,
                    dst_format: format,
                    width: None,
                    height: None,
                    max_size_bytes: Some(max_size),
                    tolerance: self.config.thumbnail_file_size_tolerance,
                },
            )?;
            let data = fs::read(&converted_path)?;
            let size_bytes = data.len() as u64;

            let medium = self.get_upload_method();
            let protocol_medium = match medium {
                TransmissionMedium::Direct => Medium::Direct,
                TransmissionMedium::File | TransmissionMedium::TempFile | TransmissionMedium::Auto => {
                    Medium::TempFile
                }
            };
            let payload = match protocol_medium {
                Medium::Direct => data,
                _ => converted_path.to_string_lossy().into_owned().into_bytes(),
            };

            let image_id = instance.id;
            let num_tmux_layers = self.num_tmux_layers;
            let check_response = self.config.check_response;
            let max_payload_size = self.config.max_payload_size;

            let outcome = upload::retry_uploading_until_success(
                &mut self.upload_store,
                image_id,
                &self.terminal_info.terminal_id,
                |_claimed| {
                    if protocol_medium == Medium::Direct {
                        // Abort-before-resume (spec §4.D): discard any
                        // half-sent stream from a previous attempt at this
                        // same image id before starting the fresh transmit.
                        let abort = TransmitCommand {
                            image_id: Some(image_id),
                            image_number: None,
                            medium: Medium::Direct,
                            format: Format::Png,
                            compression: false,
                            pix_width: 0,
                            pix_height: 0,
                            quiet: Quietness::QuietAlways,
                            placement: None,
                            data: Vec::new(),
                        };
                        out.write_all(abort.encode(num_tmux_layers, max_payload_size).as_bytes())?;
                    }
                    let cmd = TransmitCommand {
                        image_id: Some(image_id),
                        image_number: None,
                        medium: protocol_medium,
                        format: Format::Png,
                        compression: false,
                        pix_width: 0,
                        pix_height: 0,
                        quiet: if check_response {
                            Quietness::Normal
                        } else {
                            Quietness::QuietAlways
                        },
                        placement: Some(PlacementData {
                            virtual_placement: Some(true),
                            ..Default::default()
                        }),
                        data: payload.clone(),
                    };
                    out.write_all(cmd.encode(num_tmux_layers, max_payload_size).as_bytes())?;
                    out.flush()?;
                    Ok(())
                },
                size_bytes,
                &instance.description,
                self.config.upload_stall_timeout as i64,
                self.config.force_upload,
                self.get_allow_concurrent_uploads(),
                self.config.mark_uploaded,
            )?;

            match outcome {
                UploadOutcome::Done => return Ok(()),
                UploadOutcome::RetryAssignId => {
                    instance.id = self.assign_id(&instance.description)?;
                }
            }
        }
        Err(Error::Internal(
            "upload did not converge after repeated id reassignment".into(),
        ))
    }

    /// `reupload`/`fix`: force a fresh transmit regardless of freshness,
    /// without permanently flipping `config.force_upload` for the session.
    pub fn force_upload(&mut self, instance: &mut ImageInstance, out: &mut impl Write) -> Result<()> {
        let prior = self.config.force_upload;
        self.config.force_upload = true;
        let result = self.upload(instance, out);
        self.config.force_upload = prior;
        result
    }

    fn background_sgr(&self) -> Option<(String, &'static str)> {
        if self.config.background == "none" {
            return None;
        }
        let (r, g, b) = parse_background(&self.config.background)?;
        Some((format!("\x1b[48;2;{r};{g};{b}m"), "\x1b[49m"))
    }

    /// `display_only(instance)`: render the combining-diacritic placeholder
    /// run for `instance`'s rectangle (spec §4.A).
    pub fn display_only(
        &self,
        instance: &ImageInstance,
        out: &mut impl Write,
        use_line_feeds: bool,
    ) -> Result<()> {
        let mode = placeholder::get_mode(instance.id, self.config.fewer_diacritics);
        let rect = PlaceRect {
            start_col: 0,
            start_row: 0,
            end_col: instance.cols as i32,
            end_row: instance.rows as i32,
        };
        let mut buf = String::new();
        placeholder::encode_to_stream(&mut buf, instance.id, 0, rect, mode, true, use_line_feeds, false)?;
        if self.config.placeholder_char != placeholder::DEFAULT_PLACEHOLDER {
            buf = buf.replace(placeholder::DEFAULT_PLACEHOLDER, &self.config.placeholder_char.to_string());
        }

        let bg = self.background_sgr();
        if let Some((prefix, _)) = &bg {
            out.write_all(prefix.as_bytes())?;
        }
        out.write_all(buf.as_bytes())?;
        if let Some((_, suffix)) = &bg {
            out.write_all(suffix.as_bytes())?;
        }
        out.flush()?;
        Ok(())
    }

    /// `_move_cursor_to_final_position`: after `display_only` leaves the
    /// cursor at the bottom-left of the image, move it to wherever the
    /// caller wants it to end up.
    fn move_cursor_to_final_position(
        &self,
        out: &mut impl Write,
        cols: u32,
        rows: u32,
        pos: FinalCursorPos,
    ) -> Result<()> {
        use std::fmt::Write as _;
        let mut seq = String::new();
        match pos {
            FinalCursorPos::BottomLeft => {}
            FinalCursorPos::BottomRight => {
                write!(seq, "\x1b[{cols}C").unwrap();
            }
            FinalCursorPos::TopLeft => {
                write!(seq, "\x1b[{rows}A").unwrap();
            }
            FinalCursorPos::TopRight => {
                write!(seq, "\x1b[{rows}A\x1b[{cols}C").unwrap();
            }
        }
        out.write_all(seq.as_bytes())?;
        out.flush()?;
        Ok(())
    }

    /// `upload_and_display(instance)`.
    pub fn upload_and_display(
        &mut self,
        instance: &mut ImageInstance,
        out: &mut impl Write,
        final_cursor_pos: FinalCursorPos,
    ) -> Result<()> {
        self.upload(instance, out)?;
        self.display_only(instance, out, false)?;
        self.move_cursor_to_final_position(out, instance.cols, instance.rows, final_cursor_pos)
    }

    /// `forget(id)`: drop local bookkeeping and hand back the DELETE
    /// command the caller should send to the terminal.
    pub fn forget(&mut self, id: u32, delete_data: bool) -> Result<DeleteCommand> {
        self.id_store.del_id(id)?;
        self.upload_store.forget(id)?;
        Ok(DeleteCommand {
            target: DeleteTarget::ById {
                image_id: id,
                delete_data,
            },
        })
    }

    /// `mark_dirty(id)`: force the next `needs_uploading` check to be true
    /// without forgetting the id outright.
    pub fn mark_dirty(&mut self, id: u32) -> Result<()> {
        self.upload_store
            .set_status(id, &self.terminal_info.terminal_id, UploadStatus::Dirty)
    }

    pub fn list_ids(&self) -> Result<Vec<(u32, String, i64)>> {
        self.id_store.list_all()
    }

    pub fn get_id_info(&self, id: u32) -> Result<Option<(String, i64)>> {
        self.id_store.get_info(id)
    }

    /// `cleanup_old_databases()`: drop other sessions' id databases once
    /// they're older than `max_db_age_days` (spec §6 "Cleanup").
    pub fn cleanup_old_databases(&self) -> Result<Vec<PathBuf>> {
        let max_age_secs = (self.config.max_db_age_days as i64).saturating_mul(24 * 3600);
        let now = now_epoch();
        let current = self
            .config
            .id_database_dir
            .join(format!("{}.db", self.config.session_id));
        let mut removed = Vec::new();

        let entries = match fs::read_dir(&self.config.id_database_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(removed),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("db") || path == current {
                continue;
            }
            let meta = entry.metadata()?;
            let mtime = meta
                .modified()?
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs() as i64;
            if now - mtime > max_age_secs {
                fs::remove_file(&path)?;
                removed.push(path);
            }
        }
        Ok(removed)
    }

    /// `cleanup_current_database()`: trim this session's own id and upload
    /// tables down to `max_num_ids * cleanup_target`.
    pub fn cleanup_current_database(&mut self) -> Result<()> {
        let (fs, sub) = self.id_space_and_subspace()?;
        let target = ((self.config.max_num_ids as f64) * self.config.cleanup_target).max(1.0) as u64;
        self.id_store.cleanup(fs, sub, target)?;
        self.upload_store.cleanup(self.config.reupload_max_uploads_ago)?;
        Ok(())
    }

    /// Roll the dice on `cleanup_probability` and clean up this session's
    /// database if it comes up, the same amortized-cleanup trick
    /// `id_manager.py` uses instead of a periodic background task.
    pub fn maybe_cleanup_current_database(&mut self) -> Result<()> {
        if rand::random::<f64>() < self.config.cleanup_probability {
            self.cleanup_current_database()?;
        }
        Ok(())
    }

    /// `cleanup_cache()`.
    pub fn cleanup_cache(&mut self) -> Result<()> {
        let target_images = (self.config.cache_max_images as f64 * self.config.cleanup_target) as u64;
        let target_size =
            (self.config.cache_max_total_size_bytes as f64 * self.config.cleanup_target) as u64;
        self.cache_store.cleanup(
            Some(self.config.cache_max_images),
            Some(self.config.cache_max_total_size_bytes),
            target_images,
            target_size,
        )
    }

    pub fn get_cache_stats(&self) -> Result<(u64, u64)> {
        self.cache_store.get_cache_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.id_database_dir = dir.join("ids");
        config.cache_dir = dir.join("cache");
        config.terminal_name = "test-term".to_string();
        config.terminal_id = "test-term-fixed".to_string();
        config.session_id = "test-session-fixed".to_string();
        config.redetect_terminal = false;
        config.cell_size = Some(crate::config::Size { width: 8, height: 16 });
        config
    }

    fn write_test_png(dir: &Path, name: &str, w: u32, h: u32) -> PathBuf {
        let path = dir.join(name);
        let image: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(w, h, Rgb([200, 100, 50]));
        image.save(&path).unwrap();
        path
    }

    #[test]
    fn assign_id_is_stable_for_same_description() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let id1 = session.assign_id("hello").unwrap();
        let id2 = session.assign_id("hello").unwrap();
        assert_eq!(id1, id2);
    }

    #[test]
    fn get_image_instance_resolves_cols_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_test_png(dir.path(), "a.png", 160, 160);
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let instance = session
            .get_image_instance(&png, None, None, None, None)
            .unwrap();
        // 160px / 8px cell = 20 cols, 160px / 16px cell = 10 rows.
        assert_eq!(instance.cols, 20);
        assert_eq!(instance.rows, 10);
        assert_ne!(instance.id, 0);
    }

    #[test]
    fn missing_source_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let err = session
            .get_image_instance(&dir.path().join("nope.png"), None, None, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::FileMissing(_)));
    }

    #[test]
    fn needs_uploading_flips_to_false_after_upload() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_test_png(dir.path(), "a.png", 64, 64);
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let mut instance = session
            .get_image_instance(&png, None, None, None, None)
            .unwrap();

        assert!(session.needs_uploading(&instance).unwrap());
        let mut sink = Vec::new();
        session.upload(&mut instance, &mut sink).unwrap();
        assert!(!sink.is_empty());
        assert!(!session.needs_uploading(&instance).unwrap());
    }

    #[test]
    fn direct_upload_sends_abort_before_resume() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_test_png(dir.path(), "a.png", 64, 64);
        let mut config = test_config(dir.path());
        config.upload_method = "direct".to_string();
        let mut session = Session::new(config).unwrap();
        let mut instance = session
            .get_image_instance(&png, None, None, None, None)
            .unwrap();

        let mut sink = Vec::new();
        session.upload(&mut instance, &mut sink).unwrap();
        let text = String::from_utf8_lossy(&sink);
        // One empty, placement-less abort transmit (a=t), then the real
        // placement transmit (a=T).
        assert_eq!(text.matches("a=t").count(), 1);
        assert_eq!(text.matches("a=T").count(), 1);
        assert_eq!(text.matches("m=0").count(), 2);
    }

    #[test]
    fn upload_and_display_writes_transmit_and_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_test_png(dir.path(), "a.png", 64, 64);
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let mut instance = session
            .get_image_instance(&png, None, None, None, None)
            .unwrap();

        let mut sink = Vec::new();
        session
            .upload_and_display(&mut instance, &mut sink, FinalCursorPos::BottomLeft)
            .unwrap();
        let text = String::from_utf8_lossy(&sink);
        assert!(text.contains("a=T"));
        assert!(text.contains(placeholder::DEFAULT_PLACEHOLDER));
    }

    #[test]
    fn get_image_instance_by_id_round_trips_through_description() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_test_png(dir.path(), "a.png", 32, 16);
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let instance = session
            .get_image_instance(&png, None, None, None, None)
            .unwrap();

        let reconstructed = session
            .get_image_instance_by_id(instance.id)
            .unwrap()
            .expect("id should be assigned");
        assert_eq!(reconstructed.id, instance.id);
        assert_eq!(reconstructed.cols, instance.cols);
        assert_eq!(reconstructed.rows, instance.rows);
        assert_eq!(reconstructed.source_path, instance.source_path);
    }

    #[test]
    fn get_image_instance_by_id_is_none_for_unknown_id() {
        let dir = tempfile::tempdir().unwrap();
        let session = Session::new(test_config(dir.path())).unwrap();
        assert!(session.get_image_instance_by_id(0x00_01_02_03).unwrap().is_none());
    }

    #[test]
    fn force_assign_id_overwrites_existing_row() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_test_png(dir.path(), "a.png", 16, 16);
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let forced_id = 0x00_00_00_2A;
        let instance = session
            .force_assign_id(&png, forced_id, None, None, None, None)
            .unwrap();
        assert_eq!(instance.id, forced_id);
        assert_eq!(session.get_id_info(forced_id).unwrap().unwrap().0, instance.description);
    }

    #[test]
    fn get_upload_infos_lists_every_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_test_png(dir.path(), "a.png", 16, 16);
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let mut instance = session
            .get_image_instance(&png, None, None, None, None)
            .unwrap();
        let mut sink = Vec::new();
        session.upload(&mut instance, &mut sink).unwrap();

        let infos = session.get_upload_infos(instance.id).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].terminal_id, session.terminal_info().terminal_id);
    }

    #[test]
    fn forget_removes_id_and_upload_record() {
        let dir = tempfile::tempdir().unwrap();
        let png = write_test_png(dir.path(), "a.png", 32, 32);
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let mut instance = session
            .get_image_instance(&png, None, None, None, None)
            .unwrap();
        let mut sink = Vec::new();
        session.upload(&mut instance, &mut sink).unwrap();

        session.forget(instance.id, true).unwrap();
        assert!(session.get_id_info(instance.id).unwrap().is_none());
        assert!(session.get_upload_info(instance.id).unwrap().is_none());
    }

    #[test]
    fn list_ids_reflects_assigned_ids() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(test_config(dir.path())).unwrap();
        let id = session.assign_id("tracked").unwrap();
        let rows = session.list_ids().unwrap();
        assert!(rows.iter().any(|(rid, desc, _)| *rid == id && desc == "tracked"));
    }
}
