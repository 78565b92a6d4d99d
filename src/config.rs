//! §6 configuration: an immutable-per-load record with layered overrides
//! (defaults -> TOML file -> environment -> per-call) and per-field
//! provenance, for `dump-config`/`status` (spec §6 "Configuration").
//!
//! Grounded on `examples/original_source/ikup/ikup_terminal.py`'s
//! `IkupConfig` (field list, defaults, `validate_and_normalize`'s type and
//! range constraints, `override_from_toml_string`/`override_from_env`
//! semantics, and the provenance map). Unlike the Python original, which
//! leans on `__setattr__`/`typing.get_origin` reflection, values are applied
//! field-by-field through an explicit match: there's no crate in the stack
//! for attribute reflection, and an explicit match is the idiomatic stand-in
//! (the same trade-off already made for [`crate::formula`]/[`crate::place_spec`]).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A `WxH` pair, or "let the caller pick" (Python's `Union[T, Literal["auto"]]`).
pub type Auto<T> = Option<T>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    fn parse(s: &str) -> Result<Size> {
        let (w, h) = s
            .split_once('x')
            .ok_or_else(|| Error::InvalidConfig(format!("invalid size '{s}', expected WxH")))?;
        let width: u32 = w
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid width in size '{s}'")))?;
        let height: u32 = h
            .trim()
            .parse()
            .map_err(|_| Error::InvalidConfig(format!("invalid height in size '{s}'")))?;
        Ok(Size { width, height })
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Every tunable `ikup` knows about (spec §6). Fields of type `Auto<T>`
/// default to "let the terminal/environment decide" and are resolved lazily
/// by [`crate::terminal`].
#[derive(Debug, Clone)]
pub struct Config {
    // Id allocation.
    pub id_space: String,
    pub id_subspace: String,
    pub max_ids_per_subspace: u64,
    pub id_database_dir: PathBuf,

    // Conversion/thumbnail cache.
    pub cache_dir: PathBuf,
    pub cache_max_images: u64,
    pub cache_max_total_size_bytes: u64,
    pub thumbnail_file_size_tolerance: f64,
    pub cache_always: bool,

    // Image geometry.
    pub cell_size: Auto<Size>,
    pub fallback_cell_size: Size,
    pub scale: f64,
    pub global_scale: f64,
    pub max_rows: Auto<u32>,
    pub max_cols: Auto<u32>,
    pub fallback_max_rows: u32,
    pub fallback_max_cols: u32,

    // Uploading.
    pub max_command_size: usize,
    pub max_payload_size: usize,
    pub num_tmux_layers: Auto<u32>,
    pub reupload_max_uploads_ago: u64,
    pub reupload_max_bytes_ago: u64,
    pub reupload_max_seconds_ago: i64,
    pub force_upload: bool,
    pub mark_uploaded: bool,
    pub supported_formats: Auto<Vec<String>>,
    pub upload_method: String,
    pub check_response: bool,
    pub check_response_timeout: f64,
    pub redetect_terminal: bool,
    pub stream_max_size: u64,
    pub file_max_size: u64,

    // Display.
    pub fewer_diacritics: bool,
    pub placeholder_char: char,
    pub background: String,

    // Terminal identification.
    pub terminal_name: String,
    pub terminal_id: String,
    pub session_id: String,

    // General.
    pub ignore_unknown_attributes: bool,
    pub log_level: String,

    // Cleanup.
    pub max_db_age_days: u64,
    pub max_num_ids: u64,
    pub cleanup_probability: f64,
    pub cleanup_target: f64,

    // Parallel upload.
    pub upload_progress_update_interval: f64,
    pub upload_stall_timeout: f64,
    pub allow_concurrent_uploads: Auto<bool>,
    pub upload_command_delay: f64,

    provenance: HashMap<&'static str, String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            id_space: "24bit".to_string(),
            id_subspace: "".to_string(),
            max_ids_per_subspace: 1024,
            id_database_dir: default_state_dir(),

            cache_dir: default_cache_dir(),
            cache_max_images: 4096,
            cache_max_total_size_bytes: 300 * 1024 * 1024,
            thumbnail_file_size_tolerance: 0.2,
            cache_always: false,

            cell_size: None,
            fallback_cell_size: Size { width: 8, height: 16 },
            scale: 1.0,
            global_scale: 1.0,
            max_rows: None,
            max_cols: None,
            fallback_max_rows: 24,
            fallback_max_cols: 80,

            max_command_size: 4096,
            max_payload_size: 2816,
            num_tmux_layers: None,
            reupload_max_uploads_ago: 1024,
            reupload_max_bytes_ago: 20 * 1024 * 1024,
            reupload_max_seconds_ago: 3600,
            force_upload: false,
            mark_uploaded: true,
            supported_formats: None,
            upload_method: "auto".to_string(),
            check_response: false,
            check_response_timeout: 3.0,
            redetect_terminal: true,
            stream_max_size: 2 * 1024 * 1024,
            file_max_size: 10 * 1024 * 1024,

            fewer_diacritics: false,
            placeholder_char: crate::placeholder::DEFAULT_PLACEHOLDER,
            background: "none".to_string(),

            terminal_name: String::new(),
            terminal_id: String::new(),
            session_id: String::new(),

            ignore_unknown_attributes: false,
            log_level: String::new(),

            max_db_age_days: 7,
            max_num_ids: 4 * 1024,
            cleanup_probability: 0.01,
            cleanup_target: 0.85,

            upload_progress_update_interval: 0.2,
            upload_stall_timeout: 2.0,
            allow_concurrent_uploads: None,
            upload_command_delay: 0.0,

            provenance: HashMap::new(),
        }
    }
}

fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("ikup")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join("ikup")
}

/// `$IKUP_CONFIG`, else `<user config dir>/ikup/config.toml` if it exists,
/// else no config file (spec §6 "Config file").
pub fn default_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("IKUP_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let candidate = dirs::config_dir()?.join("ikup").join("config.toml");
    candidate.exists().then_some(candidate)
}

impl Config {
    /// Defaults, layered with the config file (explicit path, or
    /// [`default_config_file`] if `None`) and then `IKUP_*` environment
    /// overrides — the three non-CLI layers spec §6 describes.
    pub fn load(config_file: Option<&Path>) -> Result<Config> {
        let mut config = Config::default();
        let resolved = config_file.map(PathBuf::from).or_else(default_config_file);
        if let Some(path) = &resolved {
            config.override_from_toml_file(path)?;
        }
        config.override_from_env()?;
        Ok(config)
    }
}

/// All field names known to the config, in declaration order, for
/// `IKUP_<NAME>` env lookups and "unknown key" detection.
const FIELD_NAMES: &[&str] = &[
    "id_space",
    "id_subspace",
    "max_ids_per_subspace",
    "id_database_dir",
    "cache_dir",
    "cache_max_images",
    "cache_max_total_size_bytes",
    "thumbnail_file_size_tolerance",
    "cache_always",
    "cell_size",
    "fallback_cell_size",
    "scale",
    "global_scale",
    "max_rows",
    "max_cols",
    "fallback_max_rows",
    "fallback_max_cols",
    "max_command_size",
    "max_payload_size",
    "num_tmux_layers",
    "reupload_max_uploads_ago",
    "reupload_max_bytes_ago",
    "reupload_max_seconds_ago",
    "force_upload",
    "mark_uploaded",
    "supported_formats",
    "upload_method",
    "check_response",
    "check_response_timeout",
    "redetect_terminal",
    "stream_max_size",
    "file_max_size",
    "fewer_diacritics",
    "placeholder_char",
    "background",
    "terminal_name",
    "terminal_id",
    "session_id",
    "ignore_unknown_attributes",
    "log_level",
    "max_db_age_days",
    "max_num_ids",
    "cleanup_probability",
    "cleanup_target",
    "upload_progress_update_interval",
    "upload_stall_timeout",
    "allow_concurrent_uploads",
    "upload_command_delay",
];

fn parse_bool(s: &str) -> Result<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "t" | "y" | "yes" => Ok(true),
        "false" | "0" | "f" | "n" | "no" => Ok(false),
        other => Err(Error::InvalidConfig(format!("invalid boolean value '{other}'"))),
    }
}

fn validate_scale(name: &str, value: f64) -> Result<()> {
    if name.contains("scale") && !(value > 0.0 && value <= 1_000_000.0) {
        return Err(Error::InvalidConfig(format!(
            "{name} must be positive and not too big: '{value}'"
        )));
    }
    Ok(())
}

fn validate_max_cols(value: u32) -> Result<()> {
    if !(0 < value && value <= 4096) {
        return Err(Error::InvalidConfig(format!(
            "max_cols must be positive and not greater than 4096: '{value}'"
        )));
    }
    Ok(())
}

fn validate_max_rows(value: u32) -> Result<()> {
    if !(0 < value && value as usize <= crate::placeholder::MAX_ROW) {
        return Err(Error::InvalidConfig(format!(
            "max_rows must be positive and not greater than {}: '{value}'",
            crate::placeholder::MAX_ROW
        )));
    }
    Ok(())
}

impl Config {
    pub fn get_provenance(&self, name: &str) -> &str {
        self.provenance.get(name).map(String::as_str).unwrap_or("default")
    }

    fn set_provenance(&mut self, name: &'static str, provenance: &str) {
        self.provenance.insert(name, provenance.to_string());
    }

    /// Apply a single `name = value` pair (already a string, as from an env
    /// var or a CLI `--set key=value`), validating and normalizing it the
    /// same way `validate_and_normalize` does (spec §6).
    pub fn apply_str(&mut self, name: &str, raw: &str, provenance: &str) -> Result<bool> {
        if raw == "auto" {
            return self.apply_auto(name, provenance);
        }
        macro_rules! set_u64 {
            ($field:ident) => {{
                self.$field = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: '{raw}'")))?;
                self.set_provenance(name, provenance);
                return Ok(true);
            }};
        }
        macro_rules! set_f64 {
            ($field:ident) => {{
                let v: f64 = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: '{raw}'")))?;
                validate_scale(name, v)?;
                self.$field = v;
                self.set_provenance(name, provenance);
                return Ok(true);
            }};
        }
        macro_rules! set_bool {
            ($field:ident) => {{
                self.$field = parse_bool(raw)?;
                self.set_provenance(name, provenance);
                return Ok(true);
            }};
        }
        macro_rules! set_str {
            ($field:ident) => {{
                self.$field = raw.to_string();
                self.set_provenance(name, provenance);
                return Ok(true);
            }};
        }

        match name {
            "id_space" => set_str!(id_space),
            "id_subspace" => set_str!(id_subspace),
            "max_ids_per_subspace" => set_u64!(max_ids_per_subspace),
            "id_database_dir" => {
                self.id_database_dir = if raw.is_empty() { default_state_dir() } else { PathBuf::from(raw) };
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "cache_dir" => {
                self.cache_dir = if raw.is_empty() { default_cache_dir() } else { PathBuf::from(raw) };
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "cache_max_images" => set_u64!(cache_max_images),
            "cache_max_total_size_bytes" => set_u64!(cache_max_total_size_bytes),
            "thumbnail_file_size_tolerance" => set_f64!(thumbnail_file_size_tolerance),
            "cache_always" => set_bool!(cache_always),
            "cell_size" => {
                self.cell_size = Some(Size::parse(raw)?);
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "fallback_cell_size" => {
                self.fallback_cell_size = Size::parse(raw)?;
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "scale" => set_f64!(scale),
            "global_scale" => set_f64!(global_scale),
            "max_rows" => {
                let v: u32 = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: '{raw}'")))?;
                validate_max_rows(v)?;
                self.max_rows = Some(v);
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "max_cols" => {
                let v: u32 = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: '{raw}'")))?;
                validate_max_cols(v)?;
                self.max_cols = Some(v);
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "fallback_max_rows" => {
                let v: u32 = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: '{raw}'")))?;
                validate_max_rows(v)?;
                self.fallback_max_rows = v;
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "fallback_max_cols" => {
                let v: u32 = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: '{raw}'")))?;
                validate_max_cols(v)?;
                self.fallback_max_cols = v;
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "max_command_size" => set_u64!(max_command_size),
            "max_payload_size" => set_u64!(max_payload_size),
            "num_tmux_layers" => {
                let v: u32 = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: '{raw}'")))?;
                self.num_tmux_layers = Some(v);
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "reupload_max_uploads_ago" => set_u64!(reupload_max_uploads_ago),
            "reupload_max_bytes_ago" => set_u64!(reupload_max_bytes_ago),
            "reupload_max_seconds_ago" => {
                let v: i64 = raw
                    .parse()
                    .map_err(|_| Error::InvalidConfig(format!("invalid value for {name}: '{raw}'")))?;
                self.reupload_max_seconds_ago = v;
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "force_upload" => set_bool!(force_upload),
            "mark_uploaded" => set_bool!(mark_uploaded),
            "supported_formats" => {
                let formats = raw.split([',', ' ']).filter(|s| !s.is_empty()).map(str::to_string).collect();
                self.supported_formats = Some(formats);
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "upload_method" => {
                if crate::upload::TransmissionMedium::from_str_opt(raw).is_none() {
                    return Err(Error::InvalidConfig(format!("invalid upload_method '{raw}'")));
                }
                set_str!(upload_method)
            }
            "check_response" => set_bool!(check_response),
            "check_response_timeout" => set_f64!(check_response_timeout),
            "redetect_terminal" => set_bool!(redetect_terminal),
            "stream_max_size" => set_u64!(stream_max_size),
            "file_max_size" => set_u64!(file_max_size),
            "fewer_diacritics" => set_bool!(fewer_diacritics),
            "placeholder_char" => {
                self.placeholder_char = raw
                    .chars()
                    .next()
                    .ok_or_else(|| Error::InvalidConfig("placeholder_char must not be empty".into()))?;
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "background" => set_str!(background),
            "terminal_name" => set_str!(terminal_name),
            "terminal_id" => set_str!(terminal_id),
            "session_id" => set_str!(session_id),
            "ignore_unknown_attributes" => set_bool!(ignore_unknown_attributes),
            "log_level" => set_str!(log_level),
            "max_db_age_days" => set_u64!(max_db_age_days),
            "max_num_ids" => set_u64!(max_num_ids),
            "cleanup_probability" => set_f64!(cleanup_probability),
            "cleanup_target" => set_f64!(cleanup_target),
            "upload_progress_update_interval" => set_f64!(upload_progress_update_interval),
            "upload_stall_timeout" => set_f64!(upload_stall_timeout),
            "allow_concurrent_uploads" => {
                self.allow_concurrent_uploads = Some(parse_bool(raw)?);
                self.set_provenance(name, provenance);
                return Ok(true);
            }
            "upload_command_delay" => set_f64!(upload_command_delay),
            _ => Ok(false),
        }
    }

    fn apply_auto(&mut self, name: &str, provenance: &str) -> Result<bool> {
        match name {
            "cell_size" => self.cell_size = None,
            "max_rows" => self.max_rows = None,
            "max_cols" => self.max_cols = None,
            "num_tmux_layers" => self.num_tmux_layers = None,
            "supported_formats" => self.supported_formats = None,
            "upload_method" => self.upload_method = "auto".to_string(),
            "allow_concurrent_uploads" => self.allow_concurrent_uploads = None,
            _ => return Err(Error::InvalidConfig(format!("{name} has no 'auto' setting"))),
        }
        self.set_provenance(name, provenance);
        Ok(true)
    }

    /// Apply every key in a parsed TOML table (spec §6 "config file layer").
    pub fn override_from_toml_str(&mut self, source: &str, provenance: Option<&str>) -> Result<()> {
        let provenance = provenance.unwrap_or("set from toml string").to_string();
        let value: toml::Value = toml::from_str(source)?;
        let table = value
            .as_table()
            .ok_or_else(|| Error::InvalidConfig("config must be a toml table".into()))?;

        let mut unknown = Vec::new();
        for (key, v) in table {
            let raw = toml_value_to_string(v);
            if !self.apply_str(key, &raw, &provenance)? {
                unknown.push(key.clone());
            }
        }
        if !unknown.is_empty() && !self.ignore_unknown_attributes {
            return Err(Error::InvalidConfig(format!(
                "unknown config keys: {}",
                unknown.join(", ")
            )));
        }
        Ok(())
    }

    pub fn override_from_toml_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path)?;
        self.override_from_toml_str(&content, Some(&format!("set from file {}", path.display())))
    }

    /// Apply `IKUP_<FIELD>` environment variables (spec §6 "environment layer").
    pub fn override_from_env(&mut self) -> Result<()> {
        for name in FIELD_NAMES {
            let env_name = format!("IKUP_{}", name.to_uppercase());
            if let Ok(value) = std::env::var(&env_name) {
                self.apply_str(name, &value, &format!("set via {env_name}"))?;
            }
        }
        Ok(())
    }

    fn field_value_string(&self, name: &str) -> Option<String> {
        Some(match name {
            "id_space" => self.id_space.clone(),
            "id_subspace" => self.id_subspace.clone(),
            "max_ids_per_subspace" => self.max_ids_per_subspace.to_string(),
            "id_database_dir" => self.id_database_dir.display().to_string(),
            "cache_dir" => self.cache_dir.display().to_string(),
            "cache_max_images" => self.cache_max_images.to_string(),
            "cache_max_total_size_bytes" => self.cache_max_total_size_bytes.to_string(),
            "thumbnail_file_size_tolerance" => self.thumbnail_file_size_tolerance.to_string(),
            "cache_always" => self.cache_always.to_string(),
            "cell_size" => self.cell_size.map(|s| s.to_string()).unwrap_or_else(|| "auto".into()),
            "fallback_cell_size" => self.fallback_cell_size.to_string(),
            "scale" => self.scale.to_string(),
            "global_scale" => self.global_scale.to_string(),
            "max_rows" => self.max_rows.map(|v| v.to_string()).unwrap_or_else(|| "auto".into()),
            "max_cols" => self.max_cols.map(|v| v.to_string()).unwrap_or_else(|| "auto".into()),
            "fallback_max_rows" => self.fallback_max_rows.to_string(),
            "fallback_max_cols" => self.fallback_max_cols.to_string(),
            "max_command_size" => self.max_command_size.to_string(),
            "max_payload_size" => self.max_payload_size.to_string(),
            "num_tmux_layers" => self.num_tmux_layers.map(|v| v.to_string()).unwrap_or_else(|| "auto".into()),
            "reupload_max_uploads_ago" => self.reupload_max_uploads_ago.to_string(),
            "reupload_max_bytes_ago" => self.reupload_max_bytes_ago.to_string(),
            "reupload_max_seconds_ago" => self.reupload_max_seconds_ago.to_string(),
            "force_upload" => self.force_upload.to_string(),
            "mark_uploaded" => self.mark_uploaded.to_string(),
            "supported_formats" => self
                .supported_formats
                .clone()
                .map(|v| v.join(","))
                .unwrap_or_else(|| "auto".into()),
            "upload_method" => self.upload_method.clone(),
            "check_response" => self.check_response.to_string(),
            "check_response_timeout" => self.check_response_timeout.to_string(),
            "redetect_terminal" => self.redetect_terminal.to_string(),
            "stream_max_size" => self.stream_max_size.to_string(),
            "file_max_size" => self.file_max_size.to_string(),
            "fewer_diacritics" => self.fewer_diacritics.to_string(),
            "placeholder_char" => self.placeholder_char.to_string(),
            "background" => self.background.clone(),
            "terminal_name" => self.terminal_name.clone(),
            "terminal_id" => self.terminal_id.clone(),
            "session_id" => self.session_id.clone(),
            "ignore_unknown_attributes" => self.ignore_unknown_attributes.to_string(),
            "log_level" => self.log_level.clone(),
            "max_db_age_days" => self.max_db_age_days.to_string(),
            "max_num_ids" => self.max_num_ids.to_string(),
            "cleanup_probability" => self.cleanup_probability.to_string(),
            "cleanup_target" => self.cleanup_target.to_string(),
            "upload_progress_update_interval" => self.upload_progress_update_interval.to_string(),
            "upload_stall_timeout" => self.upload_stall_timeout.to_string(),
            "allow_concurrent_uploads" => self
                .allow_concurrent_uploads
                .map(|v| v.to_string())
                .unwrap_or_else(|| "auto".into()),
            "upload_command_delay" => self.upload_command_delay.to_string(),
            _ => return None,
        })
    }

    /// `IkupConfig.to_toml_string`: every field as a quoted TOML string
    /// (spec §6 "config file" is "flat keys matching field names"; quoting
    /// everything as a string keeps this the exact inverse of
    /// [`Config::apply_str`], which always parses from a string).
    pub fn to_toml_string(&self, with_provenance: bool, skip_default: bool) -> String {
        let mut out = String::new();
        for name in FIELD_NAMES {
            if skip_default && self.get_provenance(name) == "default" {
                continue;
            }
            let Some(value) = self.field_value_string(name) else {
                continue;
            };
            if with_provenance {
                out.push_str(&format!("# {}\n", self.get_provenance(name)));
            }
            out.push_str(&format!("{name} = {value:?}\n"));
        }
        out
    }
}

fn toml_value_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Integer(i) => i.to_string(),
        toml::Value::Float(f) => f.to_string(),
        toml::Value::Boolean(b) => b.to_string(),
        toml::Value::Array(items) => items
            .iter()
            .map(toml_value_to_string)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_report_default_provenance() {
        let config = Config::default();
        assert_eq!(config.get_provenance("scale"), "default");
        assert_eq!(config.scale, 1.0);
    }

    #[test]
    fn env_override_sets_provenance() {
        let mut config = Config::default();
        config.apply_str("scale", "2.0", "set via IKUP_SCALE").unwrap();
        assert_eq!(config.scale, 2.0);
        assert_eq!(config.get_provenance("scale"), "set via IKUP_SCALE");
    }

    #[test]
    fn toml_override_layers_over_defaults() {
        let mut config = Config::default();
        config
            .override_from_toml_str("scale = 0.5\nmax_cols = 40\n", Some("test"))
            .unwrap();
        assert_eq!(config.scale, 0.5);
        assert_eq!(config.max_cols, Some(40));
    }

    #[test]
    fn unknown_key_is_rejected_by_default() {
        let mut config = Config::default();
        let err = config.override_from_toml_str("bogus_key = 1\n", None).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn unknown_key_allowed_when_ignoring() {
        let mut config = Config::default();
        config.ignore_unknown_attributes = true;
        config.override_from_toml_str("bogus_key = 1\n", None).unwrap();
    }

    #[test]
    fn scale_out_of_range_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_str("scale", "-1.0", "test").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn max_rows_over_diacritic_table_is_rejected() {
        let mut config = Config::default();
        let err = config.apply_str("max_rows", "9999", "test").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn auto_resets_to_none() {
        let mut config = Config::default();
        config.apply_str("max_cols", "40", "test").unwrap();
        assert_eq!(config.max_cols, Some(40));
        config.apply_str("max_cols", "auto", "test").unwrap();
        assert_eq!(config.max_cols, None);
    }

    #[test]
    fn cell_size_parses_wxh() {
        let mut config = Config::default();
        config.apply_str("cell_size", "9x18", "test").unwrap();
        assert_eq!(config.cell_size, Some(Size { width: 9, height: 18 }));
    }

    #[test]
    fn load_with_explicit_file_applies_its_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "scale = 0.25\n").unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.scale, 0.25);
    }

    #[test]
    fn load_with_missing_explicit_file_is_an_error() {
        let err = Config::load(Some(std::path::Path::new("/nonexistent/ikup-test.toml"))).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn load_with_no_file_anywhere_falls_back_to_defaults() {
        unsafe { std::env::remove_var("IKUP_CONFIG") };
        let config = Config::load(None).unwrap();
        assert_eq!(config.scale, 1.0);
    }

    #[test]
    fn to_toml_string_skip_default_only_emits_overridden_fields() {
        let mut config = Config::default();
        config.apply_str("scale", "2.0", "set via CLI").unwrap();
        let dumped = config.to_toml_string(false, true);
        assert!(dumped.contains("scale = \"2\""));
        assert!(!dumped.contains("fallback_max_cols"));
    }

    #[test]
    fn to_toml_string_with_provenance_includes_comment_lines() {
        let mut config = Config::default();
        config.apply_str("scale", "2.0", "set via CLI").unwrap();
        let dumped = config.to_toml_string(true, true);
        assert!(dumped.contains("# set via CLI"));
    }

    #[test]
    fn to_toml_string_without_skip_default_includes_every_field() {
        let config = Config::default();
        let dumped = config.to_toml_string(false, false);
        for name in FIELD_NAMES {
            assert!(dumped.contains(name), "missing field {name}");
        }
    }
}
