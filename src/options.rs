//! Configuration knobs for the differentiation transform.
//!
//! Options come from three layers: built-in defaults, an `autodiff.cfg`
//! key/value file, and `AUTODIFF_*` environment overrides. Passes receive a
//! `DifferentiationOptions` value explicitly; `current`/`set_global` exist for
//! drivers that configure once per process.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DifferentiationOptions {
    /// Synthesize real JVPs. When disabled a trapping JVP stub is emitted.
    pub enable_forward_mode: bool,
    /// Keep `differentiable_function_extract` users instead of folding them.
    pub skip_folding_extractions: bool,
    /// Maximum depth of nested derivative requests.
    pub max_nesting_depth: usize,
    /// Warn when the result does not depend on any wrt parameter.
    pub warn_nonvaried_result: bool,
}

impl DifferentiationOptions {
    #[must_use]
    pub fn with_forward_mode(mut self, enabled: bool) -> Self {
        self.enable_forward_mode = enabled;
        self
    }

    #[must_use]
    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    #[must_use]
    pub fn with_skip_folding(mut self, skip: bool) -> Self {
        self.skip_folding_extractions = skip;
        self
    }
}

impl Default for DifferentiationOptions {
    fn default() -> Self {
        Self {
            enable_forward_mode: false,
            skip_folding_extractions: false,
            max_nesting_depth: 64,
            warn_nonvaried_result: true,
        }
    }
}

static GLOBAL_OPTIONS: OnceLock<RwLock<DifferentiationOptions>> = OnceLock::new();

fn options_cell() -> &'static RwLock<DifferentiationOptions> {
    GLOBAL_OPTIONS.get_or_init(|| RwLock::new(DifferentiationOptions::default()))
}

/// Update the process-wide differentiation options.
pub fn set_global(options: DifferentiationOptions) {
    if let Ok(mut guard) = options_cell().write() {
        *guard = options;
    }
}

/// Retrieve the current process-wide differentiation options.
#[must_use]
pub fn current() -> DifferentiationOptions {
    options_cell()
        .read()
        .map(|guard| *guard)
        .unwrap_or_default()
}

/// Resolve options from `autodiff.cfg` in the working directory (if any) and
/// the environment.
pub fn resolve() -> Result<DifferentiationOptions> {
    let mut options = match config_file_candidate() {
        Some(path) => load_from_path(&path)?,
        None => DifferentiationOptions::default(),
    };
    apply_env(&mut options, |key| std::env::var(key).ok())?;
    Ok(options)
}

/// Load options from a config file, starting from the defaults.
pub fn load_from_path(path: &Path) -> Result<DifferentiationOptions> {
    let contents = fs::read_to_string(path)?;
    parse_config(&contents)
}

fn config_file_candidate() -> Option<PathBuf> {
    let path = std::env::current_dir().ok()?.join("autodiff.cfg");
    path.exists().then_some(path)
}

fn parse_config(contents: &str) -> Result<DifferentiationOptions> {
    let mut options = DifferentiationOptions::default();
    for (index, line) in contents.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((key, value)) = trimmed.split_once('=') else {
            return Err(Error::config(format!(
                "line {}: expected `key = value`",
                index + 1
            )));
        };
        apply_key(&mut options, key.trim(), value.trim())?;
    }
    Ok(options)
}

fn apply_env(
    options: &mut DifferentiationOptions,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    const KEYS: &[(&str, &str)] = &[
        ("AUTODIFF_FORWARD_MODE", "forward_mode"),
        ("AUTODIFF_SKIP_FOLDING", "skip_folding"),
        ("AUTODIFF_MAX_NESTING_DEPTH", "max_nesting_depth"),
        ("AUTODIFF_WARN_NONVARIED", "warn_nonvaried_result"),
    ];
    for (var, key) in KEYS {
        if let Some(value) = lookup(var) {
            apply_key(options, key, value.trim())?;
        }
    }
    Ok(())
}

fn apply_key(options: &mut DifferentiationOptions, key: &str, value: &str) -> Result<()> {
    match key {
        "forward_mode" | "autodiff.forward_mode" => {
            options.enable_forward_mode = parse_bool(key, value)?;
        }
        "skip_folding" | "autodiff.skip_folding" => {
            options.skip_folding_extractions = parse_bool(key, value)?;
        }
        "max_nesting_depth" | "autodiff.max_nesting_depth" => {
            options.max_nesting_depth = value.parse::<usize>().map_err(|_| {
                Error::config(format!("`{key}` expects an unsigned integer, found `{value}`"))
            })?;
        }
        "warn_nonvaried_result" | "autodiff.warn_nonvaried_result" => {
            options.warn_nonvaried_result = parse_bool(key, value)?;
        }
        other => return Err(Error::config(format!("unknown key `{other}`"))),
    }
    Ok(())
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "`{key}` expects a boolean, found `{value}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_config_reads_known_keys() {
        let options = parse_config(
            "# autodiff\nforward_mode = yes\nautodiff.max_nesting_depth = 8\n\nskip_folding=0\n",
        )
        .expect("valid config");
        assert!(options.enable_forward_mode);
        assert_eq!(options.max_nesting_depth, 8);
        assert!(!options.skip_folding_extractions);
        assert!(options.warn_nonvaried_result);
    }

    #[test]
    fn parse_config_rejects_unknown_keys_and_bad_values() {
        let err = parse_config("fuel = 3").expect_err("unknown key");
        assert_eq!(err.to_string(), "configuration error: unknown key `fuel`");

        let err = parse_config("forward_mode = maybe").expect_err("bad bool");
        assert!(err.to_string().contains("expects a boolean"));

        let err = parse_config("forward_mode").expect_err("missing value");
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn env_overrides_apply_after_file() {
        let mut options = DifferentiationOptions::default();
        apply_env(&mut options, |key| match key {
            "AUTODIFF_FORWARD_MODE" => Some("on".into()),
            "AUTODIFF_MAX_NESTING_DEPTH" => Some(" 3 ".into()),
            _ => None,
        })
        .expect("env overrides");
        assert!(options.enable_forward_mode);
        assert_eq!(options.max_nesting_depth, 3);
    }

    #[test]
    fn load_from_path_reads_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "warn_nonvaried_result = false").expect("write");
        let options = load_from_path(file.path()).expect("load");
        assert!(!options.warn_nonvaried_result);
    }

    #[test]
    fn builders_and_global_round_trip() {
        let options = DifferentiationOptions::default()
            .with_forward_mode(true)
            .with_max_nesting_depth(2)
            .with_skip_folding(true);
        assert!(options.enable_forward_mode && options.skip_folding_extractions);
        set_global(options);
        assert_eq!(current(), options);
        set_global(DifferentiationOptions::default());
    }
}
