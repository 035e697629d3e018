use std::path::Path;

use crate::diagnostic::Diagnostic;

/// Accelerator target configuration. Every tunable the lowering engine
/// consults lives here instead of being hardcoded.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetConfig {
    /// Short identifier used in CLI and file paths (e.g. "cuda").
    pub name: String,
    /// Human-readable name (e.g. "NVIDIA CUDA").
    pub display_name: String,
    /// Warps per program instance (launch hint carried with the kernel).
    pub num_warps: u32,
    /// CTAs per cluster (launch hint).
    pub num_ctas: u32,
    /// Software pipelining depth for reduction loops (launch hint).
    pub num_stages: u32,
    /// Upper bound on the element count of any block type.
    pub max_tensor_numel: u64,
    /// Whether the hardware has native float atomic max/min. Advisory:
    /// float max/min always lowers through the integer decomposition.
    pub native_fp_atomics: bool,
    /// Whether fp8 operands are accepted by `dot`.
    pub fp8: bool,
}

/// Default element cap for block types (2^20).
pub const MAX_TENSOR_NUMEL: u64 = 1 << 20;

impl TargetConfig {
    /// Built-in CUDA configuration (hardcoded fallback).
    pub fn cuda() -> Self {
        Self {
            name: "cuda".to_string(),
            display_name: "NVIDIA CUDA".to_string(),
            num_warps: 4,
            num_ctas: 1,
            num_stages: 3,
            max_tensor_numel: MAX_TENSOR_NUMEL,
            native_fp_atomics: false,
            fp8: true,
        }
    }

    /// Load a target configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, Diagnostic> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Diagnostic::value_error(format!(
                "cannot read target config '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse_toml(&content, path)
    }

    /// Resolve a target by name: look for `targets/{name}.toml` relative to
    /// the binary or working directory, falling back to built-in configs.
    pub fn resolve(name: &str) -> Result<Self, Diagnostic> {
        // Reject path traversal
        if name.contains('/') || name.contains('\\') || name.contains("..") || name.starts_with('.')
        {
            return Err(Diagnostic::value_error(format!(
                "invalid target name '{}'",
                name
            )));
        }

        // Built-in target
        if name == "cuda" {
            return Ok(Self::cuda());
        }

        let relative = format!("targets/{}.toml", name);

        // 1. Relative to the binary
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                for base in dir.ancestors().take(3) {
                    let path = base.join(&relative);
                    if path.exists() {
                        return Self::load(&path);
                    }
                }
            }
        }

        // 2. Current working directory
        let cwd_path = std::path::PathBuf::from(&relative);
        if cwd_path.exists() {
            return Self::load(&cwd_path);
        }

        Err(
            Diagnostic::value_error(format!(
                "unknown target '{}' (looked for '{}')",
                name, relative
            ))
            .with_help("the built-in target is 'cuda'".to_string()),
        )
    }

    fn parse_toml(content: &str, path: &Path) -> Result<Self, Diagnostic> {
        let err = |msg: String| Diagnostic::value_error(format!("{}: {}", path.display(), msg));

        let defaults = Self::cuda();
        let mut name = String::new();
        let mut display_name = String::new();
        let mut num_warps = defaults.num_warps;
        let mut num_ctas = defaults.num_ctas;
        let mut num_stages = defaults.num_stages;
        let mut max_tensor_numel = defaults.max_tensor_numel;
        let mut native_fp_atomics = defaults.native_fp_atomics;
        let mut fp8 = defaults.fp8;

        let mut section = String::new();

        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            if trimmed.starts_with('[') && trimmed.ends_with(']') {
                section = trimmed[1..trimmed.len() - 1].trim().to_string();
                continue;
            }
            if let Some((key, value)) = trimmed.split_once('=') {
                let key = key.trim();
                let value = value.trim();
                let unquoted = value.trim_matches('"');

                match (section.as_str(), key) {
                    ("target", "name") => name = unquoted.to_string(),
                    ("target", "display_name") => display_name = unquoted.to_string(),
                    ("launch", "num_warps") => {
                        num_warps = value
                            .parse()
                            .map_err(|_| err(format!("invalid launch.num_warps: {}", value)))?;
                    }
                    ("launch", "num_ctas") => {
                        num_ctas = value
                            .parse()
                            .map_err(|_| err(format!("invalid launch.num_ctas: {}", value)))?;
                    }
                    ("launch", "num_stages") => {
                        num_stages = value
                            .parse()
                            .map_err(|_| err(format!("invalid launch.num_stages: {}", value)))?;
                    }
                    ("limits", "max_tensor_numel") => {
                        max_tensor_numel = value.parse().map_err(|_| {
                            err(format!("invalid limits.max_tensor_numel: {}", value))
                        })?;
                    }
                    ("features", "native_fp_atomics") => {
                        native_fp_atomics = parse_bool(value).ok_or_else(|| {
                            err(format!("invalid features.native_fp_atomics: {}", value))
                        })?;
                    }
                    ("features", "fp8") => {
                        fp8 = parse_bool(value)
                            .ok_or_else(|| err(format!("invalid features.fp8: {}", value)))?;
                    }
                    _ => {}
                }
            }
        }

        if name.is_empty() {
            return Err(err("missing target.name".to_string()));
        }
        if num_warps == 0 || !num_warps.is_power_of_two() {
            return Err(err("launch.num_warps must be a power of two".to_string()));
        }
        if num_ctas == 0 {
            return Err(err("launch.num_ctas must be > 0".to_string()));
        }
        if max_tensor_numel == 0 {
            return Err(err("limits.max_tensor_numel must be > 0".to_string()));
        }
        if display_name.is_empty() {
            display_name = name.clone();
        }

        Ok(Self {
            name,
            display_name,
            num_warps,
            num_ctas,
            num_stages,
            max_tensor_numel,
            native_fp_atomics,
            fp8,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}
