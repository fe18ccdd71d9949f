pub mod ch;
pub mod diagnose;
pub mod pipeline;
pub mod sync;
pub mod trials;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use belltest_core::{AnalysisConfig, Result as CoreResult};
use sha2::{Digest, Sha256};

pub type CmdResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Command-line overrides layered on top of an optional config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnalysisOverrides<'a> {
    pub config_path: Option<&'a str>,
    pub pulses_per_trial: Option<u32>,
    pub tolerance: Option<u64>,
    pub radius: Option<f64>,
}

impl AnalysisOverrides<'_> {
    /// Load the config file (or defaults), apply flags, validate.
    pub fn load(&self) -> CoreResult<AnalysisConfig> {
        let mut cfg = match self.config_path {
            Some(path) => AnalysisConfig::from_json_path(Path::new(path))?,
            None => AnalysisConfig::default(),
        };
        if let Some(pk) = self.pulses_per_trial {
            cfg.pulses_per_trial = pk;
        }
        if let Some(tol) = self.tolerance {
            cfg.phase_tolerance_ticks = tol;
        }
        if let Some(r) = self.radius {
            cfg.radius = r;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Hex SHA-256 of a file, streamed in 1 MiB chunks.
pub fn sha256_hex(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 1 << 20];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Print `<digest>  <name>` for every input so a report can be tied to the
/// exact bytes it was computed from.
pub fn print_digests<P: AsRef<Path>>(paths: &[P]) -> std::io::Result<()> {
    for p in paths {
        let p = p.as_ref();
        println!("    {}  {}", sha256_hex(p)?, p.display());
    }
    Ok(())
}

/// Parse a slot mask given as hex (`0x03C0`) or decimal (`960`).
pub fn parse_mask(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    match parsed {
        Ok(0) => Err("mask must select at least one slot".to_string()),
        Ok(m) => Ok(m),
        Err(e) => Err(format!("invalid mask '{s}': {e}")),
    }
}

/// Pretty-printed JSON to `path`.
pub fn write_json<T: serde::Serialize>(path: &str, value: &T) -> CmdResult {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json)?;
    println!("Wrote {path}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_mask_hex_and_decimal() {
        assert_eq!(parse_mask("0x03C0"), Ok(0x03C0));
        assert_eq!(parse_mask("0X00c0"), Ok(0x00C0));
        assert_eq!(parse_mask("960"), Ok(0x03C0));
    }

    #[test]
    fn test_parse_mask_rejects_zero_and_garbage() {
        assert!(parse_mask("0x0").is_err());
        assert!(parse_mask("0").is_err());
        assert!(parse_mask("0x1_0000").is_err());
        assert!(parse_mask("clicks").is_err());
    }

    #[test]
    fn test_sha256_known_vector() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"abc").unwrap();
        f.flush().unwrap();
        assert_eq!(
            sha256_hex(f.path()).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_overrides_apply_on_defaults() {
        let cfg = AnalysisOverrides {
            pulses_per_trial: Some(12),
            radius: Some(0.1),
            ..Default::default()
        }
        .load()
        .unwrap();
        assert_eq!(cfg.pulses_per_trial, 12);
        assert_eq!(cfg.radius, 0.1);
        assert_eq!(
            cfg.phase_tolerance_ticks,
            belltest_core::config::DEFAULT_PHASE_TOLERANCE_TICKS
        );
    }

    #[test]
    fn test_overrides_are_validated() {
        let bad = AnalysisOverrides {
            radius: Some(0.7),
            ..Default::default()
        };
        assert!(bad.load().is_err());
    }
}
