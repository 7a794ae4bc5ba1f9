//! Run configuration
//!
//! Settings come from an optional TOML file and are then overridden by CLI flags.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error::{Error, Result};
use super::tiling::TileSizing;

const DEFAULT_MEMORY_MB: u64 = 512;

/// Cell-to-cell distances used to weight grid edges
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// East-west distance between cell centres
    pub ew: f64,
    /// North-south distance between cell centres
    pub ns: f64,
    /// Diagonal distance; `sqrt(ew^2 + ns^2)` when unset
    #[serde(default)]
    pub diag: Option<f64>,
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            ew: 1.0,
            ns: 1.0,
            diag: None,
        }
    }
}

impl Resolution {
    pub fn new(ew: f64, ns: f64) -> Self {
        Self { ew, ns, diag: None }
    }

    pub fn diagonal(&self) -> f64 {
        self.diag
            .unwrap_or_else(|| (self.ew * self.ew + self.ns * self.ns).sqrt())
    }

    pub fn validate(&self) -> Result<()> {
        for (name, v) in [("ew", self.ew), ("ns", self.ns), ("diag", self.diagonal())] {
            if !(v.is_finite() && v > 0.0) {
                return Err(Error::InvalidConfig(format!(
                    "resolution {name} must be positive and finite, got {v}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerracostConfig {
    /// Explicit tile height (requires `tile_cols`)
    pub tile_rows: Option<u32>,
    /// Explicit tile width (requires `tile_rows`)
    pub tile_cols: Option<u32>,
    /// Target tile count; ignored when explicit dimensions are given
    pub num_tiles: Option<u32>,
    /// Memory budget for one phase's working set
    pub memory_mb: u64,
    pub resolution: Resolution,
    /// Hard cap on priority-queue entries; unbounded when unset
    pub max_queue_entries: Option<usize>,
    /// Directory holding the intermediate artifacts and lock file
    pub work_dir: PathBuf,
}

impl Default for TerracostConfig {
    fn default() -> Self {
        Self {
            tile_rows: None,
            tile_cols: None,
            num_tiles: None,
            memory_mb: DEFAULT_MEMORY_MB,
            resolution: Resolution::default(),
            max_queue_entries: None,
            work_dir: PathBuf::from("terracost-work"),
        }
    }
}

impl TerracostConfig {
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn memory_budget(&self) -> u64 {
        self.memory_mb.saturating_mul(1024 * 1024)
    }

    pub fn sizing(&self) -> Result<TileSizing> {
        match (self.tile_rows, self.tile_cols, self.num_tiles) {
            (Some(rows), Some(cols), _) => Ok(TileSizing::Explicit { rows, cols }),
            (Some(_), None, _) | (None, Some(_), _) => Err(Error::InvalidConfig(
                "tile_rows and tile_cols must be given together".to_string(),
            )),
            (None, None, Some(0)) => Err(Error::InvalidConfig(
                "num_tiles must be at least 1".to_string(),
            )),
            (None, None, Some(n)) => Ok(TileSizing::TileCount(n)),
            (None, None, None) => Ok(TileSizing::Auto),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.resolution.validate()?;
        self.sizing()?;
        if self.memory_mb == 0 {
            return Err(Error::InvalidConfig("memory_mb must be positive".to_string()));
        }
        if self.max_queue_entries == Some(0) {
            return Err(Error::InvalidConfig(
                "max_queue_entries must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagonal_defaults_to_hypotenuse() {
        let res = Resolution::new(3.0, 4.0);
        assert!((res.diagonal() - 5.0).abs() < 1e-12);
        let explicit = Resolution {
            diag: Some(2.0),
            ..res
        };
        assert_eq!(explicit.diagonal(), 2.0);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let config = TerracostConfig::from_toml_str(
            r#"
            num_tiles = 4
            memory_mb = 64
            work_dir = "/tmp/tc"

            [resolution]
            ew = 30.0
            ns = 30.0
            "#,
        )
        .unwrap();
        assert_eq!(config.sizing().unwrap(), TileSizing::TileCount(4));
        assert_eq!(config.memory_budget(), 64 * 1024 * 1024);
        assert_eq!(config.resolution.ew, 30.0);
        assert_eq!(config.work_dir, PathBuf::from("/tmp/tc"));
    }

    #[test]
    fn test_half_explicit_tile_is_rejected() {
        let config = TerracostConfig {
            tile_rows: Some(10),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_bad_resolution_is_rejected() {
        let err = TerracostConfig::from_toml_str("[resolution]\new = -1.0\nns = 1.0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
