use std::fs;
use std::path::{Path, PathBuf};

use sage::engine::{CacheBudget, EncodingMode, EngineOptions, SectionCount};
use serde::Deserialize;
use thiserror::Error;

/// Engine settings read from a TOML file. Every key is optional; unset keys
/// keep the engine defaults.
#[derive(Debug, Default)]
pub struct FileConfig {
    path: Option<PathBuf>,
    data: RawConfig,
}

impl FileConfig {
    /// Loads `explicit`, or the per-user default file when it exists.
    pub fn load(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            let data = read_file(&path)?;
            return Ok(Self {
                path: Some(path),
                data,
            });
        }
        match default_config_path() {
            Some(path) if path.exists() => {
                let data = read_file(&path)?;
                Ok(Self {
                    path: Some(path),
                    data,
                })
            }
            _ => Ok(Self::default()),
        }
    }

    /// File the settings came from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Applies the file's settings on top of `options`.
    pub fn apply(&self, mut options: EngineOptions) -> Result<EngineOptions, ConfigError> {
        let raw = &self.data.engine;
        if let Some(samples) = raw.num_samples {
            options.num_samples = samples;
        }
        if let Some(page_size) = raw.page_size {
            options.page_size = page_size;
        }
        if let Some(threads) = raw.threads {
            options.threads = threads;
        }
        if let Some(partition_size) = raw.partition_size {
            options.partition_size = partition_size;
        }
        if let Some(io_depth) = raw.io_depth {
            options.io_depth = io_depth;
        }
        match (raw.cache_mib, raw.cache_dense_multiple) {
            (Some(_), Some(_)) => {
                return Err(ConfigError::Conflict {
                    path: self.display_path(),
                    keys: "cache_mib and cache_dense_multiple",
                })
            }
            (Some(mib), None) => options.cache_budget = CacheBudget::mib(mib),
            (None, Some(factor)) => options.cache_budget = CacheBudget::DenseMultiple(factor),
            (None, None) => {}
        }
        if let Some(gather) = raw.gather_sections {
            options.gather_sections = section_count(gather);
        }
        if let Some(scatter) = raw.scatter_sections {
            options.scatter_sections = Some(section_count(scatter));
        }
        if let Some(seed) = raw.seed {
            options.seed = seed;
        }
        if let Some(entries) = raw.initial_sparse_entries {
            options.initial_sparse_entries = entries;
        }
        if let Some(encoding) = raw.encoding {
            options.encoding = encoding;
        }
        if let Some(init) = raw.init_all_values {
            options.init_all_values = init;
        }
        if let Some(certain) = raw.certain_graph {
            options.certain_graph = certain;
        }
        if let Some(ratio) = raw.batch_sampling_ratio {
            options.batch_sampling_ratio = ratio;
        }
        if let Some(scratch) = &raw.scratch {
            options.scratch_path = scratch.clone();
        }
        Ok(options)
    }

    fn display_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_default()
    }
}

/// Positive counts are fixed section counts; negative ones mean one section
/// per that many vertex ids.
pub fn section_count(raw: i64) -> SectionCount {
    if raw < 0 {
        SectionCount::PerVertices(raw.unsigned_abs().min(u32::MAX as u64) as u32)
    } else {
        SectionCount::Fixed(raw.min(u32::MAX as i64) as u32)
    }
}

fn read_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    engine: RawEngine,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawEngine {
    num_samples: Option<usize>,
    page_size: Option<usize>,
    threads: Option<usize>,
    partition_size: Option<usize>,
    io_depth: Option<usize>,
    cache_mib: Option<usize>,
    cache_dense_multiple: Option<f64>,
    gather_sections: Option<i64>,
    scatter_sections: Option<i64>,
    seed: Option<u64>,
    initial_sparse_entries: Option<usize>,
    encoding: Option<EncodingMode>,
    init_all_values: Option<bool>,
    certain_graph: Option<bool>,
    batch_sampling_ratio: Option<f32>,
    scratch: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("config {path} sets both {keys}")]
    Conflict { path: PathBuf, keys: &'static str },
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("sage").join("sage.toml"))
}
