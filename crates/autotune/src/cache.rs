//! The persistent tuning cache.
//!
//! Line-delimited JSON: one header object asserting provenance, then one
//! record per measured configuration. Appends are single line flushes, so
//! a reader at worst sees a truncated final line, which it discards.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use gridtune_space::{Config, Param, SpaceError, Value};

use crate::strategy::TuningProblem;

const CACHE_MAGIC: &str = "kernel_launcher";
const CACHE_VERSION: &str = "0.1";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cannot access tuning cache `{path}`: {message}")]
    Io { path: String, message: String },

    #[error("`{path}` is not a tuning cache or the header is corrupted")]
    Header { path: String },

    #[error("`{path}` uses cache version `{found}`, expected `{expected}`")]
    Version {
        path: String,
        found: String,
        expected: &'static str,
    },

    #[error(
        "`{path}` holds results tuned for kernel `{found}`, but the current kernel is `{expected}`"
    )]
    KernelMismatch {
        path: String,
        found: String,
        expected: String,
    },

    #[error(
        "`{path}` holds results tuned for device `{found}`, but the current device is `{expected}`"
    )]
    DeviceMismatch {
        path: String,
        found: String,
        expected: String,
    },

    #[error("`{path}` holds results tuned for a different parameter set")]
    ParameterMismatch { path: String },

    #[error("`{path}`: malformed record on line {line}: {message}")]
    Record {
        path: String,
        line: usize,
        message: String,
    },

    #[error("`{path}`: recorded best configuration is no longer valid: {message}")]
    InvalidBest { path: String, message: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheHeader {
    magic: String,
    version: String,
    kernel_name: String,
    kernel_source: String,
    device: String,
    cuda_driver: u32,
    hostname: String,
    date: String,
    parameters: Vec<HeaderParam>,
}

#[derive(Debug, Serialize, Deserialize)]
struct HeaderParam {
    name: String,
    #[serde(rename = "type")]
    value_type: String,
    values: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    key: String,
    config: serde_json::Value,
    date: String,
    performance: f64,
}

/// Append-only record of `(configuration key → performance)`, tied to one
/// kernel builder and device.
#[derive(Debug)]
pub struct TuningCache {
    path: PathBuf,
    /// Builder parameters in the canonical (alphabetical) key order.
    parameters: Vec<Param>,
    entries: HashMap<String, f64>,
}

impl TuningCache {
    /// Open or create the cache file for a tuning problem.
    ///
    /// Creating writes the header and reports no best configuration.
    /// Opening validates the header against the problem and replays every
    /// record; the best recorded configuration (if any) is returned.
    pub fn open(
        path: impl AsRef<Path>,
        problem: &TuningProblem<'_>,
    ) -> Result<(Self, Option<Config>), CacheError> {
        let path = path.as_ref();
        let mut parameters = problem.space().params().to_vec();
        parameters.sort_by(|a, b| a.name().cmp(b.name()));

        let mut cache = TuningCache {
            path: path.to_owned(),
            parameters,
            entries: HashMap::new(),
        };

        if !path.exists() {
            cache.write_header(problem)?;
            return Ok((cache, None));
        }

        let text = fs::read_to_string(path).map_err(|err| CacheError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;

        let lines: Vec<(usize, &str)> = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .collect();

        let Some(((_, header_line), records)) = lines.split_first() else {
            // an existing but empty file behaves like a fresh cache
            cache.write_header(problem)?;
            return Ok((cache, None));
        };

        let header: CacheHeader =
            serde_json::from_str(header_line).map_err(|_| CacheError::Header {
                path: path.display().to_string(),
            })?;
        cache.check_header(&header, problem)?;

        let mut best: Option<(f64, serde_json::Value)> = None;
        for (position, (line_number, line)) in records.iter().enumerate() {
            let record: CacheRecord = match serde_json::from_str(line) {
                Ok(record) => record,
                Err(err) => {
                    if position + 1 == records.len() {
                        // append-safe format: a truncated final line is dropped
                        tracing::warn!(
                            path = %path.display(),
                            line = line_number + 1,
                            "discarding truncated tuning cache record"
                        );
                        break;
                    }
                    return Err(CacheError::Record {
                        path: path.display().to_string(),
                        line: line_number + 1,
                        message: err.to_string(),
                    });
                }
            };

            if best
                .as_ref()
                .map(|(performance, _)| record.performance > *performance)
                .unwrap_or(true)
            {
                best = Some((record.performance, record.config.clone()));
            }
            cache.entries.insert(record.key, record.performance);
        }

        let best_config = match best {
            Some((_, config_json)) => Some(problem.space().load_config(&config_json).map_err(
                |err| CacheError::InvalidBest {
                    path: path.display().to_string(),
                    message: err.to_string(),
                },
            )?),
            None => None,
        };

        Ok((cache, best_config))
    }

    /// Record one measurement. Disk failures are logged, never propagated;
    /// the in-memory view is updated regardless.
    pub fn append(&mut self, config: &Config, performance: f64) {
        let key = match self.key_for(config) {
            Ok(key) => key,
            Err(err) => {
                tracing::warn!(error = %err, "cannot form a cache key; measurement dropped");
                return;
            }
        };
        self.entries.insert(key.clone(), performance);

        let record = CacheRecord {
            key,
            config: config.to_json(),
            date: now(),
            performance,
        };
        if let Err(err) = self.append_line(&record) {
            tracing::warn!(
                path = %self.path.display(),
                error = %err,
                "failed to append to the tuning cache"
            );
        }
    }

    /// The recorded performance of a configuration, if any.
    pub fn find(&self, config: &Config) -> Option<f64> {
        let key = self.key_for(config).ok()?;
        self.entries.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The canonical key: values rendered in alphabetical parameter order,
    /// joined by `|`.
    fn key_for(&self, config: &Config) -> Result<String, SpaceError> {
        let mut parts = Vec::with_capacity(self.parameters.len());
        for param in &self.parameters {
            parts.push(config.at(param)?.to_string());
        }
        Ok(parts.join("|"))
    }

    fn write_header(&self, problem: &TuningProblem<'_>) -> Result<(), CacheError> {
        let header = self.make_header(problem);
        let line = serde_json::to_string(&header).map_err(|err| CacheError::Io {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })?;
        fs::write(&self.path, line + "\n").map_err(|err| CacheError::Io {
            path: self.path.display().to_string(),
            message: err.to_string(),
        })
    }

    fn make_header(&self, problem: &TuningProblem<'_>) -> CacheHeader {
        let parameters = self
            .parameters
            .iter()
            .map(|param| HeaderParam {
                name: param.name().to_owned(),
                value_type: param.value_type().name().to_owned(),
                values: param.values().iter().map(Value::to_json).collect(),
            })
            .collect();

        CacheHeader {
            magic: CACHE_MAGIC.to_owned(),
            version: CACHE_VERSION.to_owned(),
            kernel_name: problem.builder().kernel_name().to_owned(),
            kernel_source: problem.builder().source().file_name().to_owned(),
            device: problem.device().device_name.clone(),
            cuda_driver: problem.device().driver_version,
            hostname: hostname(),
            date: now(),
            parameters,
        }
    }

    fn check_header(
        &self,
        header: &CacheHeader,
        problem: &TuningProblem<'_>,
    ) -> Result<(), CacheError> {
        let path = self.path.display().to_string();

        if header.magic != CACHE_MAGIC {
            return Err(CacheError::Header { path });
        }
        if header.version != CACHE_VERSION {
            return Err(CacheError::Version {
                path,
                found: header.version.clone(),
                expected: CACHE_VERSION,
            });
        }

        let expected_kernel = problem.builder().kernel_name();
        if header.kernel_name != expected_kernel {
            return Err(CacheError::KernelMismatch {
                path,
                found: header.kernel_name.clone(),
                expected: expected_kernel.to_owned(),
            });
        }

        let expected_device = &problem.device().device_name;
        if &header.device != expected_device {
            return Err(CacheError::DeviceMismatch {
                path,
                found: header.device.clone(),
                expected: expected_device.clone(),
            });
        }

        let names_match = header.parameters.len() == self.parameters.len()
            && header
                .parameters
                .iter()
                .zip(&self.parameters)
                .all(|(recorded, current)| recorded.name == current.name());
        if !names_match {
            return Err(CacheError::ParameterMismatch { path });
        }

        Ok(())
    }

    fn append_line(&self, record: &CacheRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")
    }
}

fn now() -> String {
    chrono::Local::now().to_rfc3339()
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridtune_compile::KernelSource;
    use gridtune_launch::{DeviceIdentity, KernelBuilder};

    fn identity() -> DeviceIdentity {
        DeviceIdentity {
            device_name: "Test Device".to_owned(),
            compute_capability: (8, 6),
            driver_version: 12000,
        }
    }

    fn builder(kernel_name: &str) -> KernelBuilder {
        let mut builder = KernelBuilder::new(
            KernelSource::inline("k.cu", "__global__ void k();"),
            kernel_name,
        );
        builder.tune("tile", vec![1, 2, 4]).unwrap();
        builder.tune("block", vec![32, 64]).unwrap();
        builder
    }

    #[test]
    fn append_then_find_then_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.json");

        let b = builder("foo");
        let problem = TuningProblem::new(&b, identity());

        let (mut cache, best) = TuningCache::open(&path, &problem).unwrap();
        assert!(best.is_none());
        assert!(cache.is_empty());

        let slow = b.space().load_config(&serde_json::json!({"tile": 1, "block": 32})).unwrap();
        let fast = b.space().load_config(&serde_json::json!({"tile": 4, "block": 64})).unwrap();

        cache.append(&slow, 10.0);
        cache.append(&fast, 80.0);
        assert_eq!(cache.find(&slow), Some(10.0));
        assert_eq!(cache.find(&fast), Some(80.0));

        let (reopened, best) = TuningCache::open(&path, &problem).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(best, Some(fast));
    }

    #[test]
    fn kernel_mismatch_names_both_kernels() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let foo = builder("foo");
        let problem = TuningProblem::new(&foo, identity());
        TuningCache::open(&path, &problem).unwrap();

        let bar = builder("bar");
        let problem = TuningProblem::new(&bar, identity());
        let err = TuningCache::open(&path, &problem).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("foo"), "{message}");
        assert!(message.contains("bar"), "{message}");
    }

    #[test]
    fn device_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let b = builder("foo");
        let problem = TuningProblem::new(&b, identity());
        TuningCache::open(&path, &problem).unwrap();

        let other = DeviceIdentity {
            device_name: "Other Device".to_owned(),
            ..identity()
        };
        let problem = TuningProblem::new(&b, other);
        assert!(matches!(
            TuningCache::open(&path, &problem),
            Err(CacheError::DeviceMismatch { .. })
        ));
    }

    #[test]
    fn parameter_set_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let b = builder("foo");
        let problem = TuningProblem::new(&b, identity());
        TuningCache::open(&path, &problem).unwrap();

        let mut different = KernelBuilder::new(
            KernelSource::inline("k.cu", "__global__ void k();"),
            "foo",
        );
        different.tune("tile", vec![1, 2, 4]).unwrap();
        different.tune("warps", vec![1, 2]).unwrap();
        let problem = TuningProblem::new(&different, identity());
        assert!(matches!(
            TuningCache::open(&path, &problem),
            Err(CacheError::ParameterMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_headers_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{\"magic\": \"something_else\"}\n").unwrap();

        let b = builder("foo");
        let problem = TuningProblem::new(&b, identity());
        assert!(matches!(
            TuningCache::open(&path, &problem),
            Err(CacheError::Header { .. })
        ));
    }

    #[test]
    fn truncated_final_lines_are_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let b = builder("foo");
        let problem = TuningProblem::new(&b, identity());
        let (mut cache, _) = TuningCache::open(&path, &problem).unwrap();
        let config = b.space().default_config().unwrap();
        cache.append(&config, 42.0);

        // simulate a write cut off mid-record
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        write!(file, "{{\"key\": \"1|3").unwrap();
        drop(file);

        let (reopened, best) = TuningCache::open(&path, &problem).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(best, Some(config));
    }

    #[test]
    fn empty_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");

        let b = builder("foo");
        let problem = TuningProblem::new(&b, identity());
        let (mut cache, _) = TuningCache::open(&path, &problem).unwrap();
        let config = b.space().default_config().unwrap();
        cache.append(&config, 42.0);

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file).unwrap();
        writeln!(file).unwrap();
        drop(file);

        let (reopened, _) = TuningCache::open(&path, &problem).unwrap();
        assert_eq!(reopened.len(), 1);
    }
}
