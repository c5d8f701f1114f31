//! JSON job-description loader
//!
//! Walks a `serde_json::Value` instead of deriving `Deserialize` so that a
//! broken description reports every bad field of every item, not only the
//! first one serde trips over.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::{DataAccess, DataItem, DataSource, JobSpec, ProgramItem};
use crate::constants::{ANONYMOUS_NAME, DEFAULT_ITERATIONS, DISPATCH_WARNING_THRESHOLD};
use crate::error::{ConfigIssue, PipelineError, Result};

/// Load and validate a job description file
///
/// Relative paths inside the description are resolved against the current
/// working directory.
pub fn load_job<P: AsRef<Path>>(path: P) -> Result<JobSpec> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| PipelineError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    tracing::info!("Loading job description {}", path.display());
    JobLoader::new().load_str(&text)
}

/// Successful load with the warnings it produced
#[derive(Debug, Clone)]
pub struct Loaded {
    pub job: JobSpec,
    pub warnings: Vec<String>,
}

/// Job-description validator
#[derive(Debug, Clone, Default)]
pub struct JobLoader {
    base_dir: Option<PathBuf>,
}

/// Accumulates issues and warnings during one load
#[derive(Default)]
struct Report {
    issues: Vec<ConfigIssue>,
    warnings: Vec<String>,
}

impl Report {
    fn warn(&mut self, message: String) {
        tracing::warn!("{}", message);
        self.warnings.push(message);
    }

    fn config(&mut self, item: &str, field: &str, message: impl Into<String>) {
        self.issues.push(ConfigIssue::config(item, field, message));
    }

    fn resource(&mut self, item: &str, field: &str, message: impl Into<String>) {
        self.issues.push(ConfigIssue::resource(item, field, message));
    }
}

impl JobLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `dir` (existence checks included)
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Parse and validate, discarding warnings (they are still logged)
    pub fn load_str(&self, text: &str) -> Result<JobSpec> {
        self.parse(text).map(|loaded| loaded.job)
    }

    /// Parse and validate, returning warnings alongside the job
    pub fn parse(&self, text: &str) -> Result<Loaded> {
        let root: Value = serde_json::from_str(text)?;
        let mut report = Report::default();

        let Some(root) = root.as_object() else {
            return Err(PipelineError::Config(vec![ConfigIssue::config(
                "job",
                "",
                "top level must be an object",
            )]));
        };

        let param = root.get("param");
        if !matches!(param, Some(Value::Object(_))) {
            report.config("param", "", "mandatory object is not present");
        }
        let data = root.get("data").and_then(Value::as_array);
        if data.is_none() {
            report.config("data", "", "mandatory array is not present");
        }
        let program = root.get("program").and_then(Value::as_array);
        if program.is_none() {
            report.config("program", "", "mandatory array is not present");
        }

        let iterations = param
            .and_then(Value::as_object)
            .map(|p| self.parse_param(p, &mut report))
            .unwrap_or(DEFAULT_ITERATIONS);

        let data_items = data.map(|d| self.parse_data(d, &mut report)).unwrap_or_default();
        let program_items = program.map(|p| self.parse_programs(p, &mut report)).unwrap_or_default();

        if !report.issues.is_empty() {
            for issue in &report.issues {
                tracing::error!("{}", issue);
            }
            return Err(PipelineError::Config(report.issues));
        }

        tracing::info!(
            "Job loaded: {} iteration(s), {} data item(s), {} program(s)",
            iterations,
            data_items.len(),
            program_items.len()
        );

        Ok(Loaded {
            job: JobSpec {
                iterations,
                data: data_items,
                programs: program_items,
            },
            warnings: report.warnings,
        })
    }

    fn resolve(&self, path: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) if Path::new(path).is_relative() => base.join(path),
            _ => PathBuf::from(path),
        }
    }

    fn parse_param(&self, param: &Map<String, Value>, report: &mut Report) -> usize {
        match param.get("iterations") {
            None => {
                report.warn(format!(
                    "param.iterations is not provided, default ({})",
                    DEFAULT_ITERATIONS
                ));
                DEFAULT_ITERATIONS
            }
            Some(value) => match value.as_u64() {
                Some(n) => n as usize,
                None => {
                    report.config("param", "iterations", "expected a non-negative integer");
                    DEFAULT_ITERATIONS
                }
            },
        }
    }

    fn parse_data(&self, items: &[Value], report: &mut Report) -> Vec<DataItem> {
        if items.is_empty() {
            report.warn("data[] is empty, the job won't output any results".to_string());
        }

        items
            .iter()
            .enumerate()
            .filter_map(|(i, value)| self.parse_data_item(i, value, report))
            .collect()
    }

    fn parse_data_item(&self, index: usize, value: &Value, report: &mut Report) -> Option<DataItem> {
        let locator = format!("data[{}]", index);
        let Some(item) = value.as_object() else {
            report.config(&locator, "", "expected an object");
            return None;
        };
        let issues_before = report.issues.len();

        let size = match item.get("size") {
            None => {
                report.config(&locator, "size", "mandatory field is not provided");
                None
            }
            Some(v) => match v.as_u64() {
                Some(0) => {
                    report.config(&locator, "size", "must be greater than zero");
                    None
                }
                Some(n) => Some(n),
                None => {
                    report.config(&locator, "size", "expected a positive integer byte count");
                    None
                }
            },
        };

        let source = match item.get("source") {
            None => {
                report.config(&locator, "source", "mandatory field is not provided");
                None
            }
            Some(v) => match v.as_str() {
                Some("file") => Some(DataSource::File),
                Some("directory") => Some(DataSource::Directory),
                Some("memory") => Some(DataSource::Memory),
                _ => {
                    report.config(&locator, "source", format!("{} doesn't match any known value", v));
                    None
                }
            },
        };

        match item.get("type") {
            None => report.config(&locator, "type", "mandatory field is not provided"),
            Some(v) if v.as_str() == Some("buffer") => {}
            Some(v) => report.config(&locator, "type", format!("{} doesn't match any known value", v)),
        }

        let name = match item.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                report.warn(format!("{}.name is not provided, default (\"{}\")", locator, ANONYMOUS_NAME));
                ANONYMOUS_NAME.to_string()
            }
        };

        let mut access = None;
        let mut path = None;

        if source == Some(DataSource::Memory) {
            if item.contains_key("access") {
                report.warn(format!("{}.access will be ignored since source = \"memory\"", locator));
            }
            if item.contains_key("path") {
                report.warn(format!("{}.path will be ignored since source = \"memory\"", locator));
            }
        } else {
            access = match item.get("access") {
                None => {
                    report.config(&locator, "access", "mandatory field is not provided");
                    None
                }
                Some(v) => match v.as_str() {
                    Some("read") => Some(DataAccess::Read),
                    Some("write") => Some(DataAccess::Write),
                    _ => {
                        report.config(&locator, "access", format!("{} doesn't match any known value", v));
                        None
                    }
                },
            };

            path = match item.get("path") {
                None => {
                    report.config(&locator, "path", "mandatory field is not provided");
                    None
                }
                Some(v) => match v.as_str() {
                    Some(p) => Some(self.resolve(p)),
                    None => {
                        report.config(&locator, "path", "expected a string");
                        None
                    }
                },
            };

            // Write destinations of single files need not exist yet
            let checked = !(source == Some(DataSource::File) && access == Some(DataAccess::Write));
            if let (Some(p), Some(src), true) = (&path, source, checked) {
                let exists = match src {
                    DataSource::Directory => p.is_dir(),
                    _ => p.is_file(),
                };
                if !exists {
                    report.resource(&locator, "path", format!("{} can't be found on disk", p.display()));
                }
            }
        }

        if report.issues.len() != issues_before {
            return None;
        }

        Some(DataItem {
            name,
            path,
            size: size?,
            source: source?,
            access,
        })
    }

    fn parse_programs(&self, items: &[Value], report: &mut Report) -> Vec<ProgramItem> {
        if items.is_empty() {
            report.warn("program[] is empty, the job won't process any data".to_string());
        }

        items
            .iter()
            .enumerate()
            .filter_map(|(i, value)| self.parse_program_item(i, value, report))
            .collect()
    }

    fn parse_program_item(&self, index: usize, value: &Value, report: &mut Report) -> Option<ProgramItem> {
        let locator = format!("program[{}]", index);
        let Some(item) = value.as_object() else {
            report.config(&locator, "", "expected an object");
            return None;
        };
        let issues_before = report.issues.len();

        let dispatch = match item.get("dispatch") {
            None => {
                report.config(&locator, "dispatch", "mandatory field is not provided");
                None
            }
            Some(v) => {
                let extents: Option<Vec<u32>> = v.as_array().filter(|a| a.len() == 3).and_then(|a| {
                    a.iter()
                        .map(|d| d.as_u64().filter(|&n| n > 0 && n <= u32::MAX as u64).map(|n| n as u32))
                        .collect()
                });
                match extents {
                    Some(e) => Some([e[0], e[1], e[2]]),
                    None => {
                        report.config(&locator, "dispatch", "expecting 3 positive integers");
                        None
                    }
                }
            }
        };

        let path = match item.get("path").map(|v| v.as_str()) {
            None => {
                report.config(&locator, "path", "mandatory field is not provided");
                None
            }
            Some(None) => {
                report.config(&locator, "path", "expected a string");
                None
            }
            Some(Some(p)) => {
                let resolved = self.resolve(p);
                if !resolved.is_file() {
                    report.resource(&locator, "path", format!("{} can't be found on disk", resolved.display()));
                }
                Some(resolved)
            }
        };

        let name = match item.get("name").and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => {
                report.warn(format!("{}.name is not provided, default (\"{}\")", locator, ANONYMOUS_NAME));
                ANONYMOUS_NAME.to_string()
            }
        };

        if report.issues.len() != issues_before {
            return None;
        }

        let program = ProgramItem {
            name,
            path: path?,
            dispatch: dispatch?,
        };

        let total = program.total_groups();
        if total >= DISPATCH_WARNING_THRESHOLD {
            report.warn(format!(
                "{} dispatches {} thread groups, the driver might trigger a timeout",
                locator, total
            ));
        }

        Some(program)
    }
}
