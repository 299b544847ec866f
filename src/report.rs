//! Report files
//!
//! An output spec reads `format[:timing[:template]]`:
//!
//! - `format` is `json` (step results) or `doc` / `md` (the document with
//!   actual output written back, in its own format)
//! - `timing` is `always` (default), `ok` or `err`
//! - `template` names the file; placeholders are `{filename}`, `{basename}`,
//!   `{ext}`, `{format}`, `{timing}` and `{ts}`
//!
//! ```text
//! -o json
//! -o doc:err:failed/{basename}.{ts}.{ext}
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::{Error, ErrorKind};
use crate::runner::FileResult;

const TS_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Doc,
}

impl Format {
    fn default_template(self) -> &'static str {
        match self {
            Format::Json => "{filename}.json",
            Format::Doc => "{filename}.out",
        }
    }
}

/// When a report is written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timing {
    Always,
    Ok,
    Err,
}

impl Timing {
    fn applies(self, passed: bool) -> bool {
        match self {
            Timing::Always => true,
            Timing::Ok => passed,
            Timing::Err => !passed,
        }
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Timing::Always => "always",
            Timing::Ok => "ok",
            Timing::Err => "err",
        })
    }
}

/// A parsed `-o` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSpec {
    pub format: Format,
    /// The format as written, for `{format}`
    pub format_name: String,
    pub timing: Timing,
    pub template: String,
}

impl FromStr for OutputSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut parts = s.splitn(3, ':');
        let format_name = parts.next().unwrap_or_default().to_string();
        let format = match format_name.as_str() {
            "json" => Format::Json,
            "doc" | "md" => Format::Doc,
            other => return Err(Error::parse(format!("unknown output format: {:?}", other))),
        };
        let timing = match parts.next() {
            None | Some("") | Some("always") => Timing::Always,
            Some("ok") => Timing::Ok,
            Some("err") => Timing::Err,
            Some(other) => return Err(Error::parse(format!("unknown output timing: {:?}", other))),
        };
        let template = match parts.next() {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format.default_template().to_string(),
        };
        Ok(Self {
            format,
            format_name,
            timing,
            template,
        })
    }
}

impl OutputSpec {
    /// Expand the template for `source`.
    pub fn path(&self, source: &Path, ts: &DateTime<Local>) -> PathBuf {
        let filename = source.to_string_lossy();
        let ext = source.extension().and_then(|e| e.to_str()).unwrap_or("");
        let basename = match filename.strip_suffix(ext) {
            Some(stem) if !ext.is_empty() => stem.trim_end_matches('.'),
            _ => &*filename,
        };
        let expanded = self
            .template
            .replace("{filename}", &filename)
            .replace("{basename}", basename)
            .replace("{ext}", ext)
            .replace("{format}", &self.format_name)
            .replace("{timing}", &self.timing.to_string())
            .replace("{ts}", &ts.format(TS_FORMAT).to_string());
        PathBuf::from(expanded)
    }

    /// Write the report for `result` if its timing applies; returns the path
    /// written.
    pub fn write(&self, result: &FileResult, ts: &DateTime<Local>) -> Result<Option<PathBuf>, Error> {
        if !self.timing.applies(result.passed()) {
            return Ok(None);
        }
        let path = self.path(&result.file, ts);
        let content = match self.format {
            Format::Json => serde_json::to_string_pretty(result).map_err(|e| output_error(&path, e))?,
            Format::Doc => match result.document {
                Some(ref doc) => doc.clone(),
                None => fs::read_to_string(&result.file).map_err(|e| output_error(&result.file, e))?,
            },
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| output_error(parent, e))?;
        }
        fs::write(&path, content).map_err(|e| output_error(&path, e))?;
        debug!(path = %path.display(), "report written");
        Ok(Some(path))
    }
}

fn output_error(path: &Path, err: impl fmt::Display) -> Error {
    Error::new(ErrorKind::Output, err.to_string()).with_file(path.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_parse() {
        let spec: OutputSpec = "json".parse().unwrap();
        assert_eq!((spec.format, spec.timing), (Format::Json, Timing::Always));
        assert_eq!(spec.template, "{filename}.json");

        let spec: OutputSpec = "md:err:out/{basename}.{ts}.{ext}".parse().unwrap();
        assert_eq!((spec.format, spec.timing), (Format::Doc, Timing::Err));
        assert_eq!(spec.format_name, "md");
        assert_eq!(spec.template, "out/{basename}.{ts}.{ext}");

        // the template may contain colons
        let spec: OutputSpec = "doc:ok:a:b".parse().unwrap();
        assert_eq!(spec.template, "a:b");

        assert!("html".parse::<OutputSpec>().is_err());
        assert!("json:sometimes".parse::<OutputSpec>().is_err());
    }

    #[test]
    fn test_path_placeholders() {
        let spec: OutputSpec = "doc:always:{basename}-{timing}-{format}.{ts}.{ext}".parse().unwrap();
        assert_eq!(
            spec.path(Path::new("docs/intro.md"), &ts()),
            PathBuf::from("docs/intro-always-doc.20240309_140507.md")
        );
        let spec: OutputSpec = "json".parse().unwrap();
        assert_eq!(spec.path(Path::new("a.t"), &ts()), PathBuf::from("a.t.json"));
    }

    #[test]
    fn test_timing() {
        assert!(Timing::Always.applies(true) && Timing::Always.applies(false));
        assert!(Timing::Ok.applies(true) && !Timing::Ok.applies(false));
        assert!(Timing::Err.applies(false) && !Timing::Err.applies(true));
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("doc.md");
        fs::write(&source, "# Doc\n").unwrap();
        let result = crate::runner::run(&source).run().unwrap();
        let file = &result.files[0];

        let spec: OutputSpec = "doc:ok:{basename}.d/nested/out.{ext}".parse().unwrap();
        let written = spec.write(file, &ts()).unwrap().unwrap();
        assert_eq!(written, dir.path().join("doc.d/nested/out.md"));
        assert_eq!(fs::read_to_string(&written).unwrap(), "# Doc\n");

        let spec: OutputSpec = format!("json:always:{}/r.json", dir.path().display()).parse().unwrap();
        let written = spec.write(file, &ts()).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(written).unwrap()).unwrap();
        assert_eq!(value["blocks"].as_array().map(Vec::len), Some(0));

        let skipped: OutputSpec = "json:err".parse().unwrap();
        assert_eq!(skipped.write(file, &ts()).unwrap(), None);
    }
}
