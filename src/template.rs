//! Macro template preprocessor for specification text.
//!
//! A template is read in two modes. It starts in *directive mode*, where each
//! non-blank line must have the form
//!
//! ```text
//! template <name> <source>
//! ```
//!
//! `<source>` is either a positional marker `$N` (bound to the N-th argument)
//! or a file path, whose contents are themselves preprocessed with the same
//! arguments and bound to `<name>`. The first line whose first non-whitespace
//! character is `{`, `[` or `"` switches to *payload mode* for the rest of the
//! input. Payload lines are copied to the output, line terminators included,
//! with every `%name` or `%{name}` marker of a bound name replaced by its
//! value.
//!
//! Substitution is one left-to-right scan per line. At each `%` the braced
//! form is tried first, then the longest bound name that follows the sigil.
//! Substituted text is never scanned again, so a value containing another
//! marker is emitted verbatim.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::debug;

use crate::errors::{Error, Result};
use crate::pipeline::spec::Specification;

const SIGIL: char = '%';
const ARGUMENT_MARKER: char = '$';

/// Errors raised while expanding a template.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// A directive-mode line that is not `template <name> <source>`.
    #[error("line {line}: unrecognized directive \"{text}\"")]
    UnknownDirective { line: usize, text: String },

    /// A `$` source whose index is not a number.
    #[error("line {line}: invalid argument marker \"{marker}\"")]
    BadArgumentMarker { line: usize, marker: String },

    /// A `$N` source with `N` beyond the supplied arguments.
    #[error("line {line}: argument index {index} is out of range ({available} supplied)")]
    ArgumentIndex {
        line: usize,
        index: usize,
        available: usize,
    },

    /// An included file could not be read.
    #[error("cannot include {}: {source}", .path.display())]
    Include {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file includes itself, directly or through other files.
    #[error("include cycle detected at {}", .path.display())]
    Cycle { path: PathBuf },
}

// ─── Public entry points ────────────────────────────────────────────────────

/// Expand template text with the given positional arguments.
///
/// Relative include paths are resolved against the working directory.
pub fn preprocess(text: &str, args: &[String]) -> std::result::Result<String, TemplateError> {
    Expander::new(args).expand(text)
}

/// Read and expand a template from any reader.
pub fn preprocess_reader<R: Read>(mut reader: R, args: &[String]) -> Result<String> {
    let mut text = String::new();
    reader
        .read_to_string(&mut text)
        .map_err(|e| Error::io("<input>", e))?;
    Ok(preprocess(&text, args)?)
}

/// Read and expand a template file. The file itself counts as the first
/// entry of the include stack, so a file that includes itself is a cycle.
pub fn preprocess_file(path: &Path, args: &[String]) -> std::result::Result<String, TemplateError> {
    let mut expander = Expander::new(args);
    expander.include(path)
}

/// Parse expanded text as a [`Specification`].
pub fn parse_specification(text: &str) -> Result<Specification> {
    Ok(serde_json::from_str(text)?)
}

/// Expand a template from `reader` and parse the result.
pub fn load_specification<R: Read>(reader: R, args: &[String]) -> Result<Specification> {
    let text = preprocess_reader(reader, args)?;
    parse_specification(&text)
}

// ─── Expander ───────────────────────────────────────────────────────────────

struct Expander<'a> {
    args: &'a [String],
    /// Canonical paths of the files currently being expanded.
    stack: Vec<PathBuf>,
}

impl<'a> Expander<'a> {
    fn new(args: &'a [String]) -> Self {
        Self {
            args,
            stack: Vec::new(),
        }
    }

    fn include(&mut self, path: &Path) -> std::result::Result<String, TemplateError> {
        let canonical = fs::canonicalize(path).map_err(|source| TemplateError::Include {
            path: path.to_path_buf(),
            source,
        })?;
        if self.stack.contains(&canonical) {
            return Err(TemplateError::Cycle { path: canonical });
        }
        let text = fs::read_to_string(&canonical).map_err(|source| TemplateError::Include {
            path: path.to_path_buf(),
            source,
        })?;

        self.stack.push(canonical);
        let expanded = self.expand(&text);
        self.stack.pop();
        expanded
    }

    fn expand(&mut self, text: &str) -> std::result::Result<String, TemplateError> {
        let mut bindings: FxHashMap<String, String> = FxHashMap::default();
        let mut lines = text.split_inclusive('\n').enumerate();
        let mut out = String::with_capacity(text.len());

        // Directive mode.
        for (idx, line) in lines.by_ref() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed.starts_with(['{', '[', '"']) {
                let names = BindingNames::new(&bindings);
                names.substitute_into(line, &bindings, &mut out);
                break;
            }
            let (name, value) = self.directive(idx + 1, trimmed)?;
            debug!(name = %name, line = idx + 1, "bound template value");
            bindings.insert(name, value);
        }

        // Payload mode.
        let names = BindingNames::new(&bindings);
        for (_, line) in lines {
            names.substitute_into(line, &bindings, &mut out);
        }
        Ok(out)
    }

    fn directive(&mut self, line: usize, text: &str) -> std::result::Result<(String, String), TemplateError> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let [keyword, name, source] = tokens.as_slice() else {
            return Err(TemplateError::UnknownDirective {
                line,
                text: text.to_string(),
            });
        };
        if *keyword != "template" {
            return Err(TemplateError::UnknownDirective {
                line,
                text: text.to_string(),
            });
        }

        let value = match source.strip_prefix(ARGUMENT_MARKER) {
            Some(digits) => {
                let index: usize = digits.parse().map_err(|_| TemplateError::BadArgumentMarker {
                    line,
                    marker: source.to_string(),
                })?;
                self.args
                    .get(index)
                    .cloned()
                    .ok_or(TemplateError::ArgumentIndex {
                        line,
                        index,
                        available: self.args.len(),
                    })?
            }
            None => {
                let mut included = self.include(Path::new(source))?;
                trim_one_terminator(&mut included);
                included
            }
        };
        Ok((name.to_string(), value))
    }
}

fn trim_one_terminator(text: &mut String) {
    if text.ends_with('\n') {
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
    }
}

// ─── Substitution ───────────────────────────────────────────────────────────

/// Bound names ordered longest first, so the first prefix match is the
/// longest one.
struct BindingNames<'b> {
    by_length: Vec<&'b str>,
}

impl<'b> BindingNames<'b> {
    fn new(bindings: &'b FxHashMap<String, String>) -> Self {
        let mut by_length: Vec<&str> = bindings.keys().map(String::as_str).collect();
        by_length.sort_unstable_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        Self { by_length }
    }

    fn substitute_into(&self, line: &str, bindings: &FxHashMap<String, String>, out: &mut String) {
        if self.by_length.is_empty() {
            out.push_str(line);
            return;
        }

        let mut rest = line;
        while let Some(pos) = rest.find(SIGIL) {
            out.push_str(&rest[..pos]);
            let after = &rest[pos + SIGIL.len_utf8()..];
            match self.match_at(after, bindings) {
                Some((value, consumed)) => {
                    out.push_str(value);
                    rest = &after[consumed..];
                }
                None => {
                    out.push(SIGIL);
                    rest = after;
                }
            }
        }
        out.push_str(rest);
    }

    /// Match a marker body right after the sigil. Returns the bound value and
    /// the number of bytes consumed.
    fn match_at<'v>(
        &self,
        after: &str,
        bindings: &'v FxHashMap<String, String>,
    ) -> Option<(&'v str, usize)> {
        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                if let Some(value) = bindings.get(&braced[..end]) {
                    return Some((value.as_str(), end + 2));
                }
            }
        }
        self.by_length
            .iter()
            .find(|name| after.starts_with(**name))
            .and_then(|name| bindings.get(*name).map(|v| (v.as_str(), name.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    // ─── Directive mode ─────────────────────────────────────────────────

    #[test]
    fn test_plain_payload_unchanged() {
        let text = "{\n  \"measurements\": [\"a\", \"b\"],\n  \"x\": \"100%\"\n}\n";
        assert_eq!(preprocess(text, &[]).unwrap(), text);
    }

    #[test]
    fn test_crlf_terminators_preserved() {
        let text = "template q $0\r\n{\r\n  \"q\": \"%q\"\r\n}";
        let out = preprocess(text, &args(&["x"])).unwrap();
        assert_eq!(out, "{\r\n  \"q\": \"x\"\r\n}");
    }

    #[test]
    fn test_positional_argument_substitution() {
        let text = "template X $0\n\n{\"a\": \"%X\", \"b\": \"%{X}-%X\"}\n";
        let out = preprocess(text, &args(&["foo"])).unwrap();
        assert_eq!(out, "{\"a\": \"foo\", \"b\": \"foo-foo\"}\n");
    }

    #[test]
    fn test_argument_index_out_of_range() {
        let text = "template X $1\n{}\n";
        let err = preprocess(text, &args(&["only"])).unwrap_err();
        assert!(matches!(
            err,
            TemplateError::ArgumentIndex {
                line: 1,
                index: 1,
                available: 1
            }
        ));
    }

    #[test]
    fn test_bad_argument_marker() {
        let err = preprocess("template X $one\n{}\n", &args(&["a"])).unwrap_err();
        assert!(matches!(err, TemplateError::BadArgumentMarker { line: 1, .. }));
    }

    #[test]
    fn test_unknown_directive() {
        let err = preprocess("include foo bar\n{}\n", &[]).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownDirective { line: 1, .. }));

        let err = preprocess("template foo\n{}\n", &[]).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownDirective { line: 1, .. }));
    }

    #[test]
    fn test_directive_lines_after_payload_are_payload() {
        let text = "[\ntemplate X $0\n]\n";
        assert_eq!(preprocess(text, &args(&["a"])).unwrap(), text);
    }

    // ─── Substitution order ─────────────────────────────────────────────

    #[test]
    fn test_longest_name_wins() {
        let text = "template q $0\ntemplate query $1\n\"%query %q\"\n";
        let out = preprocess(text, &args(&["short", "long"])).unwrap();
        assert_eq!(out, "\"long short\"\n");
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let text = "template a $0\ntemplate b $1\n\"%a\"\n";
        let out = preprocess(text, &args(&["%b", "nope"])).unwrap();
        assert_eq!(out, "\"%b\"\n");
    }

    #[test]
    fn test_unbound_markers_left_alone() {
        let text = "template a $0\n\"%z %{z} %\"\n";
        let out = preprocess(text, &args(&["x"])).unwrap();
        assert_eq!(out, "\"%z %{z} %\"\n");
    }

    // ─── Includes ───────────────────────────────────────────────────────

    #[test]
    fn test_include_is_recursively_expanded() {
        let dir = tempfile::tempdir().unwrap();
        let inner = dir.path().join("inner.json");
        std::fs::write(&inner, "template v $0\n\"%v\"\n").unwrap();

        let text = format!("template inc {}\n{{\"k\": %inc}}\n", inner.display());
        let out = preprocess(&text, &args(&["deep"])).unwrap();
        assert_eq!(out, "{\"k\": \"deep\"}\n");
    }

    #[test]
    fn test_missing_include() {
        let err = preprocess("template x /no/such/file.json\n{}\n", &[]).unwrap_err();
        assert!(matches!(err, TemplateError::Include { .. }));
    }

    #[test]
    fn test_self_include_is_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loop.tmpl");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "template me {}", path.display()).unwrap();
        writeln!(file, "{{}}").unwrap();
        drop(file);

        let err = preprocess_file(&path, &[]).unwrap_err();
        assert!(matches!(err, TemplateError::Cycle { .. }));
    }

    #[test]
    fn test_mutual_include_is_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.tmpl");
        let b = dir.path().join("b.tmpl");
        std::fs::write(&a, format!("template b {}\n{{}}\n", b.display())).unwrap();
        std::fs::write(&b, format!("template a {}\n{{}}\n", a.display())).unwrap();

        let err = preprocess_file(&a, &[]).unwrap_err();
        assert!(matches!(err, TemplateError::Cycle { .. }));
    }

    #[test]
    fn test_same_file_included_twice_is_not_a_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let shared = dir.path().join("shared.json");
        std::fs::write(&shared, "\"s\"\n").unwrap();
        let text = format!(
            "template a {p}\ntemplate b {p}\n[%a, %b]\n",
            p = shared.display()
        );
        assert_eq!(preprocess(&text, &[]).unwrap(), "[\"s\", \"s\"]\n");
    }

    // ─── Parsing ────────────────────────────────────────────────────────

    #[test]
    fn test_load_specification() {
        let text = "template m $0\n{\"measurements\": [\"%m\"]}\n";
        let spec = load_specification(text.as_bytes(), &args(&["sum_idf"])).unwrap();
        assert_eq!(spec.measurements, vec!["sum_idf".to_string()]);
    }
}
