//! XSD validation with schema discovery and defect heuristics.
//!
//! The schema directory layout is not fixed: deployments unpack the
//! authority's schema bundles wherever they like. Discovery walks the
//! configured search paths for `.xsd` files and scores each candidate
//! against the document's root element and declared version, then tries
//! candidates best first. When nothing validates, the report comes from
//! the candidate that got furthest, plus hints for the defect classes we
//! see most in the field.
use crate::config::Config;
use libxml::{
    error::{StructuredError, XmlErrorLevel},
    parser::Parser,
    schemas::{SchemaParserContext, SchemaValidationContext},
    tree::Document,
    xpath,
};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

const C14N_URI: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

#[derive(Debug, Error)]
pub enum XmlValidationError {
    #[error("no schema files found under {searched:?}")]
    SchemaNotFound { searched: Vec<PathBuf> },
    #[error("malformed XML: {0}")]
    MalformedXml(String),
    #[error("file not found: {0}")]
    FileNotFound(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

/// One schema violation, with source position when libxml provides it.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    severity: Severity,
    message: String,
    line: Option<i32>,
    column: Option<i32>,
}

impl ValidationIssue {
    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn line(&self) -> Option<i32> {
        self.line
    }

    pub fn column(&self) -> Option<i32> {
        self.column
    }

    fn from_structured(error: &StructuredError) -> Self {
        ValidationIssue {
            severity: match error.level {
                XmlErrorLevel::Warning => Severity::Warning,
                _ => Severity::Error,
            },
            message: error
                .message
                .as_deref()
                .unwrap_or("unspecified schema violation")
                .trim()
                .to_string(),
            line: error.line,
            column: error.col,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(line), Some(col)) => write!(f, "{line}:{col}: {}", self.message),
            (Some(line), None) => write!(f, "{line}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Outcome of validating one document against the best-matching schema.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    schema: PathBuf,
    issues: Vec<ValidationIssue>,
    hints: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.iter().all(|i| i.severity == Severity::Warning)
    }

    /// The schema the verdict is based on. For a failed validation this is
    /// the candidate that produced the fewest errors.
    pub fn schema(&self) -> &Path {
        &self.schema
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }

    /// Number of error-severity issues; warnings do not count.
    pub fn error_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == Severity::Error)
            .count()
    }

    /// Human-oriented guesses at the root cause, derived from the document
    /// itself rather than from libxml output.
    pub fn hints(&self) -> &[String] {
        &self.hints
    }
}

/// Discovered schema candidates, ready to validate documents against.
#[derive(Debug)]
pub struct SchemaIndex {
    schemas: Vec<PathBuf>,
    searched: Vec<PathBuf>,
}

impl SchemaIndex {
    /// Walks the search paths and collects every `.xsd` file, sorted so
    /// repeated runs see candidates in the same order.
    ///
    /// # Errors
    /// Returns [`XmlValidationError::SchemaNotFound`] when the walk yields
    /// nothing; unreadable directories are skipped, not fatal.
    pub fn discover<P: Into<PathBuf>>(
        search_paths: impl IntoIterator<Item = P>,
    ) -> Result<Self, XmlValidationError> {
        let searched: Vec<PathBuf> = search_paths.into_iter().map(Into::into).collect();
        let mut schemas = Vec::new();
        for base in &searched {
            for entry in WalkDir::new(base).into_iter().filter_map(|e| e.ok()) {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("xsd")) {
                    schemas.push(path.to_path_buf());
                }
            }
        }
        schemas.sort();
        schemas.dedup();
        if schemas.is_empty() {
            return Err(XmlValidationError::SchemaNotFound { searched });
        }
        tracing::debug!(count = schemas.len(), "discovered schema candidates");
        Ok(Self { schemas, searched })
    }

    pub fn from_config(config: &Config) -> Result<Self, XmlValidationError> {
        Self::discover(config.schema_search_paths().iter().cloned())
    }

    pub fn schemas(&self) -> &[PathBuf] {
        &self.schemas
    }

    /// Validates an XML string against the best-matching schema.
    ///
    /// # Errors
    /// Returns [`XmlValidationError::MalformedXml`] when the document does
    /// not even parse; schema violations are reported, not errored.
    pub fn validate_str(&self, xml: &str) -> Result<ValidationReport, XmlValidationError> {
        let doc = Parser::default()
            .parse_string(xml)
            .map_err(|e| XmlValidationError::MalformedXml(format!("{e:?}")))?;
        self.validate_document(&doc)
    }

    pub fn validate_file(&self, path: &Path) -> Result<ValidationReport, XmlValidationError> {
        // check existence first, libxml errors unhelpfully otherwise
        if !path.exists() {
            return Err(XmlValidationError::FileNotFound(path.to_path_buf()));
        }
        let xml = std::fs::read_to_string(path)
            .map_err(|e| XmlValidationError::MalformedXml(e.to_string()))?;
        self.validate_str(&xml)
    }

    fn validate_document(&self, doc: &Document) -> Result<ValidationReport, XmlValidationError> {
        let root_name = doc
            .get_root_element()
            .map(|n| n.get_name())
            .unwrap_or_default();
        let declared_version = doc
            .get_root_element()
            .and_then(|n| n.get_attribute("version"));

        let mut candidates: Vec<(u32, &PathBuf)> = self
            .schemas
            .iter()
            .map(|path| {
                (
                    score_candidate(&root_name, declared_version.as_deref(), path),
                    path,
                )
            })
            .collect();
        candidates.sort_by(|a, b| b.0.cmp(&a.0));

        let mut best: Option<(usize, ValidationReport)> = None;
        for (score, path) in candidates {
            let issues = match validate_against(doc, path) {
                Ok(issues) => issues,
                Err(reason) => {
                    tracing::warn!(schema = %path.display(), reason, "skipping unloadable schema");
                    continue;
                }
            };
            let error_count = issues
                .iter()
                .filter(|i| i.severity() == Severity::Error)
                .count();
            tracing::debug!(
                schema = %path.display(),
                score,
                errors = error_count,
                "validated against candidate"
            );
            if error_count == 0 {
                return Ok(ValidationReport {
                    schema: path.clone(),
                    issues,
                    hints: Vec::new(),
                });
            }
            if best.as_ref().map_or(true, |(count, _)| error_count < *count) {
                best = Some((
                    error_count,
                    ValidationReport {
                        schema: path.clone(),
                        issues,
                        hints: Vec::new(),
                    },
                ));
            }
        }

        let (_, mut report) = best.ok_or_else(|| XmlValidationError::SchemaNotFound {
            searched: self.searched.clone(),
        })?;
        report.hints = diagnose(doc, &root_name, declared_version.as_deref(), &self.schemas);
        Ok(report)
    }
}

/// Ranks how likely a schema file is to govern the document: the filename
/// stem matching the root element name weighs most, an exact version match
/// breaks ties between revisions of the same document type.
fn score_candidate(root_name: &str, declared_version: Option<&str>, schema_path: &Path) -> u32 {
    let stem = schema_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let mut score = 0;
    if !root_name.is_empty() {
        let stem_lower = stem.to_ascii_lowercase();
        let root_lower = root_name.to_ascii_lowercase();
        if stem_lower == root_lower {
            score += 5;
        } else if stem_lower.starts_with(&root_lower) {
            score += 4;
        }
    }
    if let Some(version) = declared_version {
        if stem.contains(version) {
            score += 2;
        }
    }
    score
}

fn validate_against(doc: &Document, schema: &Path) -> Result<Vec<ValidationIssue>, String> {
    let path = schema.to_str().ok_or("non-UTF-8 schema path")?;
    let mut parser_ctx = SchemaParserContext::from_file(path);
    let mut validation_ctx = SchemaValidationContext::from_parser(&mut parser_ctx)
        .map_err(|errors| summarize_structured(&errors))?;
    match validation_ctx.validate_document(doc) {
        Ok(()) => Ok(Vec::new()),
        Err(errors) => Ok(errors.iter().map(ValidationIssue::from_structured).collect()),
    }
}

fn summarize_structured(errors: &[StructuredError]) -> String {
    errors
        .iter()
        .filter_map(|e| e.message.as_deref())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Root-cause guesses for a document no candidate accepted.
fn diagnose(
    doc: &Document,
    root_name: &str,
    declared_version: Option<&str>,
    schemas: &[PathBuf],
) -> Vec<String> {
    let mut hints = Vec::new();

    if let Some(version) = declared_version {
        let known = schemas.iter().any(|p| {
            p.file_stem()
                .and_then(|s| s.to_str())
                .is_some_and(|stem| stem.contains(version))
        });
        if !known {
            hints.push(format!(
                "document declares version {version} but no schema file for that version was found"
            ));
        }
    }

    if !root_name.is_empty() {
        let matched = schemas.iter().any(|p| {
            p.file_stem().and_then(|s| s.to_str()).is_some_and(|stem| {
                stem.to_ascii_lowercase()
                    .starts_with(&root_name.to_ascii_lowercase())
            })
        });
        if !matched {
            hints.push(format!(
                "no schema filename matches the root element <{root_name}>"
            ));
        }
    }

    if let Ok(ctx) = xpath::Context::new(doc) {
        if let Ok(result) =
            ctx.evaluate("//detalle/impuestos/impuesto[not(tarifa) and codigoPorcentaje != '0']")
        {
            let count = result.get_nodes_as_vec().len();
            if count > 0 {
                hints.push(format!(
                    "{count} line-item tax block(s) omit <tarifa> despite a non-zero codigoPorcentaje; \
                     the rate element is mandatory for non-zero rates"
                ));
            }
        }
        if let Ok(result) = ctx.evaluate(
            "//totalConImpuestos/totalImpuesto[not(tarifa) and codigoPorcentaje != '0']",
        ) {
            let count = result.get_nodes_as_vec().len();
            if count > 0 {
                hints.push(format!(
                    "{count} totalImpuesto block(s) omit <tarifa> despite a non-zero codigoPorcentaje; \
                     the rate element is mandatory for non-zero rates"
                ));
            }
        }
        if let Ok(result) = ctx.evaluate("//*[local-name()='CanonicalizationMethod']/@Algorithm") {
            for node in result.get_nodes_as_vec() {
                let algorithm = node.get_content();
                if algorithm != C14N_URI {
                    hints.push(format!(
                        "signature declares canonicalization {algorithm}; the receiving service \
                         only accepts inclusive C14N 1.0 ({C14N_URI})"
                    ));
                }
            }
        }
    }

    hints
}

/// One-shot convenience over [`SchemaIndex`] driven by [`Config`].
///
/// # Errors
/// Propagates discovery and parse failures from [`SchemaIndex`].
pub fn validate_invoice_xml(xml: &str, config: &Config) -> Result<ValidationReport, XmlValidationError> {
    SchemaIndex::from_config(config)?.validate_str(xml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_prefers_root_and_version_match() {
        let exact = score_candidate(
            "factura",
            Some("1.1.0"),
            Path::new("schemas/factura_V1.1.0.xsd"),
        );
        let wrong_version = score_candidate(
            "factura",
            Some("1.1.0"),
            Path::new("schemas/factura_V2.1.0.xsd"),
        );
        let other_doc = score_candidate(
            "factura",
            Some("1.1.0"),
            Path::new("schemas/notaCredito_V1.1.0.xsd"),
        );
        assert!(exact > wrong_version);
        assert!(wrong_version > other_doc);
        assert_eq!(other_doc, 0);
    }

    #[test]
    fn scoring_is_case_insensitive_on_the_stem() {
        assert!(score_candidate("factura", None, Path::new("Factura.xsd")) > 0);
    }

    #[test]
    fn issue_display_includes_position() {
        let issue = ValidationIssue {
            severity: Severity::Error,
            message: "bad element".into(),
            line: Some(12),
            column: Some(4),
        };
        assert_eq!(issue.to_string(), "12:4: bad element");
    }

    #[test]
    fn error_count_ignores_warnings() {
        let report = ValidationReport {
            schema: PathBuf::from("factura_V1.1.0.xsd"),
            issues: vec![
                ValidationIssue {
                    severity: Severity::Warning,
                    message: "deprecated element".into(),
                    line: None,
                    column: None,
                },
                ValidationIssue {
                    severity: Severity::Error,
                    message: "missing element".into(),
                    line: Some(3),
                    column: None,
                },
            ],
            hints: Vec::new(),
        };
        assert_eq!(report.error_count(), 1);
        assert!(!report.is_valid());
    }

    #[test]
    fn discovery_fails_on_empty_directories() {
        let dir = std::env::temp_dir().join("factura-no-schemas");
        std::fs::create_dir_all(&dir).unwrap();
        let err = SchemaIndex::discover([dir]).unwrap_err();
        assert!(matches!(err, XmlValidationError::SchemaNotFound { .. }));
    }
}
