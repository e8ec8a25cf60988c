//! End-to-end processing: build, render, sign, validate.
//!
//! Each stage consumes the previous stage's output and the pipeline stops
//! at the first failure, so a caller never receives a signed document that
//! failed schema validation or a validated document whose signature step
//! was skipped.
use crate::config::Config;
use crate::invoice::BuildError;
use crate::invoice::sign::{SigningError, XmlSigner};
use crate::invoice::validation::{SchemaIndex, ValidationReport, XmlValidationError};
use crate::invoice::xml::XmlWriteError;
use crate::invoice::{AccessKey, FacturaBuilder, FinalizedFactura};
use thiserror::Error;

/// The pipeline stage a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Build,
    Render,
    Sign,
    Validate,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("build stage failed: {0}")]
    Build(#[from] BuildError),
    #[error("render stage failed: {0}")]
    Render(#[from] XmlWriteError),
    #[error("signing stage failed: {0}")]
    Sign(#[from] SigningError),
    #[error("validation stage failed: {0}")]
    Validation(#[from] XmlValidationError),
    #[error("document rejected by schema {}: {error_count} error(s)", report.schema().display())]
    Rejected {
        report: ValidationReport,
        error_count: usize,
    },
}

impl PipelineError {
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::Build(_) => Stage::Build,
            PipelineError::Render(_) => Stage::Render,
            PipelineError::Sign(_) => Stage::Sign,
            PipelineError::Validation(_) | PipelineError::Rejected { .. } => Stage::Validate,
        }
    }

    /// The full report behind a [`PipelineError::Rejected`].
    pub fn validation_report(&self) -> Option<&ValidationReport> {
        match self {
            PipelineError::Rejected { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Everything a successful run produces. The signed XML is the document to
/// submit; the report names the schema it was accepted under.
#[derive(Debug)]
pub struct ProcessingOutcome {
    factura: FinalizedFactura,
    signed_xml: String,
    report: ValidationReport,
}

impl ProcessingOutcome {
    pub fn factura(&self) -> &FinalizedFactura {
        &self.factura
    }

    pub fn access_key(&self) -> &AccessKey {
        self.factura.access_key()
    }

    pub fn signed_xml(&self) -> &str {
        &self.signed_xml
    }

    pub fn validation(&self) -> &ValidationReport {
        &self.report
    }
}

/// Drives an invoice from builder to validated, signed XML.
///
/// Schema discovery happens once at construction; a pipeline with no
/// usable schemas fails fast instead of at the end of the first run.
#[derive(Debug)]
pub struct Pipeline {
    signer: XmlSigner,
    schemas: SchemaIndex,
}

impl Pipeline {
    /// # Errors
    /// Returns [`PipelineError::Validation`] when no schemas are found
    /// under the configured search paths.
    pub fn new(config: &Config, signer: XmlSigner) -> Result<Self, PipelineError> {
        let schemas = SchemaIndex::from_config(config)?;
        Ok(Self { signer, schemas })
    }

    /// Runs all four stages, stopping at the first failure.
    ///
    /// # Errors
    /// Returns the first stage's error; [`PipelineError::stage`] names
    /// where processing stopped.
    pub fn process(&self, builder: FacturaBuilder) -> Result<ProcessingOutcome, PipelineError> {
        let factura = builder.build()?;
        tracing::info!(access_key = %factura.access_key(), "built invoice");

        let xml = factura.to_xml()?;
        tracing::debug!(bytes = xml.len(), "rendered invoice XML");

        let signed_xml = self.signer.sign_xml(&xml)?;
        tracing::debug!(bytes = signed_xml.len(), "signed invoice XML");

        let report = self.schemas.validate_str(&signed_xml)?;
        if !report.is_valid() {
            let error_count = report.error_count();
            tracing::warn!(
                schema = %report.schema().display(),
                errors = error_count,
                "signed document failed schema validation"
            );
            return Err(PipelineError::Rejected {
                report,
                error_count,
            });
        }
        tracing::info!(
            access_key = %factura.access_key(),
            schema = %report.schema().display(),
            "invoice processed"
        );

        Ok(ProcessingOutcome {
            factura,
            signed_xml,
            report,
        })
    }
}
