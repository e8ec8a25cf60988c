//! Core library for Ecuadorian SRI electronic invoicing.
//!
//! Covers the offline half of the emission flow: deriving the 49-digit
//! access key, rendering the canonical factura XML, applying the enveloped
//! XML-DSig signature, and validating the result against the authority's
//! published XSD schemas. Submission to the SRI web services is left to
//! the caller.
//!
//! # Example
//! ```rust,no_run
//! use factura_core::config::{Config, Environment};
//! use factura_core::invoice::FacturaBuilder;
//! use factura_core::invoice::sign::XmlSigner;
//! use factura_core::pipeline::Pipeline;
//!
//! # fn run(builder: FacturaBuilder, p12: &[u8]) -> Result<(), factura_core::Error> {
//! let config = Config::new(Environment::Test, ["./schemas"]);
//! let signer = XmlSigner::from_pkcs12(p12, "secret")?;
//! let outcome = Pipeline::new(&config, signer)?.process(builder)?;
//! println!("{}", outcome.access_key());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod invoice;
pub mod pipeline;

pub use config::{Config, Environment};
pub use invoice::{AccessKey, FacturaBuilder, FinalizedFactura, InvoiceError};
pub use pipeline::{Pipeline, PipelineError, ProcessingOutcome};

/// Top-level error type aggregating every module's failure modes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Invoice(#[from] invoice::InvoiceError),
    #[error(transparent)]
    AccessKey(#[from] invoice::AccessKeyError),
    #[error(transparent)]
    Build(#[from] invoice::BuildError),
    #[error(transparent)]
    Xml(#[from] invoice::xml::XmlWriteError),
    #[error(transparent)]
    Signing(#[from] invoice::sign::SigningError),
    #[error(transparent)]
    Validation(#[from] invoice::validation::XmlValidationError),
    #[error(transparent)]
    Pipeline(#[from] pipeline::PipelineError),
}
