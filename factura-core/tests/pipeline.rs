mod common;

use common::{rsa_signer, sample_header, sample_item, test_config};
use factura_core::invoice::sign::verify_signed_xml;
use factura_core::invoice::{Buyer, FacturaBuilder, IdentificationType, InvoiceError, Ruc};
use factura_core::pipeline::{Pipeline, Stage};

#[test]
fn full_run_produces_a_validated_signed_invoice() {
    let pipeline = Pipeline::new(&test_config(), rsa_signer()).expect("pipeline");
    let builder = FacturaBuilder::new(sample_header())
        .buyer(Buyer::new(IdentificationType::NationalId, "1712345678", "Juan Pérez").unwrap())
        .line_item(sample_item());

    let outcome = pipeline.process(builder).expect("process");

    let key = outcome.access_key().as_str();
    assert_eq!(key.len(), 49);
    assert!(key.bytes().all(|b| b.is_ascii_digit()));

    let signed = outcome.signed_xml();
    assert_eq!(signed.matches("<detalle>").count(), 1);
    assert_eq!(signed.matches("<ds:SignatureValue").count(), 1);
    assert!(signed.contains(&format!("<claveAcceso>{key}</claveAcceso>")));
    verify_signed_xml(signed).expect("verify");

    assert!(outcome.validation().is_valid());
    assert!(outcome
        .validation()
        .schema()
        .to_string_lossy()
        .ends_with("factura_V1.1.0.xsd"));
}

#[test]
fn malformed_ruc_never_reaches_signing() {
    // a 12-digit RUC is refused at parse time, long before any pipeline stage
    let err = Ruc::parse("131067534100").unwrap_err();
    assert!(matches!(err, InvoiceError::MalformedInput { .. }));
}

#[test]
fn empty_invoice_stops_at_the_build_stage() {
    let pipeline = Pipeline::new(&test_config(), rsa_signer()).expect("pipeline");
    let err = pipeline
        .process(FacturaBuilder::new(sample_header()))
        .unwrap_err();
    assert_eq!(err.stage(), Stage::Build);
    assert!(err.validation_report().is_none());
}

#[test]
fn pipeline_fails_fast_without_schemas() {
    let empty = std::env::temp_dir().join("factura-pipeline-no-schemas");
    std::fs::create_dir_all(&empty).unwrap();
    let config = factura_core::config::Config::new(
        factura_core::config::Environment::Test,
        [empty],
    );
    let err = Pipeline::new(&config, rsa_signer()).unwrap_err();
    assert_eq!(err.stage(), Stage::Validate);
}
