#![allow(dead_code)]
use chrono::NaiveDate;
use factura_core::config::{Config, EmissionType, Environment};
use factura_core::invoice::sign::XmlSigner;
use factura_core::invoice::{
    DocumentType, EmissionPoint, EstablishmentCode, InvoiceHeader, InvoiceHeaderFields, LineItem,
    LineItemFields, Ruc, Sequential, TaxRateCode,
};
use rust_decimal_macros::dec;
use std::path::PathBuf;

pub const P12_PASSWORD: &str = "sri-test";

pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(relative)
}

pub fn read_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture_path(relative)).expect("read fixture")
}

pub fn read_fixture_bytes(relative: &str) -> Vec<u8> {
    std::fs::read(fixture_path(relative)).expect("read fixture")
}

pub fn schemas_dir() -> PathBuf {
    fixture_path("schemas")
}

pub fn test_config() -> Config {
    Config::new(Environment::Test, [schemas_dir()])
}

pub fn rsa_signer() -> XmlSigner {
    XmlSigner::from_pkcs12(&read_fixture_bytes("certs/signer.p12"), P12_PASSWORD)
        .expect("load PKCS#12 signer")
}

pub fn pem_signer() -> XmlSigner {
    XmlSigner::from_pem(
        &read_fixture("certs/rsa-cert.pem"),
        &read_fixture("certs/rsa-key.pem"),
    )
    .expect("load PEM signer")
}

pub fn sample_header() -> InvoiceHeader {
    InvoiceHeader::new(InvoiceHeaderFields {
        ruc: Ruc::parse("1310675341001").unwrap(),
        legal_name: "Lavandería del Valle".into(),
        trade_name: Some("LAVAEXPRESS".into()),
        main_address: "Av. Amazonas N24-03".into(),
        establishment: EstablishmentCode::parse("002").unwrap(),
        emission_point: EmissionPoint::parse("101").unwrap(),
        environment: Environment::Test,
        emission_type: EmissionType::Normal,
        document_type: DocumentType::Invoice,
        sequential: Sequential::from_number(1).unwrap(),
        issue_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
    })
    .unwrap()
    .with_accounting_required(false)
}

pub fn sample_item() -> LineItem {
    LineItem::new(LineItemFields {
        principal_code: "LAV-01".into(),
        auxiliary_code: None,
        description: "Lavado completo".into(),
        quantity: dec!(1),
        unit_price: dec!(10.00),
        discount: dec!(0),
        rate_code: TaxRateCode::Fifteen,
        subtotal: dec!(10.00),
    })
    .unwrap()
}
