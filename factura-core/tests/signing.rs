mod common;

use common::{pem_signer, read_fixture, read_fixture_bytes, rsa_signer, P12_PASSWORD};
use factura_core::invoice::sign::{verify_signed_xml, AlgorithmSuite, SigningError, XmlSigner};

fn unsigned_invoice() -> String {
    read_fixture("invoices/sample-factura.xml")
}

#[test]
fn pkcs12_signature_verifies() {
    let signed = rsa_signer().sign_xml(&unsigned_invoice()).expect("sign");
    assert!(signed.contains("<ds:Signature"));
    assert!(signed.contains("URI=\"#comprobante\""));
    verify_signed_xml(&signed).expect("verify");
}

#[test]
fn pem_signature_verifies() {
    let signed = pem_signer().sign_xml(&unsigned_invoice()).expect("sign");
    verify_signed_xml(&signed).expect("verify");
}

#[test]
fn signature_lands_after_the_last_business_element() {
    let signed = rsa_signer().sign_xml(&unsigned_invoice()).expect("sign");
    let signature_at = signed.find("<ds:Signature").unwrap();
    assert!(signed.find("<infoAdicional>").unwrap() < signature_at);
    assert!(signature_at < signed.rfind("</factura>").unwrap());
}

#[test]
fn resigning_changes_bytes_but_both_verify() {
    let signer = rsa_signer();
    let first = signer.sign_xml(&unsigned_invoice()).expect("sign");
    let second = signer.sign_xml(&unsigned_invoice()).expect("sign");
    // randomized element ids make the two signatures byte-distinct
    assert_ne!(first, second);
    verify_signed_xml(&first).expect("verify first");
    verify_signed_xml(&second).expect("verify second");
}

#[test]
fn signing_replaces_an_existing_signature() {
    let signer = rsa_signer();
    let once = signer.sign_xml(&unsigned_invoice()).expect("sign");
    let twice = signer.sign_xml(&once).expect("re-sign");
    assert_eq!(twice.matches("<ds:SignatureValue").count(), 1);
    verify_signed_xml(&twice).expect("verify");
}

#[test]
fn tampered_content_fails_digest_check() {
    let signed = rsa_signer().sign_xml(&unsigned_invoice()).expect("sign");
    let tampered = signed.replace(
        "<importeTotal>11.50</importeTotal>",
        "<importeTotal>99.99</importeTotal>",
    );
    assert_ne!(signed, tampered);
    let err = verify_signed_xml(&tampered).unwrap_err();
    match err {
        SigningError::VerificationFailed { reason } => {
            assert!(reason.contains("digest"), "unexpected reason: {reason}")
        }
        other => panic!("expected VerificationFailed, got {other:?}"),
    }
}

#[test]
fn tampered_signature_value_fails_verification() {
    let signed = rsa_signer().sign_xml(&unsigned_invoice()).expect("sign");
    // flip the first character of the base64 signature value
    let marker = "<ds:SignatureValue";
    let start = signed.find(marker).unwrap();
    let value_start = signed[start..].find('>').unwrap() + start + 1;
    let mut tampered = signed.clone();
    let original = tampered.as_bytes()[value_start] as char;
    let flipped = if original == 'A' { 'B' } else { 'A' };
    tampered.replace_range(value_start..value_start + 1, &flipped.to_string());
    assert!(verify_signed_xml(&tampered).is_err());
}

#[test]
fn sha256_suite_signs_and_verifies() {
    let signer = rsa_signer().with_algorithm_suite(AlgorithmSuite::RsaSha256);
    let signed = signer.sign_xml(&unsigned_invoice()).expect("sign");
    assert!(signed.contains("http://www.w3.org/2001/04/xmldsig-more#rsa-sha256"));
    assert!(signed.contains("http://www.w3.org/2001/04/xmlenc#sha256"));
    verify_signed_xml(&signed).expect("verify");
}

#[test]
fn wrong_pkcs12_password_is_rejected() {
    let err = XmlSigner::from_pkcs12(&read_fixture_bytes("certs/signer.p12"), "wrong").unwrap_err();
    assert!(matches!(err, SigningError::CertificateInvalid { .. }));
}

#[test]
fn expired_certificate_is_rejected() {
    let err = XmlSigner::from_pem(
        &read_fixture("certs/expired-cert.pem"),
        &read_fixture("certs/rsa-key.pem"),
    )
    .unwrap_err();
    match err {
        SigningError::CertificateInvalid { reason } => {
            assert!(reason.contains("expired"), "unexpected reason: {reason}")
        }
        other => panic!("expected CertificateInvalid, got {other:?}"),
    }
}

#[test]
fn ec_key_is_unsupported() {
    let err = XmlSigner::from_pkcs12(&read_fixture_bytes("certs/ec.p12"), P12_PASSWORD).unwrap_err();
    assert!(matches!(err, SigningError::UnsupportedKeyType { .. }));

    let err = XmlSigner::from_pem(
        &read_fixture("certs/ec-cert.pem"),
        &read_fixture("certs/ec-key.pem"),
    )
    .unwrap_err();
    assert!(matches!(err, SigningError::UnsupportedKeyType { .. }));
}

#[test]
fn garbage_input_is_a_signing_failure() {
    let err = rsa_signer().sign_xml("not xml at all").unwrap_err();
    assert!(matches!(err, SigningError::SigningFailed(_)));
}
