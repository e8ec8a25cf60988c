//! Enveloped XML-DSig signing and verification.
//!
//! The signature covers the whole document through a `URI="#comprobante"`
//! reference with the enveloped-signature transform, canonicalized with
//! C14N 1.0 (inclusive, the variant the receiving web service implements;
//! exclusive canonicalization produces digests it rejects). Element ids are
//! randomized per signing, so re-signing the same document yields different
//! bytes while both outputs verify.
use base64ct::{Base64, Encoding};
use libxml::{
    parser::Parser,
    tree::{c14n, Document, Node},
    xpath,
};
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, ObjectIdentifier, PrivateKeyInfo};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use sha2::Sha256;
use std::time::SystemTime;
use thiserror::Error;
use x509_cert::{
    der::{Decode, DecodePem, Encode},
    Certificate,
};

const DS_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
const C14N_URI: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
const ENVELOPED_URI: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const RSA_SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
const RSA_SHA256_URI: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
const SHA1_URI: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
const SHA256_URI: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
const ROOT_REFERENCE: &str = "#comprobante";

const RSA_ENCRYPTION_OID: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.1.1");

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("certificate invalid: {reason}")]
    CertificateInvalid { reason: String },
    #[error("unsupported key type: {algorithm}, only RSA keys can sign")]
    UnsupportedKeyType { algorithm: String },
    #[error("signing failed: {0}")]
    SigningFailed(String),
    #[error("signature verification failed: {reason}")]
    VerificationFailed { reason: String },
}

/// Digest and signature algorithm pairing.
///
/// `RsaSha1` is what the receiving web service currently accepts and is the
/// default; `RsaSha256` exists so the switch is one enum value away when
/// the authority moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlgorithmSuite {
    #[default]
    RsaSha1,
    RsaSha256,
}

impl AlgorithmSuite {
    pub fn signature_uri(&self) -> &'static str {
        match self {
            AlgorithmSuite::RsaSha1 => RSA_SHA1_URI,
            AlgorithmSuite::RsaSha256 => RSA_SHA256_URI,
        }
    }

    pub fn digest_uri(&self) -> &'static str {
        match self {
            AlgorithmSuite::RsaSha1 => SHA1_URI,
            AlgorithmSuite::RsaSha256 => SHA256_URI,
        }
    }

    fn from_signature_uri(uri: &str) -> Option<Self> {
        match uri {
            RSA_SHA1_URI => Some(AlgorithmSuite::RsaSha1),
            RSA_SHA256_URI => Some(AlgorithmSuite::RsaSha256),
            _ => None,
        }
    }

    fn digest_base64(&self, bytes: &[u8]) -> String {
        match self {
            AlgorithmSuite::RsaSha1 => Base64::encode_string(&Sha1::digest(bytes)),
            AlgorithmSuite::RsaSha256 => Base64::encode_string(&Sha256::digest(bytes)),
        }
    }
}

/// Holds the signing credential and produces enveloped signatures.
#[derive(Debug)]
pub struct XmlSigner {
    certificate: Certificate,
    private_key: RsaPrivateKey,
    suite: AlgorithmSuite,
}

impl XmlSigner {
    /// Loads the credential from a PKCS#12 container, the format tax
    /// authorities hand out signing certificates in.
    ///
    /// # Errors
    /// Returns [`SigningError::CertificateInvalid`] for a corrupt
    /// container, a wrong password, or an out-of-validity certificate, and
    /// [`SigningError::UnsupportedKeyType`] when the bundled key is not
    /// RSA.
    pub fn from_pkcs12(der: &[u8], password: &str) -> Result<Self, SigningError> {
        let pfx = p12::PFX::parse(der).map_err(|e| SigningError::CertificateInvalid {
            reason: format!("PKCS#12 parse error: {e:?}"),
        })?;
        if !pfx.verify_mac(password) {
            return Err(SigningError::CertificateInvalid {
                reason: "PKCS#12 MAC verification failed (wrong password?)".into(),
            });
        }
        let key_der = pfx
            .key_bags(password)
            .map_err(|e| SigningError::CertificateInvalid {
                reason: format!("PKCS#12 key bag error: {e:?}"),
            })?
            .into_iter()
            .next()
            .ok_or_else(|| SigningError::CertificateInvalid {
                reason: "PKCS#12 container holds no private key".into(),
            })?;
        let cert_der = pfx
            .cert_x509_bags(password)
            .map_err(|e| SigningError::CertificateInvalid {
                reason: format!("PKCS#12 cert bag error: {e:?}"),
            })?
            .into_iter()
            .next()
            .ok_or_else(|| SigningError::CertificateInvalid {
                reason: "PKCS#12 container holds no certificate".into(),
            })?;

        reject_non_rsa_pkcs8(&key_der)?;
        let private_key =
            RsaPrivateKey::from_pkcs8_der(&key_der).map_err(|e| SigningError::CertificateInvalid {
                reason: format!("private key parse error: {e:?}"),
            })?;
        let certificate =
            Certificate::from_der(&cert_der).map_err(|e| SigningError::CertificateInvalid {
                reason: format!("certificate parse error: {e:?}"),
            })?;
        check_certificate_window(&certificate)?;
        Ok(Self {
            certificate,
            private_key,
            suite: AlgorithmSuite::default(),
        })
    }

    /// Loads the credential from separate PEM documents.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, SigningError> {
        let certificate = Certificate::from_pem(cert_pem.as_bytes()).map_err(|e| {
            SigningError::CertificateInvalid {
                reason: format!("certificate parse error: {e:?}"),
            }
        })?;
        check_certificate_window(&certificate)?;
        let private_key = rsa_key_from_pem(key_pem)?;
        Ok(Self {
            certificate,
            private_key,
            suite: AlgorithmSuite::default(),
        })
    }

    pub fn with_algorithm_suite(mut self, suite: AlgorithmSuite) -> Self {
        self.suite = suite;
        self
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    pub fn algorithm_suite(&self) -> AlgorithmSuite {
        self.suite
    }

    /// Appends a `ds:Signature` as the last child of the document root.
    /// Any signature already present is stripped before digesting, so
    /// signing is idempotent in meaning even though the bytes differ per
    /// call.
    ///
    /// # Errors
    /// Returns [`SigningError::SigningFailed`] for malformed input XML or
    /// canonicalization failures.
    pub fn sign_xml(&self, xml: &str) -> Result<String, SigningError> {
        let mut doc = Parser::default()
            .parse_string(xml)
            .map_err(|e| SigningError::SigningFailed(format!("XML parse error: {e:?}")))?;
        let mut root = doc
            .get_root_element()
            .ok_or_else(|| SigningError::SigningFailed("document has no root element".into()))?;

        // re-signing replaces, never stacks
        remove_signatures(&doc)?;
        let digest_b64 = document_digest(&doc, self.suite)?;

        let signature_id: u32 = rand::random_range(100_000..1_000_000);
        let reference_id: u32 = rand::random_range(100_000..1_000_000);
        let fragment = signature_template(self.suite, signature_id, reference_id, &digest_b64);
        let mut signature_node = import_fragment(&mut doc, &fragment)?;
        root.add_child(&mut signature_node)
            .map_err(|e| SigningError::SigningFailed(e.to_string()))?;

        let canonical_signed_info = canonicalize_signed_info(&doc)?;
        let signature_b64 = self.sign_bytes(canonical_signed_info.as_bytes())?;
        let cert_b64 = certificate_base64(&self.certificate)?;

        let ctx = ds_context(&doc)?;
        set_xpath_text(&ctx, "//ds:Signature/ds:SignatureValue", &signature_b64)?;
        set_xpath_text(
            &ctx,
            "//ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509Certificate",
            &cert_b64,
        )?;
        tracing::debug!(signature_id, reference_id, "applied enveloped signature");

        Ok(doc.to_string())
    }

    fn sign_bytes(&self, bytes: &[u8]) -> Result<String, SigningError> {
        let signature = match self.suite {
            AlgorithmSuite::RsaSha1 => SigningKey::<Sha1>::new(self.private_key.clone())
                .try_sign(bytes)
                .map_err(|e| SigningError::SigningFailed(format!("RSA signing error: {e}")))?
                .to_vec(),
            AlgorithmSuite::RsaSha256 => SigningKey::<Sha256>::new(self.private_key.clone())
                .try_sign(bytes)
                .map_err(|e| SigningError::SigningFailed(format!("RSA signing error: {e}")))?
                .to_vec(),
        };
        Ok(Base64::encode_string(&signature))
    }
}

/// Checks an enveloped signature against the embedded certificate: the
/// reference digest must match the canonicalized document and the
/// signature value must verify over the canonicalized `SignedInfo`.
///
/// # Errors
/// Returns [`SigningError::VerificationFailed`] naming what did not match,
/// or [`SigningError::SigningFailed`] for structurally broken XML.
pub fn verify_signed_xml(xml: &str) -> Result<(), SigningError> {
    let doc = Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::SigningFailed(format!("XML parse error: {e:?}")))?;
    let ctx = ds_context(&doc)?;

    let signature_uri = xpath_text(&ctx, "//ds:Signature/ds:SignedInfo/ds:SignatureMethod/@Algorithm")?;
    let suite = AlgorithmSuite::from_signature_uri(&signature_uri).ok_or_else(|| {
        SigningError::VerificationFailed {
            reason: format!("unknown signature algorithm {signature_uri}"),
        }
    })?;

    let declared_digest = xpath_text(
        &ctx,
        "//ds:Signature/ds:SignedInfo/ds:Reference/ds:DigestValue",
    )?;
    let computed_digest = document_digest(&doc, suite)?;
    if declared_digest != computed_digest {
        return Err(SigningError::VerificationFailed {
            reason: "reference digest does not match document content".into(),
        });
    }

    let canonical_signed_info = canonicalize_signed_info(&doc)?;
    let signature_b64 = xpath_text(&ctx, "//ds:Signature/ds:SignatureValue")?;
    let signature_bytes = decode_base64_text(&signature_b64, "SignatureValue")?;
    let cert_b64 = xpath_text(&ctx, "//ds:Signature/ds:KeyInfo/ds:X509Data/ds:X509Certificate")?;
    let cert_der = decode_base64_text(&cert_b64, "X509Certificate")?;
    let certificate =
        Certificate::from_der(&cert_der).map_err(|e| SigningError::VerificationFailed {
            reason: format!("embedded certificate parse error: {e:?}"),
        })?;
    let public_key = public_key_from_certificate(&certificate)?;

    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|e| {
            SigningError::VerificationFailed {
                reason: format!("malformed signature value: {e}"),
            }
        })?;
    let verified = match suite {
        AlgorithmSuite::RsaSha1 => VerifyingKey::<Sha1>::new(public_key)
            .verify(canonical_signed_info.as_bytes(), &signature)
            .is_ok(),
        AlgorithmSuite::RsaSha256 => VerifyingKey::<Sha256>::new(public_key)
            .verify(canonical_signed_info.as_bytes(), &signature)
            .is_ok(),
    };
    if !verified {
        return Err(SigningError::VerificationFailed {
            reason: "signature value does not verify against the embedded certificate".into(),
        });
    }
    Ok(())
}

/// C14N 1.0 digest of the document with every `ds:Signature` removed,
/// which is exactly what the enveloped-signature transform yields.
fn document_digest(doc: &Document, suite: AlgorithmSuite) -> Result<String, SigningError> {
    let copy = doc
        .dup()
        .map_err(|e| SigningError::SigningFailed(format!("failed to duplicate document: {e:?}")))?;
    remove_signatures(&copy)?;
    let canonical = canonicalize(&copy, None)?;
    Ok(suite.digest_base64(canonical.as_bytes()))
}

fn remove_signatures(doc: &Document) -> Result<(), SigningError> {
    let ctx = ds_context(doc)?;
    let nodes = ctx
        .evaluate("//ds:Signature")
        .map_err(|e| SigningError::SigningFailed(format!("XPath error: {e:?}")))?
        .get_nodes_as_vec();
    for mut node in nodes {
        node.unlink();
    }
    Ok(())
}

fn canonicalize_signed_info(doc: &Document) -> Result<String, SigningError> {
    let ctx = ds_context(doc)?;
    let node = ctx
        .evaluate("//ds:Signature/ds:SignedInfo")
        .map_err(|e| SigningError::SigningFailed(format!("XPath error: {e:?}")))?
        .get_nodes_as_vec()
        .into_iter()
        .next()
        .ok_or_else(|| SigningError::SigningFailed("document carries no SignedInfo".into()))?;
    canonicalize(doc, Some(node))
}

fn canonicalize(doc: &Document, node: Option<Node>) -> Result<String, SigningError> {
    let options = c14n::CanonicalizationOptions {
        mode: c14n::CanonicalizationMode::Canonical1_0,
        inclusive_ns_prefixes: vec![],
        with_comments: false,
    };
    match node {
        Some(mut node) => node.canonicalize(options),
        None => doc.canonicalize(options, None),
    }
    .map_err(|e| SigningError::SigningFailed(format!("canonicalization failed: {e:?}")))
}

fn signature_template(
    suite: AlgorithmSuite,
    signature_id: u32,
    reference_id: u32,
    digest_b64: &str,
) -> String {
    format!(
        concat!(
            "<ds:Signature xmlns:ds=\"{ds}\" Id=\"Signature{sid}\">",
            "<ds:SignedInfo Id=\"Signature-SignedInfo{sid}\">",
            "<ds:CanonicalizationMethod Algorithm=\"{c14n}\"></ds:CanonicalizationMethod>",
            "<ds:SignatureMethod Algorithm=\"{sig}\"></ds:SignatureMethod>",
            "<ds:Reference Id=\"Reference-ID-{rid}\" URI=\"{uri}\">",
            "<ds:Transforms>",
            "<ds:Transform Algorithm=\"{enveloped}\"></ds:Transform>",
            "</ds:Transforms>",
            "<ds:DigestMethod Algorithm=\"{digest_alg}\"></ds:DigestMethod>",
            "<ds:DigestValue>{digest}</ds:DigestValue>",
            "</ds:Reference>",
            "</ds:SignedInfo>",
            "<ds:SignatureValue Id=\"SignatureValue{sid}\"></ds:SignatureValue>",
            "<ds:KeyInfo Id=\"Certificate{sid}\">",
            "<ds:X509Data><ds:X509Certificate></ds:X509Certificate></ds:X509Data>",
            "</ds:KeyInfo>",
            "</ds:Signature>",
        ),
        ds = DS_NS,
        sid = signature_id,
        rid = reference_id,
        c14n = C14N_URI,
        sig = suite.signature_uri(),
        uri = ROOT_REFERENCE,
        enveloped = ENVELOPED_URI,
        digest_alg = suite.digest_uri(),
        digest = digest_b64,
    )
}

fn import_fragment(doc: &mut Document, xml: &str) -> Result<Node, SigningError> {
    let fragment = Parser::default()
        .parse_string(xml)
        .map_err(|e| SigningError::SigningFailed(format!("XML parse error: {e:?}")))?;
    let mut node = fragment
        .get_root_element()
        .ok_or_else(|| SigningError::SigningFailed("missing fragment root".into()))?;
    node.unlink();
    doc.import_node(&mut node)
        .map_err(|_| SigningError::SigningFailed("failed to import signature fragment".into()))
}

fn ds_context(doc: &Document) -> Result<xpath::Context, SigningError> {
    let ctx = xpath::Context::new(doc)
        .map_err(|e| SigningError::SigningFailed(format!("XPath context error: {e:?}")))?;
    ctx.register_namespace("ds", DS_NS)
        .map_err(|e| SigningError::SigningFailed(format!("XPath context error: {e:?}")))?;
    Ok(ctx)
}

fn xpath_text(ctx: &xpath::Context, expr: &str) -> Result<String, SigningError> {
    let nodes = ctx
        .evaluate(expr)
        .map_err(|e| SigningError::SigningFailed(format!("XPath error for {expr}: {e:?}")))?
        .get_nodes_as_vec();
    let node = nodes.first().ok_or_else(|| SigningError::VerificationFailed {
        reason: format!("missing signature component at {expr}"),
    })?;
    let value: String = node
        .get_content()
        .split_whitespace()
        .collect();
    if value.is_empty() {
        return Err(SigningError::VerificationFailed {
            reason: format!("empty signature component at {expr}"),
        });
    }
    Ok(value)
}

fn set_xpath_text(ctx: &xpath::Context, path: &str, value: &str) -> Result<(), SigningError> {
    let nodes = ctx
        .evaluate(path)
        .map_err(|e| SigningError::SigningFailed(format!("XPath error: {e:?}")))?
        .get_nodes_as_vec();
    if nodes.is_empty() {
        return Err(SigningError::SigningFailed(format!(
            "XPath target not found: {path}"
        )));
    }
    for mut node in nodes {
        node.set_content(value)
            .map_err(|e| SigningError::SigningFailed(e.to_string()))?;
    }
    Ok(())
}

fn decode_base64_text(text: &str, label: &str) -> Result<Vec<u8>, SigningError> {
    Base64::decode_vec(text).map_err(|e| SigningError::VerificationFailed {
        reason: format!("{label} is not valid base64: {e}"),
    })
}

fn certificate_base64(cert: &Certificate) -> Result<String, SigningError> {
    let der = cert.to_der().map_err(|e| SigningError::CertificateInvalid {
        reason: format!("certificate DER encoding error: {e:?}"),
    })?;
    Ok(Base64::encode_string(&der))
}

fn public_key_from_certificate(cert: &Certificate) -> Result<RsaPublicKey, SigningError> {
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| SigningError::VerificationFailed {
            reason: format!("SPKI encoding error: {e:?}"),
        })?;
    RsaPublicKey::from_public_key_der(&spki_der).map_err(|e| SigningError::VerificationFailed {
        reason: format!("certificate does not carry an RSA public key: {e}"),
    })
}

fn check_certificate_window(cert: &Certificate) -> Result<(), SigningError> {
    let validity = &cert.tbs_certificate.validity;
    let now = SystemTime::now();
    if now < validity.not_before.to_system_time() {
        return Err(SigningError::CertificateInvalid {
            reason: format!(
                "certificate not valid before {:?}",
                validity.not_before.to_system_time()
            ),
        });
    }
    if now > validity.not_after.to_system_time() {
        return Err(SigningError::CertificateInvalid {
            reason: format!(
                "certificate expired at {:?}",
                validity.not_after.to_system_time()
            ),
        });
    }
    Ok(())
}

fn reject_non_rsa_pkcs8(der: &[u8]) -> Result<(), SigningError> {
    let info = PrivateKeyInfo::try_from(der).map_err(|e| SigningError::CertificateInvalid {
        reason: format!("PKCS#8 parse error: {e}"),
    })?;
    if info.algorithm.oid != RSA_ENCRYPTION_OID {
        return Err(SigningError::UnsupportedKeyType {
            algorithm: info.algorithm.oid.to_string(),
        });
    }
    Ok(())
}

fn rsa_key_from_pem(key_pem: &str) -> Result<RsaPrivateKey, SigningError> {
    if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(key_pem) {
        return Ok(key);
    }
    if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(key_pem) {
        return Ok(key);
    }
    // Distinguish a wrong key type from a corrupt document.
    if key_pem.contains("BEGIN EC PRIVATE KEY") {
        return Err(SigningError::UnsupportedKeyType {
            algorithm: "EC".into(),
        });
    }
    if let Ok((_, doc)) = rsa::pkcs8::der::Document::from_pem(key_pem) {
        reject_non_rsa_pkcs8(doc.as_bytes())?;
    }
    Err(SigningError::CertificateInvalid {
        reason: "private key is neither PKCS#8 nor PKCS#1 RSA PEM".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suite_uris_round_trip() {
        for suite in [AlgorithmSuite::RsaSha1, AlgorithmSuite::RsaSha256] {
            assert_eq!(
                AlgorithmSuite::from_signature_uri(suite.signature_uri()),
                Some(suite)
            );
        }
        assert_eq!(
            AlgorithmSuite::from_signature_uri("http://www.w3.org/2001/10/xml-exc-c14n#"),
            None
        );
    }

    #[test]
    fn template_declares_inclusive_c14n_and_enveloped_transform() {
        let xml = signature_template(AlgorithmSuite::RsaSha1, 1, 2, "abc=");
        assert!(xml.contains("Algorithm=\"http://www.w3.org/TR/2001/REC-xml-c14n-20010315\""));
        assert!(xml.contains("Algorithm=\"http://www.w3.org/2000/09/xmldsig#enveloped-signature\""));
        assert!(xml.contains("Algorithm=\"http://www.w3.org/2000/09/xmldsig#rsa-sha1\""));
        assert!(xml.contains("URI=\"#comprobante\""));
        assert!(xml.contains("Id=\"Signature1\""));
        assert!(xml.contains("Id=\"Reference-ID-2\""));
    }

    #[test]
    fn digest_is_stable_for_equal_documents() {
        let xml = "<factura id=\"comprobante\" version=\"1.1.0\"><infoTributaria><ruc>1310675341001</ruc></infoTributaria></factura>";
        let a = Parser::default().parse_string(xml).unwrap();
        let b = Parser::default().parse_string(xml).unwrap();
        assert_eq!(
            document_digest(&a, AlgorithmSuite::RsaSha1).unwrap(),
            document_digest(&b, AlgorithmSuite::RsaSha1).unwrap()
        );
    }

    #[test]
    fn digest_ignores_existing_signatures() {
        let plain = "<factura id=\"comprobante\"><infoTributaria/></factura>";
        let signed = "<factura id=\"comprobante\"><infoTributaria/><ds:Signature xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\"><ds:SignatureValue>x</ds:SignatureValue></ds:Signature></factura>";
        let a = Parser::default().parse_string(plain).unwrap();
        let b = Parser::default().parse_string(signed).unwrap();
        assert_eq!(
            document_digest(&a, AlgorithmSuite::RsaSha1).unwrap(),
            document_digest(&b, AlgorithmSuite::RsaSha1).unwrap()
        );
    }
}
