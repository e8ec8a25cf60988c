//! Access key (clave de acceso) generation.
//!
//! The access key is the 49-digit national identifier of an electronic
//! document: a 48-digit payload followed by one modulo-11 check digit.
//! Payload layout, left to right:
//!
//! | field           | width |
//! |-----------------|-------|
//! | issue date      | 8 (`ddmmyyyy`) |
//! | document type   | 2     |
//! | RUC             | 13    |
//! | environment     | 1     |
//! | series          | 6 (`estab + ptoEmi`) |
//! | sequential      | 9     |
//! | control code    | 8     |
//! | emission type   | 1     |

use crate::invoice::InvoiceHeader;
use std::fmt;
use thiserror::Error;

const PAYLOAD_LEN: usize = 48;
const KEY_LEN: usize = 49;
const MAX_ATTEMPTS: u32 = 10;

/// Errors produced while deriving an access key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessKeyError {
    #[error("exhausted {attempts} attempts without a valid check digit")]
    KeyGenerationExhausted { attempts: u32 },
    #[error("malformed access key: expected {expected}, got {got:?}")]
    Malformed { expected: &'static str, got: String },
}

/// Source of the 8-digit numeric control code.
///
/// `Random` draws a fresh code per attempt, so a modulo-11 result of 10
/// simply retries. `Fixed` is for reproducing a known key; it cannot retry,
/// so an unlucky fixed code fails on the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCode {
    Random,
    Fixed(u32),
}

impl ControlCode {
    fn draw(&self) -> u32 {
        match self {
            ControlCode::Random => rand::random_range(0..100_000_000),
            ControlCode::Fixed(code) => code % 100_000_000,
        }
    }
}

/// A validated 49-digit access key.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::AccessKey;
///
/// let key = AccessKey::parse("2301202501131067534100110020010000000011234567818")?;
/// assert_eq!(key.check_digit(), 8);
/// # Ok::<(), factura_core::invoice::AccessKeyError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKey(String);

impl AccessKey {
    /// Derives a key for the given header, retrying the control code until
    /// the modulo-11 check digit lands in `0..=9`.
    ///
    /// # Errors
    /// Returns [`AccessKeyError::KeyGenerationExhausted`] if no attempt
    /// produced a valid digit. With `ControlCode::Fixed` there is exactly
    /// one attempt.
    pub fn generate(header: &InvoiceHeader, control: ControlCode) -> Result<Self, AccessKeyError> {
        let attempts = match control {
            ControlCode::Random => MAX_ATTEMPTS,
            ControlCode::Fixed(_) => 1,
        };
        for attempt in 0..attempts {
            let payload = build_payload(header, control.draw());
            debug_assert_eq!(payload.len(), PAYLOAD_LEN);
            match mod11_check_digit(&payload) {
                Some(digit) => {
                    tracing::debug!(attempt, "derived access key check digit {digit}");
                    return Ok(AccessKey(format!("{payload}{digit}")));
                }
                None => tracing::debug!(attempt, "check digit collapsed to 10, retrying"),
            }
        }
        Err(AccessKeyError::KeyGenerationExhausted { attempts })
    }

    /// Parses and verifies an existing key, including its check digit.
    ///
    /// # Errors
    /// Returns [`AccessKeyError::Malformed`] for wrong length, non-digit
    /// characters, or a check digit that does not match the payload.
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self, AccessKeyError> {
        let s = s.as_ref();
        if s.len() != KEY_LEN || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AccessKeyError::Malformed {
                expected: "49 numeric digits",
                got: s.to_string(),
            });
        }
        let (payload, check) = s.split_at(PAYLOAD_LEN);
        let declared = u32::from(check.as_bytes()[0] - b'0');
        if mod11_check_digit(payload) != Some(declared) {
            return Err(AccessKeyError::Malformed {
                expected: "a matching modulo-11 check digit",
                got: s.to_string(),
            });
        }
        Ok(AccessKey(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn check_digit(&self) -> u32 {
        u32::from(self.0.as_bytes()[PAYLOAD_LEN] - b'0')
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

fn build_payload(header: &InvoiceHeader, control_code: u32) -> String {
    format!(
        "{date}{doc}{ruc}{env}{series}{seq}{code:08}{emission}",
        date = header.issue_date().format("%d%m%Y"),
        doc = header.document_type().code(),
        ruc = header.ruc().as_str(),
        env = header.environment().code(),
        series = header.series(),
        seq = header.sequential().as_str(),
        code = control_code,
        emission = header.emission_type().code(),
    )
}

/// Modulo-11 with weights 2..=7 cycling from the rightmost digit.
/// `None` means the raw result was 10 and the payload must be re-drawn.
fn mod11_check_digit(payload: &str) -> Option<u32> {
    let sum: u32 = payload
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * (2 + (i as u32 % 6)))
        .sum();
    match sum % 11 {
        0 => Some(0),
        rem => match 11 - rem {
            10 => None,
            digit => Some(digit),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmissionType, Environment};
    use crate::invoice::{
        DocumentType, EstablishmentCode, EmissionPoint, InvoiceHeaderFields, Ruc, Sequential,
    };
    use chrono::NaiveDate;

    fn header() -> InvoiceHeader {
        InvoiceHeader::new(InvoiceHeaderFields {
            ruc: Ruc::parse("1310675341001").unwrap(),
            legal_name: "Lavandería del Valle".into(),
            trade_name: None,
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
    }

    #[test]
    fn generated_key_is_49_digits_and_self_consistent() {
        let key = AccessKey::generate(&header(), ControlCode::Random).unwrap();
        assert_eq!(key.as_str().len(), 49);
        assert!(key.as_str().bytes().all(|b| b.is_ascii_digit()));
        assert!(key.check_digit() <= 9);
        assert_eq!(AccessKey::parse(key.as_str()).unwrap(), key);
    }

    #[test]
    fn payload_layout_embeds_header_fields() {
        let payload = build_payload(&header(), 12_345_678);
        assert_eq!(payload.len(), 48);
        assert_eq!(&payload[0..8], "01012025");
        assert_eq!(&payload[8..10], "01");
        assert_eq!(&payload[10..23], "1310675341001");
        assert_eq!(&payload[23..24], "1");
        assert_eq!(&payload[24..30], "002101");
        assert_eq!(&payload[30..39], "000000001");
        assert_eq!(&payload[39..47], "12345678");
        assert_eq!(&payload[47..48], "1");
    }

    #[test]
    fn control_code_is_zero_padded() {
        let payload = build_payload(&header(), 7);
        assert_eq!(&payload[39..47], "00000007");
    }

    #[test]
    fn mod11_known_values() {
        // 48 ones: sum of one weight cycle (2+3+4+5+6+7) times 8 = 216,
        // 216 % 11 = 7, check digit 4.
        let payload = "1".repeat(48);
        assert_eq!(mod11_check_digit(&payload), Some(4));
        // All zeros sums to 0, remainder 0 maps to digit 0.
        let payload = "0".repeat(48);
        assert_eq!(mod11_check_digit(&payload), Some(0));
    }

    #[test]
    fn fixed_control_code_never_retries() {
        // Fixed codes either succeed immediately or exhaust in one attempt,
        // so derivation is deterministic.
        let first = AccessKey::generate(&header(), ControlCode::Fixed(12_345_678));
        let second = AccessKey::generate(&header(), ControlCode::Fixed(12_345_678));
        assert_eq!(first, second);
        if let Err(err) = first {
            assert_eq!(err, AccessKeyError::KeyGenerationExhausted { attempts: 1 });
        }
    }

    #[test]
    fn fixed_control_code_sweep_yields_valid_digits_or_exhaustion() {
        let header = header();
        for code in 0..50u32 {
            match AccessKey::generate(&header, ControlCode::Fixed(code)) {
                Ok(key) => {
                    assert!(key.check_digit() <= 9);
                    assert!(AccessKey::parse(key.as_str()).is_ok());
                }
                Err(err) => {
                    assert_eq!(err, AccessKeyError::KeyGenerationExhausted { attempts: 1 })
                }
            }
        }
    }

    #[test]
    fn parse_rejects_bad_check_digit() {
        let key = AccessKey::generate(&header(), ControlCode::Random).unwrap();
        let mut tampered = key.as_str().to_string();
        let last = tampered.pop().unwrap();
        let flipped = if last == '0' { '1' } else { '0' };
        tampered.push(flipped);
        assert!(matches!(
            AccessKey::parse(&tampered),
            Err(AccessKeyError::Malformed { .. })
        ));
    }
}
