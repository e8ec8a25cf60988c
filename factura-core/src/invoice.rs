//! Invoice domain types and builders.
pub mod access_key;
mod builder;
pub mod sign;
pub mod validation;
pub mod xml;

pub use access_key::{AccessKey, AccessKeyError, ControlCode};
pub use builder::{BuildError, FacturaBuilder, FinalizedFactura, InvoiceTotals};

use crate::config::{EmissionType, Environment};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

type Result<T> = std::result::Result<T, InvoiceError>;

/// Regulatory maximum number of `<detalle>` nodes per invoice.
pub const MAX_LINE_ITEMS: usize = 1000;
/// Regulatory maximum number of `<campoAdicional>` nodes.
pub const MAX_ADDITIONAL_FIELDS: usize = 15;

/// Tolerance for declared-vs-computed monetary comparisons.
const ROUNDING_TOLERANCE: Decimal = Decimal::from_parts(1, 0, 0, false, 2); // 0.01

/// Invoice-related errors. `MalformedInput` means the caller handed a value
/// that violates a fixed-width or charset rule; it is never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvoiceError {
    #[error("malformed {field}: expected {expected}, got {got:?}")]
    MalformedInput {
        field: &'static str,
        expected: &'static str,
        got: String,
    },
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),
    #[error("{what} count {count} exceeds the maximum of {max}")]
    LineItemCountExceeded {
        what: &'static str,
        count: usize,
        max: usize,
    },
    #[error("line {line}: declared subtotal {declared} does not match computed {computed}")]
    SubtotalMismatch {
        line: usize,
        declared: Decimal,
        computed: Decimal,
    },
    #[error("tax total ({rate_code}): declared value {declared} does not match computed {computed}")]
    TaxValueMismatch {
        rate_code: &'static str,
        declared: Decimal,
        computed: Decimal,
    },
}

fn fixed_width_digits(
    field: &'static str,
    expected: &'static str,
    width: usize,
    value: &str,
) -> Result<String> {
    if value.len() != width || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(InvoiceError::MalformedInput {
            field,
            expected,
            got: value.to_string(),
        });
    }
    Ok(value.to_string())
}

/// Issuer tax registration number (13 numeric digits).
///
/// # Examples
/// ```rust
/// use factura_core::invoice::Ruc;
///
/// let ruc = Ruc::parse("1310675341001")?;
/// assert_eq!(ruc.as_str(), "1310675341001");
/// # Ok::<(), factura_core::InvoiceError>(())
/// ```
///
/// # Errors
/// Returns [`InvoiceError::MalformedInput`] unless the input is exactly 13
/// digits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ruc(String);

impl Ruc {
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self> {
        fixed_width_digits("ruc", "13 numeric digits", 13, s.as_ref().trim()).map(Ruc)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Ruc {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl FromStr for Ruc {
    type Err = InvoiceError;
    fn from_str(s: &str) -> Result<Self> {
        Ruc::parse(s)
    }
}

/// SRI-assigned establishment code (3 numeric digits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EstablishmentCode(String);

impl EstablishmentCode {
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self> {
        fixed_width_digits("establishment", "3 numeric digits", 3, s.as_ref().trim())
            .map(EstablishmentCode)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// SRI-assigned emission point (3 numeric digits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionPoint(String);

impl EmissionPoint {
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self> {
        fixed_width_digits("emission point", "3 numeric digits", 3, s.as_ref().trim())
            .map(EmissionPoint)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Zero-padded document sequential (9 numeric digits).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sequential(String);

impl Sequential {
    pub fn parse<S: AsRef<str>>(s: S) -> Result<Self> {
        fixed_width_digits("sequential", "9 numeric digits", 9, s.as_ref().trim())
            .map(Sequential)
    }

    /// Zero-pads a raw counter value.
    pub fn from_number(n: u32) -> Result<Self> {
        if n == 0 || n > 999_999_999 {
            return Err(InvoiceError::MalformedInput {
                field: "sequential",
                expected: "1..=999999999",
                got: n.to_string(),
            });
        }
        Ok(Sequential(format!("{n:09}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// SRI document type codes (tabla 3 of the ficha técnica).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentType {
    Invoice,
    PurchaseSettlement,
    CreditNote,
    DebitNote,
    DeliveryNote,
    WithholdingReceipt,
}

impl DocumentType {
    pub fn code(&self) -> &'static str {
        match self {
            DocumentType::Invoice => "01",
            DocumentType::PurchaseSettlement => "03",
            DocumentType::CreditNote => "04",
            DocumentType::DebitNote => "05",
            DocumentType::DeliveryNote => "06",
            DocumentType::WithholdingReceipt => "07",
        }
    }
}

/// VAT rate codes (`codigoPorcentaje`, tabla 17).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaxRateCode {
    Zero,
    Twelve,
    Fourteen,
    Fifteen,
}

impl TaxRateCode {
    pub fn code(&self) -> &'static str {
        match self {
            TaxRateCode::Zero => "0",
            TaxRateCode::Twelve => "2",
            TaxRateCode::Fourteen => "3",
            TaxRateCode::Fifteen => "4",
        }
    }

    /// Percentage as a decimal (e.g. `15` for [`TaxRateCode::Fifteen`]).
    pub fn rate(&self) -> Decimal {
        match self {
            TaxRateCode::Zero => Decimal::ZERO,
            TaxRateCode::Twelve => Decimal::from(12),
            TaxRateCode::Fourteen => Decimal::from(14),
            TaxRateCode::Fifteen => Decimal::from(15),
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, TaxRateCode::Zero)
    }
}

/// Buyer identification type codes (tabla 6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentificationType {
    Ruc,
    NationalId,
    Passport,
    FinalConsumer,
}

impl IdentificationType {
    pub fn code(&self) -> &'static str {
        match self {
            IdentificationType::Ruc => "04",
            IdentificationType::NationalId => "05",
            IdentificationType::Passport => "06",
            IdentificationType::FinalConsumer => "07",
        }
    }
}

/// The party being invoiced. Defaults to the generic final-consumer
/// identity when the sale is anonymous.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::{Buyer, IdentificationType};
///
/// let buyer = Buyer::new(IdentificationType::NationalId, "1712345678", "Juan Pérez")?;
/// assert_eq!(buyer.identification(), "1712345678");
/// # Ok::<(), factura_core::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    identification_type: IdentificationType,
    identification: String,
    legal_name: String,
    address: Option<String>,
    email: Option<String>,
}

impl Buyer {
    /// # Errors
    /// Returns [`InvoiceError::MalformedInput`] if the identification is
    /// empty or longer than 13 characters, or
    /// [`InvoiceError::MissingRequiredField`] if the name is blank.
    pub fn new(
        identification_type: IdentificationType,
        identification: impl Into<String>,
        legal_name: impl Into<String>,
    ) -> Result<Self> {
        let identification = identification.into().trim().to_string();
        if identification.is_empty() || identification.len() > 13 {
            return Err(InvoiceError::MalformedInput {
                field: "buyer identification",
                expected: "1..=13 characters",
                got: identification,
            });
        }
        let legal_name = legal_name.into().trim().to_string();
        if legal_name.is_empty() {
            return Err(InvoiceError::MissingRequiredField("razonSocialComprador"));
        }
        Ok(Self {
            identification_type,
            identification,
            legal_name,
            address: None,
            email: None,
        })
    }

    /// The anonymous "consumidor final" identity.
    pub fn final_consumer() -> Self {
        Self {
            identification_type: IdentificationType::FinalConsumer,
            identification: "9999999999999".to_string(),
            legal_name: "CONSUMIDOR FINAL".to_string(),
            address: None,
            email: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn identification_type(&self) -> IdentificationType {
        self.identification_type
    }

    pub fn identification(&self) -> &str {
        &self.identification
    }

    pub fn legal_name(&self) -> &str {
        &self.legal_name
    }

    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

/// Fields for constructing an [`InvoiceHeader`].
#[derive(Debug, Clone)]
pub struct InvoiceHeaderFields {
    pub ruc: Ruc,
    pub legal_name: String,
    pub trade_name: Option<String>,
    pub main_address: String,
    pub establishment: EstablishmentCode,
    pub emission_point: EmissionPoint,
    pub environment: Environment,
    pub emission_type: EmissionType,
    pub document_type: DocumentType,
    pub sequential: Sequential,
    pub issue_date: NaiveDate,
}

/// Issuer and document identity block (`infoTributaria` plus the header
/// half of `infoFactura`). Immutable once constructed; a changed field
/// means a new access key and therefore a new document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceHeader {
    ruc: Ruc,
    legal_name: String,
    trade_name: Option<String>,
    main_address: String,
    establishment: EstablishmentCode,
    emission_point: EmissionPoint,
    environment: Environment,
    emission_type: EmissionType,
    document_type: DocumentType,
    sequential: Sequential,
    issue_date: NaiveDate,
    establishment_address: Option<String>,
    accounting_required: Option<bool>,
    special_taxpayer: Option<String>,
}

impl InvoiceHeader {
    /// # Errors
    /// Returns [`InvoiceError::MissingRequiredField`] if the legal name or
    /// matrix address is blank.
    pub fn new(fields: InvoiceHeaderFields) -> Result<Self> {
        if fields.legal_name.trim().is_empty() {
            return Err(InvoiceError::MissingRequiredField("razonSocial"));
        }
        if fields.main_address.trim().is_empty() {
            return Err(InvoiceError::MissingRequiredField("dirMatriz"));
        }
        Ok(Self {
            ruc: fields.ruc,
            legal_name: fields.legal_name,
            trade_name: fields.trade_name,
            main_address: fields.main_address,
            establishment: fields.establishment,
            emission_point: fields.emission_point,
            environment: fields.environment,
            emission_type: fields.emission_type,
            document_type: fields.document_type,
            sequential: fields.sequential,
            issue_date: fields.issue_date,
            establishment_address: None,
            accounting_required: None,
            special_taxpayer: None,
        })
    }

    pub fn with_establishment_address(mut self, address: impl Into<String>) -> Self {
        self.establishment_address = Some(address.into());
        self
    }

    pub fn with_accounting_required(mut self, required: bool) -> Self {
        self.accounting_required = Some(required);
        self
    }

    pub fn with_special_taxpayer(mut self, resolution: impl Into<String>) -> Self {
        self.special_taxpayer = Some(resolution.into());
        self
    }

    pub fn ruc(&self) -> &Ruc {
        &self.ruc
    }

    pub fn legal_name(&self) -> &str {
        &self.legal_name
    }

    pub fn trade_name(&self) -> Option<&str> {
        self.trade_name.as_deref()
    }

    pub fn main_address(&self) -> &str {
        &self.main_address
    }

    pub fn establishment(&self) -> &EstablishmentCode {
        &self.establishment
    }

    pub fn emission_point(&self) -> &EmissionPoint {
        &self.emission_point
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn emission_type(&self) -> EmissionType {
        self.emission_type
    }

    pub fn document_type(&self) -> DocumentType {
        self.document_type
    }

    pub fn sequential(&self) -> &Sequential {
        &self.sequential
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn establishment_address(&self) -> Option<&str> {
        self.establishment_address.as_deref()
    }

    pub fn accounting_required(&self) -> Option<bool> {
        self.accounting_required
    }

    pub fn special_taxpayer(&self) -> Option<&str> {
        self.special_taxpayer.as_deref()
    }

    /// `estab + ptoEmi`, the 6-digit series embedded in the access key.
    pub fn series(&self) -> String {
        format!("{}{}", self.establishment.as_str(), self.emission_point.as_str())
    }
}

/// Fields for creating a line item with a declared subtotal.
#[derive(Debug, Clone, PartialEq)]
pub struct LineItemFields {
    pub principal_code: String,
    pub auxiliary_code: Option<String>,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub discount: Decimal,
    pub rate_code: TaxRateCode,
    pub subtotal: Decimal,
}

/// Single `<detalle>` entry. The declared subtotal is checked against
/// `quantity × unit_price − discount` at construction.
///
/// # Examples
/// ```rust
/// use factura_core::invoice::{LineItem, LineItemFields, TaxRateCode};
/// use rust_decimal::Decimal;
///
/// let item = LineItem::new(LineItemFields {
///     principal_code: "LAV-01".into(),
///     auxiliary_code: None,
///     description: "Lavado completo".into(),
///     quantity: Decimal::ONE,
///     unit_price: Decimal::new(1000, 2),
///     discount: Decimal::ZERO,
///     rate_code: TaxRateCode::Fifteen,
///     subtotal: Decimal::new(1000, 2),
/// })?;
/// assert_eq!(item.tax_amount(), Decimal::new(150, 2));
/// # Ok::<(), factura_core::InvoiceError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    principal_code: String,
    auxiliary_code: Option<String>,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    discount: Decimal,
    rate_code: TaxRateCode,
    subtotal: Decimal,
}

impl LineItem {
    /// # Errors
    /// Returns [`InvoiceError::SubtotalMismatch`] when the declared subtotal
    /// deviates from the computed one by more than the rounding tolerance,
    /// or [`InvoiceError::MissingRequiredField`] for blank mandatory text.
    pub fn new(fields: LineItemFields) -> Result<Self> {
        if fields.principal_code.trim().is_empty() {
            return Err(InvoiceError::MissingRequiredField("codigoPrincipal"));
        }
        if fields.description.trim().is_empty() {
            return Err(InvoiceError::MissingRequiredField("descripcion"));
        }
        let computed = (fields.quantity * fields.unit_price - fields.discount).round_dp(2);
        if (computed - fields.subtotal).abs() > ROUNDING_TOLERANCE {
            return Err(InvoiceError::SubtotalMismatch {
                line: 0,
                declared: fields.subtotal,
                computed,
            });
        }
        Ok(Self {
            principal_code: fields.principal_code,
            auxiliary_code: fields.auxiliary_code,
            description: fields.description,
            quantity: fields.quantity,
            unit_price: fields.unit_price,
            discount: fields.discount,
            rate_code: fields.rate_code,
            subtotal: fields.subtotal,
        })
    }

    pub fn principal_code(&self) -> &str {
        &self.principal_code
    }

    pub fn auxiliary_code(&self) -> Option<&str> {
        self.auxiliary_code.as_deref()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn quantity(&self) -> Decimal {
        self.quantity
    }

    pub fn unit_price(&self) -> Decimal {
        self.unit_price
    }

    pub fn discount(&self) -> Decimal {
        self.discount
    }

    pub fn rate_code(&self) -> TaxRateCode {
        self.rate_code
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax_amount(&self) -> Decimal {
        (self.subtotal * self.rate_code.rate() / Decimal::from(100)).round_dp(2)
    }
}

/// Per-rate tax aggregate (`<totalImpuesto>`). Every total carries its
/// explicit rate; omitting `<tarifa>` for a non-zero code is a known defect
/// class the validator diagnoses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxTotal {
    rate_code: TaxRateCode,
    taxable_base: Decimal,
    value: Decimal,
}

impl TaxTotal {
    /// Computes the tax value from the base and rate.
    pub fn new(rate_code: TaxRateCode, taxable_base: Decimal) -> Self {
        let value = (taxable_base * rate_code.rate() / Decimal::from(100)).round_dp(2);
        Self {
            rate_code,
            taxable_base,
            value,
        }
    }

    /// Accepts a caller-declared value, checked within the rounding
    /// tolerance.
    ///
    /// # Errors
    /// Returns [`InvoiceError::TaxValueMismatch`] on deviation.
    pub fn from_parts(
        rate_code: TaxRateCode,
        taxable_base: Decimal,
        value: Decimal,
    ) -> Result<Self> {
        let computed = (taxable_base * rate_code.rate() / Decimal::from(100)).round_dp(2);
        if (computed - value).abs() > ROUNDING_TOLERANCE {
            return Err(InvoiceError::TaxValueMismatch {
                rate_code: rate_code.code(),
                declared: value,
                computed,
            });
        }
        Ok(Self {
            rate_code,
            taxable_base,
            value,
        })
    }

    pub fn rate_code(&self) -> TaxRateCode {
        self.rate_code
    }

    pub fn taxable_base(&self) -> Decimal {
        self.taxable_base
    }

    pub fn value(&self) -> Decimal {
        self.value
    }
}

/// One `<campoAdicional>` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalField {
    name: String,
    value: String,
}

impl AdditionalField {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}
