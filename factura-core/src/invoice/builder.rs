//! Invoice assembly and totals derivation.
use crate::invoice::access_key::{AccessKey, AccessKeyError, ControlCode};
use crate::invoice::{
    AdditionalField, Buyer, InvoiceError, InvoiceHeader, LineItem, TaxRateCode, TaxTotal,
    MAX_ADDITIONAL_FIELDS, MAX_LINE_ITEMS,
};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors surfaced by [`FacturaBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Invoice(#[from] InvoiceError),
    #[error(transparent)]
    AccessKey(#[from] AccessKeyError),
}

/// Builder for a complete factura. Collects the header, buyer, line items
/// and additional fields, then derives totals and the access key in one
/// `build` step so a finalized invoice is always internally consistent.
///
/// # Examples
/// ```rust,no_run
/// use factura_core::invoice::{Buyer, FacturaBuilder, LineItem};
/// # fn demo(header: factura_core::invoice::InvoiceHeader, item: LineItem) {
/// let factura = FacturaBuilder::new(header)
///     .buyer(Buyer::final_consumer())
///     .line_item(item)
///     .build()
///     .unwrap();
/// assert_eq!(factura.access_key().as_str().len(), 49);
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct FacturaBuilder {
    header: InvoiceHeader,
    buyer: Option<Buyer>,
    line_items: Vec<LineItem>,
    additional_fields: Vec<AdditionalField>,
    tip: Decimal,
    control_code: ControlCode,
}

impl FacturaBuilder {
    pub fn new(header: InvoiceHeader) -> Self {
        Self {
            header,
            buyer: None,
            line_items: Vec::new(),
            additional_fields: Vec::new(),
            tip: Decimal::ZERO,
            control_code: ControlCode::Random,
        }
    }

    /// Defaults to [`Buyer::final_consumer`] when never called.
    pub fn buyer(mut self, buyer: Buyer) -> Self {
        self.buyer = Some(buyer);
        self
    }

    pub fn line_item(mut self, item: LineItem) -> Self {
        self.line_items.push(item);
        self
    }

    pub fn line_items(mut self, items: impl IntoIterator<Item = LineItem>) -> Self {
        self.line_items.extend(items);
        self
    }

    pub fn additional_field(mut self, field: AdditionalField) -> Self {
        self.additional_fields.push(field);
        self
    }

    pub fn tip(mut self, tip: Decimal) -> Self {
        self.tip = tip;
        self
    }

    /// Overrides the control-code source, mainly to reproduce a known key.
    pub fn control_code(mut self, control: ControlCode) -> Self {
        self.control_code = control;
        self
    }

    /// Validates cardinality limits, derives totals per tax rate, and
    /// generates the access key.
    ///
    /// # Errors
    /// Returns [`InvoiceError::MissingRequiredField`] when no line items
    /// were added, [`InvoiceError::LineItemCountExceeded`] past the
    /// regulatory limits, or [`AccessKeyError`] if key derivation exhausts
    /// its attempts.
    pub fn build(self) -> Result<FinalizedFactura, BuildError> {
        if self.line_items.is_empty() {
            return Err(InvoiceError::MissingRequiredField("detalles").into());
        }
        if self.line_items.len() > MAX_LINE_ITEMS {
            return Err(InvoiceError::LineItemCountExceeded {
                what: "line item",
                count: self.line_items.len(),
                max: MAX_LINE_ITEMS,
            }
            .into());
        }
        if self.additional_fields.len() > MAX_ADDITIONAL_FIELDS {
            return Err(InvoiceError::LineItemCountExceeded {
                what: "additional field",
                count: self.additional_fields.len(),
                max: MAX_ADDITIONAL_FIELDS,
            }
            .into());
        }

        let totals = InvoiceTotals::from_line_items(&self.line_items, self.tip);
        let access_key = AccessKey::generate(&self.header, self.control_code)?;
        tracing::debug!(
            access_key = %access_key,
            lines = self.line_items.len(),
            total = %totals.grand_total(),
            "finalized factura"
        );

        Ok(FinalizedFactura {
            header: self.header,
            buyer: self.buyer.unwrap_or_else(Buyer::final_consumer),
            line_items: self.line_items,
            additional_fields: self.additional_fields,
            totals,
            access_key,
        })
    }
}

/// Derived monetary aggregates for the `infoFactura` block.
#[derive(Debug, Clone, PartialEq)]
pub struct InvoiceTotals {
    subtotal: Decimal,
    total_discount: Decimal,
    tax_totals: Vec<TaxTotal>,
    tip: Decimal,
    grand_total: Decimal,
}

impl InvoiceTotals {
    fn from_line_items(items: &[LineItem], tip: Decimal) -> Self {
        let subtotal: Decimal = items.iter().map(LineItem::subtotal).sum();
        let total_discount: Decimal = items.iter().map(LineItem::discount).sum();

        // Group bases by rate code, preserving first-seen order.
        let mut groups: Vec<(TaxRateCode, Decimal)> = Vec::new();
        for item in items {
            match groups.iter_mut().find(|(code, _)| *code == item.rate_code()) {
                Some((_, base)) => *base += item.subtotal(),
                None => groups.push((item.rate_code(), item.subtotal())),
            }
        }
        let tax_totals: Vec<TaxTotal> = groups
            .into_iter()
            .map(|(code, base)| TaxTotal::new(code, base))
            .collect();

        let tax_sum: Decimal = tax_totals.iter().map(TaxTotal::value).sum();
        let grand_total = (subtotal + tax_sum + tip).round_dp(2);
        Self {
            subtotal,
            total_discount,
            tax_totals,
            tip,
            grand_total,
        }
    }

    /// `totalSinImpuestos`.
    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    /// `totalDescuento`.
    pub fn total_discount(&self) -> Decimal {
        self.total_discount
    }

    /// One entry per distinct rate code, in first-seen order.
    pub fn tax_totals(&self) -> &[TaxTotal] {
        &self.tax_totals
    }

    /// `propina`.
    pub fn tip(&self) -> Decimal {
        self.tip
    }

    /// `importeTotal`.
    pub fn grand_total(&self) -> Decimal {
        self.grand_total
    }
}

/// A fully validated invoice with derived totals and access key. The only
/// way out of the builder, and the only input the XML writer accepts.
#[derive(Debug, Clone)]
pub struct FinalizedFactura {
    header: InvoiceHeader,
    buyer: Buyer,
    line_items: Vec<LineItem>,
    additional_fields: Vec<AdditionalField>,
    totals: InvoiceTotals,
    access_key: AccessKey,
}

impl FinalizedFactura {
    pub fn header(&self) -> &InvoiceHeader {
        &self.header
    }

    pub fn buyer(&self) -> &Buyer {
        &self.buyer
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn additional_fields(&self) -> &[AdditionalField] {
        &self.additional_fields
    }

    pub fn totals(&self) -> &InvoiceTotals {
        &self.totals
    }

    pub fn access_key(&self) -> &AccessKey {
        &self.access_key
    }

    /// Renders the canonical factura XML document.
    ///
    /// # Errors
    /// Propagates serializer failures from the XML writer.
    pub fn to_xml(&self) -> Result<String, crate::invoice::xml::XmlWriteError> {
        crate::invoice::xml::write_factura(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmissionType, Environment};
    use crate::invoice::{
        DocumentType, EmissionPoint, EstablishmentCode, InvoiceHeaderFields, LineItemFields, Ruc,
        Sequential,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn header() -> InvoiceHeader {
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
    }

    fn item(price: Decimal, rate: TaxRateCode) -> LineItem {
        LineItem::new(LineItemFields {
            principal_code: "SKU-1".into(),
            auxiliary_code: None,
            description: "Servicio".into(),
            quantity: dec!(1),
            unit_price: price,
            discount: dec!(0),
            rate_code: rate,
            subtotal: price,
        })
        .unwrap()
    }

    #[test]
    fn totals_group_by_rate_code() {
        let factura = FacturaBuilder::new(header())
            .line_item(item(dec!(10.00), TaxRateCode::Fifteen))
            .line_item(item(dec!(5.00), TaxRateCode::Fifteen))
            .line_item(item(dec!(2.00), TaxRateCode::Zero))
            .build()
            .unwrap();
        let totals = factura.totals();
        assert_eq!(totals.subtotal(), dec!(17.00));
        assert_eq!(totals.tax_totals().len(), 2);
        assert_eq!(totals.tax_totals()[0].rate_code(), TaxRateCode::Fifteen);
        assert_eq!(totals.tax_totals()[0].taxable_base(), dec!(15.00));
        assert_eq!(totals.tax_totals()[0].value(), dec!(2.25));
        assert_eq!(totals.tax_totals()[1].value(), dec!(0.00));
        assert_eq!(totals.grand_total(), dec!(19.25));
    }

    #[test]
    fn build_requires_at_least_one_line() {
        let err = FacturaBuilder::new(header()).build().unwrap_err();
        assert!(matches!(
            err,
            BuildError::Invoice(InvoiceError::MissingRequiredField("detalles"))
        ));
    }

    #[test]
    fn build_rejects_too_many_additional_fields() {
        let mut builder = FacturaBuilder::new(header()).line_item(item(dec!(1.00), TaxRateCode::Zero));
        for i in 0..16 {
            builder = builder.additional_field(AdditionalField::new(format!("k{i}"), "v"));
        }
        let err = builder.build().unwrap_err();
        assert!(matches!(
            err,
            BuildError::Invoice(InvoiceError::LineItemCountExceeded { max: 15, .. })
        ));
    }

    #[test]
    fn missing_buyer_defaults_to_final_consumer() {
        let factura = FacturaBuilder::new(header())
            .line_item(item(dec!(1.00), TaxRateCode::Zero))
            .build()
            .unwrap();
        assert_eq!(factura.buyer().identification(), "9999999999999");
    }

    #[test]
    fn tip_is_added_to_grand_total() {
        let factura = FacturaBuilder::new(header())
            .line_item(item(dec!(10.00), TaxRateCode::Zero))
            .tip(dec!(1.00))
            .build()
            .unwrap();
        assert_eq!(factura.totals().grand_total(), dec!(11.00));
    }
}
