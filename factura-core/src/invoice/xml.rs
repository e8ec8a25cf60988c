//! Canonical factura XML rendering (schema version 1.1.0).
//!
//! Element order follows the published XSD exactly; the serializer emits
//! fields in declaration order, so the struct layouts below are the
//! authoritative ordering. All monetary values are written with two
//! decimals, quantities and unit prices with six.
use crate::invoice::builder::FinalizedFactura;
use crate::invoice::{AdditionalField, Buyer, InvoiceHeader, LineItem, TaxTotal};
use quick_xml::se::Serializer;
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

/// Root attribute values fixed by the ficha técnica.
const SCHEMA_VERSION: &str = "1.1.0";
const ROOT_ID: &str = "comprobante";
/// `<codigo>` for VAT in every impuesto block (tabla 16).
const TAX_CODE_VAT: &str = "2";

#[derive(Debug, Error)]
pub enum XmlWriteError {
    #[error("XML serialization failed: {0}")]
    Serialize(#[from] quick_xml::SeError),
}

/// Renders a finalized invoice as a UTF-8 XML string, declaration included.
///
/// Output is deterministic for a given invoice: same input, same bytes.
///
/// # Errors
/// Returns [`XmlWriteError::Serialize`] if the serializer fails, which for
/// well-formed input does not happen in practice.
pub fn write_factura(factura: &FinalizedFactura) -> Result<String, XmlWriteError> {
    let doc = FacturaDoc::from(factura);
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let mut ser = Serializer::with_root(&mut out, Some("factura"))?;
    ser.indent(' ', 2);
    doc.serialize(ser)?;
    Ok(out)
}

/// Two-decimal monetary value.
#[derive(Debug, Clone, Copy)]
struct Fixed2(Decimal);

impl Serialize for Fixed2 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:.2}", self.0))
    }
}

/// Six-decimal quantity or unit price.
#[derive(Debug, Clone, Copy)]
struct Fixed6(Decimal);

impl Serialize for Fixed6 {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&format_args!("{:.6}", self.0))
    }
}

#[derive(Serialize)]
#[serde(rename = "factura")]
struct FacturaDoc<'a> {
    #[serde(rename = "@id")]
    id: &'static str,
    #[serde(rename = "@version")]
    version: &'static str,
    #[serde(rename = "infoTributaria")]
    info_tributaria: InfoTributaria<'a>,
    #[serde(rename = "infoFactura")]
    info_factura: InfoFactura<'a>,
    detalles: Detalles<'a>,
    #[serde(rename = "infoAdicional", skip_serializing_if = "Option::is_none")]
    info_adicional: Option<InfoAdicional<'a>>,
}

#[derive(Serialize)]
struct InfoTributaria<'a> {
    ambiente: &'static str,
    #[serde(rename = "tipoEmision")]
    tipo_emision: &'static str,
    #[serde(rename = "razonSocial")]
    razon_social: &'a str,
    #[serde(rename = "nombreComercial", skip_serializing_if = "Option::is_none")]
    nombre_comercial: Option<&'a str>,
    ruc: &'a str,
    #[serde(rename = "claveAcceso")]
    clave_acceso: &'a str,
    #[serde(rename = "codDoc")]
    cod_doc: &'static str,
    estab: &'a str,
    #[serde(rename = "ptoEmi")]
    pto_emi: &'a str,
    secuencial: &'a str,
    #[serde(rename = "dirMatriz")]
    dir_matriz: &'a str,
}

#[derive(Serialize)]
struct InfoFactura<'a> {
    #[serde(rename = "fechaEmision")]
    fecha_emision: String,
    #[serde(rename = "dirEstablecimiento", skip_serializing_if = "Option::is_none")]
    dir_establecimiento: Option<&'a str>,
    #[serde(rename = "contribuyenteEspecial", skip_serializing_if = "Option::is_none")]
    contribuyente_especial: Option<&'a str>,
    #[serde(rename = "obligadoContabilidad", skip_serializing_if = "Option::is_none")]
    obligado_contabilidad: Option<&'static str>,
    #[serde(rename = "tipoIdentificacionComprador")]
    tipo_identificacion_comprador: &'static str,
    #[serde(rename = "razonSocialComprador")]
    razon_social_comprador: &'a str,
    #[serde(rename = "identificacionComprador")]
    identificacion_comprador: &'a str,
    #[serde(rename = "direccionComprador", skip_serializing_if = "Option::is_none")]
    direccion_comprador: Option<&'a str>,
    #[serde(rename = "totalSinImpuestos")]
    total_sin_impuestos: Fixed2,
    #[serde(rename = "totalDescuento")]
    total_descuento: Fixed2,
    #[serde(rename = "totalConImpuestos")]
    total_con_impuestos: TotalConImpuestos,
    propina: Fixed2,
    #[serde(rename = "importeTotal")]
    importe_total: Fixed2,
    moneda: &'static str,
}

#[derive(Serialize)]
struct TotalConImpuestos {
    #[serde(rename = "totalImpuesto")]
    total_impuesto: Vec<TotalImpuesto>,
}

#[derive(Serialize)]
struct TotalImpuesto {
    codigo: &'static str,
    #[serde(rename = "codigoPorcentaje")]
    codigo_porcentaje: &'static str,
    tarifa: Fixed2,
    #[serde(rename = "baseImponible")]
    base_imponible: Fixed2,
    valor: Fixed2,
}

#[derive(Serialize)]
struct Detalles<'a> {
    detalle: Vec<Detalle<'a>>,
}

#[derive(Serialize)]
struct Detalle<'a> {
    #[serde(rename = "codigoPrincipal")]
    codigo_principal: &'a str,
    #[serde(rename = "codigoAuxiliar", skip_serializing_if = "Option::is_none")]
    codigo_auxiliar: Option<&'a str>,
    descripcion: &'a str,
    cantidad: Fixed6,
    #[serde(rename = "precioUnitario")]
    precio_unitario: Fixed6,
    descuento: Fixed2,
    #[serde(rename = "precioTotalSinImpuesto")]
    precio_total_sin_impuesto: Fixed2,
    impuestos: Impuestos,
}

#[derive(Serialize)]
struct Impuestos {
    impuesto: Vec<Impuesto>,
}

#[derive(Serialize)]
struct Impuesto {
    codigo: &'static str,
    #[serde(rename = "codigoPorcentaje")]
    codigo_porcentaje: &'static str,
    tarifa: Fixed2,
    #[serde(rename = "baseImponible")]
    base_imponible: Fixed2,
    valor: Fixed2,
}

#[derive(Serialize)]
struct InfoAdicional<'a> {
    #[serde(rename = "campoAdicional")]
    campo_adicional: Vec<CampoAdicional<'a>>,
}

#[derive(Serialize)]
struct CampoAdicional<'a> {
    #[serde(rename = "@nombre")]
    nombre: &'a str,
    #[serde(rename = "$text")]
    valor: &'a str,
}

impl<'a> From<&'a FinalizedFactura> for FacturaDoc<'a> {
    fn from(factura: &'a FinalizedFactura) -> Self {
        let header = factura.header();
        FacturaDoc {
            id: ROOT_ID,
            version: SCHEMA_VERSION,
            info_tributaria: info_tributaria(factura, header),
            info_factura: info_factura(factura, header),
            detalles: Detalles {
                detalle: factura.line_items().iter().map(detalle).collect(),
            },
            info_adicional: info_adicional(factura.additional_fields()),
        }
    }
}

fn info_tributaria<'a>(factura: &'a FinalizedFactura, header: &'a InvoiceHeader) -> InfoTributaria<'a> {
    InfoTributaria {
        ambiente: header.environment().code(),
        tipo_emision: header.emission_type().code(),
        razon_social: header.legal_name(),
        nombre_comercial: header.trade_name(),
        ruc: header.ruc().as_str(),
        clave_acceso: factura.access_key().as_str(),
        cod_doc: header.document_type().code(),
        estab: header.establishment().as_str(),
        pto_emi: header.emission_point().as_str(),
        secuencial: header.sequential().as_str(),
        dir_matriz: header.main_address(),
    }
}

fn info_factura<'a>(factura: &'a FinalizedFactura, header: &'a InvoiceHeader) -> InfoFactura<'a> {
    let buyer: &Buyer = factura.buyer();
    let totals = factura.totals();
    InfoFactura {
        fecha_emision: header.issue_date().format("%d/%m/%Y").to_string(),
        dir_establecimiento: header.establishment_address(),
        contribuyente_especial: header.special_taxpayer(),
        obligado_contabilidad: header
            .accounting_required()
            .map(|required| if required { "SI" } else { "NO" }),
        tipo_identificacion_comprador: buyer.identification_type().code(),
        razon_social_comprador: buyer.legal_name(),
        identificacion_comprador: buyer.identification(),
        direccion_comprador: buyer.address(),
        total_sin_impuestos: Fixed2(totals.subtotal()),
        total_descuento: Fixed2(totals.total_discount()),
        total_con_impuestos: TotalConImpuestos {
            total_impuesto: totals.tax_totals().iter().map(total_impuesto).collect(),
        },
        propina: Fixed2(totals.tip()),
        importe_total: Fixed2(totals.grand_total()),
        moneda: "DOLAR",
    }
}

fn total_impuesto(total: &TaxTotal) -> TotalImpuesto {
    TotalImpuesto {
        codigo: TAX_CODE_VAT,
        codigo_porcentaje: total.rate_code().code(),
        tarifa: Fixed2(total.rate_code().rate()),
        base_imponible: Fixed2(total.taxable_base()),
        valor: Fixed2(total.value()),
    }
}

fn detalle(item: &LineItem) -> Detalle<'_> {
    Detalle {
        codigo_principal: item.principal_code(),
        codigo_auxiliar: item.auxiliary_code(),
        descripcion: item.description(),
        cantidad: Fixed6(item.quantity()),
        precio_unitario: Fixed6(item.unit_price()),
        descuento: Fixed2(item.discount()),
        precio_total_sin_impuesto: Fixed2(item.subtotal()),
        impuestos: Impuestos {
            impuesto: vec![Impuesto {
                codigo: TAX_CODE_VAT,
                codigo_porcentaje: item.rate_code().code(),
                tarifa: Fixed2(item.rate_code().rate()),
                base_imponible: Fixed2(item.subtotal()),
                valor: Fixed2(item.tax_amount()),
            }],
        },
    }
}

fn info_adicional(fields: &[AdditionalField]) -> Option<InfoAdicional<'_>> {
    if fields.is_empty() {
        return None;
    }
    Some(InfoAdicional {
        campo_adicional: fields
            .iter()
            .map(|f| CampoAdicional {
                nombre: f.name(),
                valor: f.value(),
            })
            .collect(),
    })
}
