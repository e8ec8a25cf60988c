use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use factura_core::invoice::sign::{verify_signed_xml, XmlSigner};
use factura_core::invoice::validation::SchemaIndex;
use std::path::{Path, PathBuf};

/// Cap on printed schema violations; huge invoices can produce hundreds.
const MAX_REPORTED_ISSUES: usize = 25;

#[derive(Parser)]
#[command(name = "factura", version, about = "SRI electronic invoice tooling")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate an invoice against the published XSD schemas
    Validate {
        /// Invoice XML file
        xml: PathBuf,
        /// Directory searched recursively for .xsd schemas
        #[arg(default_value = "./schemas")]
        schemas: PathBuf,
    },
    /// Sign an invoice with a PKCS#12 or PEM credential
    Sign {
        /// Invoice XML file
        xml: PathBuf,
        /// PKCS#12 container holding the certificate and RSA key
        #[arg(long, conflicts_with_all = ["cert", "key"])]
        p12: Option<PathBuf>,
        /// Container password
        #[arg(long, default_value = "")]
        password: String,
        /// X.509 certificate PEM (alternative to --p12, for containers
        /// the PKCS#12 parser cannot handle)
        #[arg(long, requires = "key")]
        cert: Option<PathBuf>,
        /// RSA private key PEM
        #[arg(long, requires = "cert")]
        key: Option<PathBuf>,
        /// Output path; stdout when omitted
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check the enveloped signature of a signed invoice
    Verify {
        /// Signed invoice XML file
        xml: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Cli::parse().command {
        Commands::Validate { xml, schemas } => validate(&xml, &schemas),
        Commands::Sign {
            xml,
            p12,
            password,
            cert,
            key,
            out,
        } => {
            let signer = load_signer(p12.as_deref(), &password, cert.as_deref(), key.as_deref())?;
            sign(&signer, &xml, out.as_deref())
        }
        Commands::Verify { xml } => verify(&xml),
    }
}

fn validate(xml: &Path, schemas: &Path) -> Result<()> {
    let index = SchemaIndex::discover([schemas.to_path_buf()])
        .with_context(|| format!("discovering schemas under {}", schemas.display()))?;
    let report = index
        .validate_file(xml)
        .with_context(|| format!("validating {}", xml.display()))?;

    if report.is_valid() {
        println!("VALID ({})", report.schema().display());
        return Ok(());
    }

    eprintln!("NOT VALID ({})", report.schema().display());
    for issue in report.issues().iter().take(MAX_REPORTED_ISSUES) {
        eprintln!("  {issue}");
    }
    let hidden = report.issues().len().saturating_sub(MAX_REPORTED_ISSUES);
    if hidden > 0 {
        eprintln!("  ... and {hidden} more");
    }
    for hint in report.hints() {
        eprintln!("hint: {hint}");
    }
    std::process::exit(1);
}

fn load_signer(
    p12: Option<&Path>,
    password: &str,
    cert: Option<&Path>,
    key: Option<&Path>,
) -> Result<XmlSigner> {
    match (p12, cert, key) {
        (Some(p12), _, _) => {
            let der = std::fs::read(p12).with_context(|| format!("reading {}", p12.display()))?;
            XmlSigner::from_pkcs12(&der, password)
                .with_context(|| format!("loading credential from {}", p12.display()))
        }
        (None, Some(cert), Some(key)) => {
            let cert_pem =
                std::fs::read_to_string(cert).with_context(|| format!("reading {}", cert.display()))?;
            let key_pem =
                std::fs::read_to_string(key).with_context(|| format!("reading {}", key.display()))?;
            XmlSigner::from_pem(&cert_pem, &key_pem)
                .with_context(|| format!("loading credential from {}", cert.display()))
        }
        _ => anyhow::bail!("a credential is required: --p12 <file> or --cert <pem> --key <pem>"),
    }
}

fn sign(signer: &XmlSigner, xml: &Path, out: Option<&Path>) -> Result<()> {
    let unsigned =
        std::fs::read_to_string(xml).with_context(|| format!("reading {}", xml.display()))?;
    let signed = signer
        .sign_xml(&unsigned)
        .with_context(|| format!("signing {}", xml.display()))?;

    match out {
        Some(path) => {
            std::fs::write(path, &signed).with_context(|| format!("writing {}", path.display()))?
        }
        None => print!("{signed}"),
    }
    Ok(())
}

fn verify(xml: &Path) -> Result<()> {
    let signed =
        std::fs::read_to_string(xml).with_context(|| format!("reading {}", xml.display()))?;
    match verify_signed_xml(&signed) {
        Ok(()) => {
            println!("SIGNATURE OK");
            Ok(())
        }
        Err(err) => {
            eprintln!("SIGNATURE INVALID: {err}");
            std::process::exit(1);
        }
    }
}
