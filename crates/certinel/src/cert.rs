//! X.509 chain parsing
//!
//! The CA returns a PEM bundle: leaf first, intermediates after. The
//! coordinator persists the leaf's identity fields alongside the raw PEM
//! so consumers never need to re-parse.

use sha2::{Digest, Sha256};
use x509_parser::prelude::*;

use crate::errors::{CertsError, CertsResult};

/// Parsed identity of an issued certificate chain
#[derive(Debug, Clone, PartialEq)]
pub struct CertInfo {
    /// Leaf certificate PEM
    pub leaf_pem: String,
    /// Ordered intermediates, PEM
    pub chain: Vec<String>,
    /// Colon-separated hex serial
    pub serial_number: String,
    /// SHA-256 over the leaf DER, colon-separated hex
    pub fingerprint: String,
    /// DNS subject alternative names
    pub alt_names: Vec<String>,
    /// notBefore, epoch milliseconds
    pub valid_from: i64,
    /// notAfter, epoch milliseconds
    pub valid_to: i64,
}

/// Split a PEM bundle into individual certificate blocks
fn split_pem_blocks(bundle: &str) -> Vec<String> {
    const END: &str = "-----END CERTIFICATE-----";
    let mut blocks = Vec::new();
    let mut rest = bundle;
    while let Some(idx) = rest.find(END) {
        let (block, tail) = rest.split_at(idx + END.len());
        let block = block.trim();
        if !block.is_empty() {
            blocks.push(format!("{block}\n"));
        }
        rest = tail;
    }
    blocks
}

fn colon_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02X}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Parse a PEM chain returned by the CA
///
/// The first block is the leaf; its SANs, validity window, serial, and
/// fingerprint are extracted. Remaining blocks become the `ca` list.
pub fn parse_chain(bundle: &str) -> CertsResult<CertInfo> {
    let mut blocks = split_pem_blocks(bundle);
    if blocks.is_empty() {
        return Err(CertsError::CertificateParse(
            "no certificate blocks in bundle".to_string(),
        ));
    }
    let leaf_pem = blocks.remove(0);

    let (_, pem) = pem::parse_x509_pem(leaf_pem.as_bytes())
        .map_err(|e| CertsError::CertificateParse(format!("bad PEM: {e}")))?;
    let (_, cert) = X509Certificate::from_der(&pem.contents)
        .map_err(|e| CertsError::CertificateParse(format!("bad DER: {e}")))?;

    let mut alt_names = Vec::new();
    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            if let GeneralName::DNSName(dns) = name {
                alt_names.push((*dns).to_string());
            }
        }
    }

    let validity = cert.validity();
    let valid_from = validity.not_before.timestamp() * 1000;
    let valid_to = validity.not_after.timestamp() * 1000;
    if valid_to <= valid_from {
        return Err(CertsError::CertificateParse(
            "certificate validity window is empty".to_string(),
        ));
    }

    let serial_number = colon_hex(&cert.serial.to_bytes_be());
    let fingerprint = colon_hex(&Sha256::digest(&pem.contents));

    Ok(CertInfo {
        leaf_pem,
        chain: blocks,
        serial_number,
        fingerprint,
        alt_names,
        valid_from,
        valid_to,
    })
}
