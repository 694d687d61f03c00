//! Domain name normalization
//!
//! Every externally-supplied domain is normalized once at the boundary so
//! store keys, lock keys, and certificate lookups all agree on a single
//! spelling: trimmed, trailing dot stripped, punycode decoded to Unicode
//! (NFC), lowercased. The wire-facing surfaces (CSR SANs, ACME
//! identifiers) require the opposite direction; [`to_ascii`] produces the
//! A-label form for them.

use crate::errors::{CertsError, CertsResult};

/// Normalize a domain for use as a store key
pub fn normalize(domain: &str) -> CertsResult<String> {
    let trimmed = domain.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return Err(CertsError::InvalidDomain {
            domain: domain.to_string(),
            reason: "empty domain".to_string(),
        });
    }

    // idna handles lowercasing, NFC, and xn-- label decoding in one pass
    let (unicode, result) = idna::domain_to_unicode(trimmed);
    if result.is_err() {
        return Err(CertsError::InvalidDomain {
            domain: domain.to_string(),
            reason: "punycode decoding failed".to_string(),
        });
    }

    Ok(unicode)
}

/// ASCII (A-label) form of a normalized domain
///
/// CSR DNS names are IA5String and RFC 8555 identifiers carry A-labels,
/// so the Unicode form used for store keys is re-encoded at those
/// boundaries.
pub fn to_ascii(domain: &str) -> CertsResult<String> {
    idna::domain_to_ascii(domain).map_err(|_| CertsError::InvalidDomain {
        domain: domain.to_string(),
        reason: "punycode encoding failed".to_string(),
    })
}

/// Parent suffixes of a normalized domain, most specific first
///
/// `"a.b.example.com"` yields `["a.b.example.com", "b.example.com",
/// "example.com"]`. Single-label suffixes (TLDs) are not yielded; the CAA
/// walk stops at the registrable parent.
pub fn suffix_walk(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return Vec::new();
    }
    (0..=labels.len() - 2)
        .map(|i| labels[i..].join("."))
        .collect()
}
