//! Domain validation
//!
//! Two gates before any issuance attempt: a syntactic FQDN check, and an
//! optional CAA policy walk. The CAA walk climbs parent suffixes and the
//! first level that answers with any CAA records decides; DNS failures at
//! a level count as "no records here" and the walk continues.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfig, ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::proto::rr::rdata::caa::{Property, Value};
use hickory_resolver::proto::rr::{RData, RecordType};
use hickory_resolver::proto::xfer::Protocol;
use hickory_resolver::{Resolver, TokioResolver};
use tracing::{debug, trace, warn};

use crate::domain::{suffix_walk, to_ascii};
use crate::errors::{CertsError, CertsResult};

/// One CAA record, reduced to what the policy check needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaaRecord {
    /// Tag, lowercased (`issue`, `issuewild`, `iodef`, ...)
    pub tag: String,
    /// Issuer value for `issue`/`issuewild` tags
    pub value: String,
}

/// CAA record source
#[async_trait]
pub trait CaaLookup: Send + Sync {
    /// CAA records at exactly `name`; transport failures may be returned
    /// as errors and are treated as an empty answer by the caller
    async fn lookup_caa(&self, name: &str) -> CertsResult<Vec<CaaRecord>>;
}

/// CAA lookups over a Tokio DNS resolver
pub struct DnsCaaLookup {
    resolver: TokioResolver,
}

impl DnsCaaLookup {
    /// Resolver against the system configuration
    pub fn new() -> CertsResult<Self> {
        let resolver = Resolver::builder_tokio()
            .map_err(|e| CertsError::Acme(format!("resolver construction failed: {e}")))?
            .build();
        Ok(Self { resolver })
    }

    /// Resolver pinned to specific nameservers (UDP port 53)
    pub fn with_nameservers(nameservers: &[IpAddr]) -> Self {
        let mut config = ResolverConfig::new();
        for ip in nameservers {
            config.add_name_server(NameServerConfig::new((*ip, 53).into(), Protocol::Udp));
        }

        let mut opts = ResolverOpts::default();
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;

        let resolver =
            Resolver::builder_with_config(config, TokioConnectionProvider::default())
                .with_options(opts)
                .build();
        Self { resolver }
    }
}

#[async_trait]
impl CaaLookup for DnsCaaLookup {
    async fn lookup_caa(&self, name: &str) -> CertsResult<Vec<CaaRecord>> {
        let lookup = match self.resolver.lookup(name, RecordType::CAA).await {
            Ok(lookup) => lookup,
            Err(e) => {
                // NXDOMAIN / empty answers are normal mid-walk.
                let text = e.to_string().to_lowercase();
                if text.contains("no records found")
                    || text.contains("record not found")
                    || text.contains("nxdomain")
                {
                    return Ok(Vec::new());
                }
                return Err(CertsError::Acme(format!("CAA lookup failed for '{name}': {e}")));
            }
        };

        let mut records = Vec::new();
        for rdata in lookup.iter() {
            if let RData::CAA(caa) = rdata {
                let tag = match caa.tag() {
                    Property::Issue => "issue".to_string(),
                    Property::IssueWild => "issuewild".to_string(),
                    Property::Iodef => "iodef".to_string(),
                    Property::Unknown(other) => other.to_lowercase(),
                };
                let value = match caa.value() {
                    Value::Issuer(Some(issuer), _) => {
                        issuer.to_utf8().trim_end_matches('.').to_lowercase()
                    }
                    Value::Issuer(None, _) => String::new(),
                    Value::Url(url) => url.to_string(),
                    Value::Unknown(bytes) => String::from_utf8_lossy(bytes).to_string(),
                };
                records.push(CaaRecord { tag, value });
            }
        }
        Ok(records)
    }
}

/// Domain validator with optional CAA policy enforcement
pub struct DomainValidator {
    caa_lookup: Option<Arc<dyn CaaLookup>>,
    caa_domains: Vec<String>,
}

impl DomainValidator {
    /// Validator with CAA checking disabled
    pub fn syntax_only() -> Self {
        Self {
            caa_lookup: None,
            caa_domains: Vec::new(),
        }
    }

    /// Validator enforcing that one of `caa_domains` is authorized to issue
    ///
    /// CAA is skipped when `caa_domains` is empty or no lookup is wired.
    pub fn new(caa_lookup: Option<Arc<dyn CaaLookup>>, caa_domains: Vec<String>) -> Self {
        Self {
            caa_lookup,
            caa_domains: caa_domains
                .into_iter()
                .map(|d| d.to_lowercase())
                .collect(),
        }
    }

    /// Syntactic FQDN check on an already-normalized domain
    pub fn validate_syntax(domain: &str) -> CertsResult<()> {
        let fail = |reason: &str| {
            Err(CertsError::InvalidDomain {
                domain: domain.to_string(),
                reason: reason.to_string(),
            })
        };

        if domain.len() > 253 {
            return fail("longer than 253 characters");
        }
        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2 {
            return fail("missing registered TLD");
        }
        for label in &labels {
            if label.is_empty() {
                return fail("empty label");
            }
            if label.len() > 63 {
                return fail("label longer than 63 characters");
            }
            if label.starts_with('-') || label.ends_with('-') {
                return fail("label begins or ends with '-'");
            }
            if !label
                .chars()
                .all(|c| c.is_alphanumeric() || c == '-')
            {
                return fail("label contains a character outside [a-z0-9-]");
            }
        }
        let tld = labels[labels.len() - 1];
        if tld.len() < 2 || tld.chars().any(|c| c.is_ascii_digit()) {
            return fail("TLD is not a registered top-level domain");
        }
        Ok(())
    }

    /// Full validation: syntax, then the CAA policy walk
    pub async fn validate(&self, domain: &str) -> CertsResult<()> {
        Self::validate_syntax(domain)?;

        let Some(lookup) = &self.caa_lookup else {
            trace!(domain = %domain, "CAA checking not wired, skipping");
            return Ok(());
        };
        if self.caa_domains.is_empty() {
            trace!(domain = %domain, "No CAA issuers configured, skipping check");
            return Ok(());
        }

        // DNS sees A-labels; the walk queries the ASCII tree.
        let ascii = to_ascii(domain)?;
        for suffix in suffix_walk(&ascii) {
            let records = match lookup.lookup_caa(&suffix).await {
                Ok(records) => records,
                Err(e) => {
                    // A broken level does not terminate the walk.
                    warn!(domain = %domain, suffix = %suffix, error = %e, "CAA lookup error, continuing walk");
                    continue;
                }
            };
            if records.is_empty() {
                continue;
            }

            debug!(domain = %domain, suffix = %suffix, count = records.len(), "CAA records found");

            let permitted = records.iter().any(|record| {
                record.tag == "issue" && self.caa_domains.contains(&record.value)
            });
            if permitted {
                return Ok(());
            }
            return Err(CertsError::CaaMismatch {
                domain: domain.to_string(),
                suffix,
            });
        }

        // No CAA anywhere in the tree: any CA may issue.
        Ok(())
    }
}

impl std::fmt::Debug for DomainValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainValidator")
            .field("caa_domains", &self.caa_domains)
            .field("has_lookup", &self.caa_lookup.is_some())
            .finish()
    }
}
