//! Network and naming constants.

/// Name of the control plane network every TLS-enabled NodeSet needs.
pub const CTLPLANE_NETWORK: &str = "ctlplane";

/// Maximum length of an RFC-1123 label (object names, volume names).
pub const DNS1123_LABEL_MAX_LENGTH: usize = 63;

/// Prefix length cap for the service part of an automation run name.
pub const RUN_NAME_SERVICE_PREFIX_MAX: usize = 53;

/// Cert content kind selecting DNS names as SANs.
pub const CERT_CONTENT_DNS_NAMES: &str = "dnsnames";

/// Cert content kind selecting IP addresses as SANs.
pub const CERT_CONTENT_IPS: &str = "ips";
