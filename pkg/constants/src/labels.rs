//! Label keys stamped on objects the operator creates.

/// NodeSet owning a cert secret.
pub const NODESET: &str = "osdpns";

/// Service a cert secret was issued for.
pub const SERVICE: &str = "osdp-service";

/// Cert key (entry of a service's `tlsCerts`) a cert secret was issued for.
pub const SERVICE_CERT_KEY: &str = "osdp-service-cert-key";

/// Hostname a cert secret was issued for.
pub const HOSTNAME: &str = "hostname";

/// Total number of bundles for a packed cert secret.
pub const NUMBER_OF_SECRETS: &str = "numberOfSecrets";

/// Position of a bundle within its packed set.
pub const SECRET_NUMBER: &str = "secretNumber";

// ─── Automation runs ──────────────────────────────────────────────────────

pub const RUN_SERVICE: &str = "openstackdataplaneservice";
pub const RUN_DEPLOYMENT: &str = "openstackdataplanedeployment";
pub const RUN_NODESET: &str = "openstackdataplanenodeset";

// ─── Inventory ────────────────────────────────────────────────────────────

pub const OPERATOR_NAME: &str = "openstack.org/operator-name";
pub const OPERATOR_NAME_VALUE: &str = "dataplane";
pub const INVENTORY: &str = "inventory";

/// Label selecting the default internal root CA issuer.
pub const ROOT_CA_ISSUER_INTERNAL: &str = "osp-rootca-issuer-internal";

/// Label linking IPSet / DNSData / BaremetalSet records to their NodeSet.
pub const RESERVATION_NODESET: &str = "nodeset";
