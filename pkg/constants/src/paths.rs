//! Filesystem path constants.

// ─── Operator ─────────────────────────────────────────────────────────────

/// Default config file path for the operator.
pub const DEFAULT_OPERATOR_CONFIG: &str = "/etc/dataplane-operator/config.yaml";

/// Default data directory for the state store.
pub const DEFAULT_DATA_DIR: &str = "/tmp/dataplane-operator-data";

/// Default directory holding the service catalog.
pub const DEFAULT_SERVICES_DIR: &str = "config/services";

/// Environment variable overriding the service catalog directory.
pub const SERVICES_DIR_ENV: &str = "OPERATOR_SERVICES";

// ─── Runner mounts ────────────────────────────────────────────────────────

/// Where a service's data sources are mounted inside the runner.
pub const CONFIG_PATHS: &str = "/var/lib/openstack/configs";

/// Where packed cert bundles are mounted inside the runner.
pub const CERT_PATHS: &str = "/var/lib/openstack/certs";

/// Where CA bundles are mounted inside the runner.
pub const CA_CERT_PATHS: &str = "/var/lib/openstack/cacerts";

/// Directory holding one SSH key per NodeSet inside the runner.
pub const SSH_KEY_DIR: &str = "/runner/env/ssh_key";

/// Directory holding one inventory per NodeSet inside the runner.
pub const INVENTORY_DIR: &str = "/runner/inventory";
