//! State store and reconcile timing constants.

/// Root prefix for every stored object.
pub const REGISTRY_PREFIX: &str = "/registry/";

/// Default requeue interval for a Deployment, in seconds.
pub const DEFAULT_REQUEUE_SECS: u64 = 15;

/// Requeue interval used after cheap existence checks (secrets, cert bundles).
pub const SHORT_REQUEUE_SECS: u64 = 5;

/// Default interval between full resyncs of every NodeSet and Deployment.
pub const DEFAULT_RESYNC_SECS: u64 = 30;

/// Default number of reconcile workers.
pub const DEFAULT_WORKERS: usize = 4;

/// Bounded attempts for a reread-and-write status update.
pub const STATUS_UPDATE_ATTEMPTS: u32 = 5;

/// Events a watch subscriber may fall behind before it has to resync.
pub const EVENT_LOG_CAPACITY: usize = 4096;

/// Default upper bound on a packed certificate secret, in bytes.
pub const DEFAULT_SECRET_MAX_SIZE: usize = 1_048_576;

/// Default failed-attempt budget of an automation run.
pub const DEFAULT_BACKOFF_LIMIT: u32 = 6;

/// Service type whose successful run records the deployed version on a NodeSet.
pub const UPDATE_SERVICE_TYPE: &str = "update";

/// Ansible user defaulted onto pre-provisioned NodeSets.
pub const DEFAULT_ANSIBLE_USER: &str = "cloud-admin";
