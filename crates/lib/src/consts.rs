//! Crate-wide constants.

/// Application name used for directory layout.
pub const APP_NAME: &str = "cellar";

/// Length of the truncated object hash used for record file names.
pub const OBJ_HASH_PREFIX_LEN: usize = 20;

/// Environment variable overriding the store root.
pub const ROOT_ENV: &str = "CELLAR_ROOT";

/// `SOURCE_DATE_EPOCH` exported to every step (1980-01-01, the ZIP epoch).
pub const SOURCE_DATE_EPOCH: &str = "315532800";

/// Default PATH tail appended after dependency `bin` directories.
pub const DEFAULT_SYSTEM_PATH: &str = "/usr/bin:/bin:/usr/sbin:/sbin";

/// Version string used by head-only formulae.
pub const HEAD_VERSION: &str = "HEAD";
