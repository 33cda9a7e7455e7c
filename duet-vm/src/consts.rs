//! Engine-wide constants.

/// Largest blob the engine will reason about or emit, in bytes.
///
/// The symbolic `size` global is constrained to `[0, BLOB_SIZE_MAX]` at
/// session start; guest accesses that cannot be proven below this bound are
/// fatal.
pub const BLOB_SIZE_MAX: u64 = 1024;

/// Capacity of the translation-block cache.
///
/// The cache is append-only during a run; hitting capacity is fatal rather
/// than evicting, since a re-parse path would silently lose coverage.
pub const BLOCK_CACHE_CAPACITY: usize = 1 << 24;

/// Sanity envelope around the CPU-state base: a derived host address must
/// land within `env_base ± ENV_WINDOW`.
pub const ENV_WINDOW: u64 = 0x4000;

/// Bit of a coverage item that records the evaluated branch direction.
pub const COV_EVAL_BIT: u32 = 48;

/// File name of the persisted coverage database inside the output directory.
pub const COVERAGE_FILE: &str = "coverage";

/// Environment variable naming the textual IR trace file.
pub const TRACE_ENV: &str = "QCE_TRACE";

/// Environment variable that runs the internal check suite on the first
/// traced block and exits.
pub const CHECK_ENV: &str = "QCE_CHECK";
