//! Export constants and small derivation helpers.

use std::time::Duration;

/// Default directory export files are written to.
pub const C_DIR_EXPORT_DEFAULT: &str = "/share/storage/export/";
/// Default rows per sheet (paged mode page size, streaming rollover threshold).
pub const N_SIZE_PAGE_DEFAULT: usize = 50_000;
/// Default records pulled from a cursor per batch.
pub const N_SIZE_BATCH_CURSOR_DEFAULT: usize = 1_000;
/// Default lifetime of an owner's task group in the progress store.
pub const N_TTL_TASK_SECS_DEFAULT: u64 = 86_500;
/// Progress store group prefix; the owner id is appended.
pub const C_TASK_GROUP_PREFIX: &str = "user:export:task:";
/// Extension of generated export files.
pub const C_EXPORT_FILE_EXT: &str = "xlsx";

pub fn derive_ttl_task_default() -> Duration {
    Duration::from_secs(N_TTL_TASK_SECS_DEFAULT)
}

/// Progress store group key of one owner.
pub fn derive_task_group(owner: &str) -> String {
    format!("{C_TASK_GROUP_PREFIX}{owner}")
}

/// `<name>-<millis>.xlsx`, with path separators in `name` replaced.
pub fn derive_export_file_name(name: &str, ts_created_ms: i64) -> String {
    let c_name: String = name
        .trim()
        .chars()
        .map(|chr| if matches!(chr, '/' | '\\') { '_' } else { chr })
        .collect();
    format!("{c_name}-{ts_created_ms}.{C_EXPORT_FILE_EXT}")
}

/// Worker thread count for the export pool.
///
/// `Some(n)` is clamped into `[1, cpus]`; `None` uses `min(cpus, 8)`.
pub(crate) fn calculate_worker_limit(num_workers_max: Option<usize>) -> usize {
    let n_cpu = std::thread::available_parallelism()
        .map(|v| v.get())
        .unwrap_or(1);

    match num_workers_max {
        Some(n) => n.clamp(1, n_cpu),
        None => n_cpu.clamp(1, 8),
    }
}
