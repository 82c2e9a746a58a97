use rayon::ThreadPoolBuilder;

use crate::error::ForestError;

/// Run `op` on a dedicated pool of `num_threads` workers.
///
/// `0` runs on rayon's global pool instead of building a new one.
pub(crate) fn install<T, F>(num_threads: usize, op: F) -> Result<T, ForestError>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    if num_threads == 0 {
        return Ok(op());
    }
    let pool = ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
        .map_err(|source| ForestError::ThreadPool {
            num_threads,
            source,
        })?;
    Ok(pool.install(op))
}

#[cfg(test)]
mod tests {
    use super::install;

    #[test]
    fn dedicated_pool_has_requested_size() {
        let n = install(3, rayon::current_num_threads).unwrap();
        assert_eq!(n, 3);
    }

    #[test]
    fn zero_uses_global_pool() {
        let n = install(0, rayon::current_num_threads).unwrap();
        assert_eq!(n, rayon::current_num_threads());
    }
}
