//! Fixed fan-out/fan-in join with per-unit bounded waits.
//!
//! Every unit runs concurrently on the current task (no spawning), each is
//! wrapped in its own [`tokio::time::timeout`], and the join waits for all of
//! them. A stuck unit can therefore delay the join by at most `per_unit`.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tracing::debug;

use crate::outcome::TaskOutcome;

/// Runs `op` for every key concurrently and collects a per-key outcome.
///
/// Duplicate keys are collapsed; the last result for a key wins. The join
/// itself never fails: errors and timeouts become [`TaskOutcome::Failed`] and
/// [`TaskOutcome::TimedOut`] entries.
pub async fn fan_out<K, T, E, F, Fut>(
    keys: impl IntoIterator<Item = K>,
    per_unit: Duration,
    op: F,
) -> BTreeMap<K, TaskOutcome<T>>
where
    K: Ord + Copy + Display,
    E: Display,
    F: Fn(K) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let futs = keys.into_iter().map(|key| {
        let unit = op(key);
        async move {
            let outcome = match tokio::time::timeout(per_unit, unit).await {
                Ok(result) => TaskOutcome::from(result),
                Err(_) => {
                    debug!(unit = %key, ?per_unit, "fan-out unit timed out");
                    TaskOutcome::TimedOut
                }
            };
            (key, outcome)
        }
    });

    join_all(futs).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let results = fan_out(vec![1u32, 2, 3], Duration::from_millis(100), |id| async move {
            if id == 2 {
                Err("bus read failed".to_string())
            } else {
                Ok(id)
            }
        })
        .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[&1], TaskOutcome::Done(1));
        assert_eq!(results[&2], TaskOutcome::Failed("bus read failed".to_string()));
        assert_eq!(results[&3], TaskOutcome::Done(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_unit_times_out_without_blocking_others() {
        let results = fan_out(vec![0u32, 1], Duration::from_secs(1), |id| async move {
            if id == 0 {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            Ok::<_, String>(id)
        })
        .await;

        assert_eq!(results[&0], TaskOutcome::TimedOut);
        assert_eq!(results[&1], TaskOutcome::Done(1));
    }

    #[tokio::test]
    async fn test_units_run_concurrently() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = fan_out(0u32..8, Duration::from_secs(1), |_| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, String>(())
            }
        })
        .await;

        assert_eq!(results.len(), 8);
        assert!(peak.load(Ordering::SeqCst) > 1);
    }

    #[tokio::test]
    async fn test_empty_key_set() {
        let results = fan_out(Vec::<u32>::new(), Duration::from_millis(10), |id| async move {
            Ok::<_, String>(id)
        })
        .await;
        assert!(results.is_empty());
    }
}
