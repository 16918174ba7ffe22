//! Deadline-bounded execution of probe work.
//!
//! Every probe runs on its own tokio task so a hang or a panic stays inside
//! that task. The caller races the task against a timer and gets either the
//! probe's own result or a [`ProbeError::Timeout`].

use crate::error::ProbeError;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time;
use tracing::warn;

/// What happens to a unit of work that loses the race against its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Abandon {
    /// Leave the task running unobserved. Used for in-process computation,
    /// which has no safe interruption point.
    Detach,
    /// Abort the task. Anything it owns is dropped, so a child process
    /// spawned with `kill_on_drop` is killed.
    Abort,
}

pub async fn run_bounded<F, T>(
    probe: &'static str,
    deadline: Duration,
    abandon: Abandon,
    work: F,
) -> Result<T, ProbeError>
where
    F: Future<Output = Result<T, ProbeError>> + Send + 'static,
    T: Send + 'static,
{
    if deadline.is_zero() {
        return Err(timed_out(probe, deadline));
    }

    let mut handle = tokio::spawn(work);
    match time::timeout(deadline, &mut handle).await {
        Ok(joined) => flatten(probe, joined),
        Err(_elapsed) => {
            if abandon == Abandon::Abort {
                handle.abort();
            }
            Err(timed_out(probe, deadline))
        }
    }
}

/// Bounded variant for synchronous provider calls. The closure runs on the
/// blocking pool and cannot be interrupted, so on timeout it is detached.
pub async fn run_blocking_bounded<F, T>(
    probe: &'static str,
    deadline: Duration,
    work: F,
) -> Result<T, ProbeError>
where
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
    T: Send + 'static,
{
    if deadline.is_zero() {
        return Err(timed_out(probe, deadline));
    }

    let handle = tokio::task::spawn_blocking(work);
    match time::timeout(deadline, handle).await {
        Ok(joined) => flatten(probe, joined),
        Err(_elapsed) => Err(timed_out(probe, deadline)),
    }
}

/// Runs a synchronous call off the async workers without a deadline. The
/// call is still isolated: a panic comes back as [`ProbeError::Panicked`].
pub async fn run_isolated_blocking<F, T>(probe: &'static str, work: F) -> Result<T, ProbeError>
where
    F: FnOnce() -> Result<T, ProbeError> + Send + 'static,
    T: Send + 'static,
{
    flatten(probe, tokio::task::spawn_blocking(work).await)
}

fn flatten<T>(
    probe: &'static str,
    joined: Result<Result<T, ProbeError>, JoinError>,
) -> Result<T, ProbeError> {
    match joined {
        Ok(result) => result,
        Err(err) => Err(ProbeError::Panicked {
            probe,
            reason: join_error_reason(err),
        }),
    }
}

fn join_error_reason(err: JoinError) -> String {
    if err.is_cancelled() {
        return "task cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}

fn timed_out(probe: &'static str, after: Duration) -> ProbeError {
    warn!(
        probe,
        timeout = %humantime::format_duration(after),
        "probe timed out, leaving previous values"
    );
    ProbeError::Timeout { probe, after }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[tokio::test]
    async fn returns_result_when_work_finishes_in_time() {
        let out = run_bounded("test", Duration::from_secs(1), Abandon::Detach, async {
            Ok::<_, ProbeError>(42)
        })
        .await;
        assert_eq!(out.unwrap(), 42);
    }

    #[tokio::test]
    async fn propagates_internal_failure() {
        let out: Result<u32, _> =
            run_bounded("test", Duration::from_secs(1), Abandon::Detach, async {
                Err(ProbeError::failed("test", "no such file"))
            })
            .await;
        assert!(matches!(out, Err(ProbeError::Failed { .. })));
    }

    #[tokio::test]
    async fn times_out_slow_work() {
        let start = Instant::now();
        let out = run_bounded("slow", Duration::from_millis(50), Abandon::Detach, async {
            time::sleep(Duration::from_secs(5)).await;
            Ok::<_, ProbeError>(())
        })
        .await;
        assert!(out.unwrap_err().is_timeout());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn zero_deadline_fails_without_running_work() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let out = run_bounded("zero", Duration::ZERO, Abandon::Detach, async move {
            flag.store(true, Ordering::SeqCst);
            Ok::<_, ProbeError>(())
        })
        .await;
        assert!(out.unwrap_err().is_timeout());
        tokio::task::yield_now().await;
        assert!(!ran.load(Ordering::SeqCst));

        let blocking = run_blocking_bounded("zero", Duration::ZERO, || Ok::<_, ProbeError>(1)).await;
        assert!(blocking.unwrap_err().is_timeout());
    }

    #[tokio::test]
    async fn panicking_work_is_isolated() {
        let out: Result<(), _> =
            run_bounded("boom", Duration::from_secs(1), Abandon::Detach, async {
                if true {
                    panic!("sensor exploded");
                }
                Ok::<(), ProbeError>(())
            })
            .await;
        match out {
            Err(ProbeError::Panicked { probe, reason }) => {
                assert_eq!(probe, "boom");
                assert!(reason.contains("sensor exploded"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }

        let blocking = run_isolated_blocking("boom", || {
            if true {
                panic!("disk gone");
            }
            Ok::<(), ProbeError>(())
        })
        .await;
        assert!(matches!(blocking, Err(ProbeError::Panicked { .. })));
    }

    #[tokio::test]
    async fn detached_work_keeps_running_after_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let out = run_bounded("detach", Duration::from_millis(20), Abandon::Detach, async move {
            time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, ProbeError>(())
        })
        .await;
        assert!(out.unwrap_err().is_timeout());
        time::sleep(Duration::from_millis(300)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn aborted_work_stops_after_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let out = run_bounded("abort", Duration::from_millis(20), Abandon::Abort, async move {
            time::sleep(Duration::from_millis(100)).await;
            flag.store(true, Ordering::SeqCst);
            Ok::<_, ProbeError>(())
        })
        .await;
        assert!(out.unwrap_err().is_timeout());
        time::sleep(Duration::from_millis(300)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn blocking_work_times_out() {
        let start = Instant::now();
        let out = run_blocking_bounded("sleepy", Duration::from_millis(50), || {
            std::thread::sleep(Duration::from_millis(400));
            Ok::<_, ProbeError>(())
        })
        .await;
        assert!(out.unwrap_err().is_timeout());
        assert!(start.elapsed() < Duration::from_millis(350));
    }
}
