//! Bounded retry for optimistic directory updates

use std::collections::HashSet;
use std::future::Future;

use ctfs_core::{CtfsError, CtfsResult};

/// Run `op` with `state`. When it fails with an error `is_conflict` accepts,
/// let `resolve` produce the state for the next attempt, up to `retries`
/// extra attempts. The last conflict is returned once retries run out.
pub async fn retry_on_conflict<S, T, Op, OpFut, Resolve, ResolveFut>(
    retries: usize,
    initial: S,
    is_conflict: impl Fn(&CtfsError) -> bool,
    mut op: Op,
    mut resolve: Resolve,
) -> CtfsResult<T>
where
    S: Clone,
    Op: FnMut(S) -> OpFut,
    OpFut: Future<Output = CtfsResult<T>>,
    Resolve: FnMut(S) -> ResolveFut,
    ResolveFut: Future<Output = CtfsResult<S>>,
{
    let mut state = initial;
    let mut attempt = 0;
    loop {
        match op(state.clone()).await {
            Err(e) if is_conflict(&e) && attempt < retries => {
                attempt += 1;
                tracing::warn!(attempt, retries, error = %e, "conflicting update, retrying");
                state = resolve(state).await?;
            }
            other => return other,
        }
    }
}

/// First name of the form `stem[n].ext` not in `taken`.
pub fn disambiguate(name: &str, taken: &HashSet<String>) -> String {
    let (stem, ext) = match name.rfind('.') {
        Some(dot) if dot > 0 => name.split_at(dot),
        _ => (name, ""),
    };
    (1..)
        .map(|n| format!("{stem}[{n}]{ext}"))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctfs_core::{Location, MapKey, PublicKeyHash};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn conflict() -> CtfsError {
        CtfsError::CasConflict {
            location: Location::new(
                PublicKeyHash::random(),
                PublicKeyHash::random(),
                MapKey::random(),
            ),
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_conflicts() {
        let calls = AtomicUsize::new(0);
        let result = retry_on_conflict(
            2,
            0u32,
            CtfsError::is_retryable,
            |state| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(conflict())
                    } else {
                        Ok(state)
                    }
                }
            },
            |state| async move { Ok(state + 1) },
        )
        .await
        .unwrap();
        assert_eq!(result, 2, "each resolve advances the state");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_retries() {
        let calls = AtomicUsize::new(0);
        let err = retry_on_conflict(
            2,
            (),
            CtfsError::is_retryable,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(conflict()) }
            },
            |s| async move { Ok(s) },
        )
        .await
        .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let err = retry_on_conflict(
            5,
            (),
            CtfsError::is_retryable,
            |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CtfsError::structural("bad node")) }
            },
            |s| async move { Ok(s) },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CtfsError::Structural(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disambiguate() {
        let taken: HashSet<String> = ["a.txt", "a[1].txt"].into_iter().map(String::from).collect();
        assert_eq!(disambiguate("a.txt", &taken), "a[2].txt");
        assert_eq!(disambiguate("notes", &taken), "notes[1]");
        assert_eq!(disambiguate(".profile", &taken), ".profile[1]");
        assert_eq!(disambiguate("archive.tar.gz", &taken), "archive.tar[1].gz");
    }
}
