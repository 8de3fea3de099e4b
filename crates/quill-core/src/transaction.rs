use crate::error::CoreError;

/// Transaction boundary around store mutations that must land together.
///
/// Implementations commit when `work` returns `Ok` and roll back otherwise.
pub trait TransactionContext: Send + Sync {
    fn execute(&self, work: &mut dyn FnMut() -> Result<(), CoreError>) -> Result<(), CoreError>;
}

/// Runs work directly. Suitable for in-memory stores.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransactionContext;

impl TransactionContext for NoopTransactionContext {
    fn execute(&self, work: &mut dyn FnMut() -> Result<(), CoreError>) -> Result<(), CoreError> {
        work()
    }
}

/// Run a value-returning closure inside `tx`.
pub fn in_transaction<T>(
    tx: &dyn TransactionContext,
    work: impl FnOnce() -> Result<T, CoreError>,
) -> Result<T, CoreError> {
    let mut work = Some(work);
    let mut output = None;
    tx.execute(&mut || {
        let body = work
            .take()
            .ok_or_else(|| CoreError::Transient("transaction body invoked more than once".into()))?;
        output = Some(body()?);
        Ok(())
    })?;
    output.ok_or_else(|| CoreError::Transient("transaction finished without running its body".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SkippingContext;

    impl TransactionContext for SkippingContext {
        fn execute(&self, _work: &mut dyn FnMut() -> Result<(), CoreError>) -> Result<(), CoreError> {
            Ok(())
        }
    }

    #[test]
    fn test_noop_runs_body() {
        let value = in_transaction(&NoopTransactionContext, || Ok(41 + 1)).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_error_propagates() {
        let result: Result<(), _> =
            in_transaction(&NoopTransactionContext, || Err(CoreError::Validation("nope".into())));
        assert_eq!(result, Err(CoreError::Validation("nope".into())));
    }

    #[test]
    fn test_body_not_run_is_reported() {
        let result = in_transaction(&SkippingContext, || Ok(1));
        assert!(matches!(result, Err(CoreError::Transient(_))));
    }
}
