use super::{with_current_locals, ContinuationError};
use std::any::Any;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_KEY: AtomicU64 = AtomicU64::new(0);

/// A dynamically-scoped variable
///
/// Bindings live in the continuation context: a value set before a suspend is
/// visible after the resume, and a suspended [`super::Context`] exposes its
/// bindings for inspection and mutation in between.
pub struct Local<T> {
    key: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Clone + Send + Sync + 'static> Local<T> {
    pub fn new() -> Local<T> {
        Local {
            key: NEXT_KEY.fetch_add(1, Ordering::Relaxed),
            _marker: PhantomData,
        }
    }

    /// Read the binding in the continuation running on this thread
    pub fn get(&self) -> Result<Option<T>, ContinuationError> {
        with_current_locals(|bindings| {
            let bindings = bindings.ok_or(ContinuationError::LocalOutsideContinuation)?;
            Ok(bindings.get(self))
        })
    }

    /// Write the binding in the continuation running on this thread
    pub fn set(&self, value: T) -> Result<(), ContinuationError> {
        with_current_locals(|bindings| {
            let bindings = bindings.ok_or(ContinuationError::LocalOutsideContinuation)?;
            bindings.set(self, value);
            Ok(())
        })
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Local<T> {
    fn default() -> Local<T> {
        Local::new()
    }
}

/// Binding table carried by contexts between suspensions
#[derive(Clone, Default)]
pub(crate) struct LocalBindings {
    values: HashMap<u64, Arc<dyn Any + Send + Sync>>,
}

impl LocalBindings {
    pub fn new() -> LocalBindings {
        LocalBindings {
            values: HashMap::new(),
        }
    }

    pub fn get<T: Clone + 'static>(&self, local: &Local<T>) -> Option<T> {
        self.values
            .get(&local.key)
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
    }

    pub fn set<T: Clone + Send + Sync + 'static>(&mut self, local: &Local<T>, value: T) {
        self.values.insert(local.key, Arc::new(value));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::runtime::{Continuation, Task, TaskError};

    #[test]
    fn locals_require_a_continuation() {
        let local: Local<String> = Local::new();
        assert!(matches!(
            local.get(),
            Err(ContinuationError::LocalOutsideContinuation)
        ));
        assert!(matches!(
            local.set(String::from("x")),
            Err(ContinuationError::LocalOutsideContinuation)
        ));
    }

    #[test]
    fn locals_are_scoped_to_the_running_context() {
        use std::sync::Arc;

        let counter: Arc<Local<i32>> = Arc::new(Local::new());
        let other: Arc<Local<i32>> = Arc::new(Local::new());

        let task_counter = Arc::clone(&counter);
        let task_other = Arc::clone(&other);
        let task: Arc<dyn Task> = Arc::new(move || -> Result<(), TaskError> {
            assert_eq!(task_counter.get()?, None);
            task_counter.set(41)?;
            task_counter.set(42)?;
            assert_eq!(task_counter.get()?, Some(42));
            assert_eq!(task_other.get()?, None);
            Ok(())
        });

        let context = Continuation::perform(task).unwrap();
        assert!(context.is_succeeded().unwrap());
        assert_eq!(context.get(&counter), Some(42));
        assert_eq!(context.get(&other), None);
    }
}
