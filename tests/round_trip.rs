//! Suspend/resume round trips driven through the dispatch protocol
//!
//! The tasks here follow the same shape rewritten bytecode has: read the
//! dispatch target on entry, restore from a saved frame when resuming, and
//! after every suspendable call check for suspension, save the live values,
//! and return.

use classflow::runtime::{Continuation, ContinuationError, Local, SavedFrame, Task, TaskError, Value};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

/// Stores the loop counter, then suspends; ten times in a row
struct CounterTask {
    counter: AtomicI32,
}

impl CounterTask {
    fn set_counter_and_suspend(&self, counter: i32) -> Result<(), TaskError> {
        if Continuation::dispatch_target()? == 0 {
            self.counter.store(counter, Ordering::SeqCst);
        } else {
            let _frame = Continuation::pop_frame()?;
        }
        Continuation::suspend()?;
        if Continuation::is_suspending()? {
            // Nothing is live here; register ourselves as the receiver for
            // the caller's frame
            Continuation::push_frame(SavedFrame::new(1, vec![]), Some(Value::reference(())))?;
        }
        Ok(())
    }
}

impl Task for CounterTask {
    fn perform(&self) -> Result<(), TaskError> {
        let mut i = 0;
        let mut reentering = false;
        if Continuation::dispatch_target()? == 1 {
            let frame = Continuation::pop_frame()?;
            i = frame.slots[0].as_int().expect("saved loop counter");
            reentering = true;
        }
        while reentering || i < 10 {
            reentering = false;
            self.set_counter_and_suspend(i)?;
            if Continuation::is_suspending()? {
                let frame = SavedFrame::new(1, vec![Value::Int(i), Value::Null])
                    .with_receiver_slot(1);
                Continuation::push_frame(frame, None)?;
                return Ok(());
            }
            i += 1;
        }
        Ok(())
    }
}

#[test]
fn ten_suspensions_yield_counters_in_order() {
    let task = Arc::new(CounterTask {
        counter: AtomicI32::new(-1),
    });

    let mut context = Continuation::perform(task.clone() as Arc<dyn Task>).unwrap();
    for expected in 0..10 {
        assert!(!context.is_finished(), "counter {} should suspend", expected);
        assert_eq!(task.counter.load(Ordering::SeqCst), expected);
        context = Continuation::resume(context).unwrap();
    }
    assert!(context.is_finished());
    assert!(context.is_succeeded().unwrap());
}

#[test]
fn dynamic_variables_survive_suspension() {
    let local: Arc<Local<String>> = Arc::new(Local::new());

    struct LocalTask {
        local: Arc<Local<String>>,
    }

    impl Task for LocalTask {
        fn perform(&self) -> Result<(), TaskError> {
            if Continuation::dispatch_target()? == 1 {
                let _frame = Continuation::pop_frame()?;
                Continuation::suspend()?;
                // Rebound from the outside while we were suspended
                assert_eq!(self.local.get()?.as_deref(), Some("val2"));
                self.local.set(String::from("val3"))?;
                return Ok(());
            }

            assert_eq!(self.local.get()?, None);
            self.local.set(String::from("val1"))?;
            assert_eq!(self.local.get()?.as_deref(), Some("val1"));

            Continuation::suspend()?;
            if Continuation::is_suspending()? {
                Continuation::push_frame(SavedFrame::new(1, vec![]), None)?;
            }
            Ok(())
        }
    }

    let task = Arc::new(LocalTask {
        local: Arc::clone(&local),
    });

    let mut context = Continuation::perform(task as Arc<dyn Task>).unwrap();
    assert!(!context.is_finished());
    assert_eq!(context.get(&local).as_deref(), Some("val1"));

    context.set(&local, String::from("val2"));
    assert_eq!(context.get(&local).as_deref(), Some("val2"));

    let context = Continuation::resume(context).unwrap();
    assert!(context.is_finished());
    assert!(context.is_succeeded().unwrap());
    assert_eq!(context.get(&local).as_deref(), Some("val3"));
}

#[test]
fn failures_after_resume_are_captured() {
    struct FailingTask;

    impl Task for FailingTask {
        fn perform(&self) -> Result<(), TaskError> {
            if Continuation::dispatch_target()? == 1 {
                let _frame = Continuation::pop_frame()?;
                Continuation::suspend()?;
                return Err("exploded after resume".into());
            }
            Continuation::suspend()?;
            if Continuation::is_suspending()? {
                Continuation::push_frame(SavedFrame::new(1, vec![]), None)?;
            }
            Ok(())
        }
    }

    let context = Continuation::perform(Arc::new(FailingTask) as Arc<dyn Task>).unwrap();
    assert!(!context.is_finished());

    let context = Continuation::resume(context).unwrap();
    assert!(context.is_finished());
    assert!(!context.is_succeeded().unwrap());
    assert_eq!(context.error().unwrap().to_string(), "exploded after resume");
}

#[test]
fn long_values_round_trip_through_saved_frames() {
    struct SumTask {
        total: Arc<AtomicI32>,
    }

    impl Task for SumTask {
        fn perform(&self) -> Result<(), TaskError> {
            let mut accumulator: i64 = 1;
            if Continuation::dispatch_target()? == 1 {
                let frame = Continuation::pop_frame()?;
                accumulator = frame.slots[0].as_long().expect("saved accumulator");
                Continuation::suspend()?;
            } else {
                accumulator *= 41;
                Continuation::suspend()?;
                if Continuation::is_suspending()? {
                    let frame = SavedFrame::new(1, vec![Value::Long(accumulator)]);
                    Continuation::push_frame(frame, None)?;
                    return Ok(());
                }
            }
            self.total.store(accumulator as i32 + 1, Ordering::SeqCst);
            Ok(())
        }
    }

    let total = Arc::new(AtomicI32::new(0));
    let task = Arc::new(SumTask {
        total: Arc::clone(&total),
    });

    let context = Continuation::perform(task as Arc<dyn Task>).unwrap();
    assert!(!context.is_finished());
    assert_eq!(total.load(Ordering::SeqCst), 0);

    let context = Continuation::resume(context).unwrap();
    assert!(context.is_succeeded().unwrap());
    assert_eq!(total.load(Ordering::SeqCst), 42);
}

#[test]
fn contexts_move_between_threads() {
    struct HopTask;

    impl Task for HopTask {
        fn perform(&self) -> Result<(), TaskError> {
            if Continuation::dispatch_target()? == 1 {
                let _frame = Continuation::pop_frame()?;
                Continuation::suspend()?;
                return Ok(());
            }
            Continuation::suspend()?;
            if Continuation::is_suspending()? {
                Continuation::push_frame(SavedFrame::new(1, vec![]), None)?;
            }
            Ok(())
        }
    }

    let context = Continuation::perform(Arc::new(HopTask) as Arc<dyn Task>).unwrap();
    assert!(!context.is_finished());

    // A suspended context is an inert value; another thread may resume it
    let handle = std::thread::spawn(move || Continuation::resume(context).unwrap());
    let context = handle.join().unwrap();
    assert!(context.is_succeeded().unwrap());
}

#[test]
fn suspend_requires_a_continuation() {
    assert!(matches!(
        Continuation::suspend(),
        Err(ContinuationError::SuspendOutsideContinuation)
    ));
}
