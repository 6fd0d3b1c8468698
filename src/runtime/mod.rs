//! Continuation runtime: the thread-bound suspend/resume protocol that
//! rewritten methods call into
//!
//! A continuation runs inside [`Continuation::perform`]. While it runs, a
//! per-thread context tracks whether the call chain is running normally,
//! unwinding into a suspension (each instrumented frame saving its live
//! values and returning), or rewinding out of a resumption (each frame
//! consuming one saved record and jumping back to its call site). The outcome
//! of every `perform`/`resume` is an immutable [`Context`] value.

mod local;

pub use local::Local;
pub(crate) use local::LocalBindings;

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

/// Failure carried out of a task into a failed [`Context`]
pub type TaskError = Box<dyn std::error::Error + Send + Sync>;

/// A suspendable unit of work
///
/// The same task object is re-invoked on every resume; its call chain
/// re-executes top-down and each instrumented frame consumes one saved
/// record until execution proceeds past the innermost suspension point.
pub trait Task: Send + Sync {
    fn perform(&self) -> Result<(), TaskError>;
}

impl<F> Task for F
where
    F: Fn() -> Result<(), TaskError> + Send + Sync,
{
    fn perform(&self) -> Result<(), TaskError> {
        self()
    }
}

/// One word-sized runtime value saved across a suspension
#[derive(Clone)]
pub enum Value {
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Null,
    Ref(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn reference<T: Send + Sync + 'static>(value: T) -> Value {
        Value::Ref(Arc::new(value))
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            Value::Float(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            Value::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// Borrow the referenced value, if this is a reference of that type
    pub fn as_ref_of<T: 'static>(&self) -> Option<&T> {
        match self {
            Value::Ref(any) => any.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(value) => write!(f, "int {}", value),
            Value::Float(value) => write!(f, "float {}", value),
            Value::Long(value) => write!(f, "long {}", value),
            Value::Double(value) => write!(f, "double {}", value),
            Value::Null => write!(f, "null"),
            Value::Ref(_) => write!(f, "ref"),
        }
    }
}

/// The live values of one instrumented frame, captured at its pointcut
///
/// `slots` are in the canonical field order of the frame's saved-record type.
/// `receiver_slot` marks which slot holds the receiver of the call the frame
/// made; it is filled in by the runtime from the callee's own registration,
/// never from the operand stack (the stack copy was consumed by the call).
#[derive(Clone, Debug)]
pub struct SavedFrame {
    pub pointcut: u32,
    pub slots: Vec<Value>,
    pub receiver_slot: Option<usize>,
}

impl SavedFrame {
    pub fn new(pointcut: u32, slots: Vec<Value>) -> SavedFrame {
        SavedFrame {
            pointcut,
            slots,
            receiver_slot: None,
        }
    }

    pub fn with_receiver_slot(mut self, slot: usize) -> SavedFrame {
        self.receiver_slot = Some(slot);
        self
    }
}

/// Where a thread-bound continuation context currently is
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum Status {
    Running,
    Suspending,
    Resuming,
}

/// Runtime state errors: contract violations at the suspend/resume surface
#[derive(Debug)]
pub enum ContinuationError {
    /// `suspend` was called with no active continuation on this thread
    SuspendOutsideContinuation,

    /// A dynamic variable was touched with no active continuation
    LocalOutsideContinuation,

    /// The thread context was in the wrong state for the requested operation
    InvalidStatus { expected: &'static str, actual: Status },

    /// A finished context cannot be resumed
    ResumeFinished,

    /// The context has not finished; its outcome cannot be inspected yet
    ContextNotFinished,

    /// The context finished successfully; there is no captured error
    ContextSucceeded,

    /// A frame with a receiver slot was pushed but no callee registered one
    MissingReceiver,

    /// A frame without a receiver slot was pushed while a receiver is pending
    UnexpectedReceiver,

    /// The resuming context ran out of saved frames
    NoSavedFrames,
}

impl fmt::Display for ContinuationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContinuationError::SuspendOutsideContinuation => {
                write!(f, "suspend called outside of a continuation")
            }
            ContinuationError::LocalOutsideContinuation => {
                write!(f, "dynamic variable used outside of a continuation")
            }
            ContinuationError::InvalidStatus { expected, actual } => {
                write!(f, "invalid context status {:?}, expected {}", actual, expected)
            }
            ContinuationError::ResumeFinished => {
                write!(f, "trying to resume an already finished context")
            }
            ContinuationError::ContextNotFinished => write!(f, "context is not finished"),
            ContinuationError::ContextSucceeded => {
                write!(f, "context finished successfully, no error was captured")
            }
            ContinuationError::MissingReceiver => {
                write!(f, "saved frame expects a receiver but none was registered")
            }
            ContinuationError::UnexpectedReceiver => {
                write!(f, "a receiver is pending but the saved frame has no slot for it")
            }
            ContinuationError::NoSavedFrames => {
                write!(f, "resuming context has no saved frames left")
            }
        }
    }
}

impl std::error::Error for ContinuationError {}

enum Outcome {
    Succeeded,
    Failed(TaskError),
    Suspended {
        frames: Vec<SavedFrame>,
        task: Arc<dyn Task>,
    },
}

/// Immutable outcome of a `perform` or `resume`
///
/// Either finished (succeeded or failed) or suspended. A suspended context is
/// resumed at most once: [`Continuation::resume`] takes it by value.
pub struct Context {
    outcome: Outcome,
    locals: LocalBindings,
}

impl Context {
    pub fn is_finished(&self) -> bool {
        !matches!(self.outcome, Outcome::Suspended { .. })
    }

    /// Did the task finish successfully?
    ///
    /// Asking before the context is finished is a state error.
    pub fn is_succeeded(&self) -> Result<bool, ContinuationError> {
        match &self.outcome {
            Outcome::Suspended { .. } => Err(ContinuationError::ContextNotFinished),
            Outcome::Succeeded => Ok(true),
            Outcome::Failed(_) => Ok(false),
        }
    }

    /// The captured task failure
    pub fn error(&self) -> Result<&TaskError, ContinuationError> {
        match &self.outcome {
            Outcome::Suspended { .. } => Err(ContinuationError::ContextNotFinished),
            Outcome::Succeeded => Err(ContinuationError::ContextSucceeded),
            Outcome::Failed(error) => Ok(error),
        }
    }

    /// Read a dynamic-variable binding captured in this context
    pub fn get<T: Clone + Send + Sync + 'static>(&self, local: &Local<T>) -> Option<T> {
        self.locals.get(local)
    }

    /// Rebind a dynamic variable before resuming
    pub fn set<T: Clone + Send + Sync + 'static>(&mut self, local: &Local<T>, value: T) {
        self.locals.set(local, value);
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            Outcome::Succeeded => write!(f, "Context::Succeeded"),
            Outcome::Failed(error) => write!(f, "Context::Failed({})", error),
            Outcome::Suspended { frames, .. } => {
                write!(f, "Context::Suspended({} frames)", frames.len())
            }
        }
    }
}

struct ThreadContext {
    status: Status,
    saved_frames: Vec<SavedFrame>,
    next_receiver: Option<Value>,
    locals: LocalBindings,
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ThreadContext>> = RefCell::new(Vec::new());
}

fn with_current<R>(f: impl FnOnce(Option<&mut ThreadContext>) -> R) -> R {
    CONTEXT_STACK.with(|stack| f(stack.borrow_mut().last_mut()))
}

pub(crate) fn with_current_locals<R>(f: impl FnOnce(Option<&mut LocalBindings>) -> R) -> R {
    with_current(|context| f(context.map(|context| &mut context.locals)))
}

/// The suspend/resume entry points
///
/// These mirror the static surface the rewritten bytecode links against:
/// [`Continuation::perform`] / [`Continuation::resume`] / [`Continuation::suspend`]
/// for user code, and the dispatch protocol
/// ([`Continuation::dispatch_target`], [`Continuation::is_suspending`],
/// [`Continuation::pop_frame`], [`Continuation::push_frame`]) for
/// instrumented frames.
pub struct Continuation;

impl Continuation {
    /// Run a task until it finishes or suspends
    pub fn perform(task: Arc<dyn Task>) -> Result<Context, ContinuationError> {
        let context = ThreadContext {
            status: Status::Running,
            saved_frames: vec![],
            next_receiver: None,
            locals: LocalBindings::new(),
        };
        Self::perform_with(context, task)
    }

    /// Resume a suspended context, consuming it
    pub fn resume(context: Context) -> Result<Context, ContinuationError> {
        match context.outcome {
            Outcome::Suspended { frames, task } => {
                let thread_context = ThreadContext {
                    status: Status::Resuming,
                    saved_frames: frames,
                    next_receiver: None,
                    locals: context.locals,
                };
                Self::perform_with(thread_context, task)
            }
            _ => Err(ContinuationError::ResumeFinished),
        }
    }

    /// Suspend the continuation running on this thread
    ///
    /// On the way out (`Running`) this starts collecting saved frames; when
    /// re-executed on the way back in (`Resuming`) it flips the context back
    /// to `Running` and execution proceeds as fresh code.
    pub fn suspend() -> Result<(), ContinuationError> {
        with_current(|context| {
            let context = context.ok_or(ContinuationError::SuspendOutsideContinuation)?;
            match context.status {
                Status::Running => {
                    context.status = Status::Suspending;
                    context.saved_frames.clear();
                    context.next_receiver = None;
                    Ok(())
                }
                Status::Resuming => {
                    context.status = Status::Running;
                    context.saved_frames.clear();
                    Ok(())
                }
                Status::Suspending => Err(ContinuationError::InvalidStatus {
                    expected: "running or resuming",
                    actual: Status::Suspending,
                }),
            }
        })
    }

    /// The dispatch number a method should resume at: 0 when starting fresh,
    /// else the pointcut number of the next saved frame
    pub fn dispatch_target() -> Result<u32, ContinuationError> {
        with_current(|context| {
            let context = match context {
                None => return Ok(0),
                Some(context) => context,
            };
            match context.status {
                Status::Running => Ok(0),
                Status::Resuming => context
                    .saved_frames
                    .last()
                    .map(|frame| frame.pointcut)
                    .ok_or(ContinuationError::NoSavedFrames),
                Status::Suspending => Err(ContinuationError::InvalidStatus {
                    expected: "running or resuming",
                    actual: Status::Suspending,
                }),
            }
        })
    }

    /// After a pointcut call returns: is the continuation suspending?
    pub fn is_suspending() -> Result<bool, ContinuationError> {
        with_current(|context| {
            let context = match context {
                None => return Ok(false),
                Some(context) => context,
            };
            match context.status {
                Status::Running => Ok(false),
                Status::Suspending => Ok(true),
                Status::Resuming => Err(ContinuationError::InvalidStatus {
                    expected: "running or suspending",
                    actual: Status::Resuming,
                }),
            }
        })
    }

    /// Take the next saved frame while resuming (LIFO, innermost first)
    pub fn pop_frame() -> Result<SavedFrame, ContinuationError> {
        with_current(|context| {
            let context = context.ok_or(ContinuationError::SuspendOutsideContinuation)?;
            if context.status != Status::Resuming {
                return Err(ContinuationError::InvalidStatus {
                    expected: "resuming",
                    actual: context.status,
                });
            }
            context
                .saved_frames
                .pop()
                .ok_or(ContinuationError::NoSavedFrames)
        })
    }

    /// Register this frame's saved record while suspending
    ///
    /// The record's receiver slot (if any) is filled with the receiver the
    /// callee registered on its way out; `current_receiver` (the `this` of
    /// the frame being saved, or `None` in a static method) is left for the
    /// caller one level up.
    pub fn push_frame(
        mut frame: SavedFrame,
        current_receiver: Option<Value>,
    ) -> Result<(), ContinuationError> {
        with_current(|context| {
            let context = context.ok_or(ContinuationError::SuspendOutsideContinuation)?;
            if context.status != Status::Suspending {
                return Err(ContinuationError::InvalidStatus {
                    expected: "suspending",
                    actual: context.status,
                });
            }
            match frame.receiver_slot {
                Some(slot) => {
                    let receiver = context
                        .next_receiver
                        .take()
                        .ok_or(ContinuationError::MissingReceiver)?;
                    frame.slots[slot] = receiver;
                }
                None => {
                    if context.next_receiver.is_some() {
                        return Err(ContinuationError::UnexpectedReceiver);
                    }
                }
            }
            context.next_receiver = current_receiver;
            context.saved_frames.push(frame);
            Ok(())
        })
    }

    // private methods

    fn perform_with(
        context: ThreadContext,
        task: Arc<dyn Task>,
    ) -> Result<Context, ContinuationError> {
        // The guard keeps the stack balanced if the task panics
        struct PopGuard;
        impl Drop for PopGuard {
            fn drop(&mut self) {
                CONTEXT_STACK.with(|stack| {
                    stack.borrow_mut().pop();
                });
            }
        }

        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(context));
        let guard = PopGuard;
        let outcome = task.perform();
        let context = CONTEXT_STACK
            .with(|stack| stack.borrow_mut().pop())
            .expect("continuation context stack imbalance");
        std::mem::forget(guard);

        match outcome {
            Err(error) => Ok(Context {
                outcome: Outcome::Failed(error),
                locals: context.locals,
            }),
            Ok(()) => match context.status {
                Status::Running => Ok(Context {
                    outcome: Outcome::Succeeded,
                    locals: context.locals,
                }),
                Status::Suspending => Ok(Context {
                    outcome: Outcome::Suspended {
                        frames: context.saved_frames,
                        task,
                    },
                    locals: context.locals,
                }),
                Status::Resuming => Err(ContinuationError::InvalidStatus {
                    expected: "running or suspending",
                    actual: Status::Resuming,
                }),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn task(f: impl Fn() -> Result<(), TaskError> + Send + Sync + 'static) -> Arc<dyn Task> {
        Arc::new(f)
    }

    #[test]
    fn plain_task_succeeds() {
        let context = Continuation::perform(task(|| Ok(()))).unwrap();
        assert!(context.is_finished());
        assert!(context.is_succeeded().unwrap());
        assert!(matches!(
            context.error(),
            Err(ContinuationError::ContextSucceeded)
        ));
    }

    #[test]
    fn failures_are_captured_not_thrown() {
        let context = Continuation::perform(task(|| Err("boom".into()))).unwrap();
        assert!(context.is_finished());
        assert!(!context.is_succeeded().unwrap());
        assert_eq!(context.error().unwrap().to_string(), "boom");
    }

    #[test]
    fn suspend_outside_context_is_an_error() {
        assert!(matches!(
            Continuation::suspend(),
            Err(ContinuationError::SuspendOutsideContinuation)
        ));
        assert_eq!(Continuation::dispatch_target().unwrap(), 0);
        assert!(!Continuation::is_suspending().unwrap());
    }

    #[test]
    fn resume_of_finished_context_is_an_error() {
        let context = Continuation::perform(task(|| Ok(()))).unwrap();
        assert!(matches!(
            Continuation::resume(context),
            Err(ContinuationError::ResumeFinished)
        ));
    }

    #[test]
    fn suspended_context_is_not_inspectable() {
        let context = Continuation::perform(task(|| {
            Continuation::suspend()?;
            Ok(())
        }))
        .unwrap();
        assert!(!context.is_finished());
        assert!(matches!(
            context.is_succeeded(),
            Err(ContinuationError::ContextNotFinished)
        ));
        assert!(matches!(
            context.error(),
            Err(ContinuationError::ContextNotFinished)
        ));

        // Resuming runs the task back to completion
        let context = Continuation::resume(context).unwrap();
        assert!(context.is_finished());
    }

    #[test]
    fn receiver_chain_is_threaded_through_frames() {
        // Innermost frame is static (no receiver pending), the frame above it
        // called a virtual method whose receiver is the callee's registration
        let context = Continuation::perform(task(|| {
            Continuation::suspend()?;
            if Continuation::is_suspending()? {
                Continuation::push_frame(SavedFrame::new(1, vec![]), Some(Value::Int(7)))?;
                Continuation::push_frame(
                    SavedFrame::new(2, vec![Value::Null]).with_receiver_slot(0),
                    None,
                )?;
            }
            Ok(())
        }))
        .unwrap();
        assert!(!context.is_finished());
        match &context.outcome {
            Outcome::Suspended { frames, .. } => {
                assert_eq!(frames.len(), 2);
                assert_eq!(frames[1].slots[0].as_int(), Some(7));
            }
            _ => unreachable!(),
        }
    }
}
