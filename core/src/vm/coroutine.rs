//! Cooperative coroutine records and the resume/yield scheduler.

use std::cell::RefCell;
use std::rc::Rc;

use crate::val::{tostring, Closure, Value};
use crate::vm::error::RuntimeError;
use crate::vm::events::EventKind;
use crate::vm::frame::{ExecState, Frame};
use crate::vm::machine::{RunOutcome, Vm};

pub type CoroutineRef = Rc<RefCell<Coroutine>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineStatus {
    Suspended,
    Running,
    /// Resumed another coroutine and is waiting for it.
    Normal,
    Dead,
}

impl CoroutineStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CoroutineStatus::Suspended => "suspended",
            CoroutineStatus::Running => "running",
            CoroutineStatus::Normal => "normal",
            CoroutineStatus::Dead => "dead",
        }
    }
}

/// Explicit state-machine record: saved frames/registers/pc while suspended,
/// live VM state while running.
#[derive(Debug)]
pub struct Coroutine {
    pub id: u32,
    pub status: CoroutineStatus,
    pub entry: Option<Rc<Closure>>,
    pub started: bool,
    pub saved: Option<ExecState>,
    pub last_resume_args: Vec<Value>,
    pub last_yield: Vec<Value>,
    pub last_error: Option<RuntimeError>,
    pub function_name: Option<String>,
    pub parent_id: Option<u32>,
    pub is_main: bool,
}

impl Coroutine {
    pub fn main() -> Coroutine {
        Coroutine {
            id: 0,
            status: CoroutineStatus::Running,
            entry: None,
            started: true,
            saved: None,
            last_resume_args: Vec::new(),
            last_yield: Vec::new(),
            last_error: None,
            function_name: None,
            parent_id: None,
            is_main: true,
        }
    }
}

/// What a resume produced, mirrored into `coroutine.resume`'s `(ok, ...)`
/// convention by the stdlib.
#[derive(Debug)]
pub struct ResumeResult {
    pub success: bool,
    pub values: Vec<Value>,
    /// Present when the coroutine died with an error; keeps the traceback
    /// for `coroutine.wrap` re-raises.
    pub error: Option<RuntimeError>,
}

impl Vm {
    /// `coroutine.create(f)`: a new suspended coroutine whose first resume
    /// calls `f`.
    pub fn create_coroutine(&mut self, closure: Rc<Closure>) -> CoroutineRef {
        let id = self.next_coroutine_id;
        self.next_coroutine_id += 1;
        let parent_id = self.current.borrow().id;
        let function_name = self
            .functions
            .get(&closure.label)
            .map(|meta| meta.name.to_string());
        let co = Rc::new(RefCell::new(Coroutine {
            id,
            status: CoroutineStatus::Suspended,
            entry: Some(closure),
            started: false,
            saved: Some(ExecState::new()),
            last_resume_args: Vec::new(),
            last_yield: Vec::new(),
            last_error: None,
            function_name: function_name.clone(),
            parent_id: Some(parent_id),
            is_main: false,
        }));
        self.coroutines.push(co.clone());
        self.events.lifecycle(
            id,
            self.state.pc,
            EventKind::CoroutineCreated {
                parent_id: Some(parent_id),
                function_name,
            },
        );
        co
    }

    /// Swap the target coroutine's saved state in, run until it yields,
    /// returns, or errors, then swap back.
    pub fn resume_coroutine(&mut self, co: &CoroutineRef, args: Vec<Value>) -> ResumeResult {
        {
            let target = co.borrow();
            match target.status {
                CoroutineStatus::Dead => {
                    return ResumeResult {
                        success: false,
                        values: vec![Value::str("cannot resume dead coroutine")],
                        error: None,
                    };
                }
                CoroutineStatus::Running | CoroutineStatus::Normal => {
                    return ResumeResult {
                        success: false,
                        values: vec![Value::str("cannot resume non-suspended coroutine")],
                        error: None,
                    };
                }
                CoroutineStatus::Suspended => {}
            }
        }

        let id = co.borrow().id;
        tracing::trace!(coroutine = id, "resume");
        self.events.lifecycle(
            id,
            self.state.pc,
            EventKind::CoroutineResumed {
                args: args.iter().map(tostring).collect(),
            },
        );

        // Swap: park the caller's live state, install the target's.
        let caller = self.current.clone();
        caller.borrow_mut().status = CoroutineStatus::Normal;
        let mut incoming = co
            .borrow_mut()
            .saved
            .take()
            .unwrap_or_else(ExecState::new);
        std::mem::swap(&mut self.state, &mut incoming);
        caller.borrow_mut().saved = Some(incoming);
        self.current = co.clone();
        co.borrow_mut().status = CoroutineStatus::Running;
        co.borrow_mut().last_resume_args = args.clone();

        let first = !co.borrow().started;
        let outcome = if first {
            co.borrow_mut().started = true;
            self.state.frames.push(Frame::ResumeBoundary { coroutine_id: id });
            let entry = co.borrow().entry.clone().expect("coroutine entry closure");
            self.state.pending = args.into();
            self.push_closure_frame(&entry, self.state.pc, true)
                .and_then(|_| self.run_until(1))
        } else {
            // The coroutine is parked just after its yield call site; the
            // resume arguments become that call's results.
            self.state.last_return = args;
            self.run_until(1)
        };
        self.finish_resume(co, &caller, outcome)
    }

    fn finish_resume(
        &mut self,
        co: &CoroutineRef,
        caller: &CoroutineRef,
        outcome: Result<RunOutcome, RuntimeError>,
    ) -> ResumeResult {
        let id = co.borrow().id;

        // Swap back: park or discard the coroutine's state, reinstall the
        // caller's.
        let mut parked = caller
            .borrow_mut()
            .saved
            .take()
            .unwrap_or_else(ExecState::new);
        std::mem::swap(&mut self.state, &mut parked);
        self.current = caller.clone();
        caller.borrow_mut().status = CoroutineStatus::Running;

        match outcome {
            Ok(RunOutcome::Yielded(values)) => {
                let mut target = co.borrow_mut();
                target.saved = Some(parked);
                target.status = CoroutineStatus::Suspended;
                target.last_yield = values.clone();
                drop(target);
                self.events.lifecycle(
                    id,
                    self.state.pc,
                    EventKind::CoroutineYielded {
                        values: values.iter().map(tostring).collect(),
                    },
                );
                ResumeResult {
                    success: true,
                    values,
                    error: None,
                }
            }
            Ok(_) => {
                let values = std::mem::take(&mut parked.last_return);
                let mut target = co.borrow_mut();
                target.saved = None;
                target.status = CoroutineStatus::Dead;
                target.last_yield = values.clone();
                drop(target);
                self.events.lifecycle(
                    id,
                    self.state.pc,
                    EventKind::CoroutineCompleted {
                        ok: true,
                        values: values.iter().map(tostring).collect(),
                        error: None,
                    },
                );
                ResumeResult {
                    success: true,
                    values,
                    error: None,
                }
            }
            Err(err) => {
                let mut target = co.borrow_mut();
                target.saved = None;
                target.status = CoroutineStatus::Dead;
                target.last_error = Some(err.clone());
                drop(target);
                self.events.lifecycle(
                    id,
                    self.state.pc,
                    EventKind::CoroutineCompleted {
                        ok: false,
                        values: Vec::new(),
                        error: Some(err.message()),
                    },
                );
                ResumeResult {
                    success: false,
                    values: vec![err.value.clone()],
                    error: Some(err),
                }
            }
        }
    }

    /// `coroutine.yield(...)`: record the values; the dispatch loop unwinds
    /// to the innermost resume boundary. Raises when crossing a foreign
    /// frame or when called outside any coroutine.
    pub fn request_yield(&mut self, values: Vec<Value>) -> Result<(), RuntimeError> {
        self.check_yieldable()?;
        self.pending_yield = Some(values);
        Ok(())
    }

    fn check_yieldable(&self) -> Result<(), RuntimeError> {
        // The topmost frame is the yield builtin's own foreign frame; the
        // walk starts below it.
        let mut frames = self.state.frames.iter().rev();
        frames.next();
        for frame in frames {
            match frame {
                Frame::ResumeBoundary { .. } => return Ok(()),
                Frame::Foreign(_) => {
                    return Err(self.error("attempt to yield across a C-call boundary"));
                }
                Frame::Call(_) => {}
            }
        }
        Err(self.error("attempt to yield from outside a coroutine"))
    }

    /// `coroutine.isyieldable()`: true inside a coroutine body with no
    /// foreign frame between here and the resume boundary.
    pub fn is_yieldable(&self) -> bool {
        let mut frames = self.state.frames.iter().rev();
        frames.next();
        for frame in frames {
            match frame {
                Frame::ResumeBoundary { .. } => return true,
                Frame::Foreign(_) => return false,
                Frame::Call(_) => {}
            }
        }
        false
    }

    /// `coroutine.running()`: the current handle plus an is-main flag.
    pub fn running_coroutine(&self) -> (CoroutineRef, bool) {
        let is_main = self.current.borrow().is_main;
        (self.current.clone(), is_main)
    }

    /// `coroutine.close(co)`: only suspended (or dead) coroutines may be
    /// closed; saved frames are discarded.
    pub fn close_coroutine(&mut self, co: &CoroutineRef) -> Result<Vec<Value>, RuntimeError> {
        let mut target = co.borrow_mut();
        match target.status {
            CoroutineStatus::Dead => {}
            CoroutineStatus::Suspended => {
                target.saved = None;
                target.status = CoroutineStatus::Dead;
            }
            _ => {
                return Err(self.error(format!(
                    "cannot close a {} coroutine",
                    target.status.as_str()
                )));
            }
        }
        match &target.last_error {
            Some(err) => Ok(vec![Value::Bool(false), err.value.clone()]),
            None => Ok(vec![Value::Bool(true)]),
        }
    }

    pub fn coroutine_by_id(&self, id: u32) -> Option<CoroutineRef> {
        self.coroutines.iter().find(|c| c.borrow().id == id).cloned()
    }

    pub fn main_coroutine(&self) -> CoroutineRef {
        self.coroutines[0].clone()
    }
}
