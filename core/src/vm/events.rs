//! Structured event stream drained by tracers and visualizers.

use std::collections::VecDeque;

use serde::Serialize;

/// What the buffer records. `Instructions` is per-step and noisy;
/// `Coroutine` covers only lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TraceMode {
    #[default]
    None,
    Instructions,
    Coroutine,
    All,
}

impl TraceMode {
    pub fn records_instructions(self) -> bool {
        matches!(self, TraceMode::Instructions | TraceMode::All)
    }

    pub fn records_coroutines(self) -> bool {
        matches!(self, TraceMode::Coroutine | TraceMode::All)
    }

    pub fn parse(text: &str) -> Option<TraceMode> {
        match text {
            "none" => Some(TraceMode::None),
            "instructions" => Some(TraceMode::Instructions),
            "coroutine" => Some(TraceMode::Coroutine),
            "all" => Some(TraceMode::All),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    InstructionStep {
        opcode: &'static str,
    },
    CoroutineCreated {
        parent_id: Option<u32>,
        function_name: Option<String>,
    },
    CoroutineResumed {
        args: Vec<String>,
    },
    CoroutineYielded {
        values: Vec<String>,
    },
    CoroutineCompleted {
        ok: bool,
        values: Vec<String>,
        error: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub tick: u64,
    pub coroutine_id: u32,
    pub pc: usize,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl Event {
    pub fn describe(&self) -> String {
        match &self.kind {
            EventKind::InstructionStep { opcode } => {
                format!("step #{} pc={} {}", self.coroutine_id, self.pc, opcode)
            }
            EventKind::CoroutineCreated { function_name, .. } => format!(
                "created #{} ({})",
                self.coroutine_id,
                function_name.as_deref().unwrap_or("<function>")
            ),
            EventKind::CoroutineResumed { args } => {
                format!("resume #{} args=[{}]", self.coroutine_id, args.join(", "))
            }
            EventKind::CoroutineYielded { values } => format!(
                "yield #{} values=[{}] pc={}",
                self.coroutine_id,
                values.join(", "),
                self.pc
            ),
            EventKind::CoroutineCompleted { ok, values, error } => {
                if *ok {
                    format!("#{} completed values=[{}]", self.coroutine_id, values.join(", "))
                } else {
                    format!(
                        "#{} error: {}",
                        self.coroutine_id,
                        error.as_deref().unwrap_or("?")
                    )
                }
            }
        }
    }
}

const EVENT_BUFFER_CAP: usize = 65_536;

/// Bounded buffer; when nothing traces, emission is a mode check and nothing
/// else. Oldest events are dropped on overflow.
#[derive(Debug, Default)]
pub struct EventBuffer {
    buf: VecDeque<Event>,
    mode: TraceMode,
    tick: u64,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> TraceMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: TraceMode) {
        self.mode = mode;
    }

    #[inline]
    pub fn step(&mut self, coroutine_id: u32, pc: usize, opcode: &'static str) {
        if !self.mode.records_instructions() {
            return;
        }
        self.push(coroutine_id, pc, EventKind::InstructionStep { opcode });
    }

    pub fn lifecycle(&mut self, coroutine_id: u32, pc: usize, kind: EventKind) {
        if !self.mode.records_coroutines() {
            return;
        }
        self.push(coroutine_id, pc, kind);
    }

    fn push(&mut self, coroutine_id: u32, pc: usize, kind: EventKind) {
        if self.buf.len() >= EVENT_BUFFER_CAP {
            self.buf.pop_front();
        }
        let tick = self.tick;
        self.tick += 1;
        self.buf.push_back(Event {
            tick,
            coroutine_id,
            pc,
            kind,
        });
    }

    /// Returns and clears the buffer.
    pub fn drain(&mut self) -> Vec<Event> {
        self.buf.drain(..).collect()
    }
}

/// Point-in-time view of one coroutine, for `snapshot()` consumers.
#[derive(Debug, Clone, Serialize)]
pub struct CoroutineSnapshot {
    pub id: u32,
    pub status: &'static str,
    pub function_name: Option<String>,
    pub last_yield: Vec<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VmSnapshot {
    pub pc: usize,
    pub current_coroutine_id: u32,
    pub stack_depth: usize,
    pub coroutines: Vec<CoroutineSnapshot>,
}
