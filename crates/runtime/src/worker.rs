//! Worker threads hosting script engines.
//!
//! Engines are not thread-safe, so each one lives on a dedicated OS
//! thread for its whole life and is driven over a command channel.
//! Results come back on one-shot reply channels; interruption bypasses
//! the channel entirely and goes straight to the engine's shared flag,
//! which is what lets a deadline or disconnect reach a busy engine.

use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use tokio::sync::oneshot;

use plinth_core::error::CoreError;
use plinth_core::value::ScriptValue;

use crate::engine::{Engine, EngineServices, InterruptFlag, LogEntry};

/// What a finished run hands back: the settled value or the error that
/// aborted the loop, plus everything the script logged.
#[derive(Debug)]
pub struct RunOutcome {
    pub result: Result<ScriptValue, CoreError>,
    pub logs: Vec<LogEntry>,
}

impl RunOutcome {
    fn lost(slot: usize) -> Self {
        RunOutcome {
            result: Err(CoreError::Internal(format!(
                "worker {slot} stopped before replying"
            ))),
            logs: Vec::new(),
        }
    }
}

enum WorkerCommand {
    Run {
        entry: String,
        args: ScriptValue,
        reply: oneshot::Sender<RunOutcome>,
    },
    Eval {
        script: String,
        reply: oneshot::Sender<RunOutcome>,
    },
    Reset,
    Shutdown,
}

/// Handle to one engine thread.
pub struct Worker {
    slot: usize,
    commands: Sender<WorkerCommand>,
    interrupt: Arc<InterruptFlag>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub fn spawn(slot: usize, services: EngineServices) -> Worker {
        let (commands, inbox) = crossbeam_channel::unbounded();
        let engine = Engine::new(slot, services);
        let interrupt = engine.interrupt_handle();
        let thread = std::thread::Builder::new()
            .name(format!("plinth-worker-{slot}"))
            .spawn(move || worker_loop(slot, engine, inbox))
            .expect("spawn worker thread");
        Worker {
            slot,
            commands,
            interrupt,
            thread: Some(thread),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Run a cached entry to completion.
    pub async fn run(&self, entry: &str, args: ScriptValue) -> RunOutcome {
        let (reply, outcome) = oneshot::channel();
        let command = WorkerCommand::Run {
            entry: entry.to_string(),
            args,
            reply,
        };
        if self.commands.send(command).is_err() {
            return RunOutcome::lost(self.slot);
        }
        outcome.await.unwrap_or_else(|_| RunOutcome::lost(self.slot))
    }

    /// Compile and run an ad-hoc script.
    pub async fn eval(&self, script: &str) -> RunOutcome {
        let (reply, outcome) = oneshot::channel();
        let command = WorkerCommand::Eval {
            script: script.to_string(),
            reply,
        };
        if self.commands.send(command).is_err() {
            return RunOutcome::lost(self.slot);
        }
        outcome.await.unwrap_or_else(|_| RunOutcome::lost(self.slot))
    }

    /// Ask the engine to abandon its current run. Takes effect at the
    /// engine's next interrupt check; a no-op between runs because the
    /// engine clears the flag when a run settles.
    pub fn interrupt(&self, reason: &str) {
        self.interrupt.interrupt(reason);
    }

    pub fn interrupt_handle(&self) -> Arc<InterruptFlag> {
        self.interrupt.clone()
    }

    /// Queue an engine reset. False means the thread is gone.
    pub fn reset(&self) -> bool {
        self.commands.send(WorkerCommand::Reset).is_ok()
    }

    pub fn is_alive(&self) -> bool {
        self.thread
            .as_ref()
            .map(|t| !t.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // The thread drains queued commands and exits; it is not joined
        // so a busy engine cannot stall the dropper.
        let _ = self.commands.send(WorkerCommand::Shutdown);
    }
}

fn worker_loop(slot: usize, mut engine: Engine, inbox: Receiver<WorkerCommand>) {
    tracing::debug!(worker = slot, "worker thread started");
    while let Ok(command) = inbox.recv() {
        match command {
            WorkerCommand::Run { entry, args, reply } => {
                let result = engine.run(&entry, args);
                let outcome = RunOutcome {
                    result,
                    logs: engine.take_console(),
                };
                let _ = reply.send(outcome);
            }
            WorkerCommand::Eval { script, reply } => {
                let result = engine.eval(&script);
                let outcome = RunOutcome {
                    result,
                    logs: engine.take_console(),
                };
                let _ = reply.send(outcome);
            }
            WorkerCommand::Reset => engine.reset(),
            WorkerCommand::Shutdown => break,
        }
    }
    tracing::debug!(worker = slot, "worker thread stopped");
}
