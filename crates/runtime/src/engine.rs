//! The per-worker script engine.
//!
//! An engine is single-threaded and owned by exactly one worker thread.
//! Each run resolves its entry program through the shared module cache
//! (compiling from the source registry on a miss), then drives a
//! cooperative event loop: an ordered task queue seeded with `main`,
//! plus a timer heap for `after`/`every` callbacks. Tasks run to
//! completion in FIFO order; nothing preempts a running task.
//!
//! The only cross-thread entry point is [`InterruptFlag`]: any thread
//! may raise it, and the engine polls it at statement boundaries and
//! inside blocking waits. An observed interrupt aborts the run with the
//! carried reason; the flag is cleared when a run settles and again on
//! reset, so a stale request can never leak into a later run.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use indexmap::IndexMap;

use plinth_core::error::CoreError;
use plinth_core::value::{ScriptError, ScriptValue};
use plinth_db::repositories::SourceRepo;
use plinth_db::DbPool;

use crate::bridge::{BridgeRow, BridgeTransaction};
use crate::cache::ProcessCache;
use crate::pipe::PipeRegistry;
use crate::program::{parse_program, CallSpec, Callee, Expr, LogLevel, Program, Rhs, Stmt};

const WAIT_SLICE: Duration = Duration::from_millis(25);
const MAX_CALL_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Interruption
// ---------------------------------------------------------------------------

/// Cross-thread interruption request for one engine.
///
/// Raising the flag stores a reason; the owning engine consumes it at
/// its next check and aborts the run with that reason as the error
/// message.
#[derive(Debug, Default)]
pub struct InterruptFlag {
    armed: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn interrupt(&self, reason: &str) {
        *self.reason.lock().expect("interrupt flag lock") = Some(reason.to_string());
        self.armed.store(true, Ordering::Release);
    }

    /// Consume a pending request, if any.
    pub fn take(&self) -> Option<String> {
        if !self.armed.load(Ordering::Acquire) {
            return None;
        }
        let mut reason = self.reason.lock().expect("interrupt flag lock");
        self.armed.store(false, Ordering::Release);
        reason.take()
    }

    pub fn clear(&self) {
        let mut reason = self.reason.lock().expect("interrupt flag lock");
        self.armed.store(false, Ordering::Release);
        *reason = None;
    }
}

// ---------------------------------------------------------------------------
// Console capture
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn to_value(&self) -> ScriptValue {
        let mut map = IndexMap::new();
        map.insert(
            "level".to_string(),
            ScriptValue::String(self.level.as_str().to_string()),
        );
        map.insert(
            "message".to_string(),
            ScriptValue::String(self.message.clone()),
        );
        ScriptValue::Object(map)
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Shared services an engine reaches out to during a run.
#[derive(Clone)]
pub struct EngineServices {
    /// The source registry.
    pub db: DbPool,
    pub cache: Arc<ProcessCache>,
    pub pipes: Arc<PipeRegistry>,
    /// Handle for blocking on async work (registry lookups, the bridge)
    /// from the worker thread.
    pub rt: tokio::runtime::Handle,
}

type Scope = HashMap<String, ScriptValue>;

struct ScheduledCall {
    program: Arc<Program>,
    func: String,
    args: Vec<ScriptValue>,
    /// The run's settled value is the entry task's value.
    entry: bool,
}

struct TimerEntry {
    due: Instant,
    /// Tie-breaker keeping same-instant timers in schedule order.
    seq: u64,
    /// `(period, remaining firings)` for repeating timers.
    interval: Option<(Duration, u64)>,
    program: Arc<Program>,
    func: String,
    args: Vec<ScriptValue>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due.cmp(&other.due).then(self.seq.cmp(&other.seq))
    }
}

enum Flow {
    Normal,
    Return(ScriptValue),
}

pub struct Engine {
    slot: usize,
    services: EngineServices,
    interrupt: Arc<InterruptFlag>,
    console: Vec<LogEntry>,
    /// Modules pulled in by `require` during the current run.
    required: HashMap<String, Arc<Program>>,
    /// `(driver, dsn)` selected by the last `db_open`.
    current_db: Option<(String, String)>,
    /// Active script transaction; at most one, never nested.
    tx: Option<BridgeTransaction>,
    queue: VecDeque<ScheduledCall>,
    timers: BinaryHeap<Reverse<TimerEntry>>,
    next_seq: u64,
}

impl Engine {
    pub fn new(slot: usize, services: EngineServices) -> Self {
        Self {
            slot,
            services,
            interrupt: Arc::new(InterruptFlag::new()),
            console: Vec::new(),
            required: HashMap::new(),
            current_db: None,
            tx: None,
            queue: VecDeque::new(),
            timers: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn interrupt_handle(&self) -> Arc<InterruptFlag> {
        self.interrupt.clone()
    }

    /// Execute a cached entry (`./controller/x`, `./daemon/x`,
    /// `./crontab/x`) until its event loop drains, returning the entry
    /// task's settled value.
    pub fn run(&mut self, entry: &str, args: ScriptValue) -> Result<ScriptValue, CoreError> {
        self.begin_run();
        let result = self
            .resolve_entry(entry)
            .and_then(|program| self.drive(program, args));
        self.finish_run();
        result
    }

    /// Compile and execute an ad-hoc script, bypassing the module cache.
    pub fn eval(&mut self, script: &str) -> Result<ScriptValue, CoreError> {
        self.begin_run();
        let result = parse_program(script)
            .map(Arc::new)
            .and_then(|program| self.drive(program, ScriptValue::Null));
        self.finish_run();
        result
    }

    /// Captured console output of the last run.
    pub fn take_console(&mut self) -> Vec<LogEntry> {
        std::mem::take(&mut self.console)
    }

    /// Drop all per-run state. Runs between leases; an open transaction
    /// left behind by an aborted run is rolled back here.
    pub fn reset(&mut self) {
        if let Some(tx) = self.tx.take() {
            if let Err(err) = self.services.rt.block_on(tx.rollback()) {
                tracing::warn!(worker = self.slot, error = %err, "rollback during reset failed");
            }
        }
        self.required.clear();
        self.current_db = None;
        self.console.clear();
        self.queue.clear();
        self.timers.clear();
        self.interrupt.clear();
    }

    // ---- run lifecycle ----

    fn begin_run(&mut self) {
        self.interrupt.clear();
        self.console.clear();
        self.required.clear();
        self.current_db = None;
        self.queue.clear();
        self.timers.clear();
    }

    fn finish_run(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::warn!(worker = self.slot, "run left a transaction open, rolling back");
            if let Err(err) = self.services.rt.block_on(tx.rollback()) {
                tracing::warn!(worker = self.slot, error = %err, "rollback after run failed");
            }
        }
        self.queue.clear();
        self.timers.clear();
        self.interrupt.clear();
    }

    fn drive(&mut self, program: Arc<Program>, args: ScriptValue) -> Result<ScriptValue, CoreError> {
        if !program.has_main() {
            // A pure function library evaluates to nothing.
            return Ok(ScriptValue::Null);
        }
        self.queue.push_back(ScheduledCall {
            program,
            func: "main".to_string(),
            args: vec![args],
            entry: true,
        });

        let mut settled = ScriptValue::Null;
        loop {
            self.check_interrupt()?;
            if let Some(call) = self.queue.pop_front() {
                let ScheduledCall {
                    program,
                    func,
                    args,
                    entry,
                } = call;
                let value = self.invoke(&program, &func, args, 0)?;
                if entry {
                    settled = value;
                }
                continue;
            }
            let Some(next_due) = self.timers.peek().map(|r| r.0.due) else {
                break;
            };
            self.wait_until(next_due)?;
            self.promote_due_timers();
        }
        Ok(settled)
    }

    fn promote_due_timers(&mut self) {
        let now = Instant::now();
        while self.timers.peek().is_some_and(|r| r.0.due <= now) {
            let Reverse(timer) = self.timers.pop().expect("peeked timer entry");
            if let Some((period, remaining)) = timer.interval {
                if remaining > 1 {
                    let seq = self.next_seq();
                    self.timers.push(Reverse(TimerEntry {
                        due: timer.due + period,
                        seq,
                        interval: Some((period, remaining - 1)),
                        program: timer.program.clone(),
                        func: timer.func.clone(),
                        args: timer.args.clone(),
                    }));
                }
            }
            self.queue.push_back(ScheduledCall {
                program: timer.program,
                func: timer.func,
                args: timer.args,
                entry: false,
            });
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn check_interrupt(&self) -> Result<(), CoreError> {
        match self.interrupt.take() {
            Some(reason) => Err(CoreError::execution(None, reason)),
            None => Ok(()),
        }
    }

    fn wait_until(&self, due: Instant) -> Result<(), CoreError> {
        loop {
            self.check_interrupt()?;
            let now = Instant::now();
            if now >= due {
                return Ok(());
            }
            std::thread::sleep(WAIT_SLICE.min(due - now));
        }
    }

    // ---- program resolution ----

    fn resolve_entry(&self, key: &str) -> Result<Arc<Program>, CoreError> {
        if let Some(program) = self.services.cache.module_program(key) {
            return Ok(program);
        }
        let (name, kind, active_only) = entry_source(key)?;
        let source = self
            .services
            .rt
            .block_on(async {
                if active_only {
                    SourceRepo::find_active_by_name_and_kind(&self.services.db, &name, kind).await
                } else {
                    SourceRepo::find_by_name_and_kind(&self.services.db, &name, kind).await
                }
            })
            .map_err(db_err)?
            .ok_or(CoreError::NotFound {
                entity: kind,
                name: name.clone(),
            })?;

        let text = if source.compiled.trim().is_empty() {
            &source.content
        } else {
            &source.compiled
        };
        let program = Arc::new(parse_program(text)?);
        self.services.cache.insert_module(key, program.clone());
        Ok(program)
    }

    fn require(&mut self, target: &str, alias: &str) -> Result<(), CoreError> {
        let program = self.resolve_entry(target)?;
        self.required.insert(alias.to_string(), program);
        Ok(())
    }

    // ---- interpreter ----

    fn invoke(
        &mut self,
        program: &Arc<Program>,
        func: &str,
        args: Vec<ScriptValue>,
        depth: usize,
    ) -> Result<ScriptValue, CoreError> {
        if depth > MAX_CALL_DEPTH {
            return Err(CoreError::execution(None, "call depth exceeded"));
        }
        let function = program
            .function(func)
            .ok_or_else(|| CoreError::execution(None, format!("function not found: {func}")))?;
        let mut scope = Scope::new();
        for (i, param) in function.params.iter().enumerate() {
            scope.insert(
                param.clone(),
                args.get(i).cloned().unwrap_or(ScriptValue::Null),
            );
        }
        match self.exec_block(program, &function.body, &mut scope, depth)? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(ScriptValue::Null),
        }
    }

    fn exec_block(
        &mut self,
        program: &Arc<Program>,
        body: &[Stmt],
        scope: &mut Scope,
        depth: usize,
    ) -> Result<Flow, CoreError> {
        for stmt in body {
            self.check_interrupt()?;
            match stmt {
                Stmt::Let { name, rhs } => {
                    let value = self.eval_rhs(program, rhs, scope, depth)?;
                    scope.insert(name.clone(), value);
                }
                Stmt::Log { level, expr } => {
                    let message = self.eval_expr(expr, scope)?.render();
                    self.log(*level, message);
                }
                Stmt::Return { expr } => {
                    let value = match expr {
                        Some(expr) => self.eval_expr(expr, scope)?,
                        None => ScriptValue::Null,
                    };
                    return Ok(Flow::Return(value));
                }
                Stmt::Throw { expr } => {
                    let value = self.eval_expr(expr, scope)?;
                    return Err(ScriptError::from_thrown(value).into());
                }
                Stmt::Call(spec) => {
                    self.call_spec(program, spec, scope, depth)?;
                }
                Stmt::Defer(spec) => {
                    let (target, func, args) = self.resolve_call(program, spec, scope)?;
                    self.queue.push_back(ScheduledCall {
                        program: target,
                        func,
                        args,
                        entry: false,
                    });
                }
                Stmt::After { delay_ms, call } => {
                    let (target, func, args) = self.resolve_call(program, call, scope)?;
                    let seq = self.next_seq();
                    self.timers.push(Reverse(TimerEntry {
                        due: Instant::now() + Duration::from_millis(*delay_ms),
                        seq,
                        interval: None,
                        program: target,
                        func,
                        args,
                    }));
                }
                Stmt::Every {
                    interval_ms,
                    count,
                    call,
                } => {
                    if *count > 0 {
                        let (target, func, args) = self.resolve_call(program, call, scope)?;
                        let period = Duration::from_millis(*interval_ms);
                        let seq = self.next_seq();
                        self.timers.push(Reverse(TimerEntry {
                            due: Instant::now() + period,
                            seq,
                            interval: Some((period, *count)),
                            program: target,
                            func,
                            args,
                        }));
                    }
                }
                Stmt::Sleep { ms } => {
                    self.wait_until(Instant::now() + Duration::from_millis(*ms))?;
                }
                Stmt::Spin { steps } => {
                    for i in 0..*steps {
                        if i % 64 == 0 {
                            self.check_interrupt()?;
                        }
                        std::hint::spin_loop();
                    }
                }
                Stmt::Require { target, alias } => {
                    self.require(target, alias)?;
                }
                Stmt::PipePut {
                    name,
                    value,
                    timeout_ms,
                } => {
                    let name = self.eval_expr(name, scope)?.render();
                    let value = self.eval_expr(value, scope)?;
                    let timeout = timeout_ms.map(Duration::from_millis);
                    self.services
                        .pipes
                        .put(&name, value, timeout, &self.interrupt)?;
                }
                Stmt::Loop { body } => loop {
                    self.check_interrupt()?;
                    if let Flow::Return(value) = self.exec_block(program, body, scope, depth)? {
                        return Ok(Flow::Return(value));
                    }
                },
                Stmt::Repeat { count, body } => {
                    for _ in 0..*count {
                        self.check_interrupt()?;
                        if let Flow::Return(value) = self.exec_block(program, body, scope, depth)? {
                            return Ok(Flow::Return(value));
                        }
                    }
                }
                Stmt::DbOpen { driver, dsn } => {
                    let driver = self.eval_expr(driver, scope)?.render();
                    let dsn = self.eval_expr(dsn, scope)?.render();
                    let bridge = &self.services.cache.bridge;
                    self.services.rt.block_on(bridge.open(&driver, &dsn))?;
                    self.current_db = Some((driver, dsn));
                }
                Stmt::DbTx { isolation, call } => {
                    self.run_transaction(program, *isolation, call, scope, depth)?;
                }
            }
        }
        Ok(Flow::Normal)
    }

    fn eval_rhs(
        &mut self,
        program: &Arc<Program>,
        rhs: &Rhs,
        scope: &mut Scope,
        depth: usize,
    ) -> Result<ScriptValue, CoreError> {
        match rhs {
            Rhs::Expr(expr) => self.eval_expr(expr, scope),
            Rhs::Call(spec) => self.call_spec(program, spec, scope, depth),
            Rhs::Concat(exprs) => {
                let mut out = String::new();
                for expr in exprs {
                    out.push_str(&self.eval_expr(expr, scope)?.render());
                }
                Ok(ScriptValue::String(out))
            }
            Rhs::PipePoll { name, timeout_ms } => {
                let name = self.eval_expr(name, scope)?.render();
                let timeout = timeout_ms.map(Duration::from_millis);
                self.services.pipes.poll(&name, timeout, &self.interrupt)
            }
            Rhs::PipeDrain {
                name,
                size,
                timeout_ms,
            } => {
                let name = self.eval_expr(name, scope)?.render();
                let timeout = timeout_ms.map(Duration::from_millis);
                let items = self
                    .services
                    .pipes
                    .drain(&name, *size, timeout, &self.interrupt)?;
                Ok(ScriptValue::Array(items))
            }
            Rhs::DbQuery { sql, params } => {
                let sql = self.eval_expr(sql, scope)?.render();
                let params = self.eval_args(params, scope)?;
                let rows = self.db_query(&sql, &params)?;
                Ok(ScriptValue::Array(
                    rows.into_iter().map(ScriptValue::Object).collect(),
                ))
            }
            Rhs::DbExec { sql, params } => {
                let sql = self.eval_expr(sql, scope)?.render();
                let params = self.eval_args(params, scope)?;
                let count = self.db_exec(&sql, &params)?;
                Ok(ScriptValue::Int(count as i64))
            }
            Rhs::Get { target, key } => {
                let key = self.eval_expr(key, scope)?;
                let container = scope.get(target).cloned().ok_or_else(|| {
                    CoreError::execution(None, format!("unknown variable: {target}"))
                })?;
                Ok(lookup(&container, &key))
            }
        }
    }

    fn eval_expr(&self, expr: &Expr, scope: &Scope) -> Result<ScriptValue, CoreError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => scope
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::execution(None, format!("unknown variable: {name}"))),
        }
    }

    fn eval_args(&self, exprs: &[Expr], scope: &Scope) -> Result<Vec<ScriptValue>, CoreError> {
        exprs.iter().map(|e| self.eval_expr(e, scope)).collect()
    }

    fn resolve_callee(
        &self,
        program: &Arc<Program>,
        callee: &Callee,
    ) -> Result<(Arc<Program>, String), CoreError> {
        match callee {
            Callee::Local(name) => Ok((program.clone(), name.clone())),
            Callee::Module { alias, func } => self
                .required
                .get(alias)
                .cloned()
                .map(|p| (p, func.clone()))
                .ok_or_else(|| {
                    CoreError::execution(None, format!("module not required: {alias}"))
                }),
        }
    }

    fn resolve_call(
        &self,
        program: &Arc<Program>,
        spec: &CallSpec,
        scope: &Scope,
    ) -> Result<(Arc<Program>, String, Vec<ScriptValue>), CoreError> {
        let (target, func) = self.resolve_callee(program, &spec.callee)?;
        let args = self.eval_args(&spec.args, scope)?;
        Ok((target, func, args))
    }

    fn call_spec(
        &mut self,
        program: &Arc<Program>,
        spec: &CallSpec,
        scope: &mut Scope,
        depth: usize,
    ) -> Result<ScriptValue, CoreError> {
        let (target, func, args) = self.resolve_call(program, spec, scope)?;
        self.invoke(&target, &func, args, depth + 1)
    }

    fn log(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Log | LogLevel::Debug => {
                tracing::debug!(worker = self.slot, "{}", message);
            }
            LogLevel::Info => tracing::info!(worker = self.slot, "{}", message),
            LogLevel::Warn => tracing::warn!(worker = self.slot, "{}", message),
            LogLevel::Error => tracing::error!(worker = self.slot, "{}", message),
        }
        self.console.push(LogEntry { level, message });
    }

    // ---- database access ----

    fn db_query(&mut self, sql: &str, params: &[ScriptValue]) -> Result<Vec<BridgeRow>, CoreError> {
        if let Some(tx) = self.tx.as_mut() {
            return self.services.rt.block_on(tx.query(sql, params));
        }
        let (driver, dsn) = self.selected_db()?;
        let bridge = &self.services.cache.bridge;
        self.services
            .rt
            .block_on(bridge.query(&driver, &dsn, sql, params))
    }

    fn db_exec(&mut self, sql: &str, params: &[ScriptValue]) -> Result<u64, CoreError> {
        if let Some(tx) = self.tx.as_mut() {
            return self.services.rt.block_on(tx.exec(sql, params));
        }
        let (driver, dsn) = self.selected_db()?;
        let bridge = &self.services.cache.bridge;
        self.services
            .rt
            .block_on(bridge.exec(&driver, &dsn, sql, params))
    }

    fn selected_db(&self) -> Result<(String, String), CoreError> {
        self.current_db
            .clone()
            .ok_or_else(|| CoreError::execution(None, "no database opened; call db_open first"))
    }

    fn run_transaction(
        &mut self,
        program: &Arc<Program>,
        isolation: i64,
        call: &CallSpec,
        scope: &mut Scope,
        depth: usize,
    ) -> Result<(), CoreError> {
        if self.tx.is_some() {
            return Err(CoreError::execution(None, "transaction already active"));
        }
        let (driver, dsn) = self.selected_db()?;
        let bridge = &self.services.cache.bridge;
        let tx = self
            .services
            .rt
            .block_on(bridge.begin(&driver, &dsn, isolation))?;
        self.tx = Some(tx);

        let outcome = self.call_spec(program, call, scope, depth);
        let Some(tx) = self.tx.take() else {
            return outcome.map(|_| ());
        };
        match outcome {
            Ok(_) => self.services.rt.block_on(tx.commit()),
            Err(err) => {
                if let Err(rollback_err) = self.services.rt.block_on(tx.rollback()) {
                    tracing::warn!(
                        worker = self.slot,
                        error = %rollback_err,
                        "transaction rollback failed"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Field or index lookup on a container value; anything unresolvable is
/// `Null`, matching how scripts probe optional data.
fn lookup(container: &ScriptValue, key: &ScriptValue) -> ScriptValue {
    match container {
        ScriptValue::Object(map) => map.get(&key.render()).cloned().unwrap_or(ScriptValue::Null),
        ScriptValue::Array(items) => match key {
            ScriptValue::Int(i) if *i >= 0 => {
                items.get(*i as usize).cloned().unwrap_or(ScriptValue::Null)
            }
            _ => key
                .render()
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(ScriptValue::Null),
        },
        _ => ScriptValue::Null,
    }
}

/// Map a module-cache key onto the registry row backing it.
///
/// Returns `(stored name, type, active required)`. Controllers, daemons
/// and crontabs resolve only while active; plain modules resolve
/// regardless, matching how library edits are staged before activation.
fn entry_source(key: &str) -> Result<(String, &'static str, bool), CoreError> {
    let invalid = || CoreError::Validation(format!("invalid entry reference: {key:?}"));
    if key.is_empty() || key == "./" {
        return Err(invalid());
    }
    if let Some(name) = key.strip_prefix("./controller/") {
        if name.is_empty() {
            return Err(invalid());
        }
        return Ok((name.to_string(), "controller", true));
    }
    if let Some(name) = key.strip_prefix("./daemon/") {
        if name.is_empty() {
            return Err(invalid());
        }
        return Ok((name.to_string(), "daemon", true));
    }
    if let Some(name) = key.strip_prefix("./crontab/") {
        if name.is_empty() {
            return Err(invalid());
        }
        return Ok((name.to_string(), "crontab", true));
    }
    if let Some(name) = key.strip_prefix("./") {
        return Ok((name.to_string(), "module", false));
    }
    Ok((format!("node_modules/{key}"), "module", false))
}

fn db_err(err: sqlx::Error) -> CoreError {
    CoreError::Database(err.to_string())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
