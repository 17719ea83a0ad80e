//! Script source parsing.
//!
//! Sources are line-oriented: one statement per line, `fn name [params]`
//! ... `end` blocks for functions, `loop`/`repeat N` ... `end` for
//! iteration. Statements outside any function form the implicit `main`
//! entry point (bound to a single `args` parameter). Lines starting with
//! `#` are comments.
//!
//! Parsing happens once per source; compiled [`Program`]s are shared
//! read-only between workers through the process cache.

use std::collections::HashMap;

use plinth_core::error::CoreError;
use plinth_core::value::ScriptValue;

// ---------------------------------------------------------------------------
// AST
// ---------------------------------------------------------------------------

/// A compiled source: its functions by name.
#[derive(Debug)]
pub struct Program {
    functions: HashMap<String, Function>,
}

impl Program {
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.get(name)
    }

    pub fn has_main(&self) -> bool {
        self.functions.contains_key("main")
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

/// Console levels double as statement keywords (`log`, `info`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Log,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "log" => Some(LogLevel::Log),
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub enum Stmt {
    Let { name: String, rhs: Rhs },
    Log { level: LogLevel, expr: Expr },
    Return { expr: Option<Expr> },
    Throw { expr: Expr },
    Call(CallSpec),
    /// Queue a call at the back of the current tick.
    Defer(CallSpec),
    /// One-shot timer.
    After { delay_ms: u64, call: CallSpec },
    /// Repeating timer, bounded by `count` firings.
    Every { interval_ms: u64, count: u64, call: CallSpec },
    Sleep { ms: u64 },
    /// Busy work in interrupt-checked slices; exists for load shaping.
    Spin { steps: u64 },
    Require { target: String, alias: String },
    PipePut { name: Expr, value: Expr, timeout_ms: Option<u64> },
    Loop { body: Vec<Stmt> },
    Repeat { count: u64, body: Vec<Stmt> },
    DbOpen { driver: Expr, dsn: Expr },
    DbTx { isolation: i64, call: CallSpec },
}

/// Right-hand side of `let`; a superset of plain expressions.
#[derive(Debug)]
pub enum Rhs {
    Expr(Expr),
    Call(CallSpec),
    Concat(Vec<Expr>),
    PipePoll { name: Expr, timeout_ms: Option<u64> },
    PipeDrain { name: Expr, size: usize, timeout_ms: Option<u64> },
    DbQuery { sql: Expr, params: Vec<Expr> },
    DbExec { sql: Expr, params: Vec<Expr> },
    /// Object field or array index lookup.
    Get { target: String, key: Expr },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Literal(ScriptValue),
    Var(String),
}

#[derive(Debug, Clone)]
pub struct CallSpec {
    pub callee: Callee,
    pub args: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub enum Callee {
    /// Function in the current program.
    Local(String),
    /// `alias.func` on a previously required module.
    Module { alias: String, func: String },
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Token {
    text: String,
    quoted: bool,
    /// Byte offset of the token start within its line.
    start: usize,
}

fn tokenize(line_no: usize, line: &str) -> Result<Vec<Token>, CoreError> {
    let mut tokens = Vec::new();
    let bytes = line.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        if bytes[i] == b'"' {
            let start = i;
            i += 1;
            let mut text = String::new();
            let mut closed = false;
            while i < bytes.len() {
                match bytes[i] {
                    b'\\' if i + 1 < bytes.len() => {
                        text.push(match bytes[i + 1] {
                            b'n' => '\n',
                            b't' => '\t',
                            other => other as char,
                        });
                        i += 2;
                    }
                    b'"' => {
                        i += 1;
                        closed = true;
                        break;
                    }
                    _ => {
                        // Multi-byte chars are copied as-is.
                        let ch = line[i..].chars().next().unwrap_or('\u{fffd}');
                        text.push(ch);
                        i += ch.len_utf8();
                    }
                }
            }
            if !closed {
                return Err(CoreError::Validation(format!(
                    "line {line_no}: unterminated string"
                )));
            }
            tokens.push(Token {
                text,
                quoted: true,
                start,
            });
        } else {
            let start = i;
            while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            tokens.push(Token {
                text: line[start..i].to_string(),
                quoted: false,
                start,
            });
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parse a source into a [`Program`].
///
/// Errors are reported as [`CoreError::Validation`] with a line number.
pub fn parse_program(source: &str) -> Result<Program, CoreError> {
    let mut functions: HashMap<String, Function> = HashMap::new();
    let mut top_level: Vec<Stmt> = Vec::new();

    let mut lines = source
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l))
        .filter(|(_, l)| {
            let t = l.trim();
            !t.is_empty() && !t.starts_with('#')
        })
        .collect::<Vec<_>>()
        .into_iter()
        .peekable();

    while let Some((line_no, line)) = lines.next() {
        let trimmed = line.trim();
        if let Some(header) = trimmed.strip_prefix("fn ") {
            let mut parts = header.split_whitespace();
            let name = parts
                .next()
                .ok_or_else(|| {
                    CoreError::Validation(format!("line {line_no}: fn requires a name"))
                })?
                .to_string();
            let params: Vec<String> = parts.map(|p| p.to_string()).collect();
            let body = parse_block(&mut lines, line_no)?;
            if functions
                .insert(
                    name.clone(),
                    Function {
                        name: name.clone(),
                        params,
                        body,
                    },
                )
                .is_some()
            {
                return Err(CoreError::Validation(format!(
                    "line {line_no}: duplicate function: {name}"
                )));
            }
        } else if trimmed == "end" {
            return Err(CoreError::Validation(format!(
                "line {line_no}: end without an open block"
            )));
        } else {
            top_level.push(parse_stmt(line_no, trimmed, &mut lines)?);
        }
    }

    if !top_level.is_empty() {
        if functions.contains_key("main") {
            return Err(CoreError::Validation(
                "top-level statements conflict with an explicit main".to_string(),
            ));
        }
        functions.insert(
            "main".to_string(),
            Function {
                name: "main".to_string(),
                params: vec!["args".to_string()],
                body: top_level,
            },
        );
    }

    Ok(Program { functions })
}

type Lines<'a> = std::iter::Peekable<std::vec::IntoIter<(usize, &'a str)>>;

/// Read statements until the `end` matching the block opened at `opened_at`.
fn parse_block(lines: &mut Lines, opened_at: usize) -> Result<Vec<Stmt>, CoreError> {
    let mut body = Vec::new();
    while let Some((line_no, line)) = lines.next() {
        let trimmed = line.trim();
        if trimmed == "end" {
            return Ok(body);
        }
        if trimmed.starts_with("fn ") {
            return Err(CoreError::Validation(format!(
                "line {line_no}: fn is not allowed inside a block"
            )));
        }
        body.push(parse_stmt(line_no, trimmed, lines)?);
    }
    Err(CoreError::Validation(format!(
        "line {opened_at}: block is never closed"
    )))
}

fn parse_stmt(line_no: usize, line: &str, lines: &mut Lines) -> Result<Stmt, CoreError> {
    let tokens = tokenize(line_no, line)?;
    let head = &tokens[0];
    if head.quoted {
        return Err(CoreError::Validation(format!(
            "line {line_no}: a statement cannot start with a string"
        )));
    }

    if let Some(level) = LogLevel::from_keyword(&head.text) {
        let expr = parse_single_expr(line_no, line, &tokens[1..])?;
        return Ok(Stmt::Log { level, expr });
    }

    match head.text.as_str() {
        "let" => {
            if tokens.len() < 4 || tokens[2].text != "=" || tokens[2].quoted {
                return Err(CoreError::Validation(format!(
                    "line {line_no}: expected: let <name> = <value>"
                )));
            }
            let name = ident(line_no, &tokens[1])?;
            let rhs = parse_rhs(line_no, line, &tokens[3..])?;
            Ok(Stmt::Let { name, rhs })
        }
        "return" => {
            let expr = if tokens.len() == 1 {
                None
            } else {
                Some(parse_single_expr(line_no, line, &tokens[1..])?)
            };
            Ok(Stmt::Return { expr })
        }
        "throw" => {
            let expr = parse_single_expr(line_no, line, &tokens[1..])?;
            Ok(Stmt::Throw { expr })
        }
        "call" => Ok(Stmt::Call(parse_call(line_no, line, &tokens[1..])?)),
        "defer" => Ok(Stmt::Defer(parse_call(line_no, line, &tokens[1..])?)),
        "after" => {
            let delay_ms = integer(line_no, tokens.get(1), "after <ms> <fn>")?;
            let call = parse_call(line_no, line, &tokens[2..])?;
            Ok(Stmt::After { delay_ms, call })
        }
        "every" => {
            let interval_ms = integer(line_no, tokens.get(1), "every <ms> <count> <fn>")?;
            let count = integer(line_no, tokens.get(2), "every <ms> <count> <fn>")?;
            let call = parse_call(line_no, line, &tokens[3..])?;
            Ok(Stmt::Every {
                interval_ms,
                count,
                call,
            })
        }
        "sleep" => {
            let ms = integer(line_no, tokens.get(1), "sleep <ms>")?;
            Ok(Stmt::Sleep { ms })
        }
        "spin" => {
            let steps = integer(line_no, tokens.get(1), "spin <steps>")?;
            Ok(Stmt::Spin { steps })
        }
        "require" => {
            let target = tokens
                .get(1)
                .ok_or_else(|| {
                    CoreError::Validation(format!("line {line_no}: require needs a module path"))
                })?
                .text
                .clone();
            let alias = match (tokens.get(2), tokens.get(3)) {
                (None, _) => default_alias(&target),
                (Some(kw), Some(name)) if kw.text == "as" && !kw.quoted => {
                    ident(line_no, name)?
                }
                _ => {
                    return Err(CoreError::Validation(format!(
                        "line {line_no}: expected: require <module> [as <alias>]"
                    )));
                }
            };
            Ok(Stmt::Require { target, alias })
        }
        "pipe_put" => {
            let name = parse_expr(line_no, line, &tokens, 1)?;
            let value = parse_expr(line_no, line, &tokens, 2)?;
            let timeout_ms = match tokens.get(3) {
                None => None,
                some => Some(integer(line_no, some, "pipe_put <name> <value> [ms]")?),
            };
            Ok(Stmt::PipePut {
                name,
                value,
                timeout_ms,
            })
        }
        "loop" => {
            let body = parse_block(lines, line_no)?;
            Ok(Stmt::Loop { body })
        }
        "repeat" => {
            let count = integer(line_no, tokens.get(1), "repeat <count>")?;
            let body = parse_block(lines, line_no)?;
            Ok(Stmt::Repeat { count, body })
        }
        "db_open" => {
            let driver = parse_expr(line_no, line, &tokens, 1)?;
            let dsn = parse_expr(line_no, line, &tokens, 2)?;
            Ok(Stmt::DbOpen { driver, dsn })
        }
        "db_tx" => {
            let isolation = integer(line_no, tokens.get(1), "db_tx <isolation> <fn>")? as i64;
            let call = parse_call(line_no, line, &tokens[2..])?;
            Ok(Stmt::DbTx { isolation, call })
        }
        other => Err(CoreError::Validation(format!(
            "line {line_no}: unknown statement: {other}"
        ))),
    }
}

fn parse_rhs(line_no: usize, line: &str, tokens: &[Token]) -> Result<Rhs, CoreError> {
    let head = &tokens[0];
    if !head.quoted {
        match head.text.as_str() {
            "call" => return Ok(Rhs::Call(parse_call(line_no, line, &tokens[1..])?)),
            "concat" => {
                let exprs = parse_exprs(line_no, line, &tokens[1..])?;
                if exprs.is_empty() {
                    return Err(CoreError::Validation(format!(
                        "line {line_no}: concat needs at least one value"
                    )));
                }
                return Ok(Rhs::Concat(exprs));
            }
            "pipe_poll" => {
                let name = parse_expr(line_no, line, tokens, 1)?;
                let timeout_ms = match tokens.get(2) {
                    None => None,
                    some => Some(integer(line_no, some, "pipe_poll <name> [ms]")?),
                };
                return Ok(Rhs::PipePoll { name, timeout_ms });
            }
            "pipe_drain" => {
                let name = parse_expr(line_no, line, tokens, 1)?;
                let size = integer(line_no, tokens.get(2), "pipe_drain <name> <size> [ms]")?;
                let timeout_ms = match tokens.get(3) {
                    None => None,
                    some => Some(integer(line_no, some, "pipe_drain <name> <size> [ms]")?),
                };
                return Ok(Rhs::PipeDrain {
                    name,
                    size: size as usize,
                    timeout_ms,
                });
            }
            "db_query" => {
                let sql = parse_expr(line_no, line, tokens, 1)?;
                let params = parse_exprs(line_no, line, &tokens[2..])?;
                return Ok(Rhs::DbQuery { sql, params });
            }
            "db_exec" => {
                let sql = parse_expr(line_no, line, tokens, 1)?;
                let params = parse_exprs(line_no, line, &tokens[2..])?;
                return Ok(Rhs::DbExec { sql, params });
            }
            "get" => {
                let target = ident(
                    line_no,
                    tokens.get(1).ok_or_else(|| {
                        CoreError::Validation(format!("line {line_no}: expected: get <var> <key>"))
                    })?,
                )?;
                let key = parse_expr(line_no, line, tokens, 2)?;
                return Ok(Rhs::Get { target, key });
            }
            _ => {}
        }
    }
    Ok(Rhs::Expr(parse_single_expr(line_no, line, tokens)?))
}

fn parse_call(line_no: usize, line: &str, tokens: &[Token]) -> Result<CallSpec, CoreError> {
    let head = tokens.first().ok_or_else(|| {
        CoreError::Validation(format!("line {line_no}: call target is missing"))
    })?;
    if head.quoted {
        return Err(CoreError::Validation(format!(
            "line {line_no}: call target must be a function name"
        )));
    }
    let callee = match head.text.split_once('.') {
        Some((alias, func)) if !alias.is_empty() && !func.is_empty() => Callee::Module {
            alias: alias.to_string(),
            func: func.to_string(),
        },
        Some(_) => {
            return Err(CoreError::Validation(format!(
                "line {line_no}: malformed call target: {}",
                head.text
            )));
        }
        None => Callee::Local(head.text.clone()),
    };
    let args = parse_exprs(line_no, line, &tokens[1..])?;
    Ok(CallSpec { callee, args })
}

/// Parse the expression starting at `tokens[at]`; trailing tokens are only
/// legal when that expression is a `json` literal (which consumes the rest
/// of the line).
fn parse_expr(line_no: usize, line: &str, tokens: &[Token], at: usize) -> Result<Expr, CoreError> {
    let token = tokens.get(at).ok_or_else(|| {
        CoreError::Validation(format!("line {line_no}: expected a value"))
    })?;
    if !token.quoted && token.text == "json" {
        return parse_json_literal(line_no, line, token);
    }
    token_expr(line_no, token)
}

fn parse_single_expr(line_no: usize, line: &str, tokens: &[Token]) -> Result<Expr, CoreError> {
    let expr = parse_expr(line_no, line, tokens, 0)?;
    let json_head = !tokens[0].quoted && tokens[0].text == "json";
    if tokens.len() > 1 && !json_head {
        return Err(CoreError::Validation(format!(
            "line {line_no}: unexpected trailing tokens"
        )));
    }
    Ok(expr)
}

/// Parse a run of expressions; a `json` literal must come last.
fn parse_exprs(line_no: usize, line: &str, tokens: &[Token]) -> Result<Vec<Expr>, CoreError> {
    let mut exprs = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !token.quoted && token.text == "json" {
            exprs.push(parse_json_literal(line_no, line, token)?);
            return Ok(exprs);
        }
        exprs.push(token_expr(line_no, token)?);
    }
    Ok(exprs)
}

fn parse_json_literal(line_no: usize, line: &str, token: &Token) -> Result<Expr, CoreError> {
    let raw = line[token.start + "json".len()..].trim();
    if raw.is_empty() {
        return Err(CoreError::Validation(format!(
            "line {line_no}: json literal is empty"
        )));
    }
    let value: serde_json::Value = serde_json::from_str(raw).map_err(|err| {
        CoreError::Validation(format!("line {line_no}: invalid json literal: {err}"))
    })?;
    Ok(Expr::Literal(ScriptValue::from_json(value)))
}

fn token_expr(line_no: usize, token: &Token) -> Result<Expr, CoreError> {
    if token.quoted {
        return Ok(Expr::Literal(ScriptValue::String(token.text.clone())));
    }
    match token.text.as_str() {
        "true" => return Ok(Expr::Literal(ScriptValue::Bool(true))),
        "false" => return Ok(Expr::Literal(ScriptValue::Bool(false))),
        "null" => return Ok(Expr::Literal(ScriptValue::Null)),
        _ => {}
    }
    if let Ok(n) = token.text.parse::<i64>() {
        return Ok(Expr::Literal(ScriptValue::Int(n)));
    }
    if let Ok(f) = token.text.parse::<f64>() {
        return Ok(Expr::Literal(ScriptValue::Float(f)));
    }
    if is_ident(&token.text) {
        return Ok(Expr::Var(token.text.clone()));
    }
    Err(CoreError::Validation(format!(
        "line {line_no}: unexpected token: {}",
        token.text
    )))
}

fn ident(line_no: usize, token: &Token) -> Result<String, CoreError> {
    if token.quoted || !is_ident(&token.text) {
        return Err(CoreError::Validation(format!(
            "line {line_no}: invalid identifier: {}",
            token.text
        )));
    }
    Ok(token.text.clone())
}

fn is_ident(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn integer(line_no: usize, token: Option<&Token>, usage: &str) -> Result<u64, CoreError> {
    token
        .filter(|t| !t.quoted)
        .and_then(|t| t.text.parse::<u64>().ok())
        .ok_or_else(|| CoreError::Validation(format!("line {line_no}: expected: {usage}")))
}

fn default_alias(target: &str) -> String {
    target.trim_start_matches("./").to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_functions_and_implicit_main() {
        let program = parse_program(
            "# greeter\nfn greet who\n  let msg = concat \"hello \" who\n  return msg\nend\nlet out = call greet \"world\"\nreturn out\n",
        )
        .unwrap();
        assert!(program.has_main());
        let greet = program.function("greet").unwrap();
        assert_eq!(greet.params, vec!["who"]);
        assert_eq!(greet.body.len(), 2);
        let main = program.function("main").unwrap();
        assert_eq!(main.params, vec!["args"]);
    }

    #[test]
    fn module_without_main_is_valid() {
        let program = parse_program("fn helper\n  return 1\nend\n").unwrap();
        assert!(!program.has_main());
        assert!(program.function("helper").is_some());
    }

    #[test]
    fn explicit_main_conflicts_with_top_level() {
        let err = parse_program("fn main\n  return 1\nend\nreturn 2\n").unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn json_literal_takes_rest_of_line() {
        let program = parse_program("return json {\"a\": [1, 2.5], \"b\": null}\n").unwrap();
        let main = program.function("main").unwrap();
        let Stmt::Return { expr: Some(Expr::Literal(value)) } = &main.body[0] else {
            panic!("expected a literal return");
        };
        let ScriptValue::Object(map) = value else {
            panic!("expected an object literal");
        };
        assert_matches!(map.get("b"), Some(ScriptValue::Null));
    }

    #[test]
    fn quoted_strings_unescape() {
        let program = parse_program("return \"a\\\"b\\nc\"\n").unwrap();
        let main = program.function("main").unwrap();
        let Stmt::Return { expr: Some(Expr::Literal(ScriptValue::String(s))) } = &main.body[0]
        else {
            panic!("expected a string return");
        };
        assert_eq!(s, "a\"b\nc");
    }

    #[test]
    fn call_targets_split_on_dot() {
        let program = parse_program("call util.trim \" x \"\n").unwrap();
        let main = program.function("main").unwrap();
        let Stmt::Call(spec) = &main.body[0] else {
            panic!("expected a call");
        };
        assert_matches!(
            &spec.callee,
            Callee::Module { alias, func } if alias == "util" && func == "trim"
        );
    }

    #[test]
    fn require_aliases() {
        let program =
            parse_program("require ./util\nrequire lodash as lo\nreturn null\n").unwrap();
        let main = program.function("main").unwrap();
        assert_matches!(&main.body[0], Stmt::Require { target, alias } if target == "./util" && alias == "util");
        assert_matches!(&main.body[1], Stmt::Require { target, alias } if target == "lodash" && alias == "lo");
    }

    #[test]
    fn timer_statements_parse() {
        let program = parse_program("fn tick\nend\nafter 50 tick\nevery 10 3 tick\n").unwrap();
        let main = program.function("main").unwrap();
        assert_matches!(&main.body[0], Stmt::After { delay_ms: 50, .. });
        assert_matches!(
            &main.body[1],
            Stmt::Every { interval_ms: 10, count: 3, .. }
        );
    }

    #[test]
    fn unknown_statement_reports_line() {
        let err = parse_program("let a = 1\nfrobnicate\n").unwrap_err();
        let CoreError::Validation(message) = err else {
            panic!("expected a validation error");
        };
        assert!(message.contains("line 2"), "got: {message}");
    }

    #[test]
    fn unclosed_block_is_rejected() {
        let err = parse_program("loop\n  sleep 1\n").unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
        let err = parse_program("end\n").unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn duplicate_function_is_rejected() {
        let err = parse_program("fn a\nend\nfn a\nend\n").unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn db_and_pipe_forms_parse() {
        let program = parse_program(
            "db_open \"sqlite\" \"app.db\"\nlet rows = db_query \"select 1\" 5 \"x\"\nlet n = db_exec \"delete from t\"\npipe_put \"jobs\" 42 100\nlet item = pipe_poll \"jobs\" 50\nlet batch = pipe_drain \"jobs\" 10 50\nreturn rows\n",
        )
        .unwrap();
        let main = program.function("main").unwrap();
        assert_matches!(&main.body[0], Stmt::DbOpen { .. });
        let Stmt::Let { rhs: Rhs::DbQuery { params, .. }, .. } = &main.body[1] else {
            panic!("expected db_query rhs");
        };
        assert_eq!(params.len(), 2);
        assert_matches!(&main.body[3], Stmt::PipePut { timeout_ms: Some(100), .. });
        assert_matches!(
            &main.body[4],
            Stmt::Let { rhs: Rhs::PipePoll { timeout_ms: Some(50), .. }, .. }
        );
        assert_matches!(
            &main.body[5],
            Stmt::Let { rhs: Rhs::PipeDrain { size: 10, timeout_ms: Some(50), .. }, .. }
        );
    }
}
