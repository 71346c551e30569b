//! rillc-drv - Pipeline orchestration and the `rillc` CLI.
//!
//! The driver owns the session: it reads the source, runs the phases in
//! order (lex, parse, check, then either the walk interpreter or the LIR
//! compiler plus VM), renders diagnostics with source excerpts, and maps
//! everything to process exit codes (0 success, 1 usage error or fatal
//! diagnostic).
//!
//! It is also where the builtin signature table lives: the type checker is
//! generic over its primitives and the driver enumerates them.

use std::fs;
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{ArgAction, ArgGroup, Parser, ValueEnum};
use tracing::debug;

use rillc_lir::Chunk;
use rillc_par::Ast;
use rillc_sem::Type;
use rillc_util::{diagnostic, Diagnostic, Span, StringPool, Symbol};
use rillc_walk::EvalError;

/// Command line interface.
///
/// `rillc <mode> [-V...] [-o PATH] [-b BACKEND] <filepath>`; the filepath
/// `-` reads from stdin and starts a REPL session.
#[derive(Parser, Debug)]
#[command(name = "rillc")]
#[command(about = "Compiler and interpreter for the Rill language", long_about = None)]
// `-V` selects verbosity; the auto version flag would also claim it
#[command(version = env!("CARGO_PKG_VERSION"), disable_version_flag = true)]
#[command(group(ArgGroup::new("mode").required(true).args(["compile", "interpret"])))]
pub struct Cli {
    /// Compile: lower to the chosen backend and write its output
    #[arg(short = 'c')]
    pub compile: bool,

    /// Interpret: run the program
    #[arg(short = 'i')]
    pub interpret: bool,

    /// Backend to use
    #[arg(short = 'b', value_enum, default_value_t = Backend::Walk)]
    pub backend: Backend,

    /// Output file path (compile mode); stdout when omitted
    #[arg(short = 'o')]
    pub output: Option<PathBuf>,

    /// Increase verbosity (repeatable; once prints phases, twice prints IR)
    #[arg(short = 'V', action = ArgAction::Count)]
    pub verbose: u8,

    /// Source file path, or `-` for stdin/REPL
    pub filepath: String,
}

/// Which evaluator executes the program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Tree-walking reference interpreter
    Walk,
    /// LIR compiler plus bytecode VM
    Lir,
}

/// Install the tracing subscriber according to `-V` count.
pub fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

/// Builtin signatures seeded into the type checker's root scope.
///
/// This is the authoritative list; the walk interpreter and the LIR
/// compiler dispatch the same names.
pub fn builtin_signatures(pool: &mut StringPool) -> Vec<(Symbol, Type)> {
    let u8_array = Type::array(Type::U8);
    let i64_array = Type::array(Type::I64);
    vec![
        (
            pool.intern("read_int"),
            Type::function(vec![Type::Nil], Type::I64),
        ),
        (
            pool.intern("read_char"),
            Type::function(vec![Type::Nil], Type::U8),
        ),
        (
            pool.intern("write_int"),
            Type::function(vec![Type::I64], Type::Nil),
        ),
        (
            pool.intern("write_char"),
            Type::function(vec![Type::U8], Type::Nil),
        ),
        (
            pool.intern("write_str"),
            Type::function(vec![u8_array], Type::Nil),
        ),
        (
            pool.intern("make_array"),
            Type::function(vec![Type::I64], i64_array),
        ),
        (
            pool.intern("exit"),
            Type::function(vec![Type::I64], Type::Nil),
        ),
    ]
}

/// Entry point used by `main`. Returns the process exit code.
pub fn run(cli: &Cli) -> i32 {
    if cli.filepath == "-" {
        run_repl(cli)
    } else {
        run_file(cli)
    }
}

fn report(message: String, span: Option<Span>, source: &str) {
    let diag = Diagnostic::error(message, span.unwrap_or(Span::DUMMY));
    let stderr = io::stderr();
    let color = stderr.is_terminal();
    let mut out = stderr.lock();
    if span.is_some() {
        let _ = diagnostic::render(&diag, source, &mut out, color);
    } else {
        let _ = writeln!(out, "error: {}", diag.message);
    }
}

/// Lex, parse and type check one source text.
fn front_end(source: &str, pool: &mut StringPool, verbose: u8) -> Result<Ast, i32> {
    debug!("parsing");
    let tokens = rillc_lex::tokenize(source, pool).map_err(|err| {
        report(err.to_string(), Some(err.span()), source);
        1
    })?;
    let ast = rillc_par::parse(&tokens).map_err(|err| {
        report(err.to_string(), Some(err.span()), source);
        1
    })?;
    if ast.is_empty() {
        return Ok(ast);
    }

    if verbose >= 2 {
        let mut out = Vec::new();
        if ast.write_sexp(ast.root(), pool, &mut out).is_ok() {
            eprintln!("{}", String::from_utf8_lossy(&out));
        }
    }

    debug!("type checking");
    let builtins = builtin_signatures(pool);
    rillc_sem::check(&ast, pool, &builtins).map_err(|err| {
        report(err.to_string(), Some(err.span()), source);
        1
    })?;

    Ok(ast)
}

fn lower(ast: &Ast, pool: &StringPool, source: &str, verbose: u8) -> Result<Chunk, i32> {
    debug!("compiling (lir)");
    let chunk = rillc_lir::compile(ast, pool).map_err(|err| {
        report(err.to_string(), Some(err.span()), source);
        1
    })?;
    if verbose >= 2 {
        let mut out = Vec::new();
        if rillc_lir::write_chunk(&chunk, &mut out).is_ok() {
            eprintln!("{}", String::from_utf8_lossy(&out));
        }
    }
    Ok(chunk)
}

fn run_file(cli: &Cli) -> i32 {
    let source = match fs::read_to_string(&cli.filepath) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: can't read `{}`: {err}", cli.filepath);
            return 1;
        }
    };

    let mut pool = StringPool::new();
    let ast = match front_end(&source, &mut pool, cli.verbose) {
        Ok(ast) => ast,
        Err(code) => return code,
    };
    if ast.is_empty() {
        return 0;
    }

    if cli.compile {
        compile_to_output(cli, &ast, &pool, &source)
    } else {
        interpret(cli, &ast, &mut pool, &source)
    }
}

fn compile_to_output(cli: &Cli, ast: &Ast, pool: &StringPool, source: &str) -> i32 {
    if cli.backend != Backend::Lir {
        eprintln!("error: backend `walk` cannot compile; use `-b lir`");
        return 1;
    }
    let chunk = match lower(ast, pool, source, cli.verbose) {
        Ok(chunk) => chunk,
        Err(code) => return code,
    };

    debug!("writing output");
    match write_output(&chunk, cli.output.as_deref()) {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("error: {err:#}");
            1
        }
    }
}

fn write_output(chunk: &Chunk, output: Option<&Path>) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            let mut file = fs::File::create(path)
                .with_context(|| format!("can't create `{}`", path.display()))?;
            rillc_lir::write_chunk(chunk, &mut file)
                .with_context(|| format!("can't write `{}`", path.display()))?;
        }
        None => {
            rillc_lir::write_chunk(chunk, &mut io::stdout().lock())
                .context("can't write to stdout")?;
        }
    }
    Ok(())
}

fn interpret(cli: &Cli, ast: &Ast, pool: &mut StringPool, source: &str) -> i32 {
    let stdin = io::stdin();
    let stdout = io::stdout();
    match cli.backend {
        Backend::Walk => {
            debug!("interpreting (walk)");
            let mut interp =
                rillc_walk::Interpreter::new(ast, pool, stdin.lock(), stdout.lock());
            match interp.eval() {
                Ok(_) => 0,
                Err(EvalError::Exit(code)) => code as i32,
                Err(err) => {
                    let span = err.span();
                    report(err.to_string(), span, source);
                    1
                }
            }
        }
        Backend::Lir => {
            let chunk = match lower(ast, pool, source, cli.verbose) {
                Ok(chunk) => chunk,
                Err(code) => return code,
            };
            debug!("interpreting (lir)");
            let mut vm = rillc_vm::Vm::new(stdin.lock(), stdout.lock());
            match vm.run(&chunk) {
                Ok(()) => 0,
                Err(err) => {
                    report(err.to_string(), None, source);
                    1
                }
            }
        }
    }
}

/// Read stdin line by line, treating each line as a little program.
///
/// With a terminal attached, prompts with `rill> ` and echoes each line's
/// value as `==> value`.
fn run_repl(cli: &Cli) -> i32 {
    if cli.compile {
        eprintln!("error: compile mode needs a file path");
        return 1;
    }

    let interactive = io::stdin().is_terminal();

    loop {
        if interactive {
            eprint!("rill> ");
            let _ = io::stderr().flush();
        }
        let mut line = String::new();
        // take the lock per line so the evaluators can read stdin too
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => return 0,
            Ok(_) => {}
            Err(err) => {
                eprintln!("error: {err}");
                return 1;
            }
        }

        let mut pool = StringPool::new();
        let ast = match front_end(&line, &mut pool, cli.verbose) {
            Ok(ast) => ast,
            Err(code) => return code,
        };
        if ast.is_empty() {
            continue;
        }

        match cli.backend {
            Backend::Walk => {
                let value = {
                    let stdin = io::stdin();
                    let stdout = io::stdout();
                    let mut interp = rillc_walk::Interpreter::new(
                        &ast,
                        &mut pool,
                        stdin.lock(),
                        stdout.lock(),
                    );
                    interp.eval()
                };
                match value {
                    Ok(value) => println!("==> {}", value.borrow()),
                    Err(EvalError::Exit(code)) => return code as i32,
                    Err(err) => {
                        let span = err.span();
                        report(err.to_string(), span, &line);
                        return 1;
                    }
                }
            }
            Backend::Lir => {
                let chunk = match lower(&ast, &pool, &line, cli.verbose) {
                    Ok(chunk) => chunk,
                    Err(code) => return code,
                };
                let result = {
                    let stdin = io::stdin();
                    let stdout = io::stdout();
                    let mut vm = rillc_vm::Vm::new(stdin.lock(), stdout.lock());
                    vm.run(&chunk)
                        .map(|()| chunk.result.and_then(|op| vm.operand_value(op)))
                };
                match result {
                    Ok(Some(value)) => println!("==> {value}"),
                    Ok(None) => {}
                    Err(err) => {
                        report(err.to_string(), None, &line);
                        return 1;
                    }
                }
            }
        }
    }
}
