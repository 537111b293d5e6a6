//! evalcore - drive the execution core from the command line
//!
//! Spawns a number of contexts that all run the same loop-heavy code unit
//! under the shared execution lock, then prints the runtime counters.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use evalcore::bytecode::ArtifactState;
use evalcore::{
    CodeUnit, CodeUnitBuilder, CompileOutcome, CompiledArtifact, Frame, Opcode, Runtime,
    RuntimeConfig, Value, VmError, VmResult,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "evalcore", version)]
#[command(about = "Run code units on several threads sharing one execution lock")]
struct Cli {
    /// Number of contexts, one OS thread each (default: CPU count)
    #[arg(long)]
    threads: Option<usize>,

    /// Calls to sum_to per context
    #[arg(long, default_value = "200")]
    iterations: u32,

    /// Argument passed to sum_to
    #[arg(long, default_value = "10000")]
    n: i64,

    /// TOML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the switch interval in microseconds
    #[arg(long)]
    switch_interval_us: Option<u64>,

    /// Install a compiler that turns sum_to into a native artifact
    #[arg(long)]
    compile: bool,

    /// Trace every interpreted instruction
    #[arg(long)]
    trace: bool,
}

fn main() -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("evalcore=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_names(true)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => RuntimeConfig::default(),
    }
    .with_env_overrides();
    if let Some(us) = cli.switch_interval_us {
        config.switch_interval_us = us;
    }
    if cli.trace {
        config.vm.trace = true;
    }

    let threads = cli.threads.unwrap_or_else(num_cpus::get).max(1);
    info!(
        threads,
        iterations = cli.iterations,
        n = cli.n,
        compile = cli.compile,
        switch_interval_us = config.switch_interval_us,
        "starting"
    );

    let runtime = if cli.compile {
        Runtime::with_compiler(config, compile_sum_to)
    } else {
        Runtime::new(config)
    };

    let unit = sum_to();
    debug!("sum_to bytecode:\n{}", unit.disassemble());
    let Some(expected) = triangular(cli.n) else {
        bail!("sum_to({}) does not fit in an i64", cli.n);
    };

    let start = Instant::now();
    let mut workers = Vec::with_capacity(threads);
    for i in 0..threads {
        let unit = Arc::clone(&unit);
        let (n, iterations) = (cli.n, cli.iterations);
        let worker = runtime
            .spawn(format!("worker-{i}"), move |session| -> VmResult<i64> {
                let mut last = 0;
                for _ in 0..iterations {
                    last = match session.call(&unit, &[Value::Int(n)])? {
                        Value::Int(v) => v,
                        other => {
                            return Err(VmError::TypeError {
                                expected: "Int",
                                got: other.type_name(),
                            })
                        }
                    };
                }
                Ok(last)
            })
            .context("spawning worker thread")?;
        workers.push(worker);
    }

    for worker in workers {
        let id = worker.id();
        let result = match worker.join() {
            Ok(result) => result,
            Err(_) => bail!("worker {id} panicked"),
        };
        match result {
            Some(Ok(value)) if value == expected => {}
            Some(Ok(value)) => bail!("worker {id} computed {value}, expected {expected}"),
            Some(Err(e)) => bail!("worker {id} failed: {e}"),
            None => info!(context = %id, "worker exited during finalization"),
        }
    }
    let elapsed = start.elapsed();

    info!(elapsed_ms = elapsed.as_millis() as u64, "done");
    println!("{}", runtime.stats());
    Ok(())
}

/// sum_to(n) = 1 + 2 + ... + n, as an interpreted loop
fn sum_to() -> Arc<CodeUnit> {
    let mut b = CodeUnitBuilder::new("sum_to");
    b.set_arity(1);
    b.set_local_count(3);
    b.emit_int(0);
    b.emit_byte(Opcode::StoreLocal, 1);
    b.emit_int(1);
    b.emit_byte(Opcode::StoreLocal, 2);
    let top = b.current_offset();
    b.emit_byte(Opcode::LoadLocal, 2);
    b.emit_byte(Opcode::LoadLocal, 0);
    b.emit(Opcode::Le);
    let exit = b.emit_jump(Opcode::JumpIfFalse);
    b.emit_byte(Opcode::LoadLocal, 1);
    b.emit_byte(Opcode::LoadLocal, 2);
    b.emit(Opcode::Add);
    b.emit_byte(Opcode::StoreLocal, 1);
    b.emit_byte(Opcode::LoadLocal, 2);
    b.emit_int(1);
    b.emit(Opcode::Add);
    b.emit_byte(Opcode::StoreLocal, 2);
    b.emit_loop(top);
    b.patch_jump(exit);
    b.emit_byte(Opcode::LoadLocal, 1);
    b.emit(Opcode::Return);
    b.build_arc()
}

fn compile_sum_to(unit: &CodeUnit) -> CompileOutcome {
    if unit.name() != "sum_to" {
        return CompileOutcome::Declined;
    }
    CompileOutcome::Compiled(CompiledArtifact::stateless(sum_to_closed_form))
}

fn sum_to_closed_form(_: &ArtifactState, frame: &mut Frame) -> VmResult<Value> {
    let n = match frame.arg(0) {
        Value::Int(n) => *n,
        other => {
            return Err(VmError::TypeError {
                expected: "Int",
                got: other.type_name(),
            })
        }
    };
    triangular(n).map(Value::Int).ok_or(VmError::ArithmeticOverflow)
}

/// 1 + 2 + ... + n, or 0 for n <= 0; `None` on overflow
fn triangular(n: i64) -> Option<i64> {
    if n <= 0 {
        return Some(0);
    }
    // n and n + 1 are consecutive, so halve the even one first
    let (a, b) = if n % 2 == 0 { (n / 2, n + 1) } else { (n, n / 2 + 1) };
    a.checked_mul(b)
}
