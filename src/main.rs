use anyhow::Context;
use clap::Parser as ClapParser;
use lox_bytecode::disasm::disassemble_chunk;
use lox_bytecode::{Chunk, Inst};
use lox_vm::{DebugFlags, Val, Vm, VmConfig};
use tracing_subscriber::EnvFilter;

/// A hand-assembled expression. `ops` are applied in order; numbers become
/// constant loads.
struct Demo {
    name: &'static str,
    line: u32,
    ops: &'static [Step],
}

enum Step {
    Num(f64),
    Op(Inst),
}

use Step::{Num, Op};

const DEMOS: &[Demo] = &[
    Demo {
        name: "-((1.2 + 3.4) / 5.6)",
        line: 1,
        ops: &[
            Num(1.2),
            Num(3.4),
            Op(Inst::Add),
            Num(5.6),
            Op(Inst::Divide),
            Op(Inst::Negate),
        ],
    },
    Demo {
        name: "1 * 2 + 3",
        line: 2,
        ops: &[Num(1.0), Num(2.0), Op(Inst::Multiply), Num(3.0), Op(Inst::Add)],
    },
    Demo {
        name: "1 + 2 * 3",
        line: 3,
        ops: &[Num(1.0), Num(2.0), Num(3.0), Op(Inst::Multiply), Op(Inst::Add)],
    },
    Demo {
        name: "3 - 2 - 1",
        line: 4,
        ops: &[
            Num(3.0),
            Num(2.0),
            Op(Inst::Subtract),
            Num(1.0),
            Op(Inst::Subtract),
        ],
    },
    Demo {
        name: "1 + 2 * 3 - 4 / -5",
        line: 5,
        ops: &[
            Num(1.0),
            Num(2.0),
            Num(3.0),
            Op(Inst::Multiply),
            Op(Inst::Add),
            Num(4.0),
            Num(5.0),
            Op(Inst::Negate),
            Op(Inst::Divide),
            Op(Inst::Subtract),
        ],
    },
];

impl Demo {
    fn assemble(&self) -> anyhow::Result<Chunk<Val>> {
        let mut chunk = Chunk::new();
        for step in self.ops {
            match step {
                Num(n) => {
                    chunk.write_constant(Val::Number(*n), self.line)?;
                }
                Op(inst) => {
                    chunk.write_inst(*inst, self.line);
                }
            }
        }
        chunk.write_inst(Inst::Return, self.line);
        Ok(chunk)
    }
}

fn main() -> anyhow::Result<()> {
    let opt = Opt::parse();

    let mut debug = DebugFlags::empty();
    debug.set(DebugFlags::TRACE_EXECUTION, opt.trace);
    debug.set(DebugFlags::LOG_GC, opt.log_gc);
    debug.set(DebugFlags::STRESS_GC, opt.stress_gc);

    let default_filter = if debug.is_empty() { "warn" } else { "lox_vm=trace" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut vm = Vm::new(VmConfig::default().with_debug(debug));

    let demos = match opt.chunk {
        Some(n) => {
            let demo = n
                .checked_sub(1)
                .and_then(|i| DEMOS.get(i))
                .with_context(|| format!("no demo chunk {}; there are {}", n, DEMOS.len()))?;
            std::slice::from_ref(demo)
        }
        None => DEMOS,
    };

    for demo in demos {
        let chunk = demo
            .assemble()
            .with_context(|| format!("failed to assemble `{}`", demo.name))?;
        if opt.disassemble {
            print!("{}", disassemble_chunk(&chunk, demo.name, vm.heap()));
        }
        match vm.interpret_chunk(chunk) {
            Ok(value) => println!("{} = {}", demo.name, vm.display(value)),
            Err(e) => eprintln!("{}", e),
        }
    }

    Ok(())
}

#[derive(clap::Parser)]
#[clap(about, version, author)]
struct Opt {
    /// Print the bytecode of each chunk before running it.
    #[clap(short, long)]
    disassemble: bool,

    /// Log every instruction with the operand stack.
    #[clap(long)]
    trace: bool,

    /// Log every allocation, mark and free.
    #[clap(long)]
    log_gc: bool,

    /// Collect garbage before every allocation.
    #[clap(long)]
    stress_gc: bool,

    /// Run only the n-th demo chunk (1-based).
    #[clap(short, long)]
    chunk: Option<usize>,
}
