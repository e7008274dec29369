//! CLI entry point and the compile pipeline driver.

use std::path::PathBuf;

use clap::Parser as _;

use crate::backend;
use crate::common::error::CompileError;
use crate::frontend;
use crate::ir::lowering;
use crate::passes;

#[derive(Debug, clap::Parser)]
#[command(name = "mcc", version, about = "Compiler for a small procedural language targeting a 16-register VM")]
pub struct Args {
    /// Source file to compile.
    pub input: PathBuf,
    /// Assembly output file.
    #[arg(short, long)]
    pub output: PathBuf,
}

/// Parse the command line, compile, and write the assembly file.
pub fn run() -> Result<(), CompileError> {
    let args = Args::parse();
    let source = std::fs::read_to_string(&args.input)?;
    let asm = Driver::new().compile(&source)?;
    std::fs::write(&args.output, asm)?;
    Ok(())
}

/// The pipeline: parse -> lower -> passes -> emit. The compiler is pure;
/// one translation unit in, one assembly text out, no persistent state.
#[derive(Default)]
pub struct Driver;

impl Driver {
    pub fn new() -> Driver {
        Driver
    }

    pub fn compile(&self, source: &str) -> Result<String, CompileError> {
        let program = frontend::parse(source)?;
        let mut module = lowering::lower(&program)?;
        passes::default_pipeline().run(&mut module)?;
        backend::generate(&module)
    }
}
