//! The `c6t` command-line driver.
//!
//! Runs each source file through the pipeline appropriate to its
//! suffix (`.c` compiles, `.s` assembles, anything else is read as a
//! serialised object module), then links the results into a flat
//! binary. Any diagnostic makes the exit status non-zero.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::debug;

use c6t::asm::OpTable;
use c6t::codegen::Scheme;
use c6t::link::Linker;
use c6t::obj::Module;
use c6t::Diagnostics;

/// C6T compiler, assembler and linker for the Intel 8080.
#[derive(Debug, Parser)]
#[command(name = "c6t", version)]
struct Args {
    /// Source files: .c to compile, .s to assemble, anything else is
    /// read as an object module.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Emit preprocessed output (.i) and stop.
    #[arg(short = 'P')]
    preprocess_only: bool,

    /// Emit IR (.ir) and stop.
    #[arg(short = 'R')]
    ir_only: bool,

    /// Emit assembly (.s) and stop.
    #[arg(short = 'S')]
    assembly_only: bool,

    /// Emit object files (.o) only; no link step.
    #[arg(short = 'c')]
    objects_only: bool,

    /// Write a symbol listing (.sym) alongside the executable.
    #[arg(short = 'Y')]
    symbol_listing: bool,

    /// Output executable name.
    #[arg(short = 'o', default_value = "a.out")]
    output: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(errors) => {
            debug!("{} diagnostics", errors);
            ExitCode::FAILURE
        }
        Err(err) => {
            eprintln!("c6t: {:#}", err);
            ExitCode::FAILURE
        }
    }
}

/// Print a stage's diagnostics, returning how many there were.
fn report(diags: &Diagnostics) -> usize {
    for diag in diags.iter() {
        eprintln!("{}", diag);
    }
    diags.count()
}

fn run(args: &Args) -> Result<usize> {
    let scheme = Scheme::default_8080();
    let ops = OpTable::default_8080();
    let mut errors = 0usize;
    let mut modules: Vec<Module> = Vec::new();

    for file in &args.files {
        let suffix = file.extension().and_then(|ext| ext.to_str()).unwrap_or("");
        match suffix {
            "c" => {
                let source = fs::read_to_string(file)
                    .with_context(|| format!("reading {}", file.display()))?;

                let (cooked, diags) = c6t::preproc::preprocess(&source);
                errors += report(&diags);
                if args.preprocess_only {
                    write_out(&file.with_extension("i"), cooked.as_bytes())?;
                    continue;
                }

                let compiled = c6t::parse::compile(&cooked);
                errors += report(&compiled.diags);
                if !compiled.diags.is_empty() {
                    continue;
                }
                if args.ir_only {
                    write_out(&file.with_extension("ir"), compiled.ir.as_bytes())?;
                    continue;
                }

                let assembly = match c6t::codegen::generate(&compiled.ir, &scheme) {
                    Ok(assembly) => assembly,
                    Err(err) => {
                        eprintln!("{}", err);
                        errors += 1;
                        continue;
                    }
                };
                if args.assembly_only {
                    write_out(&file.with_extension("s"), assembly.as_bytes())?;
                    continue;
                }

                match assemble(&assembly, &ops, &mut errors) {
                    Some(module) => {
                        finish_module(args, file, module, &mut modules)?;
                    }
                    None => continue,
                }
            }
            "s" => {
                if args.preprocess_only || args.ir_only || args.assembly_only {
                    continue;
                }
                let source = fs::read_to_string(file)
                    .with_context(|| format!("reading {}", file.display()))?;
                if let Some(module) = assemble(&source, &ops, &mut errors) {
                    finish_module(args, file, module, &mut modules)?;
                }
            }
            _ => {
                let bytes =
                    fs::read(file).with_context(|| format!("reading {}", file.display()))?;
                let module = Module::parse(&bytes)
                    .with_context(|| format!("parsing object module {}", file.display()))?;
                modules.push(module);
            }
        }
    }

    if args.preprocess_only || args.ir_only || args.assembly_only || args.objects_only {
        return Ok(errors);
    }
    if errors > 0 {
        return Ok(errors);
    }

    let image = Linker::new(modules).link()?;
    write_out(&args.output, &image.bytes)?;
    if args.symbol_listing {
        let mut listing = String::new();
        for (name, value) in &image.symbols {
            listing.push_str(&format!("{}: ${:x}\n", name, value));
        }
        write_out(&args.output.with_extension("sym"), listing.as_bytes())?;
    }
    Ok(0)
}

fn assemble(source: &str, ops: &OpTable, errors: &mut usize) -> Option<Module> {
    let (module, diags) = c6t::asm::assemble(source, ops);
    *errors += report(&diags);
    module
}

fn finish_module(
    args: &Args,
    file: &PathBuf,
    module: Module,
    modules: &mut Vec<Module>,
) -> Result<()> {
    if args.objects_only {
        write_out(&file.with_extension("o"), &module.write())?;
    } else {
        modules.push(module);
    }
    Ok(())
}

fn write_out(path: &PathBuf, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}
