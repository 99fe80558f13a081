use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser as ClapParser;

use minicc::{
    backend::{codegen_module, generate_assembly, CodegenOptions},
    frontend::{parser::Parser, resolve, SourceFile, SourceFileOrigin},
    middle::{
        ir::{self, ast_lowering::lower_to_ir, parse::parse_module, pretty_print},
        optimization::optimize_module,
    },
};

#[derive(Debug, ClapParser)]
#[command(name = "minicc", version, about = "MiniC compiler targeting 32-bit x86")]
pub struct Args {
    /// Stop after the given artifact and print it to stdout
    #[arg(short = 'e', long = "emit", value_enum)]
    emit: Option<EmitFormat>,

    /// Optimization level
    #[arg(short = 'O', value_enum, default_value_t = Default::default())]
    optimization_level: OptimizationLevel,

    /// Output path (defaults to the input path with extension `.s`)
    #[arg(short = 'o')]
    output_path: Option<PathBuf>,

    /// A MiniC source file (`.c`) or a textual IR module (`.ll`)
    source_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EmitFormat {
    #[value(name = "ast")]
    Ast,
    #[value(name = "ir")]
    Ir,
    #[value(name = "opt-ir")]
    OptIr,
    #[value(name = "asm")]
    Asm,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum OptimizationLevel {
    #[value(name = "0")]
    Zero,
    #[default]
    #[value(name = "1")]
    One,
}

/* Exit codes of the driver, one per failure class */
const EXIT_USAGE: u8 = 1;
const EXIT_OPEN_OR_PARSE: u8 = 2;
const EXIT_SEMANTIC_ANALYSIS: u8 = 3;
const EXIT_BACKEND: u8 = 4;

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(error) => {
            // Help and version requests are not usage errors
            let _ = error.print();
            return if error.use_stderr() {
                ExitCode::from(EXIT_USAGE)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let contents = match std::fs::read_to_string(&args.source_file) {
        Ok(contents) => contents,
        Err(_) => {
            eprintln!("Could not open file '{}'", args.source_file.display());
            return ExitCode::from(EXIT_OPEN_OR_PARSE);
        }
    };

    let source_file = SourceFile {
        contents,
        origin: SourceFileOrigin::File(args.source_file.clone()),
    };

    let is_textual_ir = args
        .source_file
        .extension()
        .is_some_and(|ext| ext == "ll");

    let module = if is_textual_ir {
        match parse_textual_ir(&source_file) {
            Ok(module) => module,
            Err(exit) => return exit,
        }
    } else {
        match compile_frontend(&source_file, &args) {
            Ok(Some(module)) => module,
            Ok(None) => return ExitCode::SUCCESS, // stopped at an emit point
            Err(exit) => return exit,
        }
    };

    run_middle_and_backend(module, &args)
}

/// Parses an `.ll` input so the optimizer and backend can be driven on
/// their own
fn parse_textual_ir(source_file: &SourceFile) -> Result<ir::Module, ExitCode> {
    let source_name = source_file.origin.to_string();

    match parse_module(&source_file.contents, &source_name) {
        Ok(module) => {
            println!("Result: IR parsing successful.");
            Ok(module)
        }
        Err(error) => {
            println!("{error}");
            println!("Result: IR parsing unsuccessful.");
            Err(ExitCode::from(EXIT_OPEN_OR_PARSE))
        }
    }
}

/// Runs parsing, semantic analysis, and IR generation for a `.c` input.
/// Returns `Ok(None)` when an `--emit` point stopped the pipeline early.
fn compile_frontend(source_file: &SourceFile, args: &Args) -> Result<Option<ir::Module>, ExitCode> {
    // Parse
    let program = match Parser::parse_program(source_file) {
        Ok(program) => program,
        Err(error) => {
            println!("{error}");
            println!("Result: parsing unsuccessful.");
            return Err(ExitCode::from(EXIT_OPEN_OR_PARSE));
        }
    };

    println!("Result: parsing successful.");

    if args.emit == Some(EmitFormat::Ast) {
        println!("{program:#?}");
        return Ok(None);
    }

    // Semantic analysis: report every offending use, then fail
    let errors = resolve::check_program(&program);
    if !errors.is_empty() {
        for error in &errors {
            println!("{error}");
        }
        println!("Result: semantic analysis unsuccessful.");
        return Err(ExitCode::from(EXIT_SEMANTIC_ANALYSIS));
    }

    println!("Result: semantic analysis successful.");

    // IR generation
    let module = lower_to_ir(&program);
    if let Err(error) = ir::verify_module(&module) {
        eprintln!("{error}");
        println!("Result: IR generation unsuccessful.");
        return Err(ExitCode::from(EXIT_BACKEND));
    }

    println!("Result: IR generation successful.");

    if args.emit == Some(EmitFormat::Ir) {
        pretty_print::pretty_print_module(&module);
        return Ok(None);
    }

    Ok(Some(module))
}

fn run_middle_and_backend(mut module: ir::Module, args: &Args) -> ExitCode {
    if args.optimization_level > OptimizationLevel::Zero {
        optimize_module(&mut module);
    }

    if args.emit == Some(EmitFormat::OptIr) {
        pretty_print::pretty_print_module(&module);
        return ExitCode::SUCCESS;
    }

    let options = CodegenOptions::default();

    if args.emit == Some(EmitFormat::Asm) {
        print!("{}", generate_assembly(&module, &options));
        return ExitCode::SUCCESS;
    }

    let output_path = args
        .output_path
        .clone()
        .unwrap_or_else(|| args.source_file.with_extension("s"));

    match codegen_module(&module, &output_path, &options) {
        Ok(()) => {
            println!("Result: code generation successful.");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("Could not write '{}': {error}", output_path.display());
            println!("Result: code generation unsuccessful.");
            ExitCode::from(EXIT_BACKEND)
        }
    }
}
