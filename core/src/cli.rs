use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::compiler::{CompileError, Compiler};
use crate::config::CompilerConfig;
use crate::diagnostics::Diagnostic;
use crate::parser::parse_program;

#[derive(Parser)]
#[command(name = "streetrace-dsl")]
#[command(about = "StreetRace DSL compiler", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check sources and print diagnostics
    Check {
        /// Source files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Compile a source file to JSON
    Compile {
        /// Source file
        file: PathBuf,

        /// Output file (default: stdout)
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,

        /// Pretty-print the JSON
        #[arg(long)]
        pretty: bool,
    },

    /// Print the parsed AST as JSON
    Ast {
        /// Source file
        file: PathBuf,
    },
}

/// Run the CLI by parsing process arguments
pub fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli)
}

fn run_cli_with_args(cli: Cli) -> Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration before any command so errors show up first
    let config = CompilerConfig::builder()
        .config_path(cli.config)
        .build()
        .context("Failed to load configuration")?;
    let compiler = Compiler::from_config(&config);

    match cli.command {
        Commands::Check { files } => {
            let mut failed = 0;
            for file in &files {
                let source = read_source(file)?;
                match compiler.compile(&source, &file.display().to_string()) {
                    Ok(_) => println!("{}: ok", file.display()),
                    Err(err) => {
                        failed += 1;
                        print_diagnostics(file, &err);
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} file(s) failed", failed, files.len());
            }
        }

        Commands::Compile {
            file,
            output,
            pretty,
        } => {
            let source = read_source(&file)?;
            let compilation = match compiler.compile(&source, &file.display().to_string()) {
                Ok(compilation) => compilation,
                Err(err) => {
                    print_diagnostics(&file, &err);
                    bail!("Failed to compile {}", file.display());
                }
            };

            let json = if pretty {
                serde_json::to_string_pretty(&compilation)?
            } else {
                serde_json::to_string(&compilation)?
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    eprintln!("Wrote {}", path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::Ast { file } => {
            let source = read_source(&file)?;
            let program = parse_program(&source).map_err(|err| {
                print_diagnostics(&file, &CompileError::Syntax(err));
                anyhow::anyhow!("Failed to parse {}", file.display())
            })?;
            println!("{}", serde_json::to_string_pretty(&program)?);
        }
    }

    Ok(())
}

fn read_source(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

fn print_diagnostics(file: &Path, err: &CompileError) {
    for diagnostic in err.diagnostics() {
        eprintln!("{}", render(file, &diagnostic));
    }
}

fn render(file: &Path, diagnostic: &Diagnostic) -> String {
    format!("{}: {}", file.display(), diagnostic)
}
