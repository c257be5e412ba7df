use std::fs::File;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use clap::Subcommand;
use env_logger::Builder;
use log::{debug, info};
use memmap2::Mmap;

use rox::ast_printer::AstPrinter;
use rox::error::Diagnostics;
use rox::scanner::Scanner;
use rox::session::{self, RunError, Session, EXIT_STATIC, EXIT_USAGE};

#[derive(ClapParser, Debug)]
#[command(version, about = "Lox language interpreter", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    commands: Commands,

    /// Enable logging to app.log
    #[arg(long, global = true)]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Tokenizes input from a file, printing each token
    Tokenize { filename: Option<PathBuf> },

    /// Parses a program from a file and prints each statement
    Parse {
        filename: Option<PathBuf>,

        /// Print the syntax tree as JSON instead of prefix form
        #[arg(long)]
        json: bool,
    },

    /// Evaluates input from a file as a single expression and prints the result
    Evaluate { filename: Option<PathBuf> },

    /// Resolves a program and prints the scope distance of every local reference
    Resolve { filename: Option<PathBuf> },

    /// Runs input from a file as a Lox program
    Run { filename: Option<PathBuf> },

    /// Starts an interactive prompt
    Repl,
}

/// Reads a source file and checks that it is valid UTF-8.
fn read_file(filename: &Path) -> Result<String> {
    info!("Reading file: {:?}", filename);
    let file = File::open(filename).context(format!("Failed to open file {:?}", filename))?;

    let len = file
        .metadata()
        .context(format!("Failed to stat file {:?}", filename))?
        .len();

    // Mapping a zero-length file fails on some platforms.
    if len == 0 {
        info!("{:?} is empty", filename);
        return Ok(String::new());
    }

    // SAFETY: the map is read-only and dropped before this function returns;
    // its bytes are copied out once validated.
    let mmap = unsafe { Mmap::map(&file) }.context(format!("Failed to map file {:?}", filename))?;

    let source = session::decode_source(&mmap)
        .context(format!("{:?} is not valid UTF-8", filename))?
        .to_owned();

    info!("Read {} bytes from {:?}", source.len(), filename);

    Ok(source)
}

fn init_logger() -> Result<()> {
    // Create or open the log file
    let log_file = File::create("app.log").context("Failed to create app.log")?;

    Builder::new()
        .format(|buf, record| {
            let module = record.module_path().unwrap_or("<unnamed>");
            let module = module.strip_prefix("rox::").unwrap_or(module);
            writeln!(
                buf,
                "[{}:{}] - {}",
                module,
                record.line().unwrap_or(0),
                record.args()
            )
        })
        .target(env_logger::Target::Pipe(Box::new(log_file)))
        .filter(None, log::LevelFilter::Debug)
        .parse_env("RUST_LOG")
        .init();

    info!("Logger initialized, writing to app.log");
    Ok(())
}

/// Prints every error in `err` to stderr and exits with its status code.
fn fail(err: RunError) -> ! {
    debug!("Exiting after error: {:?}", err);
    eprintln!("{}", err);
    std::process::exit(err.exit_code());
}

fn require(filename: Option<PathBuf>) -> PathBuf {
    match filename {
        Some(filename) => filename,
        None => {
            info!("No filepath provided");
            eprintln!("No input filepath was provided. Exiting...");
            std::process::exit(EXIT_USAGE);
        }
    }
}

fn tokenize(source: &str) {
    let mut tokenized = true;

    for result in Scanner::new(source) {
        match result {
            Ok(token) => {
                debug!("Scanned token: {}", token);
                println!("{}", token);
            }
            Err(e) => {
                tokenized = false;
                eprintln!("{}", e);
            }
        }
    }

    if !tokenized {
        debug!("Tokenization failed, exiting with code {}", EXIT_STATIC);
        std::process::exit(EXIT_STATIC);
    }

    info!("Tokenization completed successfully");
}

fn parse(source: &str, json: bool) -> Result<()> {
    let mut diagnostics = Diagnostics::new();
    let statements = session::parse_program(source, &mut diagnostics);

    if diagnostics.has_errors() {
        fail(diagnostics.into());
    }

    info!("Parsed {} statements", statements.len());

    if json {
        let rendered =
            serde_json::to_string_pretty(&statements).context("Failed to serialize syntax tree")?;
        println!("{}", rendered);
    } else {
        for stmt in &statements {
            println!("{}", AstPrinter::print_stmt(stmt));
        }
    }

    Ok(())
}

fn resolve(source: &str) -> Result<()> {
    let (_, table) = Session::check(source).unwrap_or_else(|err| fail(err));

    let rendered = serde_json::to_string_pretty(&table.sorted())
        .context("Failed to serialize distance table")?;
    println!("{}", rendered);

    Ok(())
}

fn repl() -> Result<()> {
    info!("Starting REPL");

    let mut session = Session::new();
    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        print!("> ");
        io::stdout().flush().context("Failed to flush stdout")?;

        let Some(line) = lines.next() else {
            println!();
            break;
        };
        let line = line.context("Failed to read from stdin")?;

        // Errors are reported and the prompt carries on with the same globals.
        if let Err(err) = session.run(&line) {
            eprintln!("{}", err);
        }
    }

    info!("REPL finished");
    Ok(())
}

fn main() -> Result<()> {
    let args: Cli = Cli::parse();

    // Initialize logger only if --log flag is provided
    if args.log {
        init_logger()?;
    } else {
        env_logger::Builder::new()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    info!("CLI arguments: {:?}", args);

    match args.commands {
        Commands::Tokenize { filename } => {
            info!("Running Tokenize subcommand");
            let source = read_file(&require(filename))?;
            tokenize(&source);
        }

        Commands::Parse { filename, json } => {
            info!("Running Parse subcommand");
            let source = read_file(&require(filename))?;
            parse(&source, json)?;
        }

        Commands::Evaluate { filename } => {
            info!("Running Evaluate subcommand");
            let source = read_file(&require(filename))?;

            match Session::new().evaluate(&source) {
                Ok(value) => {
                    debug!("Evaluated to: {}", value);
                    println!("{}", value);
                }
                Err(err) => fail(err),
            }
        }

        Commands::Resolve { filename } => {
            info!("Running Resolve subcommand");
            let source = read_file(&require(filename))?;
            resolve(&source)?;
        }

        Commands::Run { filename } => {
            info!("Running Run subcommand");
            let source = read_file(&require(filename))?;
            debug!("Provided input:\n {}", source);

            if let Err(err) = Session::new().run(&source) {
                fail(err);
            }

            info!("Program executed successfully");
        }

        Commands::Repl => repl()?,
    }

    Ok(())
}
