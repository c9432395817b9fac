use clap::Parser;
use dirs::home_dir;
use gokid::{
    cli::{Args, Commands},
    environment::Environment,
    error::{Error, Result},
    parser::{parse, Program},
    repl::{REPLPrompt, REPLValidator, SyntaxHighlighter},
    runtime::{Evaluator, Value},
    tokenizer::tokenize,
};
use log::{debug, info};
use nu_ansi_term::{Color, Style};
use reedline::{DefaultHinter, FileBackedHistory, Reedline, Signal};
use std::{
    fs,
    io::{self, Write},
    path::Path,
    process::ExitCode,
};

const HISTORY_CAPACITY: usize = 100;
const SEPARATOR_WIDTH: usize = 50;

fn separator() -> String {
    "-".repeat(SEPARATOR_WIDTH)
}

fn read_source(file: &Path) -> Result<String> {
    ensure_exists(file)?;
    Ok(fs::read_to_string(file)?)
}

fn ensure_exists(file: &Path) -> Result<()> {
    if file.exists() {
        Ok(())
    } else {
        Err(Error::FileNotFound(file.to_path_buf()))
    }
}

fn load_program(source: &str) -> Result<Program> {
    let (program, errors) = parse(source);
    if errors.is_empty() {
        Ok(program)
    } else {
        debug!("{} parse errors", errors.len());
        Err(Error::Parser { errors })
    }
}

fn confirm_extension(file: &Path) -> Result<bool> {
    if file.extension().is_some_and(|ext| ext == "gokid") {
        return Ok(true);
    }

    println!(
        "Warning: File '{}' doesn't have .gokid extension",
        file.display()
    );
    print!("Continue anyway? (y/N): ");
    io::stdout().flush()?;

    let mut response = String::new();
    io::stdin().read_line(&mut response)?;
    let response = response.trim().to_lowercase();
    Ok(response == "y" || response == "yes")
}

fn run_file(file: &Path, yes: bool, max_depth: usize) -> Result<()> {
    ensure_exists(file)?;

    if !yes && !confirm_extension(file)? {
        println!("Execution cancelled.");
        return Ok(());
    }

    let program = load_program(&fs::read_to_string(file)?)?;

    println!("Executing: {}", fs::canonicalize(file)?.display());
    println!("{}", separator());

    let env = Environment::new();
    if let Value::Error(error) = Evaluator::with_max_depth(max_depth).eval_program(&program, &env) {
        return Err(error.into());
    }

    println!("{}", separator());
    println!("Program executed successfully.");
    Ok(())
}

fn check_file(file: &Path) -> Result<()> {
    let source = read_source(file)?;
    load_program(&source)?;
    println!("OK");
    Ok(())
}

fn print_tokens(file: &Path) -> Result<()> {
    let source = read_source(file)?;
    for token in tokenize(&source) {
        println!("{:<12} {:?}", token.token_type.to_string(), token.literal);
    }
    Ok(())
}

fn print_parser_errors(errors: &[String]) {
    println!(" parser errors:");
    for message in errors {
        println!("\t{}", message);
    }
}

fn run_repl(max_depth: usize) -> Result<()> {
    let mut line_editor = Reedline::create()
        .with_hinter(Box::new(
            DefaultHinter::default().with_style(Style::new().italic().fg(Color::LightGray)),
        ))
        .with_highlighter(Box::new(SyntaxHighlighter))
        .with_validator(Box::new(REPLValidator));

    // Add file-backed history if possible
    if let Some(history) = home_dir()
        .map(|home| home.join(".gokid_history"))
        .and_then(|path| FileBackedHistory::with_file(HISTORY_CAPACITY, path).ok())
        .map(Box::new)
    {
        line_editor = line_editor.with_history(history);
    } else {
        eprintln!("NOTE: Failed to load history. Persistence is now disabled.")
    }

    println!("GoKid Language REPL v{}", env!("CARGO_PKG_VERSION"));
    println!("Type 'exit' or press Ctrl+D to quit");
    println!("{}", "-".repeat(40));

    let prompt = REPLPrompt;
    let env = Environment::new();
    let mut evaluator = Evaluator::with_max_depth(max_depth);

    loop {
        match line_editor.read_line(&prompt)? {
            Signal::Success(buffer) => {
                if buffer.trim() == "exit" {
                    break Ok(());
                }

                let (program, errors) = parse(&buffer);
                if !errors.is_empty() {
                    print_parser_errors(&errors);
                    continue;
                }

                let value = evaluator.eval_program(&program, &env);
                if !matches!(value, Value::Null) {
                    println!("{}", value);
                }
            }
            Signal::CtrlD | Signal::CtrlC => {
                break Ok(());
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    let max_depth = args.max_depth;
    debug!("max depth: {}", max_depth);

    let outcome = match args.command {
        Commands::Run { file, yes } => {
            info!("FILE MODE");
            debug!("file: {:?}", file);
            run_file(&file, yes, max_depth)
        }
        Commands::Check { file } => {
            info!("CHECK MODE");
            debug!("file: {:?}", file);
            check_file(&file)
        }
        Commands::Tokens { file } => {
            info!("TOKENS MODE");
            debug!("file: {:?}", file);
            print_tokens(&file)
        }
        Commands::Repl => {
            info!("REPL MODE");
            run_repl(max_depth)
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
