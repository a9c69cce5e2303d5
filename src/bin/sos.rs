//! # sos CLI Entry Point
//!
//! Binary entry point for the salvage tool.
//!
//! ## Usage
//!
//! ```bash
//! # Salvage a damaged database into a prepared template
//! sos damaged.db template.db 2
//!
//! # Override the batch sizes
//! sos damaged.db template.db 2 512 5
//!
//! # Create a fresh template
//! sos --create-template template.db
//! ```

use std::env;
use std::path::{Path, PathBuf};

use eyre::{bail, Result, WrapErr};
use sos::engine::create_template;
use sos::{restore, RestoreConfig};

fn main() {
    if let Err(e) = run() {
        // Errors go to stdout, next to the diagnostic log lines.
        println!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        bail!("missing arguments");
    }

    match args[1].as_str() {
        "--help" | "-h" => {
            print_usage();
            return Ok(());
        }
        "--version" | "-v" => {
            println!("sos {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        "--create-template" => {
            let path = match args.get(2) {
                Some(path) => PathBuf::from(path),
                None => {
                    print_usage();
                    bail!("--create-template requires a path");
                }
            };
            create_template(&path)
                .wrap_err_with(|| format!("failed to create template at {:?}", path))?;
            println!("created template {:?}", path);
            return Ok(());
        }
        arg if arg.starts_with('-') => {
            print_usage();
            bail!("unknown option: {}", arg);
        }
        _ => {}
    }

    if args.len() < 4 {
        print_usage();
        bail!("expected <source> <template> <start_page>");
    }

    let source = PathBuf::from(&args[1]);
    let template = PathBuf::from(&args[2]);

    let start_page = parse_number(&args[3], "start page")?;
    if start_page < 2 {
        bail!("invalid start page {} (must be >= 2)", start_page);
    }

    let mut config = RestoreConfig::new(template, start_page)?;
    if let Some(arg) = args.get(4) {
        config.pages_per_txn = parse_number(arg, "pages per transaction")?;
    }
    if let Some(arg) = args.get(5) {
        config.txns_per_checkpoint = parse_number(arg, "transactions per checkpoint")?;
    }
    if args.len() > 6 {
        print_usage();
        bail!("too many arguments");
    }

    let metrics = restore(Path::new(&source), &config)?;
    println!("{}", metrics);

    Ok(())
}

fn parse_number(arg: &str, what: &str) -> Result<u32> {
    let value: u32 = arg
        .parse()
        .wrap_err_with(|| format!("invalid {} '{}'", what, arg))?;
    if value == 0 {
        bail!("invalid {} '{}' (must be positive)", what, arg);
    }
    Ok(value)
}

fn print_usage() {
    println!("sos - salvage keys from a damaged database into a fresh template");
    println!();
    println!("USAGE:");
    println!("    sos <source_db_file> <template_db_file> <start_page> \\");
    println!("        [pages_per_transaction] [transactions_per_checkpoint]");
    println!("    sos --create-template <template_db_file>");
    println!();
    println!("ARGS:");
    println!("    <source_db_file>             Damaged database to scan");
    println!("    <template_db_file>           Prepared empty target database");
    println!("    <start_page>                 First page to scan (>= 2)");
    println!("    [pages_per_transaction]      Source pages per commit (default 1024)");
    println!("    [transactions_per_checkpoint] Commits per full checkpoint (default 10)");
    println!();
    println!("OPTIONS:");
    println!("    --create-template <path>     Create a fresh template database");
    println!("    -h, --help                   Print help information");
    println!("    -v, --version                Print version information");
}
