use anyhow::{ensure, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use std::io::{stdin, stdout, BufWriter, Write};

use connect4_solver::{
    default_book_path,
    opening_book::{explore, OpeningBook, MAX_LOG_SIZE},
    BOOK_DEPTH, BOOK_LOG_SIZE, HEIGHT, WIDTH,
};

/// Builds opening books for the Connect 4 solver
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a move sequence for every position of at most DEPTH plies,
    /// mirrored positions are only listed once
    Explore { depth: usize },

    /// Build a book from "<moves> <score>" lines read from stdin
    Build(BookArgs),

    /// Solve every position of at most DEPTH plies and write them to a book
    Solve(BookArgs),
}

#[derive(clap::Args, Debug)]
struct BookArgs {
    /// Maximum number of plies of the stored positions
    #[arg(short, long, default_value_t = BOOK_DEPTH)]
    depth: usize,

    /// log2 of the number of entries of the book
    #[arg(short, long, default_value_t = BOOK_LOG_SIZE)]
    log_size: u32,

    /// Output file
    #[arg(short, long, default_value_t = default_book_path())]
    output: String,
}

impl BookArgs {
    fn validate(&self) -> Result<()> {
        ensure!(
            self.depth <= WIDTH * HEIGHT,
            "depth must be at most {}",
            WIDTH * HEIGHT
        );
        ensure!(
            (1..=MAX_LOG_SIZE).contains(&self.log_size),
            "log size must be between 1 and {}",
            MAX_LOG_SIZE
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match Cli::parse().command {
        Command::Explore { depth } => {
            let mut out = BufWriter::new(stdout());
            for moves in explore(depth) {
                writeln!(out, "{}", moves)?;
            }
            out.flush()?;
        }
        Command::Build(args) => {
            args.validate()?;
            let book = OpeningBook::from_scored_lines(stdin().lock(), args.depth, args.log_size)?;
            book.save(&args.output)
                .with_context(|| format!("failed to write {}", args.output))?;
        }
        Command::Solve(args) => {
            args.validate()?;
            let book = OpeningBook::generate(args.depth, args.log_size);
            book.save(&args.output)
                .with_context(|| format!("failed to write {}", args.output))?;
        }
    }
    Ok(())
}
