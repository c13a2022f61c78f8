use anyhow::Result;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use std::io::{stdin, stdout, BufRead, Write};
use std::sync::Arc;

use connect4_solver::{
    default_book_path,
    opening_book::OpeningBook,
    position::Position,
    solver::{Solver, INVALID_MOVE},
    transposition_table::SharedTranspositionTable,
    Error, WIDTH,
};

/// Scores Connect 4 positions read from stdin, one move sequence per line
///
/// Every valid line is echoed followed by its score, or by the score of
/// every column in analysis mode.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Only compute whether positions are won, drawn or lost
    #[arg(short, long)]
    weak: bool,

    /// Score every column instead of the position
    #[arg(short, long)]
    analyze: bool,

    /// Search the columns of an analysis in parallel
    #[arg(short, long, requires = "analyze")]
    parallel: bool,

    /// Opening book file
    #[arg(short, long, default_value_t = default_book_path())]
    book: String,
}

enum Engine {
    Sequential(Solver),
    Parallel(Solver<SharedTranspositionTable>),
}

impl Engine {
    fn set_opening_book(&mut self, book: Arc<OpeningBook>) {
        match self {
            Engine::Sequential(solver) => solver.set_opening_book(Some(book)),
            Engine::Parallel(solver) => solver.set_opening_book(Some(book)),
        }
    }

    fn solve(&mut self, position: &Position, weak: bool) -> i32 {
        match self {
            Engine::Sequential(solver) => solver.solve(position, weak),
            Engine::Parallel(solver) => solver.solve(position, weak),
        }
    }

    fn analyze(&mut self, position: &Position, weak: bool) -> [Option<i32>; WIDTH] {
        match self {
            Engine::Sequential(solver) => solver.analyze(position, weak),
            Engine::Parallel(solver) => solver.analyze_parallel(position, weak),
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    // keep the solver out here so the transposition table is re-used between lines
    let mut engine = if args.parallel {
        Engine::Parallel(Solver::new_shared())
    } else {
        Engine::Sequential(Solver::new())
    };

    match OpeningBook::load(&args.book) {
        Ok(book) => engine.set_opening_book(Arc::new(book)),
        Err(err) => warn!("Unable to load opening book {}: {}", args.book, err),
    }

    let stdout = stdout();
    let mut out = stdout.lock();

    for (line_number, line) in stdin().lock().lines().enumerate() {
        let line = line?;
        let position = match Position::from_moves(&line) {
            Ok(position) => position,
            Err(Error::InvalidMove { ply, .. }) => {
                eprintln!("Line {}: Invalid move {} \"{}\"", line_number + 1, ply, line);
                continue;
            }
            Err(err) => return Err(err.into()),
        };

        write!(out, "{}", line)?;
        if args.analyze {
            for score in engine.analyze(&position, args.weak).iter() {
                write!(out, " {}", score.unwrap_or(INVALID_MOVE))?;
            }
        } else {
            write!(out, " {}", engine.solve(&position, args.weak))?;
        }
        writeln!(out)?;
        out.flush()?;
    }
    Ok(())
}
