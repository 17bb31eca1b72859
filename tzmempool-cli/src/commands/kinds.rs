//! Kinds command implementation.

use colored::Colorize;
use tzmempool_core::OperationKind;

use crate::output;

/// Run the kinds command.
pub fn run() -> i32 {
    output::header("Supported Operation Kinds");

    println!();
    println!(
        "{:<32} {:<24} {}",
        "Tag".bold(),
        "Indexer type".bold(),
        "Table".bold()
    );
    println!("{}", "─".repeat(76).dimmed());

    for kind in OperationKind::ALL {
        println!(
            "{:<32} {:<24} {}",
            kind.tag().green(),
            kind.indexer_type(),
            kind.table().dimmed()
        );
    }

    println!();
    output::hint("List tags or indexer types under `kinds` in a [[networks]] entry.");

    0
}
