//! tia CLI entry point

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tia_engine::cli::{Cli, Command};
use tia_engine::commands::{
    run_build_index, run_clear_embeddings, run_deduplicate, run_diagnose, run_embed, run_reindex,
    run_select, run_verify, CommandContext,
};
use tia_engine::config::Settings;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli) {
        Ok(output) => {
            print!("{}", output);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

fn run(cli: Cli) -> tia_engine::Result<String> {
    let mut settings = Settings::from_env();
    if let Some(data_dir) = &cli.data_dir {
        settings.data_dir = data_dir.clone();
        settings.chromadb_data_path = data_dir.join("chromadb_data");
    }
    let ctx = CommandContext::new(settings, cli.verbose);

    match cli.command {
        Command::BuildIndex { test_repo } => run_build_index(&ctx, test_repo),
        Command::Embed { backend } => run_embed(&ctx, backend),
        Command::Select {
            diff_file,
            no_semantic,
        } => run_select(&ctx, &diff_file, no_semantic),
        Command::Verify { test_repo } => run_verify(&ctx, test_repo),
        Command::Reindex { test_repo } => run_reindex(&ctx, test_repo),
        Command::Diagnose { diff_file } => run_diagnose(&ctx, diff_file.as_deref()),
        Command::Deduplicate { remove_duplicates } => run_deduplicate(&ctx, remove_duplicates),
        Command::ClearEmbeddings { backend } => run_clear_embeddings(&ctx, backend),
    }
}
