use anyhow::Result;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use xshell::{Shell, cmd};

mod publish;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Cereal Development Automation Tool", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build all crates in the workspace
    Build,
    /// Run test suite for all crates
    Test,
    /// Run the criterion benchmarks
    Bench {
        /// Only run benchmarks whose name contains this filter
        filter: Option<String>,
    },
    /// Run all verification steps (fmt + clippy + build + test)
    Verify,
    /// Publish all crates to crates.io in dependency order
    Publish {
        /// Perform a dry-run (check packaging without uploading)
        #[arg(long)]
        dry_run: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    match cli.command {
        Commands::Build => {
            println!("{}", "🚀 Building workspace...".green().bold());
            cmd!(sh, "cargo build --workspace --all-targets").run()?;
            println!("{}", "✅ Build successful".green().bold());
        }
        Commands::Test => {
            println!("{}", "🧪 Running tests...".green().bold());
            cmd!(sh, "cargo test --workspace").run()?;
            println!("{}", "✅ All tests passed".green().bold());
        }
        Commands::Bench { filter } => {
            println!("{}", "⏱️  Running benchmarks...".green().bold());
            let filter = filter.into_iter();
            cmd!(sh, "cargo bench -p cereal --bench lock_bench -- {filter...}").run()?;
        }
        Commands::Verify => {
            println!("{}", "🛡️ Verifying project integrity...".green().bold());
            cmd!(sh, "cargo fmt --all -- --check").run()?;
            cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
            cmd!(sh, "cargo build --workspace").run()?;
            cmd!(sh, "cargo test --workspace").run()?;
            println!("{}", "✅ Verification complete".green().bold());
        }
        Commands::Publish { dry_run } => publish::run_publish(dry_run)?,
    }

    Ok(())
}
