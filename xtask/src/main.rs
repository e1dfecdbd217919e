use anyhow::{
    Context,
    Result,
    ensure,
};
use clap::{
    Parser,
    Subcommand,
};
use std::{
    path::{
        Path,
        PathBuf,
    },
    process::Command,
};

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Wager agent helper tasks (fmt, clippy, tests)",
    arg_required_else_help = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check formatting against .rustfmt.toml (nightly rustfmt)
    Fmt {
        /// Rewrite files instead of only checking
        #[arg(long)]
        write: bool,
    },
    /// Run clippy for the entire workspace with warnings-as-errors
    Clippy,
    /// Run the test suites
    Test {
        /// Only test this package (e.g. `ledger` or `wager-agent`)
        #[arg(short, long)]
        package: Option<String>,
    },
    /// fmt check, clippy and the full test suite, in that order
    Ci,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let root = repo_root()?;

    match cli.command {
        Commands::Fmt { write } => run_fmt(&root, write)?,
        Commands::Clippy => run_clippy(&root)?,
        Commands::Test { package } => run_tests(&root, package.as_deref())?,
        Commands::Ci => {
            run_fmt(&root, false)?;
            run_clippy(&root)?;
            run_tests(&root, None)?;
        }
    }

    Ok(())
}

fn repo_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask has no parent directory")
}

fn run_fmt(root: &Path, write: bool) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("+nightly").arg("fmt").arg("--all").current_dir(root);
    if !write {
        cmd.arg("--").arg("--check");
    }
    run_command(cmd, "cargo fmt")
}

fn run_clippy(root: &Path) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("clippy")
        .arg("--workspace")
        .arg("--all-targets")
        .arg("--all-features")
        .arg("--")
        .arg("-D")
        .arg("warnings")
        .current_dir(root);
    run_command(cmd, "cargo clippy")
}

fn run_tests(root: &Path, package: Option<&str>) -> Result<()> {
    let mut cmd = Command::new("cargo");
    cmd.arg("test").current_dir(root);
    let label = match package {
        Some(package) => {
            cmd.arg("-p").arg(package);
            format!("cargo test -p {package}")
        }
        None => {
            cmd.arg("--workspace");
            "cargo test --workspace".to_string()
        }
    };
    run_command(cmd, &label)
}

fn run_command(mut cmd: Command, label: &str) -> Result<()> {
    println!("Running: {}", label);
    let status = cmd
        .status()
        .with_context(|| format!("failed to run {label}"))?;
    ensure!(status.success(), "{label} failed with status {status}");
    Ok(())
}
