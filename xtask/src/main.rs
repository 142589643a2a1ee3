use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{exit, Command, ExitStatus};

use clap::{Parser, Subcommand, ValueEnum};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

const PACKAGED_BINARIES: [&str; 2] = ["streamgazer", "lockctl"];

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xtask",
    about = "Task runner for the coordination workspace",
    long_about = "A unified CLI for watching streams, bootstrapping lock tables,\n\
                  packaging binaries, and CI checks in the coordination workspace."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch a DynamoDB stream and print change summaries
    Gaze {
        /// ARN of the stream to watch
        stream_arn: String,
        /// Also print the full change records
        #[arg(long)]
        records: bool,
    },
    /// Create the lock table on a local DynamoDB endpoint
    LocalTable {
        #[arg(long, default_value = "http://localhost:8000")]
        endpoint: String,
        #[arg(long, default_value = "locks")]
        table: String,
    },
    /// Run CI checks (fmt, clippy, tests)
    Ci {
        /// Job to run
        #[arg(value_enum, default_value_t = CiJob::Check)]
        job: CiJob,
    },
    /// Build the binaries and zip each of them into dist/
    Package {
        /// Compilation target triple
        #[arg(long, default_value = "x86_64-unknown-linux-gnu")]
        target: String,
        /// Build profile used for binaries
        #[arg(value_enum, long, default_value_t = BuildProfile::Release)]
        profile: BuildProfile,
    },
}

#[derive(Clone, ValueEnum)]
enum CiJob {
    /// Formatting, clippy, and tests
    Check,
    /// Tests only
    Test,
}

#[derive(Clone, Copy, ValueEnum)]
enum BuildProfile {
    Debug,
    Release,
}

impl BuildProfile {
    fn dir_name(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }

    fn as_cargo_flag(self) -> Option<&'static str> {
        match self {
            Self::Debug => None,
            Self::Release => Some("--release"),
        }
    }
}

// ── helpers ────────────────────────────────────────────────────────

fn step(label: &str) {
    eprintln!("\n=== {label} ===");
}

fn cargo(args: &[&str]) -> ExitStatus {
    eprintln!("+ cargo {}", args.join(" "));
    Command::new("cargo")
        .args(args)
        .status()
        .expect("failed to execute cargo")
}

fn run_cargo(args: &[&str]) {
    let status = cargo(args);
    if !status.success() {
        exit(status.code().unwrap_or(1));
    }
}

fn binary_name(bin_name: &str, target: &str) -> String {
    if target.contains("windows") {
        format!("{bin_name}.exe")
    } else {
        bin_name.to_string()
    }
}

fn package_binaries(target: &str, profile: BuildProfile) {
    step("Build binaries");
    let mut cargo_args = vec!["build", "-p", "coord_aws", "--target", target];
    for bin in PACKAGED_BINARIES {
        cargo_args.extend(["--bin", bin]);
    }
    if let Some(flag) = profile.as_cargo_flag() {
        cargo_args.push(flag);
    }
    run_cargo(&cargo_args);

    step("Package zip artifacts");
    let target_dir = Path::new("target").join(target).join(profile.dir_name());
    let dist_dir = Path::new("dist");
    fs::create_dir_all(dist_dir).expect("failed to create dist directory");

    let mut packaged = Vec::new();
    for bin in PACKAGED_BINARIES {
        let file_name = binary_name(bin, target);
        let zip_path = dist_dir.join(format!("{bin}.zip"));
        package_zip(&target_dir.join(&file_name), &file_name, &zip_path);
        packaged.push(zip_path);
    }

    eprintln!("\nPackaged artifacts:");
    for path in packaged {
        eprintln!("- {}", path.display());
    }
}

fn package_zip(binary_path: &Path, entry_name: &str, zip_path: &Path) {
    if !binary_path.exists() {
        panic!("expected binary at '{}'", binary_path.display());
    }

    let binary = fs::read(binary_path).expect("failed to read binary");
    let file = fs::File::create(zip_path).expect("failed to create zip");
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o755);
    zip.start_file(entry_name, options)
        .expect("failed to start zip entry");
    zip.write_all(&binary).expect("failed to write zip entry");
    zip.finish().expect("failed to finish zip");
}

// ── CI jobs ────────────────────────────────────────────────────────

fn ci_check() {
    step("Check formatting");
    run_cargo(&["fmt", "--all", "--", "--check"]);

    step("Clippy");
    run_cargo(&[
        "clippy",
        "--all-targets",
        "--all-features",
        "--",
        "-D",
        "warnings",
    ]);

    ci_test();
}

fn ci_test() {
    step("Test coord_core");
    run_cargo(&["test", "-p", "coord_core"]);

    step("Test coord_aws");
    run_cargo(&["test", "-p", "coord_aws"]);
}

// ── main ───────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gaze {
            stream_arn,
            records,
        } => {
            let mut args = vec![
                "run",
                "-p",
                "coord_aws",
                "--bin",
                "streamgazer",
                "--",
                stream_arn.as_str(),
                "--print-summary",
            ];
            if records {
                args.push("--print-record");
            }
            run_cargo(&args);
        }
        Commands::LocalTable { endpoint, table } => {
            run_cargo(&[
                "run",
                "-p",
                "coord_aws",
                "--bin",
                "lockctl",
                "--",
                "--endpoint-url",
                &endpoint,
                "--table",
                &table,
                "ensure-table",
            ]);
        }
        Commands::Ci { job } => {
            match job {
                CiJob::Check => ci_check(),
                CiJob::Test => ci_test(),
            }
            eprintln!("\nCI job passed.");
        }
        Commands::Package { target, profile } => {
            package_binaries(&target, profile);
        }
    }
}
