use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{ensure, Context};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use sqlx::postgres::PgPoolOptions;

mod anonymize;
mod db;
mod extract;
mod models;
mod output;
mod pipeline;
mod report;
mod snapshot;
mod source;

use extract::WatchOrder;
use models::Semester;
use output::Layout;
use pipeline::AnonymizationScope;
use snapshot::SnapshotOverrides;

const DEFAULT_SEMESTERS: [&str; 7] = [
    "2020C", "2021A", "2021C", "2022A", "2022C", "2023A", "2023C",
];

#[derive(Parser)]
#[command(name = "course-interest-export")]
#[command(about = "Export anonymized course watch and registration snapshots", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ExtractArgs {
    /// Semesters to export; duplicates are dropped and the rest run in chronological order
    #[arg(long = "semester", num_args = 1.., default_values = DEFAULT_SEMESTERS)]
    semesters: Vec<Semester>,
    /// CSV of `semester,snapshot_at` rows replacing the add/drop based snapshot
    #[arg(long)]
    snapshot_overrides: Option<PathBuf>,
    /// Emit watched sections as sorted sets instead of in subscription order
    #[arg(long)]
    unordered_watching: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write watching, section info and estimated registration files
    Export {
        #[command(flatten)]
        args: ExtractArgs,
        #[arg(long, default_value = output::DEFAULT_OUTPUT_DIR)]
        out: PathBuf,
        /// Seed for the anonymization shuffle
        #[arg(long)]
        seed: Option<u64>,
        /// Share one anonymization mapping between all semesters
        #[arg(long)]
        anonymize_across_semesters: bool,
        /// Write the bare mapping of a single semester
        #[arg(long)]
        flat: bool,
    },
    /// Generate a markdown summary of what an export would contain
    Report {
        #[command(flatten)]
        args: ExtractArgs,
        #[arg(long, default_value = "export-report.md")]
        out: PathBuf,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
}

impl ExtractArgs {
    fn semesters(&self) -> Vec<Semester> {
        self.semesters
            .iter()
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn watch_order(&self) -> WatchOrder {
        if self.unordered_watching {
            WatchOrder::Unordered
        } else {
            WatchOrder::Chronological
        }
    }

    fn overrides(&self) -> anyhow::Result<SnapshotOverrides> {
        match &self.snapshot_overrides {
            Some(path) => snapshot::load_overrides(path),
            None => Ok(SnapshotOverrides::new()),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the course planning Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    let source = db::PgSource::new(pool);

    match cli.command {
        Commands::Export {
            args,
            out,
            seed,
            anonymize_across_semesters,
            flat,
        } => {
            let semesters = args.semesters();
            ensure!(
                !flat || semesters.len() == 1,
                "--flat needs exactly one --semester, got {}",
                semesters.len()
            );
            let overrides = args.overrides()?;

            let exports =
                pipeline::extract_all(&source, &semesters, &overrides, args.watch_order())
                    .await?;

            let scope = if anonymize_across_semesters {
                AnonymizationScope::AcrossSemesters
            } else {
                AnonymizationScope::PerSemester
            };
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let bundle = pipeline::anonymize_all(exports, scope, &mut rng)?;

            let layout = if flat { Layout::Flat } else { Layout::BySemester };
            let dir = output::expand_home(&out);
            output::write_bundle(&dir, &bundle, layout)?;
            println!(
                "Exported {} semester(s) to {}.",
                semesters.len(),
                dir.display()
            );
        }
        Commands::Report { args, out, top } => {
            let semesters = args.semesters();
            let overrides = args.overrides()?;
            let exports =
                pipeline::extract_all(&source, &semesters, &overrides, args.watch_order())
                    .await?;
            let report = report::build_report(&exports, top);
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
