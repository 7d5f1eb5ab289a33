use clap::Parser;
use lib::{
    ColumnPolicy, Entity, OutputFormats, PipelineConfig, PipelineError, RuleBook, SimpleLogger,
    Stage,
};
use log::debug;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

static LOGGER: SimpleLogger = SimpleLogger;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Entities to process (e.g., customer,product). If not specified, processes all three.
    #[arg(short, long, value_delimiter = ',')]
    entity: Vec<Entity>,

    /// Pipeline stage to run
    #[arg(short, long, default_value = "all")]
    stage: Stage,

    /// Directory holding the raw <entity>s_data.csv files
    #[arg(long, default_value = "data/raw")]
    raw_dir: PathBuf,

    /// Directory receiving the cleaned files
    #[arg(long, default_value = "data/processed")]
    processed_dir: PathBuf,

    /// SQLite warehouse file
    #[arg(long, default_value = "data_warehouse/datawarehouse.db")]
    warehouse: PathBuf,

    /// JSON rulebook overriding the default cleaning rules per entity
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Also write cleaned data as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Also write cleaned data as Parquet
    #[arg(long, default_value_t = false)]
    parquet: bool,

    /// Fail when a cleaning rule references a missing column instead of skipping it
    #[arg(long, default_value_t = false)]
    strict_columns: bool,

    /// Log level for output
    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn main() -> ExitCode {
    let total_start = Instant::now();
    let args = Args::parse();

    // Logger can only fail if already set
    let _ = log::set_logger(&LOGGER);
    if args.debug {
        log::set_max_level(log::LevelFilter::Debug);
    } else {
        log::set_max_level(log::LevelFilter::Info);
    }

    match execute(args) {
        Ok(()) => {
            println!("\nTotal runtime: {:.2?}", total_start.elapsed());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Pipeline failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn execute(args: Args) -> Result<(), PipelineError> {
    let entities = if args.entity.is_empty() {
        Entity::ALL.to_vec()
    } else {
        args.entity.clone()
    };
    let rules = match &args.rules {
        Some(path) => RuleBook::from_file(path)?,
        None => RuleBook::default(),
    };

    let config = PipelineConfig {
        raw_dir: args.raw_dir,
        processed_dir: args.processed_dir,
        warehouse_path: args.warehouse,
        column_policy: if args.strict_columns {
            ColumnPolicy::Fail
        } else {
            ColumnPolicy::Skip
        },
        formats: OutputFormats {
            json: args.json,
            parquet: args.parquet,
        },
        rules,
    };

    // UI
    println!("Warehouse ETL: clean and load customers, products, sales");
    debug!(
        "Entities: {} | Stage: {:?}",
        entities
            .iter()
            .map(Entity::name)
            .collect::<Vec<_>>()
            .join(","),
        args.stage
    );
    debug!(
        "Raw: {} | Processed: {} | Warehouse: {}",
        config.raw_dir.display(),
        config.processed_dir.display(),
        config.warehouse_path.display()
    );

    let stage_start = Instant::now();
    let summary = lib::run(&config, &entities, args.stage)?;

    if !summary.cleaned.is_empty() {
        println!("Cleaning:");
        for report in &summary.cleaned {
            println!(
                "  {:<8} {:>6} -> {:>6} rows ({} coercion failures)",
                report.entity, report.rows_in, report.rows_out, report.coercion_failures
            );
            for (rule, removed) in &report.removed_by_rule {
                debug!("    {} removed {} rows", rule, removed);
            }
            debug!(
                "    nulls {} -> {}, duplicates {} -> {}",
                report.before.total_nulls(),
                report.after.total_nulls(),
                report.before.duplicate_rows,
                report.after.duplicate_rows
            );
        }
    }

    if !summary.loaded.is_empty() {
        println!("Loaded warehouse {}:", config.warehouse_path.display());
        for report in &summary.loaded {
            println!(
                "  {:<8} {:>6} inserted, {:>4} dropped",
                report.entity,
                report.inserted,
                report.dropped()
            );
            if report.orphans_removed > 0 {
                println!(
                    "  {:<8} {:>6} dependent rows removed",
                    "", report.orphans_removed
                );
            }
        }
    }
    println!("Stages completed in {:.2?}", stage_start.elapsed());

    println!("Pipeline completed successfully");
    Ok(())
}
