use crate::error::Result;
use crate::extract::read_csv;
use crate::load::{write_csv, write_json, write_parquet};
use crate::structs::{Batch, Entity, PipelineConfig, Stage};
use crate::transform::{CleanReport, clean};
use crate::warehouse::{LoadReport, Warehouse};
use log::{debug, info};
use serde::Serialize;

/// Reports collected over one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub cleaned: Vec<CleanReport>,
    pub loaded: Vec<LoadReport>,
}

/// Reads an entity's raw file, cleans it with the configured rules, and
/// writes the cleaned file (plus any extra formats) to the processed dir.
pub fn clean_entity(entity: Entity, config: &PipelineConfig) -> Result<(Batch, CleanReport)> {
    let raw_path = config.raw_path(entity);
    info!("Cleaning {} from {}", entity, raw_path.display());

    let raw = read_csv(entity, &raw_path)?;
    let rules = config.rules.rules_for(entity);
    let (cleaned, report) = clean(entity, raw, &rules, config.column_policy)?;

    let csv_path = config.cleaned_path(entity);
    write_csv(&cleaned, &csv_path)?;
    if config.formats.json {
        write_json(&cleaned, &config.cleaned_path_with_extension(entity, "json"))?;
    }
    if config.formats.parquet {
        write_parquet(
            &cleaned,
            &config.cleaned_path_with_extension(entity, "parquet"),
        )?;
    }

    info!(
        "Cleaned {}: {} -> {} rows, saved to {}",
        entity,
        report.rows_in,
        report.rows_out,
        csv_path.display()
    );
    Ok((cleaned, report))
}

/// Loads the cleaned files of `entities` into the warehouse.
///
/// Every cleaned file is read before the warehouse is touched, and all
/// entities are loaded in one transaction, dimensions first regardless of
/// the order given. A failure anywhere leaves the warehouse unchanged. The
/// connection is released on every path, including errors.
pub fn load_entities(entities: &[Entity], config: &PipelineConfig) -> Result<Vec<LoadReport>> {
    let mut batches = Vec::with_capacity(entities.len());
    for entity in Entity::ALL.into_iter().filter(|e| entities.contains(e)) {
        let path = config.cleaned_path(entity);
        debug!("Reading cleaned {} from {}", entity, path.display());
        batches.push((entity, read_csv(entity, &path)?));
    }

    let mut warehouse = Warehouse::open(&config.warehouse_path)?;
    let pending: Vec<(Entity, &Batch)> = batches.iter().map(|(e, b)| (*e, b)).collect();
    let reports = warehouse.load_all(&pending)?;

    warehouse.close()?;
    Ok(reports)
}

/// Runs the requested stages for `entities`.
pub fn run(config: &PipelineConfig, entities: &[Entity], stage: Stage) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    if stage.cleans() {
        for &entity in entities {
            let (_, report) = clean_entity(entity, config)?;
            summary.cleaned.push(report);
        }
    }

    if stage.loads() {
        summary.loaded = load_entities(entities, config)?;
    }

    Ok(summary)
}
