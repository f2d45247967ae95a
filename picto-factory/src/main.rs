use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use picto_factory::cli::Args;
use picto_factory::database::{default_db_path, Database};
use picto_factory::gemini::GeminiClient;
use picto_factory::io::{self, json, tabular};
use picto_factory::pipeline::{BatchOptions, GlobalConfig, PipelineEngine, PipelineStore};
use picto_factory_sdk::{
    log_exported, log_file_saved, log_imported, log_info, log_state_saved, log_warning, StepStatus,
};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let db_path = args
        .db
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(default_db_path);
    let db = Database::new(db_path.clone())?;
    db.initialize_schema()?;

    let config = merged_config(&db, &args)?;
    db.save_config(&config)?;

    let mut store = PipelineStore::from_rows(db.load_rows()?);

    if let Some(input) = &args.input {
        let text = tokio::fs::read_to_string(input)
            .await
            .with_context(|| format!("failed to read dataset: {}", input))?;
        let records = io::import_text(&text)?;
        let result = store.import_rows(records);
        db.save_rows(store.rows())?;
        log_imported!(result.count);
        log_info!("imported {} rows from {}", result.count, input);
    }

    if let Some(query) = &args.find {
        let (row, created) = store.find_or_create(query);
        if created {
            db.save_rows(store.rows())?;
            log_info!("no match for the query; created row {}", row.id);
        } else {
            log_info!("best match: [{}] {}", row.id, row.utterance);
        }
    }

    if args.list {
        print_store(&store);
        return Ok(());
    }

    let steps = args.parse_steps().map_err(anyhow::Error::msg)?;
    let run_steps = !args.no_process
        && !store.is_empty()
        && steps.as_ref().map(|list| !list.is_empty()).unwrap_or(true);

    let store = if run_steps {
        let service = Arc::new(GeminiClient::from_env(&config.model)?);
        let engine_db = Database::new(db_path.clone())?;
        engine_db.initialize_schema()?;
        let engine =
            PipelineEngine::new(store, service, config.clone()).with_persistence(engine_db);

        // Ctrl-C asks the batch to stop and flags in-flight runs; compute
        // already spent at the model is not reclaimed.
        let signal_engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log_warning!("stop requested; letting in-flight steps settle");
                signal_engine.stop_everything().await;
            }
        });

        let base = BatchOptions {
            batch_size: args.batch_size.clamp(1, 10),
            timeout: match args.timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            force: args.force,
            step: None,
        };
        match steps {
            None => {
                let report = engine.process_all(&base).await;
                log_info!(
                    "cascade finished: {} completed, {} failed of {}",
                    report.completed,
                    report.failed,
                    report.total
                );
            }
            Some(list) => {
                for step in list {
                    let report = engine
                        .process_all(&BatchOptions {
                            step: Some(step),
                            ..base.clone()
                        })
                        .await;
                    log_info!(
                        "{} step finished: {} completed, {} failed of {}",
                        step,
                        report.completed,
                        report.failed,
                        report.total
                    );
                    if report.stopped {
                        break;
                    }
                }
            }
        }

        let rows = {
            let handle = engine.store();
            let guard = handle.lock().await;
            guard.rows().to_vec()
        };
        PipelineStore::from_rows(rows)
    } else {
        store
    };

    if let Some(output) = &args.output {
        let text = match output.rsplit('.').next() {
            Some("json") => json::export(store.rows())?,
            Some("tsv") => tabular::export(store.rows(), '\t'),
            _ => tabular::export(store.rows(), ','),
        };
        tokio::fs::write(output, &text)
            .await
            .with_context(|| format!("failed to write export: {}", output))?;
        log_exported!(store.len(), output);
        log_file_saved!(output);
    }

    db.save_rows(store.rows())?;
    log_state_saved!(store.len());
    Ok(())
}

fn merged_config(db: &Database, args: &Args) -> Result<GlobalConfig> {
    let mut config = db.load_config()?;
    if let Some(lang) = &args.lang {
        config.language = lang.clone();
    }
    if let Some(canvas) = args.canvas {
        config.canvas_size = canvas;
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(attribution) = &args.attribution {
        config.attribution = Some(attribution.clone());
    }
    Ok(config)
}

fn print_store(store: &PipelineStore) {
    println!("{} rows", store.len());
    for row in store.rows() {
        println!(
            "[{}] {} | nlu: {} | visual: {} | svg: {}{}",
            row.id,
            row.utterance,
            status_str(row.nlu_status),
            status_str(row.visual_status),
            status_str(row.svg_status),
            row.error
                .as_deref()
                .map(|e| format!(" | error: {}", e))
                .unwrap_or_default()
        );
    }
}

fn status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Idle => "idle",
        StepStatus::Processing => "processing",
        StepStatus::Completed => "completed",
        StepStatus::Error => "error",
        StepStatus::Outdated => "outdated",
    }
}
