//! CLI subcommand handlers.
//!
//! Each stage runs once per selected dataset (and model). A failure is logged
//! for that dataset and the next one still runs; only argument and
//! configuration problems end the process with an error.

use crate::Commands;
use crate::ConfigAction;
use crate::StripAction;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};
use typebench_core::config::{WORKSPACE_CONFIG_FILE, load_config, to_toml};
use typebench_core::{BenchConfig, MissingPaths, Pipeline, Predictor, TermTypingPredictor};

/// Handle a CLI subcommand.
pub async fn handle_command(command: Commands, workspace: &Path) -> anyhow::Result<()> {
    match command {
        Commands::Config { action } => handle_config(action, workspace),
        command => {
            let pipeline = Pipeline::new(load_workspace_config(workspace)?);
            handle_stage(command, &pipeline).await
        }
    }
}

/// Load and validate the layered configuration, anchoring a relative root at the workspace.
fn load_workspace_config(workspace: &Path) -> anyhow::Result<BenchConfig> {
    let mut config = load_config(Some(workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if config.paths.root.is_relative() {
        config.paths.root = workspace.join(&config.paths.root);
    }
    config.validate()?;
    Ok(config)
}

fn report_failure(stage: &str, dataset: &str, model: &str, err: &dyn std::fmt::Display) {
    error!(stage, dataset, model, error = %err, "Stage failed; continuing with the next dataset");
}

/// Predictors for every selected model. A model whose provider cannot be
/// built (e.g. its API key is unset) is logged and left out.
fn build_predictors(
    pipeline: &Pipeline,
    stage: &str,
    selector: &str,
) -> anyhow::Result<Vec<(String, Arc<TermTypingPredictor>)>> {
    let mut predictors = Vec::new();
    for model in pipeline.config().select_models(selector)? {
        match pipeline.build_predictor(&model) {
            Ok(predictor) => predictors.push((model, predictor)),
            Err(e) => error!(stage, model = %model, error = %e, "Skipping model"),
        }
    }
    Ok(predictors)
}

async fn handle_stage(command: Commands, pipeline: &Pipeline) -> anyhow::Result<()> {
    let config = pipeline.config();
    match command {
        Commands::Prepare { dataset, model } => {
            let datasets = config.select_datasets(&dataset)?;
            for model in config.select_models(&model)? {
                for ds in &datasets {
                    match pipeline.prepare(ds, &model) {
                        Ok(out) => println!("{}: {} items -> {}", ds, out.records, out.path.display()),
                        Err(e) => report_failure("prepare", ds, &model, &e),
                    }
                }
            }
        }
        Commands::Run { dataset, model } => {
            let datasets = config.select_datasets(&dataset)?;
            for (model, predictor) in build_predictors(pipeline, "run", &model)? {
                for ds in &datasets {
                    match pipeline.run(ds, &model, predictor.clone()).await {
                        Ok(outcome) => println!(
                            "{} / {}: {} of {} predicted -> {}",
                            ds,
                            model,
                            outcome.report.succeeded(),
                            outcome.report.attempted,
                            outcome.output.display()
                        ),
                        Err(e) => report_failure("run", ds, &model, &e),
                    }
                }
                let usage = predictor.usage();
                info!(
                    model = %model,
                    input_tokens = usage.input_tokens,
                    output_tokens = usage.output_tokens,
                    "Token usage"
                );
            }
        }
        Commands::Rerun {
            dataset,
            model,
            items,
        } => {
            let datasets = config.select_datasets(&dataset)?;
            if items.is_some() && datasets.len() > 1 {
                anyhow::bail!("--items names one batch; select a single dataset");
            }
            for (model, predictor) in build_predictors(pipeline, "rerun", &model)? {
                for ds in &datasets {
                    match pipeline
                        .rerun(ds, &model, predictor.clone(), items.as_deref())
                        .await
                    {
                        Ok(outcome) => println!(
                            "{} / {}: {} of {} re-run, {} merged, {} total -> {}",
                            ds,
                            model,
                            outcome.report.succeeded(),
                            outcome.report.attempted,
                            outcome.merged,
                            outcome.total,
                            outcome.output.display()
                        ),
                        Err(e) => report_failure("rerun", ds, &model, &e),
                    }
                }
            }
        }
        Commands::PrepareJudge {
            dataset,
            judge,
            reasoners,
        } => {
            let datasets = config.select_datasets(&dataset)?;
            config.model(&judge)?;
            let reasoners = config.parse_model_list(&reasoners)?;
            for ds in &datasets {
                match pipeline.prepare_judge(ds, &judge, &reasoners) {
                    Ok(out) => println!("{}: {} judge items -> {}", ds, out.records, out.path.display()),
                    Err(e) => report_failure("prepare-judge", ds, &judge, &e),
                }
            }
        }
        Commands::Judge { dataset, judge } => {
            let datasets = config.select_datasets(&dataset)?;
            let predictor: Arc<dyn Predictor> = pipeline.build_predictor(&judge)?;
            for ds in &datasets {
                match pipeline.judge(ds, &judge, predictor.clone()).await {
                    Ok(outcomes) => {
                        for outcome in outcomes {
                            println!(
                                "{} / {}: {} of {} judged -> {}",
                                ds,
                                judge,
                                outcome.report.succeeded(),
                                outcome.report.attempted,
                                outcome.output.display()
                            );
                        }
                    }
                    Err(e) => report_failure("judge", ds, &judge, &e),
                }
            }
        }
        Commands::Join { dataset, model } => {
            let datasets = config.select_datasets(&dataset)?;
            for model in config.select_models(&model)? {
                for ds in &datasets {
                    match pipeline.join(ds, &model) {
                        Ok(out) if out.records > 0 => {
                            println!("{}: {} rows -> {}", ds, out.records, out.path.display())
                        }
                        Ok(_) => println!("{}: nothing to join for {}", ds, model),
                        Err(e) => report_failure("join", ds, &model, &e),
                    }
                }
            }
        }
        Commands::Reason { dataset, model } => {
            let datasets = config.select_datasets(&dataset)?;
            let predictor: Arc<dyn Predictor> = pipeline.build_predictor(&model)?;
            for ds in &datasets {
                match pipeline.reason(ds, &model, predictor.clone()).await {
                    Ok(outcome) => println!(
                        "{} / {}: {} of {} reasoned -> {}",
                        ds,
                        model,
                        outcome.report.succeeded(),
                        outcome.report.attempted,
                        outcome.output.display()
                    ),
                    Err(e) => report_failure("reason", ds, &model, &e),
                }
            }
        }
        Commands::Strip { action } => handle_strip(action, pipeline)?,
        Commands::Missing {
            dataset,
            model,
            items,
            results,
            reference,
            output,
        } => {
            if let (Some(items), Some(results), Some(reference)) = (items, results, reference) {
                let paths = MissingPaths {
                    items,
                    results,
                    reference,
                    report: output.join("missing_data_report.json"),
                    prompts: output.join("missing_prompts.jsonl"),
                };
                match pipeline.missing(&paths) {
                    Ok(report) => print_missing("explicit paths", &report, &paths),
                    Err(e) => report_failure("missing", "-", "-", &e),
                }
                return Ok(());
            }

            let (Some(dataset), Some(model)) = (dataset, model) else {
                anyhow::bail!(
                    "missing needs a dataset and --model, or --items, --results and --reference"
                );
            };
            let datasets = config.select_datasets(&dataset)?;
            for model in config.select_models(&model)? {
                for ds in &datasets {
                    let paths = pipeline.missing_paths(ds, &model);
                    match pipeline.missing(&paths) {
                        Ok(report) => print_missing(&format!("{} / {}", ds, model), &report, &paths),
                        Err(e) => report_failure("missing", ds, &model, &e),
                    }
                }
            }
        }
        Commands::Config { action } => {
            // Routed before the pipeline is built.
            anyhow::bail!("unexpected config action: {:?}", action);
        }
    }
    Ok(())
}

fn handle_strip(action: StripAction, pipeline: &Pipeline) -> anyhow::Result<()> {
    let config = pipeline.config();
    match action {
        StripAction::Reason { dataset, model } => {
            let datasets = config.select_datasets(&dataset)?;
            for model in config.select_models(&model)? {
                for ds in &datasets {
                    match pipeline.strip_reason(ds, &model) {
                        Ok(out) => println!("{}: {} records -> {}", ds, out.records, out.path.display()),
                        Err(e) => report_failure("strip", ds, &model, &e),
                    }
                }
            }
        }
        StripAction::Judge { model } => {
            for model in config.select_models(&model)? {
                match pipeline.strip_judge(&model) {
                    Ok(outputs) => {
                        for out in outputs {
                            println!("{}: {} records -> {}", model, out.records, out.path.display());
                        }
                    }
                    Err(e) => report_failure("strip", "-", &model, &e),
                }
            }
        }
    }
    Ok(())
}

fn print_missing(scope: &str, report: &typebench_core::MissingReport, paths: &MissingPaths) {
    let summary = &report.summary;
    println!(
        "{}: {} of {} reference ids missing, {} requests located",
        scope, summary.total_missing_ids, summary.total_reference_ids, summary.missing_prompts_found
    );
    println!("  report:  {}", paths.report.display());
    println!("  re-run:  {}", paths.prompts.display());
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(WORKSPACE_CONFIG_FILE);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }
            std::fs::create_dir_all(workspace)?;
            std::fs::write(&config_path, to_toml(&BenchConfig::default())?)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            println!("{}", to_toml(&config)?);
            Ok(())
        }
    }
}
