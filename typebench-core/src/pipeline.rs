//! Pipeline stages over a benchmark workspace.
//!
//! Each stage reads its inputs from the configured directory layout, does
//! one job and writes one kind of output. Stages that call a model take the
//! [`Predictor`] as an argument, so the caller decides how it is built.

use crate::config::{BenchConfig, PathsConfig};
use crate::dataset::{self, load_prompt, load_records, load_test_records};
use crate::dispatch::{DispatchReport, Dispatcher};
use crate::error::{DatasetError, Result};
use crate::predictor::{Predictor, TermTypingPredictor};
use crate::prompt::{self, ReasonerResults};
use crate::providers::create_provider;
use crate::reconcile::MissingReport;
use crate::results::{ResultSet, read_ids};
use crate::submit;
use crate::types::RequestItem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// A file written by a stage and how many records it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageOutput {
    pub path: PathBuf,
    pub records: usize,
}

/// A dispatched batch and where its results went.
#[derive(Debug)]
pub struct RunOutcome {
    pub output: PathBuf,
    pub report: DispatchReport,
}

/// A re-run batch merged into an existing result file.
#[derive(Debug)]
pub struct RerunOutcome {
    pub output: PathBuf,
    pub report: DispatchReport,
    /// New predictions added to the result file.
    pub merged: usize,
    /// New predictions dropped because the file already held their id.
    pub rejected: usize,
    /// Predictions in the result file after the merge.
    pub total: usize,
}

/// Inputs and outputs of a reconciliation.
#[derive(Debug, Clone)]
pub struct MissingPaths {
    pub items: PathBuf,
    pub results: PathBuf,
    pub reference: PathBuf,
    pub report: PathBuf,
    pub prompts: PathBuf,
}

/// Result file stem for a judge batch: `_test` becomes `_result`, otherwise `_result` is appended.
pub fn judge_result_stem(items_stem: &str) -> String {
    if items_stem.contains("_test") {
        items_stem.replace("_test", "_result")
    } else {
        format!("{}_result", items_stem)
    }
}

/// Files in `dir` whose name starts with `prefix` and ends with `.{extension}`, sorted.
fn list_files(dir: &Path, prefix: &str, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let matches = path.is_file()
            && path.extension().and_then(|e| e.to_str()) == Some(extension)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix));
        if matches {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Stage runner bound to one configuration.
pub struct Pipeline {
    config: BenchConfig,
}

impl Pipeline {
    pub fn new(config: BenchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn paths(&self) -> &PathsConfig {
        &self.config.paths
    }

    /// Build the structured-output predictor for a configured model.
    pub fn build_predictor(&self, model: &str) -> Result<Arc<TermTypingPredictor>> {
        let model_config = self.config.model(model)?;
        let provider = create_provider(model, model_config)?;
        Ok(Arc::new(TermTypingPredictor::new(provider, model_config)))
    }

    async fn dispatch(
        &self,
        model: &str,
        predictor: Arc<dyn Predictor>,
        items: Vec<RequestItem>,
    ) -> Result<DispatchReport> {
        let ceiling = self.config.model(model)?.max_concurrent;
        let dispatcher = Dispatcher::new(predictor, ceiling)?
            .with_progress_interval(self.config.dispatch.progress_interval);
        Ok(dispatcher.run(items).await)
    }

    /// Dispatch `items` for `model` and write the successful predictions to `output`.
    pub async fn dispatch_to_file(
        &self,
        model: &str,
        predictor: Arc<dyn Predictor>,
        items: Vec<RequestItem>,
        output: &Path,
    ) -> Result<DispatchReport> {
        let report = self.dispatch(model, predictor, items).await?;
        report.results.write_json(output)?;
        info!(
            model,
            output = %output.display(),
            succeeded = report.succeeded(),
            failed = report.failures.len(),
            "Saved results"
        );
        Ok(report)
    }

    /// Build the term-typing batch of `dataset` for `model`.
    pub fn prepare(&self, dataset: &str, model: &str) -> Result<StageOutput> {
        let paths = self.paths();
        let template = load_prompt(&paths.prompt_file(dataset))?;
        let train = load_records(&paths.train_file(dataset))?;
        let test = load_test_records(&paths.test_file(dataset))?;

        let items = prompt::build_term_typing_items(&template, &train, &test);
        let output = paths.items_file(model, dataset);
        dataset::write_items_jsonl(&output, &items)?;
        info!(dataset, model, items = items.len(), output = %output.display(), "Prepared batch");
        Ok(StageOutput {
            path: output,
            records: items.len(),
        })
    }

    /// Predict the prepared batch of `dataset` with `model`.
    pub async fn run(
        &self,
        dataset: &str,
        model: &str,
        predictor: Arc<dyn Predictor>,
    ) -> Result<RunOutcome> {
        let items = dataset::read_items_jsonl(&self.paths().items_file(model, dataset))?;
        let output = self.paths().results_file(model, dataset);
        info!(dataset, model, items = items.len(), "Running batch");
        let report = self.dispatch_to_file(model, predictor, items, &output).await?;
        Ok(RunOutcome { output, report })
    }

    /// Dispatch a re-run batch and merge its predictions into the existing
    /// result file of `dataset` and `model`.
    ///
    /// `items` defaults to the batch written by [`Pipeline::missing`]. Ids the
    /// result file already holds keep their earlier prediction. The merged file
    /// follows the order of the prepared batch.
    pub async fn rerun(
        &self,
        dataset: &str,
        model: &str,
        predictor: Arc<dyn Predictor>,
        items: Option<&Path>,
    ) -> Result<RerunOutcome> {
        let paths = self.paths();
        let batch_path = items
            .map(Path::to_path_buf)
            .unwrap_or_else(|| paths.missing_prompts_file(model, dataset));
        let batch = dataset::read_items_jsonl(&batch_path)?;
        let output = paths.results_file(model, dataset);

        let mut results = if output.exists() {
            ResultSet::read_json(&output)?
        } else {
            ResultSet::new()
        };
        info!(
            dataset,
            model,
            items = batch.len(),
            existing = results.len(),
            batch = %batch_path.display(),
            "Re-running batch"
        );

        let report = self.dispatch(model, predictor, batch).await?;
        let (mut merged, mut rejected) = (0, 0);
        for prediction in report.results.iter().cloned() {
            let id = prediction.id.clone();
            match results.insert(prediction) {
                Ok(()) => merged += 1,
                Err(e) => {
                    warn!(dataset, model, id = %id, error = %e, "Keeping the earlier prediction");
                    rejected += 1;
                }
            }
        }

        let prepared = paths.items_file(model, dataset);
        if prepared.exists() {
            let order = dataset::read_items_jsonl(&prepared)?;
            results.sort_by_order(order.iter().filter_map(|item| item.id.as_deref()));
        }
        results.write_json(&output)?;
        info!(
            dataset,
            model,
            merged,
            rejected,
            total = results.len(),
            output = %output.display(),
            "Merged re-run results"
        );
        Ok(RerunOutcome {
            output,
            report,
            merged,
            rejected,
            total: results.len(),
        })
    }

    /// Build the judge batch of `dataset` from the reasoners' results.
    pub fn prepare_judge(
        &self,
        dataset: &str,
        judge: &str,
        reasoners: &[String],
    ) -> Result<StageOutput> {
        let paths = self.paths();
        let template = load_prompt(&paths.judge_prompt_file(dataset))?;
        let train = load_records(&paths.train_file(dataset))?;
        let test = load_test_records(&paths.test_file(dataset))?;
        let labels = prompt::extract_labels(&train);

        let mut reasoner_results = Vec::with_capacity(reasoners.len());
        for model in reasoners {
            let path = paths.results_file(model, dataset);
            if !path.exists() {
                return Err(DatasetError::MissingReasonerResults {
                    model: model.clone(),
                    path,
                }
                .into());
            }
            let results = ResultSet::read_json(&path)?;
            reasoner_results.push(ReasonerResults::new(model.clone(), results.into_predictions()));
        }

        let items = prompt::build_judge_items(&template, &labels, &test, &reasoner_results);
        if items.len() < test.len() {
            warn!(
                dataset,
                skipped = test.len() - items.len(),
                "Some test records lack predictions from every reasoner"
            );
        }
        let output = paths.judge_items_file(dataset, judge, reasoners);
        dataset::write_items_jsonl(&output, &items)?;
        info!(dataset, judge, items = items.len(), output = %output.display(), "Prepared judge batch");
        Ok(StageOutput {
            path: output,
            records: items.len(),
        })
    }

    /// Run the judge over every prepared judge batch of `dataset`.
    pub async fn judge(
        &self,
        dataset: &str,
        judge: &str,
        predictor: Arc<dyn Predictor>,
    ) -> Result<Vec<RunOutcome>> {
        let dir = self.paths().judge_items_dir(dataset, judge);
        if !dir.is_dir() {
            warn!(dataset, judge, dir = %dir.display(), "No judge batches prepared");
            return Ok(Vec::new());
        }
        let files = list_files(&dir, &dataset.to_lowercase(), "jsonl")?;
        if files.is_empty() {
            warn!(dataset, judge, dir = %dir.display(), "No judge batches found");
        }

        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let items = dataset::read_items_jsonl(&file)?;
            let output = self
                .paths()
                .judge_results_dir(judge)
                .join(format!("{}.json", judge_result_stem(&file_stem(&file))));
            info!(file = %file.display(), items = items.len(), "Judging batch");
            let report = self
                .dispatch_to_file(judge, predictor.clone(), items, &output)
                .await?;
            outcomes.push(RunOutcome { output, report });
        }
        Ok(outcomes)
    }

    /// Join the curated results of `model` with the test split into a reason CSV.
    pub fn join(&self, dataset: &str, model: &str) -> Result<StageOutput> {
        let paths = self.paths();
        let test = load_test_records(&paths.test_file(dataset))?;
        let results = ResultSet::read_json(&paths.best_results_file(model, dataset))?;
        let rows = submit::join_with_test(&test, &results);
        let output = paths.need_reason_csv(model, dataset);

        if rows.is_empty() {
            warn!(dataset, model, "No joined records; CSV not written");
        } else {
            submit::write_reason_csv(&output, &rows)?;
            info!(dataset, model, rows = rows.len(), output = %output.display(), "Joined results with test data");
        }
        Ok(StageOutput {
            path: output,
            records: rows.len(),
        })
    }

    /// Ask `model` to justify its joined predictions.
    pub async fn reason(
        &self,
        dataset: &str,
        model: &str,
        predictor: Arc<dyn Predictor>,
    ) -> Result<RunOutcome> {
        let paths = self.paths();
        let rows = submit::read_reason_rows(&paths.need_reason_csv(model, dataset))?;
        let system = load_prompt(&paths.reason_prompt_file(model, dataset))?;
        let items = prompt::build_reason_items(&system, &rows);
        let output = paths.reason_results_file(model, dataset);
        let report = self.dispatch_to_file(model, predictor, items, &output).await?;
        Ok(RunOutcome { output, report })
    }

    /// Strip reasons from the curated reason results of `model`.
    pub fn strip_reason(&self, dataset: &str, model: &str) -> Result<StageOutput> {
        let input = self.paths().reason_strip_input(model, dataset);
        let output = self.paths().reason_submit_file(model, dataset);
        let records = submit::strip_file(&input, &output)?;
        info!(dataset, model, records, output = %output.display(), "Wrote submission file");
        Ok(StageOutput {
            path: output,
            records,
        })
    }

    /// Strip reasons from every judge result of `model`.
    pub fn strip_judge(&self, model: &str) -> Result<Vec<StageOutput>> {
        let dir = self.paths().judge_results_dir(model);
        if !dir.is_dir() {
            warn!(model, dir = %dir.display(), "No judge results to strip");
            return Ok(Vec::new());
        }
        let out_dir = self.paths().judge_submit_model_dir(model);
        let mut outputs = Vec::new();
        for input in list_files(&dir, "", "json")? {
            let output = out_dir.join(format!("{}_{}.json", file_stem(&input), model));
            let records = submit::strip_file(&input, &output)?;
            info!(model, records, output = %output.display(), "Wrote judge submission file");
            outputs.push(StageOutput {
                path: output,
                records,
            });
        }
        Ok(outputs)
    }

    /// Default reconciliation paths for a term-typing run.
    pub fn missing_paths(&self, dataset: &str, model: &str) -> MissingPaths {
        let paths = self.paths();
        MissingPaths {
            items: paths.items_file(model, dataset),
            results: paths.results_file(model, dataset),
            reference: paths.test_file(dataset),
            report: paths.missing_report_file(model, dataset),
            prompts: paths.missing_prompts_file(model, dataset),
        }
    }

    /// Reconcile results against the reference and write the report and re-run batch.
    pub fn missing(&self, paths: &MissingPaths) -> Result<MissingReport> {
        let items = dataset::read_items_jsonl(&paths.items)?;
        let result_ids = read_ids(&paths.results)?;
        let reference_ids = read_ids(&paths.reference)?;

        let report = MissingReport::build(&items, &result_ids, &reference_ids);
        report.write_json(&paths.report)?;
        report.write_prompts_jsonl(&paths.prompts)?;
        info!(
            missing = report.summary.total_missing_ids,
            located = report.summary.missing_prompts_found,
            report = %paths.report.display(),
            "Wrote missing-data report"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use crate::error::{BenchError, LlmError};
    use crate::types::Prediction;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct FirstLabel;

    #[async_trait]
    impl Predictor for FirstLabel {
        async fn predict(&self, item: &RequestItem) -> std::result::Result<Prediction, LlmError> {
            let id = item.id.clone().ok_or_else(|| LlmError::InvalidPrediction {
                message: "no id".into(),
            })?;
            Ok(Prediction {
                id,
                types: vec!["Process".into()],
                reason: "fixed".into(),
            })
        }
    }

    fn workspace() -> (tempfile::TempDir, Pipeline) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BenchConfig::default();
        config.paths.root = dir.path().to_path_buf();
        config.datasets = vec!["SWEET".into()];
        config.models.insert(
            "mock".into(),
            ModelConfig {
                max_concurrent: 2,
                ..ModelConfig::default()
            },
        );

        let ds = dir.path().join("datasets/SWEET");
        std::fs::create_dir_all(ds.join("train")).unwrap();
        std::fs::create_dir_all(ds.join("test")).unwrap();
        std::fs::write(
            ds.join("prompt.json"),
            json!({"prompt": "Labels ([NUM_LABELS]):\n[LABELS]\n[FIRST_FIVE_DATASET]"}).to_string(),
        )
        .unwrap();
        std::fs::write(
            ds.join("prompt_judge.json"),
            json!({"prompt": "Judge among [LABELS]"}).to_string(),
        )
        .unwrap();
        std::fs::write(
            ds.join("train/term_typing_train_data.json"),
            json!([
                {"id": "tr1", "term": "evaporation", "types": ["Process"]},
                {"id": "tr2", "term": "granite", "types": ["Material"]}
            ])
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            ds.join("test/sweet_term_typing_test_data.json"),
            json!([
                {"id": "S1", "term": "rain"},
                {"id": "S2", "term": "basalt"},
                {"id": "S3", "term": "erosion"}
            ])
            .to_string(),
        )
        .unwrap();

        (dir, Pipeline::new(config))
    }

    #[test]
    fn test_judge_result_stem() {
        assert_eq!(
            judge_result_stem("sweet_gpt-4o_deepseek-chat_test"),
            "sweet_gpt-4o_deepseek-chat_result"
        );
        assert_eq!(judge_result_stem("sweet_rerun"), "sweet_rerun_result");
    }

    #[test]
    fn test_prepare_writes_batch() {
        let (_dir, pipeline) = workspace();
        let out = pipeline.prepare("SWEET", "mock").unwrap();
        assert_eq!(out.records, 3);
        assert!(out.path.ends_with("processed_datasets/mock/sweet_test.jsonl"));

        let items = dataset::read_items_jsonl(&out.path).unwrap();
        assert_eq!(items[0].id.as_deref(), Some("S1"));
        assert!(items[0].messages[0].content.starts_with("Labels (2):\n- Material\n- Process\n"));
        assert_eq!(items[2].user_text(), Some("{'id': 'S3', 'term': 'erosion'}"));
    }

    #[test]
    fn test_prepare_missing_prompt_fails() {
        let (dir, pipeline) = workspace();
        std::fs::remove_file(dir.path().join("datasets/SWEET/prompt.json")).unwrap();
        assert!(matches!(
            pipeline.prepare("SWEET", "mock"),
            Err(BenchError::Dataset(DatasetError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_run_and_missing() {
        let (dir, pipeline) = workspace();
        pipeline.prepare("SWEET", "mock").unwrap();
        let outcome = pipeline.run("SWEET", "mock", Arc::new(FirstLabel)).await.unwrap();
        assert_eq!(outcome.report.succeeded(), 3);
        assert!(outcome.output.ends_with("results/mock/sweet_results.json"));

        // Drop one result and reconcile.
        let mut predictions = ResultSet::read_json(&outcome.output).unwrap().into_predictions();
        predictions.retain(|p| p.id != "S2");
        ResultSet::from_predictions(predictions)
            .unwrap()
            .write_json(&outcome.output)
            .unwrap();

        let paths = pipeline.missing_paths("SWEET", "mock");
        let report = pipeline.missing(&paths).unwrap();
        assert_eq!(report.summary.missing_ids, vec!["S2"]);
        assert_eq!(report.summary.missing_prompts_found, 1);

        let rerun = dataset::read_items_jsonl(&paths.prompts).unwrap();
        assert_eq!(rerun.len(), 1);
        assert_eq!(rerun[0].id.as_deref(), Some("S2"));
        assert!(dir.path().join("results/mock/sweet_missing_data_report.json").exists());
    }

    #[tokio::test]
    async fn test_judge_round() {
        let (dir, pipeline) = workspace();
        let reasoners = vec!["gpt-4o".to_string(), "deepseek-chat".to_string()];
        for model in &reasoners {
            let predictions = vec![
                Prediction {
                    id: "S1".into(),
                    types: vec!["Process".into()],
                    reason: format!("{} thinks so", model),
                },
                Prediction {
                    id: "S2".into(),
                    types: vec!["Material".into()],
                    reason: "rock".into(),
                },
            ];
            ResultSet::from_predictions(predictions)
                .unwrap()
                .write_json(&pipeline.paths().results_file(model, "SWEET"))
                .unwrap();
        }

        let prepared = pipeline.prepare_judge("SWEET", "mock", &reasoners).unwrap();
        // S3 has no predictions.
        assert_eq!(prepared.records, 2);
        assert!(prepared.path.ends_with(
            "processed_datasets_judge/sweet/mock/sweet_gpt-4o_deepseek-chat_test.jsonl"
        ));

        let outcomes = pipeline.judge("SWEET", "mock", Arc::new(FirstLabel)).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0]
            .output
            .ends_with("results_judge/mock/sweet_gpt-4o_deepseek-chat_result.json"));

        let stripped = pipeline.strip_judge("mock").unwrap();
        assert_eq!(stripped.len(), 1);
        assert_eq!(stripped[0].records, 2);
        assert!(dir
            .path()
            .join("results_for_submit_judge/mock/sweet_gpt-4o_deepseek-chat_result_mock.json")
            .exists());
    }

    #[test]
    fn test_prepare_judge_requires_reasoner_results() {
        let (_dir, pipeline) = workspace();
        let err = pipeline
            .prepare_judge("SWEET", "mock", &["gpt-4o".to_string()])
            .unwrap_err();
        assert!(matches!(
            err,
            BenchError::Dataset(DatasetError::MissingReasonerResults { .. })
        ));
    }

    #[tokio::test]
    async fn test_join_reason_strip() {
        let (_dir, pipeline) = workspace();
        let paths = pipeline.paths().clone();
        ResultSet::from_predictions(vec![
            Prediction {
                id: "S3".into(),
                types: vec!["Process".into(), "Phenomenon".into()],
                reason: String::new(),
            },
            Prediction {
                id: "S1".into(),
                types: vec!["Process".into()],
                reason: String::new(),
            },
        ])
        .unwrap()
        .write_json(&paths.best_results_file("mock", "SWEET"))
        .unwrap();

        let joined = pipeline.join("SWEET", "mock").unwrap();
        assert_eq!(joined.records, 2);
        let rows = submit::read_reason_rows(&joined.path).unwrap();
        assert_eq!(rows[0].id, "S1");
        assert_eq!(rows[1].types, "Process; Phenomenon");

        std::fs::write(
            paths.reason_prompt_file("mock", "SWEET"),
            json!({"prompt": "Explain the prediction."}).to_string(),
        )
        .unwrap();
        let outcome = pipeline.reason("SWEET", "mock", Arc::new(FirstLabel)).await.unwrap();
        assert_eq!(outcome.report.succeeded(), 2);
        assert!(outcome.output.ends_with("result_with_reason/mock/sweet_results.json"));

        // The strip stage reads the curated copy.
        std::fs::copy(&outcome.output, paths.reason_strip_input("mock", "SWEET")).unwrap();
        let stripped = pipeline.strip_reason("SWEET", "mock").unwrap();
        assert_eq!(stripped.records, 2);
        let text = std::fs::read_to_string(&stripped.path).unwrap();
        assert!(!text.contains("reason"));
    }

    #[test]
    fn test_build_predictor_unknown_model() {
        let (_dir, pipeline) = workspace();
        assert!(matches!(
            pipeline.build_predictor("llama"),
            Err(BenchError::Dataset(DatasetError::UnknownModel { .. }))
        ));
    }

    #[tokio::test]
    async fn test_rerun_restores_full_coverage() {
        let (_dir, pipeline) = workspace();
        pipeline.prepare("SWEET", "mock").unwrap();
        let outcome = pipeline.run("SWEET", "mock", Arc::new(FirstLabel)).await.unwrap();

        let mut predictions = ResultSet::read_json(&outcome.output).unwrap().into_predictions();
        predictions.retain(|p| p.id != "S2");
        ResultSet::from_predictions(predictions)
            .unwrap()
            .write_json(&outcome.output)
            .unwrap();

        let paths = pipeline.missing_paths("SWEET", "mock");
        assert_eq!(pipeline.missing(&paths).unwrap().summary.missing_ids, vec!["S2"]);

        let rerun = pipeline
            .rerun("SWEET", "mock", Arc::new(FirstLabel), None)
            .await
            .unwrap();
        assert_eq!(rerun.merged, 1);
        assert_eq!(rerun.rejected, 0);
        assert_eq!(rerun.total, 3);

        let merged = ResultSet::read_json(&rerun.output).unwrap();
        let ids: Vec<&str> = merged.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["S1", "S2", "S3"]);
        assert!(pipeline.missing(&paths).unwrap().summary.missing_ids.is_empty());
    }

    #[tokio::test]
    async fn test_rerun_keeps_earlier_predictions() {
        let (_dir, pipeline) = workspace();
        let prepared = pipeline.prepare("SWEET", "mock").unwrap();
        let output = pipeline.paths().results_file("mock", "SWEET");
        ResultSet::from_predictions(vec![Prediction {
            id: "S1".into(),
            types: vec!["Phenomenon".into()],
            reason: "first run".into(),
        }])
        .unwrap()
        .write_json(&output)
        .unwrap();

        // Re-running the whole prepared batch must not replace S1.
        let rerun = pipeline
            .rerun("SWEET", "mock", Arc::new(FirstLabel), Some(prepared.path.as_path()))
            .await
            .unwrap();
        assert_eq!(rerun.merged, 2);
        assert_eq!(rerun.rejected, 1);

        let merged = ResultSet::read_json(&output).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged.get("S1").unwrap().reason, "first run");
    }

    #[tokio::test]
    async fn test_rerun_without_batch_fails() {
        let (_dir, pipeline) = workspace();
        assert!(matches!(
            pipeline.rerun("SWEET", "mock", Arc::new(FirstLabel), None).await,
            Err(BenchError::Dataset(DatasetError::NotFound { .. }))
        ));
    }
}
