//! Results table: one row per trial, best metric first.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::search::Configuration;
use crate::sweep::SweepReport;
use crate::trial::{ObjectiveDirection, TrialStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub trial_number: usize,
    pub configuration: Configuration,
    pub metric: f64,
    pub rounds: usize,
    pub duration_seconds: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRow {
    pub trial_number: usize,
    pub configuration: Configuration,
    pub error: String,
}

/// Completed trials sorted best-first by the experiment's objective
/// direction (ties broken by trial number), followed by failed trials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultsTable {
    pub metric_name: String,
    pub parameter_names: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub failed: Vec<FailedRow>,
}

impl ResultsTable {
    pub fn from_report(report: &SweepReport) -> Self {
        let config = &report.status.config;
        let parameter_names = config
            .search_space
            .parameters
            .iter()
            .map(|p| p.name.clone())
            .collect();

        let mut rows = Vec::new();
        let mut failed = Vec::new();
        for trial in &report.trials {
            match (&trial.status, &trial.result) {
                (TrialStatus::Completed, Some(result)) => rows.push(ResultRow {
                    trial_number: trial.trial_number,
                    configuration: trial.configuration.clone(),
                    metric: result.objective,
                    rounds: result.history.len(),
                    duration_seconds: result.duration_seconds,
                }),
                (TrialStatus::Failed, _) => failed.push(FailedRow {
                    trial_number: trial.trial_number,
                    configuration: trial.configuration.clone(),
                    error: trial.error.clone().unwrap_or_default(),
                }),
                _ => {}
            }
        }

        let direction = config.direction;
        rows.sort_by(|a, b| {
            let by_metric = match direction {
                ObjectiveDirection::Maximize => b.metric.total_cmp(&a.metric),
                ObjectiveDirection::Minimize => a.metric.total_cmp(&b.metric),
            };
            by_metric.then(a.trial_number.cmp(&b.trial_number))
        });

        Self {
            metric_name: config.objective_metric.clone(),
            parameter_names,
            rows,
            failed,
        }
    }

    pub fn best(&self) -> Option<&ResultRow> {
        self.rows.first()
    }
}

impl fmt::Display for ResultsTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut header: Vec<String> = vec!["trial".to_string()];
        header.extend(self.parameter_names.iter().cloned());
        header.push(self.metric_name.clone());
        header.push("time_s".to_string());

        let mut cells: Vec<Vec<String>> = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut line = vec![row.trial_number.to_string()];
            for name in &self.parameter_names {
                line.push(
                    row.configuration
                        .get(name)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            line.push(format!("{:.4}", row.metric));
            line.push(
                row.duration_seconds
                    .map(|d| format!("{d:.1}"))
                    .unwrap_or_else(|| "-".to_string()),
            );
            cells.push(line);
        }

        let mut widths: Vec<usize> = header.iter().map(String::len).collect();
        for line in &cells {
            for (w, cell) in widths.iter_mut().zip(line) {
                *w = (*w).max(cell.len());
            }
        }

        let write_line = |f: &mut fmt::Formatter<'_>, line: &[String]| -> fmt::Result {
            let padded: Vec<String> = line
                .iter()
                .zip(&widths)
                .map(|(cell, &w)| format!("{cell:>w$}"))
                .collect();
            writeln!(f, "{}", padded.join("  ").trim_end())
        };

        write_line(f, &header)?;
        let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        write_line(f, &rule)?;
        for line in &cells {
            write_line(f, line)?;
        }

        for failed in &self.failed {
            writeln!(
                f,
                "trial {} ({}) failed: {}",
                failed.trial_number, failed.configuration, failed.error
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::TrialTask;
    use crate::search::SearchSpace;
    use crate::sweep::Sweep;
    use crate::trial::ExperimentConfig;
    use gt_types::{GtResult, TrialError};

    fn report(direction: ObjectiveDirection) -> SweepReport {
        let space = SearchSpace::new().add_values("lr", vec![0.1, 0.2, 0.3, 0.4]);
        let config = ExperimentConfig::new("table", space)
            .with_rounds(1)
            .with_fail_fast(false)
            .with_objective("mean_accuracy", direction);
        let runner = |task: &TrialTask| -> GtResult<Vec<f64>> {
            match task.trial_number {
                0 => Ok(vec![0.3]),
                1 => Ok(vec![0.9]),
                2 => Err(TrialError::NoMetrics.into()),
                _ => Ok(vec![0.3]),
            }
        };
        Sweep::new(config).unwrap().run(&runner).unwrap()
    }

    #[test]
    fn rows_sorted_by_metric_descending() {
        let table = report(ObjectiveDirection::Maximize).table();
        let order: Vec<usize> = table.rows.iter().map(|r| r.trial_number).collect();
        assert_eq!(order, vec![1, 0, 3]); // tie between 0 and 3 keeps trial order
        assert_eq!(table.best().unwrap().metric, 0.9);
        assert_eq!(table.failed.len(), 1);
        assert_eq!(table.failed[0].trial_number, 2);
    }

    #[test]
    fn minimize_sorts_ascending() {
        let table = report(ObjectiveDirection::Minimize).table();
        assert_eq!(table.best().unwrap().metric, 0.3);
        assert_eq!(table.rows.last().unwrap().metric, 0.9);
    }

    #[test]
    fn display_renders_header_and_rows() {
        let rendered = report(ObjectiveDirection::Maximize).table().to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[0].contains("trial"));
        assert!(lines[0].contains("lr"));
        assert!(lines[0].contains("mean_accuracy"));
        assert!(lines[2].contains("0.9000"));
        assert!(rendered.contains("trial 2 (lr=0.3) failed"));
    }
}
