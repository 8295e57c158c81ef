//! Console host
//!
//! Answers orchestrator pauses from command-line presets first, then from
//! prompts on an input stream. In non-interactive mode the first pause the
//! presets cannot answer ends the run.

use std::collections::BTreeMap;
use std::path::Path;

use iform_common::events::ImportEvent;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader, Lines};

use crate::error::{ImportError, ImportResult};
use crate::models::FailureKind;
use crate::services::warehouse_client::WarehouseApi;
use crate::services::workflow_orchestrator::{
    ConflictResolution, ImportOrchestrator, Outcome, Pause,
};

/// Answers supplied up front
#[derive(Debug, Clone, Default)]
pub struct Presets {
    /// Source column → destination field token
    pub mappings: Vec<(String, String)>,
    /// Field token → default value
    pub global_values: BTreeMap<String, String>,
}

/// Split `KEY=VALUE`, trimming both sides
pub fn parse_key_value(pair: &str) -> ImportResult<(String, String)> {
    match pair.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(ImportError::InvalidInput(format!(
            "Expected KEY=VALUE, got '{}'",
            pair
        ))),
    }
}

/// One console line for an event, or `None` for events not shown
pub fn render_event(event: &ImportEvent) -> Option<String> {
    match event {
        ImportEvent::StageChanged { new_stage, .. } => Some(format!("== {} ==", new_stage)),
        ImportEvent::Progress {
            stage,
            progress,
            rows_processed,
            total_rows,
            ..
        } if *total_rows > 0 => Some(format!(
            "[{}] {:>5.1}% ({}/{} rows)",
            stage, progress, rows_processed, total_rows
        )),
        ImportEvent::Progress { stage, progress, .. } => {
            Some(format!("[{}] {:>5.1}%", stage, progress))
        }
        ImportEvent::LogMessage { message, .. } => Some(message.clone()),
        ImportEvent::MatchTableShown {
            column_label,
            lookup_type,
            values,
            options,
            ..
        } => {
            let mut text = format!(
                "{} value(s) of {} need a {} match: {}",
                values.len(),
                column_label,
                lookup_type,
                values.join(", ")
            );
            if !options.is_empty() {
                let offered: Vec<String> = options
                    .iter()
                    .map(|(id, caption)| format!("{}={}", id, caption))
                    .collect();
                text.push_str(&format!("\n  options: {}", offered.join(", ")));
            }
            Some(text)
        }
        ImportEvent::UnmatchedValuesFlagged { source_field, values, .. } => Some(format!(
            "Still unmatched in {}: {}",
            source_field,
            values.join(", ")
        )),
        ImportEvent::ConflictRaised { message, .. } => Some(format!("Conflict: {}", message)),
        ImportEvent::StageFailed {
            stage,
            message,
            error_file_url,
            ..
        } => Some(match error_file_url {
            Some(url) => format!("{} failed: {}\n  errors: {}", stage, message, url),
            None => format!("{} failed: {}", stage, message),
        }),
        ImportEvent::LookupMatchesSaved { .. }
        | ImportEvent::NextStepEnabled { .. }
        | ImportEvent::ImportCompleted { .. } => None,
    }
}

/// Drives one import from the console
pub struct ConsoleHost<R> {
    lines: Lines<BufReader<R>>,
    presets: Presets,
    interactive: bool,
}

impl<R: AsyncRead + Unpin> ConsoleHost<R> {
    pub fn new(input: R, presets: Presets, interactive: bool) -> Self {
        Self {
            lines: BufReader::new(input).lines(),
            presets,
            interactive,
        }
    }

    async fn prompt(&mut self, question: &str) -> ImportResult<Option<String>> {
        if !self.interactive {
            return Ok(None);
        }
        eprint!("{} ", question);
        Ok(self.lines.next_line().await?.map(|l| l.trim().to_string()))
    }

    /// Run the import of `path` until it completes, halts or stalls
    pub async fn run<W: WarehouseApi>(
        &mut self,
        orchestrator: &mut ImportOrchestrator<W>,
        path: &Path,
    ) -> ImportResult<Outcome> {
        let mut outcome = orchestrator.start(path).await?;
        let mut presets_mapped = false;

        loop {
            let pause = match &outcome {
                Outcome::AwaitingInput(pause) => pause.clone(),
                _ => match self.follow_up(orchestrator, &outcome).await? {
                    Some(next) => {
                        if matches!(outcome, Outcome::Completed(_)) {
                            presets_mapped = false;
                        }
                        outcome = next;
                        continue;
                    }
                    None => return Ok(outcome),
                },
            };

            outcome = match pause {
                Pause::GlobalValues { fields } => {
                    let mut values: BTreeMap<String, String> = self
                        .presets
                        .global_values
                        .iter()
                        .filter(|(field, _)| fields.contains(field))
                        .map(|(field, value)| (field.clone(), value.clone()))
                        .collect();
                    for field in &fields {
                        if values.contains_key(field) {
                            continue;
                        }
                        match self.prompt(&format!("Value for {} (blank to skip):", field)).await? {
                            Some(value) if !value.is_empty() => {
                                values.insert(field.clone(), value);
                            }
                            _ => {}
                        }
                    }
                    orchestrator.submit_global_values(values).await?
                }

                Pause::Mappings { outstanding, duplicates } => {
                    if !presets_mapped {
                        presets_mapped = true;
                        for (column, field) in self.presets.mappings.clone() {
                            orchestrator.update_mapping(&column, Some(&field))?;
                        }
                        orchestrator.submit_mappings().await?
                    } else if outstanding.is_empty() && duplicates.is_empty() {
                        orchestrator.submit_mappings().await?
                    } else {
                        eprintln!("Outstanding required fields: {}", outstanding.join(", "));
                        if !duplicates.is_empty() {
                            eprintln!("Mapped more than once: {}", duplicates.join(", "));
                        }
                        let Some(answer) = self.prompt("Mapping (COLUMN=FIELD or COLUMN=):").await? else {
                            return Ok(outcome);
                        };
                        let (column, field) = match parse_key_value(&answer) {
                            Ok(pair) => pair,
                            Err(e) => {
                                eprintln!("{}", e);
                                continue;
                            }
                        };
                        let field = Some(field.as_str()).filter(|f| !f.is_empty());
                        let report = match orchestrator.update_mapping(&column, field) {
                            Ok(report) => report,
                            Err(e) => {
                                eprintln!("{}", e);
                                continue;
                            }
                        };
                        if report.is_complete() {
                            orchestrator.submit_mappings().await?
                        } else {
                            Outcome::AwaitingInput(Pause::Mappings {
                                outstanding: report.outstanding,
                                duplicates: orchestrator.session().mapping.duplicate_targets(),
                            })
                        }
                    }
                }

                Pause::LookupMatches {
                    source_field,
                    column_label,
                    values,
                    ..
                } => {
                    let unresolved = orchestrator
                        .session()
                        .match_sets
                        .iter()
                        .find(|s| s.source_field == source_field)
                        .map(|s| s.unresolved())
                        .unwrap_or(values);
                    for value in unresolved {
                        let question = format!("{}: id for '{}':", column_label, value);
                        let Some(id) = self.prompt(&question).await? else {
                            return Ok(outcome);
                        };
                        if let Err(e) = orchestrator.choose_match(&source_field, &value, &id) {
                            eprintln!("{}", e);
                        }
                    }
                    orchestrator.save_lookup_matches(&source_field).await?
                }

                Pause::ReadyForNextStep { .. } => orchestrator.proceed().await?,

                Pause::TemplateConflict { message } => {
                    eprintln!("{}", message);
                    let question = "[o]verwrite, [r]ename, [s]kip saving the template, [c]ancel:";
                    let Some(answer) = self.prompt(question).await? else {
                        return Ok(outcome);
                    };
                    let resolution = match answer.to_ascii_lowercase().as_str() {
                        "o" | "overwrite" => ConflictResolution::Overwrite,
                        "s" | "skip" => ConflictResolution::SkipTemplate,
                        "r" | "rename" => match self.prompt("New template title:").await? {
                            Some(title) => ConflictResolution::Rename(title),
                            None => return Ok(outcome),
                        },
                        _ => ConflictResolution::Cancel,
                    };
                    orchestrator.resolve_conflict(resolution).await?
                }
            };
        }
    }

    /// Offer a restart after a halt, or another file after completion
    ///
    /// `None` ends the run with the current outcome.
    async fn follow_up<W: WarehouseApi>(
        &mut self,
        orchestrator: &mut ImportOrchestrator<W>,
        outcome: &Outcome,
    ) -> ImportResult<Option<Outcome>> {
        match outcome {
            Outcome::Halted(failure) if failure.kind != FailureKind::Cancelled => {
                let Some(answer) = self.prompt("[r]estart the stage or [q]uit:").await? else {
                    return Ok(None);
                };
                match answer.to_ascii_lowercase().as_str() {
                    "r" | "restart" => Ok(Some(orchestrator.restart().await?)),
                    _ => Ok(None),
                }
            }
            Outcome::Completed(_) => {
                let question = "Import another file (path, blank to finish):";
                let mut answer = self.prompt(question).await?;
                if answer.as_deref().map_or(true, str::is_empty) {
                    return Ok(None);
                }
                orchestrator.import_another()?;
                while let Some(path) = answer.filter(|p| !p.is_empty()) {
                    match orchestrator.start(Path::new(&path)).await {
                        Ok(next) => return Ok(Some(next)),
                        Err(e @ (ImportError::InvalidInput(_) | ImportError::Io(_))) => {
                            eprintln!("{}", e)
                        }
                        Err(e) => return Err(e),
                    }
                    answer = self.prompt(question).await?;
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_progress_and_failure() {
        let progress = ImportEvent::Progress {
            stage: "IMPORT".to_string(),
            progress: 50.0,
            rows_processed: 10,
            total_rows: 20,
            errors_count: 0,
            timestamp: chrono::Utc::now(),
        };
        assert_eq!(
            render_event(&progress).unwrap(),
            "[IMPORT]  50.0% (10/20 rows)"
        );

        let failed = ImportEvent::StageFailed {
            stage: "PREPROCESS".to_string(),
            message: "Unknown grid ref".to_string(),
            error_file_url: Some("http://w/errors".to_string()),
            timestamp: chrono::Utc::now(),
        };
        let text = render_event(&failed).unwrap();
        assert!(text.starts_with("PREPROCESS failed: Unknown grid ref"));
        assert!(text.contains("http://w/errors"));

        let enabled = ImportEvent::NextStepEnabled {
            stage: "MAPPINGS".to_string(),
            enabled: true,
            timestamp: chrono::Utc::now(),
        };
        assert!(render_event(&enabled).is_none());
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value(" Grid ref = sample:entered_sref ").unwrap(),
            ("Grid ref".to_string(), "sample:entered_sref".to_string())
        );
        assert_eq!(
            parse_key_value("Notes=").unwrap(),
            ("Notes".to_string(), String::new())
        );
        assert!(parse_key_value("no separator").is_err());
        assert!(parse_key_value("=value").is_err());
    }
}
