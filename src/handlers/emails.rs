//! Collector email list extracted from staged occurrences.

use super::{SubtaskContext, SubtaskHandler};
use crate::error::PipelineResult;
use crate::models::output::OutputType;
use crate::models::record::{fields, Collection, DatasetRecord};
use crate::models::subtask::SubtaskKind;
use crate::query_builder::RecordFilter;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tracing::info;

pub const EMAIL_COLUMNS: [&str; 2] = ["name", "email"];

#[derive(Debug, Default, Clone, Copy)]
pub struct EmailsHandler;

/// `name,email` rows, one per address compared case-insensitively, sorted
/// by address
pub fn email_rows(records: &[DatasetRecord]) -> Vec<Vec<String>> {
    let mut by_email: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for record in records {
        let email = record.get(fields::COLLECTOR_EMAIL).trim();
        if email.is_empty() {
            continue;
        }
        by_email.entry(email.to_lowercase()).or_insert_with(|| {
            vec![
                record.get(fields::RECORDED_BY).trim().to_string(),
                email.to_string(),
            ]
        });
    }
    by_email.into_values().collect()
}

#[async_trait]
impl SubtaskHandler for EmailsHandler {
    fn kind(&self) -> SubtaskKind {
        SubtaskKind::Emails
    }

    async fn handle(&self, ctx: &SubtaskContext) -> PipelineResult<()> {
        let (task, subtask) = ctx.load().await?;
        let input = ctx.resolve(&task, &subtask)?;
        let scratch = ctx.scratch();

        scratch.discard_abandoned(Collection::Occurrences).await?;
        ctx.progress.step("Collecting collector emails").await?;
        let ws = scratch.stage_input(Collection::Occurrences, &input).await?;
        let records = scratch
            .records(&ws, RecordFilter::not_empty(fields::COLLECTOR_EMAIL))
            .await?;
        scratch.discard(ws).await?;

        let rows = email_rows(&records);
        let addresses = rows.len();
        let reference = ctx.reference(&task, OutputType::Emails, None);
        ctx.artifacts()
            .write_table(&reference, &EMAIL_COLUMNS, rows)
            .await?;
        info!(task_id = %task.id, addresses = addresses, "Wrote email list");

        ctx.progress.register_outputs(vec![reference]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emails_deduped_case_insensitively() {
        let records = vec![
            DatasetRecord::from_pairs([("recordedBy", "Zed"), ("collectorEmail", "zed@example.org")]),
            DatasetRecord::from_pairs([("recordedBy", "Amy"), ("collectorEmail", "Amy@Example.org")]),
            DatasetRecord::from_pairs([("recordedBy", "Amy B"), ("collectorEmail", "amy@example.org")]),
            DatasetRecord::from_pairs([("recordedBy", "No Email")]),
        ];
        assert_eq!(
            email_rows(&records),
            vec![
                vec!["Amy".to_string(), "Amy@Example.org".to_string()],
                vec!["Zed".to_string(), "zed@example.org".to_string()],
            ]
        );
    }
}
