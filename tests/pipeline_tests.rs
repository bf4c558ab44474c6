//! End-to-end runs of multi-stage tasks against the in-memory doubles.

mod common;

use chrono::{Datelike, NaiveDate, Utc};
use common::{csv_of, output_dir, read_csv, record, subtask, ten_occurrences_csv, OCCURRENCE_HEADER};
use pipeline_core::handlers::field_number::year_prefix;
use pipeline_core::models::{Collection, OutputType, SubtaskKind, Task};
use pipeline_core::orchestration::TaskOutcome;
use pipeline_core::providers::{Observation, Place, Taxon};
use pipeline_core::testing::{StaticElevationService, StaticObservationSource, TestPipeline};
use pipeline_core::TaskState;
use serde_json::json;
use std::sync::Arc;

#[tokio::test]
async fn test_occurrences_then_labels() {
    let dir = output_dir();
    let pipeline = TestPipeline::new(dir.path());
    let task = Task::new(
        "labels for june",
        vec![
            subtask(SubtaskKind::Occurrences, "upload"),
            subtask(SubtaskKind::Labels, "0_occurrences"),
        ],
    )
    .with_tag("june");
    let task = pipeline
        .attach_upload(task, "june.csv", &ten_occurrences_csv())
        .await
        .unwrap();

    let outcome = pipeline.run(&task).await.unwrap();
    assert_eq!(outcome, TaskOutcome::Completed { subtasks: 2 });

    let stored = pipeline.task(task.id).unwrap();
    assert_eq!(stored.status, TaskState::Completed);
    assert_eq!(stored.result.subtask_outputs.len(), 2);

    let labels = &stored.result.subtask_outputs[1];
    assert_eq!(labels.kind, SubtaskKind::Labels);
    let sheet = labels
        .outputs
        .iter()
        .find(|o| o.output_type == OutputType::Labels && o.subtype.is_none())
        .expect("labels pdf registered");
    assert!(sheet.file_name.ends_with(".pdf"));
    let bytes = std::fs::read(pipeline.artifact_path(sheet)).unwrap();
    assert!(bytes.starts_with(b"%PDF"));
    assert!(labels
        .outputs
        .iter()
        .any(|o| o.subtype.as_deref() == Some("warnings")));

    assert!(
        stored
            .warnings
            .iter()
            .any(|w| w.contains("24000004") && w.contains("missing county")),
        "warnings: {:?}",
        stored.warnings
    );

    // labels leave the dataset as the occurrences stage left it
    let pool = pipeline.store.stable(Collection::Occurrences);
    assert_eq!(pool.len(), 10);
    assert_eq!(pipeline.store.all(Collection::Occurrences).len(), 10);
    let finley = pool
        .iter()
        .find(|r| r.get("fieldNumber") == "24000003")
        .unwrap();
    assert_eq!(finley.get("county"), "Benton");
    assert_eq!(finley.get("month"), "6");
    assert_eq!(finley.get("recordedBy"), "Jane Doe");
}

#[tokio::test]
async fn test_occurrences_reports_duplicates_and_flags() {
    let dir = output_dir();
    let pipeline = TestPipeline::new(dir.path());
    pipeline
        .seed(
            Collection::Occurrences,
            vec![record(&[("fieldNumber", "24000001"), ("county", "Polk")])],
        )
        .await
        .unwrap();

    let csv = csv_of(
        OCCURRENCE_HEADER,
        &[
            "24000001,jane doe,1,12,6,2024,net,USA,OR,Benton,Peak,44.5,-123.5,,,,,,,,,,",
            "24000002,jane doe,1,31,2,2024,net,USA,OR,Benton,Peak,44.5,-123.5,,,,,,,,,,",
            "24000002,jane doe,1,12,6,2024,net,USA,OR,Benton,Peak,44.5,-123.5,,,,,,,,,,",
            ",jane doe,1,12,6,2024,net,USA,OR,Benton,Peak,95.0,-123.5,,,,,,,,,,",
        ],
    );
    let task = Task::new("dupes", vec![subtask(SubtaskKind::Occurrences, "upload")]);
    let task = pipeline.attach_upload(task, "dupes.csv", &csv).await.unwrap();
    pipeline.run(&task).await.unwrap();

    let stored = pipeline.task(task.id).unwrap();
    let outputs = &stored.result.subtask_outputs[0].outputs;
    let duplicates = outputs
        .iter()
        .find(|o| o.output_type == OutputType::Duplicates)
        .expect("duplicates written");
    let (header, rows) = read_csv(&pipeline.artifact_path(duplicates));
    let key = header.iter().position(|c| c == "fieldNumber").unwrap();
    let keys: Vec<&str> = rows.iter().map(|r| r[key].as_str()).collect();
    assert_eq!(keys, vec!["24000001", "24000002", "24000002"]);

    assert!(stored
        .warnings
        .iter()
        .any(|w| w == "2 occurrence records have error flags"));

    // keyed records replace the pool by field number; the unkeyed flagged row is dropped
    let pool = pipeline.store.stable(Collection::Occurrences);
    assert_eq!(pool.len(), 2);
    let replaced = pool
        .iter()
        .find(|r| r.get("fieldNumber") == "24000001")
        .unwrap();
    assert_eq!(replaced.get("county"), "Benton");
}

#[tokio::test]
async fn test_collector_lists() {
    let dir = output_dir();
    let pipeline = TestPipeline::new(dir.path());
    let task = Task::new(
        "mailing",
        vec![
            subtask(SubtaskKind::Addresses, "upload"),
            subtask(SubtaskKind::Emails, "upload"),
        ],
    );
    let task = pipeline
        .attach_upload(task, "mailing.csv", &ten_occurrences_csv())
        .await
        .unwrap();
    pipeline.run(&task).await.unwrap();

    let stored = pipeline.task(task.id).unwrap();
    let addresses = &stored.result.subtask_outputs[0].outputs[0];
    let (header, rows) = read_csv(&pipeline.artifact_path(addresses));
    assert_eq!(header, vec!["name", "address", "city", "state", "postalCode"]);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][1], "1 Oak St");
    assert_eq!(rows[1][2], "Eugene");

    let emails = &stored.result.subtask_outputs[1].outputs[0];
    let (header, rows) = read_csv(&pipeline.artifact_path(emails));
    assert_eq!(header, vec!["name", "email"]);
    let addresses: Vec<String> = rows.iter().map(|r| r[1].to_lowercase()).collect();
    assert_eq!(addresses, vec!["jane@example.org", "john@example.org"]);

    // neither stage touches the dataset
    assert!(pipeline.store.all(Collection::Occurrences).is_empty());
}

#[tokio::test]
async fn test_summaries_over_the_dataset() {
    let dir = output_dir();
    let pipeline = TestPipeline::new(dir.path());
    let task = Task::new(
        "summaries",
        vec![
            subtask(SubtaskKind::Occurrences, "upload"),
            subtask(SubtaskKind::PivotTables, "0_occurrences"),
            subtask(SubtaskKind::PlantList, "selection"),
            subtask(SubtaskKind::StewardshipReport, "selection")
                .with_param("minDate", json!("2024-07-01")),
        ],
    );
    let task = pipeline
        .attach_upload(task, "summer.csv", &ten_occurrences_csv())
        .await
        .unwrap();
    let outcome = pipeline.run(&task).await.unwrap();
    assert!(outcome.is_completed(), "{outcome:?}");

    let stored = pipeline.task(task.id).unwrap();
    let pivots = &stored.result.subtask_outputs[1].outputs;
    assert_eq!(pivots.len(), 3);
    let by_collector = pivots
        .iter()
        .find(|o| o.subtype.as_deref() == Some("recordedBy-by-year"))
        .unwrap();
    let (header, rows) = read_csv(&pipeline.artifact_path(by_collector));
    assert_eq!(header, vec!["recordedBy", "2024", "Total"]);
    assert_eq!(rows.last().unwrap(), &vec!["Total", "10", "10"]);

    let plants = &stored.result.subtask_outputs[2].outputs[0];
    let (header, rows) = read_csv(&pipeline.artifact_path(plants));
    assert_eq!(header, vec!["family", "genus", "name", "specimens"]);
    let rubus = rows.iter().find(|r| r[2] == "Rubus armeniacus").unwrap();
    assert_eq!(rubus[0], "Rosaceae");
    assert_eq!(rubus[3], "3");
    assert_eq!(
        pipeline.store.stable(Collection::Plants).len(),
        rows.len()
    );

    // only the July records of Lane county pass the date bound
    let report = &stored.result.subtask_outputs[3].outputs[0];
    let (_, rows) = read_csv(&pipeline.artifact_path(report));
    assert!(rows.iter().all(|r| r[0] == "Lane"));
    let specimens: u32 = rows.iter().map(|r| r[2].parse::<u32>().unwrap()).sum();
    assert_eq!(specimens, 6);
}

#[tokio::test]
async fn test_repeated_stage_kinds_keep_separate_artifacts() {
    let dir = output_dir();
    let pipeline = TestPipeline::new(dir.path());
    pipeline
        .seed(
            Collection::Occurrences,
            vec![
                record(&[("fieldNumber", "24000001"), ("county", "Lane")]),
                record(&[("fieldNumber", "24000002"), ("county", "Benton")]),
            ],
        )
        .await
        .unwrap();

    let task = Task::new(
        "two downloads",
        vec![
            subtask(SubtaskKind::Download, "selection")
                .with_param("filter", json!({"county": "Lane"})),
            subtask(SubtaskKind::Download, "selection")
                .with_param("filter", json!({"county": "Benton"})),
        ],
    )
    .with_tag("dl");
    let outcome = pipeline.run(&task).await.unwrap();
    assert!(outcome.is_completed(), "{outcome:?}");

    let stored = pipeline.task(task.id).unwrap();
    let first = &stored.result.subtask_outputs[0].outputs[0];
    let second = &stored.result.subtask_outputs[1].outputs[0];
    assert_ne!(first.file_name, second.file_name);

    let (_, first_rows) = read_csv(&pipeline.artifact_path(first));
    let (_, second_rows) = read_csv(&pipeline.artifact_path(second));
    assert_eq!(first_rows.len(), 1);
    assert!(first_rows[0].contains(&"Lane".to_string()));
    assert_eq!(second_rows.len(), 1);
    assert!(second_rows[0].contains(&"Benton".to_string()));
}

#[tokio::test]
async fn test_upload_then_download() {
    let dir = output_dir();
    let pipeline = TestPipeline::new(dir.path());
    pipeline
        .seed(
            Collection::Occurrences,
            vec![
                record(&[("fieldNumber", "24000001"), ("county", "Lane"), ("sex", "f")]),
                record(&[("fieldNumber", "24000002"), ("county", "Benton"), ("sex", "m")]),
            ],
        )
        .await
        .unwrap();

    let csv = csv_of(
        "fieldNumber,county,sex",
        &["24000001,,m", "24000003,Lane,f", ",Lane,f", "24000003,Polk,m"],
    );
    let task = Task::new(
        "sync",
        vec![
            subtask(SubtaskKind::Upload, "upload").with_param("insert", json!(true)),
            subtask(SubtaskKind::Download, "selection")
                .with_param("filter", json!({"county": "Lane"}))
                .with_param("projection", json!(["fieldNumber", "sex"])),
        ],
    );
    let task = pipeline.attach_upload(task, "fixes.csv", &csv).await.unwrap();
    let outcome = pipeline.run(&task).await.unwrap();
    assert!(outcome.is_completed(), "{outcome:?}");

    let stored = pipeline.task(task.id).unwrap();
    assert!(stored.result.subtask_outputs[0].outputs.is_empty());
    assert!(stored
        .warnings
        .iter()
        .any(|w| w.starts_with("1 uploaded rows without a field number")));

    let pool = pipeline.store.stable(Collection::Occurrences);
    assert_eq!(pool.len(), 3);
    let merged = pool
        .iter()
        .find(|r| r.get("fieldNumber") == "24000001")
        .unwrap();
    assert_eq!(merged.get("county"), "Lane");
    assert_eq!(merged.get("sex"), "m");

    let download = &stored.result.subtask_outputs[1].outputs[0];
    let (header, mut rows) = read_csv(&pipeline.artifact_path(download));
    assert_eq!(header, vec!["fieldNumber", "sex"]);
    rows.sort();
    assert_eq!(
        rows,
        vec![
            vec!["24000001".to_string(), "m".to_string()],
            vec!["24000003".to_string(), "f".to_string()],
        ]
    );
}

#[tokio::test]
async fn test_file_sync_fills_rows_from_dataset() {
    let dir = output_dir();
    let pipeline = TestPipeline::new(dir.path());
    pipeline
        .seed(
            Collection::Occurrences,
            vec![
                record(&[("fieldNumber", "24000001"), ("scientificName", "Bombus mixtus")]),
                record(&[("fieldNumber", "24000002"), ("scientificName", "Osmia lignaria")]),
            ],
        )
        .await
        .unwrap();

    let csv = csv_of("fieldNumber,scientificName,note", &["24000001,,keep me"]);
    let task = Task::new("sync file", vec![subtask(SubtaskKind::FileSync, "upload")]);
    let task = pipeline.attach_upload(task, "sheet.csv", &csv).await.unwrap();
    pipeline.run(&task).await.unwrap();

    let stored = pipeline.task(task.id).unwrap();
    let sync = &stored.result.subtask_outputs[0].outputs[0];
    assert_eq!(sync.output_type, OutputType::Sync);
    let (header, rows) = read_csv(&pipeline.artifact_path(sync));
    assert_eq!(rows.len(), 1);
    let name = header.iter().position(|c| c == "scientificName").unwrap();
    let note = header.iter().position(|c| c == "note").unwrap();
    assert_eq!(rows[0][name], "Bombus mixtus");
    assert_eq!(rows[0][note], "keep me");
}

#[tokio::test]
async fn test_determinations_update_only_matching_occurrences() {
    let dir = output_dir();
    let pipeline = TestPipeline::new(dir.path());
    let occurrences = (1..=5)
        .map(|n| {
            let field_number = format!("2400000{n}");
            record(&[
                ("fieldNumber", field_number.as_str()),
                ("scientificName", "Bombus sp."),
                ("sex", "f"),
            ])
        })
        .collect();
    pipeline
        .seed(Collection::Occurrences, occurrences)
        .await
        .unwrap();

    let csv = csv_of(
        "fieldNumber,scientificName,sex,identifiedBy",
        &[
            "24000002,Bombus mixtus,f,A. Expert",
            "24000005,Bombus sp.,f,",
            "24000099,Osmia lignaria,m,A. Expert",
        ],
    );
    let task = Task::new(
        "determinations",
        vec![subtask(SubtaskKind::Determinations, "upload")],
    );
    let task = pipeline.attach_upload(task, "dets.csv", &csv).await.unwrap();
    pipeline.run(&task).await.unwrap();

    let pool = pipeline.store.stable(Collection::Occurrences);
    let updated = pool
        .iter()
        .find(|r| r.get("fieldNumber") == "24000002")
        .unwrap();
    assert_eq!(updated.get("scientificName"), "Bombus mixtus");
    assert_eq!(updated.get("identifiedBy"), "A. Expert");
    let untouched = pool
        .iter()
        .find(|r| r.get("fieldNumber") == "24000005")
        .unwrap();
    assert_eq!(untouched.get("scientificName"), "Bombus sp.");
    assert!(!untouched.has("identifiedBy"));

    let remaining = pipeline.store.all(Collection::Determinations);
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].get("fieldNumber"), "24000099");
    assert!(remaining[0].is_stable());

    let stored = pipeline.task(task.id).unwrap();
    assert!(stored.warnings.contains(&"2 determinations matched an occurrence".to_string()));
    assert!(stored.warnings.contains(&"1 occurrences updated".to_string()));
    let unmatched = &stored.result.subtask_outputs[0].outputs[0];
    let (_, rows) = read_csv(&pipeline.artifact_path(unmatched));
    assert_eq!(rows.len(), 1);
}

fn observation(id: u64, specimens: &str) -> Observation {
    Observation {
        id,
        url: format!("https://www.inaturalist.org/observations/{id}"),
        observed_on: NaiveDate::from_ymd_opt(2024, 6, 12),
        observer: "jane doe".to_string(),
        latitude: Some(44.50412),
        longitude: Some(-123.55271),
        place_guess: "Mary's Peak".to_string(),
        place_ids: vec![1, 10, 20],
        taxon_id: Some(55),
        taxon_name: "Rubus armeniacus".to_string(),
        field_values: [("Number of bees collected".to_string(), specimens.to_string())]
            .into_iter()
            .collect(),
    }
}

#[tokio::test]
async fn test_observations_pull_is_incremental() {
    let dir = output_dir();
    let source = Arc::new(
        StaticObservationSource::new(vec![observation(7, "2"), observation(8, "1")])
            .with_places(vec![
                Place {
                    id: 1,
                    name: "United States".to_string(),
                    admin_level: Some(0),
                },
                Place {
                    id: 10,
                    name: "Oregon".to_string(),
                    admin_level: Some(10),
                },
                Place {
                    id: 20,
                    name: "Benton".to_string(),
                    admin_level: Some(20),
                },
            ])
            .with_taxa(vec![Taxon {
                id: 55,
                name: "Rubus armeniacus".to_string(),
                rank: "species".to_string(),
                family: Some("Rosaceae".to_string()),
                genus: Some("Rubus".to_string()),
            }]),
    );
    let elevation = Arc::new(StaticElevationService::new().with_elevation(44.50412, -123.55271, 1203.0));
    let pipeline = TestPipeline::with_providers(
        dir.path(),
        Arc::clone(&source) as _,
        Arc::clone(&elevation) as _,
    );

    let pull = || {
        Task::new(
            "pull",
            vec![subtask(SubtaskKind::Observations, "upload").with_param("projectId", json!("166376"))],
        )
    };
    let first = pull();
    assert!(pipeline.run(&first).await.unwrap().is_completed());

    let prefix = year_prefix(Utc::now().year());
    let mut pool = pipeline.store.stable(Collection::Occurrences);
    pool.sort_by(|a, b| a.get("fieldNumber").cmp(b.get("fieldNumber")));
    let numbers: Vec<&str> = pool.iter().map(|r| r.get("fieldNumber")).collect();
    assert_eq!(
        numbers,
        vec![
            format!("{prefix}000001"),
            format!("{prefix}000002"),
            format!("{prefix}000003"),
        ]
    );
    assert_eq!(pool[0].get("county"), "Benton");
    assert_eq!(pool[0].get("familyPlant"), "Rosaceae");
    assert_eq!(pool[0].get("minimumElevationInMeters"), "1203");
    assert_eq!(elevation.lookups(), 1);

    let second = pull();
    assert!(pipeline.run(&second).await.unwrap().is_completed());
    assert_eq!(pipeline.store.stable(Collection::Occurrences).len(), 3);
    // places and taxa come from the cache on the second pull
    assert_eq!(source.place_requests().len(), 1);
    assert_eq!(source.taxon_requests().len(), 1);
}

#[tokio::test]
async fn test_provider_failure_fails_the_task() {
    let dir = output_dir();
    let pipeline = TestPipeline::with_providers(
        dir.path(),
        Arc::new(StaticObservationSource::failing()),
        Arc::new(StaticElevationService::new()),
    );
    let task = Task::new(
        "pull",
        vec![
            subtask(SubtaskKind::Observations, "upload").with_param("projectId", json!("1")),
            subtask(SubtaskKind::Labels, "0_observations"),
        ],
    );
    let outcome = pipeline.run(&task).await.unwrap();
    assert!(matches!(
        outcome,
        TaskOutcome::Failed {
            index: 0,
            kind: SubtaskKind::Observations,
            ..
        }
    ));
    let stored = pipeline.task(task.id).unwrap();
    assert_eq!(stored.status, TaskState::Failed);
    assert!(stored.result.subtask_outputs.is_empty());
}
