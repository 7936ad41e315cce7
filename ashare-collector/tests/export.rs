//! Workbook export and flat-file backups of stored data.

mod common;

use std::sync::Arc;

use calamine::{open_workbook_auto, Data, Reader};
use tokio_util::sync::CancellationToken;

use ashare_collector::export::excel::{
    SHEET_COMPANIES, SHEET_FINANCIALS, SHEET_INDUSTRIES, SHEET_METADATA, SHEET_SUMMARY,
};
use ashare_collector::pipeline::RunOptions;
use common::{date, pipeline_with, test_config, MockSource, STOCKS};

fn source() -> MockSource {
    let codes: Vec<&str> = STOCKS.iter().map(|(code, _)| *code).collect();
    MockSource::new("mock", 1)
        .companies(STOCKS)
        .industries(&codes, "房地产开发")
        .metric("000002", date(2024, 12, 31), "INVEST_REALESTATE", 8.0e10)
}

fn text(cell: Option<&Data>) -> String {
    match cell {
        Some(Data::String(s)) => s.clone(),
        _ => String::new(),
    }
}

#[tokio::test]
async fn test_export_stored_writes_all_sheets() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let pipeline = pipeline_with(&config, vec![Arc::new(source())], CancellationToken::new()).await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    let out = dir.path().join("exports");
    let path = pipeline.export_stored(Some(out.clone())).await.unwrap();

    assert!(path.starts_with(&out));
    let file_name = path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.starts_with("test_"));
    assert!(file_name.ends_with(".xlsx"));

    let mut workbook = open_workbook_auto(&path).unwrap();
    assert_eq!(
        workbook.sheet_names(),
        vec![SHEET_COMPANIES, SHEET_INDUSTRIES, SHEET_FINANCIALS, SHEET_SUMMARY, SHEET_METADATA]
    );

    let companies = workbook.worksheet_range(SHEET_COMPANIES).unwrap();
    assert_eq!(companies.height(), STOCKS.len() + 1);
    assert_eq!(text(companies.get((0, 0))), "代码");
    assert_eq!(text(companies.get((1, 0))), "000001");
    assert_eq!(text(companies.get((2, 1))), "万科A");

    let industries = workbook.worksheet_range(SHEET_INDUSTRIES).unwrap();
    assert_eq!(text(industries.get((2, 3))), "房地产开发");
    assert_eq!(text(industries.get((2, 5))), "mock");

    let financials = workbook.worksheet_range(SHEET_FINANCIALS).unwrap();
    assert_eq!(text(financials.get((0, 3))), "2024-12-31 投资性房地产(万元)");
    assert_eq!(text(financials.get((0, 4))), "2024-12-31 在建工程(万元)");
    match financials.get((2, 3)) {
        Some(Data::Float(v)) => assert!((v - 8.0e6).abs() < 1e-6),
        other => panic!("expected a number, got {:?}", other),
    }
    assert!(!matches!(financials.get((1, 3)), Some(Data::Float(_))));
}

#[tokio::test]
async fn test_export_without_stored_data_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let pipeline = pipeline_with(&config, vec![], CancellationToken::new()).await;

    assert!(pipeline.export_stored(None).await.is_err());
}

#[tokio::test]
async fn test_backup_writes_flat_files() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let pipeline = pipeline_with(&config, vec![Arc::new(source())], CancellationToken::new()).await;
    pipeline.run(&RunOptions::default()).await.unwrap();

    let report = pipeline.backups().backup_storage(pipeline.storage()).await.unwrap();

    assert_eq!(report.companies, STOCKS.len());
    assert_eq!(report.industries, STOCKS.len());
    assert_eq!(report.metrics, STOCKS.len() * 2);
    assert!(report.dir.starts_with(config.storage.backup_dir()));
    assert_eq!(pipeline.backups().cleanup().unwrap(), 0);
}
