use std::path::Path;

use tempfile::tempdir;

use stockfeat::config::EtlStep;
use stockfeat::io::sink::PART_FILE;
use stockfeat::io::{read_parquet_bars, Manifest};
use stockfeat::job::run_job;
use stockfeat::{Error, JobConfig};

const HEADER: &str = "Date,Open,High,Low,Close,Adj Close,Volume\n";

fn write_symbol(dir: &Path, symbol: &str, rows: &[(&str, f64, i64)]) {
    let mut text = String::from(HEADER);
    for (date, price, volume) in rows {
        text.push_str(&format!("{date},{price},{price},{price},{price},{price},{volume}\n"));
    }
    std::fs::write(dir.join(format!("{symbol}.csv")), text).expect("write csv");
}

fn job_json(stocks: &Path, etfs: &Path, extra: &str) -> String {
    format!(
        r#"{{
            "Model_Name": "StockPredict_test",
            "Stock_Desc": "unused.csv",
            "Stock_Data": {{"Stock": {stocks:?}, "ETF": {etfs:?}}},
            "Start_Date": "2019-06-01"{extra}
        }}"#
    )
}

#[test]
fn runs_feature_step_for_every_asset_type() {
    let dir = tempdir().expect("tempdir");
    let stocks = dir.path().join("stocks");
    let etfs = dir.path().join("etfs");
    let data = dir.path().join("output_data");
    for path in [&stocks, &etfs, &data] {
        std::fs::create_dir_all(path).expect("mkdir");
    }
    write_symbol(
        &stocks,
        "AAPL",
        &[("2019-05-31", 10.0, 100), ("2019-06-03", 11.0, 300), ("2019-06-04", 12.0, 200)],
    );
    write_symbol(&stocks, "MSFT", &[("2019-06-03", 50.0, 10)]);
    write_symbol(&etfs, "SPY", &[("2019-06-03", 280.0, 1000), ("2019-06-04", 281.0, 900)]);

    let job_path = dir.path().join("stock-config.json");
    std::fs::write(&job_path, job_json(&stocks, &etfs, r#", "Export_Csv": true"#))
        .expect("write job");
    let job = JobConfig::load(&job_path).expect("load job");

    let reports = run_job(&job, &data).expect("run job");
    assert_eq!(reports.len(), 2);
    let etf = &reports[0];
    let stock = &reports[1];
    assert_eq!(etf.stock_type, "ETF");
    assert_eq!(stock.output, data.join("StockPredict_test-Stock_StageData"));
    assert_eq!(stock.input, stocks);

    // The May row feeds the first June features but is filtered out.
    assert_eq!(stock.manifest.total_rows, 3);
    assert_eq!(etf.manifest.total_rows, 2);
    assert_eq!(Manifest::load(&stock.output).expect("manifest"), stock.manifest);
    assert!(stock.output.join("Symbol=AAPL").join(PART_FILE).is_file());

    let bars = read_parquet_bars(&stock.output).expect("read back");
    assert!(bars.iter().all(|b| b.date >= stockfeat::bar::parse_date("2019-06-01").expect("date")));

    let csv = stock.csv_export.as_ref().expect("csv export");
    let text = std::fs::read_to_string(csv).expect("read csv");
    assert!(text.starts_with("Symbol,Date,Open"));
    // AAPL 2019-06-03 averages both trailing rows.
    assert!(text.contains("AAPL,2019-06-03,11,11,11,11,11,300,200,"));
}

#[test]
fn prefers_ingested_dataset_when_present() {
    let dir = tempdir().expect("tempdir");
    let raw = dir.path().join("raw");
    let data = dir.path().join("output_data");
    std::fs::create_dir_all(&raw).expect("mkdir raw");
    let ingested = data.join("StockPredict_test-Stock_IngestData");
    std::fs::create_dir_all(&ingested).expect("mkdir ingested");
    write_symbol(&ingested, "IBM", &[("2019-06-03", 130.0, 50)]);

    let json = format!(
        r#"{{"Model_Name": "StockPredict_test", "Stock_Data": {{"Stock": {raw:?}}}}}"#
    );
    let job: JobConfig = serde_json::from_str(&json).expect("parse job");
    let reports = run_job(&job, &data).expect("run job");
    assert_eq!(reports[0].input, ingested);
    assert_eq!(reports[0].manifest.symbols.keys().collect::<Vec<_>>(), vec!["IBM"]);
}

#[test]
fn missing_output_root_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let job: JobConfig =
        serde_json::from_str(r#"{"Model_Name": "m", "Stock_Data": {}}"#).expect("parse job");
    let err = run_job(&job, &dir.path().join("absent")).expect_err("missing data dir");
    assert!(matches!(err, Error::Config(_)));
}

#[test]
fn jobs_without_feature_step_do_nothing() {
    let dir = tempdir().expect("tempdir");
    let json = r#"{"Model_Name": "m", "Stock_Data": {"Stock": "nowhere"}, "ETL_Steps": ["Step1", "Step3"]}"#;
    let job: JobConfig = serde_json::from_str(json).expect("parse job");
    assert!(!job.runs_step(EtlStep::Step2));
    let reports = run_job(&job, dir.path()).expect("run job");
    assert!(reports.is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).expect("read dir").count(), 0);
}
