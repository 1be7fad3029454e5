use std::fs::File;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::tempdir;

use stockfeat::io::{read_bars, read_csv_bars};
use stockfeat::{Error, FeaturePipeline, PipelineConfig};

const HEADER: &str = "Date,Open,High,Low,Close,Adj Close,Volume\n";

#[test]
fn directory_of_per_symbol_files_reads_every_symbol() {
    let dir = tempdir().expect("tempdir");
    std::fs::write(
        dir.path().join("AAA.csv"),
        format!("{HEADER}2020-01-01,1,2,1,1.5,1.5,100\n2020-01-02,1,2,1,1.6,1.6,200\n"),
    )
    .expect("write AAA");

    let file = File::create(dir.path().join("BBB.csv.gz")).expect("create gz");
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder
        .write_all(format!("{HEADER}2020-01-01,5,6,4,5,5,10\n").as_bytes())
        .expect("write csv");
    encoder.finish().expect("finish gz");
    std::fs::write(dir.path().join("notes.txt"), "ignored").expect("write notes");

    let bars = read_bars(dir.path()).expect("read bars");
    assert_eq!(bars.len(), 3);
    assert_eq!(bars[0].symbol, "AAA");
    assert_eq!(bars[2].symbol, "BBB");
    assert_eq!(bars[2].volume, Some(10));

    let table = FeaturePipeline::new(PipelineConfig::default().with_workers(2))
        .expect("pipeline")
        .extract(bars)
        .expect("extract");
    assert_eq!(table.symbols(), vec!["AAA", "BBB"]);
    assert_eq!(table.rows_for("AAA")[1].features.vol_trend_flag, Some(1));
}

#[test]
fn missing_required_column_aborts_before_processing() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("AAA.csv");
    std::fs::write(&path, "Date,Open,High,Low,Close,Volume\n2020-01-01,1,2,1,1.5,100\n")
        .expect("write csv");

    let err = read_csv_bars(&path).expect_err("schema error");
    assert!(matches!(err, Error::Schema(ref column) if column == "Adj Close"));
}

#[test]
fn missing_input_reports_the_path() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("absent.csv");
    match read_csv_bars(&path) {
        Err(Error::Io { path: reported, .. }) => assert_eq!(reported, path),
        other => panic!("expected io error, got {other:?}"),
    }
}
