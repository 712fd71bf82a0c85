use std::{env, fs, path::PathBuf, process::Command};

fn run_bin(args: &[&str]) -> String {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_timetrace"));

    let output = Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command");

    let stdout_str =
        std::str::from_utf8(&output.stdout).expect("failed to convert stdout to string");
    let stderr_str =
        std::str::from_utf8(&output.stderr).expect("failed to convert stderr to string");

    assert!(
        output.status.success(),
        "failed to run binary with {args:?}\nstdout:\n{stdout_str}\nstderr:\n{stderr_str}\n"
    );

    stdout_str.to_string()
}

fn run_bin_failing(args: &[&str]) {
    let bin = PathBuf::from(env!("CARGO_BIN_EXE_timetrace"));

    let output = Command::new(bin)
        .args(args)
        .output()
        .expect("failed to execute command");

    assert!(!output.status.success(), "binary unexpectedly succeeded with {args:?}");
}

fn setup_dir(name: &str) -> PathBuf {
    let test_dir = PathBuf::from(env!("CARGO_TARGET_TMPDIR")).join(name);

    fs::remove_dir_all(&test_dir).ok();
    fs::create_dir(&test_dir).expect("failed to create test directory");

    let config_contents = String::new()
        + "[analysis]\n"
        + "tau0 = 960.0\n"
        + "min_samples = 10\n"
        + "\n"
        + "[export]\n"
        + "table_name = \"cv_difference\"\n";

    fs::write(test_dir.join("config.toml"), config_contents)
        .expect("failed to write config file");

    test_dir
}

fn records_json(stations: &[(&str, usize)]) -> String {
    let mut entries = Vec::new();
    for &(station, n_vals) in stations {
        for i in 0..n_vals {
            let value = ((i * 37) % 11) as f64 - 5.0;
            let weighted = if i % 5 == 0 {
                "\"N/A\"".to_string()
            } else {
                format!("{}", value / 2.0)
            };
            entries.push(format!(
                "{{\"timestamp\":\"{} {:02}:{:02}\",\"source\":\"{station}\",\
                 \"value\":{value},\"weighted\":{weighted}}}",
                60310 + i / 90,
                (i % 90) * 16 / 60,
                (i % 90) * 16 % 60
            ));
        }
    }
    format!("[{}]", entries.join(","))
}

#[test]
fn basic_workflow() {
    let test_dir = setup_dir("basic_workflow");
    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    let input_path = test_dir.join("input.json");
    fs::write(&input_path, records_json(&[("IRNPLI", 120), ("GPSNPL", 60), ("GPSBLR", 4)]))
        .expect("failed to write input file");
    let input_str = input_path.to_str().expect("failed to convert path to string");

    run_bin(&["--data-dir", test_dir_str, "import", "--file", input_str]);
    assert!(test_dir.join("records-0000.msgpack").is_file());

    run_bin(&["--data-dir", test_dir_str, "tdev", "--kind", "both"]);
    let results = fs::read_to_string(test_dir.join("results.json"))
        .expect("failed to read results file");
    let results: serde_json::Value =
        serde_json::from_str(&results).expect("failed to parse results file");
    let curves = results["curves"].as_array().expect("curves must be an array");
    // GPSBLR is too short and skipped; two kinds for each remaining station.
    assert_eq!(curves.len(), 4);
    assert_eq!(curves[0]["station"], "GPSNPL");
    assert_eq!(curves[0]["kind"], "standard");
    assert_eq!(curves[1]["kind"], "weighted");
    assert_eq!(curves[1]["n_samples"], 48);
    for curve in curves {
        for point in curve["points"].as_array().expect("points must be an array") {
            let tau = point["tau"].as_f64().unwrap();
            let mdev = point["MDEV"].as_f64().unwrap();
            let tdev = point["TDEV"].as_f64().unwrap();
            assert!((tdev - tau * mdev / 3.0_f64.sqrt()).abs() <= 1e-12 * tdev.abs().max(1.0));
        }
    }

    let csv = run_bin(&["--data-dir", test_dir_str, "export", "--format", "csv"]);
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("timestamp,source,value,weighted"));
    assert_eq!(lines.count(), 184);

    let sql_path = test_dir.join("tdev.sql");
    let sql_str = sql_path.to_str().expect("failed to convert path to string");
    run_bin(&[
        "--data-dir",
        test_dir_str,
        "export",
        "--format",
        "sql",
        "--what",
        "tdev",
        "--output",
        sql_str,
    ]);
    let sql = fs::read_to_string(&sql_path).expect("failed to read SQL export");
    assert!(sql.lines().all(|line| line.starts_with(
        "INSERT INTO cv_difference (station, kind, tau, mdev, tdev) VALUES ("
    )));

    let table = run_bin(&[
        "--data-dir",
        test_dir_str,
        "view",
        "--search",
        "gpsblr",
        "--sort",
        "value",
        "--desc",
    ]);
    assert!(table.ends_with("page 1 of 1 (4 records)\n"));

    run_bin(&["--data-dir", test_dir_str, "clean"]);
    assert!(!test_dir.join("records-0000.msgpack").exists());
    assert!(!test_dir.join("results.json").exists());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn insufficient_data_clears_results() {
    let test_dir = setup_dir("insufficient_data_clears_results");
    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    let long_path = test_dir.join("long.json");
    fs::write(&long_path, records_json(&[("IRNPLI", 30)])).expect("failed to write input file");
    let short_path = test_dir.join("short.json");
    fs::write(&short_path, records_json(&[("IRNPLI", 9)])).expect("failed to write input file");

    let long_str = long_path.to_str().expect("failed to convert path to string");
    let short_str = short_path.to_str().expect("failed to convert path to string");

    run_bin(&["--data-dir", test_dir_str, "import", "--file", long_str]);
    run_bin(&["--data-dir", test_dir_str, "tdev"]);
    assert!(test_dir.join("results.json").is_file());

    run_bin(&["--data-dir", test_dir_str, "import", "--file", short_str]);
    run_bin(&["--data-dir", test_dir_str, "tdev", "--latest"]);
    assert!(!test_dir.join("results.json").exists());

    run_bin_failing(&["--data-dir", test_dir_str, "export", "--format", "json", "--what", "tdev"]);

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn records_files_are_never_reused() {
    let test_dir = setup_dir("records_files_are_never_reused");
    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    let import = |station: &str| {
        let input_path = test_dir.join(format!("{station}.json"));
        fs::write(&input_path, records_json(&[(station, 3)])).expect("failed to write input file");
        let input_str = input_path.to_str().expect("failed to convert path to string");
        run_bin(&["--data-dir", test_dir_str, "import", "--file", input_str]);
    };
    let export_csv = |latest: bool| {
        let mut args = vec!["--data-dir", test_dir_str, "export", "--format", "csv"];
        if latest {
            args.push("--latest");
        }
        run_bin(&args)
    };

    import("FIRST");
    import("SECOND");
    fs::remove_file(test_dir.join("records-0000.msgpack")).expect("failed to remove file");
    fs::write(test_dir.join("records-old.msgpack"), "not msgpack")
        .expect("failed to write stray file");
    import("THIRD");

    assert!(test_dir.join("records-0002.msgpack").is_file());
    let all = export_csv(false);
    assert!(all.contains("SECOND"), "earlier records file was overwritten:\n{all}");
    assert!(all.contains("THIRD"));
    assert!(!all.contains("FIRST"));
    let latest = export_csv(true);
    assert!(latest.contains("THIRD") && !latest.contains("SECOND"));

    fs::copy(
        test_dir.join("records-0001.msgpack"),
        test_dir.join("records-10000.msgpack"),
    )
    .expect("failed to copy records file");
    let latest = export_csv(true);
    assert!(latest.contains("SECOND") && !latest.contains("THIRD"));

    import("FOURTH");
    assert!(test_dir.join("records-10001.msgpack").is_file());

    fs::remove_dir_all(&test_dir).ok();
}

#[test]
fn missing_records_is_an_error() {
    let test_dir = setup_dir("missing_records_is_an_error");
    let test_dir_str = test_dir
        .to_str()
        .expect("failed to convert test directory to string");

    run_bin_failing(&["--data-dir", test_dir_str, "tdev"]);
    run_bin_failing(&["--data-dir", test_dir_str, "fetch", "--start-mjd", "60310"]);

    fs::remove_dir_all(&test_dir).ok();
}
