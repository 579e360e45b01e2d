use logging::{LogConfig, LoggingError, VerbosityConfig, init_tracing};

#[test]
fn events_are_appended_to_log_file_and_second_install_fails() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("upload.log");
    std::fs::write(&path, "earlier run\n").expect("seed log");

    let config = LogConfig::new(VerbosityConfig::from_verbose_level(0)).with_log_file(&path);
    init_tracing(&config).expect("first install succeeds");

    tracing::info!(target: "upload::transfer", file = "a.bin", "file transfer complete");
    tracing::debug!(target: "upload::heartbeat", "ping received");

    let contents = std::fs::read_to_string(&path).expect("read log");
    assert!(contents.starts_with("earlier run\n"), "log file is appended to");
    assert!(contents.contains("file transfer complete"));
    assert!(contents.contains("upload::transfer"));
    assert!(!contents.contains('\u{1b}'), "no ANSI escapes in the file");

    let error = init_tracing(&config).expect_err("subscriber already installed");
    assert!(matches!(error, LoggingError::AlreadyInstalled(_)));
}
