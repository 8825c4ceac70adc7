use rsimgstrap::RsimgstrapError;
use rsimgstrap::environment::Environment;
use rsimgstrap::executor::{CommandExecutor, CommandSpec, RealCommandExecutor, check_call};

#[test]
fn dry_run_skips_command_lookup() {
    let executor = RealCommandExecutor { dry_run: true };
    let spec = CommandSpec::new("definitely-not-a-command", Vec::new());

    let result = executor
        .execute(&spec)
        .expect("dry run should not require command to exist");
    assert!(result.status.is_none(), "dry run result should not have an exit status");
    assert!(check_call(&executor, &spec).is_ok());
}

#[test]
fn non_dry_run_fails_for_nonexistent_command() {
    let executor = RealCommandExecutor { dry_run: false };
    let spec = CommandSpec::new("this-command-should-not-exist", Vec::new());

    let err = executor.execute(&spec).unwrap_err();

    assert!(err.to_string().contains("not found in PATH"), "got: {}", err);
    assert!(
        matches!(
            err.downcast_ref::<RsimgstrapError>(),
            Some(RsimgstrapError::CommandNotFound { .. })
        ),
        "Expected CommandNotFound variant, got: {:?}",
        err
    );
}

#[test]
fn successful_command_passes_check_call() {
    let executor = RealCommandExecutor { dry_run: false };
    let spec = CommandSpec::new("true", Vec::new());
    check_call(&executor, &spec).expect("true should succeed");
}

#[test]
fn failing_command_reports_exit_code_and_environment() {
    let executor = RealCommandExecutor { dry_run: false };
    let spec = CommandSpec::new("sh", vec!["-c".to_string(), "exit 3".to_string()])
        .with_environment(&Environment::new().merged([("MAKEOPTS", "-j2")]));

    let err = check_call(&executor, &spec).unwrap_err();

    match err.downcast_ref::<RsimgstrapError>() {
        Some(RsimgstrapError::Execution { argv, env, code, .. }) => {
            assert_eq!(argv, &vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()]);
            assert_eq!(env, &vec![("MAKEOPTS".to_string(), "-j2".to_string())]);
            assert_eq!(*code, Some(3));
        }
        other => panic!("expected Execution error, got: {:?}", other),
    }
    assert!(err.to_string().contains("MAKEOPTS=-j2"));
}

#[test]
fn environment_overlay_reaches_the_child() {
    let executor = RealCommandExecutor { dry_run: false };
    let spec = CommandSpec::new(
        "sh",
        vec!["-c".to_string(), "test \"$RSIMGSTRAP_TEST\" = yes".to_string()],
    )
    .with_env("RSIMGSTRAP_TEST", "yes");

    check_call(&executor, &spec).expect("variable should be visible to the child");
}
