use clap::CommandFactory;
use clap_complete::aot::{generate, Shell};

fn completions(shell: Shell) -> String {
    let mut buf = Vec::new();
    generate(shell, &mut devcycle::cli::Cli::command(), "devcycle", &mut buf);
    String::from_utf8(buf).unwrap()
}

#[test]
fn completions_reference_binary_and_flags() {
    for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
        let output = completions(shell);
        assert!(output.contains("devcycle"), "{shell} completions lack the binary name");
        assert!(output.contains("fast"), "{shell} completions lack --fast");
    }
}

#[test]
fn completions_subcommand_prints_script() {
    assert_cmd::Command::cargo_bin("devcycle")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicates::str::contains("_devcycle"));
}
