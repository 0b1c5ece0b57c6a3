use crate::common::*;
use std::time::Duration;

#[test]
fn quit_key_stops_services_and_releases_ports() {
    let ports = free_ports(2);
    let project = TestProject::new(&http_services_config("lifecycle", &ports));

    let mut child = spawn_devcycle(&project, &["--fast"]);
    for &port in &ports {
        assert!(
            wait_for_port(port, Duration::from_secs(15)),
            "service did not come up on port {port}"
        );
    }

    press(&mut child, "q");
    let status = wait_exit(&mut child, Duration::from_secs(20)).expect("devcycle did not exit");
    assert!(status.success(), "exit status {status}");

    for &port in &ports {
        assert!(
            wait_for_port_release(port, Duration::from_secs(5)),
            "port {port} was not released"
        );
    }
    let log = project.log();
    assert!(log.contains("entering running"), "run log:\n{log}");
    assert!(log.contains("entering draining"), "run log:\n{log}");
}

#[test]
fn fast_reboot_restarts_services() {
    let port = free_port();
    let project = TestProject::new(&http_services_config("reboot", &[port]));

    let mut child = spawn_devcycle(&project, &["--fast"]);
    assert!(wait_for_port(port, Duration::from_secs(15)));

    press(&mut child, "f");
    assert!(
        wait_for_log(&project, "rebooting in fast mode", Duration::from_secs(10)),
        "run log:\n{}",
        project.log()
    );
    assert!(wait_for_log(&project, "cycle=2", Duration::from_secs(10)));
    assert!(wait_for_port(port, Duration::from_secs(15)), "service not back after reboot");

    press(&mut child, "q");
    let status = wait_exit(&mut child, Duration::from_secs(20)).expect("devcycle did not exit");
    assert!(status.success());
    assert!(wait_for_port_release(port, Duration::from_secs(5)));
}

#[test]
fn sigint_drains_and_exits() {
    let port = free_port();
    let project = TestProject::new(&http_services_config("interrupt", &[port]));

    let mut child = spawn_devcycle(&project, &["--fast"]);
    assert!(wait_for_port(port, Duration::from_secs(15)));

    nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(child.id() as i32),
        nix::sys::signal::Signal::SIGINT,
    )
    .unwrap();

    let status = wait_exit(&mut child, Duration::from_secs(20)).expect("devcycle did not exit");
    assert!(status.success(), "exit status {status}");
    assert!(wait_for_port_release(port, Duration::from_secs(5)));
    assert!(project.log().contains("Ctrl+C received"));
}

#[test]
fn exits_when_every_service_has_exited() {
    let port = free_port();
    let project = TestProject::new(&format!(
        "[project]\nname = \"short\"\nopen_browser = false\n\n[datastore]\ncheck = false\n\n\
         [services.once]\ncommand = \"exit 0\"\nport = {port}\n{FAST_TIMING}"
    ));

    let mut child = spawn_devcycle(&project, &["--fast"]);
    let status = wait_exit(&mut child, Duration::from_secs(20)).expect("devcycle did not exit");
    assert!(status.success());
    assert!(project.log().contains("all services have exited"));
}

#[test]
fn missing_toolchain_exits_with_failure() {
    let port = free_port();
    let project = TestProject::new(&format!(
        "[project]\nname = \"broken\"\nopen_browser = false\n\n\
         [services.web]\ncommand = \"sleep 60\"\nport = {port}\n\n\
         [setup]\ntoolchain = [\"definitely-not-a-tool-xyz --version\"]\n{FAST_TIMING}"
    ));

    let mut child = spawn_devcycle(&project, &[]);
    let status = wait_exit(&mut child, Duration::from_secs(20)).expect("devcycle did not exit");
    assert_eq!(status.code(), Some(1));
    assert!(project.log().contains("definitely-not-a-tool-xyz"));
}
