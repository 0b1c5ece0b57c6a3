use crate::common::*;
use std::process::{Command, Stdio};
use std::time::Duration;

#[test]
fn squatter_on_service_port_is_killed_at_start() {
    let port = free_port();
    let mut squatter = Command::new("python3")
        .args(["-m", "http.server", &port.to_string(), "--bind", "127.0.0.1"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("python3 is required for this test");
    assert!(wait_for_port(port, Duration::from_secs(10)), "squatter did not bind");

    let project = TestProject::new(&http_services_config("reclaim", &[port]));
    let mut child = spawn_devcycle(&project, &["--fast"]);

    let squatter_status = wait_exit(&mut squatter, Duration::from_secs(15));
    assert!(squatter_status.is_some(), "squatter was not killed");
    assert!(
        wait_for_log(&project, "started svc0", Duration::from_secs(15)),
        "run log:\n{}",
        project.log()
    );
    assert!(wait_for_port(port, Duration::from_secs(15)));

    press(&mut child, "q");
    let status = wait_exit(&mut child, Duration::from_secs(20)).expect("devcycle did not exit");
    assert!(status.success());
    assert!(wait_for_port_release(port, Duration::from_secs(5)));
}
