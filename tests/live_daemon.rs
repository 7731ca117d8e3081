//! End-to-end scenarios against a real `tor` binary. Gated behind `#[ignore]`:
//! run with `cargo test --test live_daemon -- --ignored` once a `tor` executable
//! is reachable on `PATH` or via `TOR_BINARY_OVERRIDE`.

use std::time::Duration;

use torman::TorManager;

/// Fresh install: register listeners and a hidden service, start the daemon, and
/// confirm torrc and the on-disk hostname match expectations.
#[tokio::test]
#[ignore = "requires a tor binary on PATH or TOR_BINARY_OVERRIDE"]
async fn fresh_install_bootstraps_and_materializes_hidden_service() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let manager = TorManager::new(Some(tmp.path().to_path_buf()), false)
        .await
        .expect("construct manager");

    manager.ensure_binaries().await.expect("ensure binaries");
    manager.add_socks_port(9050, true).await.expect("add socks port");
    manager.add_control_port(9051, true).await.expect("add control port");
    manager
        .register_hidden_service(80, 5000, false, true)
        .await
        .expect("register hidden service");
    manager.save_torrc().await.expect("save torrc");
    manager.start_service().await.expect("start service");

    tokio::time::sleep(Duration::from_secs(2)).await;
    manager
        .refresh_all_hidden_services()
        .await
        .expect("refresh hidden services");

    let hostname_path = manager.paths().hidden_service_dir(0).join("hostname");
    assert!(hostname_path.is_file());
    let hostname = std::fs::read_to_string(hostname_path).unwrap();
    assert!(hostname.trim().ends_with(".onion"));

    manager.stop_service().await.expect("stop service");
}

/// Port collision: pre-bind 9050 from the test harness and confirm the allocator
/// resolves to a different port.
#[tokio::test]
#[ignore = "requires a tor binary on PATH or TOR_BINARY_OVERRIDE"]
async fn port_collision_resolves_to_next_free_port() {
    let blocker = std::net::TcpListener::bind("127.0.0.1:9050").expect("pre-bind 9050");

    let tmp = tempfile::tempdir().expect("tempdir");
    let manager = TorManager::new(Some(tmp.path().to_path_buf()), false)
        .await
        .expect("construct manager");

    let resolved = manager.add_socks_port(9050, true).await.expect("add socks port");
    assert_ne!(resolved, 9050);
    drop(blocker);
}

/// Runtime `ADD_ONION`/`DEL_ONION`: with a running daemon, register an ephemeral
/// hidden service and then remove it.
#[tokio::test]
#[ignore = "requires a tor binary on PATH or TOR_BINARY_OVERRIDE"]
async fn runtime_add_onion_then_del_onion() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let manager = TorManager::new(Some(tmp.path().to_path_buf()), false)
        .await
        .expect("construct manager");

    manager.ensure_binaries().await.expect("ensure binaries");
    manager.add_socks_port(9052, true).await.expect("add socks port");
    manager.add_control_port(9053, true).await.expect("add control port");
    manager.save_torrc().await.expect("save torrc");
    manager.start_service().await.expect("start service");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let service = manager
        .register_runtime_hidden_service(8888, 8080, true)
        .await
        .expect("register runtime hidden service");
    assert!(service.onion_address.ends_with(".onion"));

    manager
        .remove_runtime_hidden_service(&service.onion_address)
        .await
        .expect("remove runtime hidden service");

    manager.stop_service().await.expect("stop service");
}

/// Persist a non-temporary runtime service, then confirm it resurrects as a
/// persistent service across a restart.
#[tokio::test]
#[ignore = "requires a tor binary on PATH or TOR_BINARY_OVERRIDE"]
async fn persist_runtime_then_restart_resurrects_service() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let manager = TorManager::new(Some(tmp.path().to_path_buf()), false)
        .await
        .expect("construct manager");

    manager.ensure_binaries().await.expect("ensure binaries");
    manager.add_socks_port(9054, true).await.expect("add socks port");
    manager.add_control_port(9055, true).await.expect("add control port");
    manager.save_torrc().await.expect("save torrc");
    manager.start_service().await.expect("start service");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let service = manager
        .register_runtime_hidden_service(9999, 9000, false)
        .await
        .expect("register runtime hidden service");

    manager.stop_service().await.expect("stop service");
    manager
        .persist_runtime_hidden_service(&service.onion_address)
        .await
        .expect("persist runtime hidden service");
    manager.start_service().await.expect("restart after persisting");
    tokio::time::sleep(Duration::from_secs(2)).await;

    manager
        .refresh_all_hidden_services()
        .await
        .expect("refresh hidden services");
    manager.stop_service().await.expect("stop service");
}

/// Cookie authentication: a fresh daemon should advertise COOKIE/SAFECOOKIE and
/// the client should authenticate against the reported cookie file.
#[tokio::test]
#[ignore = "requires a tor binary on PATH or TOR_BINARY_OVERRIDE"]
async fn control_auth_via_cookie_succeeds() {
    let tmp = tempfile::tempdir().expect("tempdir");
    let manager = TorManager::new(Some(tmp.path().to_path_buf()), false)
        .await
        .expect("construct manager");

    manager.ensure_binaries().await.expect("ensure binaries");
    manager.add_control_port(9057, true).await.expect("add control port");
    manager.save_torrc().await.expect("save torrc");
    manager.start_service().await.expect("start service");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let replies = manager
        .send_control_commands(&["GETINFO version".to_string()])
        .await
        .expect("send control commands");
    assert!(replies[0].1.is_success());

    manager.stop_service().await.expect("stop service");
}
