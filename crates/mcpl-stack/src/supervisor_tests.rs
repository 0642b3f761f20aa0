use super::*;
use mcpl_core::types::InstanceDiagnostics;
use std::path::PathBuf;

fn test_instance(name: &str, front_port: u16, gateway_port: u16) -> Instance {
    Instance {
        name: name.into(),
        config_path: PathBuf::from(format!("{name}.json")),
        front_port,
        gateway_port,
        api_key: "k".repeat(40),
        tunnel_mode: TunnelMode::None,
        public_url: None,
        gateway_pid: None,
        tunnel_pid: None,
        diagnostics: InstanceDiagnostics::default(),
    }
}

async fn http_responder() -> (u16, tokio::task::JoinHandle<()>) {
    // Minimal gateway stand-in: any request gets a 404, which still counts
    // as alive for the readiness probe.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let app = axum::Router::new();
    let task = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (port, task)
}

#[tokio::test]
async fn readiness_accepts_any_http_response() {
    let (port, server) = http_responder().await;
    let client = reqwest::Client::new();
    wait_until_ready(
        &client,
        port,
        Duration::from_millis(50),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    server.abort();
}

#[tokio::test]
async fn readiness_times_out_on_dead_port() {
    let ghost = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let port = ghost.local_addr().unwrap().port();
    drop(ghost);

    let client = reqwest::Client::new();
    let err = wait_until_ready(
        &client,
        port,
        Duration::from_millis(50),
        Duration::from_millis(300),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LaunchError>(),
        Some(LaunchError::Readiness { .. })
    ));
}

#[tokio::test]
async fn start_stack_fails_when_gateway_never_binds() {
    let temp = tempfile::tempdir().unwrap();
    let config = temp.path().join("mcp.config.json");
    std::fs::write(&config, r#"{"mcpServers": {"fs": {"command": "true"}}}"#).unwrap();

    let ghost = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let gateway_port = ghost.local_addr().unwrap().port();
    drop(ghost);

    let options = StackOptions {
        // `sleep --port …` exits immediately with a usage error; nothing
        // ever listens on the gateway port.
        gateway_program: "sleep".to_string(),
        readiness_poll: Duration::from_millis(50),
        readiness_timeout: Duration::from_millis(400),
        ..StackOptions::default()
    };
    let instance = test_instance("doomed", 0, gateway_port);

    let err = start_stack(
        instance,
        &config,
        &["fs".to_string()],
        &NestedOverlay::default(),
        &options,
    )
    .await
    .unwrap_err();
    assert!(format!("{err:#}").contains("never became ready"));
}

#[tokio::test]
async fn gateway_exit_ends_supervision() {
    let proxy = FrontProxy::start(0, 1).await.unwrap();
    let cmd = build_command(
        "sh",
        &["-c".to_string(), "exit 7".to_string()],
        &BTreeMap::new(),
    );
    let gateway = spawn_group(cmd, StdinMode::Null).unwrap();
    let mut instance = test_instance("short-lived", 0, 1);
    instance.gateway_pid = gateway.id();

    let stack = RunningStack {
        instance,
        proxy,
        merge: None,
        merge_error: None,
        gateway: Some(gateway),
        tunnel: None,
    };

    let options = StackOptions::default();
    let instances = tokio::time::timeout(
        Duration::from_secs(10),
        supervise_all(vec![stack], &options),
    )
    .await
    .expect("supervision should end when the gateway exits")
    .unwrap();
    assert_eq!(instances.len(), 1);
    assert_eq!(instances[0].name, "short-lived");
}

#[tokio::test]
async fn shutdown_is_bounded_and_ordered() {
    let proxy = FrontProxy::start(0, 1).await.unwrap();
    let cmd = build_command(
        "sh",
        &["-c".to_string(), "sleep 30 & wait".to_string()],
        &BTreeMap::new(),
    );
    let mut gateway = spawn_group(cmd, StdinMode::Null).unwrap();
    mcpl_process::drain_stream(gateway.stdout.take().unwrap());
    mcpl_process::drain_stream(gateway.stderr.take().unwrap());

    let mut instance = test_instance("tear-me-down", 0, 1);
    instance.gateway_pid = gateway.id();
    let stack = RunningStack {
        instance,
        proxy,
        merge: None,
        merge_error: None,
        gateway: Some(gateway),
        tunnel: None,
    };

    let started = std::time::Instant::now();
    let options = StackOptions::default();
    let instances = shutdown_stacks(vec![stack], &options).await;
    // Proxy grace (2s) + group TERM grace (800ms) bound the sweep.
    assert!(started.elapsed() < Duration::from_secs(6));
    assert_eq!(instances.len(), 1);
}
