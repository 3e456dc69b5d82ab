//! Daemon wiring over real sockets and an on-disk store.

use std::time::Duration;

use armada_core::config::StoreConfig;
use armada_core::{Goal, Job};
use armada_master::MasterModel;
use armadad::daemon::{open_store, register_master, serve};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;

async fn http_get(addr: std::net::SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test]
async fn master_serves_api_and_publishes_presence() {
    let model = MasterModel::new(open_store(&StoreConfig::default()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let session = register_master(&model, &listener, "m1".into()).unwrap();

    let (tx, rx) = watch::channel(false);
    let server = tokio::spawn(serve(model.clone(), listener, rx));

    let response = http_get(addr, "/api/v1/masters/").await;
    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    assert!(response.contains("\"m1\""));
    assert!(response.contains(&addr.to_string()));

    let response = http_get(addr, "/api/v1/agents/nobody/status").await;
    assert!(response.starts_with("HTTP/1.1 404"), "{response}");

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), server)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    session.close().unwrap();
    assert!(model.get_running_masters().unwrap().is_empty());
}

#[test]
fn intent_survives_master_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = StoreConfig {
        data_dir: Some(dir.path().to_path_buf()),
    };
    let job = Job::builder("foo", "1.0", "busybox").build().unwrap();

    {
        let model = MasterModel::new(open_store(&config).unwrap());
        model.add_job(&job).unwrap();
        model.add_host("h1").unwrap();
        model
            .deploy_job("h1", &armada_core::Deployment::of(job.id.clone(), Goal::Start))
            .unwrap();
        model.undeploy_job("h1", &job.id).unwrap();
    }

    let model = MasterModel::new(open_store(&config).unwrap());
    assert_eq!(model.get_job(&job.id).unwrap(), job);
    let deployment = model.get_deployment("h1", &job.id).unwrap().unwrap();
    assert_eq!(deployment.goal, Goal::Undeploy);
    assert!(model.remove_job(&job.id).is_err());
}
