use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use depsea_core::{
    Artifact, DownloadConfig, DownloadError, Downloader, FetchError, Fetcher, HashAlgorithm,
    HttpFetcher, Integrity, Lockfile, verify_all,
};
use parking_lot::Mutex;
use serde_json::json;
use tiny_http::{Response, Server, StatusCode};

struct Registry {
    addr: SocketAddr,
    seen_auth: Arc<Mutex<Vec<(String, Option<String>)>>>,
}

fn bind_local() -> Option<TcpListener> {
    match TcpListener::bind("127.0.0.1:0") {
        Ok(listener) => Some(listener),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            eprintln!("skipping http download test: {err}");
            None
        }
        Err(err) => panic!("failed to bind test listener: {err}"),
    }
}

/// Serves `files` by URL path; anything else is a 404.
fn start_registry(files: HashMap<String, Vec<u8>>) -> Option<Registry> {
    let listener = bind_local()?;
    let addr = listener.local_addr().unwrap();
    let server = Server::from_listener(listener, None).expect("server error");
    let seen_auth = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&seen_auth);

    thread::spawn(move || {
        for request in server.incoming_requests() {
            let auth = request
                .headers()
                .iter()
                .find(|header| header.field.equiv("Authorization"))
                .map(|header| header.value.as_str().to_string());
            let path = request.url().to_string();
            seen.lock().push((path.clone(), auth));
            let _ = match files.get(&path) {
                Some(body) => request.respond(Response::from_data(body.clone())),
                None => {
                    let missing = Response::from_string("not found").with_status_code(StatusCode(404));
                    request.respond(missing)
                }
            };
        }
    });

    Some(Registry { addr, seen_auth })
}

fn lockfile_for(addr: SocketAddr, entries: &[(&str, &str, &[u8])]) -> Lockfile {
    let mut packages = serde_json::Map::new();
    packages.insert("".into(), json!({ "version": "1.0.0" }));
    for (name, version, body) in entries {
        packages.insert(
            format!("node_modules/{name}"),
            json!({
                "version": version,
                "resolved": format!("http://{addr}/{name}/-/{version}.tgz"),
                "integrity": Integrity::from_bytes(HashAlgorithm::Sha512, body).as_str(),
            }),
        );
    }
    let doc = json!({ "lockfileVersion": 3, "packages": packages });
    Lockfile::from_slice(&serde_json::to_vec(&doc).unwrap()).unwrap()
}

#[tokio::test]
async fn downloads_and_verifies_lockfile_over_http() {
    let files = HashMap::from([
        ("/lodash/-/4.17.21.tgz".to_string(), b"lodash tarball".to_vec()),
        ("/@types/node/-/20.1.0.tgz".to_string(), b"types tarball".to_vec()),
    ]);
    let Some(registry) = start_registry(files) else {
        return;
    };
    let lockfile = lockfile_for(
        registry.addr,
        &[
            ("lodash", "4.17.21", &b"lodash tarball"[..]),
            ("@types/node", "20.1.0", &b"types tarball"[..]),
        ],
    );
    let artifacts = lockfile.artifacts();
    assert_eq!(artifacts.len(), 2);

    let temp = tempfile::tempdir().unwrap();
    let out = temp.path().join("package-lock-tgzs");
    let downloader = Downloader::new(&DownloadConfig::default().with_concurrency(2))
        .unwrap()
        .with_tokens(Arc::new(|_: &str| Some("t0ken".to_string())));

    let report = downloader.download_all(&artifacts, &out).await.unwrap();
    assert_eq!(report.written, 2);
    assert!(out.join("lodash-4.17.21.tgz").exists());
    assert!(out.join("types-node-20.1.0.tgz").exists());

    let seen = registry.seen_auth.lock().clone();
    assert_eq!(seen.len(), 2);
    assert!(
        seen.iter()
            .all(|(_, auth)| auth.as_deref() == Some("Bearer t0ken"))
    );

    let summary = verify_all(&artifacts, &out);
    assert!(summary.is_clean());
    assert_eq!(summary.passed, 2);

    // A second run finds everything on disk and never touches the network.
    let rerun = downloader.download_all(&artifacts, &out).await.unwrap();
    assert_eq!(rerun.skipped, 2);
    assert_eq!(registry.seen_auth.lock().len(), 2);
}

#[tokio::test]
async fn missing_artifact_fails_run_but_keeps_siblings() {
    let files = HashMap::from([("/present/-/1.0.0.tgz".to_string(), b"present".to_vec())]);
    let Some(registry) = start_registry(files) else {
        return;
    };
    let lockfile = lockfile_for(
        registry.addr,
        &[("gone", "1.0.0", &b"gone"[..]), ("present", "1.0.0", &b"present"[..])],
    );
    let artifacts = lockfile.artifacts();

    let temp = tempfile::tempdir().unwrap();
    let downloader = Downloader::new(&DownloadConfig::default()).unwrap();
    let err = downloader
        .download_all(&artifacts, temp.path())
        .await
        .unwrap_err();

    match err {
        DownloadError::Fetch { filename, source } => {
            assert_eq!(filename, "gone-1.0.0.tgz");
            assert_eq!(
                source,
                FetchError::Status {
                    location: format!("http://{}/gone/-/1.0.0.tgz", registry.addr),
                    status: "404 Not Found".into(),
                }
            );
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(temp.path().join("present-1.0.0.tgz").exists());
    assert!(!temp.path().join("gone-1.0.0.tgz").exists());

    let summary = verify_all(&artifacts, temp.path());
    assert_eq!(summary.passed, 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].name, "gone");
}

#[tokio::test]
async fn request_timeout_fails_the_artifact() {
    let Some(listener) = bind_local() else {
        return;
    };
    let addr = listener.local_addr().unwrap();
    let server = Server::from_listener(listener, None).expect("server error");
    thread::spawn(move || {
        for request in server.incoming_requests() {
            thread::sleep(Duration::from_millis(500));
            let _ = request.respond(Response::from_string("late"));
        }
    });
    let location = format!("http://{addr}/slow/-/1.0.0.tgz");

    let fetcher = HttpFetcher::new(Some(Duration::from_millis(50))).unwrap();
    let err = fetcher.fetch(&location, None).await.unwrap_err();
    assert!(
        matches!(&err, FetchError::Transport { location: failed, .. } if *failed == location),
        "unexpected error: {err:?}"
    );

    let temp = tempfile::tempdir().unwrap();
    let config = DownloadConfig::default().with_timeout(Some(Duration::from_millis(50)));
    let artifact = Artifact::new("slow", "1.0.0", location, "sha512-slow");
    let err = Downloader::new(&config)
        .unwrap()
        .download_all(&[artifact], temp.path())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DownloadError::Fetch {
            source: FetchError::Transport { .. },
            ..
        }
    ));
    assert!(!temp.path().join("slow-1.0.0.tgz").exists());
}
