use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use adofai_tools_launcher::services::path_resolver::PathResolver;
use adofai_tools_launcher::services::transfer::{
    TransferController, TransferEvent, TransferRequest,
};
use adofai_tools_launcher::services::version_ledger::VersionLedger;

/// Serves `payload` to every connection, dripping it out in `chunk_size`
/// slices with a pause between slices so tests get a transfer that is
/// still in flight when they poke at it.
async fn spawn_payload_server(
    payload: Vec<u8>,
    chunk_size: usize,
    chunk_delay: Duration,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let payload = payload.clone();
            tokio::spawn(async move {
                let mut head = [0u8; 1024];
                let _ = socket.read(&mut head).await;
                let header = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    payload.len()
                );
                if socket.write_all(header.as_bytes()).await.is_err() {
                    return;
                }
                for chunk in payload.chunks(chunk_size) {
                    if socket.write_all(chunk).await.is_err() {
                        return;
                    }
                    if socket.flush().await.is_err() {
                        return;
                    }
                    tokio::time::sleep(chunk_delay).await;
                }
            });
        }
    });
    addr
}

struct Harness {
    home: PathBuf,
    base: PathBuf,
    controller: TransferController,
    ledger: VersionLedger,
}

impl Harness {
    fn new() -> Self {
        let home = std::env::temp_dir().join(format!("adofai-flow-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&home).unwrap();
        let paths = PathResolver::new(home.clone());
        let base = paths.base_path();
        let ledger = VersionLedger::new(paths.clone());
        let controller = TransferController::new(paths, ledger.clone());
        Harness {
            home,
            base,
            controller,
            ledger,
        }
    }

    fn request(&self, download_id: &str, url: String) -> TransferRequest {
        TransferRequest {
            download_id: download_id.to_string(),
            url,
            tool_id: "42".to_string(),
            extension: None,
            tool_name: Some("Converter".to_string()),
            tool_version: Some("1.2.0".to_string()),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.home).ok();
    }
}

async fn next_event(rx: &mut UnboundedReceiver<TransferEvent>) -> TransferEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for transfer event")
        .expect("event channel closed early")
}

async fn drain(mut rx: UnboundedReceiver<TransferEvent>) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn full_download_lands_payload_and_version_record() {
    let payload: Vec<u8> = (0..65536u32).map(|i| (i % 251) as u8).collect();
    let addr = spawn_payload_server(payload.clone(), 16384, Duration::from_millis(5)).await;
    let harness = Harness::new();

    let rx = harness
        .controller
        .start(harness.request("dl-1", format!("http://{}/files/tool.zip", addr)))
        .unwrap();
    let events = drain(rx).await;

    assert!(matches!(
        events.first(),
        Some(TransferEvent::Started { filename }) if filename == "42.zip"
    ));
    let completions = events
        .iter()
        .filter(|e| matches!(e, TransferEvent::Completed { .. }))
        .count();
    assert_eq!(completions, 1);
    assert!(!events.iter().any(|e| matches!(e, TransferEvent::Failed { .. })));

    let target = harness.base.join("42").join("42.zip");
    assert_eq!(std::fs::read(&target).unwrap(), payload);
    assert!(!harness.base.join("42").join("42.zip.part").exists());

    let info = harness.ledger.read("42").expect("version record missing");
    assert_eq!(info.version, "1.2.0");
    assert_eq!(info.tool_name, "Converter");
}

#[tokio::test]
async fn progress_reports_percent_of_content_length() {
    let payload = vec![7u8; 40960];
    let addr = spawn_payload_server(payload, 4096, Duration::from_millis(5)).await;
    let harness = Harness::new();

    let rx = harness
        .controller
        .start(harness.request("dl-progress", format!("http://{}/tool.zip", addr)))
        .unwrap();
    let events = drain(rx).await;

    let mut last_percent = 0;
    for event in &events {
        if let TransferEvent::Progress {
            progress,
            downloaded,
            total,
            ..
        } = event
        {
            assert_eq!(*total, 40960);
            assert!(*progress >= last_percent, "progress went backwards");
            assert!(*downloaded <= *total);
            last_percent = *progress;
        }
    }
    assert_eq!(last_percent, 100);
}

#[tokio::test]
async fn pause_then_resume_completes_the_transfer() {
    let payload = vec![3u8; 262144];
    let addr = spawn_payload_server(payload.clone(), 8192, Duration::from_millis(20)).await;
    let harness = Harness::new();

    let mut rx = harness
        .controller
        .start(harness.request("dl-pause", format!("http://{}/tool.zip", addr)))
        .unwrap();

    // Let the transfer get going before pausing it.
    loop {
        if matches!(next_event(&mut rx).await, TransferEvent::Progress { .. }) {
            break;
        }
    }

    assert!(harness.controller.pause("dl-pause"));
    assert!(!harness.controller.pause("dl-pause"));
    loop {
        if matches!(next_event(&mut rx).await, TransferEvent::Paused) {
            break;
        }
    }

    // No resume while paused means no further progress events arrive.
    assert!(!harness.controller.resume("missing"));
    assert!(harness.controller.resume("dl-pause"));
    assert!(matches!(next_event(&mut rx).await, TransferEvent::Resumed));

    let events = drain(rx).await;
    assert!(events
        .iter()
        .any(|e| matches!(e, TransferEvent::Completed { filename } if filename == "42.zip")));

    let target = harness.base.join("42").join("42.zip");
    assert_eq!(std::fs::read(&target).unwrap().len(), payload.len());
}

#[tokio::test]
async fn duplicate_download_ids_are_rejected_while_active() {
    let payload = vec![1u8; 262144];
    let addr = spawn_payload_server(payload, 4096, Duration::from_millis(25)).await;
    let harness = Harness::new();

    let rx = harness
        .controller
        .start(harness.request("dl-dup", format!("http://{}/tool.zip", addr)))
        .unwrap();
    assert!(harness.controller.is_active("dl-dup"));

    let err = harness
        .controller
        .start(harness.request("dl-dup", format!("http://{}/tool.zip", addr)))
        .err();
    assert!(err.is_some());

    assert!(harness.controller.cancel("dl-dup"));
    drain(rx).await;
}

#[tokio::test]
async fn cancel_discards_partial_file_and_is_not_repeatable() {
    let payload = vec![9u8; 262144];
    let addr = spawn_payload_server(payload, 4096, Duration::from_millis(25)).await;
    let harness = Harness::new();

    let mut rx = harness
        .controller
        .start(harness.request("dl-cancel", format!("http://{}/tool.zip", addr)))
        .unwrap();
    loop {
        if matches!(next_event(&mut rx).await, TransferEvent::Progress { .. }) {
            break;
        }
    }

    assert!(harness.controller.cancel("dl-cancel"));
    assert!(!harness.controller.cancel("dl-cancel"));

    let events = drain(rx).await;
    assert!(!events.iter().any(|e| matches!(e, TransferEvent::Completed { .. })));

    let dir = harness.base.join("42");
    assert!(!dir.join("42.zip").exists());
    assert!(!dir.join("42.zip.part").exists());
}
