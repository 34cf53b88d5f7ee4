mod common;

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use manga_updater::MangaUpdater;
use manga_updater::base_system::context::Config;
use manga_updater::network_parser::{FetchError, Fetcher, HttpFetcher};

struct PageServer {
    base_url: String,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl PageServer {
    fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base_url = format!("http://{}", server.server_addr());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let (status, body): (u16, &[u8]) = match request.url() {
                    "/uploads/manga/Foo/chapters/ch01/01.jpg" => (200, b"page-one"),
                    "/uploads/manga/Foo/chapters/ch01/02.png" => (200, b"page-two"),
                    "/empty.jpg" => (200, b""),
                    "/boom.jpg" => (500, b"server error"),
                    "/gone.jpg" => (410, b"gone"),
                    _ => (404, b"not found"),
                };
                let _ = request.respond(
                    tiny_http::Response::from_data(body.to_vec()).with_status_code(status),
                );
            }
        });

        Self {
            base_url,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for PageServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(&Config {
        request_timeout: 5,
        connect_timeout: 5,
        ..Config::default()
    })
    .unwrap()
}

#[test]
fn maps_http_responses_to_fetch_results() {
    let server = PageServer::spawn();
    let fetcher = fetcher();
    let url = |path: &str| format!("{}{}", server.base_url, path);

    let body = fetcher
        .fetch(&url("/uploads/manga/Foo/chapters/ch01/01.jpg"))
        .unwrap();
    assert_eq!(body, b"page-one");

    assert!(matches!(
        fetcher.fetch(&url("/nothing.jpg")),
        Err(FetchError::NotFound(404))
    ));
    assert!(matches!(
        fetcher.fetch(&url("/gone.jpg")),
        Err(FetchError::NotFound(410))
    ));
    assert!(matches!(
        fetcher.fetch(&url("/boom.jpg")),
        Err(FetchError::Status(500))
    ));
    assert!(matches!(fetcher.fetch(&url("/empty.jpg")), Err(FetchError::Empty)));
}

#[test]
fn unreachable_host_is_a_transport_error() {
    let fetcher = fetcher();
    let err = fetcher.fetch("http://127.0.0.1:1/x.jpg").unwrap_err();
    assert!(err.is_transient());
}

#[test]
fn update_over_http_downloads_pages() {
    let server = PageServer::spawn();
    let tmp = tempfile::tempdir().unwrap();
    let config = Config {
        base_url: format!("{}/uploads/manga/", server.base_url),
        request_timeout: 5,
        connect_timeout: 5,
        ..common::test_config(tmp.path())
    };
    let up = MangaUpdater::from_config(config, Arc::new(AtomicBool::new(false))).unwrap();
    common::seed_chapter(up.root(), "Foo", 1);

    assert_eq!(up.update_all(), 1);
    let chapter = up.root().join("Foo").join("Chapter 1");
    assert_eq!(std::fs::read(chapter.join("01.jpg")).unwrap(), b"page-one");
    assert_eq!(std::fs::read(chapter.join("02.png")).unwrap(), b"page-two");
}
