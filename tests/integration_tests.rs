//! End-to-end tests against a local stand-in for the proxy

use image::ImageEncoder;
use s8t::{Breakpoint, CaptureRequest, Config, Error, ImageFormat, Pipeline, PipelineState, ProxyConfig, Quality};
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Response, Server};

const PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Proxy Test</title><link rel="icon" href="/favicon.ico"></head>
<body>
<h1>Hello from the proxy</h1>
<img src="/logo.png" width="40" height="40">
<p>This page was relayed.</p>
</body>
</html>"#;

fn red_png() -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(10, 10, image::Rgba([255, 0, 0, 255]));
    let mut buf = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buf)
        .write_image(img.as_raw(), 10, 10, image::ExtendedColorType::Rgba8)
        .unwrap();
    buf
}

/// Start a proxy stand-in; returns its endpoint and the request log
fn start_proxy() -> (String, Arc<Mutex<Vec<String>>>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let endpoint = format!("http://{}/", server.server_addr());
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = log.clone();

    std::thread::spawn(move || {
        for request in server.incoming_requests() {
            let path = request.url().to_string();
            seen.lock().unwrap().push(path.clone());
            let response = match path.as_str() {
                "/?https://site.test/page" => Response::from_string(PAGE).with_header(
                    "Content-Type: text/html; charset=utf-8".parse::<Header>().unwrap(),
                ),
                "/?url=https%3A%2F%2Fsite.test%2Flogo.png" => Response::from_data(red_png())
                    .with_header("Content-Type: image/png".parse::<Header>().unwrap()),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });

    (endpoint, log)
}

fn pipeline(endpoint: &str) -> Pipeline {
    let config = Config {
        proxy: ProxyConfig {
            endpoint: endpoint.to_string(),
            ..Default::default()
        },
        min_frame_height: 200,
        ..Default::default()
    };
    Pipeline::from_config(config).expect("pipeline")
}

#[tokio::test]
async fn render_through_proxy_relays_images() {
    let (endpoint, log) = start_proxy();
    let p = pipeline(&endpoint);

    let req = CaptureRequest::new(
        "https://site.test/page",
        Breakpoint::try_from(320).unwrap(),
        ImageFormat::Png,
        Quality::High,
    );
    let url = p.render(&req).await.expect("render");
    assert!(url.as_str().starts_with("blob:s8t/"));

    let image = p.current_image().unwrap();
    assert_eq!(image.width, 320);
    let pixels = image::load_from_memory(&image.bytes).unwrap().to_rgba8();
    assert!(pixels.pixels().any(|px| px.0 == [255, 0, 0, 255]), "relayed image not painted");
    assert!(pixels.pixels().any(|px| px.0 == [0, 0, 0, 255]), "text not painted");

    let html = p.with_session(|s| s.frame().unwrap().html.to_string());
    assert!(html.contains(r#"src="https://site.test/logo.png""#));
    assert!(!html.contains("favicon"));

    let log = log.lock().unwrap().clone();
    assert_eq!(log[0], "/?https://site.test/page");
    assert!(log.contains(&"/?url=https%3A%2F%2Fsite.test%2Flogo.png".to_string()));
}

#[tokio::test]
async fn proxy_404_surfaces_in_state() {
    let (endpoint, _log) = start_proxy();
    let p = pipeline(&endpoint);

    let req = CaptureRequest::new(
        "https://site.test/missing",
        Breakpoint::default(),
        ImageFormat::Jpeg,
        Quality::Low,
    );
    let err = p.render(&req).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus { status: 404, .. }));
    assert_eq!(
        p.state(),
        PipelineState::Error("Failed to fetch URL: 404 Not Found".to_string())
    );
    assert!(p.current_image().is_none());
}

#[tokio::test]
async fn unreachable_proxy_is_a_network_error() {
    // nothing listens on the discard port
    let p = pipeline("http://127.0.0.1:9/");
    let req = CaptureRequest::new("https://site.test/page", Breakpoint::default(), ImageFormat::Png, Quality::Low);
    let err = p.render(&req).await.unwrap_err();
    assert!(matches!(err, Error::NetworkError(_)));
    assert!(matches!(p.state(), PipelineState::Error(msg) if msg.starts_with("Failed to fetch URL")));
}
