use std::sync::Arc;
use std::thread;
use std::time::Duration;

use storyline::bootstrap;
use storyline::config::{Config, KNOWN_APP_ID};
use storyline::dispatch::{DispatchOutcome, PointerEvent, Router};
use storyline::handlers;
use storyline::page::PageElement;
use storyline::session::SessionContext;
use storyline::storage::{MemoryStore, WatermarkStore};
use storyline::surface::doubles::{RecordingHost, RecordingSink, SurfaceCall};

/// Serves canned bodies by URL prefix, first match wins. The thread runs
/// until the test process exits.
fn serve(routes: Vec<(&'static str, Vec<u8>)>) -> String {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let url = request.url().to_string();
            let body = routes
                .iter()
                .find(|(prefix, _)| url.starts_with(prefix))
                .map(|(_, body)| body.clone());
            let response = match body {
                Some(body) => tiny_http::Response::from_data(body),
                None => tiny_http::Response::from_string("not found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    });
    format!("http://{}", addr)
}

fn test_config(base: &str) -> Config {
    let mut config = Config::default();
    config.api.web_base = base.to_string();
    config.api.api_base = format!("{}/api/v1", base);
    config.fetch.backoff = Duration::from_millis(1);
    config
}

struct Harness {
    ctx: Arc<SessionContext>,
    host: Arc<RecordingHost>,
    sink: Arc<RecordingSink>,
    store: Arc<MemoryStore>,
}

fn harness(config: Config) -> Harness {
    let host = Arc::new(RecordingHost::new());
    let sink = Arc::new(RecordingSink::new());
    let store = Arc::new(MemoryStore::new());
    let ctx = Arc::new(
        SessionContext::new(
            config,
            host.clone(),
            sink.clone(),
            store.clone(),
            store.clone(),
        )
        .unwrap(),
    );
    Harness {
        ctx,
        host,
        sink,
        store,
    }
}

#[test]
fn tray_bar_click_opens_the_timeline() {
    let tray = r#"{"tray": [
        {"id": 1, "latest_reel_media": 200, "user": {"pk": 1, "username": "alice"}},
        {"id": 2, "latest_reel_media": 100, "user": {"pk": 2, "username": "bob"}}
    ]}"#;
    let reels = r#"{"reels_media": [
        {"user": {"pk": 1, "username": "alice"},
         "items": [{"taken_at": 200, "media_type": 1,
                    "image_versions2": {"candidates": [{"url": "https://cdn.test/a.jpg"}]}},
                   {"taken_at": 180, "media_type": 1,
                    "image_versions2": {"candidates": [{"url": "https://cdn.test/b.jpg"}]}}]},
        {"user": {"pk": 2, "username": "bob"},
         "items": [{"taken_at": 100, "media_type": 1,
                    "image_versions2": {"candidates": [{"url": "https://cdn.test/c.jpg"}]}}]}
    ]}"#;
    let base = serve(vec![
        ("/api/v1/feed/reels_tray/", tray.as_bytes().to_vec()),
        ("/api/v1/feed/reels_media/", reels.as_bytes().to_vec()),
    ]);

    let h = harness(test_config(&base));
    h.store.set_last_seen(150).unwrap();

    let router = Router::new(handlers::click_rules());
    let target = PageElement::build("div").class("zGtbP").done();
    let outcome = router.dispatch(
        &h.ctx,
        &PointerEvent {
            target,
            page_path: "/".to_string(),
        },
    );
    assert_eq!(
        outcome,
        DispatchOutcome::Handled {
            rule: "tray bar",
            suppressed: false,
        }
    );

    let calls = h.host.calls();
    assert!(calls.contains(&SurfaceCall::Opened));
    assert!(calls.contains(&SurfaceCall::Title("Stories timeline".to_string())));
    assert!(calls.contains(&SurfaceCall::Reel {
        items: 3,
        dividers: 1,
    }));

    // Opening the timeline marks everything seen.
    assert_eq!(h.store.last_seen().unwrap(), Some(200));
    assert!(h.sink.warnings().is_empty());
}

#[test]
fn carousel_middle_click_plays_the_matching_clip() {
    // The post payload references absolute media URLs on the same server,
    // so the fixture is assembled after the port is known.
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let base = format!("http://{}", addr);

    let post = format!(
        r#"{{"graphql": {{"shortcode_media": {{
            "is_video": false,
            "display_url": "{base}/cover.jpg",
            "edge_sidecar_to_children": {{"edges": [
                {{"node": {{"is_video": false, "display_url": "{base}/imgA.jpg"}}}},
                {{"node": {{"is_video": true, "display_url": "{base}/posterB.jpg",
                            "video_url": "{base}/clipB.mp4", "video_duration": 2.0}}}}
            ]}}}}}}}}"#,
        base = base
    );
    thread::spawn(move || {
        for request in server.incoming_requests() {
            let url = request.url().to_string();
            let response = if url.starts_with("/p/ABC/") {
                tiny_http::Response::from_data(post.clone().into_bytes())
            } else if url.starts_with("/clipB.mp4") {
                tiny_http::Response::from_data(vec![7u8; 2048])
            } else {
                tiny_http::Response::from_string("not found").with_status_code(404)
            };
            let _ = request.respond(response);
        }
    });

    let h = harness(test_config(&base));

    // article.ePUX4 > [a.c-Yi7, div > video.tWeCl]
    let root = PageElement::build("article").class("ePUX4").done();
    root.append(
        PageElement::build("a")
            .class("c-Yi7")
            .attr("href", &format!("{}/p/ABC/", base))
            .done(),
    );
    let wrapper = root.append(PageElement::build("div").done());
    let video = wrapper.append(
        PageElement::build("video")
            .class("tWeCl")
            .attr("src", "blob:https://host.test/123")
            .attr("poster", &format!("{}/posterB.jpg?efg=1", base))
            .done(),
    );

    let router = Router::new(handlers::middle_click_rules());
    let outcome = router.dispatch(
        &h.ctx,
        &PointerEvent {
            target: video,
            page_path: "/p/ABC/".to_string(),
        },
    );
    assert_eq!(
        outcome,
        DispatchOutcome::Handled {
            rule: "post video",
            suppressed: true,
        }
    );

    let calls = h.host.calls();
    assert!(calls.contains(&SurfaceCall::Title("Video".to_string())));
    assert!(calls.contains(&SurfaceCall::Playback {
        url: format!("{}/clipB.mp4", base),
        upgraded: false,
    }));

    // The resolved payload is cached for the next interaction.
    assert_eq!(h.ctx.posts.len(), 1);
}

#[test]
fn bootstrap_discovers_constants_from_the_bundle() {
    let bundle = format!(
        "var instagramWebDesktopFBAppId='{}';\
         const q=\"d4d88dc1500312af6f937f7b804c68c3\";\
         function fetchHighlightReels(){{}}",
        KNOWN_APP_ID
    );
    let base = serve(vec![("/bundle.js", bundle.into_bytes())]);

    let h = harness(test_config(&base));
    let constants = bootstrap::discover(&h.ctx, &format!("{}/bundle.js", base)).unwrap();
    assert_eq!(constants.app_id, KNOWN_APP_ID);
    assert_eq!(constants.query_hash, "d4d88dc1500312af6f937f7b804c68c3");
    // The shipped id still matches, so the user hears nothing.
    assert!(h.sink.warnings().is_empty());
}
