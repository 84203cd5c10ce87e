#![allow(dead_code)]

use aes::Aes128;
use axum::Router;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header::REFERER};
use axum::response::{IntoResponse, Response};
use cbc::cipher::{BlockEncryptMut, KeyIvInit, block_padding::Pkcs7};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

pub const TEST_REFERER: &str = "https://kwik.cx/";

#[derive(Clone)]
enum Resource {
    Body(Vec<u8>),
    Status(u16),
}

struct FixtureState {
    resources: HashMap<String, Resource>,
    required_referer: Option<String>,
    request_counts: Mutex<HashMap<String, usize>>,
    delay: Duration,
}

async fn serve_resource(State(state): State<Arc<FixtureState>>, req: Request) -> Response {
    let path = req.uri().path().to_string();
    *state.request_counts.lock().entry(path.clone()).or_insert(0) += 1;

    if let Some(expected) = &state.required_referer {
        let referer = req.headers().get(REFERER).and_then(|v| v.to_str().ok());
        if referer != Some(expected.as_str()) {
            return StatusCode::FORBIDDEN.into_response();
        }
    }
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }

    match state.resources.get(&path) {
        Some(Resource::Body(body)) => (StatusCode::OK, body.clone()).into_response(),
        Some(Resource::Status(code)) => StatusCode::from_u16(*code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

#[derive(Default)]
pub struct Routes {
    resources: HashMap<String, Resource>,
    delay: Duration,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, path: &str, body: impl Into<Vec<u8>>) -> Self {
        self.resources
            .insert(path.to_string(), Resource::Body(body.into()));
        self
    }

    pub fn status(mut self, path: &str, code: u16) -> Self {
        self.resources.insert(path.to_string(), Resource::Status(code));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

pub struct TestServer {
    base_url: String,
    state: Arc<FixtureState>,
}

impl TestServer {
    pub async fn start(routes: Routes, required_referer: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://127.0.0.1:{}", addr.port());

        let state = Arc::new(FixtureState {
            resources: routes.resources,
            required_referer: required_referer.map(str::to_string),
            request_counts: Mutex::new(HashMap::new()),
            delay: routes.delay,
        });
        let app = Router::new()
            .fallback(serve_resource)
            .with_state(Arc::clone(&state));

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, state }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Template the engine fills with the episode token.
    pub fn master_template(&self) -> String {
        format!("{}/stream/{{token}}/master.m3u8", self.base_url)
    }

    pub fn request_count(&self, path: &str) -> usize {
        self.state
            .request_counts
            .lock()
            .get(path)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_requests(&self) -> usize {
        self.state.request_counts.lock().values().sum()
    }
}

pub fn encrypt(plain: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Vec<u8> {
    cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
        .unwrap()
        .encrypt_padded_vec_mut::<Pkcs7>(plain)
}

pub fn master_playlist(heights: &[u64]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for height in heights {
        let width = height * 16 / 9;
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={},RESOLUTION={width}x{height}\n{height}/index.m3u8\n",
            height * 4000
        ));
    }
    out
}

/// A single-variant episode whose segments may switch keys mid-playlist.
pub struct EpisodeFixture {
    pub token: String,
    pub height: u64,
    pub plaintext: Vec<Vec<u8>>,
    /// Key number per segment; `None` leaves the segment unencrypted.
    pub key_of_segment: Vec<Option<usize>>,
}

impl EpisodeFixture {
    pub fn new(token: &str, height: u64, key_of_segment: Vec<Option<usize>>) -> Self {
        let plaintext = (0..key_of_segment.len())
            .map(|i| {
                (0..(1500 + i * 37))
                    .map(|b| ((b * 7 + i * 13) % 256) as u8)
                    .collect()
            })
            .collect();
        Self {
            token: token.to_string(),
            height,
            plaintext,
            key_of_segment,
        }
    }

    pub fn key(n: usize) -> [u8; 16] {
        [n as u8 + 1; 16]
    }

    pub fn variant_dir(&self) -> String {
        format!("/stream/{}/{}", self.token, self.height)
    }

    pub fn segment_path(&self, index: usize) -> String {
        format!("{}/seg{index}.ts", self.variant_dir())
    }

    pub fn key_path(&self, n: usize) -> String {
        format!("{}/key{n}.bin", self.variant_dir())
    }

    pub fn expected_output(&self) -> Vec<u8> {
        self.plaintext.concat()
    }

    pub fn media_playlist(&self) -> String {
        let mut out = String::from(
            "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:10\n#EXT-X-MEDIA-SEQUENCE:0\n",
        );
        let mut current: Option<usize> = None;
        for (index, key) in self.key_of_segment.iter().enumerate() {
            if *key != current {
                match key {
                    Some(n) => out.push_str(&format!(
                        "#EXT-X-KEY:METHOD=AES-128,URI=\"key{n}.bin\"\n"
                    )),
                    None => out.push_str("#EXT-X-KEY:METHOD=NONE\n"),
                }
                current = *key;
            }
            out.push_str(&format!("#EXTINF:10.0,\nseg{index}.ts\n"));
        }
        out.push_str("#EXT-X-ENDLIST\n");
        out
    }

    /// Master (several resolutions, all pointing at this episode's data),
    /// media playlist, keys and encrypted segments.
    pub fn routes(&self, heights: &[u64]) -> Routes {
        let mut routes = Routes::new()
            .body(
                &format!("/stream/{}/master.m3u8", self.token),
                master_playlist(heights),
            )
            .body(
                &format!("{}/index.m3u8", self.variant_dir()),
                self.media_playlist(),
            );
        for (index, key) in self.key_of_segment.iter().enumerate() {
            let payload = match key {
                Some(n) => {
                    routes = routes.body(&self.key_path(*n), Self::key(*n).to_vec());
                    encrypt(&self.plaintext[index], &Self::key(*n), &[0u8; 16])
                }
                None => self.plaintext[index].clone(),
            };
            routes = routes.body(&self.segment_path(index), payload);
        }
        routes
    }
}

/// Entries left in `dir`, used to assert that no temporaries survive.
pub fn dir_entries(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
