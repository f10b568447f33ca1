#![allow(dead_code)]

use nostr::Event;
use std::future::Future;
use std::sync::Once;
use std::time::Duration;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

pub fn pubkey(digit: char) -> String {
    std::iter::repeat_n(digit, 64).collect()
}

pub fn event(id: &str, author: &str, kind: u16, tags: &[&[&str]]) -> Event {
    Event {
        id: id.to_string(),
        pubkey: author.to_string(),
        created_at: 1_700_000_000,
        kind,
        tags: tags
            .iter()
            .map(|tag| tag.iter().map(|part| part.to_string()).collect())
            .collect(),
        content: String::new(),
        sig: "0".repeat(128),
    }
}

/// Poll `condition` until it holds, yielding to spawned tasks in between.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let wait = async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), wait)
        .await
        .expect("condition not reached in time");
}

/// Run `future` with a deadline so a hang fails the test instead of blocking.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
