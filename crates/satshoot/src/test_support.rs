use nostr::Event;
use std::sync::Once;

static INIT: Once = Once::new();

pub(crate) fn init_tracing() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// A 64-char hex public key made of one repeated digit.
pub(crate) fn pubkey(digit: char) -> String {
    std::iter::repeat_n(digit, 64).collect()
}

pub(crate) fn make_event(
    id: &str,
    pubkey: &str,
    kind: u16,
    created_at: u64,
    tags: Vec<Vec<&str>>,
) -> Event {
    Event {
        id: id.to_string(),
        pubkey: pubkey.to_string(),
        created_at,
        kind,
        tags: tags
            .into_iter()
            .map(|tag| tag.into_iter().map(str::to_string).collect())
            .collect(),
        content: String::new(),
        sig: "0".repeat(128),
    }
}
