//! Outbound backend notifications.

pub mod webhook;

pub use webhook::WebhookNotifier;

/// Receives one outcome record per terminal reward job
pub const CONFIRM_TRANSFER_PATH: &str = "api/receive-hook/confirm-transfer-nft-prize";

/// Receives reconciled asset snapshots from the scanner
pub const SYNC_ASSETS_PATH: &str = "api/receive-hook/sync-nft-prize";

/// Join a backend base url and a hook path
#[must_use]
pub fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_slashes() {
        assert_eq!(
            endpoint("http://backend/", CONFIRM_TRANSFER_PATH),
            "http://backend/api/receive-hook/confirm-transfer-nft-prize"
        );
        assert_eq!(
            endpoint("http://backend", "/api/receive-hook/sync-nft-prize"),
            "http://backend/api/receive-hook/sync-nft-prize"
        );
    }
}
