//! FTP reply codes (RFC 959 §4.2) and helpers to classify them.

// 1xx
pub const READY_MINUTE: u32 = 120;
pub const ALREADY_OPEN: u32 = 125;
pub const ABOUT_TO_SEND: u32 = 150;

// 2xx
pub const COMMAND_OK: u32 = 200;
pub const SYSTEM: u32 = 211;
pub const FILE: u32 = 213;
pub const READY: u32 = 220;
pub const CLOSING: u32 = 221;
pub const CLOSING_DATA_CONNECTION: u32 = 226;
pub const PASSIVE_MODE: u32 = 227;
pub const LOGGED_IN: u32 = 230;
pub const REQUESTED_FILE_ACTION_OK: u32 = 250;
pub const PATH_CREATED: u32 = 257;

// 3xx
pub const NEED_PASSWORD: u32 = 331;
pub const REQUEST_FILE_PENDING: u32 = 350;

/// Codes that acknowledge a finished data transfer.
pub const TRANSFER_COMPLETE: &[u32] = &[CLOSING_DATA_CONNECTION, REQUESTED_FILE_ACTION_OK];

/// Codes that announce a data transfer is about to start.
pub const TRANSFER_STARTING: &[u32] = &[ABOUT_TO_SEND, ALREADY_OPEN];

/// 1xx
pub fn is_positive_preliminary(code: u32) -> bool {
    (100..200).contains(&code)
}

/// 2xx
pub fn is_positive_completion(code: u32) -> bool {
    (200..300).contains(&code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_reply_codes() {
        assert!(is_positive_preliminary(ABOUT_TO_SEND));
        assert!(is_positive_preliminary(READY_MINUTE));
        assert!(!is_positive_preliminary(COMMAND_OK));
        assert!(is_positive_completion(READY));
        assert!(is_positive_completion(CLOSING_DATA_CONNECTION));
        assert!(!is_positive_completion(NEED_PASSWORD));
        assert!(!is_positive_completion(421));
    }
}
