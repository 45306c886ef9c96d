//! Transfer executable error codes.
//!
//! The retryable column is the only source of retry eligibility for coded
//! errors reported on the management channel.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: u32,
    pub retryable: bool,
    pub mnemonic: &'static str,
    pub message: &'static str,
}

const fn info(
    code: u32,
    retryable: bool,
    mnemonic: &'static str,
    message: &'static str,
) -> ErrorInfo {
    ErrorInfo {
        code,
        retryable,
        mnemonic,
        message,
    }
}

/// Sorted by code.
pub const ERROR_TABLE: &[ErrorInfo] = &[
    info(1, true, "ERR_FASP_PROTO", "Generic fasp(tm) protocol error"),
    info(2, true, "ERR_ASCP", "Generic SCP error"),
    info(3, false, "ERR_AMBIGUOUS", "Ambiguous target"),
    info(4, false, "ERR_NO_SUCH_FILE", "No such file or directory"),
    info(5, false, "ERR_NO_PERMS", "Insufficient permission to read or write"),
    info(6, false, "ERR_NOT_DIR", "Target is not a directory"),
    info(7, false, "ERR_IS_DIR", "File is a directory - expected regular file"),
    info(8, false, "ERR_USAGE", "Incorrect usage of scp command"),
    info(9, false, "ERR_LIC_DUP", "Duplicate license"),
    info(10, false, "ERR_LIC_RATE_EXCEEDED", "Rate exceeds the cap imposed by license"),
    info(11, false, "ERR_INTERNAL_ERROR", "Internal error (unexpected error)"),
    info(12, true, "ERR_TRANSFER_ERROR", "Error establishing control connection"),
    info(13, true, "ERR_TRANSFER_TIMEOUT", "Timeout establishing control connection"),
    info(14, true, "ERR_CONNECTION_ERROR", "Error establishing data connection"),
    info(15, true, "ERR_CONNECTION_TIMEOUT", "Timeout establishing data connection"),
    info(16, true, "ERR_CONNECTION_LOST", "Connection lost"),
    info(17, true, "ERR_RCVR_SEND_ERROR", "Receiver fails to send feedback"),
    info(18, true, "ERR_RCVR_RECV_ERROR", "Receiver fails to receive data packets"),
    info(19, false, "ERR_AUTH", "Authentication failure"),
    info(20, false, "ERR_NOTHING", "Nothing to transfer"),
    info(21, false, "ERR_NOT_REGULAR", "Not a regular file (special file)"),
    info(22, false, "ERR_FILE_TABLE_OVR", "File table overflow"),
    info(23, true, "ERR_TOO_MANY_FILES", "Too many files open"),
    info(24, false, "ERR_FILE_TOO_BIG", "File too big for file system"),
    info(25, false, "ERR_NO_SPACE_LEFT", "No space left on disk"),
    info(26, false, "ERR_READ_ONLY_FS", "Read only file system"),
    info(27, false, "ERR_SOME_FILE_ERRS", "Some individual files failed"),
    info(28, false, "ERR_USER_CANCEL", "Cancelled by user"),
    info(29, false, "ERR_LIC_NOLIC", "License not found or unable to read"),
    info(30, false, "ERR_LIC_EXPIRED", "License expired"),
    info(31, false, "ERR_SOCK_SETUP", "Unable to setup socket (create, bind, etc ...)"),
    info(32, true, "ERR_OUT_OF_MEMORY", "Out of memory, unable to allocate"),
    info(33, true, "ERR_THREAD_SPAWN", "Can't spawn thread"),
    info(34, false, "ERR_UNAUTHORIZED", "Unauthorized by external auth server"),
    info(35, true, "ERR_DISK_READ", "Error reading source file from disk"),
    info(36, true, "ERR_DISK_WRITE", "Error writing to disk"),
    info(37, true, "ERR_AUTHORIZATION", "Used interchangeably with ERR_UNAUTHORIZED"),
    info(38, false, "ERR_LIC_ILLEGAL", "Operation not permitted by license"),
    info(39, true, "ERR_PEER_ABORTED_SESSION", "Remote peer terminated session"),
    info(40, true, "ERR_DATA_TRANSFER_TIMEOUT", "Transfer stalled, timed out"),
    info(41, false, "ERR_BAD_PATH", "Path violates docroot containment"),
    info(42, false, "ERR_ALREADY_EXISTS", "File or directory already exists"),
    info(43, false, "ERR_STAT_FAILS", "Cannot stat file"),
    info(44, true, "ERR_PMTU_BRTT_ERROR", "UDP session initiation fatal error"),
    info(45, true, "ERR_BWMEAS_ERROR", "Bandwidth measurement fatal error"),
    info(46, false, "ERR_VLINK_ERROR", "Virtual link error"),
    info(47, false, "ERR_CONNECTION_ERROR_HTTP", "Error establishing HTTP connection"),
    info(48, false, "ERR_FILE_ENCRYPTION_ERROR", "File encryption error, e.g. corrupt file"),
    info(49, false, "ERR_FILE_DECRYPTION_PASS", "File encryption/decryption password mismatch"),
    info(50, false, "ERR_BEARER_TOKEN", "Invalid or expired bearer token"),
];

pub fn lookup(code: u32) -> Option<&'static ErrorInfo> {
    ERROR_TABLE
        .binary_search_by_key(&code, |info| info.code)
        .ok()
        .map(|idx| &ERROR_TABLE[idx])
}
