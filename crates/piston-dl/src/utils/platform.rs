use once_cell::sync::Lazy;
use sysinfo::System;

static OS_VERSION: Lazy<Option<String>> = Lazy::new(System::os_version);

/// Returns the host OS version string used for `os.version` rule matching
/// (e.g. "10.0.22631" on Windows, "14.2.1" on macOS). `None` when unknown.
pub fn os_version() -> Option<String> {
    OS_VERSION.clone()
}
