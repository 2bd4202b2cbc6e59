//! Listen-URI selection for holon executables.
//!
//! `--listen <uri>` is used verbatim; otherwise `--port <n>` means
//! `tcp://:<n>`; otherwise the default URI applies.

use crate::transport::DEFAULT_URI;

/// Pick the listen URI from raw command-line arguments.
///
/// Unknown arguments are ignored. A flag missing its value is ignored too.
pub fn parse_flags<S: AsRef<str>>(args: &[S]) -> String {
    let mut listen = None;
    let mut port = None;

    let mut iter = args.iter().map(AsRef::as_ref);
    while let Some(arg) = iter.next() {
        match arg {
            "--listen" => {
                if let Some(value) = iter.next() {
                    listen.get_or_insert_with(|| value.to_string());
                }
            }
            "--port" => {
                if let Some(value) = iter.next() {
                    port.get_or_insert_with(|| value.to_string());
                }
            }
            _ => {}
        }
    }

    listen_uri(listen.as_deref(), port.as_deref())
}

/// Same precedence as [`parse_flags`] for values that were already parsed.
pub fn listen_uri(listen: Option<&str>, port: Option<&str>) -> String {
    match (listen, port) {
        (Some(uri), _) => uri.to_string(),
        (None, Some(port)) => format!("tcp://:{}", port),
        (None, None) => DEFAULT_URI.to_string(),
    }
}
