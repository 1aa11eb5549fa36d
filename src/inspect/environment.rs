use std::collections::HashMap;
use std::io;

/// Environment variables reported in the server section, checked by exact name
pub const REPORTED_VARS: [&str; 4] = ["HOSTNAME", "POD_NAME", "POD_NAMESPACE", "CONTAINER_NAME"];

/// Process-wide facts about the host the server runs on.
///
/// Read at formatting time so tests can substitute fixed values.
pub trait Environment: Send + Sync {
    /// The machine's hostname, `None` when it cannot be determined
    fn hostname(&self) -> Option<String>;

    /// Value of an environment variable, `None` when unset
    fn var(&self, name: &str) -> Option<String>;
}

/// The real host: `gethostname(2)` and the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnvironment;

impl Environment for SystemEnvironment {
    fn hostname(&self) -> Option<String> {
        match system_hostname() {
            Ok(name) => Some(name),
            Err(e) => {
                tracing::debug!(error = %e, "Hostname lookup failed");
                None
            }
        }
    }

    fn var(&self, name: &str) -> Option<String> {
        std::env::var(name).ok()
    }
}

/// Returns the hostname of the local machine
pub fn system_hostname() -> io::Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: `buf` is valid for writes of `buf.len()` bytes for the whole call.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8(buf[..len].to_vec()).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Environment with fixed values
///
/// # Examples
///
/// ```
/// use http_echo::inspect::{Environment, FixedEnvironment};
///
/// let env = FixedEnvironment::new()
///     .with_hostname("web-1")
///     .with_var("POD_NAME", "web-1-abcde");
/// assert_eq!(env.hostname().as_deref(), Some("web-1"));
/// assert_eq!(env.var("POD_NAME").as_deref(), Some("web-1-abcde"));
/// assert_eq!(env.var("POD_NAMESPACE"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct FixedEnvironment {
    hostname: Option<String>,
    vars: HashMap<String, String>,
}

impl FixedEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn with_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl Environment for FixedEnvironment {
    fn hostname(&self) -> Option<String> {
        self.hostname.clone()
    }

    fn var(&self, name: &str) -> Option<String> {
        self.vars.get(name).cloned()
    }
}
