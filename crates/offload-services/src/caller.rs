//! Caller identity attached to every grid request.

pub const ANONYMOUS: &str = "anonymous";
pub const UNKNOWN_ORIGIN: &str = "unknown";

/// Who is calling and from where. Both halves are optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Caller {
    principal: Option<String>,
    origin: Option<String>,
}

impl Caller {
    /// Blank or whitespace-only principals are treated as anonymous.
    pub fn new(principal: Option<String>, origin: Option<String>) -> Self {
        let principal = principal
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        Self { principal, origin }
    }

    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Principal, or `"anonymous"`.
    pub fn user_id(&self) -> &str {
        self.principal.as_deref().unwrap_or(ANONYMOUS)
    }

    /// Origin address, or `"unknown"`.
    pub fn remote_address(&self) -> &str {
        self.origin.as_deref().unwrap_or(UNKNOWN_ORIGIN)
    }
}
