//! Pattern-based request shield
//!
//! Flags requests carrying well-known attack markers in the path or query,
//! and requests from well-known scanning tools.

/// Markers matched case-insensitively against the path and query
const PAYLOAD_MARKERS: &[(&str, &str)] = &[
    ("../", "path_traversal"),
    ("..\\", "path_traversal"),
    ("%2e%2e", "path_traversal"),
    ("..%2f", "path_traversal"),
    ("<script", "script_injection"),
    ("%3cscript", "script_injection"),
    ("javascript:", "script_injection"),
    ("union select", "sql_injection"),
    ("union%20select", "sql_injection"),
    ("union+select", "sql_injection"),
    ("' or '1'='1", "sql_injection"),
    ("%27%20or%20%271%27%3d%271", "sql_injection"),
    ("; drop table", "sql_injection"),
    ("%00", "null_byte"),
    ("\0", "null_byte"),
];

/// User agents of common vulnerability scanners
const SCANNER_AGENTS: &[&str] = &[
    "sqlmap", "nikto", "nmap", "masscan", "acunetix", "nessus", "wpscan", "dirbuster", "gobuster",
    "zgrab",
];

/// Request shield
#[derive(Debug, Clone)]
pub struct Shield {
    enabled: bool,
}

impl Shield {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    /// Name of the first rule the request trips, if any
    pub fn inspect(
        &self,
        path: &str,
        query: Option<&str>,
        user_agent: Option<&str>,
    ) -> Option<&'static str> {
        if !self.enabled {
            return None;
        }

        let target = match query {
            Some(q) => format!("{path}?{q}").to_lowercase(),
            None => path.to_lowercase(),
        };
        if let Some((_, rule)) = PAYLOAD_MARKERS
            .iter()
            .find(|(marker, _)| target.contains(*marker))
        {
            return Some(*rule);
        }

        let agent = user_agent?.to_lowercase();
        SCANNER_AGENTS
            .iter()
            .any(|scanner| agent.contains(scanner))
            .then_some("scanner_user_agent")
    }
}

impl Default for Shield {
    fn default() -> Self {
        Self::new(true)
    }
}
