//! Framework-neutral model of an inbound page request.

use std::fmt;

/// HTTP method as far as caching cares.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestMethod {
    Get,
    Head,
    Other(String),
}

impl RequestMethod {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => RequestMethod::Get,
            "HEAD" => RequestMethod::Head,
            other => RequestMethod::Other(other.to_string()),
        }
    }

    /// GET and HEAD only.
    pub fn is_safe(&self) -> bool {
        matches!(self, RequestMethod::Get | RequestMethod::Head)
    }
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMethod::Get => f.write_str("GET"),
            RequestMethod::Head => f.write_str("HEAD"),
            RequestMethod::Other(method) => f.write_str(method),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub method: RequestMethod,
    pub path: String,
    pub query: Option<String>,
    /// Names of the cookies the client sent. Cache decisions only look at names.
    pub cookies: Vec<String>,
    /// The `Cookie` header verbatim, passed through to an origin.
    pub cookie_header: Option<String>,
    pub user_agent: Option<String>,
    pub accept_encoding: Option<String>,
    pub admin: bool,
}

impl PageRequest {
    /// A plain anonymous GET, as issued by the preloader.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: RequestMethod::Get,
            path: path.into(),
            query: None,
            cookies: Vec::new(),
            cookie_header: None,
            user_agent: None,
            accept_encoding: None,
            admin: false,
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        let query = query.into();
        self.query = (!query.is_empty()).then_some(query);
        self
    }

    pub fn with_cookie(mut self, name: impl Into<String>) -> Self {
        self.cookies.push(name.into());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_method(mut self, method: RequestMethod) -> Self {
        self.method = method;
        self
    }

    pub fn as_admin(mut self) -> Self {
        self.admin = true;
        self
    }

    pub fn has_query(&self) -> bool {
        self.query.as_deref().is_some_and(|query| !query.is_empty())
    }

    pub fn accepts_gzip(&self) -> bool {
        self.accept_encoding.as_deref().is_some_and(|header| {
            header.split(',').any(|coding| {
                let mut parts = coding.trim().split(';');
                let name = parts.next().unwrap_or_default().trim();
                let rejected = parts.any(|param| {
                    param
                        .trim()
                        .strip_prefix("q=")
                        .and_then(|q| q.trim().parse::<f32>().ok())
                        .is_some_and(|q| q == 0.0)
                });
                name.eq_ignore_ascii_case("gzip") && !rejected
            })
        })
    }

    /// The substring test WordPress uses for `wp_is_mobile`.
    pub fn is_mobile(&self) -> bool {
        const MARKERS: [&str; 8] = [
            "Mobile",
            "Android",
            "Silk/",
            "Kindle",
            "BlackBerry",
            "Opera Mini",
            "Opera Mobi",
            "iPhone",
        ];
        self.user_agent
            .as_deref()
            .is_some_and(|agent| MARKERS.iter().any(|marker| agent.contains(marker)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_get_and_head_are_safe() {
        assert!(RequestMethod::parse("get").is_safe());
        assert!(RequestMethod::parse("HEAD").is_safe());
        assert!(!RequestMethod::parse("POST").is_safe());
        assert!(!RequestMethod::parse("DELETE").is_safe());
    }

    #[test]
    fn detects_mobile_agents() {
        let phone = PageRequest::get("/").with_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 Mobile/15E148",
        );
        let desktop = PageRequest::get("/")
            .with_user_agent("Mozilla/5.0 (X11; Linux x86_64) Gecko/20100101 Firefox/128.0");
        assert!(phone.is_mobile());
        assert!(!desktop.is_mobile());
        assert!(!PageRequest::get("/").is_mobile());
    }

    #[test]
    fn gzip_acceptance_honours_zero_quality() {
        let mut request = PageRequest::get("/");
        request.accept_encoding = Some("br, gzip;q=0.8".to_string());
        assert!(request.accepts_gzip());
        request.accept_encoding = Some("gzip;q=0, br".to_string());
        assert!(!request.accepts_gzip());
        request.accept_encoding = None;
        assert!(!request.accepts_gzip());
    }

    #[test]
    fn empty_query_is_no_query() {
        assert!(!PageRequest::get("/").with_query("").has_query());
        assert!(PageRequest::get("/").with_query("p=1").has_query());
    }
}
