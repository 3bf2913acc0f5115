use crate::error::Result;

/// Response of a completed HTTP request, whatever its status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl HttpResponse {
    pub(crate) async fn read(response: reqwest::Response) -> Result<Self> {
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response.text().await?;

        Ok(Self {
            status,
            headers,
            body,
        })
    }

    pub fn is_success(&self) -> bool {
        is_http_success_code(self.status)
    }

    /// First header value with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Placeholder substitution applied to url and body before sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Replacement {
    pub search_value: String,
    pub replacer: String,
}

impl Replacement {
    pub fn new(search_value: impl Into<String>, replacer: impl Into<String>) -> Self {
        Self {
            search_value: search_value.into(),
            replacer: replacer.into(),
        }
    }
}

/// Replace the first occurrence of every search value, in order.
pub(crate) fn apply_replacements(text: &str, replacements: &[Replacement]) -> String {
    replacements.iter().fold(text.to_string(), |acc, r| {
        acc.replacen(&r.search_value, &r.replacer, 1)
    })
}

/// True for any 2xx status.
pub fn is_http_success_code(status: u16) -> bool {
    status / 100 == 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_codes() {
        assert!(is_http_success_code(200));
        assert!(is_http_success_code(204));
        assert!(is_http_success_code(299));
        assert!(!is_http_success_code(199));
        assert!(!is_http_success_code(301));
        assert!(!is_http_success_code(404));
    }

    #[test]
    fn test_replacements_only_touch_first_occurrence() {
        let replacements = [Replacement::new("%s", "42"), Replacement::new("%b", "on")];
        assert_eq!(
            apply_replacements("http://x/set?v=%s&w=%s&b=%b", &replacements),
            "http://x/set?v=42&w=%s&b=on"
        );
        assert_eq!(apply_replacements("no placeholders", &replacements), "no placeholders");
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let response = HttpResponse {
            status: 200,
            headers: vec![("content-type".into(), "text/plain".into())],
            body: String::new(),
        };
        assert_eq!(response.header("Content-Type"), Some("text/plain"));
        assert!(response.header("etag").is_none());
        assert!(response.is_success());
    }
}
