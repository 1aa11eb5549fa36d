use super::environment::{Environment, REPORTED_VARS};
use super::form::{self, FormValues};
use super::snapshot::RequestSnapshot;
use chrono::SecondsFormat;
use std::borrow::Cow;
use std::fmt::{self, Write};

/// Headers repeated at the top of the header section when present
pub const IMPORTANT_HEADERS: [&str; 5] = [
    "Content-Type",
    "Content-Length",
    "Authorization",
    "Accept",
    "Accept-Encoding",
];

/// Renders a [`RequestSnapshot`] as the plain-text diagnostic report.
///
/// Sections appear in a fixed order, each followed by a blank line:
/// summary, URL, headers, body, form data, server information, and a
/// completion marker with the processing time.
pub struct ReportFormatter<'a> {
    environment: &'a dyn Environment,
}

impl<'a> ReportFormatter<'a> {
    pub fn new(environment: &'a dyn Environment) -> Self {
        Self { environment }
    }

    /// Renders the full report into a new string
    pub fn render(&self, snapshot: &RequestSnapshot) -> String {
        let mut out = String::with_capacity(2048 + snapshot.body.len() * 2);
        self.write_report(&mut out, snapshot);
        out
    }

    /// Writes the report to `out`. A failing sink leaves a partial report.
    pub fn write_report<W: Write>(&self, out: &mut W, snapshot: &RequestSnapshot) {
        if let Err(e) = self.try_write_report(out, snapshot) {
            tracing::debug!(error = %e, "Report truncated by write error");
        }
    }

    fn try_write_report<W: Write>(&self, out: &mut W, s: &RequestSnapshot) -> fmt::Result {
        self.write_summary(out, s)?;
        self.write_url(out, s)?;
        self.write_headers(out, s)?;
        self.write_body(out, s)?;
        self.write_form(out, s)?;
        self.write_server(out, s)?;
        writeln!(out, "=== REQUEST COMPLETED ===")?;
        writeln!(out, "Processing Time: {:?}", s.start.elapsed())
    }

    fn write_summary<W: Write>(&self, out: &mut W, s: &RequestSnapshot) -> fmt::Result {
        writeln!(out, "=== REQUEST SUMMARY ===")?;
        writeln!(
            out,
            "Timestamp: {}",
            s.start.at.to_rfc3339_opts(SecondsFormat::Secs, true)
        )?;
        writeln!(out, "Method: {} | Protocol: {:?} | Host: {}", s.method, s.version, s.host)?;
        if !s.full_url.is_empty() {
            writeln!(out, "Full URL: {}", s.full_url)?;
        }
        writeln!(out, "Remote Address: {}", s.remote_addr)?;
        if s.client_addr != s.remote_addr {
            writeln!(out, "Real Client IP: {}", s.client_addr)?;
        }
        if !s.user_agent.is_empty() {
            writeln!(out, "User Agent: {}", s.user_agent)?;
        }
        writeln!(out)
    }

    fn write_url<W: Write>(&self, out: &mut W, s: &RequestSnapshot) -> fmt::Result {
        writeln!(out, "=== URL INFORMATION ===")?;
        writeln!(out, "Path: {}", s.path)?;
        if s.query.is_empty() {
            writeln!(out, "Query Parameters: (none)")?;
        } else {
            writeln!(out, "Query Parameters:")?;
            write_pairs(out, &s.query)?;
        }
        writeln!(out)
    }

    fn write_headers<W: Write>(&self, out: &mut W, s: &RequestSnapshot) -> fmt::Result {
        writeln!(out, "=== REQUEST HEADERS ===")?;
        for name in IMPORTANT_HEADERS {
            if let Some(value) = s.headers.get(name).filter(|v| !v.is_empty()) {
                writeln!(out, "* {name:<15}: {value}")?;
            }
        }

        writeln!(out)?;
        writeln!(out, "All Headers:")?;
        for (name, value) in s.headers.iter() {
            writeln!(out, "  {name:<20}: {value}")?;
        }
        writeln!(out)
    }

    fn write_body<W: Write>(&self, out: &mut W, s: &RequestSnapshot) -> fmt::Result {
        writeln!(out, "=== REQUEST BODY ===")?;
        match s.content_length {
            Some(n) => writeln!(out, "Content-Length: {n} bytes")?,
            None => writeln!(out, "Content-Length: unknown")?,
        }
        writeln!(out, "Content-Type: {}", s.content_type)?;

        if s.body.is_empty() {
            writeln!(out, "Body: (empty)")?;
        } else {
            writeln!(out, "Body Content:")?;
            writeln!(out, "{}", body_text(&s.content_type, &s.body))?;

            let parsed = form::parse_pairs(&s.body);
            if !parsed.is_empty() {
                writeln!(out)?;
                writeln!(out, "Parsed as form data:")?;
                write_pairs(out, &parsed)?;
            }
        }
        writeln!(out)
    }

    fn write_form<W: Write>(&self, out: &mut W, s: &RequestSnapshot) -> fmt::Result {
        writeln!(out, "=== FORM DATA ===")?;
        if s.form.is_empty() {
            writeln!(out, "Form Data: (none)")?;
        } else {
            writeln!(out, "Combined Form Data (GET + POST):")?;
            write_pairs(out, &s.form)?;
        }

        if !s.post_form.is_empty() {
            writeln!(out)?;
            writeln!(out, "POST Form Data Only:")?;
            write_pairs(out, &s.post_form)?;
        }
        writeln!(out)
    }

    fn write_server<W: Write>(&self, out: &mut W, s: &RequestSnapshot) -> fmt::Result {
        writeln!(out, "=== SERVER INFORMATION ===")?;
        if let Some(hostname) = self.environment.hostname() {
            writeln!(out, "Server Hostname: {hostname}")?;
        }
        writeln!(
            out,
            "Server Version: {}/{}",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )?;
        writeln!(
            out,
            "Server OS: {}/{}",
            std::env::consts::OS,
            std::env::consts::ARCH
        )?;
        for name in REPORTED_VARS {
            if let Some(value) = self.environment.var(name).filter(|v| !v.is_empty()) {
                writeln!(out, "{name}: {value}")?;
            }
        }
        writeln!(
            out,
            "Request Start Time: {}",
            s.start.at.to_rfc3339_opts(SecondsFormat::Nanos, true)
        )?;
        writeln!(out)
    }
}

/// Body as printed in the report: pretty JSON when the content type mentions
/// JSON and the body parses, the raw bytes (lossy UTF-8) otherwise
pub fn body_text<'b>(content_type: &str, body: &'b [u8]) -> Cow<'b, str> {
    if content_type.to_ascii_lowercase().contains("json") {
        if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
            if let Ok(pretty) = serde_json::to_string_pretty(&value) {
                return Cow::Owned(pretty);
            }
        }
    }
    String::from_utf8_lossy(body)
}

fn write_pairs<W: Write>(out: &mut W, values: &FormValues) -> fmt::Result {
    for (key, value) in values.iter() {
        writeln!(out, "  {key} = {value}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test_utils::request_head;
    use crate::inspect::{FixedEnvironment, RequestStart};
    use bytes::Bytes;
    use http::Method;

    fn snapshot(method: Method, target: &str, headers: &[(&str, &str)], body: &'static [u8]) -> RequestSnapshot {
        RequestSnapshot::capture(
            request_head(method, target, headers, body.len() as u64),
            Bytes::from_static(body),
            "192.168.1.1:40000".parse().unwrap(),
            RequestStart::now(),
        )
    }

    fn render(s: &RequestSnapshot) -> String {
        let env = FixedEnvironment::new()
            .with_hostname("echo-host")
            .with_var("POD_NAME", "echo-7d9f")
            .with_var("POD_NAMESPACE", "");
        ReportFormatter::new(&env).render(s)
    }

    fn section<'r>(report: &'r str, title: &str) -> &'r str {
        let start = report
            .find(&format!("=== {title} ==="))
            .unwrap_or_else(|| panic!("missing section {title}"));
        let rest = &report[start..];
        let end = rest.find("\n\n=== ").map(|i| i + 1).unwrap_or(rest.len());
        &rest[..end]
    }

    /// A "\n\n=== " search stops at the blank line inside the header and
    /// body sections, so those are cut at the next section title instead.
    fn section_until<'r>(report: &'r str, title: &str, next: &str) -> &'r str {
        let start = report.find(&format!("=== {title} ===")).unwrap();
        let end = report.find(&format!("=== {next} ===")).unwrap();
        &report[start..end]
    }

    #[test]
    fn test_sections_appear_in_order() {
        let report = render(&snapshot(Method::GET, "/", &[("Host", "h")], b""));
        let titles = [
            "REQUEST SUMMARY",
            "URL INFORMATION",
            "REQUEST HEADERS",
            "REQUEST BODY",
            "FORM DATA",
            "SERVER INFORMATION",
            "REQUEST COMPLETED",
        ];
        let positions: Vec<usize> = titles
            .iter()
            .map(|t| report.find(&format!("=== {t} ===")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(report.contains("Processing Time: "));
    }

    #[test]
    fn test_query_parameters_and_empty_body() {
        let report = render(&snapshot(Method::GET, "/test?a=1&a=2", &[("Host", "h")], b""));
        let url = section(&report, "URL INFORMATION");
        assert!(url.contains("Path: /test\n"));
        assert!(url.contains("Query Parameters:\n  a = 1\n  a = 2\n"));

        let body = section_until(&report, "REQUEST BODY", "FORM DATA");
        assert!(body.contains("Body: (empty)"));
        assert!(!body.contains("Body Content:"));
        assert!(!body.contains("Parsed as form data:"));
    }

    #[test]
    fn test_no_query_placeholder() {
        let report = render(&snapshot(Method::GET, "/plain", &[], b""));
        assert!(report.contains("Query Parameters: (none)\n"));
        assert!(report.contains("Form Data: (none)\n"));
        assert!(!report.contains("POST Form Data Only:"));
    }

    #[test]
    fn test_form_post() {
        let report = render(&snapshot(
            Method::POST,
            "/test",
            &[("Content-Type", "application/x-www-form-urlencoded")],
            b"x=5&y=hello",
        ));
        let form = section(&report, "FORM DATA");
        assert!(form.contains("Combined Form Data (GET + POST):\n  x = 5\n  y = hello\n"));
        assert!(form.contains("POST Form Data Only:\n  x = 5\n  y = hello\n"));

        let body = section_until(&report, "REQUEST BODY", "FORM DATA");
        assert!(body.contains("Body Content:\nx=5&y=hello\n"));
        assert!(body.contains("Parsed as form data:\n  x = 5\n  y = hello\n"));
    }

    #[test]
    fn test_json_body_is_pretty_printed() {
        let report = render(&snapshot(
            Method::POST,
            "/test",
            &[("Content-Type", "application/json")],
            br#"{"a":1}"#,
        ));
        let body = section_until(&report, "REQUEST BODY", "FORM DATA");
        assert!(body.contains("Body Content:\n{\n  \"a\": 1\n}\n"));
        assert!(!body.contains("Parsed as form data:"));
    }

    #[test]
    fn test_invalid_json_falls_back_to_raw() {
        let report = render(&snapshot(
            Method::POST,
            "/test",
            &[("Content-Type", "Application/Problem+JSON")],
            b"{not json",
        ));
        assert!(report.contains("Body Content:\n{not json\n"));
    }

    #[test]
    fn test_json_and_form_sections_can_both_print() {
        let report = render(&snapshot(
            Method::POST,
            "/",
            &[("Content-Type", "application/json")],
            br#"{"q":"k=v"}"#,
        ));
        assert!(report.contains("{\n  \"q\": \"k=v\"\n}\n"));
        assert!(report.contains("Parsed as form data:\n"));
    }

    #[test]
    fn test_client_ip_line_only_when_different() {
        let forwarded = render(&snapshot(
            Method::GET,
            "/",
            &[("X-Forwarded-For", "10.0.0.1, 10.0.0.2")],
            b"",
        ));
        let summary = section(&forwarded, "REQUEST SUMMARY");
        assert!(summary.contains("Remote Address: 192.168.1.1:40000\n"));
        assert!(summary.contains("Real Client IP: 10.0.0.1\n"));

        let direct = render(&snapshot(Method::GET, "/", &[], b""));
        assert!(!direct.contains("Real Client IP:"));
        assert!(!direct.contains("User Agent:"));
    }

    #[test]
    fn test_headers_section() {
        let report = render(&snapshot(
            Method::GET,
            "/",
            &[
                ("Host", "example.com"),
                ("Accept", "text/html"),
                ("X-Custom", "one"),
                ("X-Custom", "two"),
            ],
            b"",
        ));
        let headers = section_until(&report, "REQUEST HEADERS", "REQUEST BODY");
        assert!(headers.contains(&format!("* {:<15}: text/html\n", "Accept")));
        assert!(!headers.contains("* Authorization"));
        assert!(headers.contains(&format!("  {:<20}: example.com\n", "Host")));
        assert!(headers.contains(&format!("  {:<20}: one\n", "X-Custom")));
        assert!(headers.contains(&format!("  {:<20}: two\n", "X-Custom")));
    }

    #[test]
    fn test_server_section_uses_environment() {
        let report = render(&snapshot(Method::GET, "/", &[], b""));
        let server = section(&report, "SERVER INFORMATION");
        assert!(server.contains("Server Hostname: echo-host\n"));
        assert!(server.contains("POD_NAME: echo-7d9f\n"));
        assert!(!server.contains("POD_NAMESPACE"));
        assert!(!server.contains("CONTAINER_NAME"));
        assert!(server.contains("Request Start Time: "));

        let bare = ReportFormatter::new(&FixedEnvironment::new())
            .render(&snapshot(Method::GET, "/", &[], b""));
        assert!(!bare.contains("Server Hostname:"));
    }

    #[test]
    fn test_unknown_content_length() {
        let mut s = snapshot(Method::POST, "/", &[], b"abc");
        s.content_length = None;
        assert!(render(&s).contains("Content-Length: unknown\n"));
    }

    #[test]
    fn test_failing_sink_does_not_panic() {
        struct Broken(usize);
        impl Write for Broken {
            fn write_str(&mut self, s: &str) -> fmt::Result {
                self.0 += s.len();
                if self.0 > 64 { Err(fmt::Error) } else { Ok(()) }
            }
        }

        let mut sink = Broken(0);
        let env = FixedEnvironment::new();
        ReportFormatter::new(&env).write_report(&mut sink, &snapshot(Method::GET, "/", &[], b""));
        assert!(sink.0 > 64);
    }
}
