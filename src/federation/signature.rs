//! HTTP Signatures for ActivityPub
//!
//! Header formats and canonicalization shared by the signing client and the
//! verification gate, per:
//! https://datatracker.ietf.org/doc/html/draft-cavage-http-signatures-12
//! https://docs.joinmastodon.org/spec/security/

use chrono::{DateTime, Utc};
use http::{HeaderMap, Method};

/// Pseudo-header covering the lower-cased method and the path with query
pub const REQUEST_TARGET: &str = "(request-target)";
/// Pseudo-header covering the `created` signature parameter
pub const CREATED: &str = "(created)";
/// Pseudo-header covering the `expires` signature parameter
pub const EXPIRES: &str = "(expires)";

/// Content type of every signed delivery
pub const ACTIVITY_STREAMS_CONTENT_TYPE: &str =
    r#"application/ld+json; profile="https://www.w3.org/ns/activitystreams""#;

/// Lifetime of a signature, in seconds from signing time
pub const SIGNATURE_EXPIRATION_SECS: i64 = 60;

/// Format an instant as an RFC 2616 `Date` value
///
/// RFC 2616 wants RFC 1123 dates with a literal `GMT` zone; a `UTC` or
/// `+0000` suffix is rejected by strict verifiers.
pub fn http_date(instant: DateTime<Utc>) -> String {
    instant.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Current time as an RFC 2616 `Date` value
pub fn current_time() -> String {
    http_date(Utc::now())
}

/// Parse a `Date` header value
pub fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value.trim())
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Path and query of a URL, as used by `(request-target)`
pub fn path_and_query(url: &url::Url) -> String {
    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Strip the fragment from a key id, yielding the actor document URL
pub fn actor_id_from_key_id(key_id: &str) -> &str {
    key_id.split('#').next().unwrap_or(key_id)
}

/// Parameters of a `Signature` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    /// Key ID (URL to public key)
    pub key_id: String,
    /// Declared algorithm, if any
    pub algorithm: Option<String>,
    /// Covered header names, lower-cased, in signing order
    pub headers: Vec<String>,
    /// Base64-encoded signature
    pub signature: String,
    /// Unix time the signature was created
    pub created: Option<i64>,
    /// Unix time the signature expires
    pub expires: Option<i64>,
}

impl SignatureParams {
    /// Parse a `Signature` header value
    ///
    /// # Format
    /// ```text
    /// keyId="...",algorithm="...",headers="...",signature="...",created=N,expires=N
    /// ```
    ///
    /// Unknown parameters are ignored. A missing `headers` parameter means
    /// only `date` is covered.
    pub fn parse(header: &str) -> Result<Self, String> {
        let mut key_id = None;
        let mut algorithm = None;
        let mut headers = None;
        let mut signature = None;
        let mut created = None;
        let mut expires = None;

        for (name, value) in split_parameters(header)? {
            match name.as_str() {
                "keyId" => key_id = Some(value),
                "algorithm" => algorithm = Some(value),
                "headers" => {
                    headers = Some(
                        value
                            .split_whitespace()
                            .map(|s| s.to_ascii_lowercase())
                            .collect(),
                    )
                }
                "signature" => signature = Some(value),
                "created" => created = Some(parse_timestamp("created", &value)?),
                "expires" => expires = Some(parse_timestamp("expires", &value)?),
                _ => {}
            }
        }

        Ok(Self {
            key_id: key_id
                .filter(|id| !id.is_empty())
                .ok_or_else(|| "Missing keyId".to_string())?,
            algorithm,
            headers: headers.unwrap_or_else(|| vec!["date".to_string()]),
            signature: signature
                .filter(|sig| !sig.is_empty())
                .ok_or_else(|| "Missing signature".to_string())?,
            created,
            expires,
        })
    }

    /// Serialize into a `Signature` header value
    pub fn to_header_value(&self) -> String {
        let mut value = format!("keyId=\"{}\"", self.key_id);
        if let Some(algorithm) = &self.algorithm {
            value.push_str(&format!(",algorithm=\"{}\"", algorithm));
        }
        value.push_str(&format!(
            ",headers=\"{}\",signature=\"{}\"",
            self.headers.join(" "),
            self.signature
        ));
        if let Some(created) = self.created {
            value.push_str(&format!(",created={}", created));
        }
        if let Some(expires) = self.expires {
            value.push_str(&format!(",expires={}", expires));
        }
        value
    }
}

fn parse_timestamp(name: &str, value: &str) -> Result<i64, String> {
    value
        .parse::<i64>()
        .map_err(|_| format!("Invalid {} parameter: {}", name, value))
}

fn split_parameters(header: &str) -> Result<Vec<(String, String)>, String> {
    let mut parameters = Vec::new();
    let mut rest = header.trim();

    while !rest.is_empty() {
        let (name, after) = rest
            .split_once('=')
            .ok_or_else(|| format!("Malformed signature parameter: {}", rest))?;
        let after = after.trim_start();

        let (value, remainder) = if let Some(quoted) = after.strip_prefix('"') {
            let end = quoted
                .find('"')
                .ok_or_else(|| format!("Unterminated value for {}", name.trim()))?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after.find(',') {
                Some(end) => (&after[..end], &after[end..]),
                None => (after, ""),
            }
        };

        parameters.push((name.trim().to_string(), value.trim().to_string()));

        let remainder = remainder.trim_start();
        rest = if remainder.is_empty() {
            remainder
        } else {
            remainder
                .strip_prefix(',')
                .ok_or_else(|| format!("Expected ',' after {}", name.trim()))?
                .trim_start()
        };
    }

    Ok(parameters)
}

/// Build the signing string over `covered`, in order
///
/// # Errors
/// The name of the first covered header that has no value.
pub fn signing_string(
    covered: &[String],
    method: &Method,
    path_and_query: &str,
    headers: &HeaderMap,
    created: Option<i64>,
    expires: Option<i64>,
) -> Result<String, String> {
    let mut lines = Vec::with_capacity(covered.len());

    for name in covered {
        let value = match name.as_str() {
            REQUEST_TARGET => format!(
                "{} {}",
                method.as_str().to_ascii_lowercase(),
                path_and_query
            ),
            CREATED => created.ok_or_else(|| name.clone())?.to_string(),
            EXPIRES => expires.ok_or_else(|| name.clone())?.to_string(),
            _ => header_value(headers, name).ok_or_else(|| name.clone())?,
        };
        lines.push(format!("{}: {}", name, value));
    }

    Ok(lines.join("\n"))
}

/// All values of a header, trimmed and joined with `, `
pub fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let values = headers
        .get_all(name)
        .iter()
        .map(|value| value.to_str().map(str::trim))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use http::HeaderValue;

    #[test]
    fn http_date_uses_gmt() {
        let instant = Utc.with_ymd_and_hms(2022, 3, 14, 9, 26, 53).unwrap();
        let formatted = http_date(instant);

        assert_eq!(formatted, "Mon, 14 Mar 2022 09:26:53 GMT");
        assert!(formatted.ends_with("GMT"));
        assert!(!formatted.contains("UTC"));
        assert_eq!(parse_http_date(&formatted), Some(instant));
    }

    #[test]
    fn current_time_parses_back() {
        let now = current_time();
        assert!(now.ends_with(" GMT"));
        let parsed = parse_http_date(&now).expect("current time should parse");
        assert!((Utc::now() - parsed).num_seconds().abs() <= 1);
    }

    #[test]
    fn parse_reads_all_parameters() {
        let parsed = SignatureParams::parse(
            "keyId=\"https://remote.example/api/v1/activitypub/user/alice#main-key\",algorithm=\"rsa-sha256\",headers=\"(request-target) Date digest\",signature=\"ZmFrZQ==\",created=1700000000,expires=1700000060",
        )
        .expect("header should parse");

        assert_eq!(
            parsed.key_id,
            "https://remote.example/api/v1/activitypub/user/alice#main-key"
        );
        assert_eq!(parsed.algorithm.as_deref(), Some("rsa-sha256"));
        assert_eq!(parsed.headers, vec!["(request-target)", "date", "digest"]);
        assert_eq!(parsed.signature, "ZmFrZQ==");
        assert_eq!(parsed.created, Some(1_700_000_000));
        assert_eq!(parsed.expires, Some(1_700_000_060));
    }

    #[test]
    fn parse_keeps_commas_inside_quotes() {
        let parsed =
            SignatureParams::parse("keyId=\"https://a.example/u?x=1,2#k\", signature=\"c2ln\"")
                .expect("header should parse");
        assert_eq!(parsed.key_id, "https://a.example/u?x=1,2#k");
        assert_eq!(parsed.headers, vec!["date"]);
        assert_eq!(parsed.algorithm, None);
    }

    #[test]
    fn parse_rejects_missing_key_id() {
        let err = SignatureParams::parse("algorithm=\"rsa-sha256\",signature=\"c2ln\"")
            .expect_err("keyId is required");
        assert!(err.contains("keyId"));
    }

    #[test]
    fn parse_rejects_unterminated_quote() {
        assert!(SignatureParams::parse("keyId=\"https://a.example,signature=\"x\"").is_err());
    }

    #[test]
    fn serialized_header_parses_back() {
        let params = SignatureParams {
            key_id: "https://a.example/api/v1/activitypub/user/bob#main-key".to_string(),
            algorithm: Some("rsa-sha512".to_string()),
            headers: vec!["(request-target)".to_string(), "date".to_string()],
            signature: "YWJj".to_string(),
            created: Some(10),
            expires: Some(70),
        };
        assert_eq!(
            SignatureParams::parse(&params.to_header_value()).expect("parse"),
            params
        );
    }

    #[test]
    fn signing_string_follows_covered_order() {
        let mut headers = HeaderMap::new();
        headers.insert("date", HeaderValue::from_static("Mon, 14 Mar 2022 09:26:53 GMT"));
        headers.insert("digest", HeaderValue::from_static("SHA-256=abc"));

        let covered = vec![
            "digest".to_string(),
            REQUEST_TARGET.to_string(),
            "date".to_string(),
            EXPIRES.to_string(),
        ];
        let signing = signing_string(
            &covered,
            &Method::POST,
            "/api/v1/activitypub/user/bob/inbox?x=1",
            &headers,
            Some(1),
            Some(61),
        )
        .expect("signing string");

        assert_eq!(
            signing,
            "digest: SHA-256=abc\n(request-target): post /api/v1/activitypub/user/bob/inbox?x=1\ndate: Mon, 14 Mar 2022 09:26:53 GMT\n(expires): 61"
        );
    }

    #[test]
    fn signing_string_reports_missing_header() {
        let headers = HeaderMap::new();
        let covered = vec![REQUEST_TARGET.to_string(), "date".to_string()];
        let missing = signing_string(&covered, &Method::GET, "/", &headers, None, None)
            .expect_err("date is absent");
        assert_eq!(missing, "date");
    }

    #[test]
    fn repeated_header_values_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("x-thing", HeaderValue::from_static(" a "));
        headers.append("x-thing", HeaderValue::from_static("b"));
        assert_eq!(header_value(&headers, "x-thing").as_deref(), Some("a, b"));
    }

    #[test]
    fn actor_id_strips_fragment() {
        assert_eq!(
            actor_id_from_key_id("https://a.example/api/v1/activitypub/user/bob#main-key"),
            "https://a.example/api/v1/activitypub/user/bob"
        );
    }
}
