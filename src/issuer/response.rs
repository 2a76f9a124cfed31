use serde::{Deserialize, Serialize};

/// Response body of `GET /get-url`
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct IssueUrlResponse {
    pub url: String,

    /// Unix seconds after which the URL stops working, if it expires at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_url_response_json() {
        let with_expiry = IssueUrlResponse {
            url: "https://cdn.example.com/asset?token=abc".into(),
            expires_at: Some(1_700_000_000),
        };
        let json = serde_json::to_string(&with_expiry).unwrap();
        assert_eq!(
            json,
            r#"{"url":"https://cdn.example.com/asset?token=abc","expires_at":1700000000}"#
        );

        let without_expiry: IssueUrlResponse =
            serde_json::from_str(r#"{"url":"https://cdn.example.com/asset?token=abc"}"#).unwrap();
        assert_eq!(without_expiry.expires_at, None);
        assert_eq!(
            serde_json::to_string(&without_expiry).unwrap(),
            r#"{"url":"https://cdn.example.com/asset?token=abc"}"#
        );
    }
}
