//! DTOs for the token review exchange

use serde::{Deserialize, Serialize};

use crate::BearerTokenRef;

/// A token review request
#[derive(Debug, Serialize)]
pub struct TokenReview<'a> {
    /// Always `TokenReview`
    pub kind: &'static str,

    /// The API version of the review resource
    #[serde(rename = "apiVersion")]
    pub api_version: &'a str,

    /// The token being reviewed
    pub spec: TokenReviewSpec<'a>,
}

/// The subject of a token review request
#[derive(Debug, Serialize)]
pub struct TokenReviewSpec<'a> {
    /// The token being reviewed
    pub token: &'a BearerTokenRef,

    /// The audiences the token must be valid for
    #[serde(skip_serializing_if = "no_audiences")]
    pub audiences: &'a [String],
}

fn no_audiences(audiences: &&[String]) -> bool {
    audiences.is_empty()
}

/// A token review response
#[derive(Debug, Deserialize)]
pub struct TokenReviewResponse {
    /// The outcome of the review
    #[serde(default)]
    pub status: TokenReviewStatus,
}

/// The outcome of a token review
#[derive(Debug, Default, Deserialize)]
pub struct TokenReviewStatus {
    /// Whether the token was authenticated
    #[serde(default)]
    pub authenticated: bool,

    /// The user the token was issued to
    #[serde(default)]
    pub user: Option<UserInfo>,
}

/// The user information reported for an authenticated token
#[derive(Debug, Default, Deserialize)]
pub struct UserInfo {
    /// The name of the user
    #[serde(default)]
    pub username: String,

    /// A unique identifier for the user
    #[serde(default)]
    pub uid: Option<String>,

    /// The groups the user belongs to
    #[serde(default)]
    pub groups: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_matches_wire_shape() {
        let token = BearerTokenRef::from_str("a.b.c");
        let review = TokenReview {
            kind: "TokenReview",
            api_version: "authentication.k8s.io/v1",
            spec: TokenReviewSpec {
                token,
                audiences: &[],
            },
        };

        let json = serde_json::to_string(&review).unwrap();

        assert_eq!(
            json,
            r#"{"kind":"TokenReview","apiVersion":"authentication.k8s.io/v1","spec":{"token":"a.b.c"}}"#
        );
    }

    #[test]
    fn request_includes_audiences_when_configured() {
        let token = BearerTokenRef::from_str("a.b.c");
        let audiences = vec!["greeter".to_owned()];
        let review = TokenReview {
            kind: "TokenReview",
            api_version: "authentication.k8s.io/v1",
            spec: TokenReviewSpec {
                token,
                audiences: &audiences,
            },
        };

        let json = serde_json::to_value(&review).unwrap();

        assert_eq!(json["spec"]["audiences"], serde_json::json!(["greeter"]));
    }

    #[test]
    fn missing_authenticated_is_false() {
        let resp: TokenReviewResponse = serde_json::from_str(r#"{"status":{}}"#).unwrap();

        assert!(!resp.status.authenticated);
        assert!(resp.status.user.is_none());
    }

    #[test]
    fn reads_full_user_info() {
        let resp: TokenReviewResponse = serde_json::from_str(
            r#"{
                "kind": "TokenReview",
                "status": {
                    "authenticated": true,
                    "user": {
                        "username": "system:serviceaccount:default:admin-user",
                        "uid": "4c2e0f3e",
                        "groups": ["system:serviceaccounts", "system:authenticated"],
                        "extra": {"ignored": ["yes"]}
                    },
                    "audiences": ["https://kubernetes.default.svc"]
                }
            }"#,
        )
        .unwrap();

        let user = resp.status.user.unwrap();
        assert!(resp.status.authenticated);
        assert_eq!(user.username, "system:serviceaccount:default:admin-user");
        assert_eq!(user.uid.as_deref(), Some("4c2e0f3e"));
        assert_eq!(user.groups.len(), 2);
    }
}
