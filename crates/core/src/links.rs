use url::Url;

pub const TOKEN_DASHBOARD_URL: &str = "https://dash.cloudflare.com/profile/api-tokens";
pub const APP_DISPLAY_NAME: &str = "Cloudflare D1 Viewer";

/// Dashboard link that pre-fills a token with D1 edit permission.
#[must_use]
pub fn token_creation_link(name: &str) -> String {
    let permissions = serde_json::json!([{ "key": "d1", "type": "edit" }]).to_string();
    match Url::parse_with_params(
        TOKEN_DASHBOARD_URL,
        &[("permissionGroupKeys", permissions.as_str()), ("name", name)],
    ) {
        Ok(url) => url.to_string(),
        Err(_) => TOKEN_DASHBOARD_URL.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use url::Url;

    use super::{token_creation_link, APP_DISPLAY_NAME, TOKEN_DASHBOARD_URL};

    #[test]
    fn link_carries_d1_edit_permission_and_name() {
        let link = token_creation_link(APP_DISPLAY_NAME);
        assert!(link.starts_with(TOKEN_DASHBOARD_URL));

        let parsed = Url::parse(&link).expect("link should parse");
        let pairs = parsed.query_pairs().into_owned().collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                (
                    "permissionGroupKeys".to_string(),
                    r#"[{"key":"d1","type":"edit"}]"#.to_string()
                ),
                ("name".to_string(), "Cloudflare D1 Viewer".to_string()),
            ]
        );
    }

    #[test]
    fn link_encodes_reserved_characters() {
        let link = token_creation_link("a&b");
        assert!(link.contains("name=a%26b"));
        assert!(!link.contains('"'));
    }
}
